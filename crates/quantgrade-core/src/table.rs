//! Columnar, time-ordered input table.
//!
//! Every column the pipeline knows about is a [`Column`] variant. A column is
//! present when at least one input row carries a value for it; missing cells
//! are stored as `NaN` so windowed statistics can skip them.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::ops::Range;
use std::path::Path;

use crate::error::QuantError;

/// Known input columns.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Column {
    Price,
    Volume,
    RealizedPrice,
    SpentPrice,
    CostBasis,
    Sopr,
}

impl Column {
    pub const ALL: [Column; 6] = [
        Column::Price,
        Column::Volume,
        Column::RealizedPrice,
        Column::SpentPrice,
        Column::CostBasis,
        Column::Sopr,
    ];

    /// Column name as it appears in input files.
    pub fn name(&self) -> &'static str {
        match self {
            Self::Price => "price",
            Self::Volume => "volume",
            Self::RealizedPrice => "realized_price",
            Self::SpentPrice => "spent_price",
            Self::CostBasis => "cost_basis",
            Self::Sopr => "sopr",
        }
    }
}

impl fmt::Display for Column {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// One input row as read from JSON.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Row {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub price: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub volume: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub realized_price: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub spent_price: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cost_basis: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sopr: Option<f64>,
}

impl Row {
    fn get(&self, column: Column) -> Option<f64> {
        match column {
            Column::Price => self.price,
            Column::Volume => self.volume,
            Column::RealizedPrice => self.realized_price,
            Column::SpentPrice => self.spent_price,
            Column::CostBasis => self.cost_basis,
            Column::Sopr => self.sopr,
        }
    }
}

/// Immutable columnar table. Slicing produces new tables.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Table {
    len: usize,
    timestamps: Vec<Option<DateTime<Utc>>>,
    columns: BTreeMap<Column, Vec<f64>>,
}

impl Table {
    /// Build a table from rows. Columns absent from every row are omitted.
    pub fn from_rows(rows: &[Row]) -> Self {
        let mut columns = BTreeMap::new();
        for column in Column::ALL {
            if rows.iter().any(|r| r.get(column).is_some()) {
                let values = rows
                    .iter()
                    .map(|r| r.get(column).unwrap_or(f64::NAN))
                    .collect();
                columns.insert(column, values);
            }
        }
        Self {
            len: rows.len(),
            timestamps: rows.iter().map(|r| r.timestamp).collect(),
            columns,
        }
    }

    /// Build a table from whole columns. All columns must share one length.
    pub fn from_columns<I>(columns: I) -> Result<Self, QuantError>
    where
        I: IntoIterator<Item = (Column, Vec<f64>)>,
    {
        let columns: BTreeMap<Column, Vec<f64>> = columns.into_iter().collect();
        let len = columns.values().next().map_or(0, Vec::len);
        if let Some((column, values)) = columns.iter().find(|(_, v)| v.len() != len) {
            return Err(QuantError::Table(format!(
                "column {column} has {} rows, expected {len}",
                values.len()
            )));
        }
        Ok(Self {
            len,
            timestamps: vec![None; len],
            columns,
        })
    }

    /// Parse a JSON array of row objects.
    pub fn from_json_str(json: &str) -> Result<Self, QuantError> {
        let rows: Vec<Row> = serde_json::from_str(json)?;
        Ok(Self::from_rows(&rows))
    }

    /// Read a JSON array of row objects from disk.
    pub fn load_json(path: impl AsRef<Path>) -> Result<Self, QuantError> {
        let content = std::fs::read_to_string(path.as_ref())?;
        Self::from_json_str(&content)
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Whether the column is present.
    pub fn has(&self, column: Column) -> bool {
        self.columns.contains_key(&column)
    }

    /// Raw column values (may contain `NaN` for missing cells).
    pub fn column(&self, column: Column) -> Option<&[f64]> {
        self.columns.get(&column).map(Vec::as_slice)
    }

    /// Column values, or [`QuantError::MissingColumn`].
    pub fn require(&self, column: Column) -> Result<&[f64], QuantError> {
        self.column(column)
            .ok_or(QuantError::MissingColumn(column.name()))
    }

    /// Finite values of a column, in order. Empty when the column is absent.
    pub fn finite(&self, column: Column) -> Vec<f64> {
        self.column(column)
            .map(|v| v.iter().copied().filter(|x| x.is_finite()).collect())
            .unwrap_or_default()
    }

    /// Single cell, `None` when the column is absent or the cell is not finite.
    pub fn value(&self, column: Column, row: usize) -> Option<f64> {
        self.column(column)
            .and_then(|v| v.get(row))
            .copied()
            .filter(|x| x.is_finite())
    }

    /// Timestamp of the last row, if known.
    pub fn last_timestamp(&self) -> Option<DateTime<Utc>> {
        self.timestamps.last().copied().flatten()
    }

    /// Rows `range` as a new table. Out-of-range bounds are clamped.
    pub fn slice(&self, range: Range<usize>) -> Self {
        let end = range.end.min(self.len);
        let start = range.start.min(end);
        Self {
            len: end - start,
            timestamps: self.timestamps[start..end].to_vec(),
            columns: self
                .columns
                .iter()
                .map(|(c, v)| (*c, v[start..end].to_vec()))
                .collect(),
        }
    }

    /// The last `n` rows (or all rows when shorter).
    pub fn tail(&self, n: usize) -> Self {
        self.slice(self.len.saturating_sub(n)..self.len)
    }

    /// Rows `[0, end)`.
    pub fn head(&self, end: usize) -> Self {
        self.slice(0..end)
    }

    /// Convert back to row objects.
    pub fn rows(&self) -> Vec<Row> {
        (0..self.len)
            .map(|i| {
                let cell = |c: Column| self.column(c).map(|v| v[i]).filter(|x| !x.is_nan());
                Row {
                    timestamp: self.timestamps[i],
                    price: cell(Column::Price),
                    volume: cell(Column::Volume),
                    realized_price: cell(Column::RealizedPrice),
                    spent_price: cell(Column::SpentPrice),
                    cost_basis: cell(Column::CostBasis),
                    sopr: cell(Column::Sopr),
                }
            })
            .collect()
    }
}
