use chrono::{Duration, TimeZone, Utc};
use clap::{Parser, Subcommand};
use quantgrade_core::config;
use quantgrade_core::table::{Row, Table};
use quantgrade_sopr::report::{self, SoprResult};
use quantgrade_sopr::QuantGradeSoprModel;
use rand::rngs::StdRng;
use rand::SeedableRng;
use rand_distr::{Distribution, LogNormal, Normal};
use std::path::PathBuf;

#[derive(Parser)]
#[command(
    name = "quantgrade",
    version,
    about = "Quant-grade SOPR analysis for on-chain data"
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Path to config file.
    #[arg(short, long, default_value = "config.toml")]
    config: String,
}

#[derive(Subcommand)]
enum Commands {
    /// Analyze a JSON array of rows.
    Analyze {
        /// Input file: `[{"timestamp": ..., "price": ..., ...}, ...]`.
        #[arg(short, long)]
        input: PathBuf,
        /// Skip model fitting; forecasts and fitted overlays are omitted.
        #[arg(long)]
        no_fit: bool,
        /// Print the full result as JSON instead of the advisory block.
        #[arg(long)]
        json: bool,
    },
    /// Fit and analyze a synthetic random-walk market.
    Demo {
        /// Days of synthetic history.
        #[arg(long, default_value_t = 366)]
        days: usize,
        /// Random seed of the synthetic market.
        #[arg(long, default_value_t = 42)]
        seed: u64,
        /// Print the full result as JSON instead of the advisory block.
        #[arg(long)]
        json: bool,
    },
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let cfg = config::load(&cli.config)?;

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&cfg.general.log_level)),
        )
        .with_writer(std::io::stderr)
        .init();

    match cli.command {
        Commands::Analyze {
            input,
            no_fit,
            json,
        } => {
            let data = Table::load_json(&input)
                .map_err(|e| anyhow::anyhow!("failed to load {}: {e}", input.display()))?;
            if data.is_empty() {
                anyhow::bail!("{} contains no rows", input.display());
            }
            tracing::info!("loaded {} rows from {}", data.len(), input.display());
            let mut model = QuantGradeSoprModel::new(cfg);
            if !no_fit {
                model.fit(&data);
            }
            print_result(&model.analyze(&data), json)?;
        }
        Commands::Demo { days, seed, json } => {
            if days == 0 {
                anyhow::bail!("--days must be positive");
            }
            let data = synthetic_market(days, seed)?;
            let mut model = QuantGradeSoprModel::new(cfg);
            model.fit(&data);
            if !model.is_fitted() {
                println!("Not enough history to fit ({days} days), analyzing unfitted.\n");
            }
            let result = model.analyze(&data);
            if !json {
                for cohort in &result.utxo_cohorts {
                    println!(
                        "{}: SOPR={:.3}, impact={}",
                        cohort.kind, cohort.sopr_value, cohort.market_impact
                    );
                }
                println!();
            }
            print_result(&result, json)?;
        }
    }

    Ok(())
}

fn print_result(result: &SoprResult, json: bool) -> anyhow::Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(result)?);
    } else {
        println!("{}", report::format_report(result));
    }
    Ok(())
}

/// Daily random walk starting at 40 000 with 2% shocks, floored at 1 000.
fn synthetic_market(days: usize, seed: u64) -> anyhow::Result<Table> {
    let mut rng = StdRng::seed_from_u64(seed);
    let step = Normal::new(0.0, 0.02)?;
    let realized_noise = Normal::new(0.0, 0.01)?;
    let spent_noise = Normal::new(0.0, 0.02)?;
    let cost_noise = Normal::new(0.0, 0.1)?;
    let volume = LogNormal::new(15.0, 1.0)?;
    let start = Utc
        .with_ymd_and_hms(2023, 1, 1, 0, 0, 0)
        .single()
        .ok_or_else(|| anyhow::anyhow!("invalid demo start date"))?;

    let mut price = 40_000.0_f64;
    let rows: Vec<Row> = (0..days)
        .map(|day| {
            price = (price * (1.0 + step.sample(&mut rng))).max(1_000.0);
            Row {
                timestamp: Some(start + Duration::days(day as i64)),
                price: Some(price),
                volume: Some(volume.sample(&mut rng)),
                realized_price: Some(price * (1.0 + realized_noise.sample(&mut rng))),
                spent_price: Some(price * (1.0 + spent_noise.sample(&mut rng))),
                cost_basis: Some(price * 0.8 * (1.0 + cost_noise.sample(&mut rng))),
                sopr: None,
            }
        })
        .collect();
    Ok(Table::from_rows(&rows))
}
