//! # quantgrade-core
//!
//! Core types, traits, configuration, and error handling for the quantgrade
//! SOPR analysis pipeline.

pub mod cohort;
pub mod config;
pub mod error;
pub mod table;
pub mod traits;
