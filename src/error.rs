//! Error types for the rebalancing engine.
//!
//! Hard errors cover construction-time failures only. Every recoverable
//! condition during a rebalance run becomes a [`Diagnostic`](crate::diag::Diagnostic)
//! attached to the account it occurred in; the engine never aborts mid-run.

use std::path::PathBuf;

/// All errors that can occur while constructing an engine or its inputs.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("config error: {0}")]
    Config(String),

    #[error("failed to read config file {path}: {source}")]
    ConfigRead {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("failed to parse config: {0}")]
    ConfigParse(#[from] toml::de::Error),

    #[error("ticker {symbol}: subcodes {first} and {second} imply incompatible categories")]
    SubcodeConflict {
        symbol: crate::types::Symbol,
        first: char,
        second: char,
    },

    #[error("ticker table error: {0}")]
    Ticker(String),
}

pub type Result<T> = std::result::Result<T, Error>;
