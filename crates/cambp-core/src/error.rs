use cambp_signals::SignalError;
use thiserror::Error;

use crate::config::ConfigError;

/// Failures inside a single estimator fit.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum RegressionError {
    #[error("no training samples")]
    EmptyData,
    #[error("dimension mismatch: expected {expected}, got {got}")]
    DimensionMismatch { expected: usize, got: usize },
    #[error("invalid regularization strength: {0}")]
    InvalidAlpha(f64),
    #[error("numerical failure: {0}")]
    Numerical(String),
}

/// Fatal pipeline errors. Recoverable conditions (filter fallback, skipped
/// folds, skipped methods) are logged instead.
#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("missing required column '{0}'")]
    MissingColumn(String),
    #[error("no valid rows remain after {0}")]
    NoValidRows(String),
    #[error("group splitting needs at least {required} groups, found {found}")]
    InsufficientGroups { found: usize, required: usize },
    #[error("time-series splitting requires a time column")]
    MissingTimeColumn,
    #[error("cannot split {n_samples} samples into {n_splits} folds")]
    TooFewSamples { n_samples: usize, n_splits: usize },
    #[error("split count must be at least 2, got {0}")]
    InvalidSplits(usize),
    #[error("row has {got} feature values, table declares {expected}")]
    DimensionMismatch { expected: usize, got: usize },
    #[error("invalid input: {0}")]
    InvalidInput(String),
    #[error("regression failed: {0}")]
    Regression(#[from] RegressionError),
    #[error("signal processing failed: {0}")]
    Signal(#[from] SignalError),
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("pattern error: {0}")]
    Pattern(#[from] regex::Error),
}
