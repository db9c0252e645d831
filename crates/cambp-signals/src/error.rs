use thiserror::Error;

/// Errors raised by signal construction, filter design and alignment.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum SignalError {
    #[error("times and values differ in length ({times} vs {values})")]
    LengthMismatch { times: usize, values: usize },
    #[error("sampling rate must be positive and finite, got {0}")]
    InvalidSampleRate(f64),
    #[error("cutoff must be positive and below Nyquist, got {0}")]
    InvalidCutoff(f64),
    #[error("filter order must be at least 1, got {0}")]
    InvalidOrder(usize),
    #[error("window length must be positive and finite, got {0}")]
    InvalidWindow(f64),
    #[error("signal of length {len} is too short for padding of {padlen} samples")]
    SignalTooShort { len: usize, padlen: usize },
    #[error("filter produced non-finite output")]
    NonFiniteOutput,
}
