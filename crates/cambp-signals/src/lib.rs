//! # cambp-signals
//!
//! Signal plumbing for camera-based blood-pressure research.
//!
//! This crate provides:
//! - **Anti-aliasing**: Butterworth low-pass, zero-phase, NaN-aware
//! - **Alignment**: window trimming, uniform resampling and interpolation of
//!   reference signals onto smartphone time axes
//! - **Waveform helpers**: MAD outlier suppression, range normalization,
//!   amplitude alignment
//!
//! ## Example
//!
//! ```ignore
//! use cambp_signals::{AntiAliasFilter, TemporalAligner, TimeSeries};
//!
//! let beats = TimeSeries::new(beat_times, sbp)?;
//! let last_minute = TemporalAligner::trim_to_last_window(&beats, 60.0)?;
//! let ref_sbp = TemporalAligner::interpolate_onto(&last_minute, &phone_times);
//!
//! let filter = AntiAliasFilter::new(409.6, 15.0)?;
//! let smoothed = filter.filter(&finger_wave).values;
//! ```

pub mod align;
pub mod dsp;
pub mod error;
pub mod series;

pub use align::TemporalAligner;
pub use dsp::{AntiAliasConfig, AntiAliasFilter, ButterworthLowPass, FilterOutcome, FilterStatus};
pub use error::SignalError;
pub use series::TimeSeries;
