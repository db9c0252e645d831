//! DSP (Digital Signal Processing) module
//!
//! - `ButterworthLowPass` - cascaded-biquad Butterworth design, zero-phase filtering
//! - `AntiAliasFilter` - NaN-aware low-pass applied before resampling
//! - Gap interpolation, MAD outlier suppression and amplitude normalization

mod antialias;
mod butterworth;
mod interpolate;
mod normalize;

pub use antialias::{antialias_filter, AntiAliasConfig, AntiAliasFilter, FilterOutcome, FilterStatus};
pub use butterworth::{Biquad, ButterworthLowPass};
pub use interpolate::{fill_gaps_linear, interp_linear};
pub use normalize::{
    align_to_reference, finite_median, normalize_to_range, remove_mad_outliers, RangeAlignment,
};
