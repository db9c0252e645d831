//! Anti-aliasing low-pass filter for reference signals
//!
//! Applied to high-rate reference waveforms before they are resampled onto
//! the slower smartphone time axis.

use ndarray::Array1;

use super::butterworth::ButterworthLowPass;
use super::interpolate::fill_gaps_linear;
use crate::error::SignalError;

/// Anti-aliasing filter configuration
#[derive(Debug, Clone)]
pub struct AntiAliasConfig {
    /// Sample rate of the signal being filtered, in Hz
    pub sampling_rate_hz: f64,
    /// Low-pass cutoff in Hz
    pub cutoff_hz: f64,
    /// Butterworth order
    pub order: usize,
}

impl Default for AntiAliasConfig {
    fn default() -> Self {
        Self {
            sampling_rate_hz: 409.6,
            cutoff_hz: 15.0,
            order: 4,
        }
    }
}

/// How a call to [`AntiAliasFilter::filter`] was resolved.
#[derive(Debug, Clone, PartialEq)]
pub enum FilterStatus {
    /// Zero-phase filtering applied; NaN positions restored.
    Applied,
    /// Cutoff at or above Nyquist; input returned unchanged.
    AboveNyquist,
    /// Not enough finite samples for the filter order; input returned unchanged.
    TooFewSamples,
    /// Filtering failed; gap-filled but unfiltered signal returned.
    Fallback(String),
}

#[derive(Debug, Clone)]
pub struct FilterOutcome {
    pub values: Array1<f64>,
    pub status: FilterStatus,
}

/// Zero-phase Butterworth low-pass with NaN handling.
#[derive(Debug, Clone)]
pub struct AntiAliasFilter {
    config: AntiAliasConfig,
    design: Option<ButterworthLowPass>,
}

impl AntiAliasFilter {
    pub fn new(sampling_rate_hz: f64, cutoff_hz: f64) -> Result<Self, SignalError> {
        Self::with_config(AntiAliasConfig {
            sampling_rate_hz,
            cutoff_hz,
            ..AntiAliasConfig::default()
        })
    }

    pub fn with_config(config: AntiAliasConfig) -> Result<Self, SignalError> {
        if !(config.sampling_rate_hz.is_finite() && config.sampling_rate_hz > 0.0) {
            return Err(SignalError::InvalidSampleRate(config.sampling_rate_hz));
        }
        if !(config.cutoff_hz.is_finite() && config.cutoff_hz > 0.0) {
            return Err(SignalError::InvalidCutoff(config.cutoff_hz));
        }
        if config.order == 0 {
            return Err(SignalError::InvalidOrder(config.order));
        }

        let nyquist = config.sampling_rate_hz / 2.0;
        let design = if config.cutoff_hz >= nyquist {
            None
        } else {
            Some(ButterworthLowPass::design(config.order, config.cutoff_hz / nyquist)?)
        };

        Ok(Self { config, design })
    }

    pub fn config(&self) -> &AntiAliasConfig {
        &self.config
    }

    /// Filter a signal that may contain NaN gaps.
    ///
    /// Never fails: problems downgrade to one of the non-`Applied` statuses.
    pub fn filter(&self, values: &Array1<f64>) -> FilterOutcome {
        let design = match &self.design {
            Some(d) => d,
            None => {
                return FilterOutcome {
                    values: values.clone(),
                    status: FilterStatus::AboveNyquist,
                }
            }
        };

        let finite = values.iter().filter(|v| v.is_finite()).count();
        if finite < self.config.order + 1 {
            return FilterOutcome {
                values: values.clone(),
                status: FilterStatus::TooFewSamples,
            };
        }

        let raw = values.to_vec();
        let filled = fill_gaps_linear(&raw);

        match design.filtfilt(&filled) {
            Ok(mut out) => {
                for (o, v) in out.iter_mut().zip(raw.iter()) {
                    if !v.is_finite() {
                        *o = f64::NAN;
                    }
                }
                FilterOutcome {
                    values: Array1::from(out),
                    status: FilterStatus::Applied,
                }
            }
            Err(e) => {
                log::warn!(
                    "anti-alias filter skipped, returning unfiltered signal: len={} fs={} cutoff={} err={}",
                    raw.len(),
                    self.config.sampling_rate_hz,
                    self.config.cutoff_hz,
                    e
                );
                FilterOutcome {
                    values: Array1::from(filled),
                    status: FilterStatus::Fallback(e.to_string()),
                }
            }
        }
    }
}

/// Convenience wrapper: order-4 filter, values only.
pub fn antialias_filter(
    values: &Array1<f64>,
    sampling_rate_hz: f64,
    cutoff_hz: f64,
) -> Result<Array1<f64>, SignalError> {
    Ok(AntiAliasFilter::new(sampling_rate_hz, cutoff_hz)?.filter(values).values)
}
