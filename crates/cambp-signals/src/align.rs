//! Temporal alignment of reference signals onto smartphone time axes
//!
//! Reference monitors export beat-to-beat values on their own clock. These
//! helpers cut the recording down to the final window shared with the phone
//! capture, optionally put it on a uniform grid, and read it off at the
//! phone's (possibly irregular) sample times.

use crate::dsp::interp_linear;
use crate::error::SignalError;
use crate::series::TimeSeries;

pub struct TemporalAligner;

impl TemporalAligner {
    /// Keep the last `window_s` seconds and shift them onto `[0, window_s]`.
    ///
    /// Samples with a NaN time are dropped. An empty input (or one without a
    /// finite time) yields an empty series.
    pub fn trim_to_last_window(series: &TimeSeries, window_s: f64) -> Result<TimeSeries, SignalError> {
        if !(window_s.is_finite() && window_s > 0.0) {
            return Err(SignalError::InvalidWindow(window_s));
        }
        let (_, max_time) = match series.time_span() {
            Some(span) => span,
            None => return Ok(TimeSeries::default()),
        };

        let start = max_time - window_s;
        let (times, values): (Vec<f64>, Vec<f64>) = series
            .times()
            .iter()
            .zip(series.values())
            .filter(|(t, _)| t.is_finite() && **t >= start)
            .map(|(&t, &v)| ((t - start).clamp(0.0, window_s), v))
            .unzip();

        TimeSeries::new(times, values)
    }

    /// Resample onto `min_time + k / rate_hz` covering the input time span.
    ///
    /// Grid points without bracketing finite samples are NaN.
    pub fn resample_uniform(series: &TimeSeries, rate_hz: f64) -> Result<TimeSeries, SignalError> {
        if !(rate_hz.is_finite() && rate_hz > 0.0) {
            return Err(SignalError::InvalidSampleRate(rate_hz));
        }
        let (lo, hi) = match series.time_span() {
            Some(span) => span,
            None => return Ok(TimeSeries::default()),
        };

        let n = ((hi - lo) * rate_hz + 1e-9).floor() as usize + 1;
        let grid: Vec<f64> = (0..n).map(|k| lo + k as f64 / rate_hz).collect();
        let values = Self::interpolate_onto(series, &grid);
        TimeSeries::new(grid, values)
    }

    /// Linear interpolation at `targets`.
    ///
    /// Targets outside the finite source span, NaN targets, and every target
    /// when fewer than two finite source samples exist come back as NaN.
    pub fn interpolate_onto(series: &TimeSeries, targets: &[f64]) -> Vec<f64> {
        let (xp, fp) = series.finite_points();
        if xp.len() < 2 {
            return vec![f64::NAN; targets.len()];
        }
        let (lo, hi) = (xp[0], xp[xp.len() - 1]);

        targets
            .iter()
            .map(|&t| {
                if t.is_finite() && t >= lo && t <= hi {
                    interp_linear(t, &xp, &fp)
                } else {
                    f64::NAN
                }
            })
            .collect()
    }
}
