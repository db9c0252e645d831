//! Time-stamped sample sequences.

use ndarray::Array1;

use crate::error::SignalError;

/// Ordered `(time, value)` samples. Times are in seconds and kept
/// non-decreasing; values may be NaN.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TimeSeries {
    times: Vec<f64>,
    values: Vec<f64>,
}

impl TimeSeries {
    /// Build a series, stably sorting samples by time.
    ///
    /// Samples with a NaN time sort to the end.
    pub fn new(times: Vec<f64>, values: Vec<f64>) -> Result<Self, SignalError> {
        if times.len() != values.len() {
            return Err(SignalError::LengthMismatch {
                times: times.len(),
                values: values.len(),
            });
        }

        let sorted = times.windows(2).all(|w| w[0] <= w[1]);
        if sorted {
            return Ok(Self { times, values });
        }

        let mut order: Vec<usize> = (0..times.len()).collect();
        order.sort_by(|&a, &b| times[a].total_cmp(&times[b]));
        Ok(Self {
            times: order.iter().map(|&i| times[i]).collect(),
            values: order.iter().map(|&i| values[i]).collect(),
        })
    }

    /// Series sampled at a fixed rate starting at `start_s`.
    pub fn uniform(values: Vec<f64>, rate_hz: f64, start_s: f64) -> Result<Self, SignalError> {
        if !(rate_hz.is_finite() && rate_hz > 0.0) {
            return Err(SignalError::InvalidSampleRate(rate_hz));
        }
        let times = (0..values.len())
            .map(|i| start_s + i as f64 / rate_hz)
            .collect();
        Ok(Self { times, values })
    }

    pub fn len(&self) -> usize {
        self.times.len()
    }

    pub fn is_empty(&self) -> bool {
        self.times.is_empty()
    }

    pub fn times(&self) -> &[f64] {
        &self.times
    }

    pub fn values(&self) -> &[f64] {
        &self.values
    }

    pub fn values_array(&self) -> Array1<f64> {
        Array1::from(self.values.clone())
    }

    /// Replace the values, keeping the time axis.
    pub fn with_values(&self, values: Vec<f64>) -> Result<Self, SignalError> {
        if values.len() != self.times.len() {
            return Err(SignalError::LengthMismatch {
                times: self.times.len(),
                values: values.len(),
            });
        }
        Ok(Self {
            times: self.times.clone(),
            values,
        })
    }

    /// Samples whose time and value are both finite, in time order.
    pub fn finite_points(&self) -> (Vec<f64>, Vec<f64>) {
        self.times
            .iter()
            .zip(self.values.iter())
            .filter(|(t, v)| t.is_finite() && v.is_finite())
            .map(|(&t, &v)| (t, v))
            .unzip()
    }

    /// Minimum and maximum finite time, if any.
    pub fn time_span(&self) -> Option<(f64, f64)> {
        let mut finite = self.times.iter().copied().filter(|t| t.is_finite());
        let first = finite.next()?;
        Some(finite.fold((first, first), |(lo, hi), t| (lo.min(t), hi.max(t))))
    }

    pub fn into_parts(self) -> (Vec<f64>, Vec<f64>) {
        (self.times, self.values)
    }
}
