//! Error and agreement metrics
//!
//! Regression metrics (`mape`, `mae`, `rmse`) work on paired true/predicted
//! values. [`compute_metrics`] compares two possibly-gappy signals over their
//! common finite samples and normalizes MAPE by a fixed amplitude range.

use serde::{Deserialize, Serialize};

/// Mean absolute percentage error over samples with `y_true > 0`, in percent.
///
/// `+inf` when no true value is positive.
pub fn mape(y_true: &[f64], y_pred: &[f64]) -> f64 {
    let (sum, n) = y_true
        .iter()
        .zip(y_pred.iter())
        .filter(|(t, _)| **t > 0.0)
        .fold((0.0, 0usize), |(s, n), (t, p)| (s + ((t - p) / t).abs(), n + 1));
    if n == 0 {
        return f64::INFINITY;
    }
    sum / n as f64 * 100.0
}

pub fn mae(y_true: &[f64], y_pred: &[f64]) -> f64 {
    mean(
        &y_true
            .iter()
            .zip(y_pred.iter())
            .map(|(t, p)| (t - p).abs())
            .collect::<Vec<_>>(),
    )
}

pub fn rmse(y_true: &[f64], y_pred: &[f64]) -> f64 {
    mean(
        &y_true
            .iter()
            .zip(y_pred.iter())
            .map(|(t, p)| (t - p).powi(2))
            .collect::<Vec<_>>(),
    )
    .sqrt()
}

/// Mean of `pred - true`.
pub fn bias(y_true: &[f64], y_pred: &[f64]) -> f64 {
    mean(
        &y_true
            .iter()
            .zip(y_pred.iter())
            .map(|(t, p)| p - t)
            .collect::<Vec<_>>(),
    )
}

/// NaN for an empty slice.
pub fn mean(values: &[f64]) -> f64 {
    if values.is_empty() {
        return f64::NAN;
    }
    values.iter().sum::<f64>() / values.len() as f64
}

/// Standard deviation with `ddof = 1`; NaN with fewer than 2 values.
pub fn sample_std(values: &[f64]) -> f64 {
    if values.len() < 2 {
        return f64::NAN;
    }
    let m = mean(values);
    let ss: f64 = values.iter().map(|v| (v - m).powi(2)).sum();
    (ss / (values.len() - 1) as f64).sqrt()
}

pub fn population_std(values: &[f64]) -> f64 {
    if values.is_empty() {
        return f64::NAN;
    }
    let m = mean(values);
    (values.iter().map(|v| (v - m).powi(2)).sum::<f64>() / values.len() as f64).sqrt()
}

/// Pearson correlation; NaN when either side has zero spread.
pub fn pearson(x: &[f64], y: &[f64]) -> f64 {
    let (sx, sy) = (population_std(x), population_std(y));
    if !(sx > 0.0) || !(sy > 0.0) {
        return f64::NAN;
    }
    let (mx, my) = (mean(x), mean(y));
    let cov = x
        .iter()
        .zip(y.iter())
        .map(|(a, b)| (a - mx) * (b - my))
        .sum::<f64>()
        / x.len() as f64;
    cov / (sx * sy)
}

/// Mean and sample standard deviation of a metric across folds.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Summary {
    pub mean: f64,
    pub std: f64,
}

pub fn summarize(values: &[f64]) -> Summary {
    Summary {
        mean: mean(values),
        std: sample_std(values),
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct AgreementMetrics {
    pub n_samples: usize,
    /// Fraction of samples finite on both sides
    pub coverage: f64,
    pub mape: f64,
    pub mae: f64,
    pub rmse: f64,
    pub bias: f64,
    pub correlation: f64,
}

impl AgreementMetrics {
    fn empty() -> Self {
        Self {
            n_samples: 0,
            coverage: 0.0,
            mape: f64::NAN,
            mae: f64::NAN,
            rmse: f64::NAN,
            bias: f64::NAN,
            correlation: f64::NAN,
        }
    }
}

/// Agreement of `estimate` with `reference` over their common finite samples.
///
/// MAPE here is `mean |estimate - reference| / denominator * 100`; a
/// non-positive denominator is treated as 1.
pub fn compute_metrics(reference: &[f64], estimate: &[f64], denominator: f64) -> AgreementMetrics {
    let total = reference.len();
    let (r, e): (Vec<f64>, Vec<f64>) = reference
        .iter()
        .zip(estimate.iter())
        .filter(|(a, b)| a.is_finite() && b.is_finite())
        .map(|(a, b)| (*a, *b))
        .unzip();
    if r.is_empty() {
        return AgreementMetrics::empty();
    }

    let denom = if denominator > 0.0 { denominator } else { 1.0 };
    let abs_err = mae(&r, &e);
    AgreementMetrics {
        n_samples: r.len(),
        coverage: if total > 0 { r.len() as f64 / total as f64 } else { 0.0 },
        mape: abs_err / denom * 100.0,
        mae: abs_err,
        rmse: rmse(&r, &e),
        bias: bias(&r, &e),
        correlation: pearson(&r, &e),
    }
}

/// Bland-Altman agreement statistics of `estimate - reference`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BlandAltman {
    pub n_samples: usize,
    pub bias: f64,
    pub sd: f64,
    pub lower_limit: f64,
    pub upper_limit: f64,
}

/// `None` when no pair is finite on both sides.
pub fn bland_altman(reference: &[f64], estimate: &[f64]) -> Option<BlandAltman> {
    let diff: Vec<f64> = reference
        .iter()
        .zip(estimate.iter())
        .filter(|(a, b)| a.is_finite() && b.is_finite())
        .map(|(a, b)| b - a)
        .collect();
    if diff.is_empty() {
        return None;
    }
    let bias = mean(&diff);
    let sd = population_std(&diff);
    Some(BlandAltman {
        n_samples: diff.len(),
        bias,
        sd,
        lower_limit: bias - 1.96 * sd,
        upper_limit: bias + 1.96 * sd,
    })
}

/// Collects paired series from several sessions and scores them jointly.
#[derive(Debug, Clone, Default)]
pub struct MetricsAggregator {
    reference: Vec<f64>,
    estimate: Vec<f64>,
    sessions: usize,
}

impl MetricsAggregator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, reference: &[f64], estimate: &[f64]) {
        let n = reference.len().min(estimate.len());
        self.reference.extend_from_slice(&reference[..n]);
        self.estimate.extend_from_slice(&estimate[..n]);
        self.sessions += 1;
    }

    pub fn sessions(&self) -> usize {
        self.sessions
    }

    pub fn len(&self) -> usize {
        self.reference.len()
    }

    pub fn is_empty(&self) -> bool {
        self.reference.is_empty()
    }

    pub fn metrics(&self, denominator: f64) -> AgreementMetrics {
        compute_metrics(&self.reference, &self.estimate, denominator)
    }

    pub fn bland_altman(&self) -> Option<BlandAltman> {
        bland_altman(&self.reference, &self.estimate)
    }
}
