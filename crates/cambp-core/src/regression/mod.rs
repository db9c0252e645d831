//! Linear regression family used inside cross-validation folds
//!
//! Every estimator fits an intercept and is expected to see standardized
//! features (see [`StandardScaler`]). Estimators with an internal
//! hyper-parameter search fall back to ordinary least squares when the
//! training set is too small to form inner folds.

mod huber;
mod linear;
mod scaler;
mod sparse;

use nalgebra::{DMatrix, DVector};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::RegressionError;

pub use huber::Huber;
pub use linear::{NonNegativeOls, Ols, Ridge, RidgeCv};
pub use scaler::StandardScaler;
pub use sparse::ElasticNetCv;

/// Coefficients and intercept of a fitted linear model.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LinearFit {
    pub coefficients: Vec<f64>,
    pub intercept: f64,
    /// Regularization strength picked by an internal search, if any
    pub alpha: Option<f64>,
    pub l1_ratio: Option<f64>,
}

impl LinearFit {
    pub fn predict(&self, x: &DMatrix<f64>) -> DVector<f64> {
        let w = DVector::from_column_slice(&self.coefficients);
        (x * w).add_scalar(self.intercept)
    }

    pub fn predict_row(&self, row: &[f64]) -> f64 {
        self.intercept
            + row
                .iter()
                .zip(self.coefficients.iter())
                .map(|(x, w)| x * w)
                .sum::<f64>()
    }
}

pub trait Regressor: Send + Sync {
    fn name(&self) -> &'static str;

    /// Fit on `x` (samples x features) and `y`.
    fn fit(&self, x: &DMatrix<f64>, y: &DVector<f64>) -> Result<LinearFit, RegressionError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EstimatorKind {
    Ols,
    Ridge,
    Lasso,
    Enet,
    Huber,
    NonnegOls,
}

impl EstimatorKind {
    pub const ALL: [EstimatorKind; 6] = [
        EstimatorKind::Ols,
        EstimatorKind::Ridge,
        EstimatorKind::Lasso,
        EstimatorKind::Enet,
        EstimatorKind::Huber,
        EstimatorKind::NonnegOls,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            EstimatorKind::Ols => "ols",
            EstimatorKind::Ridge => "ridge",
            EstimatorKind::Lasso => "lasso",
            EstimatorKind::Enet => "enet",
            EstimatorKind::Huber => "huber",
            EstimatorKind::NonnegOls => "nonneg_ols",
        }
    }

    /// Concrete estimator for a training set of `n_train` samples.
    ///
    /// # Returns
    /// - `ridge`: OLS below 20 samples, otherwise ridge with an internal
    ///   search over [`ridge_alphas`] on `min(5, max(3, n/10 + 1))` folds
    /// - `lasso` / `enet`: coordinate descent with an internal search on
    ///   `min(5, n/10 + 1)` folds; OLS when that is fewer than 2
    pub fn build(&self, n_train: usize) -> Box<dyn Regressor> {
        match self {
            EstimatorKind::Ols => Box::new(Ols),
            EstimatorKind::Ridge => {
                if n_train < 20 {
                    log::debug!("ridge: n_train={} < 20, using OLS", n_train);
                    Box::new(Ols)
                } else {
                    let cv = (n_train / 10 + 1).max(3).min(5);
                    Box::new(RidgeCv::new(ridge_alphas(), cv))
                }
            }
            EstimatorKind::Lasso => sparse_cv(vec![1.0], n_train),
            EstimatorKind::Enet => sparse_cv(vec![0.1, 0.3, 0.5, 0.7, 0.9, 0.95, 1.0], n_train),
            EstimatorKind::Huber => Box::new(Huber::default()),
            EstimatorKind::NonnegOls => Box::new(NonNegativeOls),
        }
    }
}

fn sparse_cv(l1_ratios: Vec<f64>, n_train: usize) -> Box<dyn Regressor> {
    let cv = (n_train / 10 + 1).min(5);
    if cv < 2 {
        log::warn!(
            "too few samples for inner cross-validation: n_train={} cv={}, falling back to OLS",
            n_train,
            cv
        );
        return Box::new(Ols);
    }
    Box::new(ElasticNetCv::new(l1_ratios, cv))
}

impl fmt::Display for EstimatorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EstimatorKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim().to_ascii_lowercase();
        EstimatorKind::ALL
            .iter()
            .copied()
            .find(|k| k.as_str() == s)
            .ok_or_else(|| format!("unknown estimator '{}'", s))
    }
}

/// `10^start ..= 10^stop` in `num` log-spaced steps.
pub fn logspace(start: f64, stop: f64, num: usize) -> Vec<f64> {
    match num {
        0 => Vec::new(),
        1 => vec![10f64.powf(start)],
        _ => {
            let step = (stop - start) / (num - 1) as f64;
            (0..num).map(|i| 10f64.powf(start + step * i as f64)).collect()
        }
    }
}

/// Ridge search grid: 25 values over [1e-10, 1e-2] then 20 over [1e-2, 1].
pub fn ridge_alphas() -> Vec<f64> {
    let mut alphas = logspace(-10.0, -2.0, 25);
    alphas.extend(logspace(-2.0, 0.0, 20));
    alphas
}

pub(crate) fn check_input(x: &DMatrix<f64>, y: &DVector<f64>) -> Result<(), RegressionError> {
    if x.nrows() == 0 {
        return Err(RegressionError::EmptyData);
    }
    if y.len() != x.nrows() {
        return Err(RegressionError::DimensionMismatch {
            expected: x.nrows(),
            got: y.len(),
        });
    }
    Ok(())
}

/// Centered copies of `x` and `y` with their means.
pub(crate) struct Centered {
    pub x: DMatrix<f64>,
    pub y: DVector<f64>,
    pub x_mean: DVector<f64>,
    pub y_mean: f64,
}

impl Centered {
    pub fn new(x: &DMatrix<f64>, y: &DVector<f64>) -> Self {
        let n = x.nrows() as f64;
        let x_mean = DVector::from_iterator(x.ncols(), x.column_iter().map(|c| c.sum() / n));
        let mut xc = x.clone();
        for (j, mut col) in xc.column_iter_mut().enumerate() {
            col.add_scalar_mut(-x_mean[j]);
        }
        let y_mean = y.mean();
        Self {
            x: xc,
            y: y.add_scalar(-y_mean),
            x_mean,
            y_mean,
        }
    }

    pub fn intercept(&self, w: &DVector<f64>) -> f64 {
        self.y_mean - self.x_mean.dot(w)
    }
}

/// Coefficient of determination; 1 for a perfect fit of a constant target,
/// 0 for any other fit of a constant target.
pub(crate) fn r2_score(y_true: &DVector<f64>, y_pred: &DVector<f64>) -> f64 {
    let mean = y_true.mean();
    let ss_res: f64 = y_true.iter().zip(y_pred.iter()).map(|(t, p)| (t - p).powi(2)).sum();
    let ss_tot: f64 = y_true.iter().map(|t| (t - mean).powi(2)).sum();
    if ss_tot == 0.0 {
        return if ss_res == 0.0 { 1.0 } else { 0.0 };
    }
    1.0 - ss_res / ss_tot
}

pub(crate) fn mse(y_true: &DVector<f64>, y_pred: &DVector<f64>) -> f64 {
    (y_true - y_pred).norm_squared() / y_true.len() as f64
}
