//! L1 / elastic-net regression by cyclic coordinate descent
//!
//! Objective on centered data:
//! `(1 / 2n) ||y - Xw||^2 + alpha * l1_ratio * ||w||_1
//!  + alpha * (1 - l1_ratio) / 2 * ||w||^2`

use nalgebra::{DMatrix, DVector};

use super::{check_input, logspace, mse, Centered, LinearFit, Regressor};
use crate::cv::CrossValidator;
use crate::error::RegressionError;

const N_ALPHAS: usize = 100;
/// Smallest alpha on the path relative to the largest
const ALPHA_EPS: f64 = 1e-3;

#[inline]
fn soft_threshold(x: f64, lambda: f64) -> f64 {
    if x > lambda {
        x - lambda
    } else if x < -lambda {
        x + lambda
    } else {
        0.0
    }
}

/// Minimize the elastic-net objective in place, starting from `w`.
///
/// Stops when the largest coefficient update is below `tol` times the
/// largest coefficient. Returns whether that happened within `max_iter`.
pub(crate) fn coordinate_descent(
    x: &DMatrix<f64>,
    y: &DVector<f64>,
    w: &mut DVector<f64>,
    alpha: f64,
    l1_ratio: f64,
    max_iter: usize,
    tol: f64,
) -> bool {
    let n = x.nrows() as f64;
    let l1 = alpha * l1_ratio * n;
    let l2 = alpha * (1.0 - l1_ratio) * n;
    let col_sq: Vec<f64> = x.column_iter().map(|c| c.norm_squared()).collect();
    let mut residual = y - x * &*w;

    for _ in 0..max_iter {
        let mut w_max = 0.0f64;
        let mut dw_max = 0.0f64;
        for j in 0..x.ncols() {
            if col_sq[j] == 0.0 {
                continue;
            }
            let col = x.column(j);
            let old = w[j];
            if old != 0.0 {
                residual.axpy(old, &col, 1.0);
            }
            let rho = col.dot(&residual);
            let new = soft_threshold(rho, l1) / (col_sq[j] + l2);
            if new != 0.0 {
                residual.axpy(-new, &col, 1.0);
            }
            w[j] = new;
            dw_max = dw_max.max((new - old).abs());
            w_max = w_max.max(new.abs());
        }
        if w_max == 0.0 || dw_max / w_max < tol {
            return true;
        }
    }
    false
}

/// Largest alpha that still leaves at least one coefficient non-zero.
fn alpha_max(x: &DMatrix<f64>, y: &DVector<f64>, l1_ratio: f64) -> f64 {
    let n = x.nrows() as f64;
    let xty = x.transpose() * y;
    xty.amax() / (n * l1_ratio)
}

/// Descending log-spaced grid from `alpha_max` down to `alpha_max * 1e-3`.
fn alpha_grid(x: &DMatrix<f64>, y: &DVector<f64>, l1_ratio: f64, n_alphas: usize) -> Vec<f64> {
    let top = alpha_max(x, y, l1_ratio);
    if !(top > f64::EPSILON) {
        return vec![f64::EPSILON; n_alphas];
    }
    let mut grid = logspace((top * ALPHA_EPS).log10(), top.log10(), n_alphas);
    grid.reverse();
    grid
}

/// Elastic-net with `(alpha, l1_ratio)` picked by mean held-out MSE over
/// contiguous inner folds. `l1_ratios = [1.0]` gives the lasso.
#[derive(Debug, Clone)]
pub struct ElasticNetCv {
    pub l1_ratios: Vec<f64>,
    pub cv: usize,
    pub n_alphas: usize,
    pub max_iter: usize,
    pub tol: f64,
}

impl ElasticNetCv {
    pub fn new(l1_ratios: Vec<f64>, cv: usize) -> Self {
        Self {
            l1_ratios,
            cv,
            n_alphas: N_ALPHAS,
            max_iter: 10_000,
            tol: 1e-4,
        }
    }

    /// Mean held-out MSE for every `(l1_ratio, alpha)` pair.
    fn path_errors(
        &self,
        x: &DMatrix<f64>,
        y: &DVector<f64>,
        grids: &[Vec<f64>],
    ) -> Result<Vec<Vec<f64>>, RegressionError> {
        let folds = CrossValidator::k_fold(x.nrows(), self.cv)
            .map_err(|e| RegressionError::Numerical(e.to_string()))?;
        let mut errors: Vec<Vec<f64>> = grids.iter().map(|g| vec![0.0; g.len()]).collect();

        for fold in &folds {
            let train = Centered::new(&x.select_rows(&fold.train), &y.select_rows(&fold.train));
            let x_test = x.select_rows(&fold.test);
            let y_test = y.select_rows(&fold.test);

            for (r, &l1_ratio) in self.l1_ratios.iter().enumerate() {
                // Warm start along the descending path
                let mut w = DVector::zeros(x.ncols());
                for (a, &alpha) in grids[r].iter().enumerate() {
                    let converged = coordinate_descent(
                        &train.x,
                        &train.y,
                        &mut w,
                        alpha,
                        l1_ratio,
                        self.max_iter,
                        self.tol,
                    );
                    if !converged {
                        log::debug!(
                            "coordinate descent did not converge: alpha={:.3e} l1_ratio={}",
                            alpha,
                            l1_ratio
                        );
                    }
                    let pred = (&x_test * &w).add_scalar(train.intercept(&w));
                    errors[r][a] += mse(&y_test, &pred) / folds.len() as f64;
                }
            }
        }
        Ok(errors)
    }
}

impl Regressor for ElasticNetCv {
    fn name(&self) -> &'static str {
        "elastic_net_cv"
    }

    fn fit(&self, x: &DMatrix<f64>, y: &DVector<f64>) -> Result<LinearFit, RegressionError> {
        check_input(x, y)?;
        if self.l1_ratios.is_empty() || self.cv < 2 || self.cv > x.nrows() {
            return Err(RegressionError::Numerical(format!(
                "cannot run inner search with cv={} on {} samples",
                self.cv,
                x.nrows()
            )));
        }
        if let Some(&bad) = self.l1_ratios.iter().find(|r| !(**r > 0.0 && **r <= 1.0)) {
            return Err(RegressionError::Numerical(format!(
                "l1_ratio must be in (0, 1], got {}",
                bad
            )));
        }

        let full = Centered::new(x, y);
        let grids: Vec<Vec<f64>> = self
            .l1_ratios
            .iter()
            .map(|&r| alpha_grid(&full.x, &full.y, r, self.n_alphas))
            .collect();
        let errors = self.path_errors(x, y, &grids)?;

        let mut best = (0usize, 0usize);
        for (r, row) in errors.iter().enumerate() {
            for (a, &e) in row.iter().enumerate() {
                if e < errors[best.0][best.1] {
                    best = (r, a);
                }
            }
        }
        let l1_ratio = self.l1_ratios[best.0];
        let alpha = grids[best.0][best.1];
        log::debug!(
            "elastic_net_cv: selected alpha={:.3e} l1_ratio={}",
            alpha,
            l1_ratio
        );

        let mut w = DVector::zeros(x.ncols());
        if alpha_max(&full.x, &full.y, l1_ratio) > f64::EPSILON {
            coordinate_descent(&full.x, &full.y, &mut w, alpha, l1_ratio, self.max_iter, self.tol);
        }
        Ok(LinearFit {
            intercept: full.intercept(&w),
            coefficients: w.iter().copied().collect(),
            alpha: Some(alpha),
            l1_ratio: Some(l1_ratio),
        })
    }
}
