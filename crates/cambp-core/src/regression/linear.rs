//! Least-squares estimators: OLS, ridge, ridge with alpha search, and
//! non-negative least squares.

use nalgebra::{DMatrix, DVector, Dyn, SVD};

use super::{check_input, r2_score, Centered, LinearFit, Regressor};
use crate::cv::CrossValidator;
use crate::error::RegressionError;

/// Minimum-norm least-squares solution via SVD.
pub(crate) fn lstsq(a: &DMatrix<f64>, b: &DVector<f64>) -> Result<DVector<f64>, RegressionError> {
    if a.ncols() == 0 {
        return Ok(DVector::zeros(0));
    }
    let svd = a.clone().svd(true, true);
    let max_sv = svd.singular_values.max();
    let eps = f64::EPSILON * a.nrows().max(a.ncols()) as f64 * max_sv;
    svd.solve(b, eps)
        .map_err(|e| RegressionError::Numerical(e.to_string()))
}

#[derive(Debug, Clone, Copy, Default)]
pub struct Ols;

impl Regressor for Ols {
    fn name(&self) -> &'static str {
        "ols"
    }

    fn fit(&self, x: &DMatrix<f64>, y: &DVector<f64>) -> Result<LinearFit, RegressionError> {
        check_input(x, y)?;
        let c = Centered::new(x, y);
        let w = lstsq(&c.x, &c.y)?;
        Ok(LinearFit {
            intercept: c.intercept(&w),
            coefficients: w.iter().copied().collect(),
            alpha: None,
            l1_ratio: None,
        })
    }
}

/// Ridge solutions for many alphas from one decomposition of the centered data.
struct RidgePath {
    centered: Centered,
    svd: SVD<f64, Dyn, Dyn>,
    u_ty: DVector<f64>,
}

impl RidgePath {
    fn new(x: &DMatrix<f64>, y: &DVector<f64>) -> Result<Self, RegressionError> {
        let centered = Centered::new(x, y);
        let svd = centered.x.clone().svd(true, true);
        let u = svd
            .u
            .as_ref()
            .ok_or_else(|| RegressionError::Numerical("SVD did not produce U".into()))?;
        let u_ty = u.transpose() * &centered.y;
        Ok(Self {
            centered,
            svd,
            u_ty,
        })
    }

    /// `w = V diag(s / (s^2 + alpha)) U^T y`
    fn solve(&self, alpha: f64) -> Result<(DVector<f64>, f64), RegressionError> {
        let v_t = self
            .svd
            .v_t
            .as_ref()
            .ok_or_else(|| RegressionError::Numerical("SVD did not produce V^T".into()))?;
        let shrunk = DVector::from_iterator(
            self.u_ty.len(),
            self.svd
                .singular_values
                .iter()
                .zip(self.u_ty.iter())
                .map(|(&s, &uy)| {
                    let d = s * s + alpha;
                    if d > 0.0 {
                        s * uy / d
                    } else {
                        0.0
                    }
                }),
        );
        let w = v_t.transpose() * shrunk;
        let intercept = self.centered.intercept(&w);
        Ok((w, intercept))
    }
}

/// Ridge regression with a fixed penalty on the coefficients (not the intercept).
#[derive(Debug, Clone, Copy)]
pub struct Ridge {
    pub alpha: f64,
}

impl Ridge {
    pub fn new(alpha: f64) -> Self {
        Self { alpha }
    }
}

impl Regressor for Ridge {
    fn name(&self) -> &'static str {
        "ridge"
    }

    fn fit(&self, x: &DMatrix<f64>, y: &DVector<f64>) -> Result<LinearFit, RegressionError> {
        check_input(x, y)?;
        if !(self.alpha >= 0.0) {
            return Err(RegressionError::InvalidAlpha(self.alpha));
        }
        let (w, intercept) = RidgePath::new(x, y)?.solve(self.alpha)?;
        Ok(LinearFit {
            coefficients: w.iter().copied().collect(),
            intercept,
            alpha: Some(self.alpha),
            l1_ratio: None,
        })
    }
}

/// Ridge with alpha chosen by mean R^2 over contiguous inner folds.
#[derive(Debug, Clone)]
pub struct RidgeCv {
    pub alphas: Vec<f64>,
    pub cv: usize,
}

impl RidgeCv {
    pub fn new(alphas: Vec<f64>, cv: usize) -> Self {
        Self { alphas, cv }
    }

    fn select_alpha(&self, x: &DMatrix<f64>, y: &DVector<f64>) -> Result<f64, RegressionError> {
        let folds = CrossValidator::k_fold(x.nrows(), self.cv)
            .map_err(|e| RegressionError::Numerical(e.to_string()))?;
        let mut scores = vec![0.0; self.alphas.len()];
        for fold in &folds {
            let path = RidgePath::new(&x.select_rows(&fold.train), &y.select_rows(&fold.train))?;
            let x_test = x.select_rows(&fold.test);
            let y_test = y.select_rows(&fold.test);
            for (score, &alpha) in scores.iter_mut().zip(self.alphas.iter()) {
                let (w, b) = path.solve(alpha)?;
                let pred = (&x_test * w).add_scalar(b);
                *score += r2_score(&y_test, &pred);
            }
        }

        // First alpha with the best mean score
        let mut best = 0;
        for (i, s) in scores.iter().enumerate() {
            if *s > scores[best] {
                best = i;
            }
        }
        Ok(self.alphas[best])
    }
}

impl Regressor for RidgeCv {
    fn name(&self) -> &'static str {
        "ridge_cv"
    }

    fn fit(&self, x: &DMatrix<f64>, y: &DVector<f64>) -> Result<LinearFit, RegressionError> {
        check_input(x, y)?;
        if let Some(&bad) = self.alphas.iter().find(|a| !(**a >= 0.0)) {
            return Err(RegressionError::InvalidAlpha(bad));
        }
        if self.alphas.is_empty() || self.cv < 2 || self.cv > x.nrows() {
            log::warn!(
                "ridge search unavailable: n={} cv={}, falling back to OLS",
                x.nrows(),
                self.cv
            );
            return Ols.fit(x, y);
        }
        let alpha = self.select_alpha(x, y)?;
        log::debug!("ridge_cv: selected alpha={:.3e}", alpha);
        Ridge::new(alpha).fit(x, y)
    }
}

/// Least squares constrained to non-negative coefficients (Lawson-Hanson).
#[derive(Debug, Clone, Copy, Default)]
pub struct NonNegativeOls;

impl Regressor for NonNegativeOls {
    fn name(&self) -> &'static str {
        "nonneg_ols"
    }

    fn fit(&self, x: &DMatrix<f64>, y: &DVector<f64>) -> Result<LinearFit, RegressionError> {
        check_input(x, y)?;
        let c = Centered::new(x, y);
        let w = nnls(&c.x, &c.y)?;
        Ok(LinearFit {
            intercept: c.intercept(&w),
            coefficients: w.iter().copied().collect(),
            alpha: None,
            l1_ratio: None,
        })
    }
}

pub(crate) fn nnls(a: &DMatrix<f64>, b: &DVector<f64>) -> Result<DVector<f64>, RegressionError> {
    let p = a.ncols();
    let mut x = DVector::zeros(p);
    let mut passive = vec![false; p];
    let tol = 10.0 * f64::EPSILON * a.norm() * a.nrows().max(p) as f64;

    let mut gradient = a.transpose() * (b - a * &x);
    for _ in 0..3 * p.max(1) {
        let candidate = (0..p)
            .filter(|&j| !passive[j])
            .max_by(|&i, &j| gradient[i].total_cmp(&gradient[j]));
        let j = match candidate {
            Some(j) if gradient[j] > tol => j,
            _ => break,
        };
        passive[j] = true;

        for _ in 0..=p {
            let idx: Vec<usize> = (0..p).filter(|&k| passive[k]).collect();
            if idx.is_empty() {
                break;
            }
            let z_sub = lstsq(&a.select_columns(&idx), b)?;
            let mut z = DVector::zeros(p);
            for (k, &col) in idx.iter().enumerate() {
                z[col] = z_sub[k];
            }
            if idx.iter().all(|&k| z[k] > 0.0) {
                x = z;
                break;
            }

            // Step toward z until the first passive coefficient hits zero
            let step = idx
                .iter()
                .filter(|&&k| z[k] <= 0.0 && x[k] - z[k] > 0.0)
                .map(|&k| x[k] / (x[k] - z[k]))
                .fold(f64::INFINITY, f64::min);
            let step = if step.is_finite() { step } else { 0.0 };
            let delta = (&z - &x) * step;
            x += delta;
            for &k in &idx {
                if x[k] <= tol {
                    x[k] = 0.0;
                    passive[k] = false;
                }
            }
        }
        gradient = a.transpose() * (b - a * &x);
    }
    Ok(x)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn line_data() -> (DMatrix<f64>, DVector<f64>) {
        // y = 3 + 2 x1 - x2
        let rows = [
            [0.0, 1.0],
            [1.0, 0.0],
            [2.0, 1.0],
            [3.0, 5.0],
            [4.0, 2.0],
            [5.0, 3.0],
        ];
        let x = DMatrix::from_fn(rows.len(), 2, |i, j| rows[i][j]);
        let y = DVector::from_iterator(rows.len(), rows.iter().map(|r| 3.0 + 2.0 * r[0] - r[1]));
        (x, y)
    }

    #[test]
    fn test_ols_recovers_exact_line() {
        let (x, y) = line_data();
        let fit = Ols.fit(&x, &y).unwrap();
        assert_relative_eq!(fit.coefficients[0], 2.0, epsilon = 1e-9);
        assert_relative_eq!(fit.coefficients[1], -1.0, epsilon = 1e-9);
        assert_relative_eq!(fit.intercept, 3.0, epsilon = 1e-9);
    }

    #[test]
    fn test_ols_rank_deficient_min_norm() {
        // Duplicated column: weight splits evenly
        let x = DMatrix::from_row_slice(3, 2, &[1.0, 1.0, 2.0, 2.0, 3.0, 3.0]);
        let y = DVector::from_vec(vec![2.0, 4.0, 6.0]);
        let fit = Ols.fit(&x, &y).unwrap();
        assert_relative_eq!(fit.coefficients[0], 1.0, epsilon = 1e-9);
        assert_relative_eq!(fit.coefficients[1], 1.0, epsilon = 1e-9);
        assert_relative_eq!(fit.intercept, 0.0, epsilon = 1e-9);
    }

    #[test]
    fn test_ols_rejects_bad_input() {
        let x = DMatrix::<f64>::zeros(0, 2);
        let y = DVector::<f64>::zeros(0);
        assert_eq!(Ols.fit(&x, &y), Err(RegressionError::EmptyData));
        let x = DMatrix::<f64>::zeros(3, 2);
        let y = DVector::<f64>::zeros(2);
        assert!(matches!(Ols.fit(&x, &y), Err(RegressionError::DimensionMismatch { .. })));
    }

    #[test]
    fn test_ridge_shrinks_toward_zero() {
        let (x, y) = line_data();
        let small = Ridge::new(1e-8).fit(&x, &y).unwrap();
        let large = Ridge::new(1e3).fit(&x, &y).unwrap();
        assert_relative_eq!(small.coefficients[0], 2.0, epsilon = 1e-5);
        assert!(large.coefficients[0].abs() < small.coefficients[0].abs());
        assert!(Ridge::new(-1.0).fit(&x, &y).is_err());
    }

    #[test]
    fn test_ridge_cv_picks_small_alpha_on_clean_data() {
        let n = 40;
        let x = DMatrix::from_fn(n, 2, |i, j| ((i * (j + 3)) % 7) as f64 + i as f64 * 0.1);
        let y = DVector::from_iterator(n, (0..n).map(|i| 1.0 + 0.5 * x[(i, 0)] - 2.0 * x[(i, 1)]));
        let fit = RidgeCv::new(super::super::ridge_alphas(), 5).fit(&x, &y).unwrap();
        let alpha = fit.alpha.unwrap();
        assert!(alpha < 0.1, "alpha={}", alpha);
        assert_relative_eq!(fit.coefficients[1], -2.0, epsilon = 1e-2);
    }

    #[test]
    fn test_nnls_clamps_negative_weight() {
        let (x, y) = line_data();
        let fit = NonNegativeOls.fit(&x, &y).unwrap();
        assert!(fit.coefficients.iter().all(|&w| w >= 0.0));
        assert_eq!(fit.coefficients[1], 0.0);
        assert!(fit.coefficients[0] > 0.0);
    }

    #[test]
    fn test_nnls_matches_ols_when_unconstrained() {
        let x = DMatrix::from_row_slice(4, 1, &[1.0, 2.0, 3.0, 4.0]);
        let y = DVector::from_vec(vec![3.0, 5.0, 7.0, 9.0]);
        let fit = NonNegativeOls.fit(&x, &y).unwrap();
        assert_relative_eq!(fit.coefficients[0], 2.0, epsilon = 1e-9);
        assert_relative_eq!(fit.intercept, 1.0, epsilon = 1e-9);
    }
}
