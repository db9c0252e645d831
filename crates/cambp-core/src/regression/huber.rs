use nalgebra::{DMatrix, DVector};

use cambp_signals::dsp::finite_median;

use super::linear::lstsq;
use super::{check_input, LinearFit, Regressor};
use crate::error::RegressionError;

/// Consistency constant turning a MAD into a normal-scale estimate
const MAD_TO_SIGMA: f64 = 0.6745;

/// Huber-loss regression solved by iteratively reweighted least squares.
///
/// Residuals beyond `epsilon` robust standard deviations get weight
/// `epsilon * sigma / |r|`. A small ridge penalty `alpha` applies to the
/// coefficients only.
#[derive(Debug, Clone, Copy)]
pub struct Huber {
    pub epsilon: f64,
    pub alpha: f64,
    pub max_iter: usize,
    pub tol: f64,
}

impl Default for Huber {
    fn default() -> Self {
        Self {
            epsilon: 1.35,
            alpha: 1e-4,
            max_iter: 100,
            tol: 1e-6,
        }
    }
}

impl Huber {
    fn robust_scale(residuals: &DVector<f64>) -> f64 {
        let r: Vec<f64> = residuals.iter().copied().collect();
        let median = finite_median(&r).unwrap_or(0.0);
        let dev: Vec<f64> = r.iter().map(|v| (v - median).abs()).collect();
        finite_median(&dev).unwrap_or(0.0) / MAD_TO_SIGMA
    }

    fn weighted_solve(
        &self,
        design: &DMatrix<f64>,
        y: &DVector<f64>,
        weights: &DVector<f64>,
    ) -> Result<DVector<f64>, RegressionError> {
        let mut aw = design.clone();
        let mut yw = y.clone();
        for (i, mut row) in aw.row_iter_mut().enumerate() {
            let s = weights[i].sqrt();
            row *= s;
            yw[i] *= s;
        }
        let mut normal = aw.transpose() * &aw;
        for j in 1..normal.ncols() {
            normal[(j, j)] += self.alpha;
        }
        let rhs = aw.transpose() * yw;

        if let Some(chol) = normal.clone().cholesky() {
            return Ok(chol.solve(&rhs));
        }
        normal
            .lu()
            .solve(&rhs)
            .ok_or_else(|| RegressionError::Numerical("singular weighted normal equations".into()))
    }
}

impl Regressor for Huber {
    fn name(&self) -> &'static str {
        "huber"
    }

    fn fit(&self, x: &DMatrix<f64>, y: &DVector<f64>) -> Result<LinearFit, RegressionError> {
        check_input(x, y)?;
        if !(self.alpha >= 0.0) {
            return Err(RegressionError::InvalidAlpha(self.alpha));
        }
        let n = x.nrows();
        let p = x.ncols();

        // Column 0 carries the intercept
        let design = DMatrix::from_fn(n, p + 1, |i, j| if j == 0 { 1.0 } else { x[(i, j - 1)] });
        let mut beta = lstsq(&design, y)?;

        for iter in 0..self.max_iter {
            let residuals = y - &design * &beta;
            let sigma = Self::robust_scale(&residuals);
            if !(sigma > 1e-12) {
                log::debug!("huber: residual scale collapsed at iteration {}", iter);
                break;
            }
            let limit = self.epsilon * sigma;
            let weights = residuals.map(|r| if r.abs() <= limit { 1.0 } else { limit / r.abs() });

            let next = self.weighted_solve(&design, y, &weights)?;
            let change = (&next - &beta).amax();
            let size = beta.amax().max(1.0);
            beta = next;
            if change < self.tol * size {
                break;
            }
        }

        if beta.iter().any(|v| !v.is_finite()) {
            return Err(RegressionError::Numerical("huber: non-finite coefficients".into()));
        }
        Ok(LinearFit {
            intercept: beta[0],
            coefficients: beta.iter().skip(1).copied().collect(),
            alpha: Some(self.alpha),
            l1_ratio: None,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::regression::Ols;
    use approx::assert_relative_eq;

    fn contaminated() -> (DMatrix<f64>, DVector<f64>) {
        let n = 30;
        let x = DMatrix::from_fn(n, 1, |i, _| i as f64);
        let mut y = DVector::from_iterator(n, (0..n).map(|i| {
            let wobble = if i % 2 == 0 { 0.3 } else { -0.3 };
            10.0 + 0.5 * i as f64 + wobble
        }));
        // Two gross outliers
        y[25] += 60.0;
        y[28] += 80.0;
        (x, y)
    }

    #[test]
    fn test_huber_resists_outliers() {
        let (x, y) = contaminated();
        let robust = Huber::default().fit(&x, &y).unwrap();
        let plain = Ols.fit(&x, &y).unwrap();
        assert!((robust.coefficients[0] - 0.5).abs() < (plain.coefficients[0] - 0.5).abs());
        assert_relative_eq!(robust.coefficients[0], 0.5, epsilon = 0.1);
    }

    #[test]
    fn test_huber_exact_fit() {
        let x = DMatrix::from_row_slice(5, 1, &[1.0, 2.0, 3.0, 4.0, 5.0]);
        let y = DVector::from_vec(vec![3.0, 5.0, 7.0, 9.0, 11.0]);
        let fit = Huber::default().fit(&x, &y).unwrap();
        assert_relative_eq!(fit.coefficients[0], 2.0, epsilon = 1e-6);
        assert_relative_eq!(fit.intercept, 1.0, epsilon = 1e-6);
    }

    #[test]
    fn test_robust_scale() {
        let r = DVector::from_vec(vec![-1.0, 1.0, -1.0, 1.0, 0.0]);
        assert_relative_eq!(Huber::robust_scale(&r), 1.0 / MAD_TO_SIGMA);
    }
}
