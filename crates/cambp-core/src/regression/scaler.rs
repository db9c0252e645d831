use nalgebra::DMatrix;
use serde::{Deserialize, Serialize};

use super::LinearFit;

/// Added to the scale when mapping coefficients back to raw units.
const DESTANDARDIZE_EPS: f64 = 1e-12;

/// Per-column mean/population-std standardization.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StandardScaler {
    pub mean: Vec<f64>,
    pub scale: Vec<f64>,
}

impl StandardScaler {
    /// Columns whose spread is numerically zero get scale 1.
    pub fn fit(x: &DMatrix<f64>) -> Self {
        let n = x.nrows().max(1) as f64;
        let mut mean = Vec::with_capacity(x.ncols());
        let mut scale = Vec::with_capacity(x.ncols());
        for col in x.column_iter() {
            let m = col.sum() / n;
            let var = col.iter().map(|v| (v - m).powi(2)).sum::<f64>() / n;
            let std = var.sqrt();
            mean.push(m);
            scale.push(if std <= 10.0 * f64::EPSILON * m.abs().max(1.0) {
                1.0
            } else {
                std
            });
        }
        Self { mean, scale }
    }

    pub fn transform(&self, x: &DMatrix<f64>) -> DMatrix<f64> {
        let mut out = x.clone();
        for (j, mut col) in out.column_iter_mut().enumerate() {
            let (m, s) = (self.mean[j], self.scale[j]);
            col.apply(|v| *v = (*v - m) / s);
        }
        out
    }

    /// Coefficients and intercept of `fit` expressed on unscaled features.
    pub fn destandardize(&self, fit: &LinearFit) -> (Vec<f64>, f64) {
        let coefficients: Vec<f64> = fit
            .coefficients
            .iter()
            .zip(self.scale.iter())
            .map(|(w, s)| w / (s + DESTANDARDIZE_EPS))
            .collect();
        let shift: f64 = coefficients
            .iter()
            .zip(self.mean.iter())
            .map(|(w, m)| w * m)
            .sum();
        (coefficients, fit.intercept - shift)
    }
}
