//! Fixed-coefficient models exported from cross-validation and their
//! evaluation on new data.

use std::collections::BTreeMap;
use std::io::{Read, Write};

use serde::{Deserialize, Serialize};

use crate::error::PipelineError;
use crate::evaluator::EvaluationResult;
use crate::metrics;
use crate::table::{FeatureTable, Target};

/// Linear model in raw feature units, ready for on-device use.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CoefficientModel {
    pub coefficients: Vec<f64>,
    pub intercept: f64,
    pub feature_names: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub note: Option<String>,
}

/// Models keyed by method name, as written to `coefficients_<target>_*.json`.
pub type CoefficientSet = BTreeMap<String, CoefficientModel>;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ApplyReport {
    pub method: String,
    pub n_samples: usize,
    pub mape: f64,
    pub mae: f64,
    pub rmse: f64,
    /// Mean of `pred - true`
    pub bias: f64,
    /// Population std of `pred - true`
    pub std_error: f64,
    pub y_true: Vec<f64>,
    pub predictions: Vec<f64>,
}

impl CoefficientModel {
    /// Fold-mean coefficients and intercept; `None` when no fold was fitted.
    pub fn averaged(result: &EvaluationResult) -> Option<Self> {
        if result.folds.is_empty() {
            return None;
        }
        let k = result.folds.len() as f64;
        let p = result.feature_names.len();
        let mut coefficients = vec![0.0; p];
        for fold in &result.folds {
            for (c, w) in coefficients.iter_mut().zip(fold.coefficients.iter()) {
                *c += w / k;
            }
        }
        let intercept = result.folds.iter().map(|f| f.intercept).sum::<f64>() / k;
        Some(Self {
            coefficients,
            intercept,
            feature_names: result.feature_names.clone(),
            note: Some("Average coefficients across all folds.".to_string()),
        })
    }

    pub fn predict_row(&self, features: &[f64]) -> f64 {
        self.intercept
            + features
                .iter()
                .zip(self.coefficients.iter())
                .map(|(x, w)| x * w)
                .sum::<f64>()
    }

    /// Score the model on rows with every feature and the target present.
    ///
    /// Returns `Ok(None)` (with a warning) when a feature column is absent
    /// from the table or no row is usable.
    pub fn evaluate(
        &self,
        method: &str,
        table: &FeatureTable,
        target: Target,
    ) -> Result<Option<ApplyReport>, PipelineError> {
        if self.coefficients.len() != self.feature_names.len() {
            return Err(PipelineError::DimensionMismatch {
                expected: self.feature_names.len(),
                got: self.coefficients.len(),
            });
        }
        let columns: Option<Vec<usize>> = self
            .feature_names
            .iter()
            .map(|f| table.feature_index(f))
            .collect();
        let columns = match columns {
            Some(c) => c,
            None => {
                log::warn!("features missing from table, method skipped: method={}", method);
                return Ok(None);
            }
        };

        let mut y_true = Vec::new();
        let mut predictions = Vec::new();
        for row in table.rows() {
            let y = match row.target(target) {
                Some(v) if v.is_finite() => v,
                _ => continue,
            };
            let x: Vec<f64> = columns.iter().map(|&c| row.features[c]).collect();
            if x.iter().all(|v| v.is_finite()) {
                y_true.push(y);
                predictions.push(self.predict_row(&x));
            }
        }
        if y_true.is_empty() {
            log::warn!("no valid samples: method={} target={}", method, target);
            return Ok(None);
        }

        let errors: Vec<f64> = predictions.iter().zip(y_true.iter()).map(|(p, t)| p - t).collect();
        Ok(Some(ApplyReport {
            method: method.to_string(),
            n_samples: y_true.len(),
            mape: metrics::mape(&y_true, &predictions),
            mae: metrics::mae(&y_true, &predictions),
            rmse: metrics::rmse(&y_true, &predictions),
            bias: metrics::mean(&errors),
            std_error: metrics::population_std(&errors),
            y_true,
            predictions,
        }))
    }
}

pub fn read_coefficients<R: Read>(reader: R) -> Result<CoefficientSet, PipelineError> {
    Ok(serde_json::from_reader(reader)?)
}

pub fn write_coefficients<W: Write>(writer: W, set: &CoefficientSet) -> Result<(), PipelineError> {
    serde_json::to_writer_pretty(writer, set)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::table::FeatureRow;
    use approx::assert_relative_eq;

    fn table() -> FeatureTable {
        let rows = [(1.0, 2.0, Some(105.0)), (2.0, 1.0, Some(110.0)), (f64::NAN, 1.0, Some(120.0)), (3.0, 3.0, None)]
            .iter()
            .map(|&(a, b, sbp)| FeatureRow {
                group: "s".to_string(),
                elapsed_s: None,
                features: vec![a, b],
                ref_sbp: sbp,
                ref_dbp: None,
            })
            .collect();
        FeatureTable::new(vec!["A".to_string(), "B".to_string()], None, rows).unwrap()
    }

    fn model() -> CoefficientModel {
        CoefficientModel {
            coefficients: vec![5.0, 0.0],
            intercept: 100.0,
            feature_names: vec!["A".to_string(), "B".to_string()],
            note: None,
        }
    }

    #[test]
    fn test_evaluate_uses_complete_rows() {
        let report = model().evaluate("RealTimeBP", &table(), Target::Sbp).unwrap().unwrap();
        assert_eq!(report.n_samples, 2);
        assert_eq!(report.predictions, vec![105.0, 110.0]);
        assert_relative_eq!(report.mae, 0.0);
        assert_relative_eq!(report.std_error, 0.0);
    }

    #[test]
    fn test_bias_and_std_error() {
        let mut m = model();
        m.intercept = 101.0;
        m.coefficients = vec![4.0, 0.0];
        // predictions 105, 109 vs 105, 110 -> errors 0, -1
        let report = m.evaluate("RealTimeBP", &table(), Target::Sbp).unwrap().unwrap();
        assert_relative_eq!(report.bias, -0.5);
        assert_relative_eq!(report.std_error, 0.5);
    }

    #[test]
    fn test_missing_feature_skips() {
        let mut m = model();
        m.feature_names[1] = "C".to_string();
        assert!(m.evaluate("X", &table(), Target::Sbp).unwrap().is_none());
        assert!(model().evaluate("X", &table(), Target::Dbp).unwrap().is_none());
    }

    #[test]
    fn test_json_layout() {
        let mut set = CoefficientSet::new();
        set.insert("SinBP_M".to_string(), model());
        let mut buf = Vec::new();
        write_coefficients(&mut buf, &set).unwrap();
        let text = String::from_utf8(buf.clone()).unwrap();
        assert!(text.contains("\"SinBP_M\""));
        assert!(!text.contains("note"));
        assert_eq!(read_coefficients(buf.as_slice()).unwrap(), set);
    }
}
