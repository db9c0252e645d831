//! End-to-end training run for one BP target over all configured methods.

use serde::Serialize;

use crate::apply::{CoefficientModel, CoefficientSet};
use crate::config::PipelineConfig;
use crate::cv::SplitStrategy;
use crate::error::PipelineError;
use crate::evaluator::{EvaluationResult, FoldEvaluator};
use crate::outlier::{FeatureOutlierReport, OutlierRejector, OutlierReport};
use crate::table::{FeatureTable, Target};

/// One line of the method ranking.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MethodSummary {
    pub method: String,
    pub n_features: usize,
    pub n_samples: usize,
    pub n_folds: usize,
    pub mape_mean: f64,
    pub mape_std: f64,
    pub mae_mean: f64,
    pub mae_std: f64,
    pub rmse_mean: f64,
    pub rmse_std: f64,
}

impl From<&EvaluationResult> for MethodSummary {
    fn from(r: &EvaluationResult) -> Self {
        Self {
            method: r.method.clone(),
            n_features: r.feature_names.len(),
            n_samples: r.n_samples,
            n_folds: r.folds.len(),
            mape_mean: r.mape_mean,
            mape_std: r.mape_std,
            mae_mean: r.mae_mean,
            mae_std: r.mae_std,
            rmse_mean: r.rmse_mean,
            rmse_std: r.rmse_std,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct PipelineReport {
    pub target: Target,
    pub n_input_rows: usize,
    pub outliers: OutlierReport,
    pub feature_outliers: FeatureOutlierReport,
    /// Rows left for evaluation
    pub n_rows: usize,
    pub n_groups: usize,
    pub n_splits_used: usize,
    pub window_s_used: f64,
    /// Results in configured method order
    pub methods: Vec<EvaluationResult>,
    pub skipped_methods: Vec<String>,
    /// Ranked by mean MAPE, best first
    pub summary: Vec<MethodSummary>,
    /// Fold-averaged models for every evaluated method
    pub coefficients: CoefficientSet,
}

pub struct BpPipeline {
    config: PipelineConfig,
}

impl BpPipeline {
    pub fn new(config: PipelineConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// Clean the table for `target` and cross-validate every method.
    ///
    /// # Errors
    /// - `NoValidRows` if outlier removal leaves nothing, or if no method has
    ///   a single usable row
    /// - `InsufficientGroups` for group splitting over a single group
    /// - any error from [`FoldEvaluator::evaluate`]
    pub fn run(&self, table: FeatureTable, target: Target) -> Result<PipelineReport, PipelineError> {
        let n_input_rows = table.len();
        let rejector = OutlierRejector::with_config(self.config.outliers.clone());

        let (mut table, outliers) = rejector.reject(table, target);
        if table.is_empty() {
            return Err(PipelineError::NoValidRows(format!("{} outlier removal", target)));
        }
        let feature_outliers = rejector.reject_feature_outliers(&mut table);
        if table.is_empty() {
            return Err(PipelineError::NoValidRows("feature outlier removal".to_string()));
        }

        let mut eval_config = self.config.evaluation.clone();
        let n_groups = table.groups().len();
        if eval_config.strategy == SplitStrategy::Group {
            if n_groups < 2 {
                return Err(PipelineError::InsufficientGroups {
                    found: n_groups,
                    required: 2,
                });
            }
            if n_groups < eval_config.n_splits {
                log::warn!(
                    "fewer groups than splits: groups={} n_splits={}, shrinking",
                    n_groups,
                    eval_config.n_splits
                );
                eval_config.n_splits = n_groups;
            }
        }
        if eval_config.window_s > 0.0 && !table.has_time() {
            log::warn!(
                "no time column, window aggregation disabled: window_s={}",
                eval_config.window_s
            );
            eval_config.window_s = 0.0;
        }
        let n_splits_used = eval_config.n_splits;
        let window_s_used = eval_config.window_s;
        let evaluator = FoldEvaluator::new(eval_config);

        let mut methods = Vec::new();
        let mut skipped_methods = Vec::new();
        for method in &self.config.methods {
            let present = table.present_features(&method.features);
            if present.is_empty() {
                log::warn!("method skipped, no feature columns present: method={}", method.name);
                skipped_methods.push(method.name.clone());
                continue;
            }
            if present.len() < method.features.len() {
                log::warn!(
                    "method using available features only: method={} present={} configured={}",
                    method.name,
                    present.len(),
                    method.features.len()
                );
            }
            methods.push(evaluator.evaluate(&table, &method.name, &present, target)?);
        }
        if methods.iter().all(EvaluationResult::is_undefined) {
            log::warn!(
                "no method produced a valid row: target={} evaluated={} skipped={}",
                target,
                methods.len(),
                skipped_methods.len()
            );
            return Err(PipelineError::NoValidRows(format!("{} all methods", target)));
        }

        let mut summary: Vec<MethodSummary> = methods.iter().map(MethodSummary::from).collect();
        summary.sort_by(|a, b| a.mape_mean.total_cmp(&b.mape_mean));

        let coefficients: CoefficientSet = methods
            .iter()
            .filter_map(|r| CoefficientModel::averaged(r).map(|m| (r.method.clone(), m)))
            .collect();

        if let Some(best) = summary.first() {
            log::info!(
                "best method: target={} method={} mape_mean={:.3}",
                target,
                best.method,
                best.mape_mean
            );
        }

        Ok(PipelineReport {
            target,
            n_input_rows,
            outliers,
            feature_outliers,
            n_rows: table.len(),
            n_groups,
            n_splits_used,
            window_s_used,
            methods,
            skipped_methods,
            summary,
            coefficients,
        })
    }
}
