//! Cross-validated evaluation of one feature set against one BP target
//!
//! Each fold standardizes its own training slice, fits the configured
//! estimator, maps coefficients back to raw feature units and scores the
//! held-out predictions (optionally averaged over time windows first).

use nalgebra::{DMatrix, DVector};
use serde::Serialize;

#[cfg(feature = "parallel")]
use rayon::prelude::*;

use crate::config::EvaluationConfig;
use crate::cv::{CrossValidator, Fold, SplitStrategy};
use crate::error::PipelineError;
use crate::metrics::{self, BlandAltman};
use crate::regression::{EstimatorKind, StandardScaler};
use crate::table::{FeatureTable, Target};
use crate::window::WindowAggregator;

/// Result of a single fold. Coefficients are in raw feature units.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FoldResult {
    pub fold: usize,
    pub n_train: usize,
    pub n_test: usize,
    pub coefficients: Vec<f64>,
    pub intercept: f64,
    pub scaler_mean: Vec<f64>,
    pub scaler_scale: Vec<f64>,
    pub alpha: Option<f64>,
    pub l1_ratio: Option<f64>,
    /// Test targets, window-averaged when aggregation is active
    pub y_true: Vec<f64>,
    pub y_pred: Vec<f64>,
    pub mape: f64,
    pub mae: f64,
    pub rmse: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct EvaluationResult {
    pub method: String,
    pub target: Target,
    pub estimator: EstimatorKind,
    pub strategy: SplitStrategy,
    pub feature_names: Vec<String>,
    /// Rows with finite features and target
    pub n_samples: usize,
    pub n_splits: usize,
    pub window_s: f64,
    pub mape_mean: f64,
    pub mape_std: f64,
    pub mae_mean: f64,
    pub mae_std: f64,
    pub rmse_mean: f64,
    pub rmse_std: f64,
    pub folds: Vec<FoldResult>,
    /// Out-of-fold pairs, concatenated in fold order
    pub all_y_true: Vec<f64>,
    pub all_y_pred: Vec<f64>,
}

impl EvaluationResult {
    fn undefined(method: &str, target: Target, config: &EvaluationConfig, features: &[String]) -> Self {
        Self {
            method: method.to_string(),
            target,
            estimator: config.estimator,
            strategy: config.strategy,
            feature_names: features.to_vec(),
            n_samples: 0,
            n_splits: 0,
            window_s: config.window_s,
            mape_mean: f64::INFINITY,
            mape_std: 0.0,
            mae_mean: f64::INFINITY,
            mae_std: 0.0,
            rmse_mean: f64::INFINITY,
            rmse_std: 0.0,
            folds: Vec::new(),
            all_y_true: Vec::new(),
            all_y_pred: Vec::new(),
        }
    }

    /// True when no row was usable.
    pub fn is_undefined(&self) -> bool {
        self.n_samples == 0
    }

    pub fn bland_altman(&self) -> Option<BlandAltman> {
        metrics::bland_altman(&self.all_y_true, &self.all_y_pred)
    }
}

/// Per-fold numbers handed to a [`FoldObserver`].
#[derive(Debug, Clone, Copy)]
pub struct FoldDiagnostics<'a> {
    pub method: &'a str,
    pub fold: usize,
    pub estimator: &'a str,
    pub n_train: usize,
    pub n_test: usize,
    pub feature_names: &'a [String],
    pub feature_mean: &'a [f64],
    pub feature_scale: &'a [f64],
    pub standardized_coefficients: &'a [f64],
    pub prediction_min: f64,
    pub prediction_max: f64,
    pub prediction_std: f64,
}

pub trait FoldObserver: Send + Sync {
    fn on_fold(&self, diagnostics: &FoldDiagnostics<'_>);

    fn on_skipped_fold(&self, method: &str, fold: usize, reason: &str) {
        log::warn!("fold skipped: method={} fold={} reason={}", method, fold, reason);
    }
}

/// Writes fold diagnostics as `log::debug!` events.
pub struct LogObserver;

impl FoldObserver for LogObserver {
    fn on_fold(&self, d: &FoldDiagnostics<'_>) {
        log::debug!(
            "fold done: method={} fold={} estimator={} n_train={} n_test={} pred_min={:.3} pred_max={:.3} pred_std={:.3}",
            d.method,
            d.fold,
            d.estimator,
            d.n_train,
            d.n_test,
            d.prediction_min,
            d.prediction_max,
            d.prediction_std
        );
        for (j, name) in d.feature_names.iter().enumerate() {
            log::debug!(
                "fold feature: method={} fold={} feature={} mean={:.4} scale={:.4} coef_std={:.4}",
                d.method,
                d.fold,
                name,
                d.feature_mean[j],
                d.feature_scale[j],
                d.standardized_coefficients[j]
            );
        }
    }
}

struct Sample {
    group: String,
    time: f64,
    x: Vec<f64>,
    y: f64,
}

/// Rows with a finite target and finite values in every column of `columns`.
fn collect_samples(table: &FeatureTable, columns: &[usize], target: Target) -> Vec<Sample> {
    table
        .rows()
        .iter()
        .filter_map(|row| {
            let y = row.target(target).filter(|v| v.is_finite())?;
            let x: Vec<f64> = columns.iter().map(|&c| row.features[c]).collect();
            x.iter().all(|v| v.is_finite()).then(|| Sample {
                group: row.group.clone(),
                time: row.time_or_nan(),
                x,
                y,
            })
        })
        .collect()
}

pub struct FoldEvaluator {
    config: EvaluationConfig,
    observer: Box<dyn FoldObserver>,
}

impl FoldEvaluator {
    pub fn new(config: EvaluationConfig) -> Self {
        Self::with_observer(config, Box::new(LogObserver))
    }

    pub fn with_observer(config: EvaluationConfig, observer: Box<dyn FoldObserver>) -> Self {
        Self { config, observer }
    }

    pub fn config(&self) -> &EvaluationConfig {
        &self.config
    }

    /// Cross-validate `feature_columns` of `table` against `target`.
    ///
    /// # Errors
    /// - `MissingColumn` if a requested feature is not in the table
    /// - `InsufficientGroups` for group splitting with fewer than 2 groups
    /// - `MissingTimeColumn` / `TooFewSamples` for time-series splitting
    pub fn evaluate(
        &self,
        table: &FeatureTable,
        method: &str,
        feature_columns: &[String],
        target: Target,
    ) -> Result<EvaluationResult, PipelineError> {
        let columns: Vec<usize> = feature_columns
            .iter()
            .map(|f| {
                table
                    .feature_index(f)
                    .ok_or_else(|| PipelineError::MissingColumn(f.clone()))
            })
            .collect::<Result<_, _>>()?;

        let mut samples = collect_samples(table, &columns, target);
        if samples.is_empty() {
            log::warn!("no valid rows: method={} target={}", method, target);
            return Ok(EvaluationResult::undefined(method, target, &self.config, feature_columns));
        }

        let folds = self.split(table, &mut samples)?;
        let window_s = if table.has_time() { self.config.window_s } else { 0.0 };

        let run = |(k, fold): (usize, &Fold)| {
            self.run_fold(method, feature_columns, k, fold, &samples, window_s)
        };
        #[cfg(feature = "parallel")]
        let outcomes: Vec<Option<FoldResult>> = folds
            .par_iter()
            .enumerate()
            .map(run)
            .collect::<Result<_, _>>()?;
        #[cfg(not(feature = "parallel"))]
        let outcomes: Vec<Option<FoldResult>> = folds
            .iter()
            .enumerate()
            .map(run)
            .collect::<Result<_, _>>()?;

        let fold_results: Vec<FoldResult> = outcomes.into_iter().flatten().collect();
        let mape: Vec<f64> = fold_results.iter().map(|f| f.mape).collect();
        let mae: Vec<f64> = fold_results.iter().map(|f| f.mae).collect();
        let rmse: Vec<f64> = fold_results.iter().map(|f| f.rmse).collect();
        let (mape_s, mae_s, rmse_s) = (
            metrics::summarize(&mape),
            metrics::summarize(&mae),
            metrics::summarize(&rmse),
        );

        let all_y_true = fold_results.iter().flat_map(|f| f.y_true.iter().copied()).collect();
        let all_y_pred = fold_results.iter().flat_map(|f| f.y_pred.iter().copied()).collect();

        log::info!(
            "method evaluated: method={} target={} estimator={} folds={} mape_mean={:.3} mae_mean={:.3} rmse_mean={:.3}",
            method,
            target,
            self.config.estimator,
            fold_results.len(),
            mape_s.mean,
            mae_s.mean,
            rmse_s.mean
        );

        Ok(EvaluationResult {
            method: method.to_string(),
            target,
            estimator: self.config.estimator,
            strategy: self.config.strategy,
            feature_names: feature_columns.to_vec(),
            n_samples: samples.len(),
            n_splits: folds.len(),
            window_s,
            mape_mean: mape_s.mean,
            mape_std: mape_s.std,
            mae_mean: mae_s.mean,
            mae_std: mae_s.std,
            rmse_mean: rmse_s.mean,
            rmse_std: rmse_s.std,
            folds: fold_results,
            all_y_true,
            all_y_pred,
        })
    }

    /// Build folds; time-series splitting drops rows without a finite time
    /// and reorders the rest by time.
    fn split(&self, table: &FeatureTable, samples: &mut Vec<Sample>) -> Result<Vec<Fold>, PipelineError> {
        match self.config.strategy {
            SplitStrategy::Group => {
                let groups: Vec<&str> = samples.iter().map(|s| s.group.as_str()).collect();
                let mut distinct = groups.clone();
                distinct.sort_unstable();
                distinct.dedup();
                if distinct.len() < 2 {
                    return Err(PipelineError::InsufficientGroups {
                        found: distinct.len(),
                        required: 2,
                    });
                }
                let n_splits = if distinct.len() < self.config.n_splits {
                    log::warn!(
                        "fewer groups than splits: groups={} n_splits={}, shrinking",
                        distinct.len(),
                        self.config.n_splits
                    );
                    distinct.len()
                } else {
                    self.config.n_splits
                };
                CrossValidator::group_k_fold(&groups, n_splits)
            }
            SplitStrategy::TimeSeries => {
                if !table.has_time() {
                    return Err(PipelineError::MissingTimeColumn);
                }
                let before = samples.len();
                samples.retain(|s| s.time.is_finite());
                if samples.len() < before {
                    log::warn!(
                        "rows without time dropped for time-series split: dropped={} remaining={}",
                        before - samples.len(),
                        samples.len()
                    );
                }
                samples.sort_by(|a, b| a.time.total_cmp(&b.time));
                CrossValidator::time_series_split(samples.len(), self.config.n_splits)
            }
        }
    }

    fn run_fold(
        &self,
        method: &str,
        feature_names: &[String],
        k: usize,
        fold: &Fold,
        samples: &[Sample],
        window_s: f64,
    ) -> Result<Option<FoldResult>, PipelineError> {
        if fold.train.is_empty() || fold.test.is_empty() {
            self.observer.on_skipped_fold(method, k, "empty train or test slice");
            return Ok(None);
        }
        let p = samples[0].x.len();
        let matrix = |idx: &[usize]| DMatrix::from_fn(idx.len(), p, |i, j| samples[idx[i]].x[j]);
        let x_train = matrix(&fold.train);
        let y_train = DVector::from_iterator(fold.train.len(), fold.train.iter().map(|&i| samples[i].y));
        let x_test = matrix(&fold.test);

        let scaler = StandardScaler::fit(&x_train);
        let estimator = self.config.estimator.build(fold.train.len());
        let fit = estimator.fit(&scaler.transform(&x_train), &y_train)?;
        let pred: Vec<f64> = fit.predict(&scaler.transform(&x_test)).iter().copied().collect();
        let (coefficients, intercept) = scaler.destandardize(&fit);

        let truth: Vec<f64> = fold.test.iter().map(|&i| samples[i].y).collect();
        let times: Vec<f64> = fold.test.iter().map(|&i| samples[i].time).collect();
        let (y_true, y_pred) = WindowAggregator::aggregate(&truth, &pred, Some(times.as_slice()), window_s);

        let (pmin, pmax) = pred
            .iter()
            .fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), &v| (lo.min(v), hi.max(v)));
        self.observer.on_fold(&FoldDiagnostics {
            method,
            fold: k,
            estimator: estimator.name(),
            n_train: fold.train.len(),
            n_test: fold.test.len(),
            feature_names,
            feature_mean: &scaler.mean,
            feature_scale: &scaler.scale,
            standardized_coefficients: &fit.coefficients,
            prediction_min: pmin,
            prediction_max: pmax,
            prediction_std: metrics::population_std(&pred),
        });

        Ok(Some(FoldResult {
            fold: k,
            n_train: fold.train.len(),
            n_test: fold.test.len(),
            coefficients,
            intercept,
            scaler_mean: scaler.mean.clone(),
            scaler_scale: scaler.scale.clone(),
            alpha: fit.alpha,
            l1_ratio: fit.l1_ratio,
            mape: metrics::mape(&y_true, &y_pred),
            mae: metrics::mae(&y_true, &y_pred),
            rmse: metrics::rmse(&y_true, &y_pred),
            y_true,
            y_pred,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::table::{FeatureRow, TimeSource, TimeUnit};
    use approx::assert_relative_eq;
    use std::sync::Mutex;

    fn linear_table(groups: &[&str], per_group: usize, with_time: bool) -> FeatureTable {
        let mut rows = Vec::new();
        let mut t = 0.0;
        for (g, name) in groups.iter().enumerate() {
            for i in 0..per_group {
                let a = (i as f64 * 0.7 + g as f64 * 1.3).sin() * 5.0 + 10.0;
                let hr = (i as f64 * 0.3).cos() * 8.0 + 70.0 + g as f64;
                rows.push(FeatureRow {
                    group: name.to_string(),
                    elapsed_s: with_time.then_some(t),
                    features: vec![a, hr],
                    ref_sbp: Some(40.0 + 3.0 * a + 0.5 * hr),
                    ref_dbp: Some(30.0 + a),
                });
                t += 1.0;
            }
        }
        let time = with_time.then(|| TimeSource {
            column: "elapsed_seconds".to_string(),
            unit: TimeUnit::Seconds,
        });
        FeatureTable::new(vec!["A".to_string(), "HR".to_string()], time, rows).unwrap()
    }

    fn config(strategy: SplitStrategy, n_splits: usize, estimator: EstimatorKind) -> EvaluationConfig {
        EvaluationConfig {
            strategy,
            n_splits,
            estimator,
            window_s: 0.0,
            ..EvaluationConfig::default()
        }
    }

    fn features() -> Vec<String> {
        vec!["A".to_string(), "HR".to_string()]
    }

    #[test]
    fn test_group_cv_recovers_raw_coefficients() {
        let table = linear_table(&["s1", "s2", "s3"], 10, false);
        let evaluator = FoldEvaluator::new(config(SplitStrategy::Group, 3, EstimatorKind::Ols));
        let result = evaluator.evaluate(&table, "M", &features(), Target::Sbp).unwrap();
        assert_eq!(result.folds.len(), 3);
        assert_eq!(result.n_samples, 30);
        for fold in &result.folds {
            assert_relative_eq!(fold.coefficients[0], 3.0, epsilon = 1e-6);
            assert_relative_eq!(fold.coefficients[1], 0.5, epsilon = 1e-6);
            assert_relative_eq!(fold.intercept, 40.0, epsilon = 1e-4);
            assert!(fold.mape < 1e-6);
        }
        assert_eq!(result.all_y_true.len(), 30);
    }

    #[test]
    fn test_group_split_shrinks_to_group_count() {
        let table = linear_table(&["a", "b"], 8, false);
        let evaluator = FoldEvaluator::new(config(SplitStrategy::Group, 5, EstimatorKind::Ols));
        let result = evaluator.evaluate(&table, "M", &features(), Target::Dbp).unwrap();
        assert_eq!(result.n_splits, 2);
    }

    #[test]
    fn test_single_group_is_an_error() {
        let table = linear_table(&["only"], 12, false);
        let evaluator = FoldEvaluator::new(config(SplitStrategy::Group, 3, EstimatorKind::Ols));
        let err = evaluator.evaluate(&table, "M", &features(), Target::Sbp).unwrap_err();
        assert!(matches!(err, PipelineError::InsufficientGroups { found: 1, required: 2 }));
    }

    #[test]
    fn test_time_series_requires_time() {
        let table = linear_table(&["a", "b"], 10, false);
        let evaluator = FoldEvaluator::new(config(SplitStrategy::TimeSeries, 3, EstimatorKind::Ols));
        assert!(matches!(
            evaluator.evaluate(&table, "M", &features(), Target::Sbp),
            Err(PipelineError::MissingTimeColumn)
        ));

        let table = linear_table(&["a", "b"], 10, true);
        let result = evaluator.evaluate(&table, "M", &features(), Target::Sbp).unwrap();
        assert_eq!(result.folds.len(), 3);
        // n=20, test_size=5: first block starts at 5
        assert_eq!(result.folds[0].n_train, 5);
        assert_eq!(result.folds[2].n_train, 15);
    }

    #[test]
    fn test_time_series_orders_shuffled_times_and_drops_missing() {
        let mut table = linear_table(&["a", "b"], 12, true);
        // Deterministic shuffle of 0..24 s, then blank one time
        for (i, row) in table.rows_mut().iter_mut().enumerate() {
            row.elapsed_s = Some(((i * 7) % 24) as f64);
        }
        table.rows_mut()[5].elapsed_s = None;

        let evaluator = FoldEvaluator::new(config(SplitStrategy::TimeSeries, 3, EstimatorKind::Ols));
        let mut samples = collect_samples(&table, &[0, 1], Target::Sbp);
        assert_eq!(samples.len(), 24);
        let folds = evaluator.split(&table, &mut samples).unwrap();
        assert_eq!(samples.len(), 23);
        assert!(samples.iter().all(|s| s.time.is_finite()));

        for fold in &folds {
            let train_max = fold.train.iter().map(|&i| samples[i].time).fold(f64::NEG_INFINITY, f64::max);
            let test_min = fold.test.iter().map(|&i| samples[i].time).fold(f64::INFINITY, f64::min);
            assert!(train_max <= test_min, "train_max={} test_min={}", train_max, test_min);
        }

        let result = evaluator.evaluate(&table, "M", &features(), Target::Sbp).unwrap();
        assert_eq!(result.n_samples, 23);
        assert_eq!(result.folds.len(), 3);
    }

    #[test]
    fn test_window_aggregation_shrinks_test_pairs() {
        let table = linear_table(&["a", "b", "c"], 10, true);
        let mut cfg = config(SplitStrategy::Group, 3, EstimatorKind::Ols);
        cfg.window_s = 5.0;
        let result = FoldEvaluator::new(cfg).evaluate(&table, "M", &features(), Target::Sbp).unwrap();
        // Each group spans 10 consecutive seconds aligned to multiples of 10
        for fold in &result.folds {
            assert_eq!(fold.y_true.len(), 2);
        }
    }

    #[test]
    fn test_no_valid_rows_is_undefined() {
        let mut table = linear_table(&["a", "b"], 4, false);
        for row in table.rows_mut() {
            row.features[0] = f64::NAN;
        }
        let evaluator = FoldEvaluator::new(config(SplitStrategy::Group, 2, EstimatorKind::Ridge));
        let result = evaluator.evaluate(&table, "M", &features(), Target::Sbp).unwrap();
        assert!(result.is_undefined());
        assert_eq!(result.mape_mean, f64::INFINITY);
        assert_eq!(result.mape_std, 0.0);
        assert!(result.folds.is_empty());
    }

    #[test]
    fn test_missing_feature_column() {
        let table = linear_table(&["a", "b"], 4, false);
        let evaluator = FoldEvaluator::new(config(SplitStrategy::Group, 2, EstimatorKind::Ols));
        let err = evaluator
            .evaluate(&table, "M", &["nope".to_string()], Target::Sbp)
            .unwrap_err();
        assert!(matches!(err, PipelineError::MissingColumn(c) if c == "nope"));
    }

    #[cfg(feature = "parallel")]
    #[test]
    fn test_parallel_folds_match_serial_run() {
        let table = linear_table(&["a", "b", "c", "d"], 8, false);
        let evaluator = FoldEvaluator::new(config(SplitStrategy::Group, 4, EstimatorKind::Ridge));
        let result = evaluator.evaluate(&table, "M", &features(), Target::Sbp).unwrap();

        let mut samples = collect_samples(&table, &[0, 1], Target::Sbp);
        let folds = evaluator.split(&table, &mut samples).unwrap();
        let serial: Vec<FoldResult> = folds
            .iter()
            .enumerate()
            .filter_map(|(k, fold)| evaluator.run_fold("M", &features(), k, fold, &samples, 0.0).unwrap())
            .collect();

        assert_eq!(result.folds.len(), 4);
        assert_eq!(result.folds, serial);
        let serial_true: Vec<f64> = serial.iter().flat_map(|f| f.y_true.iter().copied()).collect();
        assert_eq!(result.all_y_true, serial_true);
    }

    struct CountingObserver(Mutex<Vec<usize>>);

    impl FoldObserver for CountingObserver {
        fn on_fold(&self, d: &FoldDiagnostics<'_>) {
            self.0.lock().unwrap().push(d.fold);
        }
    }

    #[test]
    fn test_observer_sees_every_fold() {
        let table = linear_table(&["a", "b", "c", "d"], 6, false);
        let observer = std::sync::Arc::new(CountingObserver(Mutex::new(Vec::new())));
        struct Shared(std::sync::Arc<CountingObserver>);
        impl FoldObserver for Shared {
            fn on_fold(&self, d: &FoldDiagnostics<'_>) {
                self.0.on_fold(d)
            }
        }
        let evaluator = FoldEvaluator::with_observer(
            config(SplitStrategy::Group, 4, EstimatorKind::Huber),
            Box::new(Shared(observer.clone())),
        );
        evaluator.evaluate(&table, "M", &features(), Target::Sbp).unwrap();
        let mut seen = observer.0.lock().unwrap().clone();
        seen.sort_unstable();
        assert_eq!(seen, vec![0, 1, 2, 3]);
    }
}
