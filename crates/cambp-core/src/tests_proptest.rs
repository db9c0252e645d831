use proptest::prelude::*;

/// Property-based checks for splitting, windowing, metrics and fitting.
#[cfg(test)]
mod tests {
    use super::*;
    use crate::cv::CrossValidator;
    use crate::metrics;
    use crate::regression::{Ols, Regressor, StandardScaler};
    use crate::window::WindowAggregator;
    use nalgebra::{DMatrix, DVector};

    // =========================================================================
    // Group k-fold: every sample tested once, no group on both sides
    // =========================================================================
    proptest! {
        #[test]
        fn test_group_k_fold_partitions(
            group_ids in prop::collection::vec(0usize..6, 6..60),
            n_splits in 2usize..4,
        ) {
            let groups: Vec<String> = group_ids.iter().map(|g| format!("S{}", g)).collect();
            let distinct = {
                let mut d = groups.clone();
                d.sort();
                d.dedup();
                d.len()
            };
            prop_assume!(distinct >= n_splits);

            let folds = CrossValidator::group_k_fold(&groups, n_splits).unwrap();
            let mut seen = vec![0usize; groups.len()];
            for fold in &folds {
                for &i in &fold.test {
                    seen[i] += 1;
                    for &j in &fold.train {
                        prop_assert_ne!(&groups[i], &groups[j]);
                    }
                }
                prop_assert_eq!(fold.train.len() + fold.test.len(), groups.len());
            }
            prop_assert!(seen.iter().all(|&c| c == 1));
        }
    }

    // =========================================================================
    // Time-series split: train strictly precedes test
    // =========================================================================
    proptest! {
        #[test]
        fn test_time_series_train_precedes_test(n in 10usize..200, n_splits in 2usize..6) {
            let folds = CrossValidator::time_series_split(n, n_splits).unwrap();
            prop_assert_eq!(folds.len(), n_splits);
            for fold in &folds {
                let last_train = *fold.train.last().unwrap();
                prop_assert!(fold.test.iter().all(|&t| t > last_train));
            }
        }
    }

    // =========================================================================
    // Window aggregation: one output per occupied window, means bounded
    // =========================================================================
    proptest! {
        #![proptest_config(ProptestConfig::with_cases(100))]

        #[test]
        fn test_window_means_within_window_range(
            samples in prop::collection::vec((0.0f64..300.0, 50.0f64..200.0), 1..80),
            window_s in 1.0f64..60.0,
        ) {
            let times: Vec<f64> = samples.iter().map(|s| s.0).collect();
            let y: Vec<f64> = samples.iter().map(|s| s.1).collect();
            let (agg_true, agg_pred) = WindowAggregator::aggregate(&y, &y, Some(times.as_slice()), window_s);

            let mut windows: Vec<i64> = times.iter().map(|t| (t / window_s).floor() as i64).collect();
            windows.sort();
            windows.dedup();
            prop_assert_eq!(agg_true.len(), windows.len());
            prop_assert_eq!(&agg_true, &agg_pred);

            let lo = y.iter().cloned().fold(f64::INFINITY, f64::min);
            let hi = y.iter().cloned().fold(f64::NEG_INFINITY, f64::max);
            for v in agg_true {
                prop_assert!(v >= lo - 1e-9 && v <= hi + 1e-9);
            }
        }
    }

    // =========================================================================
    // Metrics: ordering and non-negativity
    // =========================================================================
    proptest! {
        #[test]
        fn test_mae_bounded_by_rmse(
            pairs in prop::collection::vec((60.0f64..180.0, 60.0f64..180.0), 1..50)
        ) {
            let t: Vec<f64> = pairs.iter().map(|p| p.0).collect();
            let p: Vec<f64> = pairs.iter().map(|p| p.1).collect();
            let mae = metrics::mae(&t, &p);
            let rmse = metrics::rmse(&t, &p);
            prop_assert!(mae >= 0.0);
            prop_assert!(mae <= rmse + 1e-9);
            prop_assert!(metrics::mape(&t, &p) >= 0.0);
        }
    }

    // =========================================================================
    // Standardized fit maps back onto the raw-scale generating line
    // =========================================================================
    proptest! {
        #![proptest_config(ProptestConfig::with_cases(50))]

        #[test]
        fn test_destandardize_recovers_line(
            w0 in -5.0f64..5.0,
            w1 in -5.0f64..5.0,
            b in 50.0f64..150.0,
        ) {
            let n = 12;
            let x = DMatrix::from_fn(n, 2, |i, j| {
                if j == 0 { i as f64 * 1.5 + 10.0 } else { ((i * 7) % 5) as f64 * 3.0 + 60.0 }
            });
            let y = DVector::from_fn(n, |i, _| b + w0 * x[(i, 0)] + w1 * x[(i, 1)]);

            let scaler = StandardScaler::fit(&x);
            let fit = Ols.fit(&scaler.transform(&x), &y).unwrap();
            let (coefficients, intercept) = scaler.destandardize(&fit);

            prop_assert!((coefficients[0] - w0).abs() < 1e-6);
            prop_assert!((coefficients[1] - w1).abs() < 1e-6);
            prop_assert!((intercept - b).abs() < 1e-5);
        }
    }
}
