//! Layered outlier rejection for reference targets and feature columns
//!
//! Target rows pass through four stages in order, each stage seeing only the
//! survivors of the previous one:
//!
//! 1. zero-as-missing
//! 2. physiological range
//! 3. per-group z-score
//! 4. temporal neighbor check (time column required)
//!
//! All spreads are population standard deviations.

use serde::Serialize;
use std::collections::HashMap;

use crate::config::OutlierConfig;
use crate::table::{FeatureTable, Target};

/// Row counts removed by each stage.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct OutlierReport {
    pub initial: usize,
    pub zero_or_missing: usize,
    pub out_of_range: usize,
    pub zscore: usize,
    pub temporal: usize,
    pub remaining: usize,
}

impl OutlierReport {
    pub fn removed(&self) -> usize {
        self.initial - self.remaining
    }
}

/// Outcome of feature-cell rejection.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct FeatureOutlierReport {
    pub cells_nulled: usize,
    pub rows_dropped: usize,
}

pub struct OutlierRejector {
    config: OutlierConfig,
}

impl OutlierRejector {
    pub fn new() -> Self {
        Self::with_config(OutlierConfig::default())
    }

    pub fn with_config(config: OutlierConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &OutlierConfig {
        &self.config
    }

    /// Run all target stages. The temporal stage runs only when the table
    /// has a time column; it leaves rows sorted by (group, time).
    pub fn reject(&self, mut table: FeatureTable, target: Target) -> (FeatureTable, OutlierReport) {
        let mut report = OutlierReport {
            initial: table.len(),
            ..OutlierReport::default()
        };

        let before = table.len();
        table.retain(|r| matches!(r.target(target), Some(v) if v.is_finite() && v != 0.0));
        report.zero_or_missing = before - table.len();

        let [lo, hi] = match target {
            Target::Sbp => self.config.sbp_range,
            Target::Dbp => self.config.dbp_range,
        };
        let before = table.len();
        table.retain(|r| matches!(r.target(target), Some(v) if v >= lo && v <= hi));
        report.out_of_range = before - table.len();

        report.zscore = self.reject_group_zscore(&mut table, target);

        if table.has_time() {
            report.temporal = self.reject_temporal(&mut table, target);
        }

        report.remaining = table.len();
        log::info!(
            "outlier rejection: target={} initial={} zero_or_missing={} out_of_range={} zscore={} temporal={} remaining={}",
            target,
            report.initial,
            report.zero_or_missing,
            report.out_of_range,
            report.zscore,
            report.temporal,
            report.remaining
        );
        (table, report)
    }

    /// Drop rows whose target lies more than `z_threshold` population
    /// standard deviations from their group mean.
    fn reject_group_zscore(&self, table: &mut FeatureTable, target: Target) -> usize {
        let stats = group_stats(table, target);
        let threshold = self.config.z_threshold;
        let min_size = self.config.min_group_size;

        let before = table.len();
        table.retain(|r| {
            let v = match r.target(target) {
                Some(v) => v,
                None => return false,
            };
            match stats.get(r.group.as_str()) {
                Some(s) if s.count >= min_size && s.std > 0.0 => (v - s.mean).abs() / s.std <= threshold,
                _ => true,
            }
        });
        before - table.len()
    }

    /// Drop interior samples that jump away from the mean of their two
    /// neighbors by more than `temporal_threshold` group standard deviations.
    fn reject_temporal(&self, table: &mut FeatureTable, target: Target) -> usize {
        table.sort_rows_by(|a, b| {
            a.group
                .cmp(&b.group)
                .then_with(|| a.time_or_nan().total_cmp(&b.time_or_nan()))
        });

        // Frozen before any flagging
        let stats = group_stats(table, target);
        let values: Vec<f64> = table
            .rows()
            .iter()
            .map(|r| r.target(target).unwrap_or(f64::NAN))
            .collect();

        let mut flagged = vec![false; values.len()];
        let rows = table.rows();
        let mut start = 0;
        while start < rows.len() {
            let group = &rows[start].group;
            let end = start + rows[start..].iter().take_while(|r| &r.group == group).count();

            let eligible = stats
                .get(group.as_str())
                .filter(|s| s.count >= self.config.min_group_size && s.std > 0.0);
            if let Some(s) = eligible {
                let limit = self.config.temporal_threshold * s.std;
                for i in start + 1..end.saturating_sub(1) {
                    let neighbor_mean = (values[i - 1] + values[i + 1]) / 2.0;
                    if (values[i] - neighbor_mean).abs() > limit {
                        flagged[i] = true;
                    }
                }
            }
            start = end;
        }

        let removed = flagged.iter().filter(|&&f| f).count();
        if removed > 0 {
            let mut idx = 0;
            table.retain(|_| {
                let keep = !flagged[idx];
                idx += 1;
                keep
            });
        }
        removed
    }

    /// Null feature cells beyond `feature_z_threshold` per group and column,
    /// then drop rows whose features are all missing.
    pub fn reject_feature_outliers(&self, table: &mut FeatureTable) -> FeatureOutlierReport {
        let mut report = FeatureOutlierReport::default();
        let n_features = table.feature_names().len();
        let threshold = self.config.feature_z_threshold;
        let min_size = self.config.min_group_size;

        for col in 0..n_features {
            let mut per_group: HashMap<String, RunningStats> = HashMap::new();
            for row in table.rows() {
                let v = row.features[col];
                if v.is_finite() {
                    per_group.entry(row.group.clone()).or_default().push(v);
                }
            }
            let stats: HashMap<String, GroupStats> = per_group
                .into_iter()
                .map(|(g, acc)| (g, acc.finish()))
                .collect();

            for row in table.rows_mut() {
                let v = row.features[col];
                if !v.is_finite() {
                    continue;
                }
                if let Some(s) = stats.get(&row.group) {
                    if s.count >= min_size && s.std > 0.0 && (v - s.mean).abs() / s.std > threshold {
                        row.features[col] = f64::NAN;
                        report.cells_nulled += 1;
                    }
                }
            }
        }

        if report.cells_nulled > 0 {
            let before = table.len();
            table.retain(|r| r.features.iter().any(|v| v.is_finite()));
            report.rows_dropped = before - table.len();
        }

        log::info!(
            "feature outlier rejection: cells_nulled={} rows_dropped={} remaining={}",
            report.cells_nulled,
            report.rows_dropped,
            table.len()
        );
        report
    }
}

impl Default for OutlierRejector {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Clone, Copy)]
struct GroupStats {
    count: usize,
    mean: f64,
    std: f64,
}

#[derive(Debug, Default)]
struct RunningStats {
    values: Vec<f64>,
}

impl RunningStats {
    fn push(&mut self, v: f64) {
        self.values.push(v);
    }

    fn finish(self) -> GroupStats {
        let count = self.values.len();
        if count == 0 {
            return GroupStats {
                count,
                mean: f64::NAN,
                std: 0.0,
            };
        }
        let mean = self.values.iter().sum::<f64>() / count as f64;
        let var = self.values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / count as f64;
        GroupStats {
            count,
            mean,
            std: var.sqrt(),
        }
    }
}

fn group_stats(table: &FeatureTable, target: Target) -> HashMap<String, GroupStats> {
    let mut acc: HashMap<String, RunningStats> = HashMap::new();
    for row in table.rows() {
        if let Some(v) = row.target(target) {
            if v.is_finite() {
                acc.entry(row.group.clone()).or_default().push(v);
            }
        }
    }
    acc.into_iter().map(|(g, s)| (g, s.finish())).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::table::{FeatureRow, TimeSource, TimeUnit};

    fn sbp_table(group: &str, values: &[f64], with_time: bool) -> FeatureTable {
        let rows = values
            .iter()
            .enumerate()
            .map(|(i, &v)| FeatureRow {
                group: group.to_string(),
                elapsed_s: Some(i as f64),
                features: vec![1.0 + i as f64],
                ref_sbp: Some(v),
                ref_dbp: Some(80.0),
            })
            .collect();
        let time = with_time.then(|| TimeSource {
            column: "elapsed_seconds".to_string(),
            unit: TimeUnit::Seconds,
        });
        FeatureTable::new(vec!["M1_A".to_string()], time, rows).unwrap()
    }

    fn sbp_values(table: &FeatureTable) -> Vec<f64> {
        table.rows().iter().filter_map(|r| r.ref_sbp).collect()
    }

    #[test]
    fn test_out_of_range_value_removed() {
        let table = sbp_table("s1", &[70.0, 72.0, 71.0, 500.0, 73.0], true);
        let (clean, report) = OutlierRejector::new().reject(table, Target::Sbp);
        assert_eq!(sbp_values(&clean), vec![70.0, 72.0, 71.0, 73.0]);
        assert_eq!(report.out_of_range, 1);
        assert_eq!(report.removed(), 1);
    }

    #[test]
    fn test_zero_and_missing_dropped() {
        let mut table = sbp_table("s1", &[0.0, 120.0, 121.0], false);
        table.rows_mut()[2].ref_sbp = None;
        let (clean, report) = OutlierRejector::new().reject(table, Target::Sbp);
        assert_eq!(sbp_values(&clean), vec![120.0]);
        assert_eq!(report.zero_or_missing, 2);
    }

    #[test]
    fn test_dbp_range_and_sibling_untouched() {
        let mut table = sbp_table("s1", &[120.0, 121.0, 122.0], false);
        table.rows_mut()[0].ref_dbp = Some(30.0);
        table.rows_mut()[1].ref_sbp = Some(400.0);
        let (clean, report) = OutlierRejector::new().reject(table, Target::Dbp);
        assert_eq!(clean.len(), 2);
        assert_eq!(report.out_of_range, 1);
        assert_eq!(clean.rows()[0].ref_sbp, Some(400.0));
    }

    #[test]
    fn test_group_zscore_removes_spike() {
        let mut values = vec![120.0; 20];
        values[7] = 121.0;
        values[12] = 160.0;
        let table = sbp_table("s1", &values, false);
        let (clean, report) = OutlierRejector::new().reject(table, Target::Sbp);
        assert_eq!(report.zscore, 1);
        assert!(!sbp_values(&clean).contains(&160.0));
    }

    #[test]
    fn test_small_groups_skip_zscore() {
        let table = sbp_table("s1", &[100.0, 180.0], false);
        let (clean, _) = OutlierRejector::new().reject(table, Target::Sbp);
        assert_eq!(clean.len(), 2);
    }

    #[test]
    fn test_temporal_stage_flags_interior_jump() {
        // Alternating baseline keeps the group std wide enough that the
        // spike survives the z-score stage.
        let mut values: Vec<f64> = (0..20).map(|i| if i % 2 == 0 { 100.0 } else { 140.0 }).collect();
        values[9] = 95.0;
        values[10] = 170.0;
        values[11] = 95.0;
        let table = sbp_table("s1", &values, true);
        let (clean, report) = OutlierRejector::new().reject(table, Target::Sbp);
        assert_eq!(report.zscore, 0);
        assert_eq!(report.temporal, 1);
        assert!(!sbp_values(&clean).contains(&170.0));
        assert_eq!(clean.len(), 19);
    }

    #[test]
    fn test_temporal_stage_skips_endpoints() {
        let values = [200.0, 100.0, 100.0, 100.0, 100.0, 100.0, 100.0, 100.0, 100.0, 60.0];
        let table = sbp_table("s1", &values, true);
        let (clean, report) = OutlierRejector::new().reject(table, Target::Sbp);
        assert_eq!(report.temporal, 0);
        assert_eq!(clean.len(), 10);
    }

    #[test]
    fn test_feature_cells_nulled_rows_kept_when_other_features_present() {
        let mut rows = Vec::new();
        for i in 0..20 {
            rows.push(FeatureRow {
                group: "g".to_string(),
                elapsed_s: Some(i as f64),
                features: vec![if i == 5 { 100.0 } else { 1.0 }, 2.0 + (i % 2) as f64],
                ref_sbp: Some(120.0),
                ref_dbp: None,
            });
        }
        let mut table =
            FeatureTable::new(vec!["M1_A".to_string(), "M1_HR".to_string()], None, rows).unwrap();
        let report = OutlierRejector::new().reject_feature_outliers(&mut table);
        assert_eq!(report.cells_nulled, 1);
        assert_eq!(report.rows_dropped, 0);
        assert!(table.rows()[5].features[0].is_nan());
        assert_eq!(table.rows()[5].features[1], 3.0);
    }

    #[test]
    fn test_feature_rows_all_missing_dropped() {
        let mut rows = Vec::new();
        for i in 0..20 {
            rows.push(FeatureRow {
                group: "g".to_string(),
                elapsed_s: None,
                features: vec![if i == 3 { 50.0 } else { 1.0 }],
                ref_sbp: Some(120.0),
                ref_dbp: None,
            });
        }
        let mut table = FeatureTable::new(vec!["M1_A".to_string()], None, rows).unwrap();
        let report = OutlierRejector::new().reject_feature_outliers(&mut table);
        assert_eq!(report.rows_dropped, 1);
        assert_eq!(table.len(), 19);
    }
}
