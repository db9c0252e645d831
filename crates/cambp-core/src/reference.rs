//! Reference blood-pressure preparation
//!
//! Beat-to-beat monitor exports are cut to the trailing window that overlaps
//! the phone recording, optionally put on a uniform grid, and attached to the
//! feature table as `ref_SBP` / `ref_DBP`.

use ndarray::Array1;
use regex::Regex;
use serde::{Deserialize, Serialize};

use cambp_signals::{AntiAliasConfig, AntiAliasFilter, FilterStatus, TemporalAligner, TimeSeries};

use crate::config::ReferenceConfig;
use crate::error::PipelineError;
use crate::table::FeatureTable;

/// One beat from the reference monitor.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ReferenceBeat {
    pub time_s: f64,
    pub sbp: Option<f64>,
    pub dbp: Option<f64>,
}

/// Reference SBP/DBP on a shared, window-relative time axis.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AlignedReference {
    pub sbp: TimeSeries,
    pub dbp: TimeSeries,
}

impl AlignedReference {
    pub fn is_empty(&self) -> bool {
        self.sbp.is_empty()
    }

    /// SBP and DBP read off at `times`; NaN outside the reference span.
    pub fn interpolate(&self, times: &[f64]) -> (Vec<f64>, Vec<f64>) {
        (
            TemporalAligner::interpolate_onto(&self.sbp, times),
            TemporalAligner::interpolate_onto(&self.dbp, times),
        )
    }

    /// Overwrite each row's targets with the interpolated reference.
    ///
    /// Rows without a time, or outside the reference span, get no target.
    /// Returns the number of rows that received both values.
    pub fn attach(&self, table: &mut FeatureTable) -> usize {
        let times: Vec<f64> = table.rows().iter().map(|r| r.time_or_nan()).collect();
        let (sbp, dbp) = self.interpolate(&times);
        let mut covered = 0;
        for (row, (s, d)) in table.rows_mut().iter_mut().zip(sbp.into_iter().zip(dbp)) {
            row.ref_sbp = s.is_finite().then_some(s);
            row.ref_dbp = d.is_finite().then_some(d);
            if row.ref_sbp.is_some() && row.ref_dbp.is_some() {
                covered += 1;
            }
        }
        covered
    }
}

pub struct ReferenceAligner {
    config: ReferenceConfig,
}

impl ReferenceAligner {
    pub fn new(config: ReferenceConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &ReferenceConfig {
        &self.config
    }

    /// Trim to the last `window_s` seconds, drop beats missing either value,
    /// then optionally resample and low-pass both series.
    pub fn prepare(&self, beats: &[ReferenceBeat]) -> Result<AlignedReference, PipelineError> {
        let times: Vec<f64> = beats.iter().map(|b| b.time_s).collect();
        let sbp: Vec<f64> = beats.iter().map(|b| b.sbp.unwrap_or(f64::NAN)).collect();
        let dbp: Vec<f64> = beats.iter().map(|b| b.dbp.unwrap_or(f64::NAN)).collect();

        let window = self.config.window_s;
        let sbp = TemporalAligner::trim_to_last_window(&TimeSeries::new(times.clone(), sbp)?, window)?;
        let dbp = TemporalAligner::trim_to_last_window(&TimeSeries::new(times, dbp)?, window)?;

        // Both series went through the same stable sort and trim
        let (t, (s, d)): (Vec<f64>, (Vec<f64>, Vec<f64>)) = sbp
            .times()
            .iter()
            .zip(sbp.values().iter().zip(dbp.values()))
            .filter(|(_, (s, d))| s.is_finite() && d.is_finite())
            .map(|(&t, (&s, &d))| (t, (s, d)))
            .unzip();
        log::info!(
            "reference trimmed: beats_in={} beats_kept={} window_s={}",
            beats.len(),
            t.len(),
            window
        );

        let mut aligned = AlignedReference {
            sbp: TimeSeries::new(t.clone(), s)?,
            dbp: TimeSeries::new(t, d)?,
        };

        if let Some(rate) = self.config.resample_hz {
            aligned.sbp = self.resample_and_filter(&aligned.sbp, rate)?;
            aligned.dbp = self.resample_and_filter(&aligned.dbp, rate)?;
        }
        Ok(aligned)
    }

    fn resample_and_filter(&self, series: &TimeSeries, rate_hz: f64) -> Result<TimeSeries, PipelineError> {
        let uniform = TemporalAligner::resample_uniform(series, rate_hz)?;
        let filter = AntiAliasFilter::with_config(AntiAliasConfig {
            sampling_rate_hz: rate_hz,
            cutoff_hz: self.config.antialias_cutoff_hz,
            order: self.config.filter_order,
        })?;
        let outcome = filter.filter(&Array1::from(uniform.values().to_vec()));
        if outcome.status != FilterStatus::Applied {
            log::debug!("reference filter status: {:?}", outcome.status);
        }
        Ok(uniform.with_values(outcome.values.to_vec())?)
    }

    /// Join each row to the nearest beat within `merge_tolerance_ms`.
    ///
    /// An alternative to interpolation for tables whose rows carry absolute
    /// timestamps on the monitor's clock. Beats missing a value never match.
    /// Returns the number of rows matched.
    pub fn attach_nearest(&self, table: &mut FeatureTable, beats: &[ReferenceBeat]) -> usize {
        let tolerance_s = self.config.merge_tolerance_ms / 1000.0;
        let mut sorted: Vec<&ReferenceBeat> = beats
            .iter()
            .filter(|b| b.time_s.is_finite() && b.sbp.is_some() && b.dbp.is_some())
            .collect();
        sorted.sort_by(|a, b| a.time_s.total_cmp(&b.time_s));

        let mut matched = 0;
        for row in table.rows_mut() {
            let t = row.time_or_nan();
            let nearest = if t.is_finite() { nearest_beat(&sorted, t) } else { None };
            match nearest.filter(|b| (b.time_s - t).abs() <= tolerance_s) {
                Some(beat) => {
                    row.ref_sbp = beat.sbp;
                    row.ref_dbp = beat.dbp;
                    matched += 1;
                }
                None => {
                    row.ref_sbp = None;
                    row.ref_dbp = None;
                }
            }
        }
        log::info!(
            "nearest reference join: rows={} matched={} tolerance_ms={}",
            table.len(),
            matched,
            self.config.merge_tolerance_ms
        );
        matched
    }
}

/// Closest beat to `t` in a time-sorted slice; the earlier one on a tie.
fn nearest_beat<'a>(sorted: &[&'a ReferenceBeat], t: f64) -> Option<&'a ReferenceBeat> {
    let idx = sorted.partition_point(|b| b.time_s < t);
    let after = sorted.get(idx).copied();
    let before = idx.checked_sub(1).and_then(|i| sorted.get(i)).copied();
    match (before, after) {
        (Some(b), Some(a)) => {
            if (a.time_s - t) < (t - b.time_s) {
                Some(a)
            } else {
                Some(b)
            }
        }
        (b, a) => b.or(a),
    }
}

/// Extracts session keys such as `IT3` or `NY12` from file names.
pub struct SessionKeyMatcher {
    pattern: Regex,
}

impl SessionKeyMatcher {
    pub fn new() -> Result<Self, regex::Error> {
        Ok(Self {
            pattern: Regex::new(r"(?i)(IT|NY)\s*[-_]?\s*(\d+)")?,
        })
    }

    /// Upper-cased prefix followed by the digits, from the file stem.
    pub fn key(&self, file_name: &str) -> Option<String> {
        let stem = std::path::Path::new(file_name)
            .file_stem()
            .and_then(|s| s.to_str())
            .unwrap_or(file_name);
        let caps = self.pattern.captures(stem)?;
        Some(format!("{}{}", caps[1].to_ascii_uppercase(), &caps[2]))
    }
}
