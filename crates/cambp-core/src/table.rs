//! Typed training table: one row per smartphone feature sample.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::PipelineError;

/// Reference blood-pressure target.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Target {
    #[serde(rename = "SBP")]
    Sbp,
    #[serde(rename = "DBP")]
    Dbp,
}

impl Target {
    pub fn column(&self) -> &'static str {
        match self {
            Target::Sbp => "ref_SBP",
            Target::Dbp => "ref_DBP",
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            Target::Sbp => "SBP",
            Target::Dbp => "DBP",
        }
    }
}

impl fmt::Display for Target {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

impl FromStr for Target {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "SBP" | "REF_SBP" => Ok(Target::Sbp),
            "DBP" | "REF_DBP" => Ok(Target::Dbp),
            other => Err(format!("unknown target '{}', expected SBP or DBP", other)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TimeUnit {
    Seconds,
    Milliseconds,
}

impl TimeUnit {
    pub fn to_seconds(&self, value: f64) -> f64 {
        match self {
            TimeUnit::Seconds => value,
            TimeUnit::Milliseconds => value / 1000.0,
        }
    }
}

/// Time columns recognized in input tables, highest priority first.
pub const TIME_COLUMN_CANDIDATES: [(&str, TimeUnit); 3] = [
    ("経過時間_秒", TimeUnit::Seconds),
    ("elapsed_seconds", TimeUnit::Seconds),
    ("timestamp", TimeUnit::Milliseconds),
];

/// Pick the first recognized time column among `headers`.
pub fn detect_time_column<S: AsRef<str>>(headers: &[S]) -> Option<TimeSource> {
    TIME_COLUMN_CANDIDATES.iter().find_map(|(name, unit)| {
        headers
            .iter()
            .any(|h| h.as_ref() == *name)
            .then(|| TimeSource {
                column: name.to_string(),
                unit: *unit,
            })
    })
}

/// Which input column supplied the row times, and in what unit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TimeSource {
    pub column: String,
    pub unit: TimeUnit,
}

/// Group used when the input carries no group column.
pub const DEFAULT_GROUP: &str = "subject_1";

#[derive(Debug, Clone, PartialEq)]
pub struct FeatureRow {
    pub group: String,
    /// Elapsed time in seconds, regardless of the source unit
    pub elapsed_s: Option<f64>,
    /// Feature cells in table column order; NaN marks a missing cell
    pub features: Vec<f64>,
    pub ref_sbp: Option<f64>,
    pub ref_dbp: Option<f64>,
}

impl FeatureRow {
    pub fn target(&self, target: Target) -> Option<f64> {
        match target {
            Target::Sbp => self.ref_sbp,
            Target::Dbp => self.ref_dbp,
        }
    }

    pub fn set_target(&mut self, target: Target, value: Option<f64>) {
        match target {
            Target::Sbp => self.ref_sbp = value,
            Target::Dbp => self.ref_dbp = value,
        }
    }

    /// Elapsed time or NaN, for sorting and arithmetic.
    pub fn time_or_nan(&self) -> f64 {
        self.elapsed_s.unwrap_or(f64::NAN)
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct FeatureTable {
    feature_names: Vec<String>,
    time_source: Option<TimeSource>,
    rows: Vec<FeatureRow>,
}

impl FeatureTable {
    pub fn new(
        feature_names: Vec<String>,
        time_source: Option<TimeSource>,
        rows: Vec<FeatureRow>,
    ) -> Result<Self, PipelineError> {
        if let Some(bad) = rows.iter().find(|r| r.features.len() != feature_names.len()) {
            return Err(PipelineError::DimensionMismatch {
                expected: feature_names.len(),
                got: bad.features.len(),
            });
        }
        Ok(Self {
            feature_names,
            time_source,
            rows,
        })
    }

    pub fn feature_names(&self) -> &[String] {
        &self.feature_names
    }

    pub fn feature_index(&self, name: &str) -> Option<usize> {
        self.feature_names.iter().position(|f| f == name)
    }

    pub fn time_source(&self) -> Option<&TimeSource> {
        self.time_source.as_ref()
    }

    pub fn has_time(&self) -> bool {
        self.time_source.is_some()
    }

    pub fn rows(&self) -> &[FeatureRow] {
        &self.rows
    }

    pub fn rows_mut(&mut self) -> &mut [FeatureRow] {
        &mut self.rows
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn retain<F: FnMut(&FeatureRow) -> bool>(&mut self, f: F) {
        self.rows.retain(f);
    }

    /// Stable sort of rows.
    pub fn sort_rows_by<F>(&mut self, compare: F)
    where
        F: FnMut(&FeatureRow, &FeatureRow) -> std::cmp::Ordering,
    {
        self.rows.sort_by(compare);
    }

    /// Distinct groups in order of first appearance.
    pub fn groups(&self) -> Vec<String> {
        let mut out: Vec<String> = Vec::new();
        for row in &self.rows {
            if !out.iter().any(|g| g == &row.group) {
                out.push(row.group.clone());
            }
        }
        out
    }

    /// Feature names from `wanted` that exist in this table, in `wanted` order.
    pub fn present_features(&self, wanted: &[String]) -> Vec<String> {
        wanted
            .iter()
            .filter(|w| self.feature_index(w).is_some())
            .cloned()
            .collect()
    }
}
