use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use thiserror::Error;

use crate::cv::SplitStrategy;
use crate::regression::EstimatorKind;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("TOML parse error: {0}")]
    TomlParse(#[from] toml::de::Error),
    #[error("Config validation error: {0}")]
    Validation(String),
    #[error("Environment variable error: {0}")]
    EnvVar(#[from] std::env::VarError),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineConfig {
    pub reference: ReferenceConfig,
    pub outliers: OutlierConfig,
    pub evaluation: EvaluationConfig,
    pub waveform: WaveformConfig,
    pub methods: Vec<MethodSpec>,
}

/// Reference (beat-to-beat monitor) alignment settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReferenceConfig {
    /// Length of the trailing window kept from each recording, seconds
    pub window_s: f64,
    /// Optional uniform resampling rate applied before interpolation
    #[serde(default)]
    pub resample_hz: Option<f64>,
    /// Anti-alias cutoff used when resampling
    pub antialias_cutoff_hz: f64,
    pub filter_order: usize,
    /// Tolerance for the nearest-timestamp join, milliseconds
    pub merge_tolerance_ms: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutlierConfig {
    /// Inclusive physiological range for systolic pressure, mmHg
    pub sbp_range: [f64; 2],
    /// Inclusive physiological range for diastolic pressure, mmHg
    pub dbp_range: [f64; 2],
    pub z_threshold: f64,
    /// Multiple of the group std a sample may deviate from its neighbors
    pub temporal_threshold: f64,
    pub feature_z_threshold: f64,
    pub min_group_size: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EvaluationConfig {
    pub strategy: SplitStrategy,
    pub n_splits: usize,
    pub estimator: EstimatorKind,
    /// Window for averaging test predictions; <= 0 disables
    pub window_s: f64,
    pub group_column: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WaveformConfig {
    pub finger_rate_hz: f64,
    pub cutoff_hz: f64,
    pub filter_order: usize,
    /// Modified z-score above which a sample is replaced
    pub mad_threshold: f64,
    pub normalized_range: [f64; 2],
    pub channels: Vec<String>,
    pub phone_time_column: String,
}

/// A named group of feature columns evaluated together.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MethodSpec {
    pub name: String,
    pub features: Vec<String>,
}

impl MethodSpec {
    pub fn new(name: &str, features: &[&str]) -> Self {
        Self {
            name: name.to_string(),
            features: features.iter().map(|f| f.to_string()).collect(),
        }
    }
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            reference: ReferenceConfig::default(),
            outliers: OutlierConfig::default(),
            evaluation: EvaluationConfig::default(),
            waveform: WaveformConfig::default(),
            methods: default_methods(),
        }
    }
}

impl Default for ReferenceConfig {
    fn default() -> Self {
        Self {
            window_s: 60.0,
            resample_hz: None,
            antialias_cutoff_hz: 15.0,
            filter_order: 4,
            merge_tolerance_ms: 1000.0,
        }
    }
}

impl Default for OutlierConfig {
    fn default() -> Self {
        Self {
            sbp_range: [60.0, 200.0],
            dbp_range: [40.0, 150.0],
            z_threshold: 3.0,
            temporal_threshold: 3.0,
            feature_z_threshold: 3.0,
            min_group_size: 3,
        }
    }
}

impl Default for EvaluationConfig {
    fn default() -> Self {
        Self {
            strategy: SplitStrategy::Group,
            n_splits: 5,
            estimator: EstimatorKind::Ridge,
            window_s: 0.0,
            group_column: "subject_id".to_string(),
        }
    }
}

impl Default for WaveformConfig {
    fn default() -> Self {
        Self {
            finger_rate_hz: 409.6,
            cutoff_hz: 15.0,
            filter_order: 4,
            mad_threshold: 3.5,
            normalized_range: [0.0, 10.0],
            channels: vec!["Green".to_string(), "SinWave".to_string()],
            phone_time_column: "経過時間_秒".to_string(),
        }
    }
}

/// RealTimeBP, SinBP_D and SinBP_M feature sets.
pub fn default_methods() -> Vec<MethodSpec> {
    vec![
        MethodSpec::new("RealTimeBP", &["M1_A", "M1_HR", "M1_V2P_relTTP", "M1_P2V_relTTP"]),
        MethodSpec::new(
            "SinBP_D",
            &["M2_A", "M2_HR", "M2_V2P_relTTP", "M2_P2V_relTTP", "M2_Stiffness", "M2_E"],
        ),
        MethodSpec::new("SinBP_M", &["M3_A", "M3_HR", "M3_Mean", "M3_Phi"]),
    ]
}

impl PipelineConfig {
    /// Load configuration from TOML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let content = fs::read_to_string(path)?;
        let config: PipelineConfig = toml::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration with environment variable overrides
    /// Environment variables are prefixed with CAMBP_
    /// Example: CAMBP_EVALUATION_N_SPLITS=3
    pub fn from_file_with_env<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let mut config = Self::from_file(path)?;
        config.apply_env_overrides()?;
        config.validate()?;
        Ok(config)
    }

    /// File (if given) or built-in defaults, then environment overrides.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut config = match path {
            Some(p) => Self::from_file(p)?,
            None => Self::default(),
        };
        config.apply_env_overrides()?;
        config.validate()?;
        Ok(config)
    }

    /// Apply environment variable overrides
    pub(crate) fn apply_env_overrides(&mut self) -> Result<(), ConfigError> {
        use std::env;

        // Reference overrides
        if let Ok(val) = env::var("CAMBP_REFERENCE_WINDOW_S") {
            self.reference.window_s = val.parse().map_err(|_| {
                ConfigError::Validation("Invalid CAMBP_REFERENCE_WINDOW_S".to_string())
            })?;
        }
        if let Ok(val) = env::var("CAMBP_REFERENCE_RESAMPLE_HZ") {
            self.reference.resample_hz = Some(val.parse().map_err(|_| {
                ConfigError::Validation("Invalid CAMBP_REFERENCE_RESAMPLE_HZ".to_string())
            })?);
        }

        // Outlier overrides
        if let Ok(val) = env::var("CAMBP_OUTLIERS_Z_THRESHOLD") {
            self.outliers.z_threshold = val.parse().map_err(|_| {
                ConfigError::Validation("Invalid CAMBP_OUTLIERS_Z_THRESHOLD".to_string())
            })?;
        }

        // Evaluation overrides
        if let Ok(val) = env::var("CAMBP_EVALUATION_N_SPLITS") {
            self.evaluation.n_splits = val.parse().map_err(|_| {
                ConfigError::Validation("Invalid CAMBP_EVALUATION_N_SPLITS".to_string())
            })?;
        }
        if let Ok(val) = env::var("CAMBP_EVALUATION_STRATEGY") {
            self.evaluation.strategy = val.parse().map_err(|_| {
                ConfigError::Validation("Invalid CAMBP_EVALUATION_STRATEGY".to_string())
            })?;
        }
        if let Ok(val) = env::var("CAMBP_EVALUATION_ESTIMATOR") {
            self.evaluation.estimator = val.parse().map_err(|_| {
                ConfigError::Validation("Invalid CAMBP_EVALUATION_ESTIMATOR".to_string())
            })?;
        }
        if let Ok(val) = env::var("CAMBP_EVALUATION_WINDOW_S") {
            self.evaluation.window_s = val.parse().map_err(|_| {
                ConfigError::Validation("Invalid CAMBP_EVALUATION_WINDOW_S".to_string())
            })?;
        }

        // Waveform overrides
        if let Ok(val) = env::var("CAMBP_WAVEFORM_CUTOFF_HZ") {
            self.waveform.cutoff_hz = val.parse().map_err(|_| {
                ConfigError::Validation("Invalid CAMBP_WAVEFORM_CUTOFF_HZ".to_string())
            })?;
        }

        Ok(())
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<(), ConfigError> {
        // Reference validation
        if !(self.reference.window_s > 0.0) {
            return Err(ConfigError::Validation(
                "reference.window_s must be positive".to_string(),
            ));
        }
        if let Some(rate) = self.reference.resample_hz {
            if !(rate > 0.0) {
                return Err(ConfigError::Validation(
                    "reference.resample_hz must be positive".to_string(),
                ));
            }
        }
        if !(self.reference.antialias_cutoff_hz > 0.0) {
            return Err(ConfigError::Validation(
                "reference.antialias_cutoff_hz must be positive".to_string(),
            ));
        }
        if self.reference.filter_order == 0 {
            return Err(ConfigError::Validation(
                "reference.filter_order must be >= 1".to_string(),
            ));
        }
        if self.reference.merge_tolerance_ms < 0.0 {
            return Err(ConfigError::Validation(
                "reference.merge_tolerance_ms must be non-negative".to_string(),
            ));
        }

        // Outlier validation
        for (name, range) in [
            ("outliers.sbp_range", self.outliers.sbp_range),
            ("outliers.dbp_range", self.outliers.dbp_range),
        ] {
            if !(range[0] < range[1]) {
                return Err(ConfigError::Validation(format!(
                    "{} must be an increasing [low, high] pair",
                    name
                )));
            }
        }
        if !(self.outliers.z_threshold > 0.0)
            || !(self.outliers.temporal_threshold > 0.0)
            || !(self.outliers.feature_z_threshold > 0.0)
        {
            return Err(ConfigError::Validation(
                "outliers thresholds must be positive".to_string(),
            ));
        }
        if self.outliers.min_group_size < 3 {
            return Err(ConfigError::Validation(
                "outliers.min_group_size must be >= 3".to_string(),
            ));
        }

        // Evaluation validation
        if self.evaluation.n_splits < 2 {
            return Err(ConfigError::Validation(
                "evaluation.n_splits must be >= 2".to_string(),
            ));
        }
        if self.evaluation.window_s.is_nan() {
            return Err(ConfigError::Validation(
                "evaluation.window_s must be a number".to_string(),
            ));
        }
        if self.evaluation.group_column.trim().is_empty() {
            return Err(ConfigError::Validation(
                "evaluation.group_column must not be empty".to_string(),
            ));
        }

        // Waveform validation
        if !(self.waveform.finger_rate_hz > 0.0) || !(self.waveform.cutoff_hz > 0.0) {
            return Err(ConfigError::Validation(
                "waveform rates must be positive".to_string(),
            ));
        }
        if self.waveform.filter_order == 0 {
            return Err(ConfigError::Validation(
                "waveform.filter_order must be >= 1".to_string(),
            ));
        }
        if !(self.waveform.mad_threshold > 0.0) {
            return Err(ConfigError::Validation(
                "waveform.mad_threshold must be positive".to_string(),
            ));
        }
        if !(self.waveform.normalized_range[0] < self.waveform.normalized_range[1]) {
            return Err(ConfigError::Validation(
                "waveform.normalized_range must be increasing".to_string(),
            ));
        }
        if self.waveform.channels.is_empty() {
            return Err(ConfigError::Validation(
                "waveform.channels must not be empty".to_string(),
            ));
        }

        // Method validation
        if self.methods.is_empty() {
            return Err(ConfigError::Validation(
                "at least one method must be configured".to_string(),
            ));
        }
        for method in &self.methods {
            if method.features.is_empty() {
                return Err(ConfigError::Validation(format!(
                    "method {} has no features",
                    method.name
                )));
            }
        }

        Ok(())
    }

    /// Union of all configured feature columns, first occurrence order.
    pub fn feature_columns(&self) -> Vec<String> {
        let mut out: Vec<String> = Vec::new();
        for f in self.methods.iter().flat_map(|m| m.features.iter()) {
            if !out.contains(f) {
                out.push(f.clone());
            }
        }
        out
    }

    /// Export configuration to TOML string
    pub fn to_toml_string(&self) -> Result<String, toml::ser::Error> {
        toml::to_string_pretty(self)
    }

    /// Save configuration to file
    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> Result<(), ConfigError> {
        let content = self
            .to_toml_string()
            .map_err(|e| ConfigError::Validation(format!("TOML serialization error: {}", e)))?;
        fs::write(path, content)?;
        Ok(())
    }
}
