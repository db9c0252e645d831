//! cambp-core: training and validation of camera blood-pressure models.
//!
//! Reference beats are aligned onto smartphone feature rows, cleaned of
//! physiologically implausible and statistically outlying samples, and each
//! configured feature method is cross-validated with a linear estimator.
//! Averaged coefficients are exported for on-device use.

#![allow(clippy::needless_range_loop)]
#![allow(clippy::too_many_arguments)]

pub mod apply;
pub mod config;
pub mod cv;
pub mod error;
pub mod evaluator;
pub mod io;
pub mod metrics;
pub mod outlier;
pub mod pipeline;
pub mod reference;
pub mod regression;
pub mod table;
pub mod waveform;
pub mod window;

#[cfg(test)]
pub mod tests_config;
#[cfg(test)]
pub mod tests_proptest;

// Configuration
pub use config::{
    ConfigError, EvaluationConfig, MethodSpec, OutlierConfig, PipelineConfig, ReferenceConfig,
    WaveformConfig,
};

// Errors
pub use error::{PipelineError, RegressionError};

// Data model
pub use reference::{AlignedReference, ReferenceAligner, ReferenceBeat, SessionKeyMatcher};
pub use table::{FeatureRow, FeatureTable, Target, TimeSource, TimeUnit, DEFAULT_GROUP};

// Cleaning and splitting
pub use cv::{CrossValidator, Fold, SplitStrategy};
pub use outlier::{FeatureOutlierReport, OutlierRejector, OutlierReport};

// Modeling
pub use evaluator::{
    EvaluationResult, FoldDiagnostics, FoldEvaluator, FoldObserver, FoldResult, LogObserver,
};
pub use regression::{EstimatorKind, LinearFit, Regressor, StandardScaler};
pub use window::WindowAggregator;

// Reporting
pub use apply::{ApplyReport, CoefficientModel, CoefficientSet};
pub use metrics::{AgreementMetrics, BlandAltman, MetricsAggregator};
pub use pipeline::{BpPipeline, MethodSummary, PipelineReport};
pub use waveform::{FingerWave, PhoneWave, SessionEvaluation, WaveformEvaluator};
