//! Waveform agreement between the finger reference sensor and the phone
//!
//! Both sides are cleaned with a MAD outlier pass and normalized to a common
//! amplitude range. The finger signal is low-passed before it is read off at
//! the phone's sample times, and the phone signal is range-aligned onto it.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use ndarray::Array1;
use serde::Serialize;

use cambp_signals::dsp::{align_to_reference, normalize_to_range, remove_mad_outliers};
use cambp_signals::{AntiAliasConfig, AntiAliasFilter, TemporalAligner, TimeSeries};

use crate::config::WaveformConfig;
use crate::error::PipelineError;
use crate::metrics::{compute_metrics, AgreementMetrics, BlandAltman, MetricsAggregator};

/// Finger sensor channels sampled uniformly from t = 0.
#[derive(Debug, Clone, PartialEq)]
pub struct FingerWave {
    pub channels: Vec<Vec<f64>>,
}

/// Phone channels on the phone's elapsed-time axis.
#[derive(Debug, Clone, PartialEq)]
pub struct PhoneWave {
    pub times: Vec<f64>,
    pub channels: Vec<Vec<f64>>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChannelResult {
    pub channel: String,
    #[serde(flatten)]
    pub metrics: AgreementMetrics,
    pub scale: f64,
    pub offset: f64,
}

/// Reference and aligned phone values on the phone time axis.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AlignedChannel {
    pub channel: String,
    pub reference: Vec<f64>,
    pub estimate: Vec<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SessionEvaluation {
    pub key: String,
    pub channels: Vec<ChannelResult>,
    #[serde(skip)]
    pub aligned: Vec<AlignedChannel>,
}

/// Metrics on the concatenation of every session's aligned series.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChannelSummary {
    pub channel: String,
    pub n_sessions: usize,
    #[serde(flatten)]
    pub metrics: AgreementMetrics,
    pub bland_altman: Option<BlandAltman>,
}

pub struct WaveformEvaluator {
    config: WaveformConfig,
    filter: AntiAliasFilter,
}

impl WaveformEvaluator {
    pub fn new(config: WaveformConfig) -> Result<Self, PipelineError> {
        let filter = AntiAliasFilter::with_config(AntiAliasConfig {
            sampling_rate_hz: config.finger_rate_hz,
            cutoff_hz: config.cutoff_hz,
            order: config.filter_order,
        })?;
        Ok(Self { config, filter })
    }

    pub fn config(&self) -> &WaveformConfig {
        &self.config
    }

    fn range_width(&self) -> f64 {
        self.config.normalized_range[1] - self.config.normalized_range[0]
    }

    fn clean(&self, values: &[f64]) -> Vec<f64> {
        let [lo, hi] = self.config.normalized_range;
        normalize_to_range(&remove_mad_outliers(values, self.config.mad_threshold), lo, hi)
    }

    pub fn evaluate_session(
        &self,
        key: &str,
        finger: &FingerWave,
        phone: &PhoneWave,
    ) -> Result<SessionEvaluation, PipelineError> {
        let n_channels = self.config.channels.len();
        if finger.channels.len() != n_channels || phone.channels.len() != n_channels {
            return Err(PipelineError::InvalidInput(format!(
                "session {}: expected {} channels, finger has {}, phone has {}",
                key,
                n_channels,
                finger.channels.len(),
                phone.channels.len()
            )));
        }
        if let Some(bad) = phone.channels.iter().find(|c| c.len() != phone.times.len()) {
            return Err(PipelineError::DimensionMismatch {
                expected: phone.times.len(),
                got: bad.len(),
            });
        }

        let mut channels = Vec::with_capacity(n_channels);
        let mut aligned = Vec::with_capacity(n_channels);
        for (c, name) in self.config.channels.iter().enumerate() {
            let finger_clean = self.clean(&finger.channels[c]);
            let filtered = self.filter.filter(&Array1::from(finger_clean)).values.to_vec();
            let finger_series = TimeSeries::uniform(filtered, self.config.finger_rate_hz, 0.0)?;
            let reference = TemporalAligner::interpolate_onto(&finger_series, &phone.times);

            let phone_clean = self.clean(&phone.channels[c]);
            let alignment = align_to_reference(&reference, &phone_clean);
            let metrics = compute_metrics(&reference, &alignment.values, self.range_width());

            log::info!(
                "waveform channel: session={} channel={} n={} mape={:.2} mae={:.4} rmse={:.4} bias={:.4} corr={:.3} scale={:.3} offset={:.3}",
                key,
                name,
                metrics.n_samples,
                metrics.mape,
                metrics.mae,
                metrics.rmse,
                metrics.bias,
                metrics.correlation,
                alignment.scale,
                alignment.offset
            );

            channels.push(ChannelResult {
                channel: name.clone(),
                metrics,
                scale: alignment.scale,
                offset: alignment.offset,
            });
            aligned.push(AlignedChannel {
                channel: name.clone(),
                reference,
                estimate: alignment.values,
            });
        }

        Ok(SessionEvaluation {
            key: key.to_string(),
            channels,
            aligned,
        })
    }

    /// Per-channel metrics over all sessions' aligned series concatenated.
    pub fn aggregate(&self, sessions: &[SessionEvaluation]) -> Vec<ChannelSummary> {
        self.config
            .channels
            .iter()
            .map(|name| {
                let mut agg = MetricsAggregator::new();
                for series in sessions.iter().flat_map(|s| s.aligned.iter()).filter(|a| &a.channel == name) {
                    agg.push(&series.reference, &series.estimate);
                }
                ChannelSummary {
                    channel: name.clone(),
                    n_sessions: agg.sessions(),
                    metrics: agg.metrics(self.range_width()),
                    bland_altman: agg.bland_altman(),
                }
            })
            .collect()
    }
}

/// Pairing key of a waveform file: the stem up to the first `-`, `_` or
/// space (checked in that order), upper-cased.
pub fn wave_key(file_name: &str) -> String {
    let stem = Path::new(file_name)
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or(file_name);
    let head = ["-", "_", " "]
        .iter()
        .find(|sep| stem.contains(**sep))
        .and_then(|sep| stem.split(*sep).next())
        .unwrap_or(stem);
    head.to_uppercase()
}

#[derive(Debug, Clone, PartialEq)]
pub struct WavePair {
    pub key: String,
    pub finger: PathBuf,
    pub phone: PathBuf,
}

/// Match finger files to phone files by [`wave_key`]; unmatched finger files
/// are logged and skipped. Output is ordered by key.
pub fn pair_wave_files(finger: &[PathBuf], phone: &[PathBuf]) -> Vec<WavePair> {
    let phone_by_key: BTreeMap<String, &PathBuf> = phone
        .iter()
        .map(|p| (wave_key(&p.to_string_lossy()), p))
        .collect();

    let mut pairs: Vec<WavePair> = finger
        .iter()
        .filter_map(|f| {
            let key = wave_key(&f.to_string_lossy());
            match phone_by_key.get(&key) {
                Some(p) => Some(WavePair {
                    key,
                    finger: f.clone(),
                    phone: (*p).clone(),
                }),
                None => {
                    log::warn!("no phone waveform for finger file: file={} key={}", f.display(), key);
                    None
                }
            }
        })
        .collect();
    pairs.sort_by(|a, b| a.key.cmp(&b.key));
    pairs
}
