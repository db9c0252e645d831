use std::collections::BTreeMap;
use std::fs::{self, File};
use std::io::{BufReader, BufWriter};
use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use serde::Serialize;

use cambp_core::apply::{read_coefficients, ApplyReport};
use cambp_core::io::{
    attach_reference_columns, read_beats, read_feature_table, read_finger_wave, read_phone_wave,
    write_summary, RawTable,
};
use cambp_core::waveform::{pair_wave_files, ChannelSummary};
use cambp_core::{
    BpPipeline, EstimatorKind, PipelineConfig, ReferenceAligner, SessionEvaluation,
    SessionKeyMatcher, SplitStrategy, Target, WaveformEvaluator,
};

#[derive(Parser)]
#[command(name = "cambp", about = "Camera blood-pressure model training and validation")]
struct Cli {
    /// TOML configuration; built-in defaults when omitted
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    cmd: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Attach reference BP to phone training exports and merge them
    Prepare {
        #[arg(long)]
        smartphone_dir: PathBuf,
        #[arg(long)]
        beats_dir: PathBuf,
        #[arg(long)]
        output_csv: PathBuf,
    },
    /// Cross-validate every method for one target
    Train {
        #[arg(long)]
        data_csv: PathBuf,
        #[arg(long, default_value = "SBP")]
        target: Target,
        #[arg(long)]
        split_strategy: Option<SplitStrategy>,
        #[arg(long)]
        n_splits: Option<usize>,
        #[arg(long)]
        estimator: Option<EstimatorKind>,
        /// Average test predictions over windows of this many seconds
        #[arg(long)]
        window_seconds: Option<f64>,
        #[arg(long, default_value = ".")]
        output_dir: PathBuf,
    },
    /// Compare finger reference waveforms with phone waveforms
    Waveforms {
        #[arg(long)]
        finger_dir: PathBuf,
        #[arg(long)]
        smartphone_dir: PathBuf,
        #[arg(long, default_value = ".")]
        output_dir: PathBuf,
    },
    /// Score exported coefficients on new data
    Apply {
        #[arg(long)]
        data_csv: PathBuf,
        #[arg(long)]
        coefficients: PathBuf,
        #[arg(long, default_value = "SBP")]
        target: Target,
        #[arg(long, default_value = ".")]
        output_dir: PathBuf,
    },
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let cli = Cli::parse();
    let mut config = PipelineConfig::load(cli.config.as_deref())
        .context("failed to load configuration")?;

    match cli.cmd {
        Commands::Prepare {
            smartphone_dir,
            beats_dir,
            output_csv,
        } => prepare(&config, &smartphone_dir, &beats_dir, &output_csv),
        Commands::Train {
            data_csv,
            target,
            split_strategy,
            n_splits,
            estimator,
            window_seconds,
            output_dir,
        } => {
            if let Some(s) = split_strategy {
                config.evaluation.strategy = s;
            }
            if let Some(n) = n_splits {
                config.evaluation.n_splits = n;
            }
            if let Some(e) = estimator {
                config.evaluation.estimator = e;
            }
            if let Some(w) = window_seconds {
                config.evaluation.window_s = w;
            }
            config.validate()?;
            train(config, &data_csv, target, &output_dir)
        }
        Commands::Waveforms {
            finger_dir,
            smartphone_dir,
            output_dir,
        } => waveforms(&config, &finger_dir, &smartphone_dir, &output_dir),
        Commands::Apply {
            data_csv,
            coefficients,
            target,
            output_dir,
        } => apply(&config, &data_csv, &coefficients, target, &output_dir),
    }
}

fn stamp() -> String {
    chrono::Local::now().format("%Y%m%d_%H%M%S").to_string()
}

/// Files in `dir` whose name ends with `suffix`, sorted.
fn list_files(dir: &Path, suffix: &str) -> Result<Vec<PathBuf>> {
    let mut files = Vec::new();
    for entry in fs::read_dir(dir).with_context(|| format!("cannot read directory {}", dir.display()))? {
        let path = entry?.path();
        let matches = path
            .file_name()
            .and_then(|n| n.to_str())
            .map_or(false, |n| n.ends_with(suffix));
        if path.is_file() && matches {
            files.push(path);
        }
    }
    files.sort();
    Ok(files)
}

fn file_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default()
}

fn write_json<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    let file = File::create(path).with_context(|| format!("cannot create {}", path.display()))?;
    serde_json::to_writer_pretty(BufWriter::new(file), value)?;
    println!("  wrote {}", path.display());
    Ok(())
}

fn prepare(config: &PipelineConfig, smartphone_dir: &Path, beats_dir: &Path, output_csv: &Path) -> Result<()> {
    let matcher = SessionKeyMatcher::new()?;
    let aligner = ReferenceAligner::new(config.reference.clone());

    let mut beats_by_key: BTreeMap<String, PathBuf> = BTreeMap::new();
    for path in list_files(beats_dir, ".csv")? {
        if let Some(key) = matcher.key(&file_name(&path)) {
            beats_by_key.insert(key, path);
        }
    }
    if beats_by_key.is_empty() {
        bail!("no beats files with a session key in {}", beats_dir.display());
    }

    let mut tables = Vec::new();
    for phone_path in list_files(smartphone_dir, "_Training_Data.csv")? {
        let name = file_name(&phone_path);
        let key = match matcher.key(&name) {
            Some(k) => k,
            None => {
                log::warn!("no session key in file name, skipped: file={}", name);
                continue;
            }
        };
        let reference = match beats_by_key.get(&key) {
            Some(beats_path) => {
                let beats = read_beats(File::open(beats_path)?)
                    .with_context(|| format!("reading {}", beats_path.display()))?;
                Some(aligner.prepare(&beats)?)
            }
            None => {
                log::warn!(
                    "no beats file for session, reference left empty: session={} file={}",
                    key,
                    name
                );
                None
            }
        };
        let mut raw = RawTable::read(File::open(&phone_path)?)
            .with_context(|| format!("reading {}", phone_path.display()))?;
        let covered = attach_reference_columns(&mut raw, reference.as_ref(), &key, &name)?;
        println!("{}: {} rows, {} with reference", name, raw.len(), covered);
        tables.push(raw);
    }
    if tables.is_empty() {
        bail!("no Training_Data files could be paired in {}", smartphone_dir.display());
    }

    let merged = RawTable::concat(tables);
    if let Some(parent) = output_csv.parent() {
        fs::create_dir_all(parent)?;
    }
    merged.write(BufWriter::new(File::create(output_csv)?))?;
    println!("merged {} rows into {}", merged.len(), output_csv.display());
    Ok(())
}

fn train(config: PipelineConfig, data_csv: &Path, target: Target, output_dir: &Path) -> Result<()> {
    let table = read_feature_table(
        File::open(data_csv).with_context(|| format!("cannot open {}", data_csv.display()))?,
        &config.feature_columns(),
        &config.evaluation.group_column,
    )?;
    let report = BpPipeline::new(config).run(table, target)?;

    println!("\n{} ranking (mean over folds):", target);
    println!("{:<12} {:>8} {:>8} {:>8} {:>8}", "method", "MAPE%", "±", "MAE", "RMSE");
    for line in &report.summary {
        println!(
            "{:<12} {:>8.2} {:>8.2} {:>8.2} {:>8.2}",
            line.method, line.mape_mean, line.mape_std, line.mae_mean, line.rmse_mean
        );
    }

    fs::create_dir_all(output_dir)?;
    let stamp = stamp();
    write_json(
        &output_dir.join(format!("coefficients_{}_{}.json", target, stamp)),
        &report.coefficients,
    )?;
    write_json(
        &output_dir.join(format!("evaluation_details_{}_{}.json", target, stamp)),
        &report,
    )?;
    let summary_path = output_dir.join(format!("summary_{}_{}.csv", target, stamp));
    write_summary(BufWriter::new(File::create(&summary_path)?), &report.summary)?;
    println!("  wrote {}", summary_path.display());
    Ok(())
}

#[derive(Serialize)]
struct WaveformReport<'a> {
    sessions: &'a [SessionEvaluation],
    summary: Vec<ChannelSummary>,
}

fn waveforms(config: &PipelineConfig, finger_dir: &Path, smartphone_dir: &Path, output_dir: &Path) -> Result<()> {
    let wf = &config.waveform;
    let evaluator = WaveformEvaluator::new(wf.clone())?;
    let pairs = pair_wave_files(
        &list_files(finger_dir, ".txt")?,
        &list_files(smartphone_dir, "_Wave_Data.csv")?,
    );
    if pairs.is_empty() {
        bail!("no finger/phone waveform pairs found");
    }

    let mut sessions = Vec::new();
    for pair in &pairs {
        let finger = read_finger_wave(BufReader::new(File::open(&pair.finger)?), wf.channels.len())
            .with_context(|| format!("reading {}", pair.finger.display()))?;
        let phone = read_phone_wave(File::open(&pair.phone)?, &wf.phone_time_column, &wf.channels)
            .with_context(|| format!("reading {}", pair.phone.display()))?;
        match evaluator.evaluate_session(&pair.key, &finger, &phone) {
            Ok(s) => sessions.push(s),
            Err(e) => log::warn!("waveform session skipped: session={} error={}", pair.key, e),
        }
    }

    let summary = evaluator.aggregate(&sessions);
    println!("\nwaveform agreement over {} sessions:", sessions.len());
    for ch in &summary {
        println!(
            "{:<8} n={:<7} MAPE={:>6.2}% MAE={:.3} RMSE={:.3} r={:.3}",
            ch.channel, ch.metrics.n_samples, ch.metrics.mape, ch.metrics.mae, ch.metrics.rmse, ch.metrics.correlation
        );
    }

    fs::create_dir_all(output_dir)?;
    write_json(
        &output_dir.join(format!("waveform_metrics_{}.json", stamp())),
        &WaveformReport {
            sessions: &sessions,
            summary,
        },
    )
}

fn apply(
    config: &PipelineConfig,
    data_csv: &Path,
    coefficients: &Path,
    target: Target,
    output_dir: &Path,
) -> Result<()> {
    let models = read_coefficients(BufReader::new(File::open(coefficients)?))
        .with_context(|| format!("reading {}", coefficients.display()))?;
    let mut features: Vec<String> = Vec::new();
    for f in models.values().flat_map(|m| m.feature_names.iter()) {
        if !features.contains(f) {
            features.push(f.clone());
        }
    }
    let table = read_feature_table(File::open(data_csv)?, &features, &config.evaluation.group_column)?;

    let mut reports: Vec<ApplyReport> = Vec::new();
    for (method, model) in &models {
        if let Some(report) = model.evaluate(method, &table, target)? {
            println!(
                "{:<12} n={:<6} MAPE={:>6.2}% MAE={:.2} RMSE={:.2} bias={:+.2} sd={:.2}",
                method, report.n_samples, report.mape, report.mae, report.rmse, report.bias, report.std_error
            );
            reports.push(report);
        }
    }
    if reports.is_empty() {
        bail!("no method could be evaluated on {}", data_csv.display());
    }

    fs::create_dir_all(output_dir)?;
    write_json(
        &output_dir.join(format!("apply_results_{}_{}.json", target, stamp())),
        &reports,
    )
}
