use cambp_core::apply::{read_coefficients, write_coefficients};
use cambp_core::io::{attach_reference_columns, read_beats, read_feature_table, RawTable};
use cambp_core::{
    BpPipeline, EstimatorKind, MethodSpec, PipelineConfig, ReferenceAligner, SessionKeyMatcher,
    SplitStrategy, Target,
};

const SESSIONS: [&str; 3] = ["IT1_beats.csv", "IT2_beats.csv", "NY3 beats.csv"];

/// Monitor export: one beat per second for 90 s. The last 60 s carry
/// `SBP = 100 + 0.5 r + 5 g`, `DBP = 70 + 0.2 r` with `r` window-relative.
fn beats_csv(g: usize) -> String {
    let mut out = String::from("\"Time [s]\";\"Beat Sys [mmHg]\";\"Beat Dia [mmHg]\"\n");
    for t in 0..=90 {
        let r = t as f64 - 30.0;
        out.push_str(&format!(
            "{};{};{}\n",
            t,
            100.0 + 0.5 * r + 5.0 * g as f64,
            70.0 + 0.2 * r
        ));
    }
    out
}

/// Phone rows at 0.5 s .. 59.5 s with `SBP = 40 + 2 A + HR` exactly.
fn phone_csv(g: usize) -> String {
    let mut out = String::from("経過時間_秒,M1_A,M1_HR,Green\n");
    for i in 0..60 {
        let r = i as f64 + 0.5;
        let sbp = 100.0 + 0.5 * r + 5.0 * g as f64;
        let hr = 60.0 + ((i * 7) % 10) as f64;
        let a = (sbp - 40.0 - hr) / 2.0;
        out.push_str(&format!("{},{},{},{}\n", r, a, hr, i));
    }
    out
}

fn merged_training_csv() -> Vec<u8> {
    let aligner = ReferenceAligner::new(PipelineConfig::default().reference);
    let matcher = SessionKeyMatcher::new().unwrap();

    let mut tables = Vec::new();
    for (g, file) in SESSIONS.iter().enumerate() {
        let key = matcher.key(file).unwrap();
        let beats = read_beats(beats_csv(g).as_bytes()).unwrap();
        let reference = aligner.prepare(&beats).unwrap();
        assert_eq!(reference.sbp.len(), 61);

        let mut raw = RawTable::read(phone_csv(g).as_bytes()).unwrap();
        let covered = attach_reference_columns(&mut raw, Some(&reference), &key, file).unwrap();
        assert_eq!(covered, 60);
        tables.push(raw);
    }

    let merged = RawTable::concat(tables);
    assert_eq!(merged.len(), 180);
    let mut buf = Vec::new();
    merged.write(&mut buf).unwrap();
    buf
}

fn config(estimator: EstimatorKind) -> PipelineConfig {
    let mut config = PipelineConfig::default();
    config.evaluation.estimator = estimator;
    config.methods = vec![
        MethodSpec::new("RealTimeBP", &["M1_A", "M1_HR", "M1_V2P_relTTP", "M1_P2V_relTTP"]),
        MethodSpec::new("SinBP_D", &["M2_A", "M2_HR"]),
    ];
    config
}

#[test]
fn prepared_sessions_train_to_exact_model() {
    let config = config(EstimatorKind::Ols);
    let csv = merged_training_csv();
    let table = read_feature_table(csv.as_slice(), &config.feature_columns(), "subject_id").unwrap();
    assert_eq!(table.len(), 180);
    assert_eq!(table.groups(), vec!["IT1", "IT2", "NY3"]);
    assert!(table.has_time());

    let report = BpPipeline::new(config).run(table, Target::Sbp).unwrap();
    assert_eq!(report.outliers.removed(), 0);
    assert_eq!(report.n_splits_used, 3);
    assert_eq!(report.skipped_methods, vec!["SinBP_D".to_string()]);

    let best = &report.summary[0];
    assert_eq!(best.method, "RealTimeBP");
    assert_eq!(best.n_folds, 3);
    assert!(best.mape_mean < 1e-6, "mape_mean={}", best.mape_mean);

    let model = &report.coefficients["RealTimeBP"];
    assert!((model.coefficients[0] - 2.0).abs() < 1e-6);
    assert!((model.coefficients[1] - 1.0).abs() < 1e-6);
    assert!((model.intercept - 40.0).abs() < 1e-4);
}

#[test]
fn dbp_target_uses_its_own_reference() {
    let config = config(EstimatorKind::Ridge);
    let csv = merged_training_csv();
    let table = read_feature_table(csv.as_slice(), &config.feature_columns(), "subject_id").unwrap();
    let report = BpPipeline::new(config).run(table, Target::Dbp).unwrap();

    assert_eq!(report.target, Target::Dbp);
    assert_eq!(report.methods.len(), 1);
    let result = &report.methods[0];
    assert_eq!(result.n_samples, 180);
    assert!(result.all_y_true.iter().all(|&v| (70.0..=82.0).contains(&v)));
    assert!(result.mape_mean.is_finite());
}

#[test]
fn time_series_strategy_averages_windows() {
    let mut config = config(EstimatorKind::Huber);
    config.evaluation.strategy = SplitStrategy::TimeSeries;
    config.evaluation.n_splits = 3;
    config.evaluation.window_s = 10.0;
    let csv = merged_training_csv();
    let table = read_feature_table(csv.as_slice(), &config.feature_columns(), "subject_id").unwrap();

    let report = BpPipeline::new(config).run(table, Target::Sbp).unwrap();
    assert_eq!(report.window_s_used, 10.0);
    let result = &report.methods[0];
    assert_eq!(result.folds.len(), 3);
    for fold in &result.folds {
        assert_eq!(fold.n_test, 45);
        assert!(fold.y_true.len() < fold.n_test);
        assert_eq!(fold.y_true.len(), fold.y_pred.len());
    }
}

#[test]
fn exported_coefficients_reproduce_predictions() {
    let config = config(EstimatorKind::Ols);
    let csv = merged_training_csv();
    let table = read_feature_table(csv.as_slice(), &config.feature_columns(), "subject_id").unwrap();
    let report = BpPipeline::new(config).run(table.clone(), Target::Sbp).unwrap();

    let mut json = Vec::new();
    write_coefficients(&mut json, &report.coefficients).unwrap();
    let loaded = read_coefficients(json.as_slice()).unwrap();

    let applied = loaded["RealTimeBP"]
        .evaluate("RealTimeBP", &table, Target::Sbp)
        .unwrap()
        .unwrap();
    assert_eq!(applied.n_samples, 180);
    assert!(applied.mae < 1e-4, "mae={}", applied.mae);
    assert!(applied.bias.abs() < 1e-4);
}
