#[cfg(test)]
mod tests {
    use crate::config::*;
    use crate::cv::SplitStrategy;
    use crate::regression::EstimatorKind;
    use std::env;
    use tempfile::NamedTempFile;

    #[test]
    fn test_default_config_valid() {
        let config = PipelineConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.methods.len(), 3);
    }

    #[test]
    fn test_config_validation_reference() {
        let mut config = PipelineConfig::default();
        config.reference.window_s = 0.0;
        assert!(config.validate().is_err());

        config.reference.window_s = 60.0;
        config.reference.resample_hz = Some(-1.0);
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_config_validation_outliers() {
        let mut config = PipelineConfig::default();

        // Range must be increasing
        config.outliers.sbp_range = [200.0, 60.0];
        assert!(config.validate().is_err());

        config.outliers.sbp_range = [60.0, 200.0];
        config.outliers.min_group_size = 2;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_config_validation_evaluation() {
        let mut config = PipelineConfig::default();
        config.evaluation.n_splits = 1;
        assert!(config.validate().is_err());

        config.evaluation.n_splits = 5;
        config.methods.clear();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_config_to_toml_string() {
        let config = PipelineConfig::default();
        let toml_str = config.to_toml_string().unwrap();

        assert!(toml_str.contains("[reference]"));
        assert!(toml_str.contains("[evaluation]"));
        assert!(toml_str.contains("[[methods]]"));
        assert!(toml_str.contains("merge_tolerance_ms"));
    }

    #[test]
    fn test_config_from_toml_string() {
        let toml_str = r#"
            [reference]
            window_s = 45.0
            antialias_cutoff_hz = 10.0
            filter_order = 2
            merge_tolerance_ms = 500.0

            [outliers]
            sbp_range = [70.0, 190.0]
            dbp_range = [40.0, 120.0]
            z_threshold = 2.5
            temporal_threshold = 3.0
            feature_z_threshold = 3.0
            min_group_size = 3

            [evaluation]
            strategy = "timeseries"
            n_splits = 4
            estimator = "huber"
            window_s = 10.0
            group_column = "subject_id"

            [waveform]
            finger_rate_hz = 409.6
            cutoff_hz = 15.0
            filter_order = 4
            mad_threshold = 3.5
            normalized_range = [0.0, 10.0]
            channels = ["Green"]
            phone_time_column = "経過時間_秒"

            [[methods]]
            name = "RealTimeBP"
            features = ["M1_A", "M1_HR"]
        "#;

        let config: PipelineConfig = toml::from_str(toml_str).unwrap();
        assert!(config.validate().is_ok());

        assert_eq!(config.reference.resample_hz, None);
        assert_eq!(config.evaluation.strategy, SplitStrategy::TimeSeries);
        assert_eq!(config.evaluation.estimator, EstimatorKind::Huber);
        assert_eq!(config.feature_columns(), vec!["M1_A".to_string(), "M1_HR".to_string()]);
    }

    #[test]
    fn test_config_save_and_load() {
        let mut config = PipelineConfig::default();
        config.evaluation.window_s = 30.0;

        let temp_file = NamedTempFile::new().unwrap();
        let path = temp_file.path();
        config.save_to_file(path).unwrap();

        let loaded = PipelineConfig::from_file(path).unwrap();
        assert_eq!(loaded.evaluation.window_s, 30.0);
        assert_eq!(loaded.methods, config.methods);
    }

    #[test]
    fn test_config_env_overrides() {
        env::set_var("CAMBP_EVALUATION_N_SPLITS", "3");
        env::set_var("CAMBP_EVALUATION_ESTIMATOR", "enet");
        env::set_var("CAMBP_REFERENCE_RESAMPLE_HZ", "50");

        let mut config = PipelineConfig::default();
        config.apply_env_overrides().unwrap();

        assert_eq!(config.evaluation.n_splits, 3);
        assert_eq!(config.evaluation.estimator, EstimatorKind::Enet);
        assert_eq!(config.reference.resample_hz, Some(50.0));

        env::remove_var("CAMBP_EVALUATION_N_SPLITS");
        env::remove_var("CAMBP_EVALUATION_ESTIMATOR");
        env::remove_var("CAMBP_REFERENCE_RESAMPLE_HZ");
    }

    #[test]
    fn test_feature_columns_deduplicated() {
        let mut config = PipelineConfig::default();
        config.methods = vec![
            MethodSpec::new("a", &["M1_A", "M1_HR"]),
            MethodSpec::new("b", &["M1_HR", "M2_A"]),
        ];
        assert_eq!(config.feature_columns(), vec!["M1_A", "M1_HR", "M2_A"]);
    }
}
