use icepersist::core::sieve::Connectivity;
use icepersist::{IceError, PipelineConfig};
use std::fs;
use tempfile::TempDir;

#[test]
fn test_config_loaded_from_file() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("icepersist.toml");
    fs::write(
        &path,
        r#"
        [layout]
        height = 448
        width = 304
        header_offset = 300

        [policy]
        codes = [251, 252, 253, 254, 255]
        ice_threshold = 38

        [consecutive_day_filter]
        day_range = 1

        [noise.sieve]
        threshold = 4
        connectivity = "Four"

        [reprojection]
        target_epsg = 3413
        resolution = 12500.0
        "#,
    )
    .unwrap();

    let config = PipelineConfig::from_toml_file(&path).unwrap();
    assert!(config.coastal_filter.is_some());
    assert_eq!(config.consecutive_day_filter.map(|c| c.day_range), Some(1));
    assert_eq!(config.noise.sieve.threshold, 4);
    assert_eq!(config.noise.sieve.connectivity, Connectivity::Four);
    let reprojection = config.reprojection.unwrap();
    assert_eq!(reprojection.target_epsg, 3413);
    assert_eq!(reprojection.resolution, 12500.0);
}

#[test]
fn test_default_config_written_and_reloaded() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("defaults.toml");
    let config = PipelineConfig::default();
    fs::write(&path, config.to_toml_string().unwrap()).unwrap();

    assert_eq!(PipelineConfig::from_toml_file(&path).unwrap(), config);
}

#[test]
fn test_malformed_file_is_config_error() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("broken.toml");
    fs::write(&path, "[noise\nthreshold = ").unwrap();

    let err = PipelineConfig::from_toml_file(&path).unwrap_err();
    assert!(matches!(err, IceError::Config(_)));
}
