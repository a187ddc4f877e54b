//! Configuration loading from files and environment overrides.

mod support;

use std::fs;
use std::path::PathBuf;

use tempfile::TempDir;

use cloudcam::CloudcamConfig;
use support::with_scoped_env;

#[test]
fn test_shipped_config_matches_defaults() {
    let path = PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("cloudcam.toml");
    let config = CloudcamConfig::from_file(&path).unwrap();
    let defaults = CloudcamConfig::default();

    assert_eq!(config.device.address(), defaults.device.address());
    assert_eq!(config.exposure.target_mean, defaults.exposure.target_mean);
    assert_eq!(config.schedule.summary_interval(), defaults.schedule.summary_interval());
    assert_eq!(config.renderer.extra_args, defaults.renderer.extra_args);
    assert_eq!(config.brightness.sky_mask.len(), 18);
    assert_eq!(config.calibration_path(), defaults.calibration_path());
}

#[test]
fn test_env_overrides_file_values() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("cloudcam.toml");
    fs::write(&path, "[device]\nhost = \"10.0.0.5\"\nport = 915\n").unwrap();

    let config = with_scoped_env(
        &[
            ("CLOUDCAM_CONFIG", Some(path.to_str().unwrap())),
            ("CLOUDCAM_DEVICE_HOST", Some("10.0.0.9")),
            ("CLOUDCAM_DEVICE_PORT", Some("9150")),
            ("CLOUDCAM_WORK_DIR", Some("/data/cloudcams")),
        ],
        CloudcamConfig::load,
    )
    .unwrap();

    assert_eq!(config.device.address(), "10.0.0.9:9150");
    assert_eq!(
        config.raw_images_root(),
        PathBuf::from("/data/cloudcams/cloudcamimages")
    );
    assert_eq!(
        config.solver_output_dir(),
        PathBuf::from("/data/cloudcams/astrometrynet_files")
    );
}

#[test]
fn test_invalid_port_override_is_rejected() {
    let result = with_scoped_env(
        &[
            ("CLOUDCAM_CONFIG", None),
            ("CLOUDCAM_DEVICE_PORT", Some("not-a-port")),
        ],
        CloudcamConfig::load,
    );
    let err = result.unwrap_err();
    assert_eq!(err.kind(), "configuration");
    assert!(err.to_string().contains("CLOUDCAM_DEVICE_PORT"));
}

#[test]
fn test_missing_explicit_config_is_an_error() {
    let result = with_scoped_env(
        &[("CLOUDCAM_CONFIG", Some("/nonexistent/cloudcam.toml"))],
        CloudcamConfig::load,
    );
    assert_eq!(result.unwrap_err().kind(), "configuration");
}

#[test]
fn test_invalid_blend_alpha_fails_validation() {
    let err = CloudcamConfig::from_toml_str("[renderer]\nblend_alpha = 1.5\n").unwrap_err();
    assert!(err.to_string().contains("blend_alpha"));
}
