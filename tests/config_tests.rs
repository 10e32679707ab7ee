// Integration tests for configuration loading

use std::path::PathBuf;

use anyhow::Result;
use speech_capture::Config;
use tempfile::TempDir;

#[test]
fn test_defaults_without_a_file() -> Result<()> {
    let cfg = Config::default();

    assert_eq!(cfg.logging.level, "info");
    assert_eq!(cfg.capture.sample_rate, 48000);
    assert_eq!(cfg.capture.channels, 1);
    assert_eq!(cfg.capture.frame_ms, 20);
    assert_eq!(cfg.meter.interval_ms, 16);
    assert_eq!(cfg.output.dir, PathBuf::from("recordings"));

    Ok(())
}

#[test]
fn test_file_overrides_selected_fields() -> Result<()> {
    let temp_dir = TempDir::new()?;
    let path = temp_dir.path().join("capture.toml");
    std::fs::write(
        &path,
        r#"
[logging]
level = "debug"

[capture]
sample_rate = 16000
channels = 2

[output]
dir = "/tmp/takes"
"#,
    )?;

    let cfg = Config::load(path.to_str())?;

    assert_eq!(cfg.logging.level, "debug");
    assert_eq!(cfg.capture.sample_rate, 16000);
    assert_eq!(cfg.capture.channels, 2);
    // Untouched fields keep their defaults
    assert_eq!(cfg.capture.frame_ms, 20);
    assert_eq!(cfg.meter.interval_ms, 16);
    assert_eq!(cfg.output.dir, PathBuf::from("/tmp/takes"));

    Ok(())
}

#[test]
fn test_missing_explicit_file_is_an_error() {
    let temp_dir = TempDir::new().unwrap();
    let path = temp_dir.path().join("absent.toml");

    assert!(Config::load(path.to_str()).is_err());
}
