//! CLI tests: spawn the `dropconvert` binary and check exit codes.
//!
//! The interpreter candidates point at a name that cannot exist, so no host
//! tooling is touched.

use std::path::Path;
use std::process::Command;

use dropconvert::exit_codes;
use dropconvert::io::config::{BridgeConfig, write_config};

fn write_unusable_config(dir: &Path) -> std::path::PathBuf {
    let mut config = BridgeConfig::default();
    config.interpreter.candidates = vec!["dropconvert-no-such-interpreter".to_string()];
    config.interpreter.extra_install_paths = vec![dir.join("missing-python")];
    config.secondary.enabled = false;
    config.working_dir = Some(dir.to_path_buf());
    config.exchange_dir = Some(dir.join("exchange"));
    let path = dir.join("dropconvert.toml");
    write_config(&path, &config).expect("write config");
    path
}

#[test]
fn doctor_reports_unavailable_interpreter() {
    let temp = tempfile::tempdir().expect("tempdir");
    let config = write_unusable_config(temp.path());

    let output = Command::new(env!("CARGO_BIN_EXE_dropconvert"))
        .arg("--config")
        .arg(&config)
        .arg("doctor")
        .output()
        .expect("dropconvert doctor");

    assert_eq!(output.status.code(), Some(exit_codes::FAILED));
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("interpreter: unavailable"));
}

#[test]
fn convert_without_interpreter_exits_aborted() {
    let temp = tempfile::tempdir().expect("tempdir");
    let config = write_unusable_config(temp.path());
    let input = temp.path().join("a.docx");
    std::fs::write(&input, b"x").expect("write input");

    let output = Command::new(env!("CARGO_BIN_EXE_dropconvert"))
        .arg("--config")
        .arg(&config)
        .arg("convert")
        .arg(&input)
        .output()
        .expect("dropconvert convert");

    assert_eq!(output.status.code(), Some(exit_codes::ABORTED));
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("conversion aborted: no usable interpreter was found"));
    assert!(!temp.path().join("exchange").exists());
}

#[test]
fn invalid_config_exits_failed() {
    let temp = tempfile::tempdir().expect("tempdir");
    let config = temp.path().join("dropconvert.toml");
    std::fs::write(&config, "output_limit_bytes = 0\n").expect("write config");

    let status = Command::new(env!("CARGO_BIN_EXE_dropconvert"))
        .arg("--config")
        .arg(&config)
        .arg("doctor")
        .status()
        .expect("dropconvert doctor");

    assert_eq!(status.code(), Some(exit_codes::FAILED));
}
