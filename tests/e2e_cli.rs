//! CLI end-to-end tests
//!
//! Tests for the webmforge command-line interface.

use assert_cmd::prelude::*;
use predicates::prelude::*;
use std::fs;
use std::process::Command;
use tempfile::tempdir;

/// Get a command for the webmforge binary
#[allow(deprecated)]
fn webmforge_cmd() -> Command {
    Command::cargo_bin("webmforge").unwrap()
}

#[test]
fn test_cli_no_args_shows_help() {
    let mut cmd = webmforge_cmd();
    cmd.assert()
        .failure()
        .stderr(predicate::str::contains("Usage"));
}

#[test]
fn test_cli_help_flag() {
    let mut cmd = webmforge_cmd();
    cmd.arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("webmforge"))
        .stdout(predicate::str::contains("Usage"));
}

#[test]
fn test_cli_version_flag() {
    let mut cmd = webmforge_cmd();
    cmd.arg("--version")
        .assert()
        .success()
        .stdout(predicate::str::contains("webmforge"));
}

#[test]
fn test_cli_version_command() {
    let mut cmd = webmforge_cmd();
    cmd.arg("version")
        .assert()
        .success()
        .stdout(predicate::str::contains(env!("CARGO_PKG_VERSION")));
}

#[test]
fn test_cli_start_help() {
    let mut cmd = webmforge_cmd();
    cmd.args(["start", "--help"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Start the conversion server"))
        .stdout(predicate::str::contains("--port"));
}

#[test]
fn test_cli_check_tools_lists_both_tools() {
    let dir = tempdir().unwrap();
    let mut cmd = webmforge_cmd();
    cmd.current_dir(dir.path())
        .arg("check-tools")
        .assert()
        .success()
        .stdout(predicate::str::contains("yt-dlp"))
        .stdout(predicate::str::contains("ffmpeg"));
}

#[test]
fn test_cli_check_tools_reports_missing_configured_path() {
    let dir = tempdir().unwrap();
    let config_path = dir.path().join("config.toml");
    fs::write(
        &config_path,
        r#"
[tools]
ytdlp_path = "/nonexistent/yt-dlp"
ffmpeg_path = "/nonexistent/ffmpeg"
"#,
    )
    .unwrap();

    let mut cmd = webmforge_cmd();
    cmd.current_dir(dir.path())
        .args(["-c", config_path.to_str().unwrap(), "check-tools"])
        .env("PATH", dir.path())
        .assert()
        .success()
        .stdout(predicate::str::contains("✗ yt-dlp"))
        .stdout(predicate::str::contains("Some tools are missing"));
}

#[test]
fn test_cli_validate_defaults() {
    let dir = tempdir().unwrap();
    let mut cmd = webmforge_cmd();
    cmd.current_dir(dir.path())
        .arg("validate")
        .assert()
        .success()
        .stdout(predicate::str::contains("using defaults"))
        .stdout(predicate::str::contains("0.0.0.0:5000"))
        .stdout(predicate::str::contains("temp_videos"));
}

#[test]
fn test_cli_validate_config_file() {
    let dir = tempdir().unwrap();
    let config_path = dir.path().join("webmforge.toml");
    fs::write(
        &config_path,
        r#"
[server]
host = "127.0.0.1"
port = 8080

[storage]
work_dir = "/tmp/webm-work"
orphan_max_age_secs = 0
"#,
    )
    .unwrap();

    let mut cmd = webmforge_cmd();
    cmd.arg("validate")
        .arg(&config_path)
        .assert()
        .success()
        .stdout(predicate::str::contains("Configuration is valid"))
        .stdout(predicate::str::contains("127.0.0.1:8080"))
        .stdout(predicate::str::contains("Orphan sweep: disabled"));
}

#[test]
fn test_cli_validate_rejects_bad_config() {
    let dir = tempdir().unwrap();
    let config_path = dir.path().join("config.toml");
    fs::write(&config_path, "[server]\nport = 0\n").unwrap();

    let mut cmd = webmforge_cmd();
    cmd.arg("validate")
        .arg(&config_path)
        .assert()
        .failure();
}

#[test]
fn test_cli_validate_rejects_malformed_toml() {
    let dir = tempdir().unwrap();
    let config_path = dir.path().join("config.toml");
    fs::write(&config_path, "this is not = = toml").unwrap();

    let mut cmd = webmforge_cmd();
    cmd.args(["validate", config_path.to_str().unwrap()])
        .assert()
        .failure();
}

#[test]
fn test_cli_missing_config_file_fails() {
    let mut cmd = webmforge_cmd();
    cmd.args(["-c", "/nonexistent/webmforge.toml", "validate"])
        .assert()
        .failure();
}
