//! Integration tests for core CLI contract behavior.

use {predicates::prelude::*, std::fs, tempfile::tempdir};

fn cli_cmd() -> assert_cmd::Command {
    let mut cmd = assert_cmd::cargo::cargo_bin_cmd!("seeedflash");
    cmd.env_remove("SEEEDFLASH_NON_INTERACTIVE")
        .env_remove("SEEEDFLASH_PORT")
        .env_remove("SEEEDFLASH_CATALOG")
        .env_remove("RUST_LOG");
    cmd
}

#[test]
fn help_exits_zero_and_writes_stdout_only() {
    cli_cmd()
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("seeedflash"))
        .stdout(predicate::str::contains("watch"))
        .stderr(predicate::str::is_empty());
}

#[test]
fn version_exits_zero_and_writes_stdout_only() {
    cli_cmd()
        .arg("--version")
        .assert()
        .success()
        .stdout(predicate::str::contains("seeedflash"))
        .stderr(predicate::str::is_empty());
}

#[test]
fn completions_command_writes_to_stdout() {
    cli_cmd()
        .args(["completions", "bash"])
        .assert()
        .success()
        .code(0)
        .stderr(predicate::str::is_empty())
        .stdout(predicate::str::contains("_seeedflash()"));
}

#[test]
#[cfg(unix)]
fn completions_without_shell_is_usage_error() {
    cli_cmd()
        .env_remove("SHELL")
        .arg("completions")
        .assert()
        .failure()
        .code(2)
        .stdout(predicate::str::is_empty())
        .stderr(predicate::str::contains("completions bash"));
}

#[test]
fn boards_json_lists_bundled_catalog() {
    let output = cli_cmd()
        .args(["boards", "--json"])
        .assert()
        .success()
        .get_output()
        .clone();

    let stdout = String::from_utf8(output.stdout).expect("stdout should be utf-8");
    let value: serde_json::Value = serde_json::from_str(&stdout).expect("valid JSON");
    let names: Vec<&str> = value["boards"]
        .as_array()
        .expect("boards array")
        .iter()
        .filter_map(|b| b["name"].as_str())
        .collect();
    assert!(names.contains(&"wio_terminal"));
    assert!(names.contains(&"xiao"));
    assert_eq!(value["actions"].as_array().map(Vec::len), Some(4));
}

#[test]
fn boards_text_goes_to_stderr() {
    cli_cmd()
        .arg("boards")
        .assert()
        .success()
        .stdout(predicate::str::is_empty())
        .stderr(predicate::str::contains("wio_terminal"));
}

#[test]
fn list_ports_json_returns_array() {
    let output = cli_cmd()
        .args(["list-ports", "--json"])
        .assert()
        .success()
        .get_output()
        .clone();

    let stdout = String::from_utf8(output.stdout).expect("stdout should be utf-8");
    let parsed: serde_json::Value = serde_json::from_str(&stdout).expect("valid JSON");
    assert!(parsed.is_array(), "list-ports --json should return an array");
    assert!(output.stderr.is_empty(), "JSON output should not have stderr");
}

#[test]
fn exit_code_two_for_unknown_command() {
    cli_cmd()
        .arg("unknown-command-xyz")
        .assert()
        .failure()
        .code(2);
}

#[test]
fn exit_code_two_for_missing_image_argument() {
    cli_cmd()
        .arg("flash")
        .assert()
        .failure()
        .code(2)
        .stdout(predicate::str::is_empty())
        .stderr(predicate::str::contains("IMAGE"));
}

#[test]
fn exit_code_two_for_conflicting_answers() {
    cli_cmd()
        .args(["--yes", "--non-interactive", "boards"])
        .assert()
        .failure()
        .code(2);
}

#[test]
fn flash_missing_image_fails_with_runtime_error() {
    let dir = tempdir().expect("tempdir should be created");
    let image = dir.path().join("ArduPy_missing.bin");

    cli_cmd()
        .arg("flash")
        .arg(&image)
        .args(["--port", "/dev/ttyACM0"])
        .assert()
        .failure()
        .code(1)
        .stdout(predicate::str::is_empty())
        .stderr(predicate::str::contains("Error"))
        .stderr(predicate::str::contains("not found"));
}

#[test]
fn check_unknown_port_is_usage_error() {
    cli_cmd()
        .args(["check", "--port", "NOT_A_PORT_XYZ"])
        .assert()
        .failure()
        .code(2)
        .stderr(predicate::str::contains("not a supported board"));
}

#[test]
fn invalid_catalog_fails() {
    let dir = tempdir().expect("tempdir should be created");
    let catalog = dir.path().join("boards.json");
    fs::write(&catalog, "{ not json").expect("write catalog");

    cli_cmd()
        .arg("--catalog")
        .arg(&catalog)
        .arg("boards")
        .assert()
        .failure()
        .code(1)
        .stderr(predicate::str::contains("board catalog"));
}

#[test]
fn invalid_local_config_warns_and_continues() {
    let dir = tempdir().expect("tempdir should be created");
    fs::write(dir.path().join("seeedflash.toml"), "invalid toml [[[").expect("write config");

    let output = cli_cmd()
        .current_dir(dir.path())
        .arg("boards")
        .output()
        .expect("command should execute");
    assert!(output.status.success(), "bad config is a warning, not fatal");
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("TOML"), "should warn about invalid TOML");
}

#[test]
fn colors_disabled_when_not_tty() {
    let output = cli_cmd()
        .arg("--help")
        .assert()
        .success()
        .get_output()
        .clone();
    let stdout = String::from_utf8(output.stdout).expect("stdout should be utf-8");
    assert!(!stdout.contains("\x1b["), "Colors should be disabled in non-TTY mode");
}
