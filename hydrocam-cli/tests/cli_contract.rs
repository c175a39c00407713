//! Integration tests for core CLI contract behavior.

use {predicates::prelude::*, std::fs, tempfile::tempdir};

fn cli_cmd() -> assert_cmd::Command {
    let mut cmd = assert_cmd::cargo::cargo_bin_cmd!("hydrocam");
    cmd.env_remove("HYDROCAM_PORT")
        .env_remove("HYDROCAM_BAUD")
        .env_remove("HYDROCAM_CHUNK_SIZE");
    cmd
}

#[test]
fn help_exits_zero_and_writes_stdout_only() {
    let mut cmd = cli_cmd();
    cmd.arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("hydrocam"))
        .stderr(predicate::str::is_empty());
}

#[test]
fn version_exits_zero_and_writes_stdout_only() {
    let mut cmd = cli_cmd();
    cmd.arg("--version")
        .assert()
        .success()
        .stdout(predicate::str::contains("hydrocam"))
        .stderr(predicate::str::is_empty());
}

#[test]
fn help_lists_camera_commands() {
    let mut cmd = cli_cmd();
    cmd.arg("--help")
        .assert()
        .success()
        .stdout(
            predicate::str::contains("status")
                .and(predicate::str::contains("capture"))
                .and(predicate::str::contains("wait-ready")),
        );
}

#[test]
fn completions_command_writes_to_stdout() {
    let mut cmd = cli_cmd();
    cmd.args(["completions", "bash"])
        .assert()
        .success()
        .code(0)
        .stdout(predicate::str::contains("hydrocam"));
}

// ============================================================================
// Exit Code Tests
// ============================================================================

#[test]
fn exit_code_two_for_usage_error_unknown_command() {
    let mut cmd = cli_cmd();
    cmd.arg("unknown-command-xyz")
        .assert()
        .failure()
        .code(2)
        .stdout(predicate::str::is_empty());
}

#[test]
fn exit_code_two_for_usage_error_invalid_flag() {
    let mut cmd = cli_cmd();
    cmd.arg("--invalid-flag-xyz")
        .assert()
        .failure()
        .code(2);
}

#[test]
fn exit_code_two_when_no_port_is_configured() {
    let dir = tempdir().expect("tempdir should be created");
    let config = dir
        .path()
        .join("empty.toml");
    fs::write(&config, "").expect("write empty config");

    let mut cmd = cli_cmd();
    cmd.current_dir(dir.path())
        .arg("--config")
        .arg(&config)
        .arg("status")
        .assert()
        .failure()
        .code(2)
        .stdout(predicate::str::is_empty())
        .stderr(predicate::str::contains("--port"));
}

#[test]
fn exit_code_two_for_zero_chunk_size() {
    let mut cmd = cli_cmd();
    cmd.args(["-p", "INVALID_PORT_NAME_XYZ", "download", "--chunk-size", "0"])
        .assert()
        .failure()
        .code(2)
        .stderr(predicate::str::contains("chunk size"));
}

#[test]
fn exit_code_one_for_missing_device() {
    let mut cmd = cli_cmd();
    cmd.args(["-p", "INVALID_PORT_NAME_XYZ", "status"])
        .assert()
        .failure()
        .code(1)
        .stdout(predicate::str::is_empty())
        .stderr(predicate::str::contains("INVALID_PORT_NAME_XYZ"));
}

#[test]
fn invalid_config_file_warns_and_continues() {
    let dir = tempdir().expect("tempdir should be created");
    fs::write(dir.path().join("hydrocam.toml"), "invalid toml [[[").expect("write invalid config");

    let output = cli_cmd()
        .current_dir(dir.path())
        .args(["completions", "bash"])
        .output()
        .expect("command should execute");

    assert!(
        output
            .status
            .success(),
        "command should succeed despite config warning"
    );
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("TOML"), "should warn about invalid TOML");
}

#[test]
fn unknown_command_suggests_similar() {
    let mut cmd = cli_cmd();
    cmd.arg("captur")
        .assert()
        .failure()
        .stderr(predicate::str::contains("capture"));
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
    assert!(
        !stdout.contains("\x1b["),
        "Colors should be disabled in non-TTY mode"
    );
}
