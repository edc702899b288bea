//! Integration tests for core CLI contract behavior.

use {predicates::prelude::*, std::fs, tempfile::tempdir};

fn cli_cmd() -> assert_cmd::Command {
    let mut cmd = assert_cmd::cargo::cargo_bin_cmd!("espflow");
    cmd.env("ESPFLOW_LANG", "en")
        .env_remove("ESPFLOW_PORT")
        .env_remove("ESPFLOW_BAUD")
        .env_remove("ESPFLOW_CHIP")
        .env_remove("ESPFLOW_FLASHER")
        .env_remove("ESPFLOW_DEMO")
        .env_remove("ESPFLOW_NON_INTERACTIVE")
        .env_remove("RUST_LOG");
    cmd
}

/// A small image with a valid ESP32-C3 header.
fn esp_image() -> Vec<u8> {
    let mut data = vec![0xE9, 1, 2, 0x20];
    data.extend_from_slice(&0x4038_0000u32.to_le_bytes());
    data.extend_from_slice(&[0xEE, 0, 0, 0]);
    data.extend_from_slice(&5u16.to_le_bytes());
    data.push(0);
    data.extend_from_slice(&3u16.to_le_bytes());
    data.extend_from_slice(&199u16.to_le_bytes());
    data.extend_from_slice(&[0, 0, 0, 0]);
    data.push(0);
    data.resize(4096, 0xFF);
    data
}

#[test]
fn help_exits_zero_and_writes_stdout_only() {
    let mut cmd = cli_cmd();
    cmd.arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("espflow"))
        .stderr(predicate::str::is_empty());
}

#[test]
fn short_help_exits_zero_and_writes_stdout_only() {
    let mut cmd = cli_cmd();
    cmd.arg("-h")
        .assert()
        .success()
        .stdout(predicate::str::contains("espflow"))
        .stderr(predicate::str::is_empty());
}

#[test]
fn version_exits_zero_and_writes_stdout_only() {
    let mut cmd = cli_cmd();
    cmd.arg("--version")
        .assert()
        .success()
        .stdout(predicate::str::contains("espflow"))
        .stderr(predicate::str::is_empty());
}

#[test]
fn subcommand_help_is_localized() {
    let mut cmd = cli_cmd();
    cmd.env("ESPFLOW_LANG", "vi")
        .args(["flash", "--help"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Cách dùng"));
}

#[test]
fn help_includes_usage() {
    let mut cmd = cli_cmd();
    cmd.arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("Usage"));
}

// ============================================================================
// JSON Output
// ============================================================================

#[test]
fn list_ports_json_returns_envelope() {
    let dir = tempdir().expect("tempdir should be created");
    let mut cmd = cli_cmd();
    let output = cmd
        .current_dir(dir.path())
        .args(["list-ports", "--json"])
        .assert()
        .success()
        .get_output()
        .clone();

    let stdout = String::from_utf8(output.stdout).expect("stdout should be utf-8");
    let parsed: serde_json::Value = serde_json::from_str(&stdout).expect("valid JSON");
    assert_eq!(parsed["ok"], true);
    assert!(parsed["data"]["ports"].is_array());
}

#[test]
fn info_json_error_keeps_stdout_clean() {
    let dir = tempdir().expect("tempdir should be created");
    let nonexistent = dir.path().join("not_exists.bin");

    let mut cmd = cli_cmd();
    cmd.arg("info")
        .arg("--json")
        .arg(nonexistent.as_os_str())
        .assert()
        .failure()
        .code(1)
        .stdout(predicate::str::is_empty())
        .stderr(predicate::str::contains("Error"));
}

#[test]
fn info_json_reports_header() {
    let dir = tempdir().expect("tempdir should be created");
    let image = dir.path().join("app.bin");
    fs::write(&image, esp_image()).expect("write image");

    let mut cmd = cli_cmd();
    let output = cmd
        .args(["info", "--json"])
        .arg(&image)
        .assert()
        .success()
        .get_output()
        .clone();

    let parsed: serde_json::Value =
        serde_json::from_slice(&output.stdout).expect("valid JSON");
    assert_eq!(parsed["ok"], true);
    assert_eq!(parsed["data"]["size"], 4096);
    assert_eq!(parsed["data"]["header"]["chip"], "ESP32-C3");
    assert_eq!(parsed["data"]["header"]["max_revision"], "v1.99");
}

#[test]
fn info_raw_binary_has_no_header() {
    let dir = tempdir().expect("tempdir should be created");
    let image = dir.path().join("raw.bin");
    fs::write(&image, vec![0u8; 64]).expect("write image");

    let mut cmd = cli_cmd();
    cmd.arg("info")
        .arg(&image)
        .assert()
        .success()
        .stdout(predicate::str::is_empty())
        .stderr(predicate::str::contains("No ESP image header"));
}

#[test]
fn demo_chip_id_json_is_valid() {
    let mut cmd = cli_cmd();
    let output = cmd
        .args(["--demo", "--non-interactive", "chip-id", "--json"])
        .assert()
        .success()
        .get_output()
        .clone();

    let parsed: serde_json::Value =
        serde_json::from_slice(&output.stdout).expect("valid JSON");
    assert_eq!(parsed["ok"], true);
    assert_eq!(parsed["data"]["simulated"], true);
    assert!(parsed["data"]["chip"].is_string());
}

// ============================================================================
// Firmware Discovery
// ============================================================================

#[test]
fn non_interactive_flash_with_multiple_firmwares_fails_fast() {
    let dir = tempdir().expect("tempdir should be created");
    fs::write(dir.path().join("a.bin"), b"dummy").expect("write a.bin");
    fs::write(dir.path().join("b.bin"), b"dummy").expect("write b.bin");

    let mut cmd = cli_cmd();
    cmd.current_dir(dir.path())
        .arg("--non-interactive")
        .arg("flash")
        .assert()
        .failure()
        .code(2)
        .stderr(predicate::str::contains("multiple"));
}

#[test]
fn flash_without_firmware_mentions_firmware() {
    let dir = tempdir().expect("tempdir should be created");

    let mut cmd = cli_cmd();
    cmd.current_dir(dir.path())
        .arg("--non-interactive")
        .arg("flash")
        .assert()
        .failure()
        .code(2)
        .stdout(predicate::str::is_empty())
        .stderr(predicate::str::contains("firmware"));
}

// ============================================================================
// Exit Codes
// ============================================================================

#[test]
fn exit_code_zero_on_success() {
    cli_cmd().arg("--help").assert().code(0);
    cli_cmd().arg("--version").assert().code(0);
    cli_cmd().args(["completions", "bash"]).assert().code(0);
}

#[test]
fn exit_code_two_for_unknown_command() {
    let mut cmd = cli_cmd();
    cmd.arg("unknown-command-xyz")
        .assert()
        .failure()
        .code(2)
        .stderr(predicate::str::contains("unrecognized"));
}

#[test]
fn exit_code_two_for_invalid_flag() {
    cli_cmd().arg("--invalid-flag-xyz").assert().failure().code(2);
}

#[test]
fn exit_code_two_for_invalid_offset() {
    let dir = tempdir().expect("tempdir should be created");
    let image = dir.path().join("app.bin");
    fs::write(&image, esp_image()).expect("write image");

    let mut cmd = cli_cmd();
    cmd.args(["--demo", "--non-interactive", "flash", "--offset", "0xZZ"])
        .arg(&image)
        .assert()
        .failure()
        .code(2)
        .stderr(predicate::str::contains("offset"));
}

#[test]
fn invalid_config_file_warns_but_continues() {
    let dir = tempdir().expect("tempdir should be created");
    fs::write(dir.path().join("espflow.toml"), "invalid toml [[[").expect("write config");

    let mut cmd = cli_cmd();
    let output = cmd
        .current_dir(dir.path())
        .arg("list-ports")
        .output()
        .expect("command should execute");

    assert!(output.status.success(), "command should succeed despite config warning");
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("TOML"), "should warn about invalid TOML");
}

#[test]
fn exit_code_three_for_invalid_chip_in_config() {
    let dir = tempdir().expect("tempdir should be created");
    let config = dir.path().join("custom.toml");
    fs::write(&config, "[flash]\nchip = \"esp9000\"\n").expect("write config");
    let image = dir.path().join("app.bin");
    fs::write(&image, esp_image()).expect("write image");

    let mut cmd = cli_cmd();
    cmd.arg("--config")
        .arg(&config)
        .args(["--non-interactive", "flash"])
        .arg(&image)
        .assert()
        .failure()
        .code(3)
        .stderr(predicate::str::contains("esp9000"));
}

#[test]
fn exit_code_four_for_device_not_found() {
    let dir = tempdir().expect("tempdir should be created");
    let image = dir.path().join("test.bin");
    fs::write(&image, esp_image()).expect("write dummy firmware");

    let mut cmd = cli_cmd();
    cmd.current_dir(dir.path())
        .arg("--non-interactive")
        .arg("-p")
        .arg("INVALID_PORT_NAME_XYZ")
        .arg("flash")
        .arg(&image)
        .assert()
        .failure()
        .code(4);
}

#[test]
fn exit_code_one_for_missing_file() {
    let dir = tempdir().expect("tempdir should be created");
    let nonexistent = dir.path().join("does_not_exist.bin");

    cli_cmd()
        .arg("info")
        .arg(nonexistent.as_os_str())
        .assert()
        .failure()
        .code(1);
}

// ============================================================================
// Demo Mode
// ============================================================================

#[test]
fn demo_flash_succeeds_with_clean_stdout() {
    let dir = tempdir().expect("tempdir should be created");
    let image = dir.path().join("app.bin");
    fs::write(&image, esp_image()).expect("write image");

    let mut cmd = cli_cmd();
    cmd.current_dir(dir.path())
        .args(["--demo", "--non-interactive", "flash", "app.bin", "-o", "0x10000"])
        .assert()
        .success()
        .stdout(predicate::str::is_empty())
        .stderr(predicate::str::contains("Connected"));
}

#[test]
fn demo_flash_quiet_is_silent() {
    let dir = tempdir().expect("tempdir should be created");
    let image = dir.path().join("app.bin");
    fs::write(&image, esp_image()).expect("write image");

    let mut cmd = cli_cmd();
    cmd.current_dir(dir.path())
        .args(["--demo", "--non-interactive", "-q", "flash", "app.bin"])
        .assert()
        .success()
        .stdout(predicate::str::is_empty())
        .stderr(predicate::str::contains("Connected").not());
}

#[test]
fn demo_env_variable_enables_demo_mode() {
    let mut cmd = cli_cmd();
    cmd.env("ESPFLOW_DEMO", "true")
        .args(["--non-interactive", "chip-id", "--json"])
        .assert()
        .success()
        .stdout(predicate::str::contains("\"simulated\": true"));
}

#[test]
fn failed_download_falls_back_to_demo() {
    let port = {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").expect("bind");
        listener.local_addr().expect("local addr").port()
    };
    let url = format!("http://127.0.0.1:{port}/fw.bin");

    let mut cmd = cli_cmd();
    cmd.args(["--non-interactive", "--demo-fallback", "flash", &url, "-o", "0x10000"])
        .assert()
        .success()
        .stdout(predicate::str::is_empty())
        .stderr(predicate::str::contains("download failed"))
        .stderr(predicate::str::contains("nothing was written"));
}

#[test]
fn failed_download_without_fallback_is_an_error() {
    let port = {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").expect("bind");
        listener.local_addr().expect("local addr").port()
    };
    let url = format!("http://127.0.0.1:{port}/fw.bin");

    let mut cmd = cli_cmd();
    cmd.args(["--demo", "--non-interactive", "flash", &url])
        .assert()
        .failure()
        .code(1)
        .stderr(predicate::str::contains("Error"));
}

#[test]
fn erase_without_all_is_usage_error() {
    let mut cmd = cli_cmd();
    cmd.args(["--demo", "erase"])
        .assert()
        .failure()
        .code(2)
        .stdout(predicate::str::is_empty())
        .stderr(predicate::str::contains("--all"));
}

#[test]
fn demo_erase_all_succeeds() {
    let mut cmd = cli_cmd();
    cmd.args(["--demo", "--non-interactive", "erase", "--all"])
        .assert()
        .success()
        .stderr(predicate::str::contains("Flash erased"));
}

// ============================================================================
// Suggestions, Completions, Terminator
// ============================================================================

#[test]
fn unknown_command_suggests_similar() {
    let mut cmd = cli_cmd();
    cmd.arg("falsh")
        .assert()
        .failure()
        .stderr(predicate::str::contains("flash"));
}

#[test]
fn unknown_flag_suggests_similar() {
    let mut cmd = cli_cmd();
    cmd.arg("list-ports")
        .arg("--jason")
        .assert()
        .failure()
        .stderr(predicate::str::contains("json"));
}

#[test]
fn completions_command_writes_to_stdout() {
    let mut cmd = cli_cmd();
    cmd.args(["completions", "bash"])
        .assert()
        .success()
        .stderr(predicate::str::is_empty())
        .stdout(predicate::str::contains("_espflow()"));
}

#[test]
fn option_terminator_allows_dash_prefixed_operand() {
    let dir = tempdir().expect("tempdir should be created");
    let image = dir.path().join("-weird.bin");
    fs::write(&image, esp_image()).expect("write image");

    let mut cmd = cli_cmd();
    cmd.current_dir(dir.path())
        .args(["info", "--", "-weird.bin"])
        .assert()
        .success()
        .stderr(predicate::str::contains("ESP32-C3"));
}

#[test]
fn non_interactive_environment_variable_works() {
    let mut cmd = cli_cmd();
    cmd.env("ESPFLOW_NON_INTERACTIVE", "true")
        .arg("--version")
        .assert()
        .success();
}

#[test]
fn colors_disabled_when_not_tty() {
    let mut cmd = cli_cmd();
    let output = cmd.arg("--help").assert().success().get_output().clone();

    let stdout = String::from_utf8(output.stdout).expect("stdout should be utf-8");
    assert!(!stdout.contains("\x1b["), "colors should be disabled in non-TTY mode");
}
