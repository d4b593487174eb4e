#![allow(clippy::unwrap_used)]

use std::io::Write;

use assert_cmd::Command;
use predicates::prelude::*;

fn mielelink() -> Command {
    let mut cmd = Command::cargo_bin("mielelink").unwrap();
    cmd.env_remove("RUST_LOG")
        .env_remove("MIELELINK_PROFILE")
        .env_remove("MIELELINK_PASSWORD")
        .env_remove("MIELELINK_CLIENT_SECRET");
    cmd
}

#[test]
fn help_lists_subcommands() {
    mielelink()
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("run"))
        .stdout(predicate::str::contains("replay"));
}

#[test]
fn config_path_echoes_explicit_file() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("mielelink.toml");
    mielelink()
        .args(["--config", path.to_str().unwrap(), "config", "path"])
        .assert()
        .success()
        .stdout(predicate::str::contains("mielelink.toml"));
}

#[test]
fn run_without_profile_is_a_usage_error() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("missing.toml");
    mielelink()
        .args(["--config", path.to_str().unwrap(), "run", "--no-stdin"])
        .assert()
        .code(2)
        .stderr(predicate::str::contains("not found"));
}

#[test]
fn validate_reports_empty_fields() {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    writeln!(
        file,
        r#"
default_profile = "home"

[profiles.home]
account = "me@example.com"
password = "secret"
client_id = ""
client_secret = "secret"
country = "de-DE"
"#
    )
    .unwrap();

    mielelink()
        .args(["--config", file.path().to_str().unwrap(), "config", "validate"])
        .assert()
        .code(2)
        .stderr(predicate::str::contains("client_id"));
}

#[test]
fn replay_prints_the_projected_tree() {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    write!(
        file,
        r#"[
            {{"event": "devices", "data": {{
                "D1": {{
                    "ident": {{
                        "type": {{"value_raw": 1, "value_localized": "Washing machine"}},
                        "deviceName": "Laundry"
                    }},
                    "state": {{"status": {{"value_raw": 1, "value_localized": "Off"}}}}
                }}
            }}}},
            {{"event": "actions", "data": {{"D1": {{"powerOn": true}}}}}}
        ]"#
    )
    .unwrap();

    mielelink()
        .args(["--color", "never", "replay", "--summary"])
        .arg(file.path())
        .assert()
        .success()
        .stdout(predicate::str::contains("D1.Status = Off"))
        .stdout(predicate::str::contains("D1.Connected = true"));
}
