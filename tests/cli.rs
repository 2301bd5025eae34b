use assert_cmd::cargo::cargo_bin_cmd;
use predicates::prelude::*;
use std::io::Write;

/// `manage` isolated from the user's config and state directories.
fn manage(dir: &tempfile::TempDir) -> assert_cmd::Command {
    let mut cmd: assert_cmd::Command = cargo_bin_cmd!("manage").into();
    cmd.current_dir(dir.path())
        .env("HOME", dir.path())
        .env("XDG_CONFIG_HOME", dir.path().join("config"))
        .env("XDG_STATE_HOME", dir.path().join("state"))
        .env_remove("RUST_LOG");
    cmd
}

fn write_test_config(dir: &tempfile::TempDir) -> std::path::PathBuf {
    let config_path = dir.path().join("manage.toml");
    let mut f = std::fs::File::create(&config_path).unwrap();
    write!(
        f,
        r#"
flake = "{flake}"
machines = ["superheavy", "backup"]

[vm]
image_dir = "{flake}/images"

[[remote]]
name = "builder"
host = "builder.lan"
"#,
        flake = dir.path().display()
    )
    .unwrap();
    config_path
}

#[test]
fn help_works() {
    let dir = tempfile::tempdir().unwrap();
    manage(&dir)
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("Administration console"));
}

#[test]
fn actions_lists_builtins() {
    let dir = tempfile::tempdir().unwrap();
    manage(&dir)
        .args(["--output", "plain", "actions"])
        .assert()
        .success()
        .stdout(predicate::str::contains("switch"))
        .stdout(predicate::str::contains("rebuild-all"))
        .stdout(predicate::str::contains("vm-start"));
}

#[test]
fn actions_json_filters_by_category() {
    let dir = tempfile::tempdir().unwrap();
    manage(&dir)
        .args(["--output", "json", "actions", "--category", "vm"])
        .assert()
        .success()
        .stdout(predicate::str::starts_with("["))
        .stdout(predicate::str::contains("vm-list"))
        .stdout(predicate::str::contains("switch").not());
}

#[test]
fn unknown_category_fails() {
    let dir = tempfile::tempdir().unwrap();
    manage(&dir)
        .args(["actions", "--category", "printers"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("unknown category"));
}

#[test]
fn unknown_machine_is_reported() {
    let dir = tempfile::tempdir().unwrap();
    let config_path = write_test_config(&dir);
    manage(&dir)
        .args(["--config", config_path.to_str().unwrap(), "build", "nosuch"])
        .assert()
        .code(1)
        .stderr(predicate::str::contains("unknown machine 'nosuch'"))
        .stderr(predicate::str::contains("superheavy"));
}

#[test]
fn list_machines_uses_configured_machines() {
    let dir = tempfile::tempdir().unwrap();
    write_test_config(&dir);
    // Picked up from the working directory.
    manage(&dir)
        .args(["--output", "plain", "list-machines"])
        .assert()
        .success()
        .stdout(predicate::str::contains("superheavy"))
        .stdout(predicate::str::contains("backup"));
}

#[test]
fn missing_explicit_config_fails() {
    let dir = tempfile::tempdir().unwrap();
    manage(&dir)
        .args(["--config", "/nonexistent/manage.toml", "actions"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("failed to load config"));
}

#[test]
fn malformed_config_fails() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join("manage.toml"), "machines = [unterminated").unwrap();
    manage(&dir)
        .arg("actions")
        .assert()
        .failure()
        .stderr(predicate::str::contains("failed to parse config"));
}

#[test]
fn unknown_remote_fails() {
    let dir = tempfile::tempdir().unwrap();
    let config_path = write_test_config(&dir);
    manage(&dir)
        .args(["--config", config_path.to_str().unwrap(), "--remote", "nope", "health"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("unknown remote 'nope'"));
}

#[test]
fn unknown_action_fails() {
    let dir = tempfile::tempdir().unwrap();
    manage(&dir)
        .args(["run", "nosuch"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("unknown action 'nosuch'"));
}

#[test]
fn run_without_placeholder_value_fails() {
    let dir = tempfile::tempdir().unwrap();
    manage(&dir)
        .args(["run", "vm-start"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("missing argument 'vm'"));
}

#[test]
fn dangerous_action_needs_yes_without_terminal() {
    let dir = tempfile::tempdir().unwrap();
    manage(&dir)
        .args(["run", "docker-prune"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("--yes"));
}

#[test]
fn create_vm_rejects_bad_name() {
    let dir = tempfile::tempdir().unwrap();
    let config_path = write_test_config(&dir);
    manage(&dir)
        .args(["--config", config_path.to_str().unwrap(), "create-vm", "--name", "bad name!"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("may only contain"));
    assert!(!dir.path().join("images").exists());
}

#[test]
fn create_vm_rejects_bad_memory() {
    let dir = tempfile::tempdir().unwrap();
    let config_path = write_test_config(&dir);
    manage(&dir)
        .args([
            "--config",
            config_path.to_str().unwrap(),
            "create-vm",
            "--name",
            "test1",
            "--memory",
            "lots",
        ])
        .assert()
        .failure()
        .stderr(predicate::str::contains("invalid size"));
}

#[test]
fn create_vm_requires_name_without_terminal() {
    let dir = tempfile::tempdir().unwrap();
    manage(&dir)
        .arg("create-vm")
        .assert()
        .failure()
        .stderr(predicate::str::contains("--name is required"));
}
