//! Integration tests for the `plansync` binary.
//!
//! Only commands that need no database are exercised here; the store-backed
//! workflows are covered by the plansync-core integration tests.

use std::process::{Command, Output};

fn plansync(args: &[&str], config_home: &std::path::Path) -> Output {
    Command::new(env!("CARGO_BIN_EXE_plansync"))
        .args(args)
        .env("XDG_CONFIG_HOME", config_home)
        .env_remove("PLANSYNC_CONFIG")
        .env_remove("PLANSYNC_DATABASE_URL")
        .env("RUST_LOG", "off")
        .output()
        .expect("failed to run plansync binary")
}

#[test]
fn init_writes_config_and_refuses_to_overwrite() {
    let tmp = tempfile::TempDir::new().unwrap();

    let out = plansync(
        &[
            "init",
            "--db-url",
            "postgresql://db:5432/plans",
            "--output-dir",
            "docs/plans",
        ],
        tmp.path(),
    );
    assert!(out.status.success(), "{}", String::from_utf8_lossy(&out.stderr));

    let path = tmp.path().join("plansync").join("config.toml");
    let written = std::fs::read_to_string(&path).unwrap();
    assert!(written.contains("url = \"postgresql://db:5432/plans\""));
    assert!(written.contains("output_dir = \"docs/plans\""));

    let again = plansync(&["init"], tmp.path());
    assert!(!again.status.success());
    assert!(String::from_utf8_lossy(&again.stderr).contains("already exists"));

    let forced = plansync(&["init", "--force"], tmp.path());
    assert!(forced.status.success());
    let rewritten = std::fs::read_to_string(&path).unwrap();
    assert!(rewritten.contains("postgresql://localhost:5432/plansync"));
}

#[test]
fn init_honours_explicit_config_path() {
    let tmp = tempfile::TempDir::new().unwrap();
    let custom = tmp.path().join("elsewhere").join("plansync.toml");

    let out = plansync(
        &["init", "--config", custom.to_str().unwrap()],
        tmp.path(),
    );
    assert!(out.status.success());
    assert!(custom.is_file());
    assert!(!tmp.path().join("plansync").join("config.toml").exists());
}

#[test]
fn completions_are_generated() {
    let tmp = tempfile::TempDir::new().unwrap();
    let out = plansync(&["completions", "bash"], tmp.path());
    assert!(out.status.success());
    let script = String::from_utf8_lossy(&out.stdout);
    assert!(script.contains("plansync"));
    assert!(script.contains("cleanup-backups"));
}

#[test]
fn unreadable_config_is_reported() {
    let tmp = tempfile::TempDir::new().unwrap();
    let broken = tmp.path().join("broken.toml");
    std::fs::write(&broken, "[database\nurl = ").unwrap();

    let out = plansync(&["show", "--config", broken.to_str().unwrap()], tmp.path());
    assert!(!out.status.success());
    assert!(String::from_utf8_lossy(&out.stderr).contains("config"));
}
