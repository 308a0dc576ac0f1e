// ABOUTME: CLI tests running the built binary without any database
// ABOUTME: Covers help output and configuration errors

use std::fs;
use std::process::Command;
use tempfile::tempdir;

fn bin() -> Command {
    let mut cmd = Command::new(env!("CARGO_BIN_EXE_sqlmirror"));
    cmd.env_remove("SQLMIRROR_CONFIG").env_remove("RUST_LOG");
    cmd
}

#[test]
fn test_help_lists_commands() {
    let output = bin().arg("--help").output().expect("Failed to execute command");
    assert!(output.status.success());
    let stdout = String::from_utf8_lossy(&output.stdout);
    for command in [
        "compare-tables",
        "compare-data",
        "sync-data",
        "stream-data",
        "stream-data-no-sync",
        "show-source-tables",
        "show-sink-tables",
    ] {
        assert!(stdout.contains(command), "help is missing {}", command);
    }
}

#[test]
fn test_missing_config_fails() {
    let temp_dir = tempdir().unwrap();
    let output = bin()
        .arg("--config")
        .arg(temp_dir.path().join("nope.toml"))
        .arg("compare-tables")
        .output()
        .expect("Failed to execute command");
    assert!(!output.status.success());
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("Failed to load configuration"));
}

#[test]
fn test_invalid_config_rejected() {
    let temp_dir = tempdir().unwrap();
    let path = temp_dir.path().join("sqlmirror.toml");
    fs::write(
        &path,
        r#"
        [source]
        name = "shop"
        url = "oracle://db1/shop"

        [sink]
        name = "replica"
        url = "postgresql://db2/shop"
        "#,
    )
    .unwrap();

    let output = bin()
        .env("SQLMIRROR_CONFIG", &path)
        .arg("sync-data")
        .output()
        .expect("Failed to execute command");
    assert!(!output.status.success());
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("Invalid source url"), "stderr: {}", stderr);
}

#[test]
fn test_zero_chunk_size_rejected() {
    let temp_dir = tempdir().unwrap();
    let path = temp_dir.path().join("sqlmirror.toml");
    fs::write(
        &path,
        r#"
        [source]
        name = "shop"
        url = "mysql://db1/shop"

        [sink]
        name = "replica"
        url = "postgresql://db2/shop"

        [sync]
        chunk_size = 0
        "#,
    )
    .unwrap();

    let output = bin()
        .arg("--config")
        .arg(&path)
        .arg("compare-data")
        .output()
        .expect("Failed to execute command");
    assert!(!output.status.success());
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("chunk_size"), "stderr: {}", stderr);
}
