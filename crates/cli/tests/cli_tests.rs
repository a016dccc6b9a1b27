//! CLI integration tests

use std::process::{Command, Output};

fn pvcctl(args: &[&str]) -> Output {
    let home = tempfile::tempdir().expect("Failed to create temp home");
    Command::new(env!("CARGO_BIN_EXE_pvcctl"))
        .args(args)
        .env("HOME", home.path())
        .env("NO_COLOR", "1")
        .env_remove("ANNOTATION_PREFIX")
        .env_remove("GRACE_PERIOD_MINUTES")
        .env_remove("AUDIT_BACKEND")
        .output()
        .expect("Failed to execute command")
}

/// Test that the CLI shows help
#[test]
fn test_cli_help() {
    let output = pvcctl(&["--help"]);
    let stdout = String::from_utf8_lossy(&output.stdout);

    assert!(output.status.success(), "CLI help should succeed");
    assert!(stdout.contains("PVC operator"), "Should show app name");
    assert!(stdout.contains("plan"), "Should show plan command");
    assert!(stdout.contains("claims"), "Should show claims command");
    assert!(stdout.contains("quantity"), "Should show quantity command");
    assert!(stdout.contains("run"), "Should show run command");
}

/// Test that the CLI shows version
#[test]
fn test_cli_version() {
    let output = pvcctl(&["--version"]);
    let stdout = String::from_utf8_lossy(&output.stdout);

    assert!(output.status.success(), "CLI version should succeed");
    assert!(stdout.contains("pvcctl"), "Should show binary name");
}

#[test]
fn test_run_help_lists_flags() {
    let output = pvcctl(&["run", "--help"]);
    let stdout = String::from_utf8_lossy(&output.stdout);

    assert!(output.status.success());
    assert!(stdout.contains("--dry-run"));
    assert!(stdout.contains("--reclaim-scaled-down"));
    assert!(stdout.contains("--namespace"));
    assert!(stdout.contains("--grace-period-minutes"));
    assert!(stdout.contains("--audit-backend"));
}

#[test]
fn test_unknown_audit_backend_is_rejected() {
    let output = pvcctl(&["--audit-backend", "syslog", "quantity", "compare", "1Gi", "1Gi"]);
    let stderr = String::from_utf8_lossy(&output.stderr);

    assert!(!output.status.success());
    assert!(stderr.contains("syslog"), "stderr: {stderr}");
}

#[test]
fn test_quantity_compare_json() {
    let output = pvcctl(&["--format", "json", "quantity", "compare", "500Gi", "512000Mi"]);
    let stdout = String::from_utf8_lossy(&output.stdout);

    assert!(output.status.success(), "stderr: {}", String::from_utf8_lossy(&output.stderr));
    let value: serde_json::Value = serde_json::from_str(&stdout).expect("valid JSON");
    assert_eq!(value["ordering"], "equal");
    assert_eq!(value["a"]["bytes"], 536_870_912_000u64);
    assert_eq!(value["b"]["text"], "512000Mi");
}

#[test]
fn test_quantity_compare_table() {
    let output = pvcctl(&["quantity", "compare", "1Gi", "1G"]);
    let stdout = String::from_utf8_lossy(&output.stdout);

    assert!(output.status.success());
    assert!(stdout.contains("1073741824"));
    assert!(stdout.contains("1Gi > 1G"));
}

#[test]
fn test_quantity_compare_rejects_invalid() {
    let output = pvcctl(&["quantity", "compare", "500Gi", "40Tb"]);
    let stderr = String::from_utf8_lossy(&output.stderr);

    assert!(!output.status.success());
    assert!(stderr.contains("40Tb"));
}

/// Test invalid command handling
#[test]
fn test_invalid_command() {
    let output = pvcctl(&["resize-everything"]);
    assert!(!output.status.success(), "Invalid command should fail");
}

/// Test missing required argument
#[test]
fn test_missing_argument() {
    let output = pvcctl(&["quantity", "compare", "1Gi"]);
    assert!(!output.status.success(), "Missing argument should fail");
}

#[test]
fn test_config_file_sets_default_format() {
    let home = tempfile::tempdir().unwrap();
    let config_dir = home.path().join(".config").join("pvcctl");
    std::fs::create_dir_all(&config_dir).unwrap();
    std::fs::write(config_dir.join("config.json"), r#"{"default_format": "json"}"#).unwrap();

    let output = Command::new(env!("CARGO_BIN_EXE_pvcctl"))
        .args(["quantity", "compare", "2Ti", "1Ti"])
        .env("HOME", home.path())
        .output()
        .expect("Failed to execute command");

    assert!(output.status.success());
    let value: serde_json::Value =
        serde_json::from_slice(&output.stdout).expect("config format should select JSON");
    assert_eq!(value["ordering"], "greater");
}
