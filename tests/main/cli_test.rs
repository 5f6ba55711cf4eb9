//! CLI contract tests.

use assert_cmd::Command;

const CONFIG: &str = r#"
[engine]
base_url = "http://engine.internal:8008"

[policy]
default_role = "patient"

[policy.roles]
patient = ["labeliq.V1", "labeliq.V2"]
physician = ["labeliq.V1", "labeliq.V2", "labeliq.V9"]
"#;

fn viewguard() -> Command {
    let mut cmd = Command::cargo_bin("viewguard").expect("binary builds");
    cmd.env_remove("VIEWGUARD_ENGINE_USERNAME")
        .env_remove("VIEWGUARD_ENGINE_PASSWORD")
        .env_remove("VIEWGUARD_CONFIG_PATH")
        .env_remove("VIEWGUARD_DEFAULT_ROLE");
    cmd
}

#[test]
fn check_prints_effective_policy() {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("viewguard.toml");
    std::fs::write(&path, CONFIG).expect("write config");

    let output = viewguard()
        .arg("--config")
        .arg(&path)
        .args(["check", "--role", "guest"])
        .output()
        .expect("run");
    assert!(output.status.success());

    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("configuration OK"));
    assert!(stdout.contains("fallback role: patient"));
    assert!(stdout.contains("engine: not configured"));
    assert!(stdout.contains("physician: [V1, V2, V9]"));
    assert!(stdout.contains("-> patient (fallback) (2 views)"));
}

#[test]
fn check_reports_configured_engine() {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("viewguard.toml");
    std::fs::write(&path, CONFIG).expect("write config");

    let output = viewguard()
        .arg("--config")
        .arg(&path)
        .arg("check")
        .env("VIEWGUARD_ENGINE_USERNAME", "svc")
        .env("VIEWGUARD_ENGINE_PASSWORD", "secret")
        .output()
        .expect("run");
    assert!(output.status.success());
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("engine: configured (http://engine.internal:8008)"));
    assert!(!stdout.contains("secret"));
}

#[test]
fn check_fails_on_empty_policy() {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("viewguard.toml");
    std::fs::write(&path, "[server]\nbind = \"127.0.0.1:0\"\n").expect("write config");

    viewguard()
        .arg("--config")
        .arg(&path)
        .arg("check")
        .assert()
        .failure();
}

#[test]
fn missing_explicit_config_fails() {
    viewguard()
        .args(["--config", "/nonexistent/viewguard.toml", "check"])
        .assert()
        .failure();
}
