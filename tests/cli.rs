// Drives the compiled binary's non-interactive flags with an isolated HOME.

use assert_cmd::Command;
use std::fs;

fn eyecatch(home: &std::path::Path) -> Command {
    let mut cmd = Command::cargo_bin("eyecatch").unwrap();
    cmd.env("HOME", home)
        .env("XDG_CONFIG_HOME", home.join(".config"))
        .env_remove("RUST_LOG");
    cmd
}

#[test]
fn leaderboard_on_fresh_install_is_empty() {
    let home = tempfile::tempdir().unwrap();
    let out = eyecatch(home.path())
        .arg("--leaderboard")
        .assert()
        .success()
        .get_output()
        .stdout
        .clone();
    assert!(String::from_utf8_lossy(&out).contains("No scores yet."));
}

#[test]
fn save_config_writes_flag_values() {
    let home = tempfile::tempdir().unwrap();
    let cfg_path = home.path().join("settings.json");
    eyecatch(home.path())
        .args(["--save-config", "-s", "30", "--dwell-ms", "1500", "--config"])
        .arg(&cfg_path)
        .assert()
        .success();

    let saved: serde_json::Value = serde_json::from_slice(&fs::read(&cfg_path).unwrap()).unwrap();
    assert_eq!(saved["session_secs"], 30);
    assert_eq!(saved["dwell_required_ms"], 1500);
}

#[test]
fn export_csv_writes_header_even_without_scores() {
    let home = tempfile::tempdir().unwrap();
    let csv_path = home.path().join("scores.csv");
    eyecatch(home.path())
        .arg("--export-csv")
        .arg(&csv_path)
        .assert()
        .success();

    let body = fs::read_to_string(&csv_path).unwrap();
    assert_eq!(body.lines().next(), Some("rank,score,level,targets,date"));
    assert_eq!(body.lines().count(), 1);
}

#[test]
fn clear_scores_succeeds_on_empty_store() {
    let home = tempfile::tempdir().unwrap();
    let out = eyecatch(home.path())
        .arg("--clear-scores")
        .assert()
        .success()
        .get_output()
        .stdout
        .clone();
    assert!(String::from_utf8_lossy(&out).contains("Scores cleared."));
    assert!(home
        .path()
        .join(".local/state/eyecatch/scores.db")
        .exists());
}

#[test]
fn interactive_mode_requires_a_tty() {
    let home = tempfile::tempdir().unwrap();
    let out = eyecatch(home.path()).assert().failure().get_output().stderr.clone();
    assert!(String::from_utf8_lossy(&out).contains("stdin must be a tty"));
}
