//! Manual tests of the real CLI binary: exit codes and output files.

use std::path::Path;
use std::process::{Command, Output};

fn cli(args: &[&str], cwd: &Path) -> Output {
    Command::new(env!("CARGO_BIN_EXE_roi-graph"))
        .args(args)
        .current_dir(cwd)
        .env_remove("RUST_LOG")
        .output()
        .expect("spawn roi-graph")
}

#[test]
fn test_defaults_prints_valid_toml() {
    let dir = tempfile::tempdir().expect("tempdir");
    let out = cli(&["defaults"], dir.path());
    assert_eq!(out.status.code(), Some(0), "defaults must exit 0");

    let text = String::from_utf8_lossy(&out.stdout);
    assert!(text.contains("kwargs_findParameters"), "defaults must list search settings");

    let path = dir.path().join("defaults.toml");
    std::fs::write(&path, text.as_bytes()).expect("write defaults");
    let validate = cli(&["validate", "--config", "defaults.toml"], dir.path());
    assert_eq!(validate.status.code(), Some(0), "printed defaults must validate");
    println!("[PASS] defaults round-trip through validate");
}

#[test]
fn test_unknown_option_exits_2() {
    let dir = tempfile::tempdir().expect("tempdir");
    std::fs::write(dir.path().join("bad.toml"), "[clustering]\nbogus = 1\n").expect("write");

    let out = cli(&["validate", "--config", "bad.toml"], dir.path());
    assert_eq!(out.status.code(), Some(2), "invalid config must exit 2");
    let stderr = String::from_utf8_lossy(&out.stderr);
    assert!(stderr.contains("clustering.bogus"), "stderr must name the key: {}", stderr);
}

#[test]
fn test_missing_config_exits_2() {
    let dir = tempfile::tempdir().expect("tempdir");
    let out = cli(&["validate", "--config", "missing.toml"], dir.path());
    assert_eq!(out.status.code(), Some(2));
}

#[test]
fn test_synth_then_track_writes_outputs() {
    let dir = tempfile::tempdir().expect("tempdir");
    let synth = cli(&["synth", "--output", "sessions", "--n-sessions", "3", "--seed", "9"], dir.path());
    assert_eq!(synth.status.code(), Some(0), "synth failed: {}", String::from_utf8_lossy(&synth.stderr));
    assert!(dir.path().join("sessions/session_000.json").is_file());

    std::fs::write(
        dir.path().join("run.toml"),
        "[clustering.automatic_mixing.kwargs_findParameters]\nmax_trials = 10\n",
    )
    .expect("write config");
    let track = cli(
        &["track", "--config", "run.toml", "--data-dir", "sessions", "--output", "out"],
        dir.path(),
    );
    assert_eq!(track.status.code(), Some(0), "track failed: {}", String::from_utf8_lossy(&track.stderr));
    for name in ["results.json", "run_data.json", "run_data_hashes.json"] {
        assert!(dir.path().join("out").join(name).is_file(), "{} must be written", name);
    }
    println!("[PASS] synth then track");
}
