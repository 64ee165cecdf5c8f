//! End-to-end tests of the `moonbeam` binary

use assert_cmd::Command;
use moonbeam_core::tokenizer::{midi::render_midi, midi::DEFAULT_TEMPO, Note};
use predicates::prelude::*;
use std::path::{Path, PathBuf};
use tempfile::TempDir;

/// Config pointing the engine at an empty working directory
fn write_config(dir: &Path) -> PathBuf {
    let working_dir = toml::Value::String(dir.display().to_string());
    let path = dir.join("config.toml");
    std::fs::write(
        &path,
        format!("model_dirs = []\n\n[engine]\nworking_dir = {}\n", working_dir),
    )
    .unwrap();
    path
}

fn write_phrase(dir: &Path) -> PathBuf {
    let notes: Vec<Note> = (0..8)
        .map(|i| Note {
            pitch: 60 + (i % 5) as u8,
            velocity: 90,
            start: i * 8,
            duration: 8,
        })
        .collect();
    let path = dir.join("phrase.mid");
    std::fs::write(&path, render_midi(&notes, 8, 480, DEFAULT_TEMPO).unwrap()).unwrap();
    path
}

fn moonbeam(config: &Path) -> Command {
    let mut cmd = Command::cargo_bin("moonbeam").unwrap();
    cmd.env_remove("MOONBEAM_CONFIG").arg("--config").arg(config);
    cmd
}

#[test]
fn info_reports_missing_model() {
    let dir = TempDir::new().unwrap();
    let config = write_config(dir.path());

    moonbeam(&config)
        .args(["info", "--json"])
        .assert()
        .success()
        .stdout(predicate::str::contains("\"available\": false"))
        .stdout(predicate::str::contains("\"vocab_size\": 259"));
}

#[test]
fn tokenize_prints_prompt_ids() {
    let dir = TempDir::new().unwrap();
    let config = write_config(dir.path());
    let midi = write_phrase(dir.path());

    let output = moonbeam(&config)
        .arg("tokenize")
        .arg("--midi")
        .arg(&midi)
        .arg("--raw")
        .output()
        .unwrap();
    assert!(output.status.success());

    let stdout = String::from_utf8(output.stdout).unwrap();
    let ids: Vec<u32> = stdout.split_whitespace().map(|t| t.parse().unwrap()).collect();
    // BOS, then 8 notes: the first has no time shift, the rest one each
    assert_eq!(ids[0], 1);
    assert_eq!(ids.len(), 1 + 3 + 7 * 4);
}

#[test]
fn tokenize_table_names_tokens() {
    let dir = TempDir::new().unwrap();
    let config = write_config(dir.path());
    let midi = write_phrase(dir.path());

    moonbeam(&config)
        .arg("tokenize")
        .arg("--midi")
        .arg(&midi)
        .args(["--limit", "4"])
        .assert()
        .success()
        .stdout(predicate::str::contains("<bos>"))
        .stdout(predicate::str::contains("pitch:60"));
}

#[test]
fn tokenize_missing_file_fails() {
    let dir = TempDir::new().unwrap();
    let config = write_config(dir.path());

    moonbeam(&config)
        .arg("tokenize")
        .arg("--midi")
        .arg(dir.path().join("absent.mid"))
        .assert()
        .failure()
        .stderr(predicate::str::contains("MIDI_FILE_NOT_FOUND"));
}

#[test]
fn generate_without_model_fails() {
    let dir = TempDir::new().unwrap();
    let config = write_config(dir.path());
    let midi = write_phrase(dir.path());

    moonbeam(&config)
        .arg("generate")
        .arg("--midi")
        .arg(&midi)
        .assert()
        .failure()
        .stderr(predicate::str::contains("Model is not loaded"));

    assert!(!dir.path().join("phrase_generated.mid").exists());
}
