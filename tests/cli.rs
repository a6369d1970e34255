//! Smoke-tests the `kishu` binary end to end through its subcommands, isolated from the real
//! platform data directory via `--path-root`.

use assert_cmd::cargo::cargo_bin_cmd;
use serde_json::Value;
use tempfile::TempDir;

fn write_notebook(dir: &TempDir, name: &str) -> std::path::PathBuf {
    let path = dir.path().join(name);
    std::fs::write(&path, r#"{"cells": [], "metadata": {}}"#).unwrap();
    path
}

#[test]
fn init_commit_log_status_roundtrip() {
    let sessions_root = TempDir::new().unwrap();
    let workdir = TempDir::new().unwrap();
    let notebook = write_notebook(&workdir, "analysis.ipynb");

    let key = cargo_bin_cmd!("kishu")
        .arg("--path-root")
        .arg(sessions_root.path())
        .arg("init")
        .arg(&notebook)
        .assert()
        .success()
        .get_output()
        .stdout
        .clone();
    let key = String::from_utf8(key).unwrap().trim().to_string();
    assert!(!key.is_empty());

    let notebook_contents: Value =
        serde_json::from_str(&std::fs::read_to_string(&notebook).unwrap()).unwrap();
    assert_eq!(
        notebook_contents["metadata"]["kishu"]["notebook_id"],
        Value::String(key.clone())
    );

    let commit_id = cargo_bin_cmd!("kishu")
        .arg("--path-root")
        .arg(sessions_root.path())
        .args(["commit", &key, "-m", "first commit"])
        .assert()
        .success()
        .get_output()
        .stdout
        .clone();
    let commit_id = String::from_utf8(commit_id).unwrap().trim().to_string();
    assert!(!commit_id.is_empty());

    let log_output = cargo_bin_cmd!("kishu")
        .arg("--path-root")
        .arg(sessions_root.path())
        .args(["log", &key, "--all"])
        .assert()
        .success()
        .get_output()
        .stdout
        .clone();
    let log_output = String::from_utf8(log_output).unwrap();
    assert!(log_output.contains(&commit_id));
    assert!(log_output.contains("first commit"));

    let status_output = cargo_bin_cmd!("kishu")
        .arg("--path-root")
        .arg(sessions_root.path())
        .args(["status", &key, &commit_id])
        .assert()
        .success()
        .get_output()
        .stdout
        .clone();
    let entry: Value = serde_json::from_slice(&status_output).unwrap();
    assert_eq!(entry["message"], Value::String("first commit".into()));

    cargo_bin_cmd!("kishu")
        .arg("--path-root")
        .arg(sessions_root.path())
        .arg("detach")
        .arg(&notebook)
        .assert()
        .success();
    let notebook_contents: Value =
        serde_json::from_str(&std::fs::read_to_string(&notebook).unwrap()).unwrap();
    assert!(notebook_contents["metadata"].get("kishu").is_none());
}

#[test]
fn branch_and_tag_roundtrip() {
    let sessions_root = TempDir::new().unwrap();
    let workdir = TempDir::new().unwrap();
    let notebook = write_notebook(&workdir, "nb.ipynb");

    let key = cargo_bin_cmd!("kishu")
        .arg("--path-root")
        .arg(sessions_root.path())
        .arg("init")
        .arg(&notebook)
        .assert()
        .success()
        .get_output()
        .stdout
        .clone();
    let key = String::from_utf8(key).unwrap().trim().to_string();

    cargo_bin_cmd!("kishu")
        .arg("--path-root")
        .arg(sessions_root.path())
        .args(["commit", &key, "-m", "base"])
        .assert()
        .success();

    let create_output = cargo_bin_cmd!("kishu")
        .arg("--path-root")
        .arg(sessions_root.path())
        .args(["branch", &key, "-c", "experiment"])
        .assert()
        .success()
        .get_output()
        .stdout
        .clone();
    assert!(String::from_utf8(create_output).unwrap().contains("experiment"));

    let branch_list = cargo_bin_cmd!("kishu")
        .arg("--path-root")
        .arg(sessions_root.path())
        .args(["branch", &key])
        .assert()
        .success()
        .get_output()
        .stdout
        .clone();
    let branch_list = String::from_utf8(branch_list).unwrap();
    assert!(branch_list.contains("experiment"));

    cargo_bin_cmd!("kishu")
        .arg("--path-root")
        .arg(sessions_root.path())
        .args(["tag", &key, "v1", "-m", "release"])
        .assert()
        .success();

    let tag_list = cargo_bin_cmd!("kishu")
        .arg("--path-root")
        .arg(sessions_root.path())
        .args(["tag", &key, "--list"])
        .assert()
        .success()
        .get_output()
        .stdout
        .clone();
    let tag_list = String::from_utf8(tag_list).unwrap();
    assert!(tag_list.contains("v1"));
    assert!(tag_list.contains("release"));
}

#[test]
fn list_reports_sessions_under_the_given_path_root() {
    let sessions_root = TempDir::new().unwrap();
    let workdir = TempDir::new().unwrap();
    let notebook = write_notebook(&workdir, "listed.ipynb");

    let key = cargo_bin_cmd!("kishu")
        .arg("--path-root")
        .arg(sessions_root.path())
        .arg("init")
        .arg(&notebook)
        .assert()
        .success()
        .get_output()
        .stdout
        .clone();
    let key = String::from_utf8(key).unwrap().trim().to_string();

    let listed = cargo_bin_cmd!("kishu")
        .arg("--path-root")
        .arg(sessions_root.path())
        .args(["list", "--all"])
        .assert()
        .success()
        .get_output()
        .stdout
        .clone();
    let listed = String::from_utf8(listed).unwrap();
    assert!(listed.contains(&key));
    assert!(listed.contains(&notebook.to_string_lossy().to_string()));
}
