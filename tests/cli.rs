use assert_cmd::prelude::*;
use predicates::prelude::*;
use std::fs;
use std::path::Path;
use std::process::Command;
use tempfile::tempdir;

const SNAPSHOT: &str = r#"{"format":"ldtree-graph","version":1,"libraries":[
    {"name":"app","entries":[
        {"kind":"resolved","name":"libA.so"},
        {"kind":"missing","name":"libX.so"}]},
    {"name":"libA.so","entries":[]},
    {"name":"libZ.so.1","entries":[]}]}"#;

fn ldtree() -> Command {
    Command::cargo_bin("ldtree").unwrap()
}

/// A tree matching SNAPSHOT, plus the snapshot itself outside of it
fn tree_with_snapshot(root: &Path) -> std::path::PathBuf {
    let tree = root.join("tree");
    fs::create_dir_all(tree.join("bin")).unwrap();
    fs::create_dir_all(tree.join("lib")).unwrap();
    fs::write(tree.join("bin/app"), "app").unwrap();
    fs::write(tree.join("lib/libA.so"), "a").unwrap();
    fs::write(tree.join("lib/libZ.so.1"), "z").unwrap();
    let snapshot = root.join("graph.json");
    fs::write(&snapshot, SNAPSHOT).unwrap();
    snapshot
}

#[test]
fn a_mode_is_required() {
    ldtree()
        .assert()
        .code(2)
        .stderr(predicate::str::contains("required"));
}

#[test]
fn modes_are_exclusive() {
    ldtree().args(["-n", "-m"]).assert().code(2);
    ldtree().args(["-p", "graph.json", "-n"]).assert().code(2);
    ldtree().args(["-p", "graph.json", "-i", "other.json"]).assert().code(2);
    ldtree().args(["--jobs", "0", "-m"]).assert().code(2);
}

#[test]
fn persist_then_query() {
    let dir = tempdir().unwrap();
    let tree = dir.path().join("tree");
    fs::create_dir_all(tree.join("sub")).unwrap();
    fs::write(tree.join("notes.txt"), "not a binary").unwrap();
    fs::write(tree.join("sub/readme"), "neither").unwrap();
    let snapshot = dir.path().join("graph.json");

    ldtree()
        .arg("-d")
        .arg(&tree)
        .arg("-p")
        .arg(&snapshot)
        .args(["--reader", "elf"])
        .assert()
        .success();

    let content = fs::read_to_string(&snapshot).unwrap();
    assert!(content.contains("ldtree-graph"));

    ldtree()
        .arg("-d")
        .arg(&tree)
        .arg("-i")
        .arg(&snapshot)
        .arg("-m")
        .assert()
        .success()
        .stdout(predicate::str::is_empty());
}

#[test]
fn missing_snapshot_is_fatal() {
    let dir = tempdir().unwrap();
    ldtree()
        .arg("-d")
        .arg(dir.path())
        .arg("-i")
        .arg(dir.path().join("nope.json"))
        .arg("-m")
        .assert()
        .code(1)
        .stderr(predicate::str::contains("cannot load snapshot"));
}

#[test]
fn queries_on_a_snapshot() {
    let dir = tempdir().unwrap();
    let snapshot = tree_with_snapshot(dir.path());
    let tree = dir.path().join("tree");
    let output = dir.path().join("missing.txt");

    ldtree()
        .arg("-d")
        .arg(&tree)
        .arg("-i")
        .arg(&snapshot)
        .arg("-m")
        .arg("-o")
        .arg(&output)
        .assert()
        .success()
        .stdout(predicate::str::contains("app libX.so"));
    assert_eq!(fs::read_to_string(&output).unwrap(), "app libX.so\n");

    ldtree()
        .arg("-d")
        .arg(&tree)
        .arg("-i")
        .arg(&snapshot)
        .args(["-c", "libA.so"])
        .assert()
        .success()
        .stdout(predicate::str::contains("bin").and(predicate::str::contains("app")));

    ldtree()
        .arg("-d")
        .arg(&tree)
        .arg("-i")
        .arg(&snapshot)
        .args(["-c", "libNope.so"])
        .assert()
        .success()
        .stdout(predicate::str::contains("libNope.so not found"));

    ldtree()
        .arg("-d")
        .arg(&tree)
        .arg("-i")
        .arg(&snapshot)
        .arg("-n")
        .assert()
        .success()
        .stdout(predicate::str::contains("libZ.so.1").and(predicate::str::contains("libA.so").not()));
}

#[test]
fn json_search() {
    let dir = tempdir().unwrap();
    let snapshot = tree_with_snapshot(dir.path());
    let tree = dir.path().join("tree");

    let assert = ldtree()
        .arg("-d")
        .arg(&tree)
        .arg("-i")
        .arg(&snapshot)
        .args(["-s", "libA", "--json"])
        .assert()
        .success();
    let stdout = String::from_utf8(assert.get_output().stdout.clone()).unwrap();
    let hits: serde_json::Value = serde_json::from_str(&stdout).unwrap();
    let hits = hits.as_array().unwrap();
    assert_eq!(hits.len(), 1);
    assert_eq!(hits[0]["name"], "libA.so");
    assert_eq!(hits[0]["is_link"], false);
    assert_eq!(hits[0]["dependents"][0], "app");
}
