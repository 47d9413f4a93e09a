//! End-to-end tests for the `tally` binary.

use assert_cmd::Command;
use predicates::prelude::*;
use std::fs;
use std::path::Path;
use tempfile::TempDir;

fn tally(dir: &Path) -> Command {
    let mut cmd = Command::new(assert_cmd::cargo::cargo_bin!("tally"));
    cmd.current_dir(dir);
    cmd.env("TALLY_LOG", "error");
    cmd.env_remove("TALLY_COALESCE_MS");
    cmd
}

fn project() -> TempDir {
    let dir = TempDir::new().expect("tempdir");
    fs::create_dir_all(dir.path().join(".tally")).expect("mkdir");
    fs::write(
        dir.path().join(".tally/config.toml"),
        "[coalesce]\nwindow_ms = 50\n\n[states]\nselection = \"set\"\nvote = \"scalar\"\n",
    )
    .expect("write config");
    dir
}

fn write(dir: &Path, name: &str, body: &str) {
    fs::write(dir.join(name), body).expect("write file");
}

const PAYLOAD: &str = r#"{"participant_data":{
    "frodo":{"selection":"red,blue","vote":3},
    "sam":{"vote":null,"mood":"tired"}
}}"#;

#[test]
fn inspect_json_types_registered_states() {
    let dir = project();
    write(dir.path(), "payload.json", PAYLOAD);

    let out = tally(dir.path())
        .args(["inspect", "payload.json", "--json"])
        .output()
        .expect("run");
    assert!(out.status.success());

    let json: serde_json::Value = serde_json::from_slice(&out.stdout).expect("json");
    assert_eq!(
        json["participants"]["frodo"]["selection"]["value"],
        serde_json::json!(["blue", "red"])
    );
    assert_eq!(json["participants"]["frodo"]["vote"]["type"], "scalar");
    assert!(json["participants"]["sam"]["vote"]["value"].is_null());
    assert_eq!(json["unregistered"], serde_json::json!(["mood"]));
}

#[test]
fn inspect_pretty_lists_participants() {
    let dir = project();
    write(dir.path(), "payload.json", PAYLOAD);

    tally(dir.path())
        .args(["inspect", "payload.json"])
        .assert()
        .success()
        .stdout(predicate::str::contains("frodo"))
        .stdout(predicate::str::contains("[blue, red] (set)"))
        .stdout(predicate::str::contains("Unregistered:  mood"));
}

#[test]
fn inspect_rejects_malformed_payload() {
    let dir = project();
    write(dir.path(), "payload.json", "{\"participant_data\": [1, 2]}");

    tally(dir.path())
        .args(["inspect", "payload.json"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("Failed to parse"));
}

#[test]
fn script_coalesces_into_one_update() {
    let dir = project();
    write(
        dir.path(),
        "votes.tally",
        "add selection red\n\
         advance 20\n\
         add selection blue\n\
         advance 40   # window closes\n\
         show selection\n",
    );

    let out = tally(dir.path())
        .args(["script", "votes.tally", "--as", "frodo", "--json"])
        .output()
        .expect("run");
    assert!(out.status.success(), "{}", String::from_utf8_lossy(&out.stderr));

    let events: Vec<serde_json::Value> = serde_json::from_slice(&out.stdout).expect("json");
    let updates: Vec<&serde_json::Value> =
        events.iter().filter(|e| e["kind"] == "update").collect();
    assert_eq!(updates.len(), 1);
    assert_eq!(updates[0]["at_ms"], 60);
    assert_eq!(
        updates[0]["update"]["participant_data"]["frodo"]["selection"],
        "blue,red"
    );
    assert_eq!(updates[0]["update"]["operations"].as_array().map(Vec::len), Some(2));

    let read = events.last().expect("read event");
    assert_eq!(read["kind"], "read");
    assert_eq!(read["value"], serde_json::json!(["blue", "red"]));
}

#[test]
fn script_window_override_takes_effect() {
    let dir = project();
    write(dir.path(), "s.tally", "add vote 1\nadvance 10\n");

    tally(dir.path())
        .args(["script", "s.tally", "--window-ms", "10"])
        .assert()
        .success()
        .stdout(predicate::str::contains("sent 1 operation(s)"));
}

#[test]
fn script_error_names_the_line() {
    let dir = project();
    write(dir.path(), "bad.tally", "add vote 1\nadd mystery 2\n");

    tally(dir.path())
        .args(["script", "bad.tally"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("line 2"));
}

#[test]
fn sim_small_campaign_passes() {
    let dir = TempDir::new().expect("tempdir");

    let out = tally(dir.path())
        .args(["sim", "--seeds", "5", "--rounds", "10", "--json"])
        .output()
        .expect("run");
    assert!(out.status.success());

    let json: serde_json::Value = serde_json::from_slice(&out.stdout).expect("json");
    assert_eq!(json["seeds_run"], 5);
    assert_eq!(json["all_passed"], true);
}

#[test]
fn sim_replay_reports_oracle() {
    let dir = TempDir::new().expect("tempdir");

    tally(dir.path())
        .args(["sim", "--replay", "7", "--rounds", "8"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Replay seed 7"))
        .stdout(predicate::str::contains("passed"));
}
