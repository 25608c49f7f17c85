//! CLI integration tests for docket
//!
//! These tests drive the binary through complete workflows, from
//! initialization through scheduling, ensuring commands work together.

use predicates::prelude::*;
use std::fs;
use std::path::Path;
use tempfile::TempDir;

/// Get a command instance for the docket binary
fn docket_cmd() -> assert_cmd::Command {
    let mut cmd = assert_cmd::Command::new(assert_cmd::cargo::cargo_bin!("docket"));
    cmd.env_remove("DOCKET_ROOT").env("DOCKET_AGENT", "test-agent");
    cmd
}

/// Create a temporary directory and initialize a docket project
fn setup_project() -> TempDir {
    let dir = TempDir::new().unwrap();
    docket_cmd().arg("init").arg(dir.path()).assert().success();
    dir
}

/// Runs a command with `--format json` and parses stdout
fn json(dir: &Path, args: &[&str]) -> serde_json::Value {
    let output = docket_cmd()
        .current_dir(dir)
        .args(args)
        .args(["--format", "json"])
        .assert()
        .success();
    let stdout = String::from_utf8_lossy(&output.get_output().stdout).to_string();
    serde_json::from_str(&stdout).unwrap()
}

/// Adds an item and returns its id
fn add(dir: &Path, args: &[&str]) -> String {
    let mut full = vec!["add"];
    full.extend_from_slice(args);
    json(dir, &full)["id"].as_str().unwrap().to_string()
}

fn ids(value: &serde_json::Value) -> Vec<String> {
    value
        .as_array()
        .unwrap()
        .iter()
        .map(|item| item["id"].as_str().unwrap().to_string())
        .collect()
}

// =============================================================================
// Initialization Tests
// =============================================================================

#[test]
fn test_init_creates_structure() {
    let dir = TempDir::new().unwrap();

    docket_cmd()
        .arg("init")
        .arg(dir.path())
        .assert()
        .success()
        .stdout(predicate::str::contains("Initialized docket project"));

    assert!(dir.path().join(".docket/items").is_dir());
    assert!(dir.path().join(".docket/config.toml").is_file());
    assert!(dir.path().join(".docket/.gitignore").is_file());
}

#[test]
fn test_init_is_idempotent() {
    let dir = TempDir::new().unwrap();
    docket_cmd().arg("init").arg(dir.path()).assert().success();
    docket_cmd().arg("init").arg(dir.path()).assert().success();
}

#[test]
fn test_commands_outside_project_fail() {
    let dir = TempDir::new().unwrap();

    docket_cmd()
        .current_dir(dir.path())
        .arg("list")
        .assert()
        .failure()
        .stderr(predicate::str::contains("Not in a docket project"));
}

#[test]
fn test_docket_root_env_selects_project() {
    let dir = setup_project();
    let elsewhere = TempDir::new().unwrap();

    docket_cmd()
        .current_dir(elsewhere.path())
        .env("DOCKET_ROOT", dir.path())
        .args(["add", "Remote add"])
        .assert()
        .success();

    docket_cmd()
        .current_dir(dir.path())
        .arg("list")
        .assert()
        .success()
        .stdout(predicate::str::contains("Remote add"));
}

// =============================================================================
// Item Tests
// =============================================================================

#[test]
fn test_add_and_show() {
    let dir = setup_project();
    let id = add(dir.path(), &["Write the parser\nHandle nested blocks.", "-p", "3", "-t", "core"]);

    assert!(id.starts_with("t-"));
    assert!(dir.path().join(format!(".docket/items/{id}.json")).is_file());

    docket_cmd()
        .current_dir(dir.path())
        .args(["show", &id])
        .assert()
        .success()
        .stdout(predicate::str::contains("Title: Write the parser"))
        .stdout(predicate::str::contains("Priority: 3"))
        .stdout(predicate::str::contains("Handle nested blocks."))
        .stdout(predicate::str::contains("created"));
}

#[test]
fn test_add_with_unknown_dependency_fails() {
    let dir = setup_project();

    docket_cmd()
        .current_dir(dir.path())
        .args(["add", "Orphan", "--depends-on", "t-0000000"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("Item not found: t-0000000"));
}

#[test]
fn test_show_invalid_id_fails() {
    let dir = setup_project();

    docket_cmd()
        .current_dir(dir.path())
        .args(["show", "nope"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("Invalid item id"));
}

#[test]
fn test_list_hides_done_items_unless_all() {
    let dir = setup_project();
    let a = add(dir.path(), &["Finished thing"]);
    add(dir.path(), &["Open thing"]);

    docket_cmd()
        .current_dir(dir.path())
        .args(["done", &a])
        .assert()
        .success();

    docket_cmd()
        .current_dir(dir.path())
        .arg("list")
        .assert()
        .success()
        .stdout(predicate::str::contains("Open thing"))
        .stdout(predicate::str::contains("Finished thing").not());

    docket_cmd()
        .current_dir(dir.path())
        .args(["list", "--all"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Finished thing"));
}

// =============================================================================
// Dependency Tests
// =============================================================================

#[test]
fn test_dependency_cycle_is_rejected() {
    let dir = setup_project();
    let a = add(dir.path(), &["A"]);
    let b = add(dir.path(), &["B"]);

    docket_cmd()
        .current_dir(dir.path())
        .args(["dep", &b, &a])
        .assert()
        .success()
        .stdout(predicate::str::contains("now depends on"));

    docket_cmd()
        .current_dir(dir.path())
        .args(["dep", &a, &b])
        .assert()
        .failure()
        .stderr(predicate::str::contains("cycle"));

    docket_cmd()
        .current_dir(dir.path())
        .args(["dep", &a, &a])
        .assert()
        .failure()
        .stderr(predicate::str::contains("Self-dependency"));
}

#[test]
fn test_order_respects_dependencies_and_priority() {
    let dir = setup_project();
    let base = add(dir.path(), &["Base", "-p", "50"]);
    let urgent = add(dir.path(), &["Urgent", "-p", "1"]);
    let top = add(dir.path(), &["Top", "-p", "0", "--depends-on", &base]);

    let ordered = json(dir.path(), &["order"]);
    assert_eq!(ordered["acyclic"], true);
    assert_eq!(ids(&ordered["items"]), vec![urgent, base, top]);
}

#[test]
fn test_undep_unblocks() {
    let dir = setup_project();
    let a = add(dir.path(), &["A"]);
    let b = add(dir.path(), &["B", "--depends-on", &a]);

    let available = json(dir.path(), &["available"]);
    assert!(!ids(&available["items"]).contains(&b));

    docket_cmd()
        .current_dir(dir.path())
        .args(["undep", &b, &a])
        .assert()
        .success();

    let available = json(dir.path(), &["available"]);
    assert!(ids(&available["items"]).contains(&b));
}

// =============================================================================
// Scheduling Tests
// =============================================================================

#[test]
fn test_end_to_end_scheduling() {
    let dir = setup_project();
    assert!(ids(&json(dir.path(), &["available"])["items"]).is_empty());

    let a = add(dir.path(), &["A"]);
    let b = add(dir.path(), &["B", "--depends-on", &a]);

    let ordered = json(dir.path(), &["order"]);
    assert_eq!(ids(&ordered["items"]), vec![a.clone(), b.clone()]);

    let claimed = json(dir.path(), &["claim", &a]);
    assert_eq!(claimed["lease_holder"], "test-agent");
    assert!(ids(&json(dir.path(), &["available"])["items"]).is_empty());

    docket_cmd()
        .current_dir(dir.path())
        .args(["done", &a])
        .assert()
        .success();
    assert_eq!(ids(&json(dir.path(), &["available"])["items"]), vec![b]);
}

#[test]
fn test_claim_next_and_current_pointer() {
    let dir = setup_project();
    let a = add(dir.path(), &["Only item"]);

    let claimed = json(dir.path(), &["claim"]);
    assert_eq!(claimed["id"], a.as_str());

    let current = json(dir.path(), &["current"]);
    assert_eq!(current["current"], a.as_str());

    // Nothing left to claim
    let none = json(dir.path(), &["claim"]);
    assert!(none.is_null());

    docket_cmd()
        .current_dir(dir.path())
        .args(["current", "clear"])
        .assert()
        .success();
    assert!(json(dir.path(), &["current"])["current"].is_null());
}

#[test]
fn test_claim_leased_item_fails() {
    let dir = setup_project();
    let a = add(dir.path(), &["Busy"]);

    docket_cmd()
        .current_dir(dir.path())
        .args(["claim", &a])
        .assert()
        .success();

    docket_cmd()
        .current_dir(dir.path())
        .args(["claim", &a, "--holder", "someone-else"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("not available"));

    docket_cmd()
        .current_dir(dir.path())
        .args(["release", &a])
        .assert()
        .success()
        .stdout(predicate::str::contains("Released"));
}

#[test]
fn test_overlong_lease_is_rejected() {
    let dir = setup_project();
    let a = add(dir.path(), &["Long haul"]);

    docket_cmd()
        .current_dir(dir.path())
        .args(["claim", &a, "--lease-minutes", "300000000000"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("too long"));

    docket_cmd()
        .current_dir(dir.path())
        .args(["status", &a, "claimed", "--lease-minutes", "9000000000000000000"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("out of range"));

    let item = json(dir.path(), &["show", &a]);
    assert!(item["item"]["lease_until"].is_null());
}

#[test]
fn test_status_transitions() {
    let dir = setup_project();
    let a = add(dir.path(), &["Review me"]);
    let original = add(dir.path(), &["Original"]);

    let reviewed = json(dir.path(), &["status", &a, "review"]);
    assert_eq!(reviewed["review_ready"], true);
    assert_eq!(ids(&json(dir.path(), &["review"])), vec![a.clone()]);

    let closed = json(dir.path(), &["status", &a, "closed", "--duplicate-of", &original]);
    assert_eq!(closed["done"], true);
    assert_eq!(closed["done_status"], "closed");
    assert_eq!(closed["notes"]["duplicate_of"], original.as_str());

    let reopened = json(dir.path(), &["status", &a, "undone"]);
    assert_eq!(reopened["done"], false);
    assert_eq!(reopened["done_status"], "none");

    let kinds: Vec<_> = reopened["log"]
        .as_array()
        .unwrap()
        .iter()
        .map(|e| e["kind"].as_str().unwrap().to_string())
        .collect();
    assert_eq!(kinds, vec!["created", "review_ready", "duplicate_of", "undone"]);
}

#[test]
fn test_invalid_status_is_rejected() {
    let dir = setup_project();
    let a = add(dir.path(), &["A"]);

    docket_cmd()
        .current_dir(dir.path())
        .args(["status", &a, "finished"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("Unknown status 'finished'"));
}

#[test]
fn test_tags_filter_available() {
    let dir = setup_project();
    let tagged = add(dir.path(), &["Tagged"]);
    add(dir.path(), &["Plain"]);

    docket_cmd()
        .current_dir(dir.path())
        .args(["tag", &tagged, "agent"])
        .assert()
        .success();

    let available = json(dir.path(), &["available", "--tag", "agent"]);
    assert_eq!(ids(&available["items"]), vec![tagged]);
}

#[test]
fn test_note_is_recorded() {
    let dir = setup_project();
    let a = add(dir.path(), &["Noted"]);

    docket_cmd()
        .current_dir(dir.path())
        .args(["note", &a, "plan", "Start with the lexer"])
        .assert()
        .success();

    let shown = json(dir.path(), &["show", &a]);
    assert_eq!(shown["item"]["notes"]["plan"], "Start with the lexer");
}

// =============================================================================
// Agent Tests
// =============================================================================

#[test]
fn test_agent_stop_writes_marker() {
    let dir = setup_project();

    docket_cmd()
        .current_dir(dir.path())
        .args(["agent", "stop"])
        .assert()
        .success();

    assert!(dir.path().join(".docket/agent.stop").is_file());
}

#[test]
fn test_agent_run_requires_command() {
    let dir = setup_project();

    docket_cmd()
        .current_dir(dir.path())
        .args(["agent", "run", "--until-empty"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("No command template configured"));
}

#[test]
fn test_agent_run_exits_on_empty_queue() {
    let dir = setup_project();
    fs::write(dir.path().join(".docket/agent.stop"), "").unwrap();

    // The stale marker is cleared on start; the empty queue ends the run.
    docket_cmd()
        .current_dir(dir.path())
        .args(["agent", "run", "--until-empty", "--command", "true"])
        .assert()
        .success()
        .stdout(predicate::str::contains("after 0 iteration"));

    assert!(!dir.path().join(".docket/agent.stop").exists());
}
