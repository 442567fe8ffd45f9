use std::path::{Path, PathBuf};

use assert_cmd::Command;
use predicates::prelude::*;
use tempfile::TempDir;

/// Raw milk R (100 kg) -> curd B1 (40 kg, uses 40 kg) -> cheese B2 (10 kg, uses 10 kg).
const CHAIN: &str = r#"{
  "batches": [
    {"id": 1, "batch_number": "R", "type": "raw-material", "status": "completed",
     "product_name": "Raw milk", "quantity": 100.0, "unit": "kg", "production_date": "2025-01-01"},
    {"id": 2, "batch_number": "B1", "type": "intermediate", "status": "completed",
     "product_name": "Curd", "quantity": 40.0, "unit": "kg", "production_date": "2025-01-02"},
    {"id": 3, "batch_number": "B2", "type": "final-product", "status": "released",
     "product_name": "Cheese", "quantity": 10.0, "unit": "kg", "production_date": "2025-01-03"}
  ],
  "links": [
    {"id": 1, "source_batch_id": 1, "target_batch_id": 2, "link_type": "ingredient",
     "quantity_used": 40.0, "process_step": "curdling", "process_date": "2025-01-02"},
    {"id": 2, "source_batch_id": 2, "target_batch_id": 3, "link_type": "ingredient",
     "quantity_used": 10.0, "process_step": "pressing", "process_date": "2025-01-03"}
  ]
}"#;

fn write_snapshot(dir: &TempDir) -> PathBuf {
    let path = dir.path().join("lineage.json");
    std::fs::write(&path, CHAIN).unwrap();
    path
}

fn lineage() -> Command {
    let mut cmd = Command::cargo_bin("lineage").unwrap();
    cmd.env_remove("LINEAGE_DB").env_remove("LINEAGE_CONFIG");
    cmd
}

fn json_stdout(cmd: &mut Command) -> serde_json::Value {
    let output = cmd.output().unwrap();
    assert!(
        output.status.success(),
        "command failed: {}",
        String::from_utf8_lossy(&output.stderr)
    );
    serde_json::from_slice(&output.stdout).unwrap()
}

fn import(snapshot: &Path, db: &Path) {
    lineage()
        .arg("import")
        .arg(snapshot)
        .arg("--db")
        .arg(db)
        .assert()
        .success()
        .stdout(predicate::str::contains("Imported 3 batches and 2 links"));
}

#[test]
fn trace_text_shows_downstream_chain() {
    let dir = TempDir::new().unwrap();
    let snapshot = write_snapshot(&dir);

    lineage()
        .args(["trace", "R", "--snapshot"])
        .arg(&snapshot)
        .assert()
        .success()
        .stdout(predicate::str::contains("Downstream:"))
        .stdout(predicate::str::contains("L1 B1 (Curd)"))
        .stdout(predicate::str::contains("L2 B2 (Cheese)"))
        .stdout(predicate::str::contains("Upstream:").not());
}

#[test]
fn trace_json_backward_from_product() {
    let dir = TempDir::new().unwrap();
    let snapshot = write_snapshot(&dir);

    let tree = json_stdout(
        lineage()
            .args(["trace", "B2", "--direction", "backward", "--format", "json", "--snapshot"])
            .arg(&snapshot),
    );
    assert_eq!(tree["direction"], "backward");
    assert_eq!(tree["upstream"][0]["batch"]["batch_number"], "B1");
    assert_eq!(tree["upstream"][0]["children"][0]["batch"]["batch_number"], "R");
    assert_eq!(tree["truncated"], false);
}

#[test]
fn recall_json_totals_chain() {
    let dir = TempDir::new().unwrap();
    let snapshot = write_snapshot(&dir);

    let report = json_stdout(
        lineage()
            .args(["recall", "R", "--likelihood", "4", "--severity", "4", "--format", "json"])
            .arg("--snapshot")
            .arg(&snapshot),
    );
    assert_eq!(report["total_affected_batches"], 2);
    assert_eq!(report["total_affected_quantity"], 50.0);
    assert_eq!(report["quantity_unit"], "kg");
    assert_eq!(report["risk_level"], "critical");
    assert_eq!(report["hazard"]["strategy"], "ccp");
}

#[test]
fn recall_text_lists_actions() {
    let dir = TempDir::new().unwrap();
    let snapshot = write_snapshot(&dir);

    lineage()
        .args(["recall", "R", "--snapshot"])
        .arg(&snapshot)
        .assert()
        .success()
        .stdout(predicate::str::contains("Affected batches: 2, quantity: 50 kg"))
        .stdout(predicate::str::contains("Risk: low"))
        .stdout(predicate::str::contains("retrieve and hold: B2"));
}

#[test]
fn unknown_batch_exits_not_found() {
    let dir = TempDir::new().unwrap();
    let snapshot = write_snapshot(&dir);

    lineage()
        .args(["recall", "NOPE", "--snapshot"])
        .arg(&snapshot)
        .assert()
        .code(3)
        .stderr(predicate::str::contains("Not found"));
}

#[test]
fn zero_depth_exits_invalid_input() {
    let dir = TempDir::new().unwrap();
    let snapshot = write_snapshot(&dir);

    lineage()
        .args(["trace", "R", "--depth", "0", "--snapshot"])
        .arg(&snapshot)
        .assert()
        .code(2)
        .stderr(predicate::str::contains("Invalid input"));
}

#[test]
fn missing_source_is_reported() {
    lineage()
        .args(["trace", "R"])
        .assert()
        .code(3)
        .stderr(predicate::str::contains("No lineage source"));
}

#[test]
fn classify_reports_level_and_strategy() {
    lineage()
        .args(["classify", "4", "4"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Score 16"))
        .stdout(predicate::str::contains("critical risk, control as CCP"));

    lineage().args(["classify", "6", "1"]).assert().code(2);
}

#[test]
fn classify_uses_config_thresholds() {
    let dir = TempDir::new().unwrap();
    let config = dir.path().join("lineage.toml");
    std::fs::write(&config, "[risk]\nlow_max = 1\nmedium_max = 2\nhigh_max = 3\n").unwrap();

    lineage()
        .args(["classify", "2", "2", "--config"])
        .arg(&config)
        .assert()
        .success()
        .stdout(predicate::str::contains("critical risk"));
}

#[test]
fn decide_walks_tree_to_outcome() {
    lineage()
        .args(["decide", "yes", "no", "yes", "no"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Q4"))
        .stdout(predicate::str::contains("Outcome: Ccp (control: CCP)"));

    lineage()
        .args(["decide", "n", "y"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Outcome: ModifyProcess"));
}

#[test]
fn decide_partial_answers_show_next_question() {
    lineage()
        .args(["decide", "yes"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Next: Q2"));
}

#[test]
fn decide_rejects_answers_after_outcome() {
    lineage()
        .args(["decide", "yes", "yes", "no"])
        .assert()
        .code(2);
}

#[test]
fn import_then_trace_from_database() {
    let dir = TempDir::new().unwrap();
    let snapshot = write_snapshot(&dir);
    let db = dir.path().join("lineage.db");
    import(&snapshot, &db);

    let tree = json_stdout(
        lineage()
            .args(["trace", "B1", "--direction", "full", "--format", "json", "--db"])
            .arg(&db),
    );
    assert_eq!(tree["downstream"][0]["batch"]["batch_number"], "B2");
    assert_eq!(tree["upstream"][0]["batch"]["batch_number"], "R");
}

#[test]
fn link_records_with_warnings() {
    let dir = TempDir::new().unwrap();
    let snapshot = write_snapshot(&dir);
    let db = dir.path().join("lineage.db");
    import(&snapshot, &db);

    // R has 60 kg left after the 40 kg used for B1.
    lineage()
        .args([
            "link", "--source", "R", "--target", "B2", "--quantity", "70", "--date",
            "2025-01-04", "--db",
        ])
        .arg(&db)
        .assert()
        .success()
        .stdout(predicate::str::contains("Recorded link 3: R -> B2"))
        .stdout(predicate::str::contains("exceeds-remaining"));

    lineage()
        .args(["link", "--source", "R", "--target", "R", "--quantity", "1", "--db"])
        .arg(&db)
        .assert()
        .code(2);
}

#[test]
fn missing_database_is_not_created() {
    let dir = TempDir::new().unwrap();
    let db = dir.path().join("absent.db");

    lineage()
        .args(["trace", "R", "--db"])
        .arg(&db)
        .assert()
        .code(3);
    assert!(!db.exists());
}
