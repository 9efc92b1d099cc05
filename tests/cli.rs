//! Smoke tests for the `anyfile` binary.

use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;
use tempfile::TempDir;

fn setup_test_env() -> (TempDir, PathBuf) {
    let tmp = TempDir::new().unwrap();
    let root = tmp.path().to_path_buf();

    let data_dir = root.join("data");
    fs::create_dir_all(&data_dir).unwrap();
    fs::write(
        data_dir.join("inventory.csv"),
        "sku,qty,updated\nA-1,4,2024-01-02\nB-2,0,2024-02-03\nC-3,12,2024-03-04\n",
    )
    .unwrap();

    let config_content = format!(
        r#"[paths]
data_dir = "{root}/data"
db_path = "{root}/out/tables.sqlite"
index_path = "{root}/out/index"

[embedding]
provider = "disabled"

[ocr]
provider = "disabled"
"#,
        root = root.display()
    );
    let config_path = root.join("anyfile.toml");
    fs::write(&config_path, config_content).unwrap();

    (tmp, config_path)
}

fn run_anyfile(config_path: &Path, args: &[&str]) -> (String, String, bool) {
    let output = Command::new(env!("CARGO_BIN_EXE_anyfile"))
        .arg("--config")
        .arg(config_path)
        .args(args)
        .output()
        .expect("failed to run anyfile binary");

    let stdout = String::from_utf8_lossy(&output.stdout).to_string();
    let stderr = String::from_utf8_lossy(&output.stderr).to_string();
    (stdout, stderr, output.status.success())
}

#[test]
fn test_tables_then_sql() {
    let (tmp, config) = setup_test_env();

    let (stdout, stderr, ok) = run_anyfile(&config, &["tables"]);
    assert!(ok, "tables failed: {stderr}");
    assert!(stdout.contains("TABLE CARD: inventory"), "{stdout}");
    assert!(stdout.contains("columns: sku:VARCHAR, qty:BIGINT, updated:DATE"));
    assert!(tmp.path().join("out/tables.sqlite").is_file());

    let (stdout, stderr, ok) = run_anyfile(
        &config,
        &["sql", "SELECT SUM(qty) AS total FROM inventory"],
    );
    assert!(ok, "sql failed: {stderr}");
    assert!(stdout.trim_end().ends_with("16"), "{stdout}");

    let (stdout, _, ok) = run_anyfile(&config, &["sql", "DELETE FROM inventory"]);
    assert!(ok);
    assert_eq!(
        stdout.trim(),
        "Query blocked: Only SELECT/PRAGMA queries are allowed."
    );

    let (stdout, _, ok) = run_anyfile(&config, &["schema"]);
    assert!(ok);
    assert_eq!(stdout.trim(), "inventory");

    let (stdout, _, ok) = run_anyfile(&config, &["schema", "inventory"]);
    assert!(ok);
    assert!(stdout.contains("CREATE TABLE"));

    let (_, stderr, ok) = run_anyfile(&config, &["schema", "missing"]);
    assert!(!ok);
    assert!(stderr.contains("missing"), "{stderr}");
}

#[test]
fn test_sql_without_database_fails() {
    let (_tmp, config) = setup_test_env();
    let (_, stderr, ok) = run_anyfile(&config, &["sql", "SELECT 1"]);
    assert!(!ok);
    assert!(stderr.contains("no table database"), "{stderr}");
}

#[test]
fn test_index_with_disabled_embeddings_writes_nothing() {
    let (tmp, config) = setup_test_env();
    let (_, stderr, ok) = run_anyfile(&config, &["index"]);
    assert!(!ok);
    assert!(stderr.contains("no index was written"), "{stderr}");
    assert!(!tmp.path().join("out/index").exists());
}

#[test]
fn test_tools_lists_schemas() {
    let (_tmp, config) = setup_test_env();
    let (stdout, _, ok) = run_anyfile(&config, &["tools"]);
    assert!(ok);
    let tools: serde_json::Value = serde_json::from_str(&stdout).unwrap();
    assert_eq!(tools.as_array().unwrap().len(), 4);
    assert_eq!(tools[0]["name"], "retrieve");
}

#[test]
fn test_retrieve_rejects_unknown_tag() {
    let (_tmp, config) = setup_test_env();
    let (_, stderr, ok) = run_anyfile(&config, &["retrieve", "anything", "--tag", "audio"]);
    assert!(!ok);
    assert!(stderr.contains("audio"), "{stderr}");
}

#[test]
fn test_clean_is_idempotent() {
    let (tmp, config) = setup_test_env();
    let (_, _, ok) = run_anyfile(&config, &["tables"]);
    assert!(ok);
    assert!(tmp.path().join("out/tables.sqlite").exists());

    let (_, stderr, ok) = run_anyfile(&config, &["clean"]);
    assert!(ok, "{stderr}");
    assert!(!tmp.path().join("out/tables.sqlite").exists());

    let (_, stderr, ok) = run_anyfile(&config, &["clean"]);
    assert!(ok, "{stderr}");
}
