use std::ffi::OsStr;
use std::fs;
use std::path::{Path, PathBuf};
use std::process::{Command, Output};

use serde_json::{json, Value};

const SCHEMA: &str = "
CREATE TABLE customers (id INTEGER PRIMARY KEY, name TEXT NOT NULL);
CREATE TABLE orders (
    id INTEGER PRIMARY KEY,
    customer_id INTEGER NOT NULL REFERENCES customers(id),
    total INTEGER NOT NULL
);
CREATE TABLE line_items (
    id INTEGER PRIMARY KEY,
    order_id INTEGER NOT NULL REFERENCES orders(id),
    sku TEXT NOT NULL
);
";

fn unique_temp_dir(prefix: &str) -> PathBuf {
    let dir = std::env::temp_dir().join(format!("{prefix}-{}", ulid::Ulid::new()));
    fs::create_dir_all(&dir)
        .unwrap_or_else(|err| panic!("failed to create temp dir {}: {err}", dir.display()));
    dir
}

fn database(dir: &Path, rows: &str) -> PathBuf {
    let path = dir.join("app.sqlite3");
    let conn = rusqlite::Connection::open(&path)
        .unwrap_or_else(|err| panic!("failed to open {}: {err}", path.display()));
    conn.execute_batch(SCHEMA).unwrap_or_else(|err| panic!("failed to create schema: {err}"));
    conn.execute_batch(rows).unwrap_or_else(|err| panic!("failed to insert rows: {err}"));
    path
}

fn path_str(path: &Path) -> &str {
    path.to_str().unwrap_or_else(|| panic!("path should be valid UTF-8: {}", path.display()))
}

fn run_hbt<I, S>(args: I) -> Output
where
    I: IntoIterator<Item = S>,
    S: AsRef<OsStr>,
{
    Command::new(env!("CARGO_BIN_EXE_hbt"))
        .args(args)
        .output()
        .unwrap_or_else(|err| panic!("failed to execute hbt binary: {err}"))
}

fn run_ok<I, S>(args: I) -> String
where
    I: IntoIterator<Item = S>,
    S: AsRef<OsStr>,
{
    let output = run_hbt(args);
    if !output.status.success() {
        panic!(
            "hbt command failed (status={}):\nstdout:\n{}\nstderr:\n{}",
            output.status,
            String::from_utf8_lossy(&output.stdout),
            String::from_utf8_lossy(&output.stderr)
        );
    }
    String::from_utf8_lossy(&output.stdout).into_owned()
}

fn run_json<I, S>(args: I) -> Value
where
    I: IntoIterator<Item = S>,
    S: AsRef<OsStr>,
{
    let stdout = run_ok(args);
    serde_json::from_str(stdout.trim())
        .unwrap_or_else(|err| panic!("stdout is not valid JSON: {err}\nstdout:\n{stdout}"))
}

#[test]
fn order_lists_parents_before_children() {
    let dir = unique_temp_dir("hbt-order");
    let db = database(&dir, "");

    let value = run_json(["--db", path_str(&db), "order"]);
    assert_eq!(value["cli_contract_version"], json!("cli.v1"));
    assert_eq!(value["order"], json!(["customers", "orders", "line_items"]));

    let value = run_json(["--db", path_str(&db), "order", "--table", "line_items", "--table", "customers"]);
    assert_eq!(value["order"], json!(["customers", "line_items"]));

    let _ = fs::remove_dir_all(&dir);
}

#[test]
fn snapshot_reports_rows_and_counters() {
    let dir = unique_temp_dir("hbt-snapshot");
    let db = database(&dir, "INSERT INTO customers (id, name) VALUES (1, 'Ada'), (2, 'Lin');");

    let value = run_json(["--db", path_str(&db), "snapshot", "--table", "customers"]);
    assert_eq!(
        value["rows"]["customers"],
        json!([{ "id": 1, "name": "Ada" }, { "id": 2, "name": "Lin" }])
    );
    assert_eq!(value["activity"]["orders"], json!({ "inserted": 0, "updated": 0, "deleted": 0 }));
    assert!(value["rows"].get("orders").is_none());

    let _ = fs::remove_dir_all(&dir);
}

#[test]
fn seed_then_fixture_round_trips_rows() {
    let dir = unique_temp_dir("hbt-seed");
    let db = database(&dir, "");
    let seed = dir.join("orders.seed.yaml");
    fs::write(
        &seed,
        "customers:\n- id: 1\n  name: Ada\norders:\n- customer_id: 1\n  id: 5\n  total: 42\n",
    )
    .unwrap_or_else(|err| panic!("failed to write seed: {err}"));

    let value = run_json(["--db", path_str(&db), "seed", "--fixture", path_str(&seed)]);
    assert_eq!(value["rows_inserted"], json!(2));
    assert_eq!(value["cli_contract_version"], json!("cli.v1"));

    let yaml = run_ok(["--db", path_str(&db), "fixture"]);
    assert_eq!(yaml, "customers:\n- id: 1\n  name: Ada\norders:\n- customer_id: 1\n  id: 5\n  total: 42\n");

    let _ = fs::remove_dir_all(&dir);
}

#[test]
fn seed_with_missing_parent_fails_and_writes_nothing() {
    let dir = unique_temp_dir("hbt-seed-fk");
    let db = database(&dir, "");
    let seed = dir.join("bad.seed.yaml");
    fs::write(&seed, "orders:\n- customer_id: 99\n  id: 1\n  total: 1\n")
        .unwrap_or_else(|err| panic!("failed to write seed: {err}"));

    let output = run_hbt(["--db", path_str(&db), "seed", "--fixture", path_str(&seed)]);
    assert!(!output.status.success());
    assert!(String::from_utf8_lossy(&output.stderr).contains("failed to load seed fixture"));

    let value = run_json(["--db", path_str(&db), "snapshot", "--table", "orders"]);
    assert_eq!(value["rows"]["orders"], json!([]));

    let _ = fs::remove_dir_all(&dir);
}

#[test]
fn fixture_from_baseline_orders_added_rows() {
    let dir = unique_temp_dir("hbt-from-baseline");
    let db = database(&dir, "");
    let baseline = dir.join("create_order.db.json");
    fs::write(
        &baseline,
        r#"{
  "customers": {
    "numRowsInserted": 1,
    "numRowsUpdated": 0,
    "numRowsDeleted": 0,
    "removedRows": [],
    "addedRows": [{ "id": 3, "name": "Ada" }]
  },
  "line_items": {
    "numRowsInserted": 1,
    "numRowsUpdated": 0,
    "numRowsDeleted": 0,
    "removedRows": [],
    "addedRows": [{ "id": 1, "order_id": 7, "sku": "A-1" }]
  },
  "orders": {
    "numRowsInserted": 1,
    "numRowsUpdated": 0,
    "numRowsDeleted": 0,
    "removedRows": [],
    "addedRows": [{ "customer_id": 3, "id": 7, "total": 10 }]
  },
  "audit_log": {
    "numRowsInserted": 1,
    "numRowsUpdated": 0,
    "numRowsDeleted": 0
  }
}
"#,
    )
    .unwrap_or_else(|err| panic!("failed to write baseline: {err}"));

    let out = dir.join("create_order.seed.yaml");
    let value = run_json([
        "--db",
        path_str(&db),
        "fixture-from-baseline",
        "--baseline",
        path_str(&baseline),
        "--out",
        path_str(&out),
    ]);
    assert_eq!(value["cli_contract_version"], json!("cli.v1"));
    assert_eq!(value["tables"], json!(3));
    assert_eq!(value["rows"], json!(3));

    let yaml = fs::read_to_string(&out).unwrap_or_else(|err| panic!("failed to read fixture: {err}"));
    assert_eq!(
        yaml,
        "customers:\n- id: 3\n  name: Ada\norders:\n- customer_id: 3\n  id: 7\n  total: 10\nline_items:\n- id: 1\n  order_id: 7\n  sku: A-1\n"
    );

    let _ = fs::remove_dir_all(&dir);
}

#[test]
fn cyclic_foreign_keys_are_an_error() {
    let dir = unique_temp_dir("hbt-cycle");
    let path = dir.join("cycle.sqlite3");
    let conn = rusqlite::Connection::open(&path)
        .unwrap_or_else(|err| panic!("failed to open {}: {err}", path.display()));
    conn.execute_batch(
        "CREATE TABLE a (id INTEGER PRIMARY KEY, b_id INTEGER REFERENCES b(id));
         CREATE TABLE b (id INTEGER PRIMARY KEY, a_id INTEGER REFERENCES a(id));",
    )
    .unwrap_or_else(|err| panic!("failed to create schema: {err}"));
    drop(conn);

    let output = run_hbt(["--db", path_str(&path), "order"]);
    assert!(!output.status.success());
    assert!(String::from_utf8_lossy(&output.stderr).contains("dependency cycle"));

    let _ = fs::remove_dir_all(&dir);
}
