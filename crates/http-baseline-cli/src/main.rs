use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use http_baseline_core::{
    capture, decode_row, dependency_graph, resolve_order, BaselineSource, DbBaseline, SeedFixture,
    TableName,
};
use http_baseline_store_sqlite::SqliteBaselineDb;
use serde_json::{Map, Value};
use tracing_subscriber::EnvFilter;

const CLI_CONTRACT_VERSION: &str = "cli.v1";

#[derive(Debug, Parser)]
#[command(name = "hbt")]
#[command(about = "HTTP baseline test database tooling")]
struct Cli {
    #[arg(long, default_value = "./baseline.sqlite3")]
    db: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Print tables in foreign-key dependency order.
    Order(TablesArgs),
    /// Print activity counters and current rows.
    Snapshot(TablesArgs),
    /// Load a seed fixture into the database.
    Seed(SeedArgs),
    /// Write current rows as a seed fixture.
    Fixture(FixtureArgs),
    /// Write the added rows of a recorded database baseline as a seed fixture.
    FixtureFromBaseline(FixtureFromBaselineArgs),
}

#[derive(Debug, Args)]
struct TablesArgs {
    /// Restrict to these tables; defaults to every user table.
    #[arg(long = "table")]
    tables: Vec<String>,
}

#[derive(Debug, Args)]
struct SeedArgs {
    #[arg(long)]
    fixture: PathBuf,
}

#[derive(Debug, Args)]
struct FixtureArgs {
    #[command(flatten)]
    tables: TablesArgs,
    /// Write YAML here instead of stdout.
    #[arg(long)]
    out: Option<PathBuf>,
}

#[derive(Debug, Args)]
struct FixtureFromBaselineArgs {
    #[arg(long)]
    baseline: PathBuf,
    #[arg(long)]
    out: Option<PathBuf>,
}

fn with_contract_version(mut value: Value) -> Value {
    if let Value::Object(object) = &mut value {
        object.insert(
            "cli_contract_version".to_string(),
            Value::String(CLI_CONTRACT_VERSION.to_string()),
        );
    }
    value
}

fn emit_json(value: Value) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(&with_contract_version(value))?);
    Ok(())
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    tracing_subscriber::fmt().with_env_filter(filter).with_writer(std::io::stderr).init();
}

fn main() -> Result<()> {
    init_tracing();
    let cli = Cli::parse();
    let db = SqliteBaselineDb::open(&cli.db)
        .with_context(|| format!("failed to open database {}", cli.db.display()))?;
    match cli.command {
        Command::Order(args) => run_order(&args, &db),
        Command::Snapshot(args) => run_snapshot(&args, &db),
        Command::Seed(args) => run_seed(&args, &db),
        Command::Fixture(args) => run_fixture(&args, &db),
        Command::FixtureFromBaseline(args) => run_fixture_from_baseline(&args, &db),
    }
}

fn selected_tables(args: &TablesArgs, db: &SqliteBaselineDb) -> Result<Vec<String>> {
    if args.tables.is_empty() {
        return Ok(db.user_tables()?);
    }
    Ok(args.tables.clone())
}

fn dependency_order(db: &SqliteBaselineDb, tables: &[String]) -> Result<Vec<TableName>> {
    let graph = dependency_graph(db, tables).context("failed to read foreign keys")?;
    Ok(resolve_order(&graph)?)
}

fn run_order(args: &TablesArgs, db: &SqliteBaselineDb) -> Result<()> {
    let tables = selected_tables(args, db)?;
    let order = dependency_order(db, &tables)?;
    emit_json(serde_json::json!({ "order": order }))
}

fn run_snapshot(args: &TablesArgs, db: &SqliteBaselineDb) -> Result<()> {
    let tables = selected_tables(args, db)?;
    let state = capture(db, &tables)?;

    let mut rows = Map::new();
    for (table, set) in &state.rows {
        let decoded = set.iter().map(|row| decode_row(table, row)).collect::<Result<Vec<_>, _>>()?;
        rows.insert(table.clone(), Value::Array(decoded));
    }
    emit_json(serde_json::json!({
        "activity": state.activity,
        "rows": rows
    }))
}

fn run_seed(args: &SeedArgs, db: &SqliteBaselineDb) -> Result<()> {
    let inserted = db
        .load_seed_file(&args.fixture)
        .with_context(|| format!("failed to load seed fixture {}", args.fixture.display()))?;
    emit_json(serde_json::json!({
        "fixture": args.fixture.display().to_string(),
        "rows_inserted": inserted
    }))
}

fn run_fixture(args: &FixtureArgs, db: &SqliteBaselineDb) -> Result<()> {
    let tables = selected_tables(&args.tables, db)?;
    let order = dependency_order(db, &tables)?;
    let mut rows: BTreeMap<TableName, Vec<String>> = BTreeMap::new();
    for table in &tables {
        rows.insert(table.clone(), db.table_rows(table)?.iter().map(str::to_string).collect());
    }
    let fixture = SeedFixture::from_representations(&order, &rows)?;
    write_fixture(&fixture, args.out.as_deref())
}

fn run_fixture_from_baseline(args: &FixtureFromBaselineArgs, db: &SqliteBaselineDb) -> Result<()> {
    let text = fs::read_to_string(&args.baseline)
        .with_context(|| format!("failed to read baseline {}", args.baseline.display()))?;
    let baseline = DbBaseline::parse(&text)?;
    let rows = baseline.added_rows();
    let tables: Vec<String> = rows.keys().cloned().collect();
    let order = dependency_order(db, &tables)?;
    let fixture = SeedFixture::from_rows(&order, &rows)?;
    write_fixture(&fixture, args.out.as_deref())
}

fn write_fixture(fixture: &SeedFixture, out: Option<&Path>) -> Result<()> {
    let yaml = fixture.to_yaml()?;
    let Some(out) = out else {
        print!("{yaml}");
        return Ok(());
    };
    fs::write(out, &yaml).with_context(|| format!("failed to write fixture {}", out.display()))?;
    emit_json(serde_json::json!({
        "out": out.display().to_string(),
        "tables": fixture.tables.len(),
        "rows": fixture.row_count()
    }))
}
