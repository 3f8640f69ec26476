use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use http_baseline_core::{
    ActivitySnapshot, BaselineError, BaselineResult, BaselineSource, ForeignKey, RowSet, SeedFixture,
};
use rusqlite::hooks::{Action, PreUpdateCase};
use rusqlite::types::{Value as SqlValue, ValueRef};
use rusqlite::{params, params_from_iter, Connection};
use serde_json::{Map, Number, Value};

const USER_TABLES_SQL: &str = r"
SELECT name FROM sqlite_schema
WHERE type = 'table' AND name NOT LIKE 'sqlite\_%' ESCAPE '\'
ORDER BY name
";

const FOREIGN_KEYS_SQL: &str = r#"SELECT DISTINCT "table" FROM pragma_foreign_key_list(?1)"#;

/// SQLite database shared between the handler under test and the harness.
///
/// Per-table insert/update/delete counters come from SQLite's pre-update hook
/// and cover every row change made through this connection since it was
/// opened or last reset, including unconditional `DELETE` and rows removed by
/// `REPLACE`. Clones share the connection and the counters.
#[derive(Debug, Clone)]
pub struct SqliteBaselineDb {
    conn: Arc<Mutex<Connection>>,
    activity: Arc<Mutex<ActivitySnapshot>>,
}

impl SqliteBaselineDb {
    /// Open a database file and start counting table activity.
    ///
    /// # Errors
    /// Returns an error when the database cannot be opened or pragmas cannot be applied.
    pub fn open(path: &Path) -> BaselineResult<Self> {
        let conn = Connection::open(path)
            .map_err(|err| BaselineError::query(path.display().to_string(), err))?;
        Self::from_connection(conn)
    }

    /// # Errors
    /// Returns an error when pragmas cannot be applied.
    pub fn open_in_memory() -> BaselineResult<Self> {
        let conn = Connection::open_in_memory().map_err(|err| BaselineError::query(":memory:", err))?;
        Self::from_connection(conn)
    }

    /// Take ownership of an existing connection. Changes made before this call
    /// are not counted.
    ///
    /// # Errors
    /// Returns an error when pragmas cannot be applied.
    pub fn from_connection(conn: Connection) -> BaselineResult<Self> {
        conn.execute_batch(
            "PRAGMA foreign_keys = ON;
             PRAGMA busy_timeout = 5000;",
        )
        .map_err(|err| BaselineError::query("pragma", err))?;

        let activity = Arc::new(Mutex::new(ActivitySnapshot::new()));
        let counters = Arc::clone(&activity);
        // A registered pre-update hook also turns off the truncate optimisation.
        conn.preupdate_hook(Some(move |action: Action, db: &str, table: &str, _case: &PreUpdateCase| {
            if db != "main" {
                return;
            }
            let mut counters = counters.lock().unwrap_or_else(PoisonError::into_inner);
            let entry = counters.entry(table.to_string()).or_default();
            match action {
                Action::SQLITE_INSERT => entry.inserted += 1,
                Action::SQLITE_UPDATE => entry.updated += 1,
                Action::SQLITE_DELETE => entry.deleted += 1,
                _ => {}
            }
        }));

        Ok(Self { conn: Arc::new(Mutex::new(conn)), activity })
    }

    /// Lock the shared connection. Keep the guard short-lived: capture calls
    /// need the same lock.
    ///
    /// # Errors
    /// Returns an error when a previous holder panicked.
    pub fn connection(&self) -> BaselineResult<MutexGuard<'_, Connection>> {
        self.conn.lock().map_err(|_| BaselineError::query("connection", "connection lock poisoned"))
    }

    /// # Errors
    /// Returns an error when any statement fails.
    pub fn execute_batch(&self, sql: &str) -> BaselineResult<()> {
        self.connection()?.execute_batch(sql).map_err(|err| BaselineError::query(sql.trim(), err))
    }

    /// Start a new counting window.
    pub fn reset_activity(&self) {
        self.activity.lock().unwrap_or_else(PoisonError::into_inner).clear();
    }

    /// User table names, sorted.
    ///
    /// # Errors
    /// Returns an error when the schema table cannot be read.
    pub fn user_tables(&self) -> BaselineResult<Vec<String>> {
        let conn = self.connection()?;
        user_tables(&conn)
    }

    /// Insert every block of `fixture` in document order inside one transaction.
    ///
    /// # Errors
    /// Returns an error for unknown tables or failed inserts; nothing is
    /// written in that case.
    pub fn load_seed(&self, fixture: &SeedFixture) -> BaselineResult<usize> {
        let mut conn = self.connection()?;
        let known: BTreeSet<String> = user_tables(&conn)?.into_iter().collect();
        let tx = conn.transaction().map_err(|err| BaselineError::query("seed", err))?;

        let mut inserted = 0;
        for block in &fixture.tables {
            if !known.contains(&block.table) {
                return Err(BaselineError::query(block.table.as_str(), "unknown table in seed fixture"));
            }
            for row in &block.rows {
                let sql = insert_sql(&block.table, row);
                let values: Vec<SqlValue> = row.values().map(json_to_sql).collect();
                tx.execute(&sql, params_from_iter(values))
                    .map_err(|err| BaselineError::query(format!("{}: {sql}", block.table), err))?;
                inserted += 1;
            }
        }

        tx.commit().map_err(|err| BaselineError::query("seed", err))?;
        tracing::info!(tables = fixture.tables.len(), rows = inserted, "seed fixture loaded");
        Ok(inserted)
    }

    /// # Errors
    /// Returns an error when the file cannot be read or parsed, or as [`Self::load_seed`].
    pub fn load_seed_file(&self, path: &Path) -> BaselineResult<usize> {
        let text = fs::read_to_string(path).map_err(|err| {
            BaselineError::Fixture(format!("failed to read seed file {}: {err}", path.display()))
        })?;
        self.load_seed(&SeedFixture::from_yaml(&text)?)
    }
}

impl BaselineSource for SqliteBaselineDb {
    fn table_activity(&self) -> BaselineResult<ActivitySnapshot> {
        let tables = self.user_tables()?;
        let counters = self.activity.lock().unwrap_or_else(PoisonError::into_inner);
        Ok(tables
            .into_iter()
            .map(|table| {
                let table_counters = counters.get(&table).copied().unwrap_or_default();
                (table, table_counters)
            })
            .collect())
    }

    fn table_rows(&self, table: &str) -> BaselineResult<RowSet> {
        let conn = self.connection()?;
        if !user_tables(&conn)?.iter().any(|known| known == table) {
            return Err(BaselineError::query(table, "not a user table"));
        }

        let sql = format!("SELECT * FROM {}", quote_ident(table));
        let mut stmt = conn.prepare(&sql).map_err(|err| BaselineError::query(&sql, err))?;
        let columns: Vec<String> = stmt.column_names().into_iter().map(str::to_string).collect();
        let mut rows = stmt.query([]).map_err(|err| BaselineError::query(&sql, err))?;

        let mut set = RowSet::new();
        while let Some(row) = rows.next().map_err(|err| BaselineError::query(&sql, err))? {
            let mut fields = BTreeMap::new();
            for (index, column) in columns.iter().enumerate() {
                let value = row.get_ref(index).map_err(|err| BaselineError::query(&sql, err))?;
                fields.insert(column.as_str(), sql_to_json(value));
            }
            let representation =
                serde_json::to_string(&fields).map_err(|err| BaselineError::query(table, err))?;
            set.insert(representation);
        }
        Ok(set)
    }

    fn foreign_keys(&self) -> BaselineResult<Vec<ForeignKey>> {
        let conn = self.connection()?;
        let mut stmt =
            conn.prepare(FOREIGN_KEYS_SQL).map_err(|err| BaselineError::query(FOREIGN_KEYS_SQL, err))?;

        let mut foreign_keys = Vec::new();
        for table in user_tables(&conn)? {
            let referenced = stmt
                .query_map(params![table], |row| row.get::<_, String>(0))
                .map_err(|err| BaselineError::query(table.as_str(), err))?;
            for references in referenced {
                let references = references.map_err(|err| BaselineError::query(table.as_str(), err))?;
                foreign_keys.push(ForeignKey::new(table.as_str(), references));
            }
        }
        foreign_keys.sort();
        Ok(foreign_keys)
    }
}

fn user_tables(conn: &Connection) -> BaselineResult<Vec<String>> {
    let mut stmt = conn.prepare(USER_TABLES_SQL).map_err(|err| BaselineError::query("sqlite_schema", err))?;
    let rows = stmt
        .query_map([], |row| row.get::<_, String>(0))
        .map_err(|err| BaselineError::query("sqlite_schema", err))?;

    let mut tables = Vec::new();
    for row in rows {
        tables.push(row.map_err(|err| BaselineError::query("sqlite_schema", err))?);
    }
    Ok(tables)
}

fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

fn insert_sql(table: &str, row: &Map<String, Value>) -> String {
    if row.is_empty() {
        return format!("INSERT INTO {} DEFAULT VALUES", quote_ident(table));
    }
    let columns: Vec<String> = row.keys().map(|column| quote_ident(column)).collect();
    let placeholders: Vec<String> = (1..=row.len()).map(|index| format!("?{index}")).collect();
    format!(
        "INSERT INTO {} ({}) VALUES ({})",
        quote_ident(table),
        columns.join(", "),
        placeholders.join(", ")
    )
}

fn sql_to_json(value: ValueRef<'_>) -> Value {
    match value {
        ValueRef::Null => Value::Null,
        ValueRef::Integer(int) => Value::from(int),
        ValueRef::Real(real) => Number::from_f64(real).map_or(Value::Null, Value::Number),
        ValueRef::Text(text) => Value::String(String::from_utf8_lossy(text).into_owned()),
        ValueRef::Blob(blob) => Value::String(hex::encode(blob)),
    }
}

fn json_to_sql(value: &Value) -> SqlValue {
    match value {
        Value::Null => SqlValue::Null,
        Value::Bool(flag) => SqlValue::Integer(i64::from(*flag)),
        Value::Number(number) => number
            .as_i64()
            .map(SqlValue::Integer)
            .or_else(|| number.as_f64().map(SqlValue::Real))
            .unwrap_or(SqlValue::Null),
        Value::String(text) => SqlValue::Text(text.clone()),
        Value::Array(_) | Value::Object(_) => SqlValue::Text(value.to_string()),
    }
}
