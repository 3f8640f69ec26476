//! Database baseline diff engine.
//!
//! Captures per-table activity counters and row snapshots before and after a
//! test body runs, turns the two captures into a deterministic per-table diff,
//! and renders that diff for byte-for-byte comparison against a recorded
//! baseline. Foreign-key ordering is used to turn added rows back into a seed
//! fixture that can be replayed without constraint violations.

use std::collections::BTreeMap;
use std::fmt::{Display, Formatter};

use serde::{Deserialize, Serialize};

mod diff;
mod fixture;
mod order;
mod render;

pub use diff::{build_diff, DbDiff, TableDiff};
pub use fixture::{SeedFixture, SeedTable};
pub use order::{resolve_order, DependencyGraph, ForeignKey};
pub use render::{decode_row, render_diff, DbBaseline, TableBaseline};

pub type TableName = String;

pub type BaselineResult<T> = Result<T, BaselineError>;

#[derive(Debug, Clone, thiserror::Error, Eq, PartialEq)]
pub enum BaselineError {
    #[error("query error on {target}: {message}")]
    Query { target: String, message: String },
    #[error(
        "tables created or dropped during test: before [{}], after [{}]",
        before.join(","),
        after.join(",")
    )]
    SchemaDrift { before: Vec<TableName>, after: Vec<TableName> },
    #[error("cannot decode row in {table}: {message}; row={row}")]
    Decode { table: TableName, row: String, message: String },
    #[error("dependency cycle among tables: {}", tables.join(","))]
    DependencyCycle { tables: Vec<TableName> },
    #[error("invalid seed fixture: {0}")]
    Fixture(String),
}

impl BaselineError {
    pub fn query(target: impl Into<String>, message: impl Display) -> Self {
        Self::Query { target: target.into(), message: message.to_string() }
    }
}

/// Insert/update/delete counts for one table within the current session.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, Eq, PartialEq, Hash)]
pub struct ActivityCounters {
    pub inserted: u64,
    pub updated: u64,
    pub deleted: u64,
}

impl ActivityCounters {
    #[must_use]
    pub fn new(inserted: u64, updated: u64, deleted: u64) -> Self {
        Self { inserted, updated, deleted }
    }

    /// Per-counter `self - earlier`. A source that was reset between the two
    /// reads yields zero rather than wrapping.
    #[must_use]
    pub fn delta_since(self, earlier: Self) -> Self {
        Self {
            inserted: self.inserted.saturating_sub(earlier.inserted),
            updated: self.updated.saturating_sub(earlier.updated),
            deleted: self.deleted.saturating_sub(earlier.deleted),
        }
    }

    #[must_use]
    pub fn is_zero(self) -> bool {
        self.inserted == 0 && self.updated == 0 && self.deleted == 0
    }
}

impl Display for ActivityCounters {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} row(s) inserted, {} row(s) updated, {} row(s) deleted",
            self.inserted, self.updated, self.deleted
        )
    }
}

/// Counters for every user table, including tables with no activity.
pub type ActivitySnapshot = BTreeMap<TableName, ActivityCounters>;

/// Multiset of opaque row representations for one table.
///
/// Two rows that serialize identically are both kept; the count records how
/// many physical rows share the representation.
#[derive(Debug, Clone, Default, Serialize, Deserialize, Eq, PartialEq)]
pub struct RowSet {
    rows: BTreeMap<String, usize>,
}

impl RowSet {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, representation: impl Into<String>) {
        *self.rows.entry(representation.into()).or_insert(0) += 1;
    }

    #[must_use]
    pub fn count(&self, representation: &str) -> usize {
        self.rows.get(representation).copied().unwrap_or(0)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.rows.values().sum()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Representations present in `self` more often than in `other`, repeated
    /// once per surplus occurrence, in lexicographic order.
    #[must_use]
    pub fn minus(&self, other: &Self) -> Vec<String> {
        let mut out = Vec::new();
        for (representation, count) in &self.rows {
            let surplus = count.saturating_sub(other.count(representation));
            out.extend(std::iter::repeat(representation.clone()).take(surplus));
        }
        out
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.rows
            .iter()
            .flat_map(|(representation, count)| std::iter::repeat(representation.as_str()).take(*count))
    }
}

impl<S: Into<String>> FromIterator<S> for RowSet {
    fn from_iter<I: IntoIterator<Item = S>>(iter: I) -> Self {
        let mut set = Self::new();
        for representation in iter {
            set.insert(representation);
        }
        set
    }
}

/// Row sets of the tables tracked at row level.
pub type RowSnapshot = BTreeMap<TableName, RowSet>;

/// One before or after capture of the database.
#[derive(Debug, Clone, Default, Serialize, Deserialize, Eq, PartialEq)]
pub struct CapturedState {
    pub activity: ActivitySnapshot,
    pub rows: RowSnapshot,
}

impl CapturedState {
    #[must_use]
    pub fn table_names(&self) -> Vec<TableName> {
        self.activity.keys().cloned().collect()
    }

    #[must_use]
    pub fn is_tracked(&self, table: &str) -> bool {
        self.rows.contains_key(table)
    }
}

/// Database access needed by the engine.
///
/// Implementations must read counters scoped to the current session so that a
/// long-lived connection does not leak activity between tests.
pub trait BaselineSource {
    /// Counters for every user table.
    ///
    /// # Errors
    /// Returns [`BaselineError::Query`] when the statistics cannot be read.
    fn table_activity(&self) -> BaselineResult<ActivitySnapshot>;

    /// Canonical representation of every row currently in `table`.
    ///
    /// # Errors
    /// Returns [`BaselineError::Query`] for unknown tables or failed scans.
    fn table_rows(&self, table: &str) -> BaselineResult<RowSet>;

    /// Foreign-key edges between user tables.
    ///
    /// # Errors
    /// Returns [`BaselineError::Query`] when schema metadata cannot be read.
    fn foreign_keys(&self) -> BaselineResult<Vec<ForeignKey>>;
}

/// Read counters for all tables, then scan each tracked table in turn.
///
/// # Errors
/// Fails on the first counter or scan error; no partial capture is returned.
pub fn capture<S, T>(source: &S, tracked: &[T]) -> BaselineResult<CapturedState>
where
    S: BaselineSource + ?Sized,
    T: AsRef<str>,
{
    let activity = source.table_activity()?;
    let mut rows = RowSnapshot::new();
    for table in tracked {
        let table = table.as_ref();
        let set = source.table_rows(table)?;
        tracing::debug!(table, rows = set.len(), "captured table rows");
        rows.insert(table.to_string(), set);
    }
    Ok(CapturedState { activity, rows })
}

/// Dependency graph restricted to `tables`, built from the source's foreign keys.
///
/// # Errors
/// Propagates the source's metadata error.
pub fn dependency_graph<S, T>(source: &S, tables: &[T]) -> BaselineResult<DependencyGraph>
where
    S: BaselineSource + ?Sized,
    T: AsRef<str>,
{
    let foreign_keys = source.foreign_keys()?;
    Ok(DependencyGraph::from_foreign_keys(tables.iter().map(|table| table.as_ref()), &foreign_keys))
}
