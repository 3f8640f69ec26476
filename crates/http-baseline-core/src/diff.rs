use std::collections::BTreeMap;

use crate::{ActivityCounters, BaselineError, BaselineResult, CapturedState, TableName};

/// Changes observed in one table between two captures.
#[derive(Debug, Clone, Default, Eq, PartialEq)]
pub struct TableDiff {
    pub counters: ActivityCounters,
    /// `None` for tables diffed by counters alone.
    pub removed_rows: Option<Vec<String>>,
    pub added_rows: Option<Vec<String>>,
}

impl TableDiff {
    #[must_use]
    pub fn is_tracked(&self) -> bool {
        self.removed_rows.is_some() || self.added_rows.is_some()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.counters.is_zero()
            && self.removed_rows.as_deref().unwrap_or_default().is_empty()
            && self.added_rows.as_deref().unwrap_or_default().is_empty()
    }
}

#[derive(Debug, Clone, Default, Eq, PartialEq)]
pub struct DbDiff {
    pub tables: BTreeMap<TableName, TableDiff>,
}

impl DbDiff {
    #[must_use]
    pub fn get(&self, table: &str) -> Option<&TableDiff> {
        self.tables.get(table)
    }

    #[must_use]
    pub fn has_changes(&self) -> bool {
        self.tables.values().any(|diff| !diff.is_empty())
    }

    /// Tables whose diff is non-empty, in name order.
    pub fn changed_tables(&self) -> impl Iterator<Item = (&str, &TableDiff)> {
        self.tables
            .iter()
            .filter(|(_, diff)| !diff.is_empty())
            .map(|(table, diff)| (table.as_str(), diff))
    }

    /// Added rows of tracked tables, keyed by table.
    #[must_use]
    pub fn added_rows(&self) -> BTreeMap<TableName, Vec<String>> {
        self.tables
            .iter()
            .filter_map(|(table, diff)| {
                diff.added_rows
                    .as_ref()
                    .filter(|rows| !rows.is_empty())
                    .map(|rows| (table.clone(), rows.clone()))
            })
            .collect()
    }
}

/// Diff a before capture against an after capture of the same table set.
///
/// Tables tracked in `before` get row-level added/removed lists and are
/// always present in the result. Untracked tables appear only when one of
/// their counters moved.
///
/// # Errors
/// Returns [`BaselineError::SchemaDrift`] when the table sets differ and
/// [`BaselineError::Query`] when a tracked table has no after rows.
pub fn build_diff(before: &CapturedState, after: &CapturedState) -> BaselineResult<DbDiff> {
    let before_tables = before.table_names();
    let after_tables = after.table_names();
    if before_tables != after_tables {
        tracing::error!(
            before = %before_tables.join(","),
            after = %after_tables.join(","),
            "table set changed during test"
        );
        return Err(BaselineError::SchemaDrift { before: before_tables, after: after_tables });
    }

    let mut tables = BTreeMap::new();
    for (table, before_counters) in &before.activity {
        let after_counters = after.activity.get(table).copied().unwrap_or_default();
        let counters = after_counters.delta_since(*before_counters);

        if let Some(before_rows) = before.rows.get(table) {
            let after_rows = after.rows.get(table).ok_or_else(|| {
                BaselineError::query(table.as_str(), "tracked table missing from after capture")
            })?;
            tables.insert(
                table.clone(),
                TableDiff {
                    counters,
                    removed_rows: Some(before_rows.minus(after_rows)),
                    added_rows: Some(after_rows.minus(before_rows)),
                },
            );
        } else if !counters.is_zero() {
            tables.insert(
                table.clone(),
                TableDiff { counters, removed_rows: None, added_rows: None },
            );
        }
    }

    Ok(DbDiff { tables })
}
