use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

use crate::{BaselineError, BaselineResult, TableName};

/// `table` holds a foreign key into `references`.
#[derive(Debug, Clone, Serialize, Deserialize, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct ForeignKey {
    pub table: TableName,
    pub references: TableName,
}

impl ForeignKey {
    pub fn new(table: impl Into<String>, references: impl Into<String>) -> Self {
        Self { table: table.into(), references: references.into() }
    }
}

/// Table -> tables it references. Self references are never stored.
#[derive(Debug, Clone, Default, Eq, PartialEq)]
pub struct DependencyGraph {
    edges: BTreeMap<TableName, BTreeSet<TableName>>,
}

impl DependencyGraph {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_table(&mut self, table: impl Into<String>) {
        self.edges.entry(table.into()).or_default();
    }

    pub fn add_dependency(&mut self, table: impl Into<String>, depends_on: impl Into<String>) {
        let table = table.into();
        let depends_on = depends_on.into();
        let deps = self.edges.entry(table.clone()).or_default();
        if table != depends_on {
            deps.insert(depends_on);
        }
    }

    /// Graph over `tables`, keeping only edges whose both ends are in the set.
    pub fn from_foreign_keys<'a, I>(tables: I, foreign_keys: &[ForeignKey]) -> Self
    where
        I: IntoIterator<Item = &'a str>,
    {
        let mut graph = Self::new();
        for table in tables {
            graph.add_table(table);
        }
        for fk in foreign_keys {
            if graph.edges.contains_key(&fk.table) && graph.edges.contains_key(&fk.references) {
                graph.add_dependency(fk.table.as_str(), fk.references.as_str());
            }
        }
        graph
    }

    #[must_use]
    pub fn dependencies(&self, table: &str) -> Option<&BTreeSet<TableName>> {
        self.edges.get(table)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.edges.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.edges.is_empty()
    }
}

/// Order the graph's tables so that each one follows everything it depends on.
///
/// Dependencies that are not themselves keys of the graph are treated as
/// already satisfied. Among tables that are ready at the same time the
/// lexicographically smallest goes first.
///
/// # Errors
/// Returns [`BaselineError::DependencyCycle`] naming every table that could
/// not be placed.
pub fn resolve_order(graph: &DependencyGraph) -> BaselineResult<Vec<TableName>> {
    let mut pending: BTreeMap<&str, usize> = BTreeMap::new();
    let mut dependents: BTreeMap<&str, Vec<&str>> = BTreeMap::new();

    for (table, deps) in &graph.edges {
        let mut in_degree = 0;
        for dep in deps.iter().filter(|dep| graph.edges.contains_key(*dep)) {
            in_degree += 1;
            dependents.entry(dep.as_str()).or_default().push(table.as_str());
        }
        pending.insert(table.as_str(), in_degree);
    }

    let mut ready: BTreeSet<&str> =
        pending.iter().filter(|(_, degree)| **degree == 0).map(|(table, _)| *table).collect();
    let mut order = Vec::with_capacity(graph.edges.len());

    while let Some(table) = ready.pop_first() {
        order.push(table.to_string());
        pending.remove(table);
        for dependent in dependents.get(table).into_iter().flatten() {
            if let Some(degree) = pending.get_mut(dependent) {
                *degree -= 1;
                if *degree == 0 {
                    ready.insert(*dependent);
                }
            }
        }
    }

    if !pending.is_empty() {
        let tables: Vec<TableName> = pending.keys().map(|table| (*table).to_string()).collect();
        tracing::error!(tables = %tables.join(","), "foreign key dependency cycle");
        return Err(BaselineError::DependencyCycle { tables });
    }

    Ok(order)
}
