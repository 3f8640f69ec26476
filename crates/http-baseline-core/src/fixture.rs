use std::collections::BTreeMap;

use serde_json::{Map, Value};

use crate::{decode_row, BaselineError, BaselineResult, TableName};

/// Rows to insert into one table, each a column -> value map.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SeedTable {
    pub table: TableName,
    pub rows: Vec<Map<String, Value>>,
}

/// Seed document: table blocks in the order they must be inserted.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SeedFixture {
    pub tables: Vec<SeedTable>,
}

impl SeedFixture {
    /// Group `rows` by the dependency `order`, dropping tables without rows.
    ///
    /// # Errors
    /// Returns [`BaselineError::Fixture`] when a row is not an object or a
    /// table with rows is absent from `order`.
    pub fn from_rows(order: &[TableName], rows: &BTreeMap<TableName, Vec<Value>>) -> BaselineResult<Self> {
        if let Some(table) = rows.keys().find(|table| !order.contains(table)) {
            return Err(BaselineError::Fixture(format!(
                "table {table} is missing from the dependency order"
            )));
        }

        let mut tables = Vec::new();
        for table in order {
            let Some(table_rows) = rows.get(table).filter(|table_rows| !table_rows.is_empty()) else {
                continue;
            };
            let rows = table_rows
                .iter()
                .map(|row| match row {
                    Value::Object(map) => Ok(map.clone()),
                    other => Err(BaselineError::Fixture(format!(
                        "row for {table} is not an object: {other}"
                    ))),
                })
                .collect::<BaselineResult<Vec<_>>>()?;
            tables.push(SeedTable { table: table.clone(), rows });
        }
        Ok(Self { tables })
    }

    /// Like [`SeedFixture::from_rows`] but starting from opaque row representations.
    ///
    /// # Errors
    /// Returns [`BaselineError::Decode`] for rows that are not JSON, otherwise
    /// as [`SeedFixture::from_rows`].
    pub fn from_representations(
        order: &[TableName],
        rows: &BTreeMap<TableName, Vec<String>>,
    ) -> BaselineResult<Self> {
        let mut decoded = BTreeMap::new();
        for (table, representations) in rows {
            let values = representations
                .iter()
                .map(|row| decode_row(table, row))
                .collect::<BaselineResult<Vec<_>>>()?;
            decoded.insert(table.clone(), values);
        }
        Self::from_rows(order, &decoded)
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.tables.is_empty()
    }

    #[must_use]
    pub fn row_count(&self) -> usize {
        self.tables.iter().map(|table| table.rows.len()).sum()
    }

    /// YAML mapping of table name to its row list, in insertion order.
    ///
    /// # Errors
    /// Returns [`BaselineError::Fixture`] if a value cannot be represented.
    pub fn to_yaml(&self) -> BaselineResult<String> {
        let mut document = serde_yaml::Mapping::new();
        for block in &self.tables {
            let rows = serde_yaml::to_value(&block.rows)
                .map_err(|err| BaselineError::Fixture(format!("{}: {err}", block.table)))?;
            document.insert(serde_yaml::Value::String(block.table.clone()), rows);
        }
        serde_yaml::to_string(&document).map_err(|err| BaselineError::Fixture(err.to_string()))
    }

    /// Parse a seed document, keeping its table order.
    ///
    /// # Errors
    /// Returns [`BaselineError::Fixture`] when the document is not a mapping
    /// of table names to lists of row mappings.
    pub fn from_yaml(text: &str) -> BaselineResult<Self> {
        let document: Option<serde_yaml::Mapping> =
            serde_yaml::from_str(text).map_err(|err| BaselineError::Fixture(err.to_string()))?;

        let mut tables = Vec::new();
        for (key, value) in document.unwrap_or_default() {
            let table = key
                .as_str()
                .ok_or_else(|| BaselineError::Fixture(format!("table name is not a string: {key:?}")))?
                .to_string();
            let rows: Vec<Value> = match value {
                serde_yaml::Value::Null => Vec::new(),
                serde_yaml::Value::Sequence(rows) => rows
                    .iter()
                    .map(serde_json::to_value)
                    .collect::<Result<_, _>>()
                    .map_err(|err| BaselineError::Fixture(format!("{table}: {err}")))?,
                _ => {
                    return Err(BaselineError::Fixture(format!("rows for {table} are not a list")));
                }
            };
            let rows = rows
                .into_iter()
                .map(|row| match row {
                    Value::Object(map) => Ok(map),
                    other => {
                        Err(BaselineError::Fixture(format!("row for {table} is not a mapping: {other}")))
                    }
                })
                .collect::<BaselineResult<Vec<_>>>()?;
            tables.push(SeedTable { table, rows });
        }
        Ok(Self { tables })
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::{resolve_order, DependencyGraph};

    fn order() -> BaselineResult<Vec<TableName>> {
        let mut graph = DependencyGraph::new();
        graph.add_table("customers");
        graph.add_dependency("orders", "customers");
        graph.add_dependency("line_items", "orders");
        resolve_order(&graph)
    }

    #[test]
    fn fixture_blocks_follow_dependency_order() -> BaselineResult<()> {
        let mut rows = BTreeMap::new();
        rows.insert("line_items".to_string(), vec![r#"{"id":1,"order_id":7}"#.to_string()]);
        rows.insert("orders".to_string(), vec![r#"{"customer_id":3,"id":7}"#.to_string()]);
        rows.insert("customers".to_string(), vec![r#"{"id":3,"name":"Ada"}"#.to_string()]);

        let fixture = SeedFixture::from_representations(&order()?, &rows)?;
        let tables: Vec<&str> = fixture.tables.iter().map(|block| block.table.as_str()).collect();
        assert_eq!(tables, vec!["customers", "orders", "line_items"]);
        assert_eq!(fixture.row_count(), 3);

        let yaml = fixture.to_yaml()?;
        assert_eq!(
            yaml,
            "customers:\n- id: 3\n  name: Ada\norders:\n- customer_id: 3\n  id: 7\nline_items:\n- id: 1\n  order_id: 7\n"
        );
        Ok(())
    }

    #[test]
    fn yaml_round_trip_keeps_order_and_values() -> BaselineResult<()> {
        let text = "orders:\n  - id: 7\n    note: null\n    total: 12.5\ncustomers:\n  - id: 3\n    name: Ada\n";
        let fixture = SeedFixture::from_yaml(text)?;
        assert_eq!(fixture.tables[0].table, "orders");
        assert_eq!(fixture.tables[0].rows[0].get("total"), Some(&json!(12.5)));
        assert_eq!(fixture.tables[1].table, "customers");
        assert_eq!(SeedFixture::from_yaml(&fixture.to_yaml()?)?, fixture);
        Ok(())
    }

    #[test]
    fn empty_document_is_empty_fixture() -> BaselineResult<()> {
        assert!(SeedFixture::from_yaml("")?.is_empty());
        assert!(SeedFixture::from_yaml("customers:\n")?.tables[0].rows.is_empty());
        Ok(())
    }

    #[test]
    fn rejects_rows_that_are_not_mappings() {
        let err = SeedFixture::from_yaml("customers:\n  - 1\n");
        assert!(matches!(err, Err(BaselineError::Fixture(message)) if message.contains("customers")));
        assert!(matches!(
            SeedFixture::from_yaml("customers: 3\n"),
            Err(BaselineError::Fixture(_))
        ));
    }

    #[test]
    fn rejects_table_outside_order() -> BaselineResult<()> {
        let mut rows = BTreeMap::new();
        rows.insert("ghosts".to_string(), vec![json!({"id": 1})]);
        assert!(matches!(SeedFixture::from_rows(&order()?, &rows), Err(BaselineError::Fixture(_))));
        Ok(())
    }
}
