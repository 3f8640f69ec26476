use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::{BaselineError, BaselineResult, DbDiff, TableDiff, TableName};

/// Serialized form of one table's diff as stored in a `.db.json` baseline.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct TableBaseline {
    pub num_rows_inserted: u64,
    pub num_rows_updated: u64,
    pub num_rows_deleted: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub removed_rows: Option<Vec<Value>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub added_rows: Option<Vec<Value>>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(transparent)]
pub struct DbBaseline {
    pub tables: BTreeMap<TableName, TableBaseline>,
}

impl DbBaseline {
    /// Decode every row representation of `diff` into structured JSON.
    ///
    /// # Errors
    /// Returns [`BaselineError::Decode`] for a row that is not valid JSON.
    pub fn from_diff(diff: &DbDiff) -> BaselineResult<Self> {
        let mut tables = BTreeMap::new();
        for (table, table_diff) in &diff.tables {
            tables.insert(table.clone(), TableBaseline::from_table_diff(table, table_diff)?);
        }
        Ok(Self { tables })
    }

    /// Parse a recorded baseline document.
    ///
    /// # Errors
    /// Returns [`BaselineError::Decode`] when the document is malformed.
    pub fn parse(text: &str) -> BaselineResult<Self> {
        serde_json::from_str(text).map_err(|err| BaselineError::Decode {
            table: "*".to_string(),
            row: text.lines().next().unwrap_or_default().to_string(),
            message: err.to_string(),
        })
    }

    /// Canonical text: two-space indentation and one trailing newline.
    ///
    /// # Errors
    /// Returns [`BaselineError::Decode`] if serialization fails.
    pub fn render(&self) -> BaselineResult<String> {
        let mut out = serde_json::to_string_pretty(self).map_err(|err| BaselineError::Decode {
            table: "*".to_string(),
            row: String::new(),
            message: err.to_string(),
        })?;
        out.push('\n');
        Ok(out)
    }

    /// Added rows per table, skipping tables with none.
    #[must_use]
    pub fn added_rows(&self) -> BTreeMap<TableName, Vec<Value>> {
        self.tables
            .iter()
            .filter_map(|(table, baseline)| {
                baseline
                    .added_rows
                    .as_ref()
                    .filter(|rows| !rows.is_empty())
                    .map(|rows| (table.clone(), rows.clone()))
            })
            .collect()
    }
}

impl TableBaseline {
    fn from_table_diff(table: &str, diff: &TableDiff) -> BaselineResult<Self> {
        Ok(Self {
            num_rows_inserted: diff.counters.inserted,
            num_rows_updated: diff.counters.updated,
            num_rows_deleted: diff.counters.deleted,
            removed_rows: decode_rows(table, diff.removed_rows.as_deref())?,
            added_rows: decode_rows(table, diff.added_rows.as_deref())?,
        })
    }
}

fn decode_rows(table: &str, rows: Option<&[String]>) -> BaselineResult<Option<Vec<Value>>> {
    rows.map(|rows| rows.iter().map(|row| decode_row(table, row)).collect()).transpose()
}

/// Parse one opaque row representation back into structured JSON.
///
/// # Errors
/// Returns [`BaselineError::Decode`] naming the table and raw row.
pub fn decode_row(table: &str, row: &str) -> BaselineResult<Value> {
    serde_json::from_str(row).map_err(|err| BaselineError::Decode {
        table: table.to_string(),
        row: row.to_string(),
        message: err.to_string(),
    })
}

/// Render a diff for byte comparison against a recorded baseline.
///
/// # Errors
/// Returns [`BaselineError::Decode`] when a row representation is not JSON.
pub fn render_diff(diff: &DbDiff) -> BaselineResult<String> {
    DbBaseline::from_diff(diff)?.render()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ActivityCounters;

    fn sample_diff() -> DbDiff {
        let mut diff = DbDiff::default();
        diff.tables.insert(
            "orders".to_string(),
            TableDiff {
                counters: ActivityCounters::new(1, 0, 1),
                removed_rows: Some(vec![r#"{"customer_id":1,"id":3,"meta":{"rush":true}}"#.to_string()]),
                added_rows: Some(vec![r#"{"customer_id":2,"id":4,"meta":null}"#.to_string()]),
            },
        );
        diff.tables.insert(
            "audit_log".to_string(),
            TableDiff { counters: ActivityCounters::new(2, 0, 0), removed_rows: None, added_rows: None },
        );
        diff
    }

    #[test]
    fn renders_canonical_document() -> BaselineResult<()> {
        let rendered = render_diff(&sample_diff())?;
        let expected = r#"{
  "audit_log": {
    "numRowsInserted": 2,
    "numRowsUpdated": 0,
    "numRowsDeleted": 0
  },
  "orders": {
    "numRowsInserted": 1,
    "numRowsUpdated": 0,
    "numRowsDeleted": 1,
    "removedRows": [
      {
        "customer_id": 1,
        "id": 3,
        "meta": {
          "rush": true
        }
      }
    ],
    "addedRows": [
      {
        "customer_id": 2,
        "id": 4,
        "meta": null
      }
    ]
  }
}
"#;
        assert_eq!(rendered, expected);
        Ok(())
    }

    #[test]
    fn rendering_is_deterministic() -> BaselineResult<()> {
        let diff = sample_diff();
        assert_eq!(render_diff(&diff)?, render_diff(&diff.clone())?);
        Ok(())
    }

    #[test]
    fn empty_diff_renders_empty_object() -> BaselineResult<()> {
        assert_eq!(render_diff(&DbDiff::default())?, "{}\n");
        Ok(())
    }

    #[test]
    fn malformed_row_is_decode_error() {
        let mut diff = DbDiff::default();
        diff.tables.insert(
            "orders".to_string(),
            TableDiff {
                counters: ActivityCounters::new(1, 0, 0),
                removed_rows: Some(vec![]),
                added_rows: Some(vec!["{not json".to_string()]),
            },
        );
        match render_diff(&diff) {
            Err(BaselineError::Decode { table, row, .. }) => {
                assert_eq!(table, "orders");
                assert_eq!(row, "{not json");
            }
            other => panic!("expected decode error, got {other:?}"),
        }
    }

    #[test]
    fn parsed_baseline_renders_back_to_same_bytes() -> BaselineResult<()> {
        let rendered = render_diff(&sample_diff())?;
        let parsed = DbBaseline::parse(&rendered)?;
        assert_eq!(parsed.render()?, rendered);
        assert!(parsed.tables["audit_log"].added_rows.is_none());
        assert_eq!(parsed.added_rows().keys().collect::<Vec<_>>(), vec!["orders"]);
        Ok(())
    }

    #[test]
    fn parse_rejects_non_object_document() {
        assert!(matches!(DbBaseline::parse("[1, 2]"), Err(BaselineError::Decode { .. })));
    }
}
