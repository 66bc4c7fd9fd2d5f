//! An in-memory table used by this crate's own tests and by
//! `livestatus-dump` for ad-hoc inspection. Modeled on
//! `collector::mock::scenarios`'s fixture-builder pattern: a small struct
//! with `typical_*()` constructors that seed realistic rows, rather than a
//! full fake of a real monitoring core.

use std::collections::HashMap;
use std::sync::Arc;

use crate::column::{Column, ColumnCatalog, Row, Value};
use crate::error::QueryError;
use crate::table::Table;

/// A column backed by a closure-free, per-row `HashMap` lookup. Sufficient
/// for scalar test/demo columns; list columns use [`MockColumn::list`].
pub struct MockColumn {
    name: String,
    is_list: bool,
}

impl MockColumn {
    pub fn scalar(name: impl Into<String>) -> Self {
        MockColumn {
            name: name.into(),
            is_list: false,
        }
    }

    pub fn list(name: impl Into<String>) -> Self {
        MockColumn {
            name: name.into(),
            is_list: true,
        }
    }
}

impl Column for MockColumn {
    fn name(&self) -> &str {
        &self.name
    }

    fn is_list(&self) -> bool {
        self.is_list
    }

    fn value(&self, row: &Row) -> Value {
        row.get(&self.name).cloned().unwrap_or(Value::Null)
    }
}

/// An in-memory table: a fixed column catalog plus a `Vec<Row>`. `rows()`
/// hands back an iterator so the executor never needs to know this is a
/// `Vec` under the hood.
pub struct MockTable {
    name: String,
    columns: HashMap<String, Arc<dyn Column>>,
    column_order: Vec<String>,
    rows: Vec<Row>,
    /// The column `find_object` matches `WaitObject:` specs against.
    key_column: Option<String>,
    /// If set, `rows()` yields this many rows and then a single
    /// `QueryError::TableFailure`, simulating a collaborator whose row
    /// source failed partway through a scan.
    fail_after: Option<usize>,
}

impl MockTable {
    pub fn new(name: impl Into<String>) -> Self {
        MockTable {
            name: name.into(),
            columns: HashMap::new(),
            column_order: Vec::new(),
            rows: Vec::new(),
            key_column: None,
            fail_after: None,
        }
    }

    pub fn with_column(mut self, column: Arc<dyn Column>) -> Self {
        self.column_order.push(column.name().to_string());
        self.columns.insert(column.name().to_string(), column);
        self
    }

    pub fn with_row(mut self, row: Row) -> Self {
        self.rows.push(row);
        self
    }

    pub fn with_key_column(mut self, column: impl Into<String>) -> Self {
        self.key_column = Some(column.into());
        self
    }

    pub fn with_failure_after(mut self, n: usize) -> Self {
        self.fail_after = Some(n);
        self
    }

    /// A small fixture resembling a host status table: `host`, `state`
    /// (0/1/2), `plugin_output`, `contacts` (list), `perf_data`.
    pub fn typical_hosts() -> Self {
        let mut table = MockTable::new("hosts")
            .with_column(Arc::new(MockColumn::scalar("host")))
            .with_column(Arc::new(MockColumn::scalar("state")))
            .with_column(Arc::new(MockColumn::scalar("plugin_output")))
            .with_column(Arc::new(MockColumn::list("contacts")))
            .with_column(Arc::new(MockColumn::scalar("perf_data")))
            .with_key_column("host");

        let fixtures = [
            ("web1", 0, "OK - up 14 days", vec!["alice", "bob"], "rta=0.5ms;100;200 pl=0%"),
            ("web2", 1, "WARNING - high load", vec!["alice"], "load=4.2;2;8 rta=1.2ms;100;200"),
            ("db1", 2, "CRITICAL - disk full", vec!["bob", "carol"], "disk=98%;80;95"),
            ("db2", 0, "OK", vec!["carol"], "rta=0.3ms;100;200"),
        ];
        for (host, state, output, contacts, perf) in fixtures {
            let mut row = Row::new();
            row.insert("host", Value::Str(host.to_string()));
            row.insert("state", Value::Int(state));
            row.insert("plugin_output", Value::Str(output.to_string()));
            row.insert(
                "contacts",
                Value::List(contacts.into_iter().map(str::to_string).collect()),
            );
            row.insert("perf_data", Value::Str(perf.to_string()));
            table = table.with_row(row);
        }
        table
    }
}

impl ColumnCatalog for MockTable {
    fn resolve(&self, name: &str) -> Option<Arc<dyn Column>> {
        self.columns.get(name).cloned()
    }

    fn all_columns(&self) -> Vec<Arc<dyn Column>> {
        self.column_order
            .iter()
            .filter_map(|n| self.columns.get(n).cloned())
            .collect()
    }
}

impl Table for MockTable {
    fn name(&self) -> &str {
        &self.name
    }

    fn catalog(&self) -> &dyn ColumnCatalog {
        self
    }

    fn rows(&self) -> Box<dyn Iterator<Item = Result<&Row, QueryError>> + '_> {
        match self.fail_after {
            None => Box::new(self.rows.iter().map(Ok)),
            Some(n) => Box::new(
                self.rows
                    .iter()
                    .take(n)
                    .map(Ok)
                    .chain(std::iter::once(Err(QueryError::TableFailure(
                        "mock row source exhausted".to_string(),
                    )))),
            ),
        }
    }

    fn authorize(&self, _row: &Row, _auth_user: &str) -> bool {
        true
    }

    fn find_object(&self, spec: &str) -> Option<&Row> {
        let key = self.key_column.as_deref()?;
        self.rows.iter().find(|row| match row.get(key) {
            Some(value) => value.as_str() == spec,
            None => false,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn typical_hosts_has_four_rows() {
        let table = MockTable::typical_hosts();
        assert_eq!(table.rows().count(), 4);
    }

    #[test]
    fn find_object_matches_key_column() {
        let table = MockTable::typical_hosts();
        let row = table.find_object("web2").expect("web2 exists");
        assert_eq!(row.get("state"), Some(&Value::Int(1)));
        assert!(table.find_object("nope").is_none());
    }

    #[test]
    fn unknown_column_resolves_to_none() {
        let table = MockTable::typical_hosts();
        assert!(table.catalog().resolve("nonexistent").is_none());
    }

    #[test]
    fn failure_after_n_rows_yields_table_failure() {
        let table = MockTable::typical_hosts().with_failure_after(2);
        let collected: Vec<_> = table.rows().collect();
        assert_eq!(collected.len(), 3);
        assert!(collected[0].is_ok());
        assert!(collected[1].is_ok());
        assert!(matches!(collected[2], Err(QueryError::TableFailure(_))));
    }
}
