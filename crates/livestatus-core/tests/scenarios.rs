//! End-to-end scenarios against an in-memory mock table, one per
//! concrete example in the protocol's "testable properties" section.
//! Each test runs a full request line through `request::parse` and
//! `executor::execute`, asserting on the rendered csv body — the same
//! path a real client connection exercises.

use std::sync::Arc;

use livestatus_core::column::Value;
use livestatus_core::executor::{self, DEFAULT_MAX_RESPONSE_SIZE};
use livestatus_core::mock::{MockColumn, MockTable};
use livestatus_core::request;
use livestatus_core::table::{Table, TableRegistry};
use livestatus_core::wait::TriggerRegistry;

struct OneTable(MockTable);

impl TableRegistry for OneTable {
    fn table(&self, name: &str) -> Option<&dyn Table> {
        if name == self.0.name() { Some(&self.0) } else { None }
    }
}

fn run(table: MockTable, req: &str) -> String {
    let registry = OneTable(table);
    let query = request::parse(req, &registry).expect("request parses");
    let triggers = TriggerRegistry::new();
    let result = executor::execute(query, &registry.0, &triggers, DEFAULT_MAX_RESPONSE_SIZE);
    String::from_utf8(result.body).unwrap()
}

/// Scenario 1: no `Columns:`, no `Filter:` — every column is selected and
/// headers are forced on.
#[test]
fn scenario_empty_filter_selects_every_column_with_headers() {
    let table = MockTable::typical_hosts();
    let body = run(table, "GET hosts\n\n");
    let mut lines = body.lines();
    let header = lines.next().unwrap();
    assert_eq!(header, "host;state;plugin_output;contacts;perf_data");
    // Header row plus one row per fixture host.
    assert_eq!(body.lines().count(), 5);
}

fn table_with_rows(rows: &[(i64, i64)]) -> MockTable {
    let mut table = MockTable::new("services")
        .with_column(Arc::new(MockColumn::scalar("num_services")))
        .with_column(Arc::new(MockColumn::scalar("state")));
    for (num_services, state) in rows {
        let mut row = livestatus_core::column::Row::new();
        row.insert("num_services", Value::Int(*num_services));
        row.insert("state", Value::Int(*state));
        table = table.with_row(row);
    }
    table
}

/// Scenario 2: ungrouped stats combining a numeric sum with two filter
/// (count) stats columns.
#[test]
fn scenario_stats_without_group() {
    let table = table_with_rows(&[(3, 0), (5, 1), (2, 0)]);
    let req = "GET services\nStats: sum num_services\nStats: state = 0\nStats: state = 1\n\n";
    let body = run(table, req);
    assert_eq!(body.trim(), "10;2;1");
}

fn group_table(rows: &[(&str, i64)]) -> MockTable {
    let mut table = MockTable::new("groups")
        .with_column(Arc::new(MockColumn::scalar("group")))
        .with_column(Arc::new(MockColumn::scalar("value")));
    for (group, value) in rows {
        let mut row = livestatus_core::column::Row::new();
        row.insert("group", Value::Str(group.to_string()));
        row.insert("value", Value::Int(*value));
        table = table.with_row(row);
    }
    table
}

/// Scenario 3: grouped stats — one row per distinct `group` value, each
/// carrying its own sum/avg. Inter-group ordering is unspecified, so the
/// assertion collects rows into a set instead of comparing positionally.
#[test]
fn scenario_stats_with_group() {
    let table = group_table(&[("A", 2), ("B", 10), ("A", 4)]);
    let req = "GET groups\nColumns: group\nStats: sum value\nStats: avg value\n\n";
    let body = run(table, req);
    let mut rows: Vec<&str> = body.lines().collect();
    rows.sort();
    assert_eq!(rows, vec!["A;6;3", "B;10;10"]);
}

/// Scenario 4: `StatsOr:`/`StatsNegate:` combine two count-type stats
/// columns into "neither state 0 nor state 1".
#[test]
fn scenario_stats_negation_via_or_and_negate() {
    let table = table_with_rows(&[(3, 0), (5, 1), (2, 0), (1, 2)]);
    let req = "GET services\nStats: state = 0\nStats: state = 1\nStatsOr: 2\nStatsNegate:\n\n";
    let body = run(table, req);
    // Only the state=2 row is neither 0 nor 1.
    assert_eq!(body.trim(), "1");
}

/// Scenario 5a: `Limit:` truncates the output but still ends cleanly.
#[test]
fn scenario_limit_truncates_cleanly() {
    let table = MockTable::typical_hosts();
    let registry = OneTable(table);
    let query = request::parse("GET hosts\nColumns: host\nLimit: 2\n\n", &registry).unwrap();
    let triggers = TriggerRegistry::new();
    let result = executor::execute(query, &registry.0, &triggers, DEFAULT_MAX_RESPONSE_SIZE);
    assert!(result.truncated);
    let body = String::from_utf8(result.body).unwrap();
    assert_eq!(body.lines().count(), 2);
}

/// Scenario 5b: `Timelimit: 0` marks the response `limit_exceeded` (status
/// 452) after the first row-check — the deadline has already elapsed by
/// then — and supersedes any rows already staged, not a truncated-but-200
/// body.
#[test]
fn scenario_zero_timelimit_marks_limit_exceeded() {
    let table = MockTable::typical_hosts();
    let registry = OneTable(table);
    let query = request::parse("GET hosts\nColumns: host\nTimelimit: 0\n\n", &registry).unwrap();
    let triggers = TriggerRegistry::new();
    let result = executor::execute(query, &registry.0, &triggers, DEFAULT_MAX_RESPONSE_SIZE);
    assert!(result.truncated);
    assert_eq!(result.status, 452);
    let body = String::from_utf8(result.body).unwrap();
    assert!(body.contains("limit exceeded"));
    assert!(!body.contains("web1"));
}

/// Scenario 6: a `WaitCondition:` that already holds against the bound
/// `WaitObject:` must not block on the trigger at all.
#[test]
fn scenario_wait_condition_pre_satisfied_does_not_block() {
    let table = MockTable::typical_hosts(); // web1's state is 0
    let registry = OneTable(table);
    let req = "GET hosts\nColumns: host\nWaitCondition: state = 0\nWaitObject: web1\nWaitTimeout: 5000\n\n";
    let query = request::parse(req, &registry).unwrap();
    let triggers = TriggerRegistry::new();
    let start = std::time::Instant::now();
    let _ = executor::execute(query, &registry.0, &triggers, DEFAULT_MAX_RESPONSE_SIZE);
    assert!(start.elapsed() < std::time::Duration::from_millis(500));
}

/// Column type: list-typed value renders as a nested array in json and
/// an unescaped, comma-joined field in csv.
#[test]
fn list_column_renders_as_csv_list() {
    let table = MockTable::typical_hosts();
    let req = "GET hosts\nColumns: host contacts\nFilter: host = web1\n\n";
    let body = run(table, req);
    assert_eq!(body.trim(), "web1;alice,bob");
}

fn perf_table(rows: &[&str]) -> MockTable {
    let mut table = MockTable::new("checks").with_column(Arc::new(MockColumn::scalar("perf_data")));
    for raw in rows {
        let mut row = livestatus_core::column::Row::new();
        row.insert("perf_data", Value::Str((*raw).to_string()));
        table = table.with_row(row);
    }
    table
}

/// `Stats: perfdata perf_data` reports each variable's real average across
/// the matched rows, not a disguised zero.
#[test]
fn scenario_perfdata_stats_reports_real_averages() {
    let table = perf_table(&["rta=1.0 pl=0", "rta=3.0", "rta=2.0 pl=2"]);
    let req = "GET checks\nStats: perfdata perf_data\n\n";
    let body = run(table, req);
    let fields: Vec<&str> = body.trim().split(';').collect();
    // Sorted by variable name: pl averages (0+2)/2, rta averages (1+3+2)/3.
    assert_eq!(fields, vec!["pl=1", "rta=2"]);
}
