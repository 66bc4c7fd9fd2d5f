//! The request parser: turns the line-oriented header grammar into a bound
//! [`Query`]. Header dispatch is a `split_once(':')` match rather than the
//! `strncmp` chain the original uses — no header name is ever a prefix of
//! another up to the colon, so this is a direct translation, not a
//! behavior change.

use std::time::Duration;

use crate::column::{BoundColumn, ColumnCatalog, RelationalOperator, require_column};
use crate::error::{QueryError, Result};
use crate::filter::{Filter, LogicalOp};
use crate::render::OutputFormat;
use crate::stats::{StatsColumn, StatsOperation};
use crate::table::{Table, TableRegistry};
use crate::wait::WaitSpec;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponseHeaderMode {
    Off,
    Fixed16,
}

#[derive(Debug, Clone, Copy)]
pub struct Separators {
    pub dataset: u8,
    pub field: u8,
    pub list: u8,
    pub list_within: u8,
}

impl Default for Separators {
    fn default() -> Self {
        // Matches the protocol's defaults: newline between datasets,
        // semicolon between fields, comma between list entries, pipe
        // within a list-of-lists entry.
        Separators {
            dataset: b'\n',
            field: b';',
            list: b',',
            list_within: b'|',
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct Limits {
    pub row_limit: Option<u64>,
    pub time_limit: Option<Duration>,
}

/// A fully parsed and bound request, ready for the executor.
pub struct Query {
    pub table_name: String,
    /// `None` means "no Filter: headers were given" — accept every row.
    /// Kept distinct from an empty `Filter::Variadic` so the filter tree's
    /// own invariant (a variadic node is never empty) never needs an
    /// exception.
    pub filter: Option<Filter>,
    pub columns: Vec<BoundColumn>,
    pub stats: Vec<StatsColumn>,
    pub limits: Limits,
    pub auth_user: Option<String>,
    pub separators: Separators,
    pub output_format: OutputFormat,
    pub response_header: ResponseHeaderMode,
    pub keepalive: bool,
    pub wait: WaitSpec,
    pub timezone_offset_secs: i32,
    pub show_column_headers: bool,
}

impl Query {
    pub fn is_stats_query(&self) -> bool {
        !self.stats.is_empty()
    }
}

const UNKNOWN_AUTH_USER: &str = "\0unknown";

/// Internal parser state. One instance per request.
struct Parser<'a> {
    catalog: &'a dyn ColumnCatalog,
    table: &'a dyn Table,
    filter_stack: Vec<Filter>,
    wait_stack: Vec<Filter>,
    stats: Vec<StatsColumn>,
    columns: Vec<BoundColumn>,
    columns_given: bool,
    limits: Limits,
    auth_user: Option<String>,
    separators: Separators,
    output_format: OutputFormat,
    response_header: ResponseHeaderMode,
    keepalive: bool,
    wait_object: Option<String>,
    wait_trigger: Option<String>,
    wait_timeout: Option<Duration>,
    timezone_offset_secs: i32,
    show_column_headers: bool,
    show_column_headers_explicit: bool,
}

impl<'a> Parser<'a> {
    fn new(table: &'a dyn Table) -> Self {
        Parser {
            catalog: table.catalog(),
            table,
            filter_stack: Vec::new(),
            wait_stack: Vec::new(),
            stats: Vec::new(),
            columns: Vec::new(),
            columns_given: false,
            limits: Limits::default(),
            auth_user: None,
            separators: Separators::default(),
            output_format: OutputFormat::Csv,
            response_header: ResponseHeaderMode::Off,
            keepalive: false,
            wait_object: None,
            wait_trigger: None,
            wait_timeout: None,
            timezone_offset_secs: 0,
            show_column_headers: false,
            show_column_headers_explicit: false,
        }
    }

    fn parse_header(&mut self, name: &str, rest: &str) -> Result<()> {
        let rest = rest.trim();
        match name {
            "Filter" => self.push_filter(rest)?,
            "And" => self.combine(rest, LogicalOp::And, false)?,
            "Or" => self.combine(rest, LogicalOp::Or, false)?,
            "Negate" => self.negate(false)?,
            "StatsAnd" => self.combine_stats(rest, LogicalOp::And)?,
            "StatsOr" => self.combine_stats(rest, LogicalOp::Or)?,
            "StatsNegate" => self.negate_stats()?,
            "Stats" => self.push_stats(rest)?,
            "StatsGroupBy" => self.push_columns(rest)?, // deprecated alias
            "Columns" => self.push_columns(rest)?,
            "ColumnHeaders" => {
                self.show_column_headers = parse_on_off(rest)?;
                self.show_column_headers_explicit = true;
            }
            "Limit" => {
                self.limits.row_limit = Some(
                    rest.parse::<u64>()
                        .map_err(|_| QueryError::InvalidRequest(format!("invalid Limit: {rest}")))?,
                );
            }
            "Timelimit" => {
                let secs = rest
                    .parse::<u64>()
                    .map_err(|_| QueryError::InvalidRequest(format!("invalid Timelimit: {rest}")))?;
                self.limits.time_limit = Some(Duration::from_secs(secs));
            }
            "AuthUser" => {
                // Unknown principals are not an error: not every user is
                // known on every monitored site by design.
                self.auth_user = Some(if rest.is_empty() {
                    UNKNOWN_AUTH_USER.to_string()
                } else {
                    rest.to_string()
                });
            }
            "Separators" => self.parse_separators(rest)?,
            "OutputFormat" => {
                self.output_format = OutputFormat::from_name(rest).ok_or_else(|| {
                    QueryError::InvalidRequest(format!("unknown output format: {rest}"))
                })?;
            }
            "ResponseHeader" => {
                self.response_header = match rest {
                    "fixed16" => ResponseHeaderMode::Fixed16,
                    "off" => ResponseHeaderMode::Off,
                    other => {
                        return Err(QueryError::InvalidRequest(format!(
                            "unknown response header mode: {other}"
                        )));
                    }
                };
            }
            "KeepAlive" => self.keepalive = parse_on_off(rest)?,
            "WaitCondition" => self.push_wait_filter(rest)?,
            "WaitConditionAnd" => self.combine(rest, LogicalOp::And, true)?,
            "WaitConditionOr" => self.combine(rest, LogicalOp::Or, true)?,
            "WaitConditionNegate" => self.negate(true)?,
            "WaitTrigger" => self.wait_trigger = Some(rest.to_string()),
            "WaitObject" => self.parse_wait_object(rest)?,
            "WaitTimeout" => {
                let ms = rest
                    .parse::<u64>()
                    .map_err(|_| QueryError::InvalidRequest(format!("invalid WaitTimeout: {rest}")))?;
                self.wait_timeout = Some(Duration::from_millis(ms));
            }
            "Localtime" => self.parse_localtime(rest)?,
            other => {
                return Err(QueryError::InvalidRequest(format!(
                    "undefined request header: {other}"
                )));
            }
        }
        Ok(())
    }

    fn push_filter(&mut self, rest: &str) -> Result<()> {
        let filter = parse_filter_line(self.catalog, rest)?;
        self.filter_stack.push(filter);
        Ok(())
    }

    fn push_wait_filter(&mut self, rest: &str) -> Result<()> {
        let filter = parse_filter_line(self.catalog, rest)?;
        self.wait_stack.push(filter);
        Ok(())
    }

    fn combine(&mut self, rest: &str, op: LogicalOp, is_wait: bool) -> Result<()> {
        let n = parse_count(rest)?;
        let stack = if is_wait {
            &mut self.wait_stack
        } else {
            &mut self.filter_stack
        };
        if n == 0 || stack.len() < n {
            return Err(QueryError::InvalidRequest(format!(
                "cannot combine {n} filters: only {} available",
                stack.len()
            )));
        }
        let popped = stack.split_off(stack.len() - n);
        stack.push(Filter::combine(op, popped));
        Ok(())
    }

    fn negate(&mut self, is_wait: bool) -> Result<()> {
        let stack = if is_wait {
            &mut self.wait_stack
        } else {
            &mut self.filter_stack
        };
        let last = stack
            .pop()
            .ok_or_else(|| QueryError::InvalidRequest("nothing to negate".to_string()))?;
        stack.push(last.negate());
        Ok(())
    }

    fn combine_stats(&mut self, rest: &str, op: LogicalOp) -> Result<()> {
        let n = parse_count(rest)?;
        if n == 0 || self.stats.len() < n {
            return Err(QueryError::InvalidRequest(format!(
                "cannot combine {n} stats columns: only {} available",
                self.stats.len()
            )));
        }
        let start = self.stats.len() - n;
        for sc in &self.stats[start..] {
            if sc.op != StatsOperation::Count {
                return Err(QueryError::InvalidRequest(
                    "can use StatsAnd/StatsOr only on Stats: headers of filter type".to_string(),
                ));
            }
        }
        let popped: Vec<StatsColumn> = self.stats.split_off(start);
        let column = popped[0].column.clone();
        let filters: Vec<Filter> = popped
            .into_iter()
            .map(|sc| sc.count_filter.expect("checked above"))
            .collect();
        let combined = Filter::combine(op, filters);
        self.stats.push(StatsColumn {
            column,
            op: StatsOperation::Count,
            count_filter: Some(combined),
        });
        Ok(())
    }

    fn negate_stats(&mut self) -> Result<()> {
        let last = self
            .stats
            .pop()
            .ok_or_else(|| QueryError::InvalidRequest("nothing to negate".to_string()))?;
        if last.op != StatsOperation::Count {
            return Err(QueryError::InvalidRequest(
                "can use StatsNegate only on Stats: headers of filter type".to_string(),
            ));
        }
        let column = last.column.clone();
        let negated = last.count_filter.expect("checked above").negate();
        self.stats.push(StatsColumn {
            column,
            op: StatsOperation::Count,
            count_filter: Some(negated),
        });
        Ok(())
    }

    fn push_stats(&mut self, rest: &str) -> Result<()> {
        let mut parts = rest.splitn(2, char::is_whitespace);
        let first = parts
            .next()
            .ok_or_else(|| QueryError::InvalidRequest("empty Stats: header".to_string()))?;
        let remainder = parts.next().unwrap_or("").trim();

        // Stats headers default column headers off, overridable by an
        // explicit ColumnHeaders: header appearing anywhere in the request.
        if !self.show_column_headers_explicit {
            self.show_column_headers = false;
        }

        if let Some(op) = StatsOperation::from_name(first) {
            let column = require_column(self.catalog, remainder)?;
            self.stats.push(StatsColumn::new_numeric(column, op));
            return Ok(());
        }

        // Anything else defaults to `count`: `first` is the column name,
        // `remainder` is `OP VALUE`.
        let column = require_column(self.catalog, first)?;
        let mut tail = remainder.splitn(2, char::is_whitespace);
        let op_name = tail
            .next()
            .filter(|s| !s.is_empty())
            .ok_or_else(|| QueryError::InvalidRequest("missing operator in Stats:".to_string()))?;
        let value = tail.next().unwrap_or("").trim();
        let op = RelationalOperator::from_name(op_name)
            .ok_or_else(|| QueryError::InvalidRequest(format!("unknown operator: {op_name}")))?;
        self.stats.push(StatsColumn::new_count(column, op, value));
        Ok(())
    }

    fn push_columns(&mut self, rest: &str) -> Result<()> {
        self.columns_given = true;
        self.show_column_headers = false;
        for name in rest.split_whitespace() {
            match self.catalog.resolve(name) {
                Some(column) => self.columns.push(BoundColumn::Catalog(column)),
                None => {
                    tracing::warn!(column = name, "replacing non-existing column with dummy");
                    self.columns.push(BoundColumn::Dummy(name.to_string()));
                }
            }
        }
        Ok(())
    }

    /// Resolves `WaitObject:` against the table immediately, matching the
    /// original's `parseWaitObjectLine` (it calls `findObject` at parse
    /// time and raises an invalid-header message on failure). A missing
    /// `WaitObject:` header entirely is a different, legitimate case
    /// handled later by the wait coordinator against a null row.
    fn parse_wait_object(&mut self, rest: &str) -> Result<()> {
        if self.table.find_object(rest).is_none() {
            return Err(QueryError::InvalidRequest(format!(
                "WaitObject: object '{rest}' not found"
            )));
        }
        self.wait_object = Some(rest.to_string());
        Ok(())
    }

    fn parse_separators(&mut self, rest: &str) -> Result<()> {
        let codes: Vec<u8> = rest
            .split_whitespace()
            .map(|tok| tok.parse::<u16>().map(|n| n as u8))
            .collect::<std::result::Result<_, _>>()
            .map_err(|_| QueryError::InvalidRequest(format!("invalid Separators: {rest}")))?;
        let [dataset, field, list, list_within] = codes[..] else {
            return Err(QueryError::InvalidRequest(
                "Separators: requires exactly four ascii codes".to_string(),
            ));
        };
        self.separators = Separators {
            dataset,
            field,
            list,
            list_within,
        };
        Ok(())
    }

    /// `their_time - our_time`, rounded to the nearest half hour with
    /// ties (exactly 900s) rounding away from zero, matching the original
    /// implementation exactly. Rejects offsets of a day or more.
    fn parse_localtime(&mut self, rest: &str) -> Result<()> {
        let their_time: i64 = rest
            .parse()
            .map_err(|_| QueryError::InvalidRequest(format!("invalid Localtime: {rest}")))?;
        let our_time = now_epoch();
        let dif = their_time - our_time;
        let mut full = dif / 1800;
        let rem = dif % 1800;
        if rem <= -900 {
            full -= 1;
        } else if rem >= 900 {
            full += 1;
        }
        if !(-48..48).contains(&full) {
            return Err(QueryError::InvalidRequest(
                "timezone difference greater than 24 hours".to_string(),
            ));
        }
        self.timezone_offset_secs = (full * 1800) as i32;
        Ok(())
    }
}

fn now_epoch() -> i64 {
    chrono::Utc::now().timestamp()
}

fn parse_on_off(rest: &str) -> Result<bool> {
    match rest {
        "on" => Ok(true),
        "off" => Ok(false),
        other => Err(QueryError::InvalidRequest(format!(
            "expected on/off, got: {other}"
        ))),
    }
}

fn parse_count(rest: &str) -> Result<usize> {
    rest.parse::<usize>()
        .map_err(|_| QueryError::InvalidRequest(format!("invalid count: {rest}")))
}

/// Parses one `COLUMN OP VALUE` line into a leaf filter.
fn parse_filter_line(catalog: &dyn ColumnCatalog, rest: &str) -> Result<Filter> {
    let mut parts = rest.splitn(3, char::is_whitespace);
    let column = parts
        .next()
        .filter(|s| !s.is_empty())
        .ok_or_else(|| QueryError::InvalidRequest("missing column in Filter:".to_string()))?;
    let op_name = parts
        .next()
        .ok_or_else(|| QueryError::InvalidRequest("missing operator in Filter:".to_string()))?;
    let value = parts.next().unwrap_or("").trim();
    Filter::parse_leaf(catalog, column, op_name, value)
}

/// Parses a full request: the first line is `GET <table>`, followed by
/// zero or more header lines, terminated by an empty line or end of
/// input. Unrecognized headers, and the first structural error of any
/// kind, abort parsing immediately — matching the original's first-wins
/// `_invalid_header_message` and its `break` out of the header loop.
pub fn parse(request_text: &str, registry: &dyn TableRegistry) -> Result<Query> {
    let mut lines = request_text.lines();
    let first = lines
        .next()
        .ok_or_else(|| QueryError::InvalidRequest("empty request".to_string()))?;
    let table_name = first
        .strip_prefix("GET ")
        .map(str::trim)
        .ok_or_else(|| QueryError::InvalidRequest(format!("expected GET line, got: {first}")))?
        .to_string();

    let table = registry
        .table(&table_name)
        .ok_or_else(|| QueryError::InvalidRequest(format!("no such table: {table_name}")))?;

    let mut parser = Parser::new(table);
    for line in lines {
        if line.is_empty() {
            break;
        }
        let Some((name, rest)) = line.split_once(':') else {
            return Err(QueryError::InvalidRequest(format!(
                "malformed header line: {line}"
            )));
        };
        parser.parse_header(name, rest)?;
    }

    let filter = if parser.filter_stack.is_empty() {
        None
    } else {
        Some(Filter::combine(LogicalOp::And, parser.filter_stack))
    };

    let wait_condition = if parser.wait_stack.is_empty() {
        None
    } else {
        Some(Filter::combine(LogicalOp::And, parser.wait_stack))
    };

    let mut columns = parser.columns;
    let mut show_column_headers = parser.show_column_headers;
    if !parser.columns_given && parser.stats.is_empty() {
        // No Columns: header and not a stats query: select every catalog
        // column and force headers on, even overriding an explicit
        // `ColumnHeaders: off` sent earlier in the same request. This
        // mirrors the original behavior exactly; it carries a TODO there
        // acknowledging the ambiguity, preserved here rather than "fixed".
        columns = table
            .catalog()
            .all_columns()
            .into_iter()
            .map(BoundColumn::Catalog)
            .collect();
        show_column_headers = true;
    }

    Ok(Query {
        table_name,
        filter,
        columns,
        stats: parser.stats,
        limits: parser.limits,
        auth_user: parser.auth_user,
        separators: parser.separators,
        output_format: parser.output_format,
        response_header: parser.response_header,
        keepalive: parser.keepalive,
        wait: WaitSpec {
            object: parser.wait_object,
            condition: wait_condition,
            trigger: parser.wait_trigger,
            timeout: parser.wait_timeout,
        },
        timezone_offset_secs: parser.timezone_offset_secs,
        show_column_headers,
    })
}

/// All column names referenced anywhere in the query: output columns,
/// stats columns, and both filter trees. A table implementation may use
/// this to avoid materializing columns nobody asked for.
pub fn referenced_columns(query: &Query) -> std::collections::HashSet<String> {
    let mut out = std::collections::HashSet::new();
    if let Some(filter) = &query.filter {
        filter.collect_columns_owned(&mut out);
    }
    if let Some(wait) = &query.wait.condition {
        wait.collect_columns_owned(&mut out);
    }
    for c in &query.columns {
        out.insert(c.name().to_string());
    }
    for sc in &query.stats {
        out.insert(sc.column.name().to_string());
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::MockTable;
    use crate::table::Table;

    struct OneTableRegistry(MockTable);
    impl TableRegistry for OneTableRegistry {
        fn table(&self, name: &str) -> Option<&dyn Table> {
            if name == self.0.name() {
                Some(&self.0)
            } else {
                None
            }
        }
    }

    fn registry() -> OneTableRegistry {
        OneTableRegistry(MockTable::typical_hosts())
    }

    #[test]
    fn parses_simple_filter() {
        let req = "GET hosts\nFilter: state = 0\n\n";
        let q = parse(req, &registry()).unwrap();
        assert_eq!(q.table_name, "hosts");
        assert!(!q.columns.is_empty());
    }

    #[test]
    fn and_combines_filters() {
        let req = "GET hosts\nFilter: state = 0\nFilter: host = web1\nAnd: 2\n\n";
        let q = parse(req, &registry()).unwrap();
        match q.filter {
            Some(Filter::Variadic(LogicalOp::And, ref children)) => assert_eq!(children.len(), 2),
            _ => panic!("expected combined And filter"),
        }
    }

    #[test]
    fn unknown_column_in_filter_is_invalid_request() {
        let req = "GET hosts\nFilter: nope = x\n\n";
        let err = parse(req, &registry()).unwrap_err();
        assert!(matches!(err, QueryError::InvalidRequest(_)));
    }

    #[test]
    fn unknown_column_in_columns_becomes_dummy_not_error() {
        let req = "GET hosts\nColumns: host nope\n\n";
        let q = parse(req, &registry()).unwrap();
        assert_eq!(q.columns.len(), 2);
        assert!(matches!(q.columns[1], BoundColumn::Dummy(_)));
    }

    #[test]
    fn missing_columns_header_selects_all_and_forces_headers() {
        let req = "GET hosts\nColumnHeaders: off\n\n";
        let q = parse(req, &registry()).unwrap();
        assert!(q.show_column_headers);
        assert_eq!(q.columns.len(), 5);
    }

    #[test]
    fn stats_query_with_columns_headers_defaults_off() {
        let req = "GET hosts\nStats: state = 0\n\n";
        let q = parse(req, &registry()).unwrap();
        assert!(!q.show_column_headers);
        assert!(q.is_stats_query());
    }

    #[test]
    fn wait_object_naming_unknown_key_is_invalid_request() {
        let req = "GET hosts\nWaitCondition: state = 0\nWaitObject: nope\n\n";
        let err = parse(req, &registry()).unwrap_err();
        assert!(matches!(err, QueryError::InvalidRequest(_)));
    }

    #[test]
    fn wait_object_naming_known_key_parses() {
        let req = "GET hosts\nWaitCondition: state = 0\nWaitObject: web1\n\n";
        let q = parse(req, &registry()).unwrap();
        assert_eq!(q.wait.object.as_deref(), Some("web1"));
    }

    #[test]
    fn negate_with_empty_stack_is_invalid_request() {
        let req = "GET hosts\nNegate:\n\n";
        let err = parse(req, &registry()).unwrap_err();
        assert!(matches!(err, QueryError::InvalidRequest(_)));
    }

    #[test]
    fn localtime_rounds_to_nearest_half_hour() {
        // Difference of exactly 1000s from "now" should round to +1 slot
        // of 1800s, i.e. timezone_offset_secs == 1800.
        let now = now_epoch();
        let req = format!("GET hosts\nLocaltime: {}\n\n", now + 1000);
        let q = parse(&req, &registry()).unwrap();
        assert_eq!(q.timezone_offset_secs, 1800);
    }

    #[test]
    fn unknown_header_is_invalid_request() {
        let req = "GET hosts\nBogusHeader: x\n\n";
        let err = parse(req, &registry()).unwrap_err();
        assert!(matches!(err, QueryError::InvalidRequest(_)));
    }
}
