//! Stats columns and their aggregators — the `Stats:` side of a query.
//!
//! `Aggregator` is a closed enum rather than a `dyn Trait`: every variant's
//! accumulator state is known up front and dispatch is always a `match`,
//! the same choice the catalog's own tagged data types make for in-process
//! variant sets.

use std::collections::HashMap;
use std::sync::Arc;

use crate::column::{Column, RelationalOperator, Row, Value};
use crate::filter::Filter;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatsOperation {
    Count,
    Sum,
    Min,
    Max,
    Avg,
    Std,
    SumInv,
    AvgInv,
    Perfdata,
}

impl StatsOperation {
    pub fn from_name(name: &str) -> Option<Self> {
        Some(match name {
            "sum" => StatsOperation::Sum,
            "min" => StatsOperation::Min,
            "max" => StatsOperation::Max,
            "avg" => StatsOperation::Avg,
            "std" => StatsOperation::Std,
            "suminv" => StatsOperation::SumInv,
            "avginv" => StatsOperation::AvgInv,
            "perfdata" => StatsOperation::Perfdata,
            _ => return None,
        })
    }
}

/// A single `Stats:` line bound to a column.
#[derive(Clone)]
pub struct StatsColumn {
    pub column: Arc<dyn Column>,
    pub op: StatsOperation,
    /// Only set for `StatsOperation::Count`: the filter the row's column
    /// value must satisfy to be counted.
    pub count_filter: Option<Filter>,
}

impl StatsColumn {
    pub fn new_count(column: Arc<dyn Column>, op: RelationalOperator, value: impl Into<String>) -> Self {
        let filter = Filter::leaf(column.clone(), op, value);
        StatsColumn {
            column,
            op: StatsOperation::Count,
            count_filter: Some(filter),
        }
    }

    pub fn new_numeric(column: Arc<dyn Column>, op: StatsOperation) -> Self {
        StatsColumn {
            column,
            op,
            count_filter: None,
        }
    }

    pub fn new_aggregator(&self) -> Aggregator {
        match self.op {
            StatsOperation::Count => Aggregator::Count(0),
            StatsOperation::Perfdata => Aggregator::Perfdata(HashMap::new()),
            _ => Aggregator::Numeric(NumericAccumulator::default()),
        }
    }

    /// Feeds one row's value into `aggregator`.
    pub fn consume(&self, aggregator: &mut Aggregator, row: &Row) {
        match (self.op, aggregator) {
            (StatsOperation::Count, Aggregator::Count(n)) => {
                if self
                    .count_filter
                    .as_ref()
                    .map(|f| f.accepts(row))
                    .unwrap_or(false)
                {
                    *n += 1;
                }
            }
            (StatsOperation::Perfdata, Aggregator::Perfdata(map)) => {
                let raw = self.column.value(row).as_str();
                for (name, value) in parse_perfdata(&raw) {
                    map.entry(name).or_default().push(value);
                }
            }
            (_, Aggregator::Numeric(acc)) => {
                if let Some(v) = self.column.value(row).as_f64() {
                    acc.push(v);
                }
            }
            _ => {}
        }
    }

    /// Final value(s) this stats column produces. A `Perfdata` aggregator
    /// emits one rendered string per variable name, `"name=avg"`, matching
    /// `PerfdataAggregator`'s per-variable `{aggr, count, sumq}` accumulator
    /// reduced the same way a plain `avg` stats column reduces
    /// `NumericAccumulator` — `self.op` is never used here: it identifies
    /// the `Perfdata` aggregator *kind* (see `new_aggregator`), not a
    /// reduction, and reducing with it would be a no-op (`reduce` has no
    /// `Perfdata` case and returns `0.0`).
    pub fn output(&self, aggregator: &Aggregator) -> Vec<Value> {
        match aggregator {
            Aggregator::Count(n) => vec![Value::Int(*n)],
            Aggregator::Numeric(acc) => vec![Value::Float(acc.reduce(self.op))],
            Aggregator::Perfdata(map) => {
                let mut names: Vec<&String> = map.keys().collect();
                names.sort();
                names
                    .into_iter()
                    .map(|name| {
                        let values = &map[name];
                        let mut acc = NumericAccumulator::default();
                        for v in values {
                            acc.push(*v);
                        }
                        Value::Str(format!("{name}={}", acc.reduce(StatsOperation::Avg)))
                    })
                    .collect()
            }
        }
    }
}

/// `{count, sum, sum_of_squares}` — the same triple
/// `examples/original_source/livestatus/src/PerfdataAggregator.h` keeps per
/// variable name, generalized here to back every numeric stats operation.
/// `sum_inv` tracks `Σ(1/vᵢ)` separately (skipping `vᵢ=0`) since `suminv` is
/// the sum of reciprocals, not the reciprocal of the sum.
#[derive(Debug, Clone, Default)]
pub struct NumericAccumulator {
    pub count: u64,
    pub sum: f64,
    pub sum_sq: f64,
    pub sum_inv: f64,
    pub min: Option<f64>,
    pub max: Option<f64>,
}

impl NumericAccumulator {
    pub fn push(&mut self, value: f64) {
        self.count += 1;
        self.sum += value;
        self.sum_sq += value * value;
        if value != 0.0 {
            self.sum_inv += 1.0 / value;
        }
        self.min = Some(self.min.map_or(value, |m| m.min(value)));
        self.max = Some(self.max.map_or(value, |m| m.max(value)));
    }

    pub fn reduce(&self, op: StatsOperation) -> f64 {
        let n = self.count as f64;
        match op {
            StatsOperation::Sum => self.sum,
            StatsOperation::Min => self.min.unwrap_or(0.0),
            StatsOperation::Max => self.max.unwrap_or(0.0),
            StatsOperation::Avg => {
                if n == 0.0 {
                    0.0
                } else {
                    self.sum / n
                }
            }
            // Population std per spec: sqrt(max(0, (Σv² - sum²/n)/(n-1))).
            StatsOperation::Std => {
                if n < 2.0 {
                    0.0
                } else {
                    ((self.sum_sq - self.sum * self.sum / n) / (n - 1.0))
                        .max(0.0)
                        .sqrt()
                }
            }
            StatsOperation::SumInv => self.sum_inv,
            StatsOperation::AvgInv => {
                if n == 0.0 {
                    0.0
                } else {
                    self.sum_inv / n
                }
            }
            StatsOperation::Count | StatsOperation::Perfdata => 0.0,
        }
    }
}

/// Accumulator state for one `Stats:` column, bound once per group (or once
/// for the whole query in the ungrouped case).
#[derive(Clone)]
pub enum Aggregator {
    Count(i64),
    Numeric(NumericAccumulator),
    Perfdata(HashMap<String, Vec<f64>>),
}

/// Parses a whitespace-delimited `name=value[;…]` perfdata blob. A token
/// missing `=` or whose value half does not parse as a float is skipped —
/// one bad token never aborts the row.
fn parse_perfdata(raw: &str) -> Vec<(String, f64)> {
    let mut out = Vec::new();
    for token in raw.split_whitespace() {
        let Some((name, rest)) = token.split_once('=') else {
            continue;
        };
        let value_part = rest.split(';').next().unwrap_or(rest);
        if let Ok(value) = value_part.parse::<f64>() {
            out.push((name.to_string(), value));
        }
    }
    out
}

/// Group-by key: the rendered values of the `Columns:`-declared grouping
/// columns, in declaration order.
pub type GroupSpec = Vec<String>;
