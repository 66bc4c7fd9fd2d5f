//! Column catalog: the seam between this engine and whatever stores the
//! actual monitoring state. Nothing in this module knows how a row is
//! produced — it only knows how to pull a typed [`Value`] out of one and
//! how to compare that value against a filter operand.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use crate::error::{QueryError, Result};

/// A single row handed to the engine by a table. Kept as a plain
/// name→value map rather than a generic associated type: row production is
/// explicitly out of scope for this crate, and a concrete interchange type
/// lets `Column` stay object-safe (`Arc<dyn Column>`).
#[derive(Debug, Clone, Default)]
pub struct Row(pub HashMap<String, Value>);

impl Row {
    pub fn new() -> Self {
        Row(HashMap::new())
    }

    pub fn insert(&mut self, column: impl Into<String>, value: Value) {
        self.0.insert(column.into(), value);
    }

    pub fn get(&self, column: &str) -> Option<&Value> {
        self.0.get(column)
    }
}

/// A column value. `List` backs both string-list columns (e.g. a set of
/// contact names) and the perfdata blob a [`crate::stats::Aggregator`]
/// parses into `name=value` pairs.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Int(i64),
    Float(f64),
    Str(String),
    List(Vec<String>),
    /// A list of sublists — the "host-service pair list" shape (e.g. a
    /// host's list of downtimes-on-services), rendered with the
    /// list-within separator internally and the list separator between
    /// entries.
    NestedList(Vec<Vec<String>>),
    Time(i64),
    /// An opaque byte blob (e.g. a binary config dump column). Rendered
    /// raw in csv, base64-encoded as a string in json/python.
    Blob(Vec<u8>),
    Null,
}

impl Value {
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Int(i) => Some(*i as f64),
            Value::Float(f) => Some(*f),
            Value::Time(t) => Some(*t as f64),
            Value::Str(s) => s.parse::<f64>().ok(),
            Value::List(_) | Value::NestedList(_) | Value::Blob(_) | Value::Null => None,
        }
    }

    pub fn as_str(&self) -> String {
        match self {
            Value::Int(i) => i.to_string(),
            Value::Float(f) => f.to_string(),
            Value::Time(t) => t.to_string(),
            Value::Str(s) => s.clone(),
            Value::List(items) => items.join(","),
            Value::NestedList(entries) => entries
                .iter()
                .map(|e| e.join("|"))
                .collect::<Vec<_>>()
                .join(","),
            Value::Blob(bytes) => hex_encode(bytes),
            Value::Null => String::new(),
        }
    }

    /// Flattens this value into membership-test candidates: one entry per
    /// list item, or a single entry for everything else. `NestedList`
    /// entries are joined with `|` first — the same canonical separator
    /// `as_str` uses — so a filter on a host-service pair list matches
    /// against `"host|service"` regardless of the query's own separators.
    pub fn as_list(&self) -> Vec<String> {
        match self {
            Value::List(items) => items.clone(),
            Value::NestedList(entries) => entries.iter().map(|e| e.join("|")).collect(),
            other => vec![other.as_str()],
        }
    }
}

fn hex_encode(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{b:02x}")).collect()
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// The closed set of comparison operators the request grammar accepts.
/// `from_name` is the single source of truth for spelling — list-typed
/// columns reinterpret the same four ordering tokens as membership tests,
/// but the token→variant mapping never changes per column.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RelationalOperator {
    Equal,
    NotEqual,
    EqualIgnoreCase,
    NotEqualIgnoreCase,
    Matches,
    NotMatches,
    MatchesIgnoreCase,
    NotMatchesIgnoreCase,
    Less,
    Greater,
    LessOrEqual,
    GreaterOrEqual,
}

impl RelationalOperator {
    pub fn from_name(name: &str) -> Option<Self> {
        use RelationalOperator::*;
        Some(match name {
            "=" => Equal,
            "!=" => NotEqual,
            "=~" => EqualIgnoreCase,
            "!=~" => NotEqualIgnoreCase,
            "~" => Matches,
            "!~" => NotMatches,
            "~~" => MatchesIgnoreCase,
            "!~~" => NotMatchesIgnoreCase,
            "<" => Less,
            ">" => Greater,
            "<=" => LessOrEqual,
            ">=" => GreaterOrEqual,
            _ => return None,
        })
    }
}

/// A column in the catalog. Implementors are supplied by the table; this
/// crate ships [`crate::mock::MockColumn`] as a reference/test
/// implementation only.
pub trait Column: Send + Sync {
    fn name(&self) -> &str;

    /// Whether this column's value should be treated as a list for
    /// filtering (ordering operators become membership tests) and
    /// rendering (emitted as a nested array, not a scalar).
    fn is_list(&self) -> bool {
        false
    }

    /// Pulls this column's value out of a row. Returns `Value::Null` if
    /// the row does not carry this column (e.g. a dummy/unknown column).
    fn value(&self, row: &Row) -> Value;

    /// Evaluates `value(row) <op> rhs`. The default implementation covers
    /// every built-in operator for scalar and list columns; a table only
    /// needs to override this for a column whose comparison semantics do
    /// not reduce to string/numeric comparison (rare).
    fn compare(&self, row: &Row, op: RelationalOperator, rhs: &str) -> bool {
        use RelationalOperator::*;
        let value = self.value(row);

        if self.is_list() {
            let items = value.as_list();
            return match op {
                Equal | GreaterOrEqual => items.iter().any(|i| i == rhs),
                NotEqual => !items.iter().any(|i| i == rhs),
                EqualIgnoreCase => items.iter().any(|i| i.eq_ignore_ascii_case(rhs)),
                NotEqualIgnoreCase => !items.iter().any(|i| i.eq_ignore_ascii_case(rhs)),
                Matches | Greater => items.iter().any(|i| i.contains(rhs)),
                NotMatches | Less | LessOrEqual => !items.iter().any(|i| i.contains(rhs)),
                MatchesIgnoreCase => items
                    .iter()
                    .any(|i| i.to_lowercase().contains(&rhs.to_lowercase())),
                NotMatchesIgnoreCase => !items
                    .iter()
                    .any(|i| i.to_lowercase().contains(&rhs.to_lowercase())),
            };
        }

        match op {
            Equal => value.as_str() == rhs,
            NotEqual => value.as_str() != rhs,
            EqualIgnoreCase => value.as_str().eq_ignore_ascii_case(rhs),
            NotEqualIgnoreCase => !value.as_str().eq_ignore_ascii_case(rhs),
            Matches => value.as_str().contains(rhs),
            NotMatches => !value.as_str().contains(rhs),
            MatchesIgnoreCase => value.as_str().to_lowercase().contains(&rhs.to_lowercase()),
            NotMatchesIgnoreCase => {
                !value.as_str().to_lowercase().contains(&rhs.to_lowercase())
            }
            Less | Greater | LessOrEqual | GreaterOrEqual => {
                match (value.as_f64(), rhs.parse::<f64>()) {
                    (Some(lhs), Ok(num)) => match op {
                        Less => lhs < num,
                        Greater => lhs > num,
                        LessOrEqual => lhs <= num,
                        GreaterOrEqual => lhs >= num,
                        _ => unreachable!(),
                    },
                    // Non-numeric ordering comparison: fall back to
                    // lexicographic string order rather than rejecting the
                    // row outright.
                    _ => {
                        let lhs = value.as_str();
                        match op {
                            Less => lhs.as_str() < rhs,
                            Greater => lhs.as_str() > rhs,
                            LessOrEqual => lhs.as_str() <= rhs,
                            GreaterOrEqual => lhs.as_str() >= rhs,
                            _ => unreachable!(),
                        }
                    }
                }
            }
        }
    }
}

/// Name→column resolution, plus the "no `Columns:` header" fallback of
/// selecting every catalog column.
pub trait ColumnCatalog: Send + Sync {
    fn resolve(&self, name: &str) -> Option<Arc<dyn Column>>;

    /// All columns in catalog declaration order, used when a query omits
    /// `Columns:` entirely.
    fn all_columns(&self) -> Vec<Arc<dyn Column>>;
}

/// A column bound into a query: either a real catalog column, or a dummy
/// stand-in created for an unknown name given in `Columns:`. Rust ownership
/// replaces the manual dummy-column destroy-list of the original design —
/// a `Query` simply owns its `Vec<BoundColumn>`.
#[derive(Clone)]
pub enum BoundColumn {
    Catalog(Arc<dyn Column>),
    Dummy(String),
}

impl BoundColumn {
    pub fn name(&self) -> &str {
        match self {
            BoundColumn::Catalog(c) => c.name(),
            BoundColumn::Dummy(name) => name,
        }
    }

    pub fn value(&self, row: &Row) -> Value {
        match self {
            BoundColumn::Catalog(c) => c.value(row),
            BoundColumn::Dummy(_) => Value::Null,
        }
    }
}

/// Resolves a column by name, returning the sticky invalid-request error
/// the request parser needs (`"unknown column: <name>"`).
pub fn require_column(catalog: &dyn ColumnCatalog, name: &str) -> Result<Arc<dyn Column>> {
    catalog
        .resolve(name)
        .ok_or_else(|| QueryError::InvalidRequest(format!("unknown column: {name}")))
}
