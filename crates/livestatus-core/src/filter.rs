//! The boolean filter tree bound to `Filter:`/`And:`/`Or:`/`Negate:` headers
//! (and reused, unmodified, for `WaitCondition*` headers).
//!
//! Kept as a tagged enum with `match`-based recursion rather than a visitor
//! object: the variant set is closed and every operation (`accepts`,
//! column collection, index-friendly bound extraction) is naturally a
//! `match` over three cases.

use std::collections::HashSet;
use std::sync::Arc;

use crate::column::{BoundColumn, Column, ColumnCatalog, RelationalOperator, Row, require_column};
use crate::error::Result;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogicalOp {
    And,
    Or,
}

/// A single `column op value` leaf.
#[derive(Clone)]
pub struct ColumnPredicate {
    pub column: Arc<dyn Column>,
    pub op: RelationalOperator,
    pub value: String,
}

impl ColumnPredicate {
    pub fn accepts(&self, row: &Row) -> bool {
        self.column.compare(row, self.op, &self.value)
    }
}

/// The filter tree. `Variadic` must never hold an empty vector — every
/// constructor that could produce one instead returns
/// [`crate::error::QueryError::InvalidRequest`].
#[derive(Clone)]
pub enum Filter {
    Predicate(ColumnPredicate),
    Negate(Box<Filter>),
    Variadic(LogicalOp, Vec<Filter>),
}

impl Filter {
    pub fn leaf(column: Arc<dyn Column>, op: RelationalOperator, value: impl Into<String>) -> Self {
        Filter::Predicate(ColumnPredicate {
            column,
            op,
            value: value.into(),
        })
    }

    /// Builds a `column op value` leaf by resolving `column` against the
    /// catalog, mirroring `createFilter`'s validation: unknown column,
    /// unknown operator, or a missing value are all
    /// `QueryError::InvalidRequest`.
    pub fn parse_leaf(
        catalog: &dyn ColumnCatalog,
        column: &str,
        op_name: &str,
        value: &str,
    ) -> Result<Self> {
        let column = require_column(catalog, column)?;
        let op = RelationalOperator::from_name(op_name).ok_or_else(|| {
            crate::error::QueryError::InvalidRequest(format!("unknown operator: {op_name}"))
        })?;
        Ok(Filter::leaf(column, op, value))
    }

    pub fn negate(self) -> Self {
        Filter::Negate(Box::new(self))
    }

    /// Combines `n` filters popped from the end of `stack` (most recent
    /// last) under `op`. Mirrors `VariadicFilter::combineFilters`: `n == 0`
    /// yields a vacuously-true/false filter rendered as an empty `And`/`Or`
    /// node is explicitly disallowed — the caller (the request parser)
    /// rejects `n == 0` before calling this.
    pub fn combine(op: LogicalOp, mut popped: Vec<Filter>) -> Self {
        if popped.len() == 1 {
            return popped.pop().unwrap();
        }
        Filter::Variadic(op, popped)
    }

    /// Evaluates this filter tree against a row.
    pub fn accepts(&self, row: &Row) -> bool {
        match self {
            Filter::Predicate(p) => p.accepts(row),
            Filter::Negate(inner) => !inner.accepts(row),
            Filter::Variadic(LogicalOp::And, children) => children.iter().all(|c| c.accepts(row)),
            Filter::Variadic(LogicalOp::Or, children) => children.iter().any(|c| c.accepts(row)),
        }
    }

    /// Recursively collects every column referenced anywhere in this tree.
    /// Replaces the original's `ColumnCollector` visitor with a single free
    /// function walk (see `collect_into`).
    pub fn collect_columns<'a>(&'a self, out: &mut HashSet<&'a str>) {
        match self {
            Filter::Predicate(p) => {
                out.insert(p.column.name());
            }
            Filter::Negate(inner) => inner.collect_columns(out),
            Filter::Variadic(_, children) => {
                for c in children {
                    c.collect_columns(out);
                }
            }
        }
    }

    /// Owned-string variant of [`Filter::collect_columns`], for callers
    /// (such as [`crate::request::referenced_columns`]) that need the
    /// result to outlive the filter tree's own borrow.
    pub fn collect_columns_owned(&self, out: &mut HashSet<String>) {
        match self {
            Filter::Predicate(p) => {
                out.insert(p.column.name().to_string());
            }
            Filter::Negate(inner) => inner.collect_columns_owned(out),
            Filter::Variadic(_, children) => {
                for c in children {
                    c.collect_columns_owned(out);
                }
            }
        }
    }

    /// Attempts to find a single equality/inequality value pushed down on
    /// `column_name`. Conservative: returns `None` whenever the predicate
    /// is not provably safe to push down — i.e. anywhere under an `Or`, or
    /// under a `Negate`, or when multiple leaves reference the column with
    /// conflicting operators.
    pub fn find_value_for_indexing(&self, column_name: &str) -> Option<&str> {
        match self {
            Filter::Predicate(p)
                if p.column.name() == column_name && p.op == RelationalOperator::Equal =>
            {
                Some(&p.value)
            }
            Filter::Predicate(_) => None,
            Filter::Negate(_) => None,
            Filter::Variadic(LogicalOp::And, children) => {
                let mut found = None;
                for c in children {
                    if let Some(v) = c.find_value_for_indexing(column_name) {
                        match found {
                            None => found = Some(v),
                            Some(prev) if prev == v => {}
                            Some(_) => return None,
                        }
                    }
                }
                found
            }
            Filter::Variadic(LogicalOp::Or, _) => None,
        }
    }

    /// Attempts to narrow an integer column to `[lo, hi]` inclusive from
    /// `<`/`<=`/`>`/`>=`/`=` leaves. Conservative in the same sense as
    /// [`Filter::find_value_for_indexing`]: anything under `Or`/`Negate`
    /// leaves the range unnarrowed.
    pub fn find_int_limits(&self, column_name: &str) -> (Option<i64>, Option<i64>) {
        match self {
            Filter::Predicate(p) if p.column.name() == column_name => {
                let Some(n) = p.value.parse::<i64>().ok() else {
                    return (None, None);
                };
                use RelationalOperator::*;
                match p.op {
                    Equal => (Some(n), Some(n)),
                    Greater => (Some(n + 1), None),
                    GreaterOrEqual => (Some(n), None),
                    Less => (None, Some(n - 1)),
                    LessOrEqual => (None, Some(n)),
                    _ => (None, None),
                }
            }
            Filter::Predicate(_) | Filter::Negate(_) | Filter::Variadic(LogicalOp::Or, _) => {
                (None, None)
            }
            Filter::Variadic(LogicalOp::And, children) => {
                let mut lo = None;
                let mut hi = None;
                for c in children {
                    let (clo, chi) = c.find_int_limits(column_name);
                    lo = narrow_max(lo, clo);
                    hi = narrow_min(hi, chi);
                }
                (lo, hi)
            }
        }
    }

    /// Narrows `mask` to the set of bits `column_name` could still match,
    /// for bitfield-typed columns (e.g. a `modified_attributes` column
    /// whose value is a bit index set by equality). Conservative in the
    /// same sense as the other two hooks: an `Or` only narrows when every
    /// child resolves to a known bit, and `Negate` never narrows at all.
    pub fn optimize_bitmask(&self, column_name: &str, mask: &mut u64) {
        match self {
            Filter::Predicate(p) if p.column.name() == column_name => {
                if p.op == RelationalOperator::Equal
                    && let Ok(bit) = p.value.parse::<u32>()
                    && bit < 64
                {
                    *mask &= 1u64 << bit;
                }
            }
            Filter::Predicate(_) | Filter::Negate(_) => {}
            Filter::Variadic(LogicalOp::And, children) => {
                for c in children {
                    c.optimize_bitmask(column_name, mask);
                }
            }
            Filter::Variadic(LogicalOp::Or, children) => {
                let mut union = 0u64;
                for c in children {
                    let mut child_mask = u64::MAX;
                    c.optimize_bitmask(column_name, &mut child_mask);
                    if child_mask == u64::MAX {
                        // At least one branch left the bit unconstrained —
                        // narrowing the whole Or would be unsound.
                        return;
                    }
                    union |= child_mask;
                }
                *mask &= union;
            }
        }
    }
}

fn narrow_max(a: Option<i64>, b: Option<i64>) -> Option<i64> {
    match (a, b) {
        (Some(a), Some(b)) => Some(a.max(b)),
        (Some(a), None) => Some(a),
        (None, b) => b,
    }
}

fn narrow_min(a: Option<i64>, b: Option<i64>) -> Option<i64> {
    match (a, b) {
        (Some(a), Some(b)) => Some(a.min(b)),
        (Some(a), None) => Some(a),
        (None, b) => b,
    }
}

/// Collects the columns referenced by the main filter, the wait condition,
/// and every stats/output column, the way `Query`'s constructor builds
/// `_all_columns` after the header loop finishes.
pub fn collect_all_referenced<'a>(
    filters: &'a [&'a Filter],
    bound: &'a [BoundColumn],
) -> HashSet<&'a str> {
    let mut out = HashSet::new();
    for f in filters {
        f.collect_columns(&mut out);
    }
    for c in bound {
        out.insert(c.name());
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::MockColumn;

    fn col(name: &str) -> Arc<dyn Column> {
        Arc::new(MockColumn::scalar(name))
    }

    fn row(pairs: &[(&str, &str)]) -> Row {
        let mut r = Row::new();
        for (k, v) in pairs {
            r.insert(*k, crate::column::Value::Str(v.to_string()));
        }
        r
    }

    #[test]
    fn and_requires_all_children() {
        let f = Filter::Variadic(
            LogicalOp::And,
            vec![
                Filter::leaf(col("state"), RelationalOperator::Equal, "0"),
                Filter::leaf(col("host"), RelationalOperator::Equal, "web1"),
            ],
        );
        assert!(f.accepts(&row(&[("state", "0"), ("host", "web1")])));
        assert!(!f.accepts(&row(&[("state", "1"), ("host", "web1")])));
    }

    #[test]
    fn or_requires_any_child() {
        let f = Filter::Variadic(
            LogicalOp::Or,
            vec![
                Filter::leaf(col("state"), RelationalOperator::Equal, "2"),
                Filter::leaf(col("state"), RelationalOperator::Equal, "3"),
            ],
        );
        assert!(f.accepts(&row(&[("state", "3")])));
        assert!(!f.accepts(&row(&[("state", "0")])));
    }

    #[test]
    fn negate_inverts() {
        let f = Filter::leaf(col("state"), RelationalOperator::Equal, "0").negate();
        assert!(!f.accepts(&row(&[("state", "0")])));
        assert!(f.accepts(&row(&[("state", "1")])));
    }

    #[test]
    fn find_value_for_indexing_is_conservative_under_or() {
        let f = Filter::Variadic(
            LogicalOp::Or,
            vec![
                Filter::leaf(col("host"), RelationalOperator::Equal, "a"),
                Filter::leaf(col("host"), RelationalOperator::Equal, "b"),
            ],
        );
        assert_eq!(f.find_value_for_indexing("host"), None);
    }

    #[test]
    fn find_value_for_indexing_finds_and_leaf() {
        let f = Filter::Variadic(
            LogicalOp::And,
            vec![
                Filter::leaf(col("host"), RelationalOperator::Equal, "a"),
                Filter::leaf(col("state"), RelationalOperator::Equal, "0"),
            ],
        );
        assert_eq!(f.find_value_for_indexing("host"), Some("a"));
    }

    #[test]
    fn int_limits_combine_under_and() {
        let f = Filter::Variadic(
            LogicalOp::And,
            vec![
                Filter::leaf(col("age"), RelationalOperator::GreaterOrEqual, "10"),
                Filter::leaf(col("age"), RelationalOperator::Less, "20"),
            ],
        );
        assert_eq!(f.find_int_limits("age"), (Some(10), Some(19)));
    }

    #[test]
    fn int_limits_conservative_under_or() {
        let f = Filter::Variadic(
            LogicalOp::Or,
            vec![
                Filter::leaf(col("age"), RelationalOperator::Equal, "10"),
                Filter::leaf(col("age"), RelationalOperator::Equal, "20"),
            ],
        );
        assert_eq!(f.find_int_limits("age"), (None, None));
    }

    #[test]
    fn bitmask_narrows_on_equality() {
        let f = Filter::leaf(col("flag"), RelationalOperator::Equal, "3");
        let mut mask = u64::MAX;
        f.optimize_bitmask("flag", &mut mask);
        assert_eq!(mask, 1 << 3);
    }

    #[test]
    fn bitmask_unions_under_or() {
        let f = Filter::Variadic(
            LogicalOp::Or,
            vec![
                Filter::leaf(col("flag"), RelationalOperator::Equal, "1"),
                Filter::leaf(col("flag"), RelationalOperator::Equal, "2"),
            ],
        );
        let mut mask = u64::MAX;
        f.optimize_bitmask("flag", &mut mask);
        assert_eq!(mask, (1 << 1) | (1 << 2));
    }

    #[test]
    fn bitmask_untouched_under_negate() {
        let f = Filter::leaf(col("flag"), RelationalOperator::Equal, "1").negate();
        let mut mask = 0b1111u64;
        f.optimize_bitmask("flag", &mut mask);
        assert_eq!(mask, 0b1111);
    }
}
