//! The query executor: drives the row stream through auth/filter/limit
//! checks and into either the renderer (plain queries) or a group table
//! (stats queries), then renders the final result.
//!
//! Sequencing is pinned to `Query::process`/`Query::start`/
//! `Query::processDataset`/`Query::finish` in the protocol this engine
//! implements: wait first, soft response-size check before the
//! filter/auth check on every row, row/time limits checked only on rows
//! that pass filtering, and — for stats — accumulation produces no output
//! at all until the stream ends.

use std::collections::HashMap;
use std::time::Instant;

use tracing::{debug, warn};

use crate::error::QueryError;
use crate::render::{OutputFormat, Renderer, frame_fixed16};
use crate::request::{Query, ResponseHeaderMode};
use crate::stats::{Aggregator, GroupSpec};
use crate::table::Table;
use crate::wait::TriggerRegistry;

/// Default soft cap on the rendered body before the executor stops
/// emitting further rows. Exceeding it is not an error: the response is
/// simply truncated and logged.
pub const DEFAULT_MAX_RESPONSE_SIZE: usize = 100 * 1024 * 1024;

pub struct ExecutionResult {
    pub body: Vec<u8>,
    pub status: u16,
    pub rows_considered: u64,
    pub truncated: bool,
}

pub fn execute(
    query: Query,
    table: &dyn Table,
    registry: &TriggerRegistry,
    max_response_size: usize,
) -> ExecutionResult {
    let span = tracing::debug_span!("query", table = %query.table_name);
    let _guard = span.enter();

    if !query.wait.is_empty() {
        let object = query.wait.object.clone();
        query.wait.run(registry, || {
            object.as_deref().and_then(|spec| table.find_object(spec)).cloned()
        });
    }

    let mut renderer = Renderer::new(query.output_format, query.separators);
    renderer.start_of_query();

    let is_grouped_stats = query.is_stats_query() && !query.columns.is_empty();
    let mut group_table: HashMap<GroupSpec, Vec<Aggregator>> = HashMap::new();
    let mut ungrouped: Vec<Aggregator> = query.stats.iter().map(|sc| sc.new_aggregator()).collect();

    if query.show_column_headers {
        emit_header_row(&query, &mut renderer);
    }

    let mut current_line: u64 = 0;
    let mut truncated = false;
    let mut time_limit_hit = false;
    let time_limit_deadline = query.limits.time_limit.map(|d| Instant::now() + d);

    for row in table.rows() {
        if renderer.body_len() > max_response_size {
            warn!("response size limit reached, truncating result");
            truncated = true;
            break;
        }

        let row = match row {
            Ok(row) => row,
            Err(err) => {
                warn!(error = %err, "table row iteration failed");
                let body = render_error(&err, query.output_format, query.response_header);
                return ExecutionResult {
                    body,
                    status: err.status_code() as u16,
                    rows_considered: current_line,
                    truncated: true,
                };
            }
        };

        let authorized = query
            .auth_user
            .as_ref()
            .map(|user| table.authorize(row, user))
            .unwrap_or(true);

        let filter_accepts = query.filter.as_ref().is_none_or(|f| f.accepts(row));
        if !(filter_accepts && authorized) {
            continue;
        }

        current_line += 1;
        if let Some(limit) = query.limits.row_limit {
            if current_line > limit {
                debug!(limit, "row limit reached");
                truncated = true;
                break;
            }
        }
        if let Some(deadline) = time_limit_deadline {
            if Instant::now() >= deadline {
                debug!("time limit reached");
                truncated = true;
                time_limit_hit = true;
                break;
            }
        }

        if query.is_stats_query() {
            if is_grouped_stats {
                let group: GroupSpec = query.columns.iter().map(|c| c.value(row).as_str()).collect();
                let aggs = group_table
                    .entry(group)
                    .or_insert_with(|| query.stats.iter().map(|sc| sc.new_aggregator()).collect());
                for (sc, agg) in query.stats.iter().zip(aggs.iter_mut()) {
                    sc.consume(agg, row);
                }
            } else {
                for (sc, agg) in query.stats.iter().zip(ungrouped.iter_mut()) {
                    sc.consume(agg, row);
                }
            }
        } else {
            let values: Vec<_> = query.columns.iter().map(|c| c.value(row)).collect();
            renderer.emit_row(&values);
        }
    }

    // Unlike `Limit:` and the soft response-size cap — which truncate
    // silently and still frame a normal 200 — a `Timelimit:` hit supersedes
    // any rows already staged: the original's `timelimitReached()` calls
    // `limitExceeded()`, which calls `_renderer->setError(limit_exceeded,
    // …)`, discarding the buffered body in favor of the error message.
    if time_limit_hit {
        renderer.set_error();
        let err = QueryError::LimitExceeded(format!(
            "Maximum query time of {} seconds exceeded!",
            query.limits.time_limit.unwrap().as_secs()
        ));
        let body = render_error(&err, query.output_format, query.response_header);
        return ExecutionResult {
            body,
            status: err.status_code() as u16,
            rows_considered: current_line,
            truncated,
        };
    }

    if query.is_stats_query() {
        if is_grouped_stats {
            for (group, aggs) in &group_table {
                let mut values: Vec<_> =
                    group.iter().map(|v| crate::column::Value::Str(v.clone())).collect();
                for (sc, agg) in query.stats.iter().zip(aggs.iter()) {
                    values.extend(sc.output(agg));
                }
                renderer.emit_row(&values);
            }
        } else {
            let mut values = Vec::new();
            for (sc, agg) in query.stats.iter().zip(ungrouped.iter()) {
                values.extend(sc.output(agg));
            }
            renderer.emit_row(&values);
        }
    }

    let body = renderer.finish();
    // A row limit or the soft response-size cap truncates the stream but is
    // not a wire error: the response is still framed as a normal success.
    let status = 200u16;
    let body = match query.response_header {
        ResponseHeaderMode::Fixed16 => frame_fixed16(status, &body),
        ResponseHeaderMode::Off => body,
    };

    ExecutionResult {
        body,
        status,
        rows_considered: current_line,
        truncated,
    }
}

fn emit_header_row(query: &Query, renderer: &mut Renderer) {
    let mut names: Vec<crate::column::Value> = query
        .columns
        .iter()
        .map(|c| crate::column::Value::Str(c.name().to_string()))
        .collect();
    for (i, _) in query.stats.iter().enumerate() {
        names.push(crate::column::Value::Str(format!("stats_{}", i + 1)));
    }
    renderer.emit_row(&names);
}

/// Renders a [`QueryError`] as a `fixed16`-framed (or bare) error body,
/// matching the status-code mapping in [`QueryError::status_code`].
pub fn render_error(err: &QueryError, format: OutputFormat, header_mode: ResponseHeaderMode) -> Vec<u8> {
    let _ = format;
    let status = err.status_code() as u16;
    let message = err.to_string();
    match header_mode {
        ResponseHeaderMode::Fixed16 => frame_fixed16(status, message.as_bytes()),
        ResponseHeaderMode::Off => message.into_bytes(),
    }
}
