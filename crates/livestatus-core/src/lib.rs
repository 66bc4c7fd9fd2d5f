//! livestatus-core — a query execution engine for a line-oriented,
//! monitoring-style live-status protocol.
//!
//! Provides:
//! - `column` — the column catalog seam: typed values, the relational
//!   operator taxonomy, and the `Column`/`ColumnCatalog` traits a table
//!   implements
//! - `filter` — the boolean filter tree bound to `Filter:`/`And:`/`Or:`/
//!   `Negate:` headers
//! - `stats` — `Stats:` columns and their aggregators, including the
//!   per-variable perfdata aggregator
//! - `request` — the request parser, producing a bound [`request::Query`]
//! - `wait` — the blocking wait coordinator behind `WaitCondition:`/
//!   `WaitTrigger:` headers
//! - `executor` — drives a bound query against a `Table` and renders the
//!   result
//! - `render` — csv/json/python wire formats and `fixed16` response framing
//! - `table` — the `Table`/`TableRegistry` traits external collaborators
//!   implement
//! - `error` — the request/execution error taxonomy
//!
//! `mock` ships an in-memory `Table` implementation used by this crate's
//! own tests and by the `livestatus-dump` CLI; it is not meant to back a
//! real deployment.

pub mod column;
pub mod error;
pub mod executor;
pub mod filter;
pub mod mock;
pub mod render;
pub mod request;
pub mod stats;
pub mod table;
pub mod wait;
