//! The external collaborator interface: whatever holds the actual
//! monitoring state implements `Table`. Storage, row production, and
//! authorization data all live outside this crate — this trait is the only
//! seam through which the executor reaches them.
//!
//! ```text
//!            +-----------------+
//!            |   Table (impl)  |
//!            |  owns real data |
//!            +--------+--------+
//!                     |
//!           catalog() |  rows()
//!                     v
//!            +-----------------+
//!            |  livestatus-core |
//!            |  Executor/Query  |
//!            +-----------------+
//! ```
//!
//! [`crate::mock::MockTable`] is the only concrete implementation this
//! crate ships, for tests and the `livestatus-dump` CLI.

use crate::column::{ColumnCatalog, Row};
use crate::error::QueryError;

/// One schema + row source the engine can run a query against.
pub trait Table: Send + Sync {
    /// The name this table is addressed by in requests (`GET <name>`).
    fn name(&self) -> &str;

    fn catalog(&self) -> &dyn ColumnCatalog;

    /// Streams every row, unfiltered. The executor is responsible for
    /// applying the filter tree, limits, and soft response-size stop. An
    /// `Err` aborts the query with `QueryError::TableFailure` (status 502) —
    /// the collaborator's own I/O or storage layer failed mid-stream.
    fn rows(&self) -> Box<dyn Iterator<Item = Result<&Row, QueryError>> + '_>;

    /// Whether `auth_user` may see `row`. Tables with no access control
    /// model can return `true` unconditionally.
    fn authorize(&self, row: &Row, auth_user: &str) -> bool;

    /// Looks up a single row by the table's own key convention (e.g. a
    /// host name, or `host;service`), for `WaitObject:` to bind against.
    /// Returns `None` if `spec` names no row this table knows about — the
    /// wait coordinator then evaluates the condition against a null row,
    /// per the "missing wait-object is legitimate" contract.
    fn find_object(&self, spec: &str) -> Option<&Row>;
}

/// A registry of tables addressable by name, bound once at daemon startup.
pub trait TableRegistry: Send + Sync {
    fn table(&self, name: &str) -> Option<&dyn Table>;
}
