//! Error taxonomy for request parsing and query execution.
//!
//! Mirrors the two-case split a livestatus-style query actually needs:
//! a request that could not be understood at all (`InvalidRequest`), and a
//! running query that hit a configured stop condition (`LimitExceeded`).
//! Neither is a `std::io::Error` wrapper — nothing here talks to the OS.

use std::fmt;

/// Everything that can go wrong while parsing or executing a query.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum QueryError {
    /// The request could not be parsed, referenced an unknown column, or
    /// named a wait object the table does not recognize.
    InvalidRequest(String),
    /// A time limit was reached while streaming results. Supersedes the
    /// body with an error response per spec §5/§7 — unlike `Limit:`, which
    /// truncates silently at 200.
    LimitExceeded(String),
    /// The bound table's row iterator surfaced an error of its own.
    TableFailure(String),
}

impl fmt::Display for QueryError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            QueryError::InvalidRequest(msg) => write!(f, "invalid request: {msg}"),
            QueryError::LimitExceeded(msg) => write!(f, "limit exceeded: {msg}"),
            QueryError::TableFailure(msg) => write!(f, "table failure: {msg}"),
        }
    }
}

impl std::error::Error for QueryError {}

/// HTTP-flavored status codes used to frame a `fixed16` response header.
/// 200 is success; the rest mirror the taxonomy in the external interface
/// section of the query protocol this engine implements.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusCode {
    Ok = 200,
    BadRequest = 400,
    Forbidden = 403,
    NotFound = 404,
    LimitExceeded = 452,
    UpstreamFailure = 502,
}

impl QueryError {
    /// Maps this error onto the status code the renderer puts in the
    /// `fixed16` response header.
    pub fn status_code(&self) -> StatusCode {
        match self {
            QueryError::InvalidRequest(_) => StatusCode::BadRequest,
            QueryError::LimitExceeded(_) => StatusCode::LimitExceeded,
            QueryError::TableFailure(_) => StatusCode::UpstreamFailure,
        }
    }
}

pub type Result<T> = std::result::Result<T, QueryError>;
