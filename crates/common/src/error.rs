use thiserror::Error;

/// Canonical TSQ error taxonomy used across crates.
///
/// Classification guidance:
/// - [`QueryError::Compile`]: statement validation failures discovered
///   before a plan exists
/// - [`QueryError::Plan`]: link-time failures while lowering a compiled
///   statement into the plan graph
/// - [`QueryError::Execution`]: node execution and iterator runtime failures
/// - [`QueryError::Storage`]: shard mapping and iterator creation failures
///   surfaced by the storage layer
/// - [`QueryError::Unsupported`]: syntactically valid but intentionally
///   unimplemented behavior
#[derive(Debug, Error)]
pub enum QueryError {
    /// Statement validation failure.
    ///
    /// The payload is the canonical diagnostic text and is displayed bare:
    /// the compile diagnostics are a surface contract and callers match
    /// them verbatim.
    ///
    /// Examples:
    /// - `undefined function a()`
    /// - `cannot use OR with time conditions`
    /// - `invalid number of arguments for count, expected 1, got 2`
    #[error("{0}")]
    Compile(String),

    /// Link-time failure while building the plan graph.
    ///
    /// Examples:
    /// - a wildcard that expands against an empty field set
    /// - a reference whose type cannot be resolved from any shard
    #[error("plan error: {0}")]
    Plan(String),

    /// Runtime execution failure after linking succeeded.
    ///
    /// Examples:
    /// - a node whose runtime is deliberately stubbed
    /// - no executable node found while unfinished nodes remain
    #[error("execution error: {0}")]
    Execution(String),

    /// Shard mapping or iterator creation failure in the storage layer.
    #[error("storage error: {0}")]
    Storage(String),

    /// Valid request for behavior not implemented in the current version.
    #[error("unsupported: {0}")]
    Unsupported(String),
}

/// Standard TSQ result alias.
pub type Result<T> = std::result::Result<T, QueryError>;
