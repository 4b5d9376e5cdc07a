use std::fmt;

use thiserror::Error;

use crate::pool::PoolError;
use crate::shared_types::{SessionId, ShardTarget};

// -----------------------------------------------------------------------------
// ----- ShardError ------------------------------------------------------------

/// Error reported by one shard call. This is the taxonomy the shard client
/// and the endpoint selector speak, and the one the retry policy classifies.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ShardError {
    #[error("no healthy endpoint for {target}")]
    NoHealthyEndpoint { target: String },

    #[error("endpoint {endpoint} unreachable: {reason}")]
    Unreachable { endpoint: String, reason: String },

    #[error("connection reset: {0}")]
    ConnectionReset(String),

    #[error("backend not serving: {0}")]
    NotServing(String),

    #[error("statement rejected: {0}")]
    Statement(String),

    #[error("constraint violation: {0}")]
    Constraint(String),

    #[error("not authorized: {0}")]
    Unauthorized(String),

    #[error("protocol error: {0}")]
    Protocol(String),

    #[error("{0}")]
    Other(String),
}

impl ShardError {
    /// Transient backend conditions worth another attempt.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            ShardError::NoHealthyEndpoint { .. }
                | ShardError::Unreachable { .. }
                | ShardError::ConnectionReset(_)
                | ShardError::NotServing(_)
        )
    }

    /// The backend connection itself is unusable and must be re-dialed.
    pub fn is_connection_error(&self) -> bool {
        matches!(
            self,
            ShardError::Unreachable { .. } | ShardError::ConnectionReset(_)
        )
    }
}

// -----------------------------------------------------------------------------
// ----- ShardFailure ----------------------------------------------------------

/// A `ShardError` tagged with the shard it came from.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("{target}: {error}{}", attempts_suffix(.attempts))]
pub struct ShardFailure {
    pub target: ShardTarget,
    pub attempts: u32,
    #[source]
    pub error: ShardError,
}

impl ShardFailure {
    pub fn new(target: ShardTarget, attempts: u32, error: ShardError) -> Self {
        Self {
            target,
            attempts,
            error,
        }
    }
}

fn attempts_suffix(attempts: &u32) -> String {
    if *attempts > 1 {
        format!(" (after {attempts} attempts)")
    } else {
        String::new()
    }
}

// -----------------------------------------------------------------------------
// ----- FanoutFailure ---------------------------------------------------------

/// Aggregate outcome of a fan-out in which at least one shard failed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FanoutFailure {
    pub operation: &'static str,
    pub failures: Vec<ShardFailure>,
    pub succeeded: Vec<ShardTarget>,
}

impl FanoutFailure {
    pub fn failed_shards(&self) -> Vec<&str> {
        self.failures.iter().map(|f| f.target.shard.as_str()).collect()
    }
}

impl fmt::Display for FanoutFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let total = self.failures.len() + self.succeeded.len();
        write!(
            f,
            "{} failed on {} of {} shards: ",
            self.operation,
            self.failures.len(),
            total
        )?;

        for (i, failure) in self.failures.iter().enumerate() {
            if i > 0 {
                f.write_str("; ")?;
            }
            write!(f, "{failure}")?;
        }

        Ok(())
    }
}

impl std::error::Error for FanoutFailure {}

// -----------------------------------------------------------------------------
// ----- GatewayError ----------------------------------------------------------

#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("session not found")]
    SessionNotFound(SessionId),

    #[error("session is busy: in use by {purpose}")]
    SessionBusy { id: SessionId, purpose: &'static str },

    #[error("session id {0} already registered")]
    DuplicateSession(SessionId),

    #[error("too many open sessions (limit {limit})")]
    TooManySessions { limit: usize },

    #[error(transparent)]
    PartialFanoutFailure(FanoutFailure),

    #[error("already in transaction")]
    AlreadyInTransaction,

    #[error("transaction was rolled back after a failed statement")]
    TransactionRolledBack,

    #[error("session is closed")]
    SessionClosed,

    #[error("result sink closed by receiver")]
    SinkClosed,
}

impl GatewayError {
    pub fn fanout(&self) -> Option<&FanoutFailure> {
        match self {
            GatewayError::PartialFanoutFailure(failure) => Some(failure),
            _ => None,
        }
    }
}

impl From<FanoutFailure> for GatewayError {
    fn from(failure: FanoutFailure) -> Self {
        GatewayError::PartialFanoutFailure(failure)
    }
}

impl From<PoolError> for GatewayError {
    fn from(err: PoolError) -> Self {
        match err {
            PoolError::NotFound(id) => GatewayError::SessionNotFound(id),
            PoolError::Busy { id, purpose } => GatewayError::SessionBusy { id, purpose },
            PoolError::Duplicate(id) => GatewayError::DuplicateSession(id),
            PoolError::Full { limit } => GatewayError::TooManySessions { limit },
        }
    }
}

// -----------------------------------------------------------------------------
// ----- RequestError ----------------------------------------------------------

/// Error returned to a client call: the cause annotated with the session and,
/// for statement calls, the statement text.
#[derive(Debug, Error)]
#[error("{}session {session_id}: {source}", statement_prefix(.statement))]
pub struct RequestError {
    pub session_id: SessionId,
    pub statement: Option<String>,
    #[source]
    pub source: GatewayError,
}

impl RequestError {
    pub fn new(session_id: SessionId, statement: Option<String>, source: GatewayError) -> Self {
        Self {
            session_id,
            statement,
            source,
        }
    }

    pub fn kind(&self) -> &GatewayError {
        &self.source
    }
}

fn statement_prefix(statement: &Option<String>) -> String {
    match statement {
        Some(sql) => format!("query: {sql}, "),
        None => String::new(),
    }
}

// -----------------------------------------------------------------------------
// ----- Tests -----------------------------------------------------------------


// -----------------------------------------------------------------------------
// -----------------------------------------------------------------------------
