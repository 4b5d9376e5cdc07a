use async_trait::async_trait;
use futures::stream::BoxStream;

use crate::backend::Endpoint;
use crate::errors::ShardError;
use crate::shared_types::{BoundQuery, QueryResult, ShardTarget, TransactionId};

/// Incremental results of a streaming statement on one shard, in backend
/// order. An `Err` item ends the stream.
pub type ResultStream = BoxStream<'static, Result<QueryResult, ShardError>>;

// -----------------------------------------------------------------------------
// ----- ShardClient -----------------------------------------------------------

/// One live connection to one shard backend.
///
/// Every call reports failures with the `ShardError` taxonomy; the caller
/// decides what is retried. `tx` is the backend transaction the statement
/// belongs to, if any.
#[async_trait]
pub trait ShardClient: Send {
    async fn execute(
        &mut self,
        query: &BoundQuery,
        tx: Option<TransactionId>,
    ) -> Result<QueryResult, ShardError>;

    async fn execute_batch(
        &mut self,
        queries: &[BoundQuery],
        tx: Option<TransactionId>,
    ) -> Result<Vec<QueryResult>, ShardError>;

    async fn stream_execute(
        &mut self,
        query: &BoundQuery,
        tx: Option<TransactionId>,
    ) -> Result<ResultStream, ShardError>;

    async fn begin(&mut self) -> Result<TransactionId, ShardError>;

    async fn commit(&mut self, tx: TransactionId) -> Result<(), ShardError>;

    async fn rollback(&mut self, tx: TransactionId) -> Result<(), ShardError>;

    /// Releases backend resources. Must tolerate being called on a broken
    /// connection.
    async fn close(&mut self);
}

// -----------------------------------------------------------------------------
// ----- ShardDialer -----------------------------------------------------------

/// Opens shard clients. Shared by every session of a gateway.
#[async_trait]
pub trait ShardDialer: Send + Sync {
    async fn dial(
        &self,
        endpoint: &Endpoint,
        target: &ShardTarget,
    ) -> Result<Box<dyn ShardClient>, ShardError>;
}

// -----------------------------------------------------------------------------
// -----------------------------------------------------------------------------
