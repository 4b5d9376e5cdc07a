use futures::future::BoxFuture;
use std::sync::Arc;
use tokio::time::sleep;
use tracing::{debug, warn};

use super::retry::RetryPolicy;
use crate::backend::{Endpoint, EndpointSelector, ResultStream, ShardClient, ShardDialer};
use crate::errors::{ShardError, ShardFailure};
use crate::shared_types::{BoundQuery, QueryResult, ShardTarget, TransactionId};

// -----------------------------------------------------------------------------
// ----- ShardConn -------------------------------------------------------------

/// A session's logical connection to one shard. The backend client is dialed
/// on first use and re-dialed after the client reports the connection broken.
pub(crate) struct ShardConn {
    target: ShardTarget,
    connected: Option<Connected>,
    transaction_id: Option<TransactionId>,
    selector: Arc<dyn EndpointSelector>,
    dialer: Arc<dyn ShardDialer>,
    retry: RetryPolicy,
}

struct Connected {
    endpoint: Endpoint,
    client: Box<dyn ShardClient>,
}

// -----------------------------------------------------------------------------
// ----- ShardConn: Static -----------------------------------------------------

impl ShardConn {
    pub(crate) fn new(
        target: ShardTarget,
        selector: Arc<dyn EndpointSelector>,
        dialer: Arc<dyn ShardDialer>,
        retry: RetryPolicy,
    ) -> Self {
        Self {
            target,
            connected: None,
            transaction_id: None,
            selector,
            dialer,
            retry,
        }
    }
}

// -----------------------------------------------------------------------------
// ----- ShardConn: Public -----------------------------------------------------

impl ShardConn {
    pub(crate) fn target(&self) -> &ShardTarget {
        &self.target
    }

    pub(crate) fn in_transaction(&self) -> bool {
        self.transaction_id.is_some()
    }

    pub(crate) async fn execute_one(&mut self, query: &BoundQuery) -> Result<QueryResult, ShardFailure> {
        self.call(&Execute(query)).await
    }

    pub(crate) async fn execute_batch(
        &mut self,
        queries: &[BoundQuery],
    ) -> Result<Vec<QueryResult>, ShardFailure> {
        let results = self.call(&ExecuteBatch(queries)).await?;

        if results.len() != queries.len() {
            return Err(ShardFailure::new(
                self.target.clone(),
                1,
                ShardError::Protocol(format!(
                    "batch of {} statements returned {} results",
                    queries.len(),
                    results.len()
                )),
            ));
        }

        Ok(results)
    }

    /// Opens a streaming statement. Only opening is retried; once rows flow,
    /// a failure ends the stream.
    pub(crate) async fn stream_one(&mut self, query: &BoundQuery) -> Result<ResultStream, ShardFailure> {
        self.call(&StreamExecute(query)).await
    }

    /// Joins the session's transaction on this shard, beginning one on the
    /// backend unless this shard already has it.
    pub(crate) async fn begin_tx(&mut self) -> Result<TransactionId, ShardFailure> {
        if let Some(tx) = self.transaction_id {
            return Ok(tx);
        }

        let tx = self.call(&Begin).await?;
        debug!("began transaction {tx} on {}", self.target);
        self.transaction_id = Some(tx);
        Ok(tx)
    }

    /// Commits this shard's transaction. The transaction identity is cleared
    /// whatever the outcome.
    pub(crate) async fn commit_tx(&mut self) -> Result<(), ShardFailure> {
        let Some(tx) = self.transaction_id else {
            return Ok(());
        };

        let result = self.call(&Commit(tx)).await;
        self.transaction_id = None;
        result
    }

    /// Rolls back this shard's transaction with exactly one attempt. The
    /// transaction identity is cleared whatever the outcome.
    pub(crate) async fn rollback_tx(&mut self) -> Result<(), ShardFailure> {
        let Some(tx) = self.transaction_id.take() else {
            return Ok(());
        };

        match self.attempt(&Rollback(tx)).await {
            Ok(()) => Ok(()),
            Err(err) => {
                if err.is_connection_error() {
                    self.invalidate().await;
                }
                Err(ShardFailure::new(self.target.clone(), 1, err))
            }
        }
    }

    /// Tags an error raised after a stream opened, dropping the client when
    /// the connection broke.
    pub(crate) async fn stream_failed(&mut self, err: ShardError) -> ShardFailure {
        if err.is_connection_error() {
            self.invalidate().await;
        }
        ShardFailure::new(self.target.clone(), 1, err)
    }

    pub(crate) async fn teardown(&mut self) {
        self.transaction_id = None;
        if let Some(mut connected) = self.connected.take() {
            debug!("closing connection to {} at {}", self.target, connected.endpoint);
            connected.client.close().await;
        }
    }
}

// -----------------------------------------------------------------------------
// ----- ShardConn: Private ----------------------------------------------------

impl ShardConn {
    async fn call<C: ShardCall>(&mut self, call: &C) -> Result<C::Output, ShardFailure> {
        let mut attempts = 0;

        loop {
            attempts += 1;

            let err = match self.attempt(call).await {
                Ok(output) => return Ok(output),
                Err(err) => err,
            };

            if err.is_connection_error() {
                self.invalidate().await;
            }

            if !self.retry.should_retry(attempts, &err, self.in_transaction()) {
                return Err(ShardFailure::new(self.target.clone(), attempts, err));
            }

            warn!(
                "{} on {} failed (attempt {attempts}/{}): {err}; retrying in {:?}",
                call.name(),
                self.target,
                self.retry.max_attempts(),
                self.retry.delay()
            );
            sleep(self.retry.delay()).await;
        }
    }

    async fn attempt<C: ShardCall>(&mut self, call: &C) -> Result<C::Output, ShardError> {
        let tx = self.transaction_id;
        let client = self.connect().await?;
        call.invoke(client, tx).await
    }

    async fn connect(&mut self) -> Result<&mut dyn ShardClient, ShardError> {
        let connected = match &mut self.connected {
            Some(connected) => connected,
            slot @ None => {
                let endpoint = self.selector.select(&self.target)?;
                debug!("dialing {} at {endpoint}", self.target);

                let client = match self.dialer.dial(&endpoint, &self.target).await {
                    Ok(client) => client,
                    Err(err) => {
                        if err.is_connection_error() {
                            self.selector.mark_down(&self.target, &endpoint);
                        }
                        return Err(err);
                    }
                };

                slot.insert(Connected { endpoint, client })
            }
        };

        Ok(connected.client.as_mut())
    }

    /// Drops a broken client so the next call re-dials, and reports its
    /// endpoint to the selector.
    async fn invalidate(&mut self) {
        if let Some(mut connected) = self.connected.take() {
            self.selector.mark_down(&self.target, &connected.endpoint);
            connected.client.close().await;
        }
    }
}

// -----------------------------------------------------------------------------
// ----- Internal: ShardCall ---------------------------------------------------

/// One shard client request, replayable across retry attempts.
trait ShardCall: Sync {
    type Output: Send;

    fn name(&self) -> &'static str;

    fn invoke<'a>(
        &'a self,
        client: &'a mut dyn ShardClient,
        tx: Option<TransactionId>,
    ) -> BoxFuture<'a, Result<Self::Output, ShardError>>;
}

struct Execute<'q>(&'q BoundQuery);
struct ExecuteBatch<'q>(&'q [BoundQuery]);
struct StreamExecute<'q>(&'q BoundQuery);
struct Begin;
struct Commit(TransactionId);
struct Rollback(TransactionId);

impl ShardCall for Execute<'_> {
    type Output = QueryResult;

    fn name(&self) -> &'static str {
        "execute"
    }

    fn invoke<'a>(
        &'a self,
        client: &'a mut dyn ShardClient,
        tx: Option<TransactionId>,
    ) -> BoxFuture<'a, Result<QueryResult, ShardError>> {
        client.execute(self.0, tx)
    }
}

impl ShardCall for ExecuteBatch<'_> {
    type Output = Vec<QueryResult>;

    fn name(&self) -> &'static str {
        "execute_batch"
    }

    fn invoke<'a>(
        &'a self,
        client: &'a mut dyn ShardClient,
        tx: Option<TransactionId>,
    ) -> BoxFuture<'a, Result<Vec<QueryResult>, ShardError>> {
        client.execute_batch(self.0, tx)
    }
}

impl ShardCall for StreamExecute<'_> {
    type Output = ResultStream;

    fn name(&self) -> &'static str {
        "stream_execute"
    }

    fn invoke<'a>(
        &'a self,
        client: &'a mut dyn ShardClient,
        tx: Option<TransactionId>,
    ) -> BoxFuture<'a, Result<ResultStream, ShardError>> {
        client.stream_execute(self.0, tx)
    }
}

impl ShardCall for Begin {
    type Output = TransactionId;

    fn name(&self) -> &'static str {
        "begin"
    }

    fn invoke<'a>(
        &'a self,
        client: &'a mut dyn ShardClient,
        _tx: Option<TransactionId>,
    ) -> BoxFuture<'a, Result<TransactionId, ShardError>> {
        client.begin()
    }
}

impl ShardCall for Commit {
    type Output = ();

    fn name(&self) -> &'static str {
        "commit"
    }

    fn invoke<'a>(
        &'a self,
        client: &'a mut dyn ShardClient,
        _tx: Option<TransactionId>,
    ) -> BoxFuture<'a, Result<(), ShardError>> {
        client.commit(self.0)
    }
}

impl ShardCall for Rollback {
    type Output = ();

    fn name(&self) -> &'static str {
        "rollback"
    }

    fn invoke<'a>(
        &'a self,
        client: &'a mut dyn ShardClient,
        _tx: Option<TransactionId>,
    ) -> BoxFuture<'a, Result<(), ShardError>> {
        client.rollback(self.0)
    }
}

// -----------------------------------------------------------------------------
// -----------------------------------------------------------------------------
