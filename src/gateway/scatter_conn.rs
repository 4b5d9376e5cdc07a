use futures::StreamExt;
use futures::future::join_all;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, warn};

use super::retry::RetryPolicy;
use super::shard_conn::ShardConn;
use crate::backend::{EndpointSelector, ShardDialer};
use crate::errors::{FanoutFailure, GatewayError, ShardFailure};
use crate::shared_types::{BoundQuery, QueryResult, SessionId, ShardTarget, TabletType};

// -----------------------------------------------------------------------------
// ----- TransactionState ------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransactionState {
    None,
    Open,
    /// A statement failed inside the transaction and every participant was
    /// rolled back. Cleared by the client's next Commit, Rollback or Begin.
    RolledBack,
}

// -----------------------------------------------------------------------------
// ----- ScatterConn -----------------------------------------------------------

/// Per-session execution engine. Fans statements out to the shards a request
/// names, merges their results, and tracks which shards joined the session's
/// transaction.
pub struct ScatterConn {
    id: SessionId,
    tablet_type: TabletType,
    state: TransactionState,
    conns: HashMap<ShardTarget, ShardConn>,
    selector: Arc<dyn EndpointSelector>,
    dialer: Arc<dyn ShardDialer>,
    retry: RetryPolicy,
    stream_buffer: usize,
    closed: bool,
}

// -----------------------------------------------------------------------------
// ----- ScatterConn: Static ---------------------------------------------------

impl ScatterConn {
    pub fn new(
        id: SessionId,
        tablet_type: TabletType,
        selector: Arc<dyn EndpointSelector>,
        dialer: Arc<dyn ShardDialer>,
        retry: RetryPolicy,
        stream_buffer: usize,
    ) -> Self {
        Self {
            id,
            tablet_type,
            state: TransactionState::None,
            conns: HashMap::new(),
            selector,
            dialer,
            retry,
            stream_buffer: stream_buffer.max(1),
            closed: false,
        }
    }
}

// -----------------------------------------------------------------------------
// ----- ScatterConn: Public ---------------------------------------------------

impl ScatterConn {
    pub fn id(&self) -> SessionId {
        self.id
    }

    pub fn tablet_type(&self) -> TabletType {
        self.tablet_type
    }

    pub fn transaction_state(&self) -> TransactionState {
        self.state
    }

    /// Shards this session has addressed so far, sorted.
    pub fn touched_shards(&self) -> Vec<ShardTarget> {
        let mut targets: Vec<_> = self.conns.keys().cloned().collect();
        targets.sort();
        targets
    }

    /// Shards holding an open transaction identity, sorted.
    pub fn transaction_participants(&self) -> Vec<ShardTarget> {
        let mut targets: Vec<_> = self
            .conns
            .values()
            .filter(|conn| conn.in_transaction())
            .map(|conn| conn.target().clone())
            .collect();
        targets.sort();
        targets
    }

    pub async fn execute(
        &mut self,
        query: &BoundQuery,
        keyspace: &str,
        shards: &[String],
    ) -> Result<QueryResult, GatewayError> {
        let targets = self.prepare_targets(keyspace, shards)?;
        let in_tx = self.state == TransactionState::Open;

        let conns = select_conns(&mut self.conns, &targets);
        let outcomes = join_all(conns.into_iter().map(|conn| async move {
            let target = conn.target().clone();
            (target, execute_on(conn, query, in_tx).await)
        }))
        .await;

        let results = self.gather("execute", outcomes).await?;
        Ok(QueryResult::merge(results))
    }

    /// Sends the whole batch to every shard; result `i` merges every shard's
    /// result for statement `i`.
    pub async fn execute_batch(
        &mut self,
        queries: &[BoundQuery],
        keyspace: &str,
        shards: &[String],
    ) -> Result<Vec<QueryResult>, GatewayError> {
        let targets = self.prepare_targets(keyspace, shards)?;
        let in_tx = self.state == TransactionState::Open;

        let conns = select_conns(&mut self.conns, &targets);
        let outcomes = join_all(conns.into_iter().map(|conn| async move {
            let target = conn.target().clone();
            (target, execute_batch_on(conn, queries, in_tx).await)
        }))
        .await;

        let per_shard = self.gather("execute_batch", outcomes).await?;

        let mut merged = vec![QueryResult::default(); queries.len()];
        for shard_results in per_shard {
            for (slot, result) in merged.iter_mut().zip(shard_results) {
                slot.append(result);
            }
        }
        Ok(merged)
    }

    /// Streams every shard's results into `sink` as they arrive. Shards are
    /// multiplexed through one channel, so deliveries never interleave; field
    /// metadata is delivered once.
    pub async fn stream_execute(
        &mut self,
        query: &BoundQuery,
        keyspace: &str,
        shards: &[String],
        sink: &mpsc::Sender<QueryResult>,
    ) -> Result<(), GatewayError> {
        let targets = self.prepare_targets(keyspace, shards)?;
        let in_tx = self.state == TransactionState::Open;

        let (tx, rx) = mpsc::channel(self.stream_buffer);
        let conns = select_conns(&mut self.conns, &targets);
        let workers = join_all(conns.into_iter().map(|conn| {
            let out = tx.clone();
            async move {
                let target = conn.target().clone();
                (target, stream_on(conn, query, in_tx, out).await)
            }
        }));
        drop(tx);

        let (outcomes, forwarded) = tokio::join!(workers, forward(rx, sink));

        self.gather("stream_execute", outcomes).await?;
        if forwarded.is_err() {
            // Shard streams were abandoned mid-read.
            self.abort_transaction("stream_execute").await;
        }
        forwarded
    }

    pub fn begin(&mut self) -> Result<(), GatewayError> {
        if self.closed {
            return Err(GatewayError::SessionClosed);
        }
        if self.state == TransactionState::Open {
            return Err(GatewayError::AlreadyInTransaction);
        }

        self.state = TransactionState::Open;
        Ok(())
    }

    /// Best-effort commit: every participant is asked to commit; shards that
    /// already committed stay committed when another fails.
    pub async fn commit(&mut self) -> Result<(), GatewayError> {
        if self.closed {
            return Err(GatewayError::SessionClosed);
        }

        match self.state {
            TransactionState::None => return Ok(()),
            TransactionState::RolledBack => {
                self.state = TransactionState::None;
                return Err(GatewayError::TransactionRolledBack);
            }
            TransactionState::Open => {}
        }

        let outcomes = join_all(participants(&mut self.conns).into_iter().map(|conn| async move {
            let target = conn.target().clone();
            (target, conn.commit_tx().await)
        }))
        .await;
        self.state = TransactionState::None;

        collect_outcomes("commit", outcomes).map(|_| ()).map_err(|failure| {
            for f in &failure.failures {
                warn!("session {}: commit on {} failed: {}", self.id, f.target, f.error);
            }
            failure.into()
        })
    }

    pub async fn rollback(&mut self) -> Result<(), GatewayError> {
        if self.closed {
            return Err(GatewayError::SessionClosed);
        }

        match self.state {
            TransactionState::None => Ok(()),
            TransactionState::RolledBack => {
                self.state = TransactionState::None;
                Ok(())
            }
            TransactionState::Open => {
                let result = self.rollback_participants().await;
                self.state = TransactionState::None;
                result.map_err(Into::into)
            }
        }
    }

    /// Rolls back any open transaction and closes every shard connection.
    /// Idempotent.
    pub async fn close(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;

        if self.state == TransactionState::Open {
            // Failures are logged by rollback_participants.
            let _ = self.rollback_participants().await;
        }
        self.state = TransactionState::None;

        join_all(self.conns.values_mut().map(|conn| conn.teardown())).await;
        debug!("session {}: closed {} shard connections", self.id, self.conns.len());
        self.conns.clear();
    }
}

// -----------------------------------------------------------------------------
// ----- ScatterConn: Private --------------------------------------------------

impl ScatterConn {
    /// Resolves the request's shard list into targets, first occurrence wins,
    /// creating a connection for every shard not addressed before.
    fn prepare_targets(
        &mut self,
        keyspace: &str,
        shards: &[String],
    ) -> Result<Vec<ShardTarget>, GatewayError> {
        if self.closed {
            return Err(GatewayError::SessionClosed);
        }
        if self.state == TransactionState::RolledBack {
            return Err(GatewayError::TransactionRolledBack);
        }

        let mut targets: Vec<ShardTarget> = Vec::with_capacity(shards.len());
        for shard in shards {
            let target = ShardTarget::new(keyspace, shard.as_str(), self.tablet_type);
            if targets.contains(&target) {
                continue;
            }

            if !self.conns.contains_key(&target) {
                let conn = ShardConn::new(
                    target.clone(),
                    self.selector.clone(),
                    self.dialer.clone(),
                    self.retry,
                );
                self.conns.insert(target.clone(), conn);
            }
            targets.push(target);
        }

        Ok(targets)
    }

    async fn gather<T>(
        &mut self,
        operation: &'static str,
        outcomes: Vec<(ShardTarget, Result<T, ShardFailure>)>,
    ) -> Result<Vec<T>, GatewayError> {
        match collect_outcomes(operation, outcomes) {
            Ok(values) => Ok(values),
            Err(failure) => {
                self.abort_transaction(operation).await;
                Err(failure.into())
            }
        }
    }

    async fn abort_transaction(&mut self, operation: &'static str) {
        if self.state != TransactionState::Open {
            return;
        }

        warn!(
            "session {}: {operation} failed inside a transaction; rolling back",
            self.id
        );
        // Failures are logged by rollback_participants.
        let _ = self.rollback_participants().await;
        self.state = TransactionState::RolledBack;
    }

    /// One rollback attempt per participant.
    async fn rollback_participants(&mut self) -> Result<(), FanoutFailure> {
        let outcomes = join_all(participants(&mut self.conns).into_iter().map(|conn| async move {
            let target = conn.target().clone();
            (target, conn.rollback_tx().await)
        }))
        .await;

        let result = collect_outcomes("rollback", outcomes).map(|_| ());
        if let Err(failure) = &result {
            for f in &failure.failures {
                warn!("session {}: rollback on {} failed: {}", self.id, f.target, f.error);
            }
        }
        result
    }
}

// -----------------------------------------------------------------------------
// ----- Internal: Fan-out helpers ---------------------------------------------

/// Disjoint mutable borrows of the connections for `targets`, in target order.
fn select_conns<'a>(
    conns: &'a mut HashMap<ShardTarget, ShardConn>,
    targets: &[ShardTarget],
) -> Vec<&'a mut ShardConn> {
    let mut picked: Vec<(usize, &'a mut ShardConn)> = conns
        .iter_mut()
        .filter_map(|(target, conn)| {
            targets
                .iter()
                .position(|t| t == target)
                .map(|index| (index, conn))
        })
        .collect();

    picked.sort_by_key(|(index, _)| *index);
    picked.into_iter().map(|(_, conn)| conn).collect()
}

fn participants(conns: &mut HashMap<ShardTarget, ShardConn>) -> Vec<&mut ShardConn> {
    let mut picked: Vec<&mut ShardConn> = conns
        .values_mut()
        .filter(|conn| conn.in_transaction())
        .collect();
    picked.sort_by(|a, b| a.target().cmp(b.target()));
    picked
}

fn collect_outcomes<T>(
    operation: &'static str,
    outcomes: Vec<(ShardTarget, Result<T, ShardFailure>)>,
) -> Result<Vec<T>, FanoutFailure> {
    let mut values = Vec::with_capacity(outcomes.len());
    let mut failures = Vec::new();
    let mut succeeded = Vec::new();

    for (target, outcome) in outcomes {
        match outcome {
            Ok(value) => {
                values.push(value);
                succeeded.push(target);
            }
            Err(failure) => failures.push(failure),
        }
    }

    if failures.is_empty() {
        Ok(values)
    } else {
        Err(FanoutFailure {
            operation,
            failures,
            succeeded,
        })
    }
}

async fn execute_on(
    conn: &mut ShardConn,
    query: &BoundQuery,
    in_tx: bool,
) -> Result<QueryResult, ShardFailure> {
    if in_tx {
        conn.begin_tx().await?;
    }
    conn.execute_one(query).await
}

async fn execute_batch_on(
    conn: &mut ShardConn,
    queries: &[BoundQuery],
    in_tx: bool,
) -> Result<Vec<QueryResult>, ShardFailure> {
    if in_tx {
        conn.begin_tx().await?;
    }
    conn.execute_batch(queries).await
}

async fn stream_on(
    conn: &mut ShardConn,
    query: &BoundQuery,
    in_tx: bool,
    out: mpsc::Sender<QueryResult>,
) -> Result<(), ShardFailure> {
    if in_tx {
        conn.begin_tx().await?;
    }

    let mut stream = conn.stream_one(query).await?;
    while let Some(item) = stream.next().await {
        match item {
            Ok(result) => {
                // Receiver gone: the caller's sink closed, stop reading.
                if out.send(result).await.is_err() {
                    break;
                }
            }
            Err(err) => return Err(conn.stream_failed(err).await),
        }
    }

    Ok(())
}

/// Single consumer of the shard streams; the only writer to the caller's sink.
async fn forward(
    mut rx: mpsc::Receiver<QueryResult>,
    sink: &mpsc::Sender<QueryResult>,
) -> Result<(), GatewayError> {
    let mut fields_sent = false;

    while let Some(mut result) = rx.recv().await {
        if fields_sent {
            result.fields.clear();
        } else if !result.fields.is_empty() {
            fields_sent = true;
        }

        if sink.send(result).await.is_err() {
            return Err(GatewayError::SinkClosed);
        }
    }

    Ok(())
}

// -----------------------------------------------------------------------------
// ----- Tests -----------------------------------------------------------------


// -----------------------------------------------------------------------------
// -----------------------------------------------------------------------------
