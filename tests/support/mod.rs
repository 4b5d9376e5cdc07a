use async_trait::async_trait;
use bytes::Bytes;
use futures::StreamExt;
use futures::stream;
use parking_lot::Mutex;
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;

use shardgate::backend::{Endpoint, ResultStream, ShardClient, ShardDialer, StaticEndpointSelector};
use shardgate::config::EndpointRecord;
use shardgate::errors::ShardError;
use shardgate::shared_types::{
    BoundQuery, Field, QueryResult, Row, ShardQuery, SessionId, ShardTarget, TabletType,
    TransactionId,
};
use shardgate::{Gateway, GatewaySettings, RetryPolicy};

pub const KEYSPACE: &str = "user";

// -----------------------------------------------------------------------------
// ----- Call log --------------------------------------------------------------

/// Every request a fake shard received, in arrival order.
#[allow(dead_code)]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Call {
    Dial,
    Execute { sql: String, tx: Option<TransactionId> },
    ExecuteBatch { statements: usize, tx: Option<TransactionId> },
    Stream { sql: String, tx: Option<TransactionId> },
    Begin(TransactionId),
    Commit(TransactionId),
    Rollback(TransactionId),
    Close,
}

/// Blocks the next statement on a shard until released.
#[derive(Default)]
pub struct Gate {
    pub entered: Notify,
    pub release: Notify,
}

// -----------------------------------------------------------------------------
// ----- FakeCluster -----------------------------------------------------------

#[derive(Default)]
struct ShardScript {
    rows: usize,
    rows_affected: u64,
    insert_id: u64,
    dial_failures: VecDeque<ShardError>,
    execute_failures: VecDeque<ShardError>,
    begin_failures: VecDeque<ShardError>,
    commit_failures: VecDeque<ShardError>,
    rollback_failures: VecDeque<ShardError>,
    stream_failure: Option<(usize, ShardError)>,
    short_batch: bool,
    gate: Option<Arc<Gate>>,
    calls: Vec<Call>,
}

#[derive(Default)]
struct ClusterState {
    shards: HashMap<String, ShardScript>,
    next_tx: u64,
}

/// Scripted in-memory shard backends. Cloning shares the same state, so a
/// test keeps one handle while the gateway dials through another.
#[derive(Clone, Default)]
pub struct FakeCluster {
    state: Arc<Mutex<ClusterState>>,
}

#[allow(dead_code)]
impl FakeCluster {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every statement on `shard` returns `rows` rows named `<shard>-<i>`.
    pub fn with_rows(self, shard: &str, rows: usize) -> Self {
        self.script(shard, |s| s.rows = rows);
        self
    }

    pub fn with_counts(self, shard: &str, rows_affected: u64, insert_id: u64) -> Self {
        self.script(shard, |s| {
            s.rows_affected = rows_affected;
            s.insert_id = insert_id;
        });
        self
    }

    pub fn fail_dial(&self, shard: &str, errors: impl IntoIterator<Item = ShardError>) {
        self.script(shard, |s| s.dial_failures.extend(errors));
    }

    /// Queued failures for execute, execute_batch and stream opening.
    pub fn fail_execute(&self, shard: &str, errors: impl IntoIterator<Item = ShardError>) {
        self.script(shard, |s| s.execute_failures.extend(errors));
    }

    pub fn fail_begin(&self, shard: &str, errors: impl IntoIterator<Item = ShardError>) {
        self.script(shard, |s| s.begin_failures.extend(errors));
    }

    pub fn fail_commit(&self, shard: &str, errors: impl IntoIterator<Item = ShardError>) {
        self.script(shard, |s| s.commit_failures.extend(errors));
    }

    pub fn fail_rollback(&self, shard: &str, errors: impl IntoIterator<Item = ShardError>) {
        self.script(shard, |s| s.rollback_failures.extend(errors));
    }

    /// The next stream on `shard` yields `after` rows, then `error`.
    pub fn fail_stream_after(&self, shard: &str, after: usize, error: ShardError) {
        self.script(shard, |s| s.stream_failure = Some((after, error)));
    }

    /// Batches on `shard` answer with one result too few.
    pub fn short_batch(&self, shard: &str) {
        self.script(shard, |s| s.short_batch = true);
    }

    /// Holds the next statement on `shard` until `Gate::release` is notified.
    pub fn gate(&self, shard: &str) -> Arc<Gate> {
        let gate = Arc::new(Gate::default());
        self.script(shard, |s| s.gate = Some(gate.clone()));
        gate
    }

    pub fn calls(&self, shard: &str) -> Vec<Call> {
        self.state
            .lock()
            .shards
            .get(shard)
            .map(|s| s.calls.clone())
            .unwrap_or_default()
    }

    pub fn count(&self, shard: &str, matches: impl Fn(&Call) -> bool) -> usize {
        self.calls(shard).iter().filter(|call| matches(call)).count()
    }

    pub fn dialer(&self) -> Arc<dyn ShardDialer> {
        Arc::new(FakeDialer {
            cluster: self.clone(),
        })
    }

    fn script<R>(&self, shard: &str, f: impl FnOnce(&mut ShardScript) -> R) -> R {
        let mut state = self.state.lock();
        f(state.shards.entry(shard.to_string()).or_default())
    }

    fn record(&self, shard: &str, call: Call) {
        self.script(shard, |s| s.calls.push(call));
    }

    fn result_for(&self, shard: &str) -> QueryResult {
        self.script(shard, |s| QueryResult {
            fields: fields(),
            rows: (0..s.rows).map(|i| row(shard, i)).collect(),
            rows_affected: s.rows_affected,
            insert_id: s.insert_id,
        })
    }

    async fn pass_gate(&self, shard: &str) {
        let gate = self.script(shard, |s| s.gate.take());
        if let Some(gate) = gate {
            gate.entered.notify_one();
            gate.release.notified().await;
        }
    }
}

pub fn fields() -> Vec<Field> {
    vec![Field::new("name", 6165)]
}

pub fn row(shard: &str, i: usize) -> Row {
    vec![Some(Bytes::from(format!("{shard}-{i}")))]
}

#[allow(dead_code)]
pub fn row_text(row: &Row) -> String {
    row[0]
        .as_ref()
        .map(|bytes| String::from_utf8_lossy(bytes).into_owned())
        .unwrap_or_default()
}

// -----------------------------------------------------------------------------
// ----- FakeDialer / FakeShardClient ------------------------------------------

struct FakeDialer {
    cluster: FakeCluster,
}

#[async_trait]
impl ShardDialer for FakeDialer {
    async fn dial(
        &self,
        _endpoint: &Endpoint,
        target: &ShardTarget,
    ) -> Result<Box<dyn ShardClient>, ShardError> {
        let shard = target.shard.clone();
        self.cluster.record(&shard, Call::Dial);

        if let Some(err) = self.cluster.script(&shard, |s| s.dial_failures.pop_front()) {
            return Err(err);
        }

        Ok(Box::new(FakeShardClient {
            cluster: self.cluster.clone(),
            shard,
        }))
    }
}

struct FakeShardClient {
    cluster: FakeCluster,
    shard: String,
}

#[async_trait]
impl ShardClient for FakeShardClient {
    async fn execute(
        &mut self,
        query: &BoundQuery,
        tx: Option<TransactionId>,
    ) -> Result<QueryResult, ShardError> {
        self.cluster.pass_gate(&self.shard).await;
        self.cluster.record(
            &self.shard,
            Call::Execute {
                sql: query.sql.clone(),
                tx,
            },
        );

        if let Some(err) = self.cluster.script(&self.shard, |s| s.execute_failures.pop_front()) {
            return Err(err);
        }
        Ok(self.cluster.result_for(&self.shard))
    }

    async fn execute_batch(
        &mut self,
        queries: &[BoundQuery],
        tx: Option<TransactionId>,
    ) -> Result<Vec<QueryResult>, ShardError> {
        self.cluster.pass_gate(&self.shard).await;
        self.cluster.record(
            &self.shard,
            Call::ExecuteBatch {
                statements: queries.len(),
                tx,
            },
        );

        if let Some(err) = self.cluster.script(&self.shard, |s| s.execute_failures.pop_front()) {
            return Err(err);
        }

        let mut answered = queries.len();
        if self.cluster.script(&self.shard, |s| s.short_batch) {
            answered = answered.saturating_sub(1);
        }
        Ok((0..answered).map(|_| self.cluster.result_for(&self.shard)).collect())
    }

    async fn stream_execute(
        &mut self,
        query: &BoundQuery,
        tx: Option<TransactionId>,
    ) -> Result<ResultStream, ShardError> {
        self.cluster.pass_gate(&self.shard).await;
        self.cluster.record(
            &self.shard,
            Call::Stream {
                sql: query.sql.clone(),
                tx,
            },
        );

        if let Some(err) = self.cluster.script(&self.shard, |s| s.execute_failures.pop_front()) {
            return Err(err);
        }

        let full = self.cluster.result_for(&self.shard);
        let failure = self.cluster.script(&self.shard, |s| s.stream_failure.take());

        // One chunk per row; the first chunk carries the fields.
        let mut chunks: Vec<Result<QueryResult, ShardError>> = full
            .rows
            .into_iter()
            .enumerate()
            .map(|(i, row)| {
                Ok(QueryResult {
                    fields: if i == 0 { full.fields.clone() } else { Vec::new() },
                    rows: vec![row],
                    ..QueryResult::default()
                })
            })
            .collect();

        if let Some((after, err)) = failure {
            chunks.truncate(after);
            chunks.push(Err(err));
        }

        Ok(stream::iter(chunks).boxed())
    }

    async fn begin(&mut self) -> Result<TransactionId, ShardError> {
        let failure = self.cluster.script(&self.shard, |s| s.begin_failures.pop_front());
        if let Some(err) = failure {
            return Err(err);
        }

        let tx = {
            let mut state = self.cluster.state.lock();
            state.next_tx += 1;
            TransactionId::new(state.next_tx)
        };
        self.cluster.record(&self.shard, Call::Begin(tx));
        Ok(tx)
    }

    async fn commit(&mut self, tx: TransactionId) -> Result<(), ShardError> {
        self.cluster.record(&self.shard, Call::Commit(tx));
        match self.cluster.script(&self.shard, |s| s.commit_failures.pop_front()) {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    async fn rollback(&mut self, tx: TransactionId) -> Result<(), ShardError> {
        self.cluster.record(&self.shard, Call::Rollback(tx));
        match self.cluster.script(&self.shard, |s| s.rollback_failures.pop_front()) {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    async fn close(&mut self) {
        self.cluster.record(&self.shard, Call::Close);
    }
}

// -----------------------------------------------------------------------------
// ----- Gateway helpers -------------------------------------------------------

/// Endpoint table with one endpoint per shard for every tablet type.
#[allow(dead_code)]
pub fn selector(shards: &[&str]) -> Arc<StaticEndpointSelector> {
    let records = shards.iter().flat_map(|shard| {
        [TabletType::Primary, TabletType::Replica, TabletType::Rdonly]
            .into_iter()
            .map(move |tablet_type| EndpointRecord {
                target: ShardTarget::new(KEYSPACE, *shard, tablet_type),
                addrs: vec![Endpoint::new(format!("{shard}.fake:15991"))],
            })
    });

    Arc::new(StaticEndpointSelector::new(records, Duration::ZERO))
}

#[allow(dead_code)]
pub fn settings(delay: Duration, max_attempts: u32) -> GatewaySettings {
    GatewaySettings {
        retry: RetryPolicy::new(delay, max_attempts),
        ..GatewaySettings::default()
    }
}

#[allow(dead_code)]
pub fn gateway(cluster: &FakeCluster, shards: &[&str], settings: GatewaySettings) -> Arc<Gateway> {
    Arc::new(Gateway::new(selector(shards), cluster.dialer(), settings))
}

#[allow(dead_code)]
pub fn query(session_id: SessionId, sql: &str, shards: &[&str]) -> ShardQuery {
    ShardQuery::new(session_id, sql, KEYSPACE, shards.iter().copied())
}

#[allow(dead_code)]
pub fn target(shard: &str) -> ShardTarget {
    target_for(shard, TabletType::Replica)
}

#[allow(dead_code)]
pub fn target_for(shard: &str, tablet_type: TabletType) -> ShardTarget {
    ShardTarget::new(KEYSPACE, shard, tablet_type)
}

#[allow(dead_code)]
pub fn not_serving() -> ShardError {
    ShardError::NotServing("tablet draining".into())
}
