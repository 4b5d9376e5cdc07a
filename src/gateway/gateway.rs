use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{MissedTickBehavior, interval};
use tracing::{debug, info};

use super::retry::RetryPolicy;
use super::scatter_conn::{ScatterConn, TransactionState};
use crate::backend::{EndpointSelector, ShardDialer};
use crate::config::GatewayFileSettings;
use crate::errors::{GatewayError, RequestError};
use crate::pool::{Lease, NumberedPool, PoolError, PoolStats};
use crate::shared_types::{BatchShardQuery, QueryResult, SessionId, ShardQuery, TabletType};

// -----------------------------------------------------------------------------
// ----- Constants -------------------------------------------------------------

const MIN_REAP_INTERVAL: Duration = Duration::from_millis(100);

// -----------------------------------------------------------------------------
// ----- GatewaySettings -------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GatewaySettings {
    pub retry: RetryPolicy,
    pub max_sessions: Option<usize>,
    pub session_timeout: Option<Duration>,
    pub stream_buffer: usize,
}

impl Default for GatewaySettings {
    fn default() -> Self {
        Self {
            retry: RetryPolicy::default(),
            max_sessions: None,
            session_timeout: None,
            stream_buffer: 64,
        }
    }
}

impl From<&GatewayFileSettings> for GatewaySettings {
    fn from(file: &GatewayFileSettings) -> Self {
        Self {
            retry: RetryPolicy::new(file.retry_delay, file.retry_count),
            max_sessions: file.max_sessions,
            session_timeout: file.session_timeout,
            stream_buffer: file.stream_buffer,
        }
    }
}

// -----------------------------------------------------------------------------
// ----- Gateway ---------------------------------------------------------------

/// Client-facing surface. Every call leases its session from the pool, runs
/// exactly one engine operation, and releases the lease on every exit path.
/// A call dropped mid-flight releases through the lease guard instead.
pub struct Gateway {
    selector: Arc<dyn EndpointSelector>,
    dialer: Arc<dyn ShardDialer>,
    sessions: NumberedPool<ScatterConn>,
    settings: GatewaySettings,
    next_id: AtomicU64,
}

// -----------------------------------------------------------------------------
// ----- Gateway: Static -------------------------------------------------------

impl Gateway {
    pub fn new(
        selector: Arc<dyn EndpointSelector>,
        dialer: Arc<dyn ShardDialer>,
        settings: GatewaySettings,
    ) -> Self {
        let sessions = match settings.max_sessions {
            Some(limit) => NumberedPool::with_limit(limit),
            None => NumberedPool::new(),
        };

        Self {
            selector,
            dialer,
            sessions,
            settings,
            next_id: AtomicU64::new(initial_session_id()),
        }
    }
}

/// Seeds session ids from the wall clock so a restarted process does not hand
/// out ids a client may still hold from the previous one.
fn initial_session_id() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| elapsed.as_nanos() as u64)
        .unwrap_or(1)
        .max(1)
}

// -----------------------------------------------------------------------------
// ----- Gateway: Sessions -----------------------------------------------------

impl Gateway {
    pub fn settings(&self) -> &GatewaySettings {
        &self.settings
    }

    pub fn stats(&self) -> PoolStats {
        self.sessions.stats()
    }

    pub fn open_session(&self, tablet_type: TabletType) -> Result<SessionId, RequestError> {
        let id = SessionId::new(self.next_id.fetch_add(1, Ordering::Relaxed));

        let engine = ScatterConn::new(
            id,
            tablet_type,
            self.selector.clone(),
            self.dialer.clone(),
            self.settings.retry,
            self.settings.stream_buffer,
        );

        self.sessions
            .register(id, engine)
            .map_err(|err| RequestError::new(id, None, err.into()))?;

        info!("opened session {id} ({tablet_type})");
        Ok(id)
    }

    /// Closes the session: rolls back an open transaction, tears down its
    /// shard connections, and removes it. Closing an unknown or already
    /// closed session succeeds. A session leased by an in-flight call is
    /// removed at once and closed when that call returns.
    pub async fn close_session(&self, id: SessionId) -> Result<(), RequestError> {
        let mut engine = match self.sessions.lease(id, "close") {
            Ok(engine) => engine,
            Err(PoolError::NotFound(_)) => {
                debug!("close of unknown session {id}; nothing to do");
                return Ok(());
            }
            Err(PoolError::Busy { purpose, .. }) => {
                // The holder may have released it between the two calls.
                match self.sessions.unregister(id) {
                    Some(mut engine) => engine.close().await,
                    None => debug!("session {id} in use by {purpose}; closing when it returns"),
                }
                info!("closed session {id}");
                return Ok(());
            }
            Err(err) => return Err(RequestError::new(id, None, err.into())),
        };

        engine.close().await;
        drop(engine.remove());

        info!("closed session {id}");
        Ok(())
    }

    /// Closes and removes every session not used for `idle_for`. Sessions
    /// leased by an in-flight call are left alone.
    pub async fn reap_idle_sessions(&self, idle_for: Duration) -> usize {
        let idle = self.sessions.take_idle(idle_for);
        let reaped = idle.len();

        for (id, mut engine) in idle {
            engine.close().await;
            info!("reaped session {id} after {idle_for:?} idle");
        }

        reaped
    }

    /// Runs `reap_idle_sessions` every `every` until the handle is aborted.
    pub fn spawn_idle_reaper(self: &Arc<Self>, every: Duration, idle_for: Duration) -> JoinHandle<()> {
        let gateway = Arc::clone(self);

        tokio::spawn(async move {
            let mut ticker = interval(every);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                ticker.tick().await;
                let reaped = gateway.reap_idle_sessions(idle_for).await;
                if reaped > 0 {
                    debug!("idle reaper closed {reaped} sessions");
                }
            }
        })
    }

    /// Starts the idle reaper when a session timeout is configured. Sessions
    /// are checked four times per timeout period.
    pub fn start_idle_reaper(self: &Arc<Self>) -> Option<JoinHandle<()>> {
        let idle_for = self.settings.session_timeout?;
        let every = (idle_for / 4).max(MIN_REAP_INTERVAL);

        info!("reaping sessions idle for {idle_for:?}, checking every {every:?}");
        Some(self.spawn_idle_reaper(every, idle_for))
    }

    /// Transaction state of an idle session.
    pub fn transaction_state(&self, id: SessionId) -> Result<TransactionState, RequestError> {
        let engine = self.lease(id, "inspect", None)?;
        Ok(engine.transaction_state())
    }
}

// -----------------------------------------------------------------------------
// ----- Gateway: Statements ---------------------------------------------------

impl Gateway {
    pub async fn execute(&self, request: ShardQuery) -> Result<QueryResult, RequestError> {
        let mut engine = self.lease(request.session_id, "execute", Some(request.sql.as_str()))?;
        let result = engine
            .execute(&request.bound(), &request.keyspace, &request.shards)
            .await;
        self.release(engine).await;

        result.map_err(|err| RequestError::new(request.session_id, Some(request.sql), err))
    }

    pub async fn execute_batch(&self, request: BatchShardQuery) -> Result<Vec<QueryResult>, RequestError> {
        let statement = request.statement_text();
        let mut engine = self.lease(request.session_id, "execute_batch", Some(statement.as_str()))?;
        let result = engine
            .execute_batch(&request.queries, &request.keyspace, &request.shards)
            .await;
        self.release(engine).await;

        result.map_err(|err| RequestError::new(request.session_id, Some(statement), err))
    }

    /// Streams results into `sink` as shards produce them. Returns once every
    /// shard finished; dropping `sink` then ends the receiver's stream.
    pub async fn stream_execute(
        &self,
        request: ShardQuery,
        sink: mpsc::Sender<QueryResult>,
    ) -> Result<(), RequestError> {
        let mut engine = self.lease(request.session_id, "stream_execute", Some(request.sql.as_str()))?;
        let result = engine
            .stream_execute(&request.bound(), &request.keyspace, &request.shards, &sink)
            .await;
        self.release(engine).await;

        result.map_err(|err| RequestError::new(request.session_id, Some(request.sql), err))
    }
}

// -----------------------------------------------------------------------------
// ----- Gateway: Transactions -------------------------------------------------

impl Gateway {
    pub async fn begin(&self, id: SessionId) -> Result<(), RequestError> {
        let mut engine = self.lease(id, "begin", None)?;
        let result = engine.begin();
        self.release(engine).await;

        result.map_err(|err| RequestError::new(id, None, err))?;
        debug!("session {id}: transaction opened");
        Ok(())
    }

    pub async fn commit(&self, id: SessionId) -> Result<(), RequestError> {
        let mut engine = self.lease(id, "commit", None)?;
        let result = engine.commit().await;
        self.release(engine).await;

        result.map_err(|err| RequestError::new(id, None, err))
    }

    pub async fn rollback(&self, id: SessionId) -> Result<(), RequestError> {
        let mut engine = self.lease(id, "rollback", None)?;
        let result = engine.rollback().await;
        self.release(engine).await;

        result.map_err(|err| RequestError::new(id, None, err))
    }
}

// -----------------------------------------------------------------------------
// ----- Gateway: Private ------------------------------------------------------

impl Gateway {
    fn lease(
        &self,
        id: SessionId,
        purpose: &'static str,
        statement: Option<&str>,
    ) -> Result<Lease<'_, ScatterConn>, RequestError> {
        self.sessions.lease(id, purpose).map_err(|err| {
            RequestError::new(id, statement.map(str::to_owned), GatewayError::from(err))
        })
    }

    /// Returns the session to the pool, or closes it when `close_session`
    /// removed it during the call.
    async fn release(&self, engine: Lease<'_, ScatterConn>) {
        if let Some(mut orphan) = engine.release() {
            orphan.close().await;
            info!("closed session {} after its in-flight call", orphan.id());
        }
    }
}

// -----------------------------------------------------------------------------
// ----- Tests -----------------------------------------------------------------


// -----------------------------------------------------------------------------
// -----------------------------------------------------------------------------
