use parking_lot::RwLock;
use rand::seq::IteratorRandom;
use serde::Deserialize;
use std::{collections::HashMap, fmt, time::Duration};
use tokio::time::Instant;
use tracing::{info, warn};

use crate::config::endpoints::EndpointRecord;
use crate::errors::ShardError;
use crate::shared_types::ShardTarget;

// -----------------------------------------------------------------------------
// ----- Endpoint --------------------------------------------------------------

/// Address of one backend tablet, `host:port`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Deserialize)]
#[serde(transparent)]
pub struct Endpoint(String);

impl Endpoint {
    pub fn new(addr: impl Into<String>) -> Self {
        Self(addr.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

// -----------------------------------------------------------------------------
// ----- EndpointSelector ------------------------------------------------------

/// Resolves which backend serves a shard target. Read concurrently by every
/// session of a gateway.
pub trait EndpointSelector: Send + Sync {
    /// Picks a reachable endpoint, or fails with `ShardError::NoHealthyEndpoint`.
    fn select(&self, target: &ShardTarget) -> Result<Endpoint, ShardError>;

    /// Reports an endpoint whose connection just failed.
    fn mark_down(&self, _target: &ShardTarget, _endpoint: &Endpoint) {}
}

// -----------------------------------------------------------------------------
// ----- StaticEndpointSelector ------------------------------------------------

/// Endpoint table loaded from configuration. Picks randomly among the
/// endpoints of a target that are not quarantined after a mark-down.
#[derive(Debug)]
pub struct StaticEndpointSelector {
    by_target: HashMap<ShardTarget, Vec<Endpoint>>,
    down_until: RwLock<HashMap<Endpoint, Instant>>,
    quarantine: Duration,
}

impl StaticEndpointSelector {
    pub fn new(records: impl IntoIterator<Item = EndpointRecord>, quarantine: Duration) -> Self {
        let mut by_target: HashMap<ShardTarget, Vec<Endpoint>> = HashMap::new();
        for record in records {
            by_target
                .entry(record.target)
                .or_default()
                .extend(record.addrs);
        }

        info!(
            "endpoint table loaded: {} targets, quarantine {:?}",
            by_target.len(),
            quarantine
        );

        Self {
            by_target,
            down_until: RwLock::new(HashMap::new()),
            quarantine,
        }
    }

    /// Every configured target with its endpoints, sorted by target.
    pub fn targets(&self) -> Vec<(&ShardTarget, &[Endpoint])> {
        let mut targets: Vec<_> = self
            .by_target
            .iter()
            .map(|(target, addrs)| (target, addrs.as_slice()))
            .collect();
        targets.sort_by(|a, b| a.0.cmp(b.0));
        targets
    }

    pub fn is_down(&self, endpoint: &Endpoint) -> bool {
        let now = Instant::now();
        self.down_until
            .read()
            .get(endpoint)
            .is_some_and(|until| *until > now)
    }
}

impl EndpointSelector for StaticEndpointSelector {
    fn select(&self, target: &ShardTarget) -> Result<Endpoint, ShardError> {
        let no_healthy = || ShardError::NoHealthyEndpoint {
            target: target.to_string(),
        };

        let addrs = self.by_target.get(target).ok_or_else(no_healthy)?;

        let now = Instant::now();
        let down_until = self.down_until.read();
        let mut rng = rand::rng();

        addrs
            .iter()
            .filter(|addr| down_until.get(*addr).is_none_or(|until| *until <= now))
            .choose(&mut rng)
            .cloned()
            .ok_or_else(no_healthy)
    }

    fn mark_down(&self, target: &ShardTarget, endpoint: &Endpoint) {
        warn!(
            "marking endpoint {endpoint} of {target} down for {:?}",
            self.quarantine
        );
        self.down_until
            .write()
            .insert(endpoint.clone(), Instant::now() + self.quarantine);
    }
}

// -----------------------------------------------------------------------------
// ----- Tests -----------------------------------------------------------------


// -----------------------------------------------------------------------------
// -----------------------------------------------------------------------------
