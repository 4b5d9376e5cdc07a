use serde::Deserialize;
use std::collections::HashSet;

use super::config::ConfigError;
use crate::backend::Endpoint;
use crate::shared_types::{ShardTarget, TabletType};

// -----------------------------------------------------------------------------
// ----- EndpointRecord --------------------------------------------------------

/// Validated in-memory form of one `[[endpoints]]` entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EndpointRecord {
    pub target: ShardTarget,
    pub addrs: Vec<Endpoint>,
}

// -----------------------------------------------------------------------------
// ----- Internal: On-disk format ----------------------------------------------

#[derive(Debug, Clone, Deserialize)]
pub(super) struct EndpointFileEntry {
    keyspace: String,
    shard: String,
    tablet_type: TabletType,
    #[serde(default)]
    addrs: Vec<Endpoint>,
}

// -----------------------------------------------------------------------------
// ----- Internal: Helpers -----------------------------------------------------

pub(super) fn into_records(
    entries: Vec<EndpointFileEntry>,
) -> Result<Vec<EndpointRecord>, ConfigError> {
    let mut seen = HashSet::with_capacity(entries.len());
    let mut records = Vec::with_capacity(entries.len());

    for entry in entries {
        validate(&entry)?;

        let target = ShardTarget::new(entry.keyspace, entry.shard, entry.tablet_type);
        if !seen.insert(target.clone()) {
            return Err(ConfigError::DuplicateEndpoint {
                target: target.to_string(),
            });
        }

        records.push(EndpointRecord {
            target,
            addrs: entry.addrs,
        });
    }

    Ok(records)
}

fn validate(entry: &EndpointFileEntry) -> Result<(), ConfigError> {
    if entry.keyspace.trim().is_empty() {
        return Err(ConfigError::InvalidField("endpoints.keyspace".into()));
    }
    if entry.shard.trim().is_empty() {
        return Err(ConfigError::InvalidField("endpoints.shard".into()));
    }
    if entry.addrs.is_empty() {
        return Err(ConfigError::InvalidField(format!(
            "endpoints.addrs for {}/{}",
            entry.keyspace, entry.shard
        )));
    }
    if entry.addrs.iter().any(|addr| !addr.as_str().contains(':')) {
        return Err(ConfigError::InvalidField(format!(
            "endpoints.addrs for {}/{} (expected host:port)",
            entry.keyspace, entry.shard
        )));
    }
    Ok(())
}

// -----------------------------------------------------------------------------
// -----------------------------------------------------------------------------
