use std::fmt;

use super::TabletType;

// -----------------------------------------------------------------------------
// ----- ShardTarget -----------------------------------------------------------

/// One addressable shard backend class: a shard of a keyspace served by
/// tablets of a given type. Used as the key of a session's connection map and
/// as the identity in every per-shard error.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ShardTarget {
    pub keyspace: String,
    pub shard: String,
    pub tablet_type: TabletType,
}

impl ShardTarget {
    pub fn new(keyspace: impl Into<String>, shard: impl Into<String>, tablet_type: TabletType) -> Self {
        Self {
            keyspace: keyspace.into(),
            shard: shard.into(),
            tablet_type,
        }
    }
}

impl fmt::Display for ShardTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.{}", self.keyspace, self.shard, self.tablet_type)
    }
}

// -----------------------------------------------------------------------------
// -----------------------------------------------------------------------------
