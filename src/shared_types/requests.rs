use super::{BindVars, BoundQuery, SessionId};

// -----------------------------------------------------------------------------
// ----- ShardQuery ------------------------------------------------------------

/// A single statement addressed to an explicit list of shards of a keyspace.
#[derive(Debug, Clone, PartialEq)]
pub struct ShardQuery {
    pub session_id: SessionId,
    pub sql: String,
    pub bind_vars: BindVars,
    pub keyspace: String,
    pub shards: Vec<String>,
}

impl ShardQuery {
    pub fn new(
        session_id: SessionId,
        sql: impl Into<String>,
        keyspace: impl Into<String>,
        shards: impl IntoIterator<Item = impl Into<String>>,
    ) -> Self {
        Self {
            session_id,
            sql: sql.into(),
            bind_vars: BindVars::new(),
            keyspace: keyspace.into(),
            shards: shards.into_iter().map(Into::into).collect(),
        }
    }

    pub fn with_bind_vars(mut self, bind_vars: BindVars) -> Self {
        self.bind_vars = bind_vars;
        self
    }

    pub(crate) fn bound(&self) -> BoundQuery {
        BoundQuery::with_bind_vars(self.sql.clone(), self.bind_vars.clone())
    }
}

// -----------------------------------------------------------------------------
// ----- BatchShardQuery -------------------------------------------------------

/// An ordered batch of statements sent together to every listed shard.
#[derive(Debug, Clone, PartialEq)]
pub struct BatchShardQuery {
    pub session_id: SessionId,
    pub queries: Vec<BoundQuery>,
    pub keyspace: String,
    pub shards: Vec<String>,
}

impl BatchShardQuery {
    pub fn new(
        session_id: SessionId,
        queries: Vec<BoundQuery>,
        keyspace: impl Into<String>,
        shards: impl IntoIterator<Item = impl Into<String>>,
    ) -> Self {
        Self {
            session_id,
            queries,
            keyspace: keyspace.into(),
            shards: shards.into_iter().map(Into::into).collect(),
        }
    }

    /// Statement text used to annotate errors.
    pub(crate) fn statement_text(&self) -> String {
        self.queries
            .iter()
            .map(|q| q.sql.as_str())
            .collect::<Vec<_>>()
            .join("; ")
    }
}

// -----------------------------------------------------------------------------
// -----------------------------------------------------------------------------
