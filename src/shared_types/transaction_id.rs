use std::fmt;

// -----------------------------------------------------------------------------
// ----- TransactionId ---------------------------------------------------------

/// Transaction handle issued by one shard backend. Only meaningful on the
/// connection that began it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TransactionId(u64);

impl TransactionId {
    pub const fn new(raw: u64) -> Self {
        Self(raw)
    }

    pub const fn get(self) -> u64 {
        self.0
    }
}

impl fmt::Display for TransactionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

// -----------------------------------------------------------------------------
// -----------------------------------------------------------------------------
