use bytes::Bytes;
use std::collections::BTreeMap;

// -----------------------------------------------------------------------------
// ----- BindValue -------------------------------------------------------------

/// Typed value bound to a named placeholder of a statement.
#[derive(Debug, Clone, PartialEq)]
pub enum BindValue {
    Null,
    Int(i64),
    UInt(u64),
    Float(f64),
    Bytes(Bytes),
    List(Vec<BindValue>),
}

/// Named bind variables. Ordered so that logs and backend requests are stable.
pub type BindVars = BTreeMap<String, BindValue>;

impl From<i64> for BindValue {
    fn from(v: i64) -> Self {
        BindValue::Int(v)
    }
}

impl From<u64> for BindValue {
    fn from(v: u64) -> Self {
        BindValue::UInt(v)
    }
}

impl From<f64> for BindValue {
    fn from(v: f64) -> Self {
        BindValue::Float(v)
    }
}

impl From<&str> for BindValue {
    fn from(v: &str) -> Self {
        BindValue::Bytes(Bytes::copy_from_slice(v.as_bytes()))
    }
}

impl From<String> for BindValue {
    fn from(v: String) -> Self {
        BindValue::Bytes(Bytes::from(v))
    }
}

impl From<Bytes> for BindValue {
    fn from(v: Bytes) -> Self {
        BindValue::Bytes(v)
    }
}

impl<T: Into<BindValue>> From<Option<T>> for BindValue {
    fn from(v: Option<T>) -> Self {
        v.map_or(BindValue::Null, Into::into)
    }
}

impl<T: Into<BindValue>> From<Vec<T>> for BindValue {
    fn from(v: Vec<T>) -> Self {
        BindValue::List(v.into_iter().map(Into::into).collect())
    }
}

// -----------------------------------------------------------------------------
// ----- BoundQuery ------------------------------------------------------------

/// A statement together with its bind variables.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct BoundQuery {
    pub sql: String,
    pub bind_vars: BindVars,
}

impl BoundQuery {
    pub fn new(sql: impl Into<String>) -> Self {
        Self {
            sql: sql.into(),
            bind_vars: BindVars::new(),
        }
    }

    pub fn with_bind_vars(sql: impl Into<String>, bind_vars: BindVars) -> Self {
        Self {
            sql: sql.into(),
            bind_vars,
        }
    }

    pub fn bind(mut self, name: impl Into<String>, value: impl Into<BindValue>) -> Self {
        self.bind_vars.insert(name.into(), value.into());
        self
    }
}

// -----------------------------------------------------------------------------
// ----- Tests -----------------------------------------------------------------


// -----------------------------------------------------------------------------
// -----------------------------------------------------------------------------
