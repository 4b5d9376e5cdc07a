// Scatter-gather query gateway; the RPC transport mounting `Gateway` lives
// outside this crate.
pub mod backend;
pub mod config;
pub mod errors;
pub mod gateway;
pub mod pool;
pub mod shared_types;

pub use errors::{FanoutFailure, GatewayError, RequestError, ShardError, ShardFailure};
pub use gateway::{Gateway, GatewaySettings, RetryPolicy, TransactionState};
