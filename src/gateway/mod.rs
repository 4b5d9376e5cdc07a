pub mod gateway;
pub mod retry;
pub mod scatter_conn;
mod shard_conn;

pub use gateway::{Gateway, GatewaySettings};
pub use retry::RetryPolicy;
pub use scatter_conn::{ScatterConn, TransactionState};
