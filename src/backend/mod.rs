pub mod endpoint_selector;
pub mod shard_client;

pub use endpoint_selector::{Endpoint, EndpointSelector, StaticEndpointSelector};
pub use shard_client::{ResultStream, ShardClient, ShardDialer};
