pub mod bind_value;
pub mod query_result;
pub mod requests;
pub mod session_id;
pub mod shard_target;
pub mod tablet_type;
pub mod transaction_id;

pub use bind_value::{BindValue, BindVars, BoundQuery};
pub use query_result::{Field, QueryResult, Row};
pub use requests::{BatchShardQuery, ShardQuery};
pub use session_id::SessionId;
pub use shard_target::ShardTarget;
pub use tablet_type::TabletType;
pub use transaction_id::TransactionId;
