pub mod numbered;

pub use numbered::{Lease, NumberedPool, PoolError, PoolStats};
