pub mod cli;
pub mod config;
pub mod endpoints;
pub mod types;

pub use cli::CliConfig;
pub use config::{ConfigError, GatewayConfig, GatewayFileSettings};
pub use endpoints::EndpointRecord;
pub use types::LogLevel;
