use futures::future::join_all;
use std::process::ExitCode;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::time::timeout;
use tracing::{error, info, warn};
use tracing_subscriber::{EnvFilter, fmt};

use shardgate::backend::{Endpoint, StaticEndpointSelector};
use shardgate::config::{CliConfig, GatewayConfig, LogLevel};
use shardgate::GatewaySettings;
use shardgate::shared_types::ShardTarget;

// -----------------------------------------------------------------------------
// ----- Constants -------------------------------------------------------------

const APP_NAME: &str = "shardgate";

// -----------------------------------------------------------------------------
// ----- Main ------------------------------------------------------------------

#[tokio::main]
async fn main() -> ExitCode {
    let cli = CliConfig::from_args();
    init_tracing(cli.log_level);

    let config = match GatewayConfig::from_file(&cli.config_file_location).await {
        Ok(config) => config,
        Err(e) => {
            error!("{APP_NAME}: {e}");
            return ExitCode::FAILURE;
        }
    };

    let settings = GatewaySettings::from(&config.settings);
    info!(
        "{APP_NAME}: {} attempts per shard call, {:?} apart; session cap {:?}; idle timeout {:?}",
        settings.retry.max_attempts(),
        settings.retry.delay(),
        settings.max_sessions,
        settings.session_timeout
    );

    let selector = StaticEndpointSelector::new(config.endpoints, config.settings.endpoint_quarantine);
    let targets = selector.targets();
    info!(
        "{APP_NAME}: probing {} shard targets (timeout {:?})",
        targets.len(),
        cli.probe_timeout
    );

    let mut unreachable = 0;
    for (target, endpoints) in targets {
        if !probe_target(target, endpoints, cli.probe_timeout).await {
            unreachable += 1;
        }
    }

    if unreachable > 0 {
        error!("{APP_NAME}: {unreachable} shard targets have no reachable endpoint");
        return ExitCode::FAILURE;
    }

    info!("{APP_NAME}: every shard target is reachable");
    ExitCode::SUCCESS
}

// -----------------------------------------------------------------------------
// ----- Setup -----------------------------------------------------------------

fn init_tracing(level: LogLevel) {
    let filter = EnvFilter::try_new(level.as_str()).unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = fmt().with_env_filter(filter).with_target(false).try_init();
}

// -----------------------------------------------------------------------------
// ----- Probe -----------------------------------------------------------------

/// Connects to every endpoint of `target` concurrently. True when at least
/// one accepted the connection.
async fn probe_target(target: &ShardTarget, endpoints: &[Endpoint], limit: Duration) -> bool {
    let outcomes = join_all(endpoints.iter().map(|endpoint| probe_endpoint(endpoint, limit))).await;

    let mut reachable = 0;
    for (endpoint, outcome) in endpoints.iter().zip(outcomes) {
        match outcome {
            Ok(()) => {
                reachable += 1;
                info!("{target}: {endpoint} reachable");
            }
            Err(reason) => warn!("{target}: {endpoint} unreachable: {reason}"),
        }
    }

    info!("{target}: {reachable}/{} endpoints reachable", endpoints.len());
    reachable > 0
}

async fn probe_endpoint(endpoint: &Endpoint, limit: Duration) -> Result<(), String> {
    match timeout(limit, TcpStream::connect(endpoint.as_str())).await {
        Ok(Ok(_stream)) => Ok(()),
        Ok(Err(e)) => Err(e.to_string()),
        Err(_) => Err(format!("no answer within {limit:?}")),
    }
}

// -----------------------------------------------------------------------------
// -----------------------------------------------------------------------------
