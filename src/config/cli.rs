use clap::Parser;
use std::{path::PathBuf, time::Duration};

use super::types::LogLevel;

// -----------------------------------------------------------------------------
// ----- CliConfig -------------------------------------------------------------

#[derive(Clone, Debug)]
pub struct CliConfig {
    pub config_file_location: PathBuf,
    pub log_level: LogLevel,
    pub probe_timeout: Duration,
}

impl CliConfig {
    pub fn from_args() -> Self {
        let args = Args::try_parse().unwrap_or_else(|e| e.exit());
        Self::from(args)
    }
}

impl From<Args> for CliConfig {
    fn from(args: Args) -> Self {
        Self {
            config_file_location: args.config_file,
            log_level: args.log_level,
            probe_timeout: args.probe_timeout,
        }
    }
}

// -----------------------------------------------------------------------------
// ----- Args ------------------------------------------------------------------

#[derive(Parser, Debug)]
#[command(
    name = "shardgate",
    version,
    about = "Shard query gateway: validates configuration and probes shard endpoints"
)]
struct Args {
    // Must exist; no defaults.
    #[arg(long = "config", short = 'c', env = "SHARDGATE_CONFIG")]
    config_file: PathBuf,

    // Not required via CLI or ENV (defaults to info).
    #[arg(long = "log", default_value = "info", env = "SHARDGATE_LOG")]
    log_level: LogLevel,

    // Upper bound for each endpoint TCP probe, e.g. "500ms" or "2s".
    #[arg(long = "probe-timeout", default_value = "500ms", value_parser = humantime::parse_duration)]
    probe_timeout: Duration,
}

// -----------------------------------------------------------------------------
// ----- Tests -----------------------------------------------------------------


// -----------------------------------------------------------------------------
// -----------------------------------------------------------------------------
