// -----------------------------------------------------------------------------
// ----- LogLevel --------------------------------------------------------------

/// Verbosity for `--log` / `SHARDGATE_LOG`; becomes the tracing filter.
#[derive(clap::ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
pub enum LogLevel {
    Trace,
    Debug,
    Info,
    Warn,
    Error,
}

impl LogLevel {
    pub fn as_str(self) -> &'static str {
        match self {
            LogLevel::Trace => "trace",
            LogLevel::Debug => "debug",
            LogLevel::Info => "info",
            LogLevel::Warn => "warn",
            LogLevel::Error => "error",
        }
    }
}

// -----------------------------------------------------------------------------
// -----------------------------------------------------------------------------
