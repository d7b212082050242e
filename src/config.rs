use clap::{Args, Parser, ValueEnum};

#[derive(Clone, Debug, Parser)]
#[command(version, about, long_about = None)]
pub struct Config {
    /// Database connection URL
    #[arg(long, env = "TRADEPOST_DATABASE_URL")]
    pub database_url: String,

    #[command(flatten)]
    pub server: ServerConfig,

    #[command(flatten)]
    pub inbox: InboxConfig,

    #[command(flatten)]
    pub telemetry: TelemetryConfig,
}

#[derive(Clone, Debug, Args)]
pub struct ServerConfig {
    /// Host to listen on
    #[arg(long, env = "TRADEPOST_HOST", default_value = "0.0.0.0")]
    pub host: String,

    /// Port to listen on
    #[arg(long, env = "TRADEPOST_PORT", default_value_t = 3000)]
    pub port: u16,

    /// Seconds to wait for background tasks during shutdown
    #[arg(long, env = "TRADEPOST_SHUTDOWN_TIMEOUT_SECS", default_value_t = 10)]
    pub shutdown_timeout_secs: u64,
}

#[derive(Clone, Debug, Args)]
pub struct InboxConfig {
    /// Maximum number of messages pulled by a full inbox fetch
    #[arg(long, env = "TRADEPOST_FETCH_LIMIT", default_value_t = 200)]
    pub fetch_limit: i64,

    /// How often to re-fetch the inbox for every live session
    #[arg(long, env = "TRADEPOST_REFRESH_INTERVAL_SECS", default_value_t = 30)]
    pub refresh_interval_secs: u64,

    /// Upper bound for any single message store call
    #[arg(long, env = "TRADEPOST_STORE_TIMEOUT_SECS", default_value_t = 3)]
    pub store_timeout_secs: u64,

    /// Capacity of the per-user realtime insert channel
    #[arg(long, env = "TRADEPOST_CHANNEL_CAPACITY", default_value_t = 16)]
    pub channel_capacity: usize,

    /// Sessions idle longer than this are torn down
    #[arg(long, env = "TRADEPOST_SESSION_IDLE_SECS", default_value_t = 1800)]
    pub session_idle_secs: u64,

    /// How often to run the idle-session sweep
    #[arg(long, env = "TRADEPOST_SESSION_GC_INTERVAL_SECS", default_value_t = 60)]
    pub session_gc_interval_secs: u64,
}

#[derive(Clone, Copy, Debug, ValueEnum)]
pub enum LogFormat {
    Text,
    Json,
}

#[derive(Clone, Debug, Args)]
pub struct TelemetryConfig {
    /// Log output format
    #[arg(long, env = "TRADEPOST_LOG_FORMAT", value_enum, default_value_t = LogFormat::Text)]
    pub log_format: LogFormat,
}

impl Config {
    #[must_use]
    pub fn load() -> Self {
        Self::parse()
    }
}
