use std::net::SocketAddr;
use std::time::Duration;

use clap::{Parser, ValueEnum};
use url::Url;

/// Largest accepted request body by default: 100 KiB.
pub const DEFAULT_MAX_REQUEST_SIZE: usize = 100 << 10;

/// InfluxDB line protocol → Prometheus remote-write proxy
#[derive(Parser, Debug)]
#[command(name = "influx-write-proxy")]
#[command(about = "Accepts InfluxDB line protocol and forwards it as Prometheus remote write")]
#[command(version)]
pub struct Args {
    /// Address the HTTP server binds to
    #[arg(long, env = "PROXY_LISTEN_ADDRESS", default_value = "0.0.0.0:8007")]
    pub listen_address: String,

    /// Remote-write endpoint that receives converted series
    #[arg(
        long,
        env = "PROXY_REMOTE_WRITE_URL",
        default_value = "http://localhost:9009/api/v1/push"
    )]
    pub remote_write_url: String,

    /// Timeout for one remote-write call, in seconds
    #[arg(long, env = "PROXY_REMOTE_TIMEOUT_SECS", default_value_t = 30)]
    pub remote_timeout_secs: u64,

    /// Largest accepted (decompressed) request body, in bytes
    #[arg(long, env = "PROXY_MAX_REQUEST_SIZE_BYTES", default_value_t = DEFAULT_MAX_REQUEST_SIZE)]
    pub max_request_size_bytes: usize,

    /// Drop samples older than this many seconds (0 disables the filter)
    #[arg(long, env = "PROXY_MAX_SAMPLE_AGE_SECS", default_value_t = 0)]
    pub max_sample_age_secs: u64,

    /// Log every sample removed by the age filter
    #[arg(long, env = "PROXY_LOG_DROPPED_SAMPLES")]
    pub log_dropped_samples: bool,

    /// Log level (trace, debug, info, warn, error); RUST_LOG takes precedence
    #[arg(long, env = "PROXY_LOG_LEVEL", default_value = "info")]
    pub log_level: String,

    /// Log output format
    #[arg(long, env = "PROXY_LOG_FORMAT", value_enum, default_value_t = LogFormat::Text)]
    pub log_format: LogFormat,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
pub enum LogFormat {
    Text,
    Json,
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("invalid listen address {0:?}: {1}")]
    ListenAddress(String, #[source] std::net::AddrParseError),

    #[error("invalid remote-write URL {0:?}: {1}")]
    RemoteWriteUrl(String, #[source] url::ParseError),

    #[error("remote-write URL {0:?} must use http or https")]
    RemoteWriteScheme(String),

    #[error("{0} must be greater than zero")]
    Zero(&'static str),
}

// ─── Validated configuration ─────────────────────────────────────

/// Settings the write handler reads on every request.
#[derive(Debug, Clone)]
pub struct WriteConfig {
    pub max_request_size: usize,
    /// Zero disables the freshness filter.
    pub max_sample_age: Duration,
    pub log_dropped_samples: bool,
}

#[derive(Debug, Clone)]
pub struct Config {
    pub listen_address: SocketAddr,
    pub remote_write_url: Url,
    pub remote_timeout: Duration,
    pub write: WriteConfig,
    pub log_level: String,
    pub log_format: LogFormat,
}

impl TryFrom<Args> for Config {
    type Error = ConfigError;

    fn try_from(args: Args) -> Result<Self, Self::Error> {
        let listen_address = args
            .listen_address
            .parse()
            .map_err(|e| ConfigError::ListenAddress(args.listen_address.clone(), e))?;

        let remote_write_url = Url::parse(&args.remote_write_url)
            .map_err(|e| ConfigError::RemoteWriteUrl(args.remote_write_url.clone(), e))?;
        if !matches!(remote_write_url.scheme(), "http" | "https") {
            return Err(ConfigError::RemoteWriteScheme(args.remote_write_url));
        }

        if args.remote_timeout_secs == 0 {
            return Err(ConfigError::Zero("--remote-timeout-secs"));
        }
        if args.max_request_size_bytes == 0 {
            return Err(ConfigError::Zero("--max-request-size-bytes"));
        }

        Ok(Self {
            listen_address,
            remote_write_url,
            remote_timeout: Duration::from_secs(args.remote_timeout_secs),
            write: WriteConfig {
                max_request_size: args.max_request_size_bytes,
                max_sample_age: Duration::from_secs(args.max_sample_age_secs),
                log_dropped_samples: args.log_dropped_samples,
            },
            log_level: args.log_level,
            log_format: args.log_format,
        })
    }
}

impl Config {
    pub fn from_args() -> Result<Self, ConfigError> {
        Args::parse().try_into()
    }
}
