//! Configuration layer: typed settings with layered precedence (file → env → CLI).

use std::{net::SocketAddr, num::NonZeroUsize, path::PathBuf, str::FromStr, time::Duration};

use clap::{Args, Parser, Subcommand, builder::BoolishValueParser};
use config::{Config, Environment, File};
use serde::Deserialize;
use thiserror::Error;
use tracing::level_filters::LevelFilter;
use url::Url;

use crate::cache::{DEFAULT_MAX_BODY_BYTES, DEFAULT_PREFIX, DEFAULT_STORE_TIMEOUT_MS};

const DEFAULT_CONFIG_BASENAME: &str = "config/default";
const LOCAL_CONFIG_BASENAME: &str = "relaycache";
const DEFAULT_HOST: &str = "127.0.0.1";
const DEFAULT_PORT: u16 = 3000;
const DEFAULT_GRACEFUL_SHUTDOWN_SECS: u64 = 30;
const DEFAULT_REDIS_HOST: &str = "localhost";
const DEFAULT_REDIS_PORT: u16 = 6379;
const DEFAULT_REDIS_DB: u32 = 0;
const DEFAULT_CONNECT_TIMEOUT_MS: u64 = 2000;
const DEFAULT_MEMORY_CAPACITY: usize = 1024;
const DEFAULT_INSPECT_HOST: &str = "localhost:3000";

/// Command-line arguments for the relaycache binary.
#[derive(Debug, Parser)]
#[command(
    name = "relaycache",
    version,
    about = "HTTP response cache with grouped invalidation"
)]
pub struct CliArgs {
    /// Optional path to a configuration file.
    #[arg(long = "config-file", env = "RELAYCACHE_CONFIG_FILE", value_name = "PATH")]
    pub config_file: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Debug, Subcommand, Clone)]
pub enum Command {
    /// Run the HTTP service behind the response cache.
    Serve(Box<ServeArgs>),
    /// Print the cache keys a write to an endpoint would evict.
    Inspect(InspectArgs),
}

#[derive(Debug, Args, Default, Clone)]
pub struct ServeArgs {
    #[command(flatten)]
    pub overrides: ServeOverrides,
}

#[derive(Debug, Args, Clone)]
pub struct InspectArgs {
    /// Endpoint path receiving the write, e.g. `/test`.
    #[arg(value_name = "ENDPOINT")]
    pub endpoint: String,

    /// Host component used when building keys.
    #[arg(long, value_name = "HOST", default_value = DEFAULT_INSPECT_HOST)]
    pub host: String,
}

#[derive(Debug, Args, Default, Clone)]
pub struct ServeOverrides {
    /// Override the listener host.
    #[arg(long = "server-host", value_name = "HOST")]
    pub server_host: Option<String>,

    /// Override the listener port.
    #[arg(long = "server-port", value_name = "PORT")]
    pub server_port: Option<u16>,

    /// Override the graceful shutdown timeout.
    #[arg(long = "server-graceful-shutdown-seconds", value_name = "SECONDS")]
    pub server_graceful_shutdown_seconds: Option<u64>,

    /// Override the base log level (trace|debug|info|warn|error).
    #[arg(long = "log-level", value_name = "LEVEL")]
    pub log_level: Option<String>,

    /// Toggle JSON logging.
    #[arg(
        long = "log-json",
        value_name = "BOOL",
        value_parser = BoolishValueParser::new()
    )]
    pub log_json: Option<bool>,

    /// Override the store backend (redis|memory).
    #[arg(long = "store-backend", value_name = "BACKEND")]
    pub store_backend: Option<String>,

    /// Override the full Redis connection URL.
    #[arg(long = "redis-url", value_name = "URL")]
    pub redis_url: Option<String>,

    /// Override the Redis host.
    #[arg(long = "redis-host", value_name = "HOST")]
    pub redis_host: Option<String>,

    /// Override the Redis port.
    #[arg(long = "redis-port", value_name = "PORT")]
    pub redis_port: Option<u16>,

    /// Override the Redis password.
    #[arg(long = "redis-password", env = "RELAYCACHE_REDIS_PASSWORD", value_name = "PASSWORD")]
    pub redis_password: Option<String>,

    /// Toggle the response cache.
    #[arg(
        long = "cache-enabled",
        value_name = "BOOL",
        value_parser = BoolishValueParser::new()
    )]
    pub cache_enabled: Option<bool>,

    /// Override the key prefix.
    #[arg(long = "cache-prefix", value_name = "PREFIX")]
    pub cache_prefix: Option<String>,

    /// Override the entry TTL; 0 disables expiry.
    #[arg(long = "cache-ttl-seconds", value_name = "SECONDS")]
    pub cache_ttl_seconds: Option<u64>,
}

/// Fully-resolved deployment settings after precedence resolution and validation.
#[derive(Debug, Clone)]
pub struct Settings {
    pub server: ServerSettings,
    pub logging: LoggingSettings,
    pub store: StoreSettings,
    pub cache: CacheSettings,
}

#[derive(Debug, Clone)]
pub struct ServerSettings {
    pub addr: SocketAddr,
    pub graceful_shutdown: Duration,
}

#[derive(Debug, Clone)]
pub struct LoggingSettings {
    pub level: LevelFilter,
    pub format: LogFormat,
}

#[derive(Debug, Clone, Copy)]
pub enum LogFormat {
    Json,
    Compact,
}

#[derive(Debug, Clone)]
pub struct StoreSettings {
    pub backend: StoreBackend,
    /// Deadline for one store call on the request path.
    pub timeout: Duration,
    /// Deadline for the startup connection and `PING`.
    pub connect_timeout: Duration,
}

#[derive(Debug, Clone)]
pub enum StoreBackend {
    Redis { url: Url },
    Memory { capacity: NonZeroUsize },
}

#[derive(Debug, Clone)]
pub struct CacheSettings {
    pub enabled: bool,
    pub prefix: String,
    pub ttl: Duration,
    pub max_body_bytes: usize,
    pub groups: Vec<Vec<String>>,
}

impl Default for CacheSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            prefix: DEFAULT_PREFIX.to_string(),
            ttl: Duration::ZERO,
            max_body_bytes: DEFAULT_MAX_BODY_BYTES,
            groups: Vec::new(),
        }
    }
}

#[derive(Debug, Error)]
pub enum LoadError {
    #[error("failed to build configuration: {0}")]
    Build(#[from] config::ConfigError),
    #[error("invalid configuration for `{key}`: {reason}")]
    Invalid { key: &'static str, reason: String },
}

impl LoadError {
    fn invalid(key: &'static str, reason: impl Into<String>) -> Self {
        Self::Invalid {
            key,
            reason: reason.into(),
        }
    }
}

/// Load settings using the configured precedence (file → environment → CLI).
pub fn load(cli: &CliArgs) -> Result<Settings, LoadError> {
    let mut builder = Config::builder()
        .add_source(File::with_name(DEFAULT_CONFIG_BASENAME).required(false))
        .add_source(File::with_name(LOCAL_CONFIG_BASENAME).required(false));

    if let Some(path) = cli.config_file.as_ref() {
        builder = builder.add_source(File::from(path.as_path()).required(true));
    }

    builder = builder.add_source(Environment::with_prefix("RELAYCACHE").separator("__"));

    let mut raw: RawSettings = builder.build()?.try_deserialize()?;

    match cli.command.as_ref() {
        Some(Command::Serve(args)) => raw.apply_serve_overrides(&args.overrides),
        Some(Command::Inspect(_)) => {}
        None => raw.apply_serve_overrides(&ServeOverrides::default()),
    }

    Settings::from_raw(raw)
}

/// Resolve configuration using the supplied CLI arguments, returning both for downstream use.
pub fn load_with_cli() -> Result<(CliArgs, Settings), LoadError> {
    let args = CliArgs::parse();
    let settings = load(&args)?;
    Ok((args, settings))
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawSettings {
    server: RawServerSettings,
    logging: RawLoggingSettings,
    store: RawStoreSettings,
    cache: RawCacheSettings,
}

impl RawSettings {
    fn apply_serve_overrides(&mut self, overrides: &ServeOverrides) {
        if let Some(host) = overrides.server_host.as_ref() {
            self.server.host = Some(host.clone());
        }
        if let Some(port) = overrides.server_port {
            self.server.port = Some(port);
        }
        if let Some(seconds) = overrides.server_graceful_shutdown_seconds {
            self.server.graceful_shutdown_seconds = Some(seconds);
        }
        if let Some(level) = overrides.log_level.as_ref() {
            self.logging.level = Some(level.clone());
        }
        if let Some(json) = overrides.log_json {
            self.logging.json = Some(json);
        }
        if let Some(backend) = overrides.store_backend.as_ref() {
            self.store.backend = Some(backend.clone());
        }
        if let Some(url) = overrides.redis_url.as_ref() {
            self.store.redis.url = Some(url.clone());
        }
        if let Some(host) = overrides.redis_host.as_ref() {
            self.store.redis.host = Some(host.clone());
        }
        if let Some(port) = overrides.redis_port {
            self.store.redis.port = Some(port);
        }
        if let Some(password) = overrides.redis_password.as_ref() {
            self.store.redis.password = Some(password.clone());
        }
        if let Some(enabled) = overrides.cache_enabled {
            self.cache.enabled = Some(enabled);
        }
        if let Some(prefix) = overrides.cache_prefix.as_ref() {
            self.cache.prefix = Some(prefix.clone());
        }
        if let Some(ttl) = overrides.cache_ttl_seconds {
            self.cache.ttl_seconds = Some(ttl);
        }
    }
}

impl Settings {
    fn from_raw(raw: RawSettings) -> Result<Self, LoadError> {
        let RawSettings {
            server,
            logging,
            store,
            cache,
        } = raw;

        Ok(Self {
            server: build_server_settings(server)?,
            logging: build_logging_settings(logging)?,
            store: build_store_settings(store)?,
            cache: build_cache_settings(cache)?,
        })
    }
}

fn build_server_settings(server: RawServerSettings) -> Result<ServerSettings, LoadError> {
    let host = server.host.unwrap_or_else(|| DEFAULT_HOST.to_string());

    let port = server.port.unwrap_or(DEFAULT_PORT);
    if port == 0 {
        return Err(LoadError::invalid(
            "server.port",
            "port must be greater than zero",
        ));
    }

    let addr = parse_socket_addr(&host, port)
        .map_err(|reason| LoadError::invalid("server.addr", reason))?;

    let graceful_secs = server
        .graceful_shutdown_seconds
        .unwrap_or(DEFAULT_GRACEFUL_SHUTDOWN_SECS);
    if graceful_secs == 0 {
        return Err(LoadError::invalid(
            "server.graceful_shutdown_seconds",
            "must be greater than zero",
        ));
    }

    Ok(ServerSettings {
        addr,
        graceful_shutdown: Duration::from_secs(graceful_secs),
    })
}

fn build_logging_settings(logging: RawLoggingSettings) -> Result<LoggingSettings, LoadError> {
    let level = match logging.level {
        Some(level) => LevelFilter::from_str(level.as_str()).map_err(|err| {
            LoadError::invalid("logging.level", format!("failed to parse: {err}"))
        })?,
        None => LevelFilter::INFO,
    };

    let format = if logging.json.unwrap_or(false) {
        LogFormat::Json
    } else {
        LogFormat::Compact
    };

    Ok(LoggingSettings { level, format })
}

fn build_store_settings(store: RawStoreSettings) -> Result<StoreSettings, LoadError> {
    let backend = match store.backend.as_deref().map(str::trim) {
        None | Some("redis") => StoreBackend::Redis {
            url: build_redis_url(store.redis)?,
        },
        Some("memory") => {
            let capacity = store.memory_capacity.unwrap_or(DEFAULT_MEMORY_CAPACITY);
            StoreBackend::Memory {
                capacity: NonZeroUsize::new(capacity).ok_or_else(|| {
                    LoadError::invalid("store.memory_capacity", "must be greater than zero")
                })?,
            }
        }
        Some(other) => {
            return Err(LoadError::invalid(
                "store.backend",
                format!("unknown backend `{other}` (expected `redis` or `memory`)"),
            ));
        }
    };

    let timeout = positive_millis(
        store.timeout_ms.unwrap_or(DEFAULT_STORE_TIMEOUT_MS),
        "store.timeout_ms",
    )?;
    let connect_timeout = positive_millis(
        store
            .connect_timeout_ms
            .unwrap_or(DEFAULT_CONNECT_TIMEOUT_MS),
        "store.connect_timeout_ms",
    )?;

    Ok(StoreSettings {
        backend,
        timeout,
        connect_timeout,
    })
}

fn build_redis_url(redis: RawRedisSettings) -> Result<Url, LoadError> {
    if let Some(raw) = redis.url {
        let url = Url::parse(raw.trim())
            .map_err(|err| LoadError::invalid("store.redis.url", format!("invalid url: {err}")))?;
        if !matches!(url.scheme(), "redis" | "rediss") {
            return Err(LoadError::invalid(
                "store.redis.url",
                format!("unsupported scheme `{}`", url.scheme()),
            ));
        }
        return Ok(url);
    }

    let host = redis
        .host
        .map(|host| host.trim().to_string())
        .unwrap_or_else(|| DEFAULT_REDIS_HOST.to_string());
    if host.is_empty() {
        return Err(LoadError::invalid("store.redis.host", "host must not be empty"));
    }

    let port = redis.port.unwrap_or(DEFAULT_REDIS_PORT);
    if port == 0 {
        return Err(LoadError::invalid(
            "store.redis.port",
            "port must be greater than zero",
        ));
    }

    let db = redis.db.unwrap_or(DEFAULT_REDIS_DB);
    let candidate = format!("redis://{host}:{port}/{db}");
    let mut url = Url::parse(&candidate).map_err(|err| {
        LoadError::invalid("store.redis.host", format!("invalid address `{candidate}`: {err}"))
    })?;

    if let Some(password) = redis.password.filter(|password| !password.is_empty()) {
        url.set_password(Some(&password))
            .map_err(|_| LoadError::invalid("store.redis.password", "cannot be applied to url"))?;
    }

    Ok(url)
}

fn build_cache_settings(cache: RawCacheSettings) -> Result<CacheSettings, LoadError> {
    let prefix = cache
        .prefix
        .unwrap_or_else(|| DEFAULT_PREFIX.to_string());
    if prefix.is_empty() {
        return Err(LoadError::invalid("cache.prefix", "must not be empty"));
    }

    let max_body_bytes = cache.max_body_bytes.unwrap_or(DEFAULT_MAX_BODY_BYTES);
    if max_body_bytes == 0 {
        return Err(LoadError::invalid(
            "cache.max_body_bytes",
            "must be greater than zero",
        ));
    }

    Ok(CacheSettings {
        enabled: cache.enabled.unwrap_or(true),
        prefix,
        ttl: Duration::from_secs(cache.ttl_seconds.unwrap_or(0)),
        max_body_bytes,
        groups: cache.groups.unwrap_or_default(),
    })
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawServerSettings {
    host: Option<String>,
    port: Option<u16>,
    graceful_shutdown_seconds: Option<u64>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawLoggingSettings {
    level: Option<String>,
    json: Option<bool>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawStoreSettings {
    backend: Option<String>,
    timeout_ms: Option<u64>,
    connect_timeout_ms: Option<u64>,
    memory_capacity: Option<usize>,
    redis: RawRedisSettings,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawRedisSettings {
    url: Option<String>,
    host: Option<String>,
    port: Option<u16>,
    password: Option<String>,
    db: Option<u32>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawCacheSettings {
    enabled: Option<bool>,
    prefix: Option<String>,
    ttl_seconds: Option<u64>,
    max_body_bytes: Option<usize>,
    groups: Option<Vec<Vec<String>>>,
}

fn parse_socket_addr(host: &str, port: u16) -> Result<SocketAddr, String> {
    let candidate = format!("{host}:{port}");
    candidate
        .parse()
        .map_err(|err| format!("invalid address `{candidate}`: {err}"))
}

fn positive_millis(value: u64, key: &'static str) -> Result<Duration, LoadError> {
    if value == 0 {
        return Err(LoadError::invalid(key, "must be greater than zero"));
    }
    Ok(Duration::from_millis(value))
}
