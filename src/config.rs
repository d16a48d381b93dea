use std::{
    collections::HashMap,
    net::{IpAddr, Ipv4Addr, SocketAddr},
    path::Path,
};

use clap::Parser;
use thiserror::Error;

/// URL scheme carrying the asynchronous driver tag.
pub const ASYNC_DRIVER_SCHEME: &str = "postgresql+asyncpg://";
/// URL scheme for synchronous drivers and tooling.
pub const SYNC_DRIVER_SCHEME: &str = "postgresql://";
/// Dotenv file read from the working directory, below the real environment.
pub const ENV_FILE: &str = ".env";

#[derive(Parser, Debug, Default)]
#[command(name = "journal", about = "Journal API - daily work/struggle/intention entries")]
pub struct CliArgs {
    /// Port to listen on (overrides PORT)
    #[arg(short, long)]
    pub port: Option<u16>,

    /// Log level (overrides LOG_LEVEL)
    #[arg(short, long)]
    pub log_level: Option<String>,

    /// Database connection string (overrides DATABASE_URL)
    #[arg(short, long)]
    pub database_url: Option<String>,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid value for {key}: {value:?} ({reason})")]
    InvalidValue {
        key: &'static str,
        value: String,
        reason: String,
    },
    #[error("failed to read {path}: {reason}")]
    EnvFile { path: String, reason: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogLevel {
    Critical,
    Error,
    Warning,
    #[default]
    Info,
    Debug,
    NotSet,
}

impl LogLevel {
    /// Unrecognized values fall back to `Info`.
    pub fn parse(value: &str) -> Self {
        match value.trim().to_ascii_uppercase().as_str() {
            "CRITICAL" => LogLevel::Critical,
            "ERROR" => LogLevel::Error,
            "WARNING" => LogLevel::Warning,
            "INFO" => LogLevel::Info,
            "DEBUG" => LogLevel::Debug,
            "NOTSET" => LogLevel::NotSet,
            _ => LogLevel::Info,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            LogLevel::Critical => "CRITICAL",
            LogLevel::Error => "ERROR",
            LogLevel::Warning => "WARNING",
            LogLevel::Info => "INFO",
            LogLevel::Debug => "DEBUG",
            LogLevel::NotSet => "NOTSET",
        }
    }

    /// Equivalent `tracing` filter directive.
    pub fn as_filter(&self) -> &'static str {
        match self {
            LogLevel::Critical | LogLevel::Error => "error",
            LogLevel::Warning => "warn",
            LogLevel::Info => "info",
            LogLevel::Debug => "debug",
            LogLevel::NotSet => "trace",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DatabaseSettings {
    /// Full connection string; authoritative when present.
    pub url: Option<String>,
    pub host: String,
    pub port: u16,
    pub name: String,
    pub user: String,
    pub password: String,
}

impl Default for DatabaseSettings {
    fn default() -> Self {
        DatabaseSettings {
            url: None,
            host: "localhost".to_string(),
            port: 5432,
            name: "journal".to_string(),
            user: "postgres".to_string(),
            password: "postgres".to_string(),
        }
    }
}

/// Process configuration, resolved once at startup and handed to whoever needs it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Settings {
    pub database: DatabaseSettings,
    pub log_level: LogLevel,
    pub log_json: bool,
    pub prometheus_enabled: bool,
    pub sentry_dsn: Option<String>,
    pub dev_bind_all: bool,
    pub port: u16,
}

impl Default for Settings {
    fn default() -> Self {
        Settings {
            database: DatabaseSettings::default(),
            log_level: LogLevel::Info,
            log_json: false,
            prometheus_enabled: true,
            sentry_dsn: None,
            dev_bind_all: false,
            port: 8000,
        }
    }
}

/// Environment keys, matched case-insensitively. An exact upper-case key wins
/// over its lower-case variant.
struct EnvSource(HashMap<String, String>);

impl EnvSource {
    fn new<I, K, V>(vars: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        let mut map = HashMap::new();
        for (key, value) in vars {
            let key = key.into();
            let upper = key.to_ascii_uppercase();
            if key == upper {
                map.insert(upper, value.into());
            } else {
                map.entry(upper).or_insert_with(|| value.into());
            }
        }
        EnvSource(map)
    }

    /// `upper` takes precedence for every key it sets, whatever the case used.
    fn layered(lower: EnvSource, upper: EnvSource) -> Self {
        let mut map = lower.0;
        map.extend(upper.0);
        EnvSource(map)
    }

    fn get(&self, key: &str) -> Option<&str> {
        self.0.get(key).map(String::as_str)
    }

    fn string(&self, key: &str, default: &str) -> String {
        self.get(key).unwrap_or(default).to_string()
    }

    fn flag(&self, key: &'static str, default: bool) -> Result<bool, ConfigError> {
        match self.get(key) {
            None => Ok(default),
            Some(value) => parse_bool(value).ok_or_else(|| ConfigError::InvalidValue {
                key,
                value: value.to_string(),
                reason: "expected a boolean".to_string(),
            }),
        }
    }

    fn port(&self, key: &'static str, default: u16) -> Result<u16, ConfigError> {
        match self.get(key) {
            None => Ok(default),
            Some(value) => value.trim().parse().map_err(|e: std::num::ParseIntError| {
                ConfigError::InvalidValue {
                    key,
                    value: value.to_string(),
                    reason: e.to_string(),
                }
            }),
        }
    }
}

fn parse_bool(value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

/// Key/value pairs from a dotenv file. A missing file is empty.
pub fn read_env_file(path: &Path) -> Result<Vec<(String, String)>, ConfigError> {
    let env_file_err = |e: dotenvy::Error| ConfigError::EnvFile {
        path: path.display().to_string(),
        reason: e.to_string(),
    };
    match dotenvy::from_path_iter(path) {
        Ok(iter) => iter.collect::<Result<Vec<_>, _>>().map_err(env_file_err),
        Err(e) if e.not_found() => Ok(Vec::new()),
        Err(e) => Err(env_file_err(e)),
    }
}

impl Settings {
    /// Process environment over `.env`.
    pub fn from_env() -> Result<Self, ConfigError> {
        let file = read_env_file(Path::new(ENV_FILE))?;
        Self::from_layers(file, std::env::vars())
    }

    /// Builds settings from arbitrary key/value pairs. Unknown keys are ignored.
    pub fn from_vars<I, K, V>(vars: I) -> Result<Self, ConfigError>
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        Self::resolve(EnvSource::new(vars))
    }

    /// Dotenv values under environment values; a key set in both takes the environment's.
    pub fn from_layers<F, E>(file: F, env: E) -> Result<Self, ConfigError>
    where
        F: IntoIterator<Item = (String, String)>,
        E: IntoIterator<Item = (String, String)>,
    {
        Self::resolve(EnvSource::layered(EnvSource::new(file), EnvSource::new(env)))
    }

    fn resolve(env: EnvSource) -> Result<Self, ConfigError> {
        let defaults = Settings::default();
        let db = defaults.database;

        Ok(Settings {
            database: DatabaseSettings {
                url: env
                    .get("DATABASE_URL")
                    .filter(|url| !url.is_empty())
                    .map(str::to_string),
                host: env.string("DB_HOST", &db.host),
                port: env.port("DB_PORT", db.port)?,
                name: env.string("DB_NAME", &db.name),
                user: env.string("DB_USER", &db.user),
                password: env.string("DB_PASSWORD", &db.password),
            },
            log_level: env.get("LOG_LEVEL").map(LogLevel::parse).unwrap_or_default(),
            log_json: env.flag("LOG_JSON", defaults.log_json)?,
            prometheus_enabled: env.flag("PROMETHEUS_ENABLED", defaults.prometheus_enabled)?,
            sentry_dsn: env
                .get("SENTRY_DSN")
                .filter(|dsn| !dsn.is_empty())
                .map(str::to_string),
            dev_bind_all: env.flag("DEV_BIND_ALL", defaults.dev_bind_all)?,
            port: env.port("PORT", defaults.port)?,
        })
    }

    /// Environment plus CLI overrides.
    pub fn load(cli: &CliArgs) -> Result<Self, ConfigError> {
        let mut settings = Self::from_env()?;

        // CLI overrides
        if let Some(port) = cli.port {
            settings.port = port;
        }
        if let Some(ref level) = cli.log_level {
            settings.log_level = LogLevel::parse(level);
        }
        if let Some(ref url) = cli.database_url {
            settings.database.url = Some(url.clone());
        }

        Ok(settings)
    }

    /// Connection string with the asynchronous driver tag. Postgres URLs are
    /// normalized to `postgresql+asyncpg://`; other schemes pass through.
    pub fn database_url(&self) -> String {
        match &self.database.url {
            Some(url) => match url.strip_prefix(SYNC_DRIVER_SCHEME) {
                Some(rest) => format!("{}{}", ASYNC_DRIVER_SCHEME, rest),
                None => url.clone(),
            },
            None => {
                let db = &self.database;
                format!(
                    "{}{}:{}@{}:{}/{}",
                    ASYNC_DRIVER_SCHEME, db.user, db.password, db.host, db.port, db.name
                )
            }
        }
    }

    /// Same connection string with the driver tag removed, for blocking drivers
    /// and the migration tool.
    pub fn sync_database_url(&self) -> String {
        let url = self.database_url();
        match url.strip_prefix(ASYNC_DRIVER_SCHEME) {
            Some(rest) => format!("{}{}", SYNC_DRIVER_SCHEME, rest),
            None => url,
        }
    }

    /// Loopback unless DEV_BIND_ALL opts in to every interface.
    pub fn listen_addr(&self) -> SocketAddr {
        let ip = if self.dev_bind_all {
            IpAddr::V4(Ipv4Addr::UNSPECIFIED)
        } else {
            IpAddr::V4(Ipv4Addr::LOCALHOST)
        };
        SocketAddr::new(ip, self.port)
    }
}

/// Masks the password of a connection string for logging.
pub fn redact_url(url: &str) -> String {
    let Some(scheme_end) = url.find("://").map(|i| i + 3) else {
        return url.to_string();
    };
    let Some(at) = url[scheme_end..].find('@').map(|i| i + scheme_end) else {
        return url.to_string();
    };
    match url[scheme_end..at].find(':').map(|i| i + scheme_end) {
        Some(colon) => format!("{}:***{}", &url[..colon], &url[at..]),
        None => url.to_string(),
    }
}
