use serde::Deserialize;
use std::env;
use std::time::Duration;

/// Process-level configuration. Per-pipeline options are resolved separately
/// through the layered settings in `services::config_resolver`.
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub server: ServerConfig,
    pub logging: LoggingConfig,
    pub landing_zone: LandingZoneConfig,
    pub auxiliary: AuxiliaryConfig,
    #[serde(default)]
    pub data_lake: DataLakeConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    pub level: String,
    pub style: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LandingZoneConfig {
    pub timeout_secs: u64,
    pub initial_interval_ms: u64,
    pub max_interval_ms: u64,
}

impl LandingZoneConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    pub fn initial_interval(&self) -> Duration {
        Duration::from_millis(self.initial_interval_ms)
    }

    pub fn max_interval(&self) -> Duration {
        Duration::from_millis(self.max_interval_ms)
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct AuxiliaryConfig {
    /// Directory holding SourceColumnProperties.json, ReplaceViewSyntax.json,
    /// EntityList.json and SubTableSuperTableList.json
    pub directory: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DataLakeConfig {
    /// When set, manifest URLs are served from this local folder instead of HTTP
    pub local_root: Option<String>,
    /// Upper bound for any single data lake or Livy HTTP request
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
}

fn default_request_timeout_secs() -> u64 {
    60
}

impl Default for DataLakeConfig {
    fn default() -> Self {
        Self {
            local_root: None,
            request_timeout_secs: default_request_timeout_secs(),
        }
    }
}

impl DataLakeConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

impl Config {
    pub fn from_env() -> Result<Self, config::ConfigError> {
        // Try to load from .env file first so its values count as environment
        let _ = dotenv::dotenv();

        let mut builder = config::Config::builder()
            .set_default("server.host", "0.0.0.0")?
            .set_default("server.port", 7071)?
            .set_default("logging.level", "info")?
            .set_default("logging.style", "auto")?
            .set_default("landing_zone.timeout_secs", 300)?
            .set_default("landing_zone.initial_interval_ms", 1000)?
            .set_default("landing_zone.max_interval_ms", 30000)?
            .set_default("auxiliary.directory", "./config")?
            .set_default("data_lake.request_timeout_secs", default_request_timeout_secs())?;

        if let Ok(host) = env::var("HOST") {
            builder = builder.set_override("server.host", host)?;
        }

        if let Ok(port) = env::var("PORT") {
            builder = builder.set_override("server.port", port.parse::<u16>().unwrap_or(7071))?;
        }

        if let Ok(log_level) = env::var("RUST_LOG") {
            builder = builder.set_override("logging.level", log_level)?;
        }

        if let Ok(log_style) = env::var("RUST_LOG_STYLE") {
            builder = builder.set_override("logging.style", log_style)?;
        }

        if let Ok(timeout) = env::var("LANDING_ZONE_TIMEOUT_SECS") {
            builder = builder.set_override("landing_zone.timeout_secs", timeout)?;
        }

        if let Ok(interval) = env::var("LANDING_ZONE_INITIAL_INTERVAL_MS") {
            builder = builder.set_override("landing_zone.initial_interval_ms", interval)?;
        }

        if let Ok(interval) = env::var("LANDING_ZONE_MAX_INTERVAL_MS") {
            builder = builder.set_override("landing_zone.max_interval_ms", interval)?;
        }

        if let Ok(aux_dir) = env::var("AUX_DIR") {
            builder = builder.set_override("auxiliary.directory", aux_dir)?;
        }

        if let Ok(timeout) = env::var("HTTP_TIMEOUT_SECS") {
            builder = builder.set_override("data_lake.request_timeout_secs", timeout)?;
        }

        if let Ok(local_root) = env::var("LOCAL_LAKE_ROOT") {
            builder = builder.set_override("data_lake.local_root", Some(local_root))?;
        }

        builder.build()?.try_deserialize()
    }

    pub fn server_address(&self) -> String {
        format!("{}:{}", self.server.host, self.server.port)
    }
}
