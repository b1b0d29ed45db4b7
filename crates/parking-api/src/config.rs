//! API server configuration

use parking_cv::CvConfig;
use parking_db::DbConfig;
use parking_monitor::MonitorConfig;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;
use tracing::warn;

/// API server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ApiConfig {
    /// REST API port
    pub api_port: u16,
    /// Enable CORS for all origins (development)
    pub cors_permissive: bool,
    /// Directory holding the `<id>.png` snapshots
    pub images_dir: PathBuf,
    /// Pause between monitoring cycles of one lot
    pub cycle_interval_secs: u64,
    /// Stream addresses served by the demo backend (builds without `opencv`)
    pub demo_streams: Vec<String>,
    /// Detection, sampling and rendering settings
    pub cv: CvConfig,
    /// Registry store configuration
    pub db: DbConfig,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            api_port: 8000,
            cors_permissive: true,
            images_dir: PathBuf::from("images"),
            cycle_interval_secs: 10,
            demo_streams: Vec::new(),
            cv: CvConfig::default(),
            db: DbConfig::default(),
        }
    }
}

impl ApiConfig {
    /// Load configuration from `parking.toml` and `PARKING_*` variables
    ///
    /// Nested keys use a double underscore, e.g. `PARKING_DB__KEYSPACE` or
    /// `PARKING_CV__STREAM__WARMUP_FRAMES`.
    pub fn load() -> Result<Self, ::config::ConfigError> {
        dotenvy::dotenv().ok();

        ::config::Config::builder()
            .add_source(::config::File::with_name("parking").required(false))
            .add_source(
                ::config::Environment::with_prefix("PARKING")
                    .prefix_separator("_")
                    .separator("__")
                    .list_separator(",")
                    .with_list_parse_key("db.hosts")
                    .with_list_parse_key("demo_streams")
                    .try_parsing(true),
            )
            .build()?
            .try_deserialize()
    }

    /// Load the common settings from plain environment variables
    pub fn from_env() -> Self {
        dotenvy::dotenv().ok();
        let mut config = Self::default();

        if let Some(port) = env_parse("API_PORT") {
            config.api_port = port;
        }
        if let Ok(value) = std::env::var("CORS_PERMISSIVE") {
            config.cors_permissive = value == "true" || value == "1";
        }
        if let Ok(dir) = std::env::var("IMAGES_DIR") {
            config.images_dir = PathBuf::from(dir);
        }
        if let Some(secs) = env_parse("CYCLE_INTERVAL_SECS") {
            config.cycle_interval_secs = secs;
        }
        if let Ok(streams) = std::env::var("DEMO_STREAMS") {
            config.demo_streams = streams
                .split(',')
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
                .collect();
        }
        if let Some(frames) = env_parse("WARMUP_FRAMES") {
            config.cv.stream.warmup_frames = frames;
        }
        if let Some(secs) = env_parse("SAMPLE_TIMEOUT_SECS") {
            config.cv.stream.sample_timeout_secs = secs;
        }
        if let Ok(path) = std::env::var("MODEL_PATH") {
            config.cv.detection.model_path = path;
        }

        config.db = DbConfig::from_env().unwrap_or_else(|e| {
            warn!("Ignoring database environment: {}", e);
            DbConfig::default()
        });

        config
    }

    pub fn cycle_interval(&self) -> Duration {
        Duration::from_secs(self.cycle_interval_secs)
    }

    /// Supervisor settings derived from this configuration
    pub fn monitor_config(&self) -> MonitorConfig {
        MonitorConfig {
            cycle_interval: self.cycle_interval(),
            cv: self.cv.clone(),
            ..MonitorConfig::default()
        }
    }
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Option<T> {
    std::env::var(key).ok().and_then(|s| s.parse().ok())
}
