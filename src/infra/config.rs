//! Configuration loading from TOML files
//!
//! Config file is selected via:
//! 1. --config <path> command line argument
//! 2. CONFIG_FILE environment variable
//! 3. Default: config/dev.toml

use anyhow::Context;
use chrono::NaiveDate;
use serde::Deserialize;
use std::env;
use std::fs;
use std::path::Path;

#[derive(Debug, Clone, Deserialize)]
pub struct SourceConfig {
    #[serde(default = "default_source_url")]
    pub url: String,
    #[serde(default = "default_source_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default = "default_poll_interval_secs")]
    pub poll_interval_secs: u64,
}

impl Default for SourceConfig {
    fn default() -> Self {
        Self {
            url: default_source_url(),
            timeout_secs: default_source_timeout_secs(),
            poll_interval_secs: default_poll_interval_secs(),
        }
    }
}

fn default_source_url() -> String {
    "http://localhost:8090/driver-location".to_string()
}

fn default_source_timeout_secs() -> u64 {
    10
}

fn default_poll_interval_secs() -> u64 {
    60
}

#[derive(Debug, Clone, Deserialize)]
pub struct RoutingConfig {
    #[serde(default = "default_routing_base_url")]
    pub base_url: String,
    #[serde(default = "default_routing_timeout_secs")]
    pub timeout_secs: u64,
    /// Destination for ETA; ETA is omitted when unset
    #[serde(default)]
    pub destination_lat: Option<f64>,
    #[serde(default)]
    pub destination_lng: Option<f64>,
    /// Multiplier applied to straight-line distance when routing is unavailable
    #[serde(default = "default_road_factor")]
    pub road_factor: f64,
}

impl Default for RoutingConfig {
    fn default() -> Self {
        Self {
            base_url: default_routing_base_url(),
            timeout_secs: default_routing_timeout_secs(),
            destination_lat: None,
            destination_lng: None,
            road_factor: default_road_factor(),
        }
    }
}

fn default_routing_base_url() -> String {
    "http://router.project-osrm.org".to_string()
}

fn default_routing_timeout_secs() -> u64 {
    10
}

fn default_road_factor() -> f64 {
    1.3
}

#[derive(Debug, Clone, Deserialize)]
pub struct StorageConfig {
    #[serde(default = "default_data_dir")]
    pub data_dir: String,
    /// Redis URL for the fast cache (env REDIS_URL when unset)
    #[serde(default)]
    pub cache_url: Option<String>,
    #[serde(default = "default_key_prefix")]
    pub key_prefix: String,
    #[serde(default = "default_cache_timeout_ms")]
    pub cache_timeout_ms: u64,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
            cache_url: None,
            key_prefix: default_key_prefix(),
            cache_timeout_ms: default_cache_timeout_ms(),
        }
    }
}

fn default_data_dir() -> String {
    "truck_data".to_string()
}

fn default_key_prefix() -> String {
    "truck:".to_string()
}

fn default_cache_timeout_ms() -> u64 {
    2000
}

/// Movement policy thresholds. All distances in miles, speeds in mph.
#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
pub struct MovementConfig {
    #[serde(default = "default_max_realistic_speed")]
    pub max_realistic_speed_mph: f64,
    #[serde(default = "default_moving_segment_min_mph")]
    pub moving_segment_min_mph: f64,
    /// Cumulative displacement over the trailing window that counts as moving
    #[serde(default = "default_movement_threshold_miles")]
    pub movement_threshold_miles: f64,
    #[serde(default = "default_movement_window_secs")]
    pub movement_window_secs: f64,
    /// Per-fix change relative to the previous driver position
    #[serde(default = "default_position_change_miles")]
    pub position_change_miles: f64,
    /// Shortest segment added to the daily aggregate
    #[serde(default = "default_min_segment_miles")]
    pub min_segment_miles: f64,
    #[serde(default = "default_stop_confirm_secs")]
    pub stop_confirm_secs: f64,
    #[serde(default = "default_history_window_hours")]
    pub history_window_hours: f64,
    #[serde(default = "default_flush_every")]
    pub flush_every: u32,
    /// Largest gap to the last saved location that still yields a startup speed
    #[serde(default = "default_startup_max_gap_hours")]
    pub startup_max_gap_hours: f64,
}

impl Default for MovementConfig {
    fn default() -> Self {
        Self {
            max_realistic_speed_mph: default_max_realistic_speed(),
            moving_segment_min_mph: default_moving_segment_min_mph(),
            movement_threshold_miles: default_movement_threshold_miles(),
            movement_window_secs: default_movement_window_secs(),
            position_change_miles: default_position_change_miles(),
            min_segment_miles: default_min_segment_miles(),
            stop_confirm_secs: default_stop_confirm_secs(),
            history_window_hours: default_history_window_hours(),
            flush_every: default_flush_every(),
            startup_max_gap_hours: default_startup_max_gap_hours(),
        }
    }
}

fn default_max_realistic_speed() -> f64 {
    90.0
}

fn default_moving_segment_min_mph() -> f64 {
    0.5
}

fn default_movement_threshold_miles() -> f64 {
    0.028 // ~150 ft
}

fn default_movement_window_secs() -> f64 {
    300.0
}

fn default_position_change_miles() -> f64 {
    0.009 // ~47 ft
}

fn default_min_segment_miles() -> f64 {
    0.001
}

fn default_stop_confirm_secs() -> f64 {
    300.0
}

fn default_history_window_hours() -> f64 {
    1.0
}

fn default_flush_every() -> u32 {
    3
}

fn default_startup_max_gap_hours() -> f64 {
    8.0
}

#[derive(Debug, Clone, Deserialize)]
pub struct JourneyConfig {
    #[serde(default = "default_journey_start_date")]
    pub start_date: NaiveDate,
    #[serde(default = "default_journey_max_points")]
    pub max_points: usize,
}

impl Default for JourneyConfig {
    fn default() -> Self {
        Self { start_date: default_journey_start_date(), max_points: default_journey_max_points() }
    }
}

fn default_journey_start_date() -> NaiveDate {
    NaiveDate::from_ymd_opt(2025, 9, 15).unwrap_or_default()
}

fn default_journey_max_points() -> usize {
    50
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    /// Snapshot HTTP port (0 to disable)
    #[serde(default = "default_server_port")]
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self { port: default_server_port() }
    }
}

fn default_server_port() -> u16 {
    8080
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct TomlConfig {
    #[serde(default)]
    pub source: SourceConfig,
    #[serde(default)]
    pub routing: RoutingConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub movement: MovementConfig,
    #[serde(default)]
    pub journey: JourneyConfig,
    #[serde(default)]
    pub server: ServerConfig,
}

/// Main configuration struct used throughout the application
#[derive(Debug, Clone)]
pub struct Config {
    source_url: String,
    source_timeout_secs: u64,
    poll_interval_secs: u64,
    routing_base_url: String,
    routing_timeout_secs: u64,
    destination: Option<(f64, f64)>,
    road_factor: f64,
    data_dir: String,
    cache_url: Option<String>,
    key_prefix: String,
    cache_timeout_ms: u64,
    movement: MovementConfig,
    journey_start_date: NaiveDate,
    journey_max_points: usize,
    server_port: u16,
    config_file: String,
}

impl Default for Config {
    fn default() -> Self {
        Self::from_toml(TomlConfig::default(), "default".to_string())
    }
}

impl Config {
    fn from_toml(toml_config: TomlConfig, config_file: String) -> Self {
        let destination = match (toml_config.routing.destination_lat, toml_config.routing.destination_lng) {
            (Some(lat), Some(lng)) => Some((lat, lng)),
            _ => None,
        };

        Self {
            source_url: toml_config.source.url,
            source_timeout_secs: toml_config.source.timeout_secs,
            poll_interval_secs: toml_config.source.poll_interval_secs,
            routing_base_url: toml_config.routing.base_url,
            routing_timeout_secs: toml_config.routing.timeout_secs,
            destination,
            road_factor: toml_config.routing.road_factor,
            data_dir: toml_config.storage.data_dir,
            cache_url: toml_config.storage.cache_url,
            key_prefix: toml_config.storage.key_prefix,
            cache_timeout_ms: toml_config.storage.cache_timeout_ms,
            movement: toml_config.movement,
            journey_start_date: toml_config.journey.start_date,
            journey_max_points: toml_config.journey.max_points,
            server_port: toml_config.server.port,
            config_file,
        }
    }

    /// Determine config file path from args or environment
    pub fn resolve_config_path(args: &[String]) -> String {
        // Check for --config argument
        for (i, arg) in args.iter().enumerate() {
            if arg == "--config" {
                if let Some(path) = args.get(i + 1) {
                    return path.clone();
                }
            }
            if let Some(path) = arg.strip_prefix("--config=") {
                return path.to_string();
            }
        }

        Self::config_path_or_default(env::var("CONFIG_FILE").ok())
    }

    /// CONFIG_FILE value when set, else config/dev.toml
    fn config_path_or_default(env_path: Option<String>) -> String {
        env_path.filter(|path| !path.is_empty()).unwrap_or_else(|| "config/dev.toml".to_string())
    }

    /// Load configuration from a TOML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;

        let toml_config: TomlConfig = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file {}", path.display()))?;

        Ok(Self::from_toml(toml_config, path.display().to_string()))
    }

    /// Load configuration - tries TOML file first, falls back to defaults
    pub fn load(args: &[String]) -> Self {
        Self::load_from_path(&Self::resolve_config_path(args))
    }

    /// Load configuration from an explicit path, falling back to defaults
    pub fn load_from_path(path: &str) -> Self {
        match Self::from_file(path) {
            Ok(config) => config,
            Err(e) => {
                eprintln!("Warning: {:#}. Using defaults.", e);
                Self::default()
            }
        }
    }

    /// Cache URL from config, then REDIS_INTERNAL_URL, then REDIS_URL
    pub fn resolved_cache_url(&self) -> Option<String> {
        pick_cache_url(
            self.cache_url.as_deref(),
            env::var("REDIS_INTERNAL_URL").ok(),
            env::var("REDIS_URL").ok(),
        )
    }

    // Getters for all config fields
    pub fn source_url(&self) -> &str {
        &self.source_url
    }

    pub fn source_timeout_secs(&self) -> u64 {
        self.source_timeout_secs
    }

    pub fn poll_interval_secs(&self) -> u64 {
        self.poll_interval_secs
    }

    pub fn routing_base_url(&self) -> &str {
        &self.routing_base_url
    }

    pub fn routing_timeout_secs(&self) -> u64 {
        self.routing_timeout_secs
    }

    pub fn destination(&self) -> Option<(f64, f64)> {
        self.destination
    }

    pub fn road_factor(&self) -> f64 {
        self.road_factor
    }

    pub fn data_dir(&self) -> &str {
        &self.data_dir
    }

    pub fn cache_url(&self) -> Option<&str> {
        self.cache_url.as_deref()
    }

    pub fn key_prefix(&self) -> &str {
        &self.key_prefix
    }

    pub fn cache_timeout_ms(&self) -> u64 {
        self.cache_timeout_ms
    }

    pub fn movement(&self) -> MovementConfig {
        self.movement
    }

    pub fn journey_start_date(&self) -> NaiveDate {
        self.journey_start_date
    }

    pub fn journey_max_points(&self) -> usize {
        self.journey_max_points
    }

    pub fn server_port(&self) -> u16 {
        self.server_port
    }

    pub fn config_file(&self) -> &str {
        &self.config_file
    }

    /// Builder method for tests to point storage at a temp directory
    #[cfg(test)]
    pub fn with_data_dir(mut self, dir: &str) -> Self {
        self.data_dir = dir.to_string();
        self
    }
}

/// First non-empty of the configured URL and the two environment values
fn pick_cache_url(configured: Option<&str>, internal: Option<String>, public: Option<String>) -> Option<String> {
    configured
        .map(str::to_string)
        .into_iter()
        .chain(internal)
        .chain(public)
        .find(|url| !url.is_empty())
}
