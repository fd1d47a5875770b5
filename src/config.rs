use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

pub const DEFAULT_CONFIG_PATH: &str = "config/config.toml";
pub const DEFAULT_SERVER_PORT: u16 = 8080;

/// Fallback pack parameters for an 84 V / 20s wheel.
pub const DEFAULT_CELL_COUNT: u32 = 20;
pub const DEFAULT_CAPACITY_WH: f64 = 2000.0;

pub const DEFAULT_ESTIMATOR_MODEL: &str = "weighted_window";
pub const DEFAULT_WINDOW_MINUTES: u64 = 30;
pub const MIN_WINDOW_MINUTES: u64 = 15;
pub const MAX_WINDOW_MINUTES: u64 = 45;
pub const DEFAULT_DECAY_PER_MINUTE: f64 = 0.5;

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub app: AppSection,
    pub logging: LoggingSection,
    #[serde(default)]
    pub battery: Option<BatterySection>,
    #[serde(default)]
    pub estimator: Option<EstimatorSection>,
    #[serde(default)]
    pub calibration: Option<CalibrationSection>,
    #[serde(default)]
    pub persistence: Option<PersistenceSection>,
    #[serde(default)]
    pub server: Option<ServerSection>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct AppSection {
    pub name: String,
}

#[derive(Debug, Deserialize, Clone)]
pub struct LoggingSection {
    pub level: String,
}

#[derive(Debug, Deserialize, Clone)]
pub struct BatterySection {
    /// Master switch for the estimation engine (default: true).
    pub enabled: Option<bool>,
    /// Cells in series (default: 20).
    pub cell_count: Option<u32>,
    /// Usable pack capacity in watt-hours (default: 2000).
    pub capacity_wh: Option<f64>,
    /// Infer the cell count from the first resting voltage (default: false).
    pub auto_detect_cells: Option<bool>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct EstimatorSection {
    /// "weighted_window" (default) or "simple_linear".
    pub model: Option<String>,
    /// Trailing window in minutes, clamped to 15-45 (default: 30).
    pub window_minutes: Option<u64>,
    /// Exponential weight decay per minute of sample age (default: 0.5).
    pub decay_per_minute: Option<f64>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct CalibrationSection {
    /// Historical calibration toggle (default: true).
    pub enabled: Option<bool>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct PersistenceSection {
    /// Path of the JSON key-value store; in-memory only when unset.
    pub path: Option<PathBuf>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerSection {
    /// Port to listen on (default: 8080).
    pub port: Option<u16>,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config: {0}")]
    Read(#[from] std::io::Error),
    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),
}

pub fn load_default() -> Result<Config, ConfigError> {
    load_from_path(DEFAULT_CONFIG_PATH)
}

impl Config {
    /// All-defaults configuration, used when no config file is readable.
    /// Missing configuration is never a failure.
    pub fn fallback() -> Self {
        Self {
            app: AppSection {
                name: "wheelrange".to_string(),
            },
            logging: LoggingSection {
                level: "info".to_string(),
            },
            battery: None,
            estimator: None,
            calibration: None,
            persistence: None,
            server: None,
        }
    }
}

pub fn load_from_path(path: impl AsRef<Path>) -> Result<Config, ConfigError> {
    let contents = std::fs::read_to_string(path)?;
    let config: Config = toml::from_str(&contents)?;
    Ok(config)
}

impl Config {
    /// Whether the engine runs at all (default: true).
    pub fn engine_enabled(&self) -> bool {
        self.battery
            .as_ref()
            .and_then(|b| b.enabled)
            .unwrap_or(true)
    }

    /// Cells in series (default: 20). Zero is treated as unset.
    pub fn cell_count(&self) -> u32 {
        match self.battery.as_ref().and_then(|b| b.cell_count) {
            Some(count) if count > 0 => count,
            _ => DEFAULT_CELL_COUNT,
        }
    }

    /// Usable capacity in Wh (default: 2000). Non-positive is treated as
    /// unset.
    pub fn capacity_wh(&self) -> f64 {
        match self.battery.as_ref().and_then(|b| b.capacity_wh) {
            Some(capacity) if capacity > 0.0 => capacity,
            _ => DEFAULT_CAPACITY_WH,
        }
    }

    pub fn auto_detect_cells(&self) -> bool {
        self.battery
            .as_ref()
            .and_then(|b| b.auto_detect_cells)
            .unwrap_or(false)
    }

    /// Estimation strategy name (default: "weighted_window").
    pub fn estimator_model(&self) -> &str {
        self.estimator
            .as_ref()
            .and_then(|e| e.model.as_deref())
            .unwrap_or(DEFAULT_ESTIMATOR_MODEL)
    }

    /// Trailing window for the weighted estimator, clamped to the preset
    /// range (default: 30 minutes).
    pub fn estimator_window(&self) -> Duration {
        let minutes = self
            .estimator
            .as_ref()
            .and_then(|e| e.window_minutes)
            .unwrap_or(DEFAULT_WINDOW_MINUTES)
            .clamp(MIN_WINDOW_MINUTES, MAX_WINDOW_MINUTES);
        Duration::from_secs(minutes * 60)
    }

    /// Weight decay per minute of age (default: 0.5). Non-finite or
    /// negative values fall back to the default.
    pub fn estimator_decay_per_minute(&self) -> f64 {
        match self.estimator.as_ref().and_then(|e| e.decay_per_minute) {
            Some(decay) if decay.is_finite() && decay >= 0.0 => decay,
            _ => DEFAULT_DECAY_PER_MINUTE,
        }
    }

    pub fn calibration_enabled(&self) -> bool {
        self.calibration
            .as_ref()
            .and_then(|c| c.enabled)
            .unwrap_or(true)
    }

    /// Store file path; `None` (or an empty path) means in-memory only.
    pub fn persistence_path(&self) -> Option<&Path> {
        let path = self.persistence.as_ref()?.path.as_deref()?;
        if path.as_os_str().is_empty() {
            None
        } else {
            Some(path)
        }
    }

    /// Returns the server port (default: 8080).
    pub fn server_port(&self) -> u16 {
        self.server
            .as_ref()
            .and_then(|s| s.port)
            .unwrap_or(DEFAULT_SERVER_PORT)
    }
}
