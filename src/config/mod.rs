// src/config/mod.rs - Host configuration (printer network, pumps, material change)
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs::File;
use std::io::Read;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("IO error reading config: {0}")]
    Io(#[from] std::io::Error),
    #[error("TOML parse error: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// Main configuration structure, loaded from a TOML file.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub printer: PrinterConfig,

    /// Pump profiles keyed by pump id: "a", "b", "c", "drain".
    #[serde(default = "default_pumps")]
    pub pumps: BTreeMap<String, PumpConfig>,

    #[serde(default)]
    pub material_change: MaterialChangeConfig,

    #[serde(default)]
    pub web: WebConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            printer: PrinterConfig::default(),
            pumps: default_pumps(),
            material_change: MaterialChangeConfig::default(),
            web: WebConfig::default(),
        }
    }
}

/// Printer network configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct PrinterConfig {
    #[serde(default = "default_printer_ip")]
    pub ip_address: String,

    #[serde(default = "default_printer_port")]
    pub port: u16,

    #[serde(default = "default_timeout")]
    pub timeout_seconds: f64,

    #[serde(default = "default_poll_interval")]
    pub poll_interval_seconds: f64,

    /// Delay before the next poll after a failed status request.
    #[serde(default = "default_retry_delay")]
    pub retry_delay_seconds: f64,
}

impl Default for PrinterConfig {
    fn default() -> Self {
        Self {
            ip_address: default_printer_ip(),
            port: default_printer_port(),
            timeout_seconds: default_timeout(),
            poll_interval_seconds: default_poll_interval(),
            retry_delay_seconds: default_retry_delay(),
        }
    }
}

/// Per-pump profile and calibration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct PumpConfig {
    #[serde(default)]
    pub name: String,

    #[serde(default = "default_flow_rate")]
    pub flow_rate_ml_per_second: f64,
}

impl Default for PumpConfig {
    fn default() -> Self {
        Self {
            name: String::new(),
            flow_rate_ml_per_second: default_flow_rate(),
        }
    }
}

/// Material change workflow parameters
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct MaterialChangeConfig {
    #[serde(default = "default_drain_volume")]
    pub drain_volume_ml: f64,

    #[serde(default = "default_fill_volume")]
    pub fill_volume_ml: f64,

    #[serde(default = "default_settle_time")]
    pub settle_time_seconds: f64,

    /// Post-pause interval during which no further printer commands are issued.
    #[serde(default = "default_quiescent_window")]
    pub quiescent_window_seconds: f64,

    #[serde(default = "default_bed_raise_initial")]
    pub bed_raise_initial_delay_seconds: f64,

    #[serde(default = "default_bed_raise_move")]
    pub bed_raise_move_seconds: f64,

    #[serde(default = "default_bed_raise_buffer")]
    pub bed_raise_buffer_seconds: f64,

    #[serde(default = "default_air_assist_enabled")]
    pub air_assist_enabled: bool,

    #[serde(default = "default_air_assist_pre")]
    pub air_assist_pre_delay_seconds: f64,

    #[serde(default = "default_air_assist_post")]
    pub air_assist_post_delay_seconds: f64,
}

impl Default for MaterialChangeConfig {
    fn default() -> Self {
        Self {
            drain_volume_ml: default_drain_volume(),
            fill_volume_ml: default_fill_volume(),
            settle_time_seconds: default_settle_time(),
            quiescent_window_seconds: default_quiescent_window(),
            bed_raise_initial_delay_seconds: default_bed_raise_initial(),
            bed_raise_move_seconds: default_bed_raise_move(),
            bed_raise_buffer_seconds: default_bed_raise_buffer(),
            air_assist_enabled: default_air_assist_enabled(),
            air_assist_pre_delay_seconds: default_air_assist_pre(),
            air_assist_post_delay_seconds: default_air_assist_post(),
        }
    }
}

/// Web API configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct WebConfig {
    #[serde(default = "default_bind")]
    pub bind: String,
}

impl Default for WebConfig {
    fn default() -> Self {
        Self { bind: default_bind() }
    }
}

fn default_printer_ip() -> String {
    "192.168.4.2".to_string()
}
fn default_printer_port() -> u16 {
    6000
}
fn default_timeout() -> f64 {
    10.0
}
fn default_poll_interval() -> f64 {
    5.0
}
fn default_retry_delay() -> f64 {
    5.0
}
fn default_flow_rate() -> f64 {
    2.5
}
fn default_drain_volume() -> f64 {
    50.0
}
fn default_fill_volume() -> f64 {
    45.0
}
fn default_settle_time() -> f64 {
    5.0
}
fn default_quiescent_window() -> f64 {
    10.0
}
fn default_bed_raise_initial() -> f64 {
    2.0
}
fn default_bed_raise_move() -> f64 {
    15.0
}
fn default_bed_raise_buffer() -> f64 {
    3.0
}
fn default_air_assist_enabled() -> bool {
    true
}
fn default_air_assist_pre() -> f64 {
    1.0
}
fn default_air_assist_post() -> f64 {
    2.0
}
fn default_bind() -> String {
    "0.0.0.0:3000".to_string()
}

fn default_pumps() -> BTreeMap<String, PumpConfig> {
    let mut pumps = BTreeMap::new();
    pumps.insert(
        "a".to_string(),
        PumpConfig { name: "Pump A".to_string(), flow_rate_ml_per_second: 2.5 },
    );
    pumps.insert(
        "b".to_string(),
        PumpConfig { name: "Pump B".to_string(), flow_rate_ml_per_second: 2.5 },
    );
    pumps.insert(
        "c".to_string(),
        PumpConfig { name: "Pump C".to_string(), flow_rate_ml_per_second: 2.5 },
    );
    pumps.insert(
        "drain".to_string(),
        PumpConfig { name: "Drain Pump".to_string(), flow_rate_ml_per_second: 2.5 },
    );
    pumps
}

impl Config {
    pub fn parse_toml(content: &str) -> Result<Self, ConfigError> {
        let config: Config = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        // Every duration field ends up in Duration::from_secs_f64, which
        // panics on negative, NaN or infinite input; reject those here so
        // the monitor task never sees them.
        if self.printer.ip_address.is_empty() {
            return Err(ConfigError::Invalid("printer.ip_address cannot be empty".to_string()));
        }
        for (name, value) in [
            ("printer.poll_interval_seconds", self.printer.poll_interval_seconds),
            ("printer.timeout_seconds", self.printer.timeout_seconds),
        ] {
            if !(value.is_finite() && value > 0.0) {
                return Err(ConfigError::Invalid(format!("{} must be positive", name)));
            }
        }
        let mc = &self.material_change;
        for (name, value) in [
            ("printer.retry_delay_seconds", self.printer.retry_delay_seconds),
            ("material_change.settle_time_seconds", mc.settle_time_seconds),
            ("material_change.quiescent_window_seconds", mc.quiescent_window_seconds),
            (
                "material_change.bed_raise_initial_delay_seconds",
                mc.bed_raise_initial_delay_seconds,
            ),
            ("material_change.bed_raise_move_seconds", mc.bed_raise_move_seconds),
            ("material_change.bed_raise_buffer_seconds", mc.bed_raise_buffer_seconds),
            ("material_change.air_assist_pre_delay_seconds", mc.air_assist_pre_delay_seconds),
            ("material_change.air_assist_post_delay_seconds", mc.air_assist_post_delay_seconds),
        ] {
            if !(value.is_finite() && value >= 0.0) {
                return Err(ConfigError::Invalid(format!(
                    "{} must be a non-negative number",
                    name
                )));
            }
        }
        for (id, pump) in &self.pumps {
            if !(pump.flow_rate_ml_per_second.is_finite() && pump.flow_rate_ml_per_second > 0.0) {
                return Err(ConfigError::Invalid(format!(
                    "pump '{}' flow_rate_ml_per_second must be positive",
                    id
                )));
            }
        }
        for (name, value) in [
            ("material_change.drain_volume_ml", mc.drain_volume_ml),
            ("material_change.fill_volume_ml", mc.fill_volume_ml),
        ] {
            if !(value.is_finite() && value > 0.0) {
                return Err(ConfigError::Invalid(format!("{} must be positive", name)));
            }
        }
        Ok(())
    }

    /// Flow rate for the given pump id, falling back to the stock default.
    pub fn flow_rate(&self, pump_id: &str) -> f64 {
        self.pumps
            .get(pump_id)
            .map(|p| p.flow_rate_ml_per_second)
            .unwrap_or_else(default_flow_rate)
    }
}

pub fn load_config(path: impl AsRef<std::path::Path>) -> Result<Config, ConfigError> {
    let mut file = File::open(path)?;
    let mut content = String::new();
    file.read_to_string(&mut content)?;
    Config::parse_toml(&content)
}
