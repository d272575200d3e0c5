//! # Configuration Module
//!
//! Handles loading and validating configuration from TOML files.

use serde::de::Error;
use serde::Deserialize;
use std::fs;
use std::path::Path;

use crate::error::{EmbeddedCommError, Result};

/// Largest responder memory region accepted from configuration (16 MiB)
pub const MAX_MEMORY_SIZE: usize = 16 * 1024 * 1024;

/// Baud rates accepted for the serial transport
pub const SUPPORTED_BAUD_RATES: [u32; 6] = [9600, 57600, 115200, 230400, 460800, 921600];

const LOG_LEVELS: [&str; 5] = ["trace", "debug", "info", "warn", "error"];

/// Main configuration structure
#[derive(Debug, Deserialize, Clone, Default)]
pub struct Config {
    #[serde(default)]
    pub responder: ResponderConfig,

    #[serde(default)]
    pub controller: ControllerConfig,

    #[serde(default)]
    pub serial: SerialConfig,

    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Responder configuration
#[derive(Debug, Deserialize, Clone)]
pub struct ResponderConfig {
    /// Size of the memory region exposed to the controller
    #[serde(default = "default_memory_size")]
    pub memory_size: usize,

    /// Backup buffer size; 0 disables backups
    #[serde(default = "default_backup_buffer_size")]
    pub backup_buffer_size: usize,

    /// 7-bit bus address on the simulated bus
    #[serde(default = "default_bus_address")]
    pub bus_address: u8,

    /// Period of the cooperative `process()` loop
    #[serde(default = "default_process_interval_ms")]
    pub process_interval_ms: u64,

    /// Copy status and transmit checksum into memory[0] and memory[1]
    #[serde(default)]
    pub mirror_registers: bool,
}

/// Controller configuration
#[derive(Debug, Deserialize, Clone)]
pub struct ControllerConfig {
    #[serde(default = "default_busy_poll_interval_ms")]
    pub busy_poll_interval_ms: u64,

    #[serde(default = "default_busy_poll_attempts")]
    pub busy_poll_attempts: u32,
}

/// Serial port configuration
#[derive(Debug, Deserialize, Clone)]
pub struct SerialConfig {
    #[serde(default = "default_serial_port")]
    pub port: String,

    #[serde(default = "default_baud_rate")]
    pub baud_rate: u32,

    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,

    /// Maximum bytes per read call
    #[serde(default = "default_max_chunk_size")]
    pub max_chunk_size: usize,
}

/// Logging configuration
#[derive(Debug, Deserialize, Clone)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Directory for log files; empty disables file logging
    #[serde(default)]
    pub file_dir: String,
}

// Default value functions
fn default_memory_size() -> usize { 2048 }
fn default_backup_buffer_size() -> usize { 16 }
fn default_bus_address() -> u8 { 0x17 }
fn default_process_interval_ms() -> u64 { 1 }

fn default_busy_poll_interval_ms() -> u64 { 1 }
fn default_busy_poll_attempts() -> u32 { 100 }

fn default_serial_port() -> String { "/dev/ttyACM0".to_string() }
fn default_baud_rate() -> u32 { 115200 }
fn default_timeout_ms() -> u64 { 1000 }
fn default_max_chunk_size() -> usize { 64 }

fn default_log_level() -> String { "info".to_string() }

impl Default for ResponderConfig {
    fn default() -> Self {
        Self {
            memory_size: default_memory_size(),
            backup_buffer_size: default_backup_buffer_size(),
            bus_address: default_bus_address(),
            process_interval_ms: default_process_interval_ms(),
            mirror_registers: false,
        }
    }
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            busy_poll_interval_ms: default_busy_poll_interval_ms(),
            busy_poll_attempts: default_busy_poll_attempts(),
        }
    }
}

impl Default for SerialConfig {
    fn default() -> Self {
        Self {
            port: default_serial_port(),
            baud_rate: default_baud_rate(),
            timeout_ms: default_timeout_ms(),
            max_chunk_size: default_max_chunk_size(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            file_dir: String::new(),
        }
    }
}

fn invalid(message: impl std::fmt::Display) -> EmbeddedCommError {
    EmbeddedCommError::Config(toml::de::Error::custom(message))
}

impl Config {
    /// Load configuration from a TOML file
    ///
    /// # Arguments
    ///
    /// * `path` - Path to the configuration file
    ///
    /// # Returns
    ///
    /// * `Result<Config>` - Loaded and validated configuration
    ///
    /// # Errors
    ///
    /// Returns error if:
    /// - File cannot be read
    /// - TOML parsing fails
    /// - Validation fails
    ///
    /// # Examples
    ///
    /// ```no_run
    /// use embedded_comm::config::Config;
    ///
    /// let config = Config::load("config/default.toml")?;
    /// # Ok::<(), Box<dyn std::error::Error>>(())
    /// ```
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let contents = fs::read_to_string(path)?;
        let config: Config = toml::from_str(&contents)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate configuration values
    ///
    /// # Errors
    ///
    /// Returns error if any configuration value is out of valid range
    pub fn validate(&self) -> Result<()> {
        let responder = &self.responder;

        if responder.memory_size < 2 || responder.memory_size > MAX_MEMORY_SIZE {
            return Err(invalid(format!("memory_size must be between 2 and {}", MAX_MEMORY_SIZE)));
        }

        if responder.backup_buffer_size >= responder.memory_size {
            return Err(invalid("backup_buffer_size must be less than memory_size"));
        }

        if !(0x08..=0x77).contains(&responder.bus_address) {
            return Err(invalid("bus_address must be between 0x08 and 0x77"));
        }

        if responder.process_interval_ms == 0 || responder.process_interval_ms > 1000 {
            return Err(invalid("process_interval_ms must be between 1 and 1000"));
        }

        if self.controller.busy_poll_interval_ms == 0 || self.controller.busy_poll_interval_ms > 10000 {
            return Err(invalid("busy_poll_interval_ms must be between 1 and 10000"));
        }

        if self.controller.busy_poll_attempts == 0 {
            return Err(invalid("busy_poll_attempts must be greater than 0"));
        }

        if self.serial.port.is_empty() {
            return Err(invalid("serial port cannot be empty"));
        }

        if !SUPPORTED_BAUD_RATES.contains(&self.serial.baud_rate) {
            return Err(invalid(
                "baud_rate must be one of: 9600, 57600, 115200, 230400, 460800, 921600",
            ));
        }

        if self.serial.timeout_ms == 0 || self.serial.timeout_ms > 60000 {
            return Err(invalid("timeout_ms must be between 1 and 60000"));
        }

        if self.serial.max_chunk_size == 0 || self.serial.max_chunk_size > 4096 {
            return Err(invalid("max_chunk_size must be between 1 and 4096"));
        }

        if !LOG_LEVELS.contains(&self.logging.level.as_str()) {
            return Err(invalid(format!(
                "log level '{}' must be one of: {}",
                self.logging.level,
                LOG_LEVELS.join(", ")
            )));
        }

        Ok(())
    }
}
