//! Configuration for the chroma audio server.
//!
//! This crate provides the TOML-backed server configuration, range
//! validation, platform config paths, and the embedded factory profiles.
//!
//! # Example
//!
//! ```rust,no_run
//! use chroma_config::{ServerConfig, validate_config};
//!
//! let config = ServerConfig::load("server.toml").unwrap();
//! validate_config(&config).unwrap();
//! println!("sample rate: {}", config.sample_rate);
//! ```

mod error;
mod profiles;

/// Platform-specific configuration paths.
pub mod paths;

/// Configuration range validation.
pub mod validation;

pub use error::ConfigError;
pub use profiles::{FACTORY_PROFILE_NAMES, get_factory_profile};
pub use validation::{ValidationError, ValidationResult, validate_config};

use chroma_core::{DownmixStrategy, PhiSourceKind};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Complete server configuration, stored as TOML.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Engine sample rate in Hz.
    pub sample_rate: u32,
    /// Device callback size in frames; must be a positive multiple of 64.
    pub device_block_frames: usize,
    /// Output channels after the downmix (1-8).
    pub output_channels: usize,
    /// Input device name filter (system default when absent).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub input_device: Option<String>,
    /// Output device name filter (system default when absent).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output_device: Option<String>,
    /// WebSocket telemetry bind address.
    pub bind_addr: String,
    /// Optional JSONL session log path.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub session_log: Option<String>,
    /// Φ modulation settings.
    pub phi: PhiConfig,
    /// Downmix settings.
    pub downmix: DownmixConfig,
    /// Adaptive controller settings.
    pub adaptive: AdaptiveConfig,
    /// Latency settings.
    pub latency: LatencyConfig,
}

/// Φ source and parameter configuration.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PhiConfig {
    /// Active modulation source.
    pub source: PhiSourceKind,
    /// Latched manual phase in radians.
    pub manual_phase: f32,
    /// Latched manual depth, `[0, 1]`.
    pub manual_depth: f32,
    /// Internal oscillator rate in Hz.
    pub internal_rate_hz: f32,
}

impl Default for PhiConfig {
    fn default() -> Self {
        Self {
            source: PhiSourceKind::Internal,
            manual_phase: 0.0,
            manual_depth: 0.5,
            internal_rate_hz: chroma_core::GOLDEN_RATIO_CONJUGATE,
        }
    }
}

/// Downmix configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct DownmixConfig {
    /// Channel weighting strategy.
    pub strategy: DownmixStrategy,
}

/// Adaptive Φ controller configuration.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AdaptiveConfig {
    /// Whether the loop runs at startup.
    pub enabled: bool,
    /// Depth gain.
    pub k: f32,
    /// Phase gain.
    pub gamma: f32,
    /// Criticality setpoint.
    pub target: f32,
    /// External feed-forward bias.
    pub bias: f64,
}

impl Default for AdaptiveConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            k: 0.25,
            gamma: 0.1,
            target: 1.0,
            bias: 0.0,
        }
    }
}

/// Latency calibration and compensation configuration.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LatencyConfig {
    /// Run loopback calibration during startup.
    pub calibrate_on_start: bool,
    /// Initial compensation offset in ms, `[0, 200]`.
    pub compensation_offset_ms: f32,
}

impl Default for LatencyConfig {
    fn default() -> Self {
        Self {
            calibrate_on_start: false,
            compensation_offset_ms: 0.0,
        }
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            sample_rate: 48000,
            device_block_frames: 512,
            output_channels: 2,
            input_device: None,
            output_device: None,
            bind_addr: "127.0.0.1:9807".to_string(),
            session_log: None,
            phi: PhiConfig::default(),
            downmix: DownmixConfig::default(),
            adaptive: AdaptiveConfig::default(),
            latency: LatencyConfig::default(),
        }
    }
}

impl ServerConfig {
    /// Load a configuration from a TOML file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content =
            std::fs::read_to_string(path).map_err(|e| ConfigError::read_file(path, e))?;
        Ok(toml::from_str(&content)?)
    }

    /// Save the configuration as TOML, creating parent directories.
    pub fn save(&self, path: impl AsRef<Path>) -> Result<(), ConfigError> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| ConfigError::CreateDir {
                path: parent.to_path_buf(),
                source: e,
            })?;
        }
        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content).map_err(|e| ConfigError::write_file(path, e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_round_trips_through_toml() {
        let config = ServerConfig::default();
        let toml_text = toml::to_string_pretty(&config).unwrap();
        let back: ServerConfig = toml::from_str(&toml_text).unwrap();
        assert_eq!(back, config);
    }

    #[test]
    fn test_partial_toml_uses_defaults() {
        let config: ServerConfig = toml::from_str(
            r#"
            sample_rate = 44100
            [downmix]
            strategy = "energy"
            "#,
        )
        .unwrap();
        assert_eq!(config.sample_rate, 44100);
        assert_eq!(config.downmix.strategy, DownmixStrategy::Energy);
        assert_eq!(config.output_channels, 2);
        assert_eq!(config.phi.source, PhiSourceKind::Internal);
    }

    #[test]
    fn test_save_and_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("server.toml");

        let mut config = ServerConfig::default();
        config.adaptive.enabled = true;
        config.phi.manual_depth = 0.8;
        config.save(&path).unwrap();

        let loaded = ServerConfig::load(&path).unwrap();
        assert_eq!(loaded, config);
    }

    #[test]
    fn test_load_missing_file_errors() {
        let err = ServerConfig::load("/nonexistent/chroma.toml").unwrap_err();
        assert!(matches!(err, ConfigError::ReadFile { .. }));
    }
}
