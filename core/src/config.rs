//! Propagator configuration and its file formats
//!
//! The configuration is read once at start-up and handed to
//! [`StatePropagator::new`](crate::propagator::StatePropagator::new), which validates it. An invalid
//! configuration is therefore a start-up failure, never a per-call one.
//!
//! Files can be JSON, YAML or TOML; the format is chosen by extension. A TOML file looks like:
//!
//! ```toml
//! gravitational_parameter = 398600441800000.0
//!
//! [position_weights]
//! altitude = 1.0
//! gps_vertical = 1.0
//! dead_reckoned = 1.0
//! measured = 1.0
//!
//! [attitude_policy]
//! kind = "trust_measurement"
//!
//! [velocity_policy]
//! kind = "imu_integration"
//! ```
use serde::{Deserialize, Serialize};
use std::fs::{self, File};
use std::path::Path;

use crate::earth;
use crate::errors::{NavError, Result};
use crate::merge::{AttitudePolicy, PositionWeights, VelocityPolicy};

fn default_gravitational_parameter() -> f64 {
    earth::GM
}

/// Process-level configuration of the propagator
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PropagatorConfig {
    /// Standard gravitational parameter of the central body ($m^3/s^2$)
    #[serde(default = "default_gravitational_parameter")]
    pub gravitational_parameter: f64,

    /// Weights of the position blend (1:1 by default)
    #[serde(default)]
    pub position_weights: PositionWeights,

    /// Attitude strategy; measurement-only unless explicitly switched
    #[serde(default)]
    pub attitude_policy: AttitudePolicy,

    /// Velocity strategy; pure integration unless an airspeed sensor is configured
    #[serde(default)]
    pub velocity_policy: VelocityPolicy,
}

impl Default for PropagatorConfig {
    fn default() -> Self {
        PropagatorConfig {
            gravitational_parameter: default_gravitational_parameter(),
            position_weights: PositionWeights::default(),
            attitude_policy: AttitudePolicy::default(),
            velocity_policy: VelocityPolicy::default(),
        }
    }
}

impl PropagatorConfig {
    /// Check every configured constant.
    ///
    /// # Errors
    /// [`NavError::Configuration`] for a non-finite or non-positive gravitational parameter, or
    /// weights that cannot form an average.
    pub fn validate(&self) -> Result<()> {
        if !self.gravitational_parameter.is_finite() || self.gravitational_parameter <= 0.0 {
            return Err(NavError::Configuration(format!(
                "gravitational parameter must be finite and positive, got {}",
                self.gravitational_parameter
            )));
        }
        self.position_weights.validate()?;
        self.velocity_policy.validate()
    }

    /// Write the configuration to a JSON file (pretty-printed).
    pub fn to_json<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let file = File::create(path)?;
        serde_json::to_writer_pretty(file, self).map_err(format_error)
    }

    /// Read the configuration from a JSON file.
    pub fn from_json<P: AsRef<Path>>(path: P) -> Result<Self> {
        let file = File::open(path)?;
        serde_json::from_reader(file).map_err(format_error)
    }

    pub fn to_yaml<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let text = serde_yaml::to_string(self).map_err(format_error)?;
        fs::write(path, text)?;
        Ok(())
    }

    pub fn from_yaml<P: AsRef<Path>>(path: P) -> Result<Self> {
        let file = File::open(path)?;
        serde_yaml::from_reader(file).map_err(format_error)
    }

    pub fn to_toml<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let text = toml::to_string(self).map_err(format_error)?;
        fs::write(path, text)?;
        Ok(())
    }

    pub fn from_toml<P: AsRef<Path>>(path: P) -> Result<Self> {
        let text = fs::read_to_string(path)?;
        toml::from_str(&text).map_err(format_error)
    }

    /// Write the configuration in the format named by the file extension.
    ///
    /// # Errors
    /// [`NavError::Configuration`] for an extension other than `.json`, `.yaml`, `.yml` or
    /// `.toml`, or a serialization failure; [`NavError::Io`] if the file cannot be written.
    pub fn to_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let path = path.as_ref();
        match ConfigFormat::from_path(path)? {
            ConfigFormat::Json => self.to_json(path),
            ConfigFormat::Yaml => self.to_yaml(path),
            ConfigFormat::Toml => self.to_toml(path),
        }
    }

    /// Read a configuration in the format named by the file extension.
    ///
    /// The result is not validated here; [`StatePropagator::new`](crate::StatePropagator::new)
    /// does that.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        match ConfigFormat::from_path(path)? {
            ConfigFormat::Json => Self::from_json(path),
            ConfigFormat::Yaml => Self::from_yaml(path),
            ConfigFormat::Toml => Self::from_toml(path),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum ConfigFormat {
    Json,
    Yaml,
    Toml,
}

impl ConfigFormat {
    fn from_path(path: &Path) -> Result<Self> {
        let ext = path
            .extension()
            .and_then(|s| s.to_str())
            .map(|s| s.to_lowercase());
        match ext.as_deref() {
            Some("json") => Ok(ConfigFormat::Json),
            Some("yaml") | Some("yml") => Ok(ConfigFormat::Yaml),
            Some("toml") => Ok(ConfigFormat::Toml),
            _ => Err(NavError::Configuration(format!(
                "unsupported configuration file extension: {}",
                path.display()
            ))),
        }
    }
}

fn format_error(e: impl std::fmt::Display) -> NavError {
    NavError::Configuration(e.to_string())
}
