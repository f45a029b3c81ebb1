//! Run configuration loaded from YAML.
//!
//! Every field has a default, so a file only needs the values it changes:
//!
//! ```yaml
//! view_size:
//!   width: 960
//!   height: 540
//! multiplicative_factor: 2
//! solver:
//!   max_reprojection_error: 5.0
//! metric: rms_elementwise
//! ```

use crate::camera::{validation, Plane, Resolution};
use crate::geometry::ErrorMetric;
use crate::metrics::MetricAggregator;
use crate::solver::SolverOptions;
use serde::{Deserialize, Serialize};
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

#[derive(thiserror::Error, Debug)]
pub enum ConfigError {
    #[error("IO Error: {0}")]
    IOError(String),
    #[error("Failed to parse YAML: {0}")]
    YamlError(String),
    #[error("Invalid configuration: {0}")]
    InvalidParams(String),
}

impl From<std::io::Error> for ConfigError {
    fn from(err: std::io::Error) -> Self {
        ConfigError::IOError(err.to_string())
    }
}

impl From<serde_yaml::Error> for ConfigError {
    fn from(err: serde_yaml::Error) -> Self {
        ConfigError::YamlError(err.to_string())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EvaluationConfig {
    /// Size of the generated views fed to the model.
    pub view_size: Resolution,
    /// Up-sampling applied to `view_size` to get the canonical frame size.
    pub multiplicative_factor: u32,
    /// Minimum heatmap response accepted as a landmark detection.
    pub heatmap_threshold: f32,
    pub solver: SolverOptions,
    /// Where the result sequence is written at the end of a run.
    pub output: PathBuf,
    pub metric: ErrorMetric,
    /// Height of the horizontal plane the reference points are projected on.
    pub plane_height: f64,
}

impl Default for EvaluationConfig {
    fn default() -> Self {
        EvaluationConfig {
            view_size: Resolution::new(1920, 1080),
            multiplicative_factor: 1,
            heatmap_threshold: 0.5,
            solver: SolverOptions::default(),
            output: PathBuf::from("predictions.json"),
            metric: ErrorMetric::default(),
            plane_height: 0.0,
        }
    }
}

impl EvaluationConfig {
    /// Canonical frame size shared by every record of a run.
    pub fn resolution(&self) -> Result<Resolution, ConfigError> {
        self.view_size
            .scaled(self.multiplicative_factor)
            .ok_or_else(|| {
                ConfigError::InvalidParams(format!(
                    "view_size {}x{} times {} overflows",
                    self.view_size.width, self.view_size.height, self.multiplicative_factor
                ))
            })
    }

    pub fn aggregator(&self) -> MetricAggregator {
        MetricAggregator::new(self.metric, Plane::Z(self.plane_height))
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.multiplicative_factor == 0 {
            return Err(ConfigError::InvalidParams(
                "multiplicative_factor must be positive".to_string(),
            ));
        }
        validation::validate_resolution(&self.view_size)
            .map_err(|e| ConfigError::InvalidParams(e.to_string()))?;
        self.resolution()?;
        if !self.heatmap_threshold.is_finite() {
            return Err(ConfigError::InvalidParams(
                "heatmap_threshold must be finite".to_string(),
            ));
        }
        if !self.plane_height.is_finite() {
            return Err(ConfigError::InvalidParams(
                "plane_height must be finite".to_string(),
            ));
        }
        if let Some(max) = self.solver.max_reprojection_error {
            if !(max > 0.0) {
                return Err(ConfigError::InvalidParams(format!(
                    "max_reprojection_error must be positive, got {max}"
                )));
            }
        }
        Ok(())
    }

    /// Loads and validates a configuration file.
    ///
    /// # Errors
    ///
    /// * [`ConfigError::IOError`] if the file cannot be read.
    /// * [`ConfigError::YamlError`] if it is not valid YAML for this type.
    /// * [`ConfigError::InvalidParams`] if a value is out of range.
    pub fn load_from_yaml<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let contents = fs::read_to_string(path)?;
        let config: EvaluationConfig = serde_yaml::from_str(&contents)?;
        config.validate()?;
        Ok(config)
    }

    pub fn save_to_yaml<P: AsRef<Path>>(&self, path: P) -> Result<(), ConfigError> {
        let yaml = serde_yaml::to_string(self)?;
        let mut file = fs::File::create(path)?;
        file.write_all(yaml.as_bytes())?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = EvaluationConfig::default();
        assert_eq!(config.resolution().unwrap(), Resolution::new(1920, 1080));
        assert_eq!(config.output, PathBuf::from("predictions.json"));
        assert_eq!(config.aggregator(), MetricAggregator::default());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_partial_yaml_keeps_defaults() {
        let yaml = "view_size:\n  width: 960\n  height: 540\nmultiplicative_factor: 2\nsolver:\n  max_reprojection_error: 5.0\nmetric: rms_elementwise\n";
        let config: EvaluationConfig = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(config.resolution().unwrap(), Resolution::new(1920, 1080));
        assert_eq!(config.solver.max_reprojection_error, Some(5.0));
        assert!(config.solver.refine);
        assert_eq!(config.metric, ErrorMetric::RmsElementwise);
        assert_eq!(config.heatmap_threshold, 0.5);
    }

    #[test]
    fn test_save_and_load() {
        let path = std::env::temp_dir().join(format!("court_calib_config_{}.yaml", std::process::id()));
        let config = EvaluationConfig {
            multiplicative_factor: 4,
            view_size: Resolution::new(480, 270),
            plane_height: 1.5,
            ..EvaluationConfig::default()
        };
        config.save_to_yaml(&path).unwrap();
        let loaded = EvaluationConfig::load_from_yaml(&path).unwrap();
        assert_eq!(loaded, config);
        std::fs::remove_file(&path).unwrap();
    }

    #[test]
    fn test_invalid_values() {
        let config = EvaluationConfig {
            multiplicative_factor: 0,
            ..EvaluationConfig::default()
        };
        assert!(matches!(config.validate(), Err(ConfigError::InvalidParams(_))));

        let config = EvaluationConfig {
            solver: SolverOptions {
                max_reprojection_error: Some(-1.0),
                ..SolverOptions::default()
            },
            ..EvaluationConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_overflowing_frame_size_is_rejected() {
        let config = EvaluationConfig {
            view_size: Resolution::new(100_000, 100_000),
            multiplicative_factor: 100_000,
            ..EvaluationConfig::default()
        };
        assert!(matches!(config.resolution(), Err(ConfigError::InvalidParams(_))));
        assert!(matches!(config.validate(), Err(ConfigError::InvalidParams(_))));

        let yaml = "view_size:\n  width: 100000\n  height: 100000\nmultiplicative_factor: 100000\n";
        let path = std::env::temp_dir().join(format!(
            "court_calib_config_overflow_{}.yaml",
            std::process::id()
        ));
        std::fs::write(&path, yaml).unwrap();
        assert!(matches!(
            EvaluationConfig::load_from_yaml(&path),
            Err(ConfigError::InvalidParams(_))
        ));
        std::fs::remove_file(&path).unwrap();
    }

    #[test]
    fn test_missing_file() {
        assert!(matches!(
            EvaluationConfig::load_from_yaml("/nonexistent/eval.yaml"),
            Err(ConfigError::IOError(_))
        ));
    }
}
