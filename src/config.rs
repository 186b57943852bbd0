//! Network Configuration Module
//!
//! Defines the nested configuration consumed by the model factory:
//! a `global` section selecting the architecture, a `training` section
//! with regularization settings and an optional checkpoint override, and
//! an `inference` section naming the checkpoint used at prediction time.
//!
//! Configurations are persisted as JSON. Optional fields carry serde
//! defaults, so a minimal configuration only needs the `global` section.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::utils::error::{Result, TerrasegError};

/// Top-level configuration for model selection
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NetConfig {
    /// Architecture selection and input geometry
    pub global: GlobalParams,

    /// Training-time settings
    #[serde(default)]
    pub training: TrainingParams,

    /// Inference-time settings
    #[serde(default)]
    pub inference: InferenceParams,
}

/// Architecture selection and input geometry
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GlobalParams {
    /// Name of the architecture to instantiate (matched case-insensitively)
    pub model_name: String,

    /// Number of output classes; a request of 1 is coerced to 2
    pub num_classes: usize,

    /// Number of input bands (spectral channels)
    pub number_of_bands: usize,

    /// Local Burn record holding fixed-class pretrained weights for the
    /// backbone architectures
    #[serde(default)]
    pub pretrained_weights: Option<PathBuf>,

    /// Coordinate-convolution conversion settings
    #[serde(default)]
    pub coordconv: CoordConvParams,
}

/// Training-time settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TrainingParams {
    /// Whether dropout layers are inserted in dropout-capable architectures
    pub dropout: bool,

    /// Dropout probability, in [0.0, 1.0)
    pub dropout_prob: f64,

    /// Checkpoint to resume from; takes precedence over the inference path
    pub state_dict_path: Option<PathBuf>,
}

impl Default for TrainingParams {
    fn default() -> Self {
        Self {
            dropout: false,
            dropout_prob: 0.5,
            state_dict_path: None,
        }
    }
}

/// Inference-time settings
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct InferenceParams {
    /// Checkpoint holding the trained weights used for prediction
    pub state_dict_path: Option<PathBuf>,
}

/// Coordinate-convolution conversion settings
///
/// Field defaults mirror the behavior of leaving the keys out of the
/// configuration entirely.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CoordConvParams {
    /// Replace ordinary convolutions with coordinate-augmented ones
    pub convert: bool,

    /// Center coordinate values around zero ([-1, 1] instead of [0, 1])
    pub centered: bool,

    /// Normalize coordinate values by the spatial extent
    pub normalized: bool,

    /// Standard deviation of Gaussian noise added to coordinate channels
    pub noise: Option<f64>,

    /// Append a radius channel in addition to the x/y channels
    pub radius_channel: bool,

    /// Multiplier applied to coordinate values
    pub scale: f64,
}

impl Default for CoordConvParams {
    fn default() -> Self {
        Self {
            convert: false,
            centered: true,
            normalized: true,
            noise: None,
            radius_channel: false,
            scale: 1.0,
        }
    }
}

impl NetConfig {
    /// Create a configuration for the given model with sensible defaults
    pub fn new(model_name: &str, num_classes: usize, number_of_bands: usize) -> Self {
        Self {
            global: GlobalParams {
                model_name: model_name.to_string(),
                num_classes,
                number_of_bands,
                pretrained_weights: None,
                coordconv: CoordConvParams::default(),
            },
            training: TrainingParams::default(),
            inference: InferenceParams::default(),
        }
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        if self.global.model_name.trim().is_empty() {
            return Err(TerrasegError::Config(
                "model_name must not be empty".to_string(),
            ));
        }

        if self.global.num_classes == 0 {
            return Err(TerrasegError::Config(
                "num_classes must be greater than 0".to_string(),
            ));
        }

        if self.global.number_of_bands == 0 {
            return Err(TerrasegError::Config(
                "number_of_bands must be greater than 0".to_string(),
            ));
        }

        if self.training.dropout_prob < 0.0 || self.training.dropout_prob >= 1.0 {
            return Err(TerrasegError::Config(
                "dropout_prob must be in range [0.0, 1.0)".to_string(),
            ));
        }

        if self.global.coordconv.scale <= 0.0 {
            return Err(TerrasegError::Config(
                "coordconv scale must be positive".to_string(),
            ));
        }

        if let Some(noise) = self.global.coordconv.noise {
            if noise < 0.0 {
                return Err(TerrasegError::Config(
                    "coordconv noise must be non-negative".to_string(),
                ));
            }
        }

        Ok(())
    }

    /// Save configuration to a JSON file
    pub fn save(&self, path: &Path) -> Result<()> {
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(path, json)?;
        Ok(())
    }

    /// Load configuration from a JSON file
    pub fn load(path: &Path) -> Result<Self> {
        let json = std::fs::read_to_string(path)?;
        let config: Self = serde_json::from_str(&json)?;
        config.validate()?;
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_defaults() {
        let config = NetConfig::new("unet", 5, 4);
        assert_eq!(config.global.model_name, "unet");
        assert_eq!(config.global.num_classes, 5);
        assert_eq!(config.global.number_of_bands, 4);
        assert!(!config.training.dropout);
        assert_eq!(config.training.dropout_prob, 0.5);
        assert!(config.training.state_dict_path.is_none());
        assert!(config.inference.state_dict_path.is_none());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_coordconv_defaults() {
        let params = CoordConvParams::default();
        assert!(!params.convert);
        assert!(params.centered);
        assert!(params.normalized);
        assert!(params.noise.is_none());
        assert!(!params.radius_channel);
        assert_eq!(params.scale, 1.0);
    }

    #[test]
    fn test_minimal_json_gets_defaults() {
        let json = r#"{
            "global": {
                "model_name": "unetsmall",
                "num_classes": 4,
                "number_of_bands": 3
            }
        }"#;

        let config: NetConfig = serde_json::from_str(json).unwrap();
        assert!(!config.global.coordconv.convert);
        assert!(config.global.coordconv.centered);
        assert_eq!(config.global.coordconv.scale, 1.0);
        assert_eq!(config.training.dropout_prob, 0.5);
        assert!(config.inference.state_dict_path.is_none());
    }

    #[test]
    fn test_validation_rejects_bad_values() {
        let mut config = NetConfig::new("unet", 0, 3);
        assert!(config.validate().is_err());

        config = NetConfig::new("unet", 2, 0);
        assert!(config.validate().is_err());

        config = NetConfig::new("unet", 2, 3);
        config.training.dropout_prob = 1.5;
        assert!(config.validate().is_err());

        config = NetConfig::new("unet", 2, 3);
        config.global.coordconv.scale = 0.0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_save_load_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");

        let mut config = NetConfig::new("deeplabv3_resnet101", 7, 3);
        config.training.dropout = true;
        config.training.state_dict_path = Some(PathBuf::from("output/checkpoint.json"));

        config.save(&path).unwrap();
        let loaded = NetConfig::load(&path).unwrap();

        assert_eq!(loaded.global.model_name, "deeplabv3_resnet101");
        assert_eq!(loaded.global.num_classes, 7);
        assert!(loaded.training.dropout);
        assert_eq!(
            loaded.training.state_dict_path,
            Some(PathBuf::from("output/checkpoint.json"))
        );
    }
}
