//! Model Factory
//!
//! Selects and constructs exactly one network variant from the
//! configuration, optionally converts its convolutions to
//! coordinate-augmented layers, and resolves which checkpoint (if any)
//! the caller should load into it. Applying the checkpoint's parameters
//! to the model is left to the caller.

use std::fmt;
use std::str::FromStr;

use burn::tensor::backend::Backend;
use tracing::{info, warn};

use crate::checkpoint::{load_checkpoint, Checkpoint};
use crate::config::NetConfig;
use crate::model::{
    swap_coordconv_layers, CheckpointedUNet, ConvMode, DeepLabV3ResNet101, FcnResNet101,
    Inception3, SegmentationModel, TernausNet, UNet, UNetSmall, MIN_NUM_CLASSES, RGB_BANDS,
};
use crate::utils::error::{Result, TerrasegError};

/// The supported architectures, as a typed, normalized model name
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ModelKind {
    UNetSmall,
    UNet,
    CheckpointedUNet,
    TernausNet,
    Inception,
    FcnResNet101,
    DeepLabV3ResNet101,
}

impl ModelKind {
    /// Every supported kind, in declaration order
    pub const ALL: [ModelKind; 7] = [
        ModelKind::UNetSmall,
        ModelKind::UNet,
        ModelKind::CheckpointedUNet,
        ModelKind::TernausNet,
        ModelKind::Inception,
        ModelKind::FcnResNet101,
        ModelKind::DeepLabV3ResNet101,
    ];

    /// Canonical lowercase name, as used in configuration files
    pub fn as_str(&self) -> &'static str {
        match self {
            ModelKind::UNetSmall => "unetsmall",
            ModelKind::UNet => "unet",
            ModelKind::CheckpointedUNet => "checkpointed_unet",
            ModelKind::TernausNet => "ternausnet",
            ModelKind::Inception => "inception",
            ModelKind::FcnResNet101 => "fcn_resnet101",
            ModelKind::DeepLabV3ResNet101 => "deeplabv3_resnet101",
        }
    }

    /// Whether the architecture is defined for 3-band input only
    pub fn requires_rgb(&self) -> bool {
        matches!(
            self,
            ModelKind::TernausNet | ModelKind::FcnResNet101 | ModelKind::DeepLabV3ResNet101
        )
    }
}

impl fmt::Display for ModelKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ModelKind {
    type Err = TerrasegError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "unetsmall" => Ok(ModelKind::UNetSmall),
            "unet" => Ok(ModelKind::UNet),
            "checkpointed_unet" => Ok(ModelKind::CheckpointedUNet),
            "ternausnet" => Ok(ModelKind::TernausNet),
            "inception" => Ok(ModelKind::Inception),
            "fcn_resnet101" => Ok(ModelKind::FcnResNet101),
            "deeplabv3_resnet101" => Ok(ModelKind::DeepLabV3ResNet101),
            _ => Err(TerrasegError::UnknownModel(s.to_string())),
        }
    }
}

/// Select and construct the configured network.
///
/// Returns the constructed model, the resolved checkpoint (not yet
/// loaded into the model), and the normalized model name. When
/// coordinate-convolution conversion is requested it runs before the
/// checkpoint is resolved: the conversion does not preserve loaded
/// parameters, so a checkpoint must be applied to the converted model.
pub fn build_network<B: Backend>(
    config: &NetConfig,
    inference: bool,
    device: &B::Device,
) -> Result<(SegmentationModel<B>, Option<Checkpoint>, ModelKind)> {
    let kind: ModelKind = config.global.model_name.parse()?;

    let mut num_classes = config.global.num_classes;
    if num_classes == 1 {
        warn!(
            "configuration specified 1 class, but the model is instantiated \
             with a minimum of two ('background' is assumed to exist)"
        );
        num_classes = MIN_NUM_CLASSES;
    }

    let bands = config.global.number_of_bands;
    if kind.requires_rgb() && bands != RGB_BANDS {
        return Err(TerrasegError::IncompatibleBands {
            model: kind.to_string(),
            expected: RGB_BANDS,
            actual: bands,
        });
    }

    info!(
        "Building model '{}' ({} classes, {} bands)",
        kind, num_classes, bands
    );

    let dropout = config.training.dropout;
    let dropout_prob = config.training.dropout_prob;
    let mode = ConvMode::Standard;
    let pretrained = config.global.pretrained_weights.as_deref();

    let model = match kind {
        ModelKind::UNetSmall => SegmentationModel::UNetSmall(UNetSmall::new(
            num_classes,
            bands,
            dropout,
            dropout_prob,
            &mode,
            device,
        )),
        ModelKind::UNet => SegmentationModel::UNet(UNet::new(
            num_classes,
            bands,
            dropout,
            dropout_prob,
            &mode,
            device,
        )),
        ModelKind::CheckpointedUNet => SegmentationModel::CheckpointedUNet(CheckpointedUNet::new(
            num_classes,
            bands,
            dropout,
            dropout_prob,
            &mode,
            device,
        )),
        ModelKind::TernausNet => {
            SegmentationModel::TernausNet(TernausNet::new(num_classes, &mode, device))
        }
        ModelKind::Inception => {
            SegmentationModel::Inception(Inception3::new(num_classes, bands, &mode, device))
        }
        ModelKind::FcnResNet101 => SegmentationModel::FcnResNet101(match pretrained {
            Some(weights) => FcnResNet101::from_pretrained(num_classes, weights, device)?,
            None => FcnResNet101::new(num_classes, &mode, device),
        }),
        ModelKind::DeepLabV3ResNet101 => SegmentationModel::DeepLabV3(match pretrained {
            Some(weights) => DeepLabV3ResNet101::from_pretrained(num_classes, weights, device)?,
            None => DeepLabV3ResNet101::new(num_classes, &mode, device),
        }),
    };

    let model = if config.global.coordconv.convert {
        info!("Converting convolutions to coordinate-augmented layers");
        swap_coordconv_layers(model, &config.global.coordconv, device)
    } else {
        model
    };

    let checkpoint = if let Some(path) = &config.training.state_dict_path {
        Some(load_checkpoint(path)?)
    } else if inference {
        let path = config.inference.state_dict_path.as_ref().ok_or_else(|| {
            TerrasegError::Config(
                "inference requested but inference.state_dict_path is not set".to_string(),
            )
        })?;
        Some(load_checkpoint(path)?)
    } else {
        None
    };

    Ok((model, checkpoint, kind))
}

#[cfg(test)]
mod tests {
    use std::path::{Path, PathBuf};

    use super::*;
    use crate::backend::{default_device, DefaultBackend};
    use crate::checkpoint::{save_checkpoint, StateDict, TensorEntry};

    fn write_checkpoint(path: &Path, tag: &str) {
        let mut state = StateDict::new();
        state.insert(
            "head.weight".to_string(),
            TensorEntry {
                shape: vec![2],
                data: vec![0.0, 1.0],
            },
        );
        let mut checkpoint = Checkpoint::from_state_dict(state);
        checkpoint
            .metadata
            .insert("tag".to_string(), serde_json::json!(tag));
        save_checkpoint(path, &checkpoint).unwrap();
    }

    fn tag(checkpoint: &Checkpoint) -> &str {
        checkpoint.metadata["tag"].as_str().unwrap()
    }

    #[test]
    fn test_model_kind_parse_case_insensitive() {
        for kind in ModelKind::ALL {
            assert_eq!(kind.as_str().parse::<ModelKind>().unwrap(), kind);
            assert_eq!(
                kind.as_str().to_uppercase().parse::<ModelKind>().unwrap(),
                kind
            );
        }
        assert_eq!("UNetSmall".parse::<ModelKind>().unwrap(), ModelKind::UNetSmall);
        assert_eq!(
            "DeepLabV3_ResNet101".parse::<ModelKind>().unwrap(),
            ModelKind::DeepLabV3ResNet101
        );
        assert!("deeplab_v3".parse::<ModelKind>().is_err());
    }

    #[test]
    fn test_unknown_model_name_fails() {
        let config = NetConfig::new("hrnet", 4, 3);
        let device = default_device();

        let err = build_network::<DefaultBackend>(&config, false, &device).unwrap_err();
        assert!(matches!(err, TerrasegError::UnknownModel(_)));
    }

    #[test]
    fn test_builds_expected_variant() {
        let device = default_device();

        let (model, checkpoint, kind) = build_network::<DefaultBackend>(
            &NetConfig::new("UnetSmall", 4, 5),
            false,
            &device,
        )
        .unwrap();
        assert!(matches!(model, SegmentationModel::UNetSmall(_)));
        assert!(checkpoint.is_none());
        assert_eq!(kind, ModelKind::UNetSmall);
        assert_eq!(kind.to_string(), "unetsmall");

        let (model, _, kind) =
            build_network::<DefaultBackend>(&NetConfig::new("TERNAUSNET", 4, 3), false, &device)
                .unwrap();
        assert!(matches!(model, SegmentationModel::TernausNet(_)));
        assert_eq!(kind, ModelKind::TernausNet);
    }

    #[test]
    fn test_single_class_is_coerced_to_two() {
        let device = default_device();
        let config = NetConfig::new("unetsmall", 1, 3);

        let (model, _, _) = build_network::<DefaultBackend>(&config, false, &device).unwrap();
        assert_eq!(model.num_classes(), MIN_NUM_CLASSES);
    }

    #[test]
    fn test_band_constraint_fails_before_construction() {
        let device = default_device();

        for name in ["ternausnet", "fcn_resnet101", "deeplabv3_resnet101"] {
            let config = NetConfig::new(name, 4, 4);
            let err = build_network::<DefaultBackend>(&config, false, &device).unwrap_err();
            assert!(
                matches!(err, TerrasegError::IncompatibleBands { expected: 3, actual: 4, .. }),
                "{} accepted 4 bands",
                name
            );
        }
    }

    #[test]
    fn test_training_path_takes_precedence() {
        let device = default_device();
        let dir = tempfile::tempdir().unwrap();

        let training = dir.path().join("training.json");
        let inference = dir.path().join("inference.json");
        write_checkpoint(&training, "training");
        write_checkpoint(&inference, "inference");

        let mut config = NetConfig::new("unetsmall", 2, 3);
        config.training.state_dict_path = Some(training);
        config.inference.state_dict_path = Some(inference);

        // Training override wins regardless of the inference flag
        let (_, checkpoint, _) =
            build_network::<DefaultBackend>(&config, false, &device).unwrap();
        assert_eq!(tag(&checkpoint.unwrap()), "training");

        let (_, checkpoint, _) = build_network::<DefaultBackend>(&config, true, &device).unwrap();
        assert_eq!(tag(&checkpoint.unwrap()), "training");
    }

    #[test]
    fn test_inference_path_used_when_no_training_override() {
        let device = default_device();
        let dir = tempfile::tempdir().unwrap();

        let inference = dir.path().join("inference.json");
        write_checkpoint(&inference, "inference");

        let mut config = NetConfig::new("unetsmall", 2, 3);
        config.inference.state_dict_path = Some(inference);

        let (_, checkpoint, _) = build_network::<DefaultBackend>(&config, true, &device).unwrap();
        assert_eq!(tag(&checkpoint.unwrap()), "inference");

        // Without the inference flag no checkpoint is resolved
        let (_, checkpoint, _) =
            build_network::<DefaultBackend>(&config, false, &device).unwrap();
        assert!(checkpoint.is_none());
    }

    #[test]
    fn test_inference_without_path_is_config_error() {
        let device = default_device();
        let config = NetConfig::new("unetsmall", 2, 3);

        let err = build_network::<DefaultBackend>(&config, true, &device).unwrap_err();
        assert!(matches!(err, TerrasegError::Config(_)));
    }

    #[test]
    fn test_missing_checkpoint_file_fails() {
        let device = default_device();
        let mut config = NetConfig::new("unetsmall", 2, 3);
        config.training.state_dict_path = Some(PathBuf::from("/nonexistent/checkpoint.json"));

        let err = build_network::<DefaultBackend>(&config, false, &device).unwrap_err();
        assert!(matches!(err, TerrasegError::CheckpointNotFound(_)));
    }

    #[test]
    fn test_coordconv_conversion_returns_checkpoint_unloaded() {
        let device = default_device();
        let dir = tempfile::tempdir().unwrap();

        let training = dir.path().join("training.json");
        write_checkpoint(&training, "training");

        let mut config = NetConfig::new("unetsmall", 2, 3);
        config.global.coordconv.convert = true;
        config.training.state_dict_path = Some(training);

        let (model, checkpoint, _) =
            build_network::<DefaultBackend>(&config, false, &device).unwrap();

        // Convolutions are structurally replaced, and the checkpoint is
        // handed back for the caller to apply to the converted model
        assert!(model.is_coordconv());
        assert_eq!(tag(&checkpoint.unwrap()), "training");
    }
}
