//! FCN with a ResNet-101 Backbone
//!
//! Fully convolutional head on top of the dilated ResNet-101 backbone.
//! Supports initialization from a fixed-class pretrained record: the
//! pretrained classifier convolution predicts the wrong class count and
//! is discarded, everything else transfers.

use std::path::Path;

use burn::{
    module::Module,
    nn::{BatchNorm, BatchNormConfig, Dropout, DropoutConfig, PaddingConfig2d, Relu},
    record::CompactRecorder,
    tensor::{
        backend::Backend,
        module::interpolate,
        ops::{InterpolateMode, InterpolateOptions},
        Tensor,
    },
};
use tracing::info;

use crate::config::CoordConvParams;
use crate::model::coordconv::{ConvMode, SpatialConv, SpatialConvConfig};
use crate::model::resnet::{ResNet101, RESNET_OUT_CHANNELS};
use crate::model::PRETRAINED_CLASSES;
use crate::utils::error::{Result, TerrasegError};

/// Dense prediction head: 3x3 reduce, dropout, 1x1 classify
#[derive(Module, Debug)]
struct FcnHead<B: Backend> {
    conv: SpatialConv<B>,
    bn: BatchNorm<B, 2>,
    relu: Relu,
    dropout: Dropout,
    classifier: SpatialConv<B>,
}

impl<B: Backend> FcnHead<B> {
    fn new(num_classes: usize, mode: &ConvMode, device: &B::Device) -> Self {
        let channels = RESNET_OUT_CHANNELS / 4;

        let conv = SpatialConvConfig::new([RESNET_OUT_CHANNELS, channels], [3, 3])
            .with_padding(PaddingConfig2d::Same)
            .with_bias(false)
            .init(mode, device);
        let classifier =
            SpatialConvConfig::new([channels, num_classes], [1, 1]).init(mode, device);

        Self {
            conv,
            bn: BatchNormConfig::new(channels).init(device),
            relu: Relu::new(),
            dropout: DropoutConfig::new(0.1).init(),
            classifier,
        }
    }

    fn forward(&self, x: Tensor<B, 4>) -> Tensor<B, 4> {
        let x = self.relu.forward(self.bn.forward(self.conv.forward(x)));
        let x = self.dropout.forward(x);
        self.classifier.forward(x)
    }
}

/// FCN segmentation network over ResNet-101 features
#[derive(Module, Debug)]
pub struct FcnResNet101<B: Backend> {
    backbone: ResNet101<B>,
    head: FcnHead<B>,

    num_classes: usize,
}

impl<B: Backend> FcnResNet101<B> {
    pub fn new(num_classes: usize, mode: &ConvMode, device: &B::Device) -> Self {
        Self {
            backbone: ResNet101::new(3, true, mode, device),
            head: FcnHead::new(num_classes, mode, device),
            num_classes,
        }
    }

    /// Build from a fixed-class pretrained record, discarding the
    /// incompatible classifier convolution before transfer.
    pub fn from_pretrained(
        num_classes: usize,
        weights: &Path,
        device: &B::Device,
    ) -> Result<Self> {
        if !weights.exists() {
            return Err(TerrasegError::CheckpointNotFound(weights.to_path_buf()));
        }

        info!(
            "Transferring pretrained FCN backbone from '{}'",
            weights.display()
        );

        let recorder = CompactRecorder::new();
        let pretrained = Self::new(PRETRAINED_CLASSES, &ConvMode::Standard, device)
            .load_file(weights, &recorder, device)
            .map_err(|e| {
                TerrasegError::Model(format!("failed to load pretrained weights: {:?}", e))
            })?;
        let fresh = Self::new(num_classes, &ConvMode::Standard, device);

        // The pretrained classifier predicts the fixed class count; only
        // the layers below it transfer.
        let FcnHead {
            conv,
            bn,
            relu,
            dropout,
            classifier: _,
        } = pretrained.head;

        Ok(Self {
            backbone: pretrained.backbone,
            head: FcnHead {
                conv,
                bn,
                relu,
                dropout,
                classifier: fresh.head.classifier,
            },
            num_classes,
        })
    }

    /// Dense forward pass: [batch, 3, H, W] -> [batch, classes, H, W]
    pub fn forward(&self, x: Tensor<B, 4>) -> Tensor<B, 4> {
        let [_, _, height, width] = x.dims();

        let features = self.backbone.forward(x);
        let logits = self.head.forward(features);

        interpolate(
            logits,
            [height, width],
            InterpolateOptions::new(InterpolateMode::Bilinear),
        )
    }

    pub fn num_classes(&self) -> usize {
        self.num_classes
    }

    pub fn is_coordconv(&self) -> bool {
        self.backbone.is_coordconv()
    }

    /// Rebuild with coordinate-augmented convolutions. Any transferred
    /// pretrained parameters are not preserved.
    pub fn to_coordconv(&self, params: &CoordConvParams, device: &B::Device) -> Self {
        Self::new(self.num_classes, &ConvMode::Coord(params.clone()), device)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{default_device, DefaultBackend};

    #[test]
    fn test_fcn_output_shape() {
        let device = default_device();
        let model = FcnResNet101::<DefaultBackend>::new(3, &ConvMode::Standard, &device);

        let input = Tensor::<DefaultBackend, 4>::zeros([1, 3, 32, 32], &device);
        let output = model.forward(input);

        assert_eq!(output.dims(), [1, 3, 32, 32]);
    }

    #[test]
    fn test_fcn_pretrained_transfer() {
        let device = default_device();
        let dir = tempfile::tempdir().unwrap();
        let weights = dir.path().join("fcn_coco");

        // A fixed-class model stands in for the model-zoo record
        let zoo_model =
            FcnResNet101::<DefaultBackend>::new(PRETRAINED_CLASSES, &ConvMode::Standard, &device);
        zoo_model
            .save_file(&weights, &CompactRecorder::new())
            .unwrap();

        let model: FcnResNet101<DefaultBackend> =
            FcnResNet101::from_pretrained(4, &dir.path().join("fcn_coco.mpk"), &device).unwrap();
        assert_eq!(model.num_classes(), 4);

        let input = Tensor::<DefaultBackend, 4>::zeros([1, 3, 16, 16], &device);
        assert_eq!(model.forward(input).dims(), [1, 4, 16, 16]);
    }

    #[test]
    fn test_fcn_pretrained_missing_record() {
        let device = default_device();
        let err = FcnResNet101::<DefaultBackend>::from_pretrained(
            4,
            Path::new("/nonexistent/weights.mpk"),
            &device,
        )
        .unwrap_err();

        assert!(matches!(err, TerrasegError::CheckpointNotFound(_)));
    }
}
