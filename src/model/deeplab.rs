//! DeepLabV3 with a ResNet-101 Backbone
//!
//! Atrous spatial pyramid pooling over dilated ResNet-101 features,
//! followed by a dense classifier. Pretrained initialization mirrors the
//! FCN variant: the fixed-class classifier convolution is discarded, the
//! rest transfers.

use std::path::Path;

use burn::{
    module::Module,
    nn::{
        pool::{AdaptiveAvgPool2d, AdaptiveAvgPool2dConfig},
        BatchNorm, BatchNormConfig, Dropout, DropoutConfig, PaddingConfig2d, Relu,
    },
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

const ASPP_CHANNELS: usize = 256;
const ASPP_RATES: [usize; 3] = [12, 24, 36];

/// One ASPP branch: convolution (pointwise or dilated 3x3) + BN + ReLU
#[derive(Module, Debug)]
struct AsppConv<B: Backend> {
    conv: SpatialConv<B>,
    bn: BatchNorm<B, 2>,
    relu: Relu,
}

impl<B: Backend> AsppConv<B> {
    fn pointwise(in_channels: usize, mode: &ConvMode, device: &B::Device) -> Self {
        let conv = SpatialConvConfig::new([in_channels, ASPP_CHANNELS], [1, 1])
            .with_bias(false)
            .init(mode, device);
        Self {
            conv,
            bn: BatchNormConfig::new(ASPP_CHANNELS).init(device),
            relu: Relu::new(),
        }
    }

    fn dilated(in_channels: usize, rate: usize, mode: &ConvMode, device: &B::Device) -> Self {
        let conv = SpatialConvConfig::new([in_channels, ASPP_CHANNELS], [3, 3])
            .with_dilation([rate, rate])
            .with_padding(PaddingConfig2d::Explicit(rate, rate))
            .with_bias(false)
            .init(mode, device);
        Self {
            conv,
            bn: BatchNormConfig::new(ASPP_CHANNELS).init(device),
            relu: Relu::new(),
        }
    }

    fn forward(&self, x: Tensor<B, 4>) -> Tensor<B, 4> {
        self.relu.forward(self.bn.forward(self.conv.forward(x)))
    }
}

/// Image-level ASPP branch: global pooling, projection, upsample back
#[derive(Module, Debug)]
struct AsppPooling<B: Backend> {
    pool: AdaptiveAvgPool2d,
    conv: AsppConv<B>,
}

impl<B: Backend> AsppPooling<B> {
    fn new(in_channels: usize, mode: &ConvMode, device: &B::Device) -> Self {
        Self {
            pool: AdaptiveAvgPool2dConfig::new([1, 1]).init(),
            conv: AsppConv::pointwise(in_channels, mode, device),
        }
    }

    fn forward(&self, x: Tensor<B, 4>) -> Tensor<B, 4> {
        let [_, _, height, width] = x.dims();
        let pooled = self.conv.forward(self.pool.forward(x));
        interpolate(
            pooled,
            [height, width],
            InterpolateOptions::new(InterpolateMode::Bilinear),
        )
    }
}

/// Atrous spatial pyramid pooling
#[derive(Module, Debug)]
struct Aspp<B: Backend> {
    branch1x1: AsppConv<B>,
    branch_rate1: AsppConv<B>,
    branch_rate2: AsppConv<B>,
    branch_rate3: AsppConv<B>,
    pooling: AsppPooling<B>,
    project: AsppConv<B>,
    dropout: Dropout,
}

impl<B: Backend> Aspp<B> {
    fn new(in_channels: usize, mode: &ConvMode, device: &B::Device) -> Self {
        Self {
            branch1x1: AsppConv::pointwise(in_channels, mode, device),
            branch_rate1: AsppConv::dilated(in_channels, ASPP_RATES[0], mode, device),
            branch_rate2: AsppConv::dilated(in_channels, ASPP_RATES[1], mode, device),
            branch_rate3: AsppConv::dilated(in_channels, ASPP_RATES[2], mode, device),
            pooling: AsppPooling::new(in_channels, mode, device),
            project: AsppConv::pointwise(ASPP_CHANNELS * 5, mode, device),
            dropout: DropoutConfig::new(0.5).init(),
        }
    }

    fn forward(&self, x: Tensor<B, 4>) -> Tensor<B, 4> {
        let branches = vec![
            self.branch1x1.forward(x.clone()),
            self.branch_rate1.forward(x.clone()),
            self.branch_rate2.forward(x.clone()),
            self.branch_rate3.forward(x.clone()),
            self.pooling.forward(x),
        ];

        let y = self.project.forward(Tensor::cat(branches, 1));
        self.dropout.forward(y)
    }
}

/// DeepLabV3 head: ASPP, 3x3 refinement, 1x1 classifier
#[derive(Module, Debug)]
struct DeepLabHead<B: Backend> {
    aspp: Aspp<B>,
    conv: SpatialConv<B>,
    bn: BatchNorm<B, 2>,
    relu: Relu,
    classifier: SpatialConv<B>,
}

impl<B: Backend> DeepLabHead<B> {
    fn new(num_classes: usize, mode: &ConvMode, device: &B::Device) -> Self {
        let conv = SpatialConvConfig::new([ASPP_CHANNELS, ASPP_CHANNELS], [3, 3])
            .with_padding(PaddingConfig2d::Same)
            .with_bias(false)
            .init(mode, device);
        let classifier =
            SpatialConvConfig::new([ASPP_CHANNELS, num_classes], [1, 1]).init(mode, device);

        Self {
            aspp: Aspp::new(RESNET_OUT_CHANNELS, mode, device),
            conv,
            bn: BatchNormConfig::new(ASPP_CHANNELS).init(device),
            relu: Relu::new(),
            classifier,
        }
    }

    fn forward(&self, x: Tensor<B, 4>) -> Tensor<B, 4> {
        let x = self.aspp.forward(x);
        let x = self.relu.forward(self.bn.forward(self.conv.forward(x)));
        self.classifier.forward(x)
    }
}

/// DeepLabV3 segmentation network over ResNet-101 features
#[derive(Module, Debug)]
pub struct DeepLabV3ResNet101<B: Backend> {
    backbone: ResNet101<B>,
    head: DeepLabHead<B>,

    num_classes: usize,
}

impl<B: Backend> DeepLabV3ResNet101<B> {
    pub fn new(num_classes: usize, mode: &ConvMode, device: &B::Device) -> Self {
        Self {
            backbone: ResNet101::new(3, true, mode, device),
            head: DeepLabHead::new(num_classes, mode, device),
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
            "Transferring pretrained DeepLabV3 backbone from '{}'",
            weights.display()
        );

        let recorder = CompactRecorder::new();
        let pretrained = Self::new(PRETRAINED_CLASSES, &ConvMode::Standard, device)
            .load_file(weights, &recorder, device)
            .map_err(|e| {
                TerrasegError::Model(format!("failed to load pretrained weights: {:?}", e))
            })?;
        let fresh = Self::new(num_classes, &ConvMode::Standard, device);

        let DeepLabHead {
            aspp,
            conv,
            bn,
            relu,
            classifier: _,
        } = pretrained.head;

        Ok(Self {
            backbone: pretrained.backbone,
            head: DeepLabHead {
                aspp,
                conv,
                bn,
                relu,
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
    fn test_deeplab_output_shape() {
        let device = default_device();
        let model = DeepLabV3ResNet101::<DefaultBackend>::new(5, &ConvMode::Standard, &device);

        let input = Tensor::<DefaultBackend, 4>::zeros([1, 3, 32, 32], &device);
        let output = model.forward(input);

        assert_eq!(output.dims(), [1, 5, 32, 32]);
    }

    #[test]
    fn test_deeplab_pretrained_transfer() {
        let device = default_device();
        let dir = tempfile::tempdir().unwrap();

        let zoo_model = DeepLabV3ResNet101::<DefaultBackend>::new(
            PRETRAINED_CLASSES,
            &ConvMode::Standard,
            &device,
        );
        zoo_model
            .save_file(dir.path().join("deeplab_coco"), &CompactRecorder::new())
            .unwrap();

        let model: DeepLabV3ResNet101<DefaultBackend> =
            DeepLabV3ResNet101::from_pretrained(7, &dir.path().join("deeplab_coco.mpk"), &device)
                .unwrap();
        assert_eq!(model.num_classes(), 7);
    }
}
