//! Network architectures for semantic segmentation
//!
//! One file per architecture, all built from the swappable convolution
//! layer in [`coordconv`], all honoring the same dense forward contract:
//! `[batch, bands, H, W] -> [batch, num_classes, H, W]`.

pub mod checkpointed;
pub mod coordconv;
pub mod deeplab;
pub mod fcn;
pub mod inception;
pub mod resnet;
pub mod ternausnet;
pub mod unet;

// Re-export main types for convenience
pub use checkpointed::CheckpointedUNet;
pub use coordconv::{AddCoords, ConvMode, CoordConv2d, SpatialConv, SpatialConvConfig};
pub use deeplab::DeepLabV3ResNet101;
pub use fcn::FcnResNet101;
pub use inception::Inception3;
pub use resnet::ResNet101;
pub use ternausnet::TernausNet;
pub use unet::{UNet, UNetSmall};

use burn::{
    module::Module,
    tensor::{backend::Backend, Tensor},
};

use crate::config::CoordConvParams;

/// Minimum number of output classes; background is always assumed
pub const MIN_NUM_CLASSES: usize = 2;

/// Band count required by the RGB-constrained architectures
pub const RGB_BANDS: usize = 3;

/// Class count of the fixed-class pretrained records (COCO layout)
pub const PRETRAINED_CLASSES: usize = 21;

/// A constructed segmentation network, ready for training or inference
#[derive(Module, Debug)]
pub enum SegmentationModel<B: Backend> {
    UNetSmall(UNetSmall<B>),
    UNet(UNet<B>),
    CheckpointedUNet(CheckpointedUNet<B>),
    TernausNet(TernausNet<B>),
    Inception(Inception3<B>),
    FcnResNet101(FcnResNet101<B>),
    DeepLabV3(DeepLabV3ResNet101<B>),
}

impl<B: Backend> SegmentationModel<B> {
    /// Dense forward pass: [batch, bands, H, W] -> [batch, classes, H, W]
    pub fn forward(&self, x: Tensor<B, 4>) -> Tensor<B, 4> {
        match self {
            SegmentationModel::UNetSmall(model) => model.forward(x),
            SegmentationModel::UNet(model) => model.forward(x),
            SegmentationModel::CheckpointedUNet(model) => model.forward(x),
            SegmentationModel::TernausNet(model) => model.forward(x),
            SegmentationModel::Inception(model) => model.forward(x),
            SegmentationModel::FcnResNet101(model) => model.forward(x),
            SegmentationModel::DeepLabV3(model) => model.forward(x),
        }
    }

    /// Number of output classes the network was built for
    pub fn num_classes(&self) -> usize {
        match self {
            SegmentationModel::UNetSmall(model) => model.num_classes(),
            SegmentationModel::UNet(model) => model.num_classes(),
            SegmentationModel::CheckpointedUNet(model) => model.num_classes(),
            SegmentationModel::TernausNet(model) => model.num_classes(),
            SegmentationModel::Inception(model) => model.num_classes(),
            SegmentationModel::FcnResNet101(model) => model.num_classes(),
            SegmentationModel::DeepLabV3(model) => model.num_classes(),
        }
    }

    /// Whether the network's convolutions are coordinate-augmented
    pub fn is_coordconv(&self) -> bool {
        match self {
            SegmentationModel::UNetSmall(model) => model.is_coordconv(),
            SegmentationModel::UNet(model) => model.is_coordconv(),
            SegmentationModel::CheckpointedUNet(model) => model.is_coordconv(),
            SegmentationModel::TernausNet(model) => model.is_coordconv(),
            SegmentationModel::Inception(model) => model.is_coordconv(),
            SegmentationModel::FcnResNet101(model) => model.is_coordconv(),
            SegmentationModel::DeepLabV3(model) => model.is_coordconv(),
        }
    }
}

/// Structurally replace every ordinary convolution in the model with a
/// coordinate-augmented equivalent.
///
/// The replacement layers are freshly initialized: parameters already
/// loaded into the model (including pretrained-backbone transfers) are
/// not preserved. Load checkpoints after converting, not before.
pub fn swap_coordconv_layers<B: Backend>(
    model: SegmentationModel<B>,
    params: &CoordConvParams,
    device: &B::Device,
) -> SegmentationModel<B> {
    match model {
        SegmentationModel::UNetSmall(model) => {
            SegmentationModel::UNetSmall(model.to_coordconv(params, device))
        }
        SegmentationModel::UNet(model) => {
            SegmentationModel::UNet(model.to_coordconv(params, device))
        }
        SegmentationModel::CheckpointedUNet(model) => {
            SegmentationModel::CheckpointedUNet(model.to_coordconv(params, device))
        }
        SegmentationModel::TernausNet(model) => {
            SegmentationModel::TernausNet(model.to_coordconv(params, device))
        }
        SegmentationModel::Inception(model) => {
            SegmentationModel::Inception(model.to_coordconv(params, device))
        }
        SegmentationModel::FcnResNet101(model) => {
            SegmentationModel::FcnResNet101(model.to_coordconv(params, device))
        }
        SegmentationModel::DeepLabV3(model) => {
            SegmentationModel::DeepLabV3(model.to_coordconv(params, device))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{default_device, DefaultBackend};

    #[test]
    fn test_swap_replaces_convolutions() {
        let device = default_device();
        let model = SegmentationModel::UNetSmall(UNetSmall::<DefaultBackend>::new(
            2,
            3,
            false,
            0.5,
            &ConvMode::Standard,
            &device,
        ));
        assert!(!model.is_coordconv());

        let converted = swap_coordconv_layers(model, &CoordConvParams::default(), &device);
        assert!(converted.is_coordconv());
        assert_eq!(converted.num_classes(), 2);
    }
}
