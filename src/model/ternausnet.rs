//! TernausNet: U-Net with a VGG11-style Encoder
//!
//! Encoder follows the VGG11 layout (single convolutions in the first
//! two stages, doubled convolutions in the deeper ones, no batch norm),
//! decoder upsamples with transposed convolutions and concatenates the
//! matching encoder activation at every stage. RGB-only: the VGG11
//! layout is defined for 3-band input.

use burn::{
    module::Module,
    nn::{
        conv::{ConvTranspose2d, ConvTranspose2dConfig},
        pool::{MaxPool2d, MaxPool2dConfig},
        PaddingConfig2d, Relu,
    },
    tensor::{backend::Backend, Tensor},
};

use crate::config::CoordConvParams;
use crate::model::coordconv::{ConvMode, SpatialConv, SpatialConvConfig};
use crate::model::RGB_BANDS;

/// 3x3 convolution followed by ReLU
#[derive(Module, Debug)]
struct ConvRelu<B: Backend> {
    conv: SpatialConv<B>,
    relu: Relu,
}

impl<B: Backend> ConvRelu<B> {
    fn new(in_channels: usize, out_channels: usize, mode: &ConvMode, device: &B::Device) -> Self {
        let conv = SpatialConvConfig::new([in_channels, out_channels], [3, 3])
            .with_padding(PaddingConfig2d::Same)
            .init(mode, device);

        Self {
            conv,
            relu: Relu::new(),
        }
    }

    fn forward(&self, x: Tensor<B, 4>) -> Tensor<B, 4> {
        self.relu.forward(self.conv.forward(x))
    }
}

/// Decoder stage: 3x3 convolution, then a 2x upsampling transposed
/// convolution
#[derive(Module, Debug)]
struct UpBlock<B: Backend> {
    conv: ConvRelu<B>,
    up: ConvTranspose2d<B>,
    relu: Relu,
}

impl<B: Backend> UpBlock<B> {
    fn new(
        in_channels: usize,
        middle_channels: usize,
        out_channels: usize,
        mode: &ConvMode,
        device: &B::Device,
    ) -> Self {
        let up = ConvTranspose2dConfig::new([middle_channels, out_channels], [3, 3])
            .with_stride([2, 2])
            .with_padding([1, 1])
            .with_padding_out([1, 1])
            .init(device);

        Self {
            conv: ConvRelu::new(in_channels, middle_channels, mode, device),
            up,
            relu: Relu::new(),
        }
    }

    fn forward(&self, x: Tensor<B, 4>) -> Tensor<B, 4> {
        let x = self.conv.forward(x);
        self.relu.forward(self.up.forward(x))
    }
}

/// TernausNet segmentation network (VGG11 encoder, 3-band input)
#[derive(Module, Debug)]
pub struct TernausNet<B: Backend> {
    conv1: ConvRelu<B>,
    conv2: ConvRelu<B>,
    conv3a: ConvRelu<B>,
    conv3b: ConvRelu<B>,
    conv4a: ConvRelu<B>,
    conv4b: ConvRelu<B>,
    conv5a: ConvRelu<B>,
    conv5b: ConvRelu<B>,
    pool: MaxPool2d,

    center: UpBlock<B>,
    dec5: UpBlock<B>,
    dec4: UpBlock<B>,
    dec3: UpBlock<B>,
    dec2: UpBlock<B>,
    dec1: ConvRelu<B>,
    head: SpatialConv<B>,

    num_classes: usize,
}

impl<B: Backend> TernausNet<B> {
    pub fn new(num_classes: usize, mode: &ConvMode, device: &B::Device) -> Self {
        let head = SpatialConvConfig::new([32, num_classes], [1, 1]).init(mode, device);

        Self {
            conv1: ConvRelu::new(RGB_BANDS, 64, mode, device),
            conv2: ConvRelu::new(64, 128, mode, device),
            conv3a: ConvRelu::new(128, 256, mode, device),
            conv3b: ConvRelu::new(256, 256, mode, device),
            conv4a: ConvRelu::new(256, 512, mode, device),
            conv4b: ConvRelu::new(512, 512, mode, device),
            conv5a: ConvRelu::new(512, 512, mode, device),
            conv5b: ConvRelu::new(512, 512, mode, device),
            pool: MaxPool2dConfig::new([2, 2]).with_strides([2, 2]).init(),

            center: UpBlock::new(512, 512, 256, mode, device),
            dec5: UpBlock::new(768, 512, 256, mode, device),
            dec4: UpBlock::new(768, 512, 128, mode, device),
            dec3: UpBlock::new(384, 256, 64, mode, device),
            dec2: UpBlock::new(192, 128, 32, mode, device),
            dec1: ConvRelu::new(96, 32, mode, device),
            head,

            num_classes,
        }
    }

    /// Dense forward pass: [batch, 3, H, W] -> [batch, classes, H, W].
    /// H and W must be divisible by 32.
    pub fn forward(&self, x: Tensor<B, 4>) -> Tensor<B, 4> {
        let c1 = self.conv1.forward(x);
        let c2 = self.conv2.forward(self.pool.forward(c1.clone()));
        let c3 = self.conv3b.forward(self.conv3a.forward(self.pool.forward(c2.clone())));
        let c4 = self.conv4b.forward(self.conv4a.forward(self.pool.forward(c3.clone())));
        let c5 = self.conv5b.forward(self.conv5a.forward(self.pool.forward(c4.clone())));

        let center = self.center.forward(self.pool.forward(c5.clone()));
        let d5 = self.dec5.forward(Tensor::cat(vec![center, c5], 1));
        let d4 = self.dec4.forward(Tensor::cat(vec![d5, c4], 1));
        let d3 = self.dec3.forward(Tensor::cat(vec![d4, c3], 1));
        let d2 = self.dec2.forward(Tensor::cat(vec![d3, c2], 1));
        let d1 = self.dec1.forward(Tensor::cat(vec![d2, c1], 1));

        self.head.forward(d1)
    }

    pub fn num_classes(&self) -> usize {
        self.num_classes
    }

    pub fn is_coordconv(&self) -> bool {
        self.conv1.conv.is_coord()
    }

    pub fn to_coordconv(&self, params: &CoordConvParams, device: &B::Device) -> Self {
        Self::new(self.num_classes, &ConvMode::Coord(params.clone()), device)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{default_device, DefaultBackend};

    #[test]
    fn test_ternausnet_output_shape() {
        let device = default_device();
        let model = TernausNet::<DefaultBackend>::new(4, &ConvMode::Standard, &device);

        let input = Tensor::<DefaultBackend, 4>::zeros([1, 3, 32, 32], &device);
        let output = model.forward(input);

        assert_eq!(output.dims(), [1, 4, 32, 32]);
    }

    #[test]
    fn test_ternausnet_coordconv_rebuild() {
        let device = default_device();
        let model = TernausNet::<DefaultBackend>::new(2, &ConvMode::Standard, &device);
        assert!(!model.is_coordconv());

        let converted = model.to_coordconv(&CoordConvParams::default(), &device);
        assert!(converted.is_coordconv());
        assert_eq!(converted.num_classes(), 2);
    }
}
