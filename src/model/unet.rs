//! U-Net Architectures for Semantic Segmentation
//!
//! Two encoder/decoder variants built from shared double-convolution
//! blocks: the full-width `UNet` (64 base filters, four downsampling
//! stages) and the compact `UNetSmall` (32 base filters, three stages).
//! Both accept an arbitrary number of input bands and optionally insert
//! dropout at the bottleneck.

use burn::{
    module::Module,
    nn::{
        conv::{ConvTranspose2d, ConvTranspose2dConfig},
        pool::{MaxPool2d, MaxPool2dConfig},
        BatchNorm, BatchNormConfig, Dropout, DropoutConfig, PaddingConfig2d, Relu,
    },
    tensor::{backend::Backend, Tensor},
};

use crate::config::CoordConvParams;
use crate::model::coordconv::{ConvMode, SpatialConv, SpatialConvConfig};

/// Two 3x3 convolutions, each followed by batch norm and ReLU
#[derive(Module, Debug)]
pub(crate) struct DoubleConv<B: Backend> {
    conv1: SpatialConv<B>,
    bn1: BatchNorm<B, 2>,
    conv2: SpatialConv<B>,
    bn2: BatchNorm<B, 2>,
    relu: Relu,
}

impl<B: Backend> DoubleConv<B> {
    pub(crate) fn new(
        in_channels: usize,
        out_channels: usize,
        mode: &ConvMode,
        device: &B::Device,
    ) -> Self {
        let conv1 = SpatialConvConfig::new([in_channels, out_channels], [3, 3])
            .with_padding(PaddingConfig2d::Same)
            .init(mode, device);
        let conv2 = SpatialConvConfig::new([out_channels, out_channels], [3, 3])
            .with_padding(PaddingConfig2d::Same)
            .init(mode, device);

        Self {
            conv1,
            bn1: BatchNormConfig::new(out_channels).init(device),
            conv2,
            bn2: BatchNormConfig::new(out_channels).init(device),
            relu: Relu::new(),
        }
    }

    pub(crate) fn forward(&self, x: Tensor<B, 4>) -> Tensor<B, 4> {
        let x = self.conv1.forward(x);
        let x = self.bn1.forward(x);
        let x = self.relu.forward(x);
        let x = self.conv2.forward(x);
        let x = self.bn2.forward(x);
        self.relu.forward(x)
    }

    pub(crate) fn is_coord(&self) -> bool {
        self.conv1.is_coord()
    }
}

/// Downsampling stage: 2x2 max pool then double convolution
#[derive(Module, Debug)]
pub(crate) struct EncoderBlock<B: Backend> {
    pool: MaxPool2d,
    conv: DoubleConv<B>,
}

impl<B: Backend> EncoderBlock<B> {
    pub(crate) fn new(
        in_channels: usize,
        out_channels: usize,
        mode: &ConvMode,
        device: &B::Device,
    ) -> Self {
        Self {
            pool: MaxPool2dConfig::new([2, 2]).with_strides([2, 2]).init(),
            conv: DoubleConv::new(in_channels, out_channels, mode, device),
        }
    }

    pub(crate) fn forward(&self, x: Tensor<B, 4>) -> Tensor<B, 4> {
        self.conv.forward(self.pool.forward(x))
    }
}

/// Upsampling stage: transposed convolution, skip concatenation, double
/// convolution
#[derive(Module, Debug)]
pub(crate) struct DecoderBlock<B: Backend> {
    up: ConvTranspose2d<B>,
    conv: DoubleConv<B>,
}

impl<B: Backend> DecoderBlock<B> {
    pub(crate) fn new(
        in_channels: usize,
        out_channels: usize,
        mode: &ConvMode,
        device: &B::Device,
    ) -> Self {
        let up = ConvTranspose2dConfig::new([in_channels, in_channels / 2], [2, 2])
            .with_stride([2, 2])
            .init(device);

        Self {
            up,
            conv: DoubleConv::new(in_channels, out_channels, mode, device),
        }
    }

    pub(crate) fn forward(&self, x: Tensor<B, 4>, skip: Tensor<B, 4>) -> Tensor<B, 4> {
        let x = self.up.forward(x);
        let x = Tensor::cat(vec![skip, x], 1);
        self.conv.forward(x)
    }
}

/// Full-width U-Net: 64 base filters, four downsampling stages
#[derive(Module, Debug)]
pub struct UNet<B: Backend> {
    inc: DoubleConv<B>,
    down1: EncoderBlock<B>,
    down2: EncoderBlock<B>,
    down3: EncoderBlock<B>,
    down4: EncoderBlock<B>,
    up1: DecoderBlock<B>,
    up2: DecoderBlock<B>,
    up3: DecoderBlock<B>,
    up4: DecoderBlock<B>,
    head: SpatialConv<B>,
    dropout: Option<Dropout>,

    num_classes: usize,
    in_channels: usize,
    dropout_prob: f64,
}

impl<B: Backend> UNet<B> {
    pub fn new(
        num_classes: usize,
        in_channels: usize,
        dropout: bool,
        dropout_prob: f64,
        mode: &ConvMode,
        device: &B::Device,
    ) -> Self {
        let head = SpatialConvConfig::new([64, num_classes], [1, 1]).init(mode, device);

        Self {
            inc: DoubleConv::new(in_channels, 64, mode, device),
            down1: EncoderBlock::new(64, 128, mode, device),
            down2: EncoderBlock::new(128, 256, mode, device),
            down3: EncoderBlock::new(256, 512, mode, device),
            down4: EncoderBlock::new(512, 1024, mode, device),
            up1: DecoderBlock::new(1024, 512, mode, device),
            up2: DecoderBlock::new(512, 256, mode, device),
            up3: DecoderBlock::new(256, 128, mode, device),
            up4: DecoderBlock::new(128, 64, mode, device),
            head,
            dropout: dropout.then(|| DropoutConfig::new(dropout_prob).init()),
            num_classes,
            in_channels,
            dropout_prob,
        }
    }

    /// Dense forward pass: [batch, bands, H, W] -> [batch, classes, H, W]
    pub fn forward(&self, x: Tensor<B, 4>) -> Tensor<B, 4> {
        let x1 = self.inc.forward(x);
        let x2 = self.down1.forward(x1.clone());
        let x3 = self.down2.forward(x2.clone());
        let x4 = self.down3.forward(x3.clone());
        let mut x5 = self.down4.forward(x4.clone());

        if let Some(dropout) = &self.dropout {
            x5 = dropout.forward(x5);
        }

        let y = self.up1.forward(x5, x4);
        let y = self.up2.forward(y, x3);
        let y = self.up3.forward(y, x2);
        let y = self.up4.forward(y, x1);
        self.head.forward(y)
    }

    pub fn num_classes(&self) -> usize {
        self.num_classes
    }

    pub fn is_coordconv(&self) -> bool {
        self.inc.is_coord()
    }

    /// Rebuild with coordinate-augmented convolutions. Parameters of the
    /// replaced layers are not preserved.
    pub fn to_coordconv(&self, params: &CoordConvParams, device: &B::Device) -> Self {
        Self::new(
            self.num_classes,
            self.in_channels,
            self.dropout.is_some(),
            self.dropout_prob,
            &ConvMode::Coord(params.clone()),
            device,
        )
    }
}

/// Compact U-Net: 32 base filters, three downsampling stages
#[derive(Module, Debug)]
pub struct UNetSmall<B: Backend> {
    pub(crate) inc: DoubleConv<B>,
    pub(crate) down1: EncoderBlock<B>,
    pub(crate) down2: EncoderBlock<B>,
    pub(crate) down3: EncoderBlock<B>,
    pub(crate) up1: DecoderBlock<B>,
    pub(crate) up2: DecoderBlock<B>,
    pub(crate) up3: DecoderBlock<B>,
    pub(crate) head: SpatialConv<B>,
    pub(crate) dropout: Option<Dropout>,

    num_classes: usize,
    in_channels: usize,
    dropout_prob: f64,
}

impl<B: Backend> UNetSmall<B> {
    pub fn new(
        num_classes: usize,
        in_channels: usize,
        dropout: bool,
        dropout_prob: f64,
        mode: &ConvMode,
        device: &B::Device,
    ) -> Self {
        let head = SpatialConvConfig::new([32, num_classes], [1, 1]).init(mode, device);

        Self {
            inc: DoubleConv::new(in_channels, 32, mode, device),
            down1: EncoderBlock::new(32, 64, mode, device),
            down2: EncoderBlock::new(64, 128, mode, device),
            down3: EncoderBlock::new(128, 256, mode, device),
            up1: DecoderBlock::new(256, 128, mode, device),
            up2: DecoderBlock::new(128, 64, mode, device),
            up3: DecoderBlock::new(64, 32, mode, device),
            head,
            dropout: dropout.then(|| DropoutConfig::new(dropout_prob).init()),
            num_classes,
            in_channels,
            dropout_prob,
        }
    }

    /// Dense forward pass: [batch, bands, H, W] -> [batch, classes, H, W]
    pub fn forward(&self, x: Tensor<B, 4>) -> Tensor<B, 4> {
        let x1 = self.inc.forward(x);
        let x2 = self.down1.forward(x1.clone());
        let x3 = self.down2.forward(x2.clone());
        let mut x4 = self.down3.forward(x3.clone());

        if let Some(dropout) = &self.dropout {
            x4 = dropout.forward(x4);
        }

        let y = self.up1.forward(x4, x3);
        let y = self.up2.forward(y, x2);
        let y = self.up3.forward(y, x1);
        self.head.forward(y)
    }

    pub fn num_classes(&self) -> usize {
        self.num_classes
    }

    pub fn is_coordconv(&self) -> bool {
        self.inc.is_coord()
    }

    pub fn to_coordconv(&self, params: &CoordConvParams, device: &B::Device) -> Self {
        Self::new(
            self.num_classes,
            self.in_channels,
            self.dropout.is_some(),
            self.dropout_prob,
            &ConvMode::Coord(params.clone()),
            device,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{default_device, DefaultBackend};

    #[test]
    fn test_unet_small_output_shape() {
        let device = default_device();
        let model =
            UNetSmall::<DefaultBackend>::new(4, 3, true, 0.5, &ConvMode::Standard, &device);

        let input = Tensor::<DefaultBackend, 4>::zeros([2, 3, 32, 32], &device);
        let output = model.forward(input);

        assert_eq!(output.dims(), [2, 4, 32, 32]);
    }

    #[test]
    fn test_unet_output_shape_multispectral() {
        let device = default_device();
        let model = UNet::<DefaultBackend>::new(2, 8, false, 0.5, &ConvMode::Standard, &device);

        let input = Tensor::<DefaultBackend, 4>::zeros([1, 8, 32, 32], &device);
        let output = model.forward(input);

        assert_eq!(output.dims(), [1, 2, 32, 32]);
        assert_eq!(model.num_classes(), 2);
    }

    #[test]
    fn test_unet_small_coordconv_rebuild() {
        let device = default_device();
        let model =
            UNetSmall::<DefaultBackend>::new(3, 4, false, 0.5, &ConvMode::Standard, &device);
        assert!(!model.is_coordconv());

        let converted = model.to_coordconv(&CoordConvParams::default(), &device);
        assert!(converted.is_coordconv());
        assert_eq!(converted.num_classes(), 3);

        let input = Tensor::<DefaultBackend, 4>::zeros([1, 4, 16, 16], &device);
        assert_eq!(converted.forward(input).dims(), [1, 3, 16, 16]);
    }
}
