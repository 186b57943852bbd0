//! ResNet-101 Backbone
//!
//! Bottleneck residual backbone shared by the FCN and DeepLabV3 heads.
//! In dilated mode the last two stages keep their spatial extent and use
//! dilated convolutions instead (output stride 8), which is what the
//! dense heads expect.

use burn::{
    module::Module,
    nn::{
        pool::{MaxPool2d, MaxPool2dConfig},
        BatchNorm, BatchNormConfig, PaddingConfig2d, Relu,
    },
    tensor::{backend::Backend, Tensor},
};

use crate::config::CoordConvParams;
use crate::model::coordconv::{ConvMode, SpatialConv, SpatialConvConfig};

/// Channel count of the backbone's final feature map
pub(crate) const RESNET_OUT_CHANNELS: usize = 2048;

const EXPANSION: usize = 4;

/// Strided 1x1 projection for residual branches that change shape
#[derive(Module, Debug)]
struct Downsample<B: Backend> {
    conv: SpatialConv<B>,
    bn: BatchNorm<B, 2>,
}

impl<B: Backend> Downsample<B> {
    fn new(
        in_planes: usize,
        out_planes: usize,
        stride: usize,
        mode: &ConvMode,
        device: &B::Device,
    ) -> Self {
        let conv = SpatialConvConfig::new([in_planes, out_planes], [1, 1])
            .with_stride([stride, stride])
            .with_bias(false)
            .init(mode, device);

        Self {
            conv,
            bn: BatchNormConfig::new(out_planes).init(device),
        }
    }

    fn forward(&self, x: Tensor<B, 4>) -> Tensor<B, 4> {
        self.bn.forward(self.conv.forward(x))
    }
}

/// Bottleneck residual block: 1x1 reduce, 3x3, 1x1 expand
#[derive(Module, Debug)]
struct Bottleneck<B: Backend> {
    conv1: SpatialConv<B>,
    bn1: BatchNorm<B, 2>,
    conv2: SpatialConv<B>,
    bn2: BatchNorm<B, 2>,
    conv3: SpatialConv<B>,
    bn3: BatchNorm<B, 2>,
    downsample: Option<Downsample<B>>,
    relu: Relu,
}

impl<B: Backend> Bottleneck<B> {
    fn new(
        in_planes: usize,
        planes: usize,
        stride: usize,
        dilation: usize,
        mode: &ConvMode,
        device: &B::Device,
    ) -> Self {
        let out_planes = planes * EXPANSION;

        let conv1 = SpatialConvConfig::new([in_planes, planes], [1, 1])
            .with_bias(false)
            .init(mode, device);
        let conv2 = SpatialConvConfig::new([planes, planes], [3, 3])
            .with_stride([stride, stride])
            .with_dilation([dilation, dilation])
            .with_padding(PaddingConfig2d::Explicit(dilation, dilation))
            .with_bias(false)
            .init(mode, device);
        let conv3 = SpatialConvConfig::new([planes, out_planes], [1, 1])
            .with_bias(false)
            .init(mode, device);

        let downsample = (stride != 1 || in_planes != out_planes)
            .then(|| Downsample::new(in_planes, out_planes, stride, mode, device));

        Self {
            conv1,
            bn1: BatchNormConfig::new(planes).init(device),
            conv2,
            bn2: BatchNormConfig::new(planes).init(device),
            conv3,
            bn3: BatchNormConfig::new(out_planes).init(device),
            downsample,
            relu: Relu::new(),
        }
    }

    fn forward(&self, x: Tensor<B, 4>) -> Tensor<B, 4> {
        let identity = match &self.downsample {
            Some(downsample) => downsample.forward(x.clone()),
            None => x.clone(),
        };

        let y = self.relu.forward(self.bn1.forward(self.conv1.forward(x)));
        let y = self.relu.forward(self.bn2.forward(self.conv2.forward(y)));
        let y = self.bn3.forward(self.conv3.forward(y));

        self.relu.forward(y + identity)
    }
}

/// ResNet-101 feature extractor
#[derive(Module, Debug)]
pub struct ResNet101<B: Backend> {
    conv1: SpatialConv<B>,
    bn1: BatchNorm<B, 2>,
    relu: Relu,
    pool: MaxPool2d,
    layer1: Vec<Bottleneck<B>>,
    layer2: Vec<Bottleneck<B>>,
    layer3: Vec<Bottleneck<B>>,
    layer4: Vec<Bottleneck<B>>,

    in_channels: usize,
    dilated: bool,
}

impl<B: Backend> ResNet101<B> {
    pub fn new(in_channels: usize, dilated: bool, mode: &ConvMode, device: &B::Device) -> Self {
        let conv1 = SpatialConvConfig::new([in_channels, 64], [7, 7])
            .with_stride([2, 2])
            .with_padding(PaddingConfig2d::Explicit(3, 3))
            .with_bias(false)
            .init(mode, device);

        let (stride3, dilation3) = if dilated { (1, 2) } else { (2, 1) };
        let (stride4, dilation4) = if dilated { (1, 4) } else { (2, 1) };

        Self {
            conv1,
            bn1: BatchNormConfig::new(64).init(device),
            relu: Relu::new(),
            pool: MaxPool2dConfig::new([3, 3])
                .with_strides([2, 2])
                .with_padding(PaddingConfig2d::Explicit(1, 1))
                .init(),
            layer1: Self::make_layer(64, 64, 3, 1, 1, mode, device),
            layer2: Self::make_layer(256, 128, 4, 2, 1, mode, device),
            layer3: Self::make_layer(512, 256, 23, stride3, dilation3, mode, device),
            layer4: Self::make_layer(1024, 512, 3, stride4, dilation4, mode, device),

            in_channels,
            dilated,
        }
    }

    fn make_layer(
        in_planes: usize,
        planes: usize,
        blocks: usize,
        stride: usize,
        dilation: usize,
        mode: &ConvMode,
        device: &B::Device,
    ) -> Vec<Bottleneck<B>> {
        let mut layer = Vec::with_capacity(blocks);
        layer.push(Bottleneck::new(
            in_planes, planes, stride, dilation, mode, device,
        ));
        for _ in 1..blocks {
            layer.push(Bottleneck::new(
                planes * EXPANSION,
                planes,
                1,
                dilation,
                mode,
                device,
            ));
        }
        layer
    }

    /// Feature forward pass: [batch, bands, H, W] -> [batch, 2048, H/s, W/s]
    /// where the output stride `s` is 8 in dilated mode and 32 otherwise.
    pub fn forward(&self, x: Tensor<B, 4>) -> Tensor<B, 4> {
        let mut y = self.relu.forward(self.bn1.forward(self.conv1.forward(x)));
        y = self.pool.forward(y);

        for block in &self.layer1 {
            y = block.forward(y);
        }
        for block in &self.layer2 {
            y = block.forward(y);
        }
        for block in &self.layer3 {
            y = block.forward(y);
        }
        for block in &self.layer4 {
            y = block.forward(y);
        }

        y
    }

    pub fn is_coordconv(&self) -> bool {
        self.conv1.is_coord()
    }

    pub fn to_coordconv(&self, params: &CoordConvParams, device: &B::Device) -> Self {
        Self::new(
            self.in_channels,
            self.dilated,
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
    fn test_dilated_backbone_output_stride_8() {
        let device = default_device();
        let backbone = ResNet101::<DefaultBackend>::new(3, true, &ConvMode::Standard, &device);

        let input = Tensor::<DefaultBackend, 4>::zeros([1, 3, 32, 32], &device);
        let features = backbone.forward(input);

        assert_eq!(features.dims(), [1, RESNET_OUT_CHANNELS, 4, 4]);
    }

    #[test]
    fn test_plain_backbone_output_stride_32() {
        let device = default_device();
        let backbone = ResNet101::<DefaultBackend>::new(3, false, &ConvMode::Standard, &device);

        let input = Tensor::<DefaultBackend, 4>::zeros([1, 3, 32, 32], &device);
        let features = backbone.forward(input);

        assert_eq!(features.dims(), [1, RESNET_OUT_CHANNELS, 1, 1]);
    }
}
