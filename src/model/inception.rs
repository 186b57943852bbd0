//! Inception-v3 Feature Extractor with a Dense Head
//!
//! The stem and the A/B/C inception blocks follow the Inception-v3
//! layout (factorized 7x7 convolutions in the C blocks, batch norm after
//! every convolution). Instead of a pooled classification head, a 1x1
//! classifier convolution runs on the final 768-channel feature map and
//! the logits are bilinearly upsampled back to the input size, so the
//! network honors the crate-wide dense forward contract. Accepts any
//! number of input bands.

use burn::{
    module::Module,
    nn::{
        pool::{AvgPool2d, AvgPool2dConfig, MaxPool2d, MaxPool2dConfig},
        BatchNorm, BatchNormConfig, PaddingConfig2d, Relu,
    },
    tensor::{
        backend::Backend,
        module::interpolate,
        ops::{InterpolateMode, InterpolateOptions},
        Tensor,
    },
};

use crate::config::CoordConvParams;
use crate::model::coordconv::{ConvMode, SpatialConv, SpatialConvConfig};

/// Convolution + batch norm + ReLU, the basic inception building block
#[derive(Module, Debug)]
struct BasicConv2d<B: Backend> {
    conv: SpatialConv<B>,
    bn: BatchNorm<B, 2>,
    relu: Relu,
}

impl<B: Backend> BasicConv2d<B> {
    fn new(
        in_channels: usize,
        out_channels: usize,
        kernel_size: [usize; 2],
        stride: [usize; 2],
        padding: PaddingConfig2d,
        mode: &ConvMode,
        device: &B::Device,
    ) -> Self {
        let conv = SpatialConvConfig::new([in_channels, out_channels], kernel_size)
            .with_stride(stride)
            .with_padding(padding)
            .with_bias(false)
            .init(mode, device);

        Self {
            conv,
            bn: BatchNormConfig::new(out_channels).init(device),
            relu: Relu::new(),
        }
    }

    fn pointwise(
        in_channels: usize,
        out_channels: usize,
        mode: &ConvMode,
        device: &B::Device,
    ) -> Self {
        Self::new(
            in_channels,
            out_channels,
            [1, 1],
            [1, 1],
            PaddingConfig2d::Valid,
            mode,
            device,
        )
    }

    fn forward(&self, x: Tensor<B, 4>) -> Tensor<B, 4> {
        self.relu.forward(self.bn.forward(self.conv.forward(x)))
    }
}

/// Inception-A block: 1x1, 5x5, double-3x3, and pooled branches
#[derive(Module, Debug)]
struct InceptionA<B: Backend> {
    branch1x1: BasicConv2d<B>,
    branch5x5_1: BasicConv2d<B>,
    branch5x5_2: BasicConv2d<B>,
    branch3x3_1: BasicConv2d<B>,
    branch3x3_2: BasicConv2d<B>,
    branch3x3_3: BasicConv2d<B>,
    pool: AvgPool2d,
    branch_pool: BasicConv2d<B>,
}

impl<B: Backend> InceptionA<B> {
    /// Output channels: 224 + `pool_features`
    fn new(
        in_channels: usize,
        pool_features: usize,
        mode: &ConvMode,
        device: &B::Device,
    ) -> Self {
        Self {
            branch1x1: BasicConv2d::pointwise(in_channels, 64, mode, device),
            branch5x5_1: BasicConv2d::pointwise(in_channels, 48, mode, device),
            branch5x5_2: BasicConv2d::new(
                48,
                64,
                [5, 5],
                [1, 1],
                PaddingConfig2d::Explicit(2, 2),
                mode,
                device,
            ),
            branch3x3_1: BasicConv2d::pointwise(in_channels, 64, mode, device),
            branch3x3_2: BasicConv2d::new(
                64,
                96,
                [3, 3],
                [1, 1],
                PaddingConfig2d::Explicit(1, 1),
                mode,
                device,
            ),
            branch3x3_3: BasicConv2d::new(
                96,
                96,
                [3, 3],
                [1, 1],
                PaddingConfig2d::Explicit(1, 1),
                mode,
                device,
            ),
            pool: AvgPool2dConfig::new([3, 3])
                .with_strides([1, 1])
                .with_padding(PaddingConfig2d::Explicit(1, 1))
                .init(),
            branch_pool: BasicConv2d::pointwise(in_channels, pool_features, mode, device),
        }
    }

    fn forward(&self, x: Tensor<B, 4>) -> Tensor<B, 4> {
        let b1 = self.branch1x1.forward(x.clone());
        let b5 = self.branch5x5_2.forward(self.branch5x5_1.forward(x.clone()));
        let b3 = self
            .branch3x3_3
            .forward(self.branch3x3_2.forward(self.branch3x3_1.forward(x.clone())));
        let bp = self.branch_pool.forward(self.pool.forward(x));

        Tensor::cat(vec![b1, b5, b3, bp], 1)
    }
}

/// Inception-B block: strided reduction, halves the spatial extent
#[derive(Module, Debug)]
struct InceptionB<B: Backend> {
    branch3x3: BasicConv2d<B>,
    branch3x3dbl_1: BasicConv2d<B>,
    branch3x3dbl_2: BasicConv2d<B>,
    branch3x3dbl_3: BasicConv2d<B>,
    pool: MaxPool2d,
}

impl<B: Backend> InceptionB<B> {
    /// Output channels: `in_channels` + 480
    fn new(in_channels: usize, mode: &ConvMode, device: &B::Device) -> Self {
        Self {
            branch3x3: BasicConv2d::new(
                in_channels,
                384,
                [3, 3],
                [2, 2],
                PaddingConfig2d::Explicit(1, 1),
                mode,
                device,
            ),
            branch3x3dbl_1: BasicConv2d::pointwise(in_channels, 64, mode, device),
            branch3x3dbl_2: BasicConv2d::new(
                64,
                96,
                [3, 3],
                [1, 1],
                PaddingConfig2d::Explicit(1, 1),
                mode,
                device,
            ),
            branch3x3dbl_3: BasicConv2d::new(
                96,
                96,
                [3, 3],
                [2, 2],
                PaddingConfig2d::Explicit(1, 1),
                mode,
                device,
            ),
            pool: MaxPool2dConfig::new([3, 3])
                .with_strides([2, 2])
                .with_padding(PaddingConfig2d::Explicit(1, 1))
                .init(),
        }
    }

    fn forward(&self, x: Tensor<B, 4>) -> Tensor<B, 4> {
        let b3 = self.branch3x3.forward(x.clone());
        let bd = self
            .branch3x3dbl_3
            .forward(self.branch3x3dbl_2.forward(self.branch3x3dbl_1.forward(x.clone())));
        let bp = self.pool.forward(x);

        Tensor::cat(vec![b3, bd, bp], 1)
    }
}

/// Inception-C block: factorized 7x7 branches, keeps 768 channels
#[derive(Module, Debug)]
struct InceptionC<B: Backend> {
    branch1x1: BasicConv2d<B>,
    branch7x7_1: BasicConv2d<B>,
    branch7x7_2: BasicConv2d<B>,
    branch7x7_3: BasicConv2d<B>,
    branch7x7dbl_1: BasicConv2d<B>,
    branch7x7dbl_2: BasicConv2d<B>,
    branch7x7dbl_3: BasicConv2d<B>,
    branch7x7dbl_4: BasicConv2d<B>,
    branch7x7dbl_5: BasicConv2d<B>,
    pool: AvgPool2d,
    branch_pool: BasicConv2d<B>,
}

impl<B: Backend> InceptionC<B> {
    fn new(in_channels: usize, channels_7x7: usize, mode: &ConvMode, device: &B::Device) -> Self {
        let c7 = channels_7x7;
        let row = |cin: usize, cout: usize| ([1usize, 7usize], PaddingConfig2d::Explicit(0, 3), cin, cout);
        let col = |cin: usize, cout: usize| ([7usize, 1usize], PaddingConfig2d::Explicit(3, 0), cin, cout);

        let build = |(kernel, padding, cin, cout): ([usize; 2], PaddingConfig2d, usize, usize)| {
            BasicConv2d::new(cin, cout, kernel, [1, 1], padding, mode, device)
        };

        Self {
            branch1x1: BasicConv2d::pointwise(in_channels, 192, mode, device),
            branch7x7_1: BasicConv2d::pointwise(in_channels, c7, mode, device),
            branch7x7_2: build(row(c7, c7)),
            branch7x7_3: build(col(c7, 192)),
            branch7x7dbl_1: BasicConv2d::pointwise(in_channels, c7, mode, device),
            branch7x7dbl_2: build(col(c7, c7)),
            branch7x7dbl_3: build(row(c7, c7)),
            branch7x7dbl_4: build(col(c7, c7)),
            branch7x7dbl_5: build(row(c7, 192)),
            pool: AvgPool2dConfig::new([3, 3])
                .with_strides([1, 1])
                .with_padding(PaddingConfig2d::Explicit(1, 1))
                .init(),
            branch_pool: BasicConv2d::pointwise(in_channels, 192, mode, device),
        }
    }

    fn forward(&self, x: Tensor<B, 4>) -> Tensor<B, 4> {
        let b1 = self.branch1x1.forward(x.clone());
        let b7 = self
            .branch7x7_3
            .forward(self.branch7x7_2.forward(self.branch7x7_1.forward(x.clone())));
        let bd = self.branch7x7dbl_1.forward(x.clone());
        let bd = self.branch7x7dbl_2.forward(bd);
        let bd = self.branch7x7dbl_3.forward(bd);
        let bd = self.branch7x7dbl_4.forward(bd);
        let bd = self.branch7x7dbl_5.forward(bd);
        let bp = self.branch_pool.forward(self.pool.forward(x));

        Tensor::cat(vec![b1, b7, bd, bp], 1)
    }
}

/// Inception-v3 backbone with a dense classifier head
#[derive(Module, Debug)]
pub struct Inception3<B: Backend> {
    stem1: BasicConv2d<B>,
    stem2: BasicConv2d<B>,
    stem3: BasicConv2d<B>,
    pool1: MaxPool2d,
    stem4: BasicConv2d<B>,
    stem5: BasicConv2d<B>,
    pool2: MaxPool2d,

    mixed_a1: InceptionA<B>,
    mixed_a2: InceptionA<B>,
    mixed_a3: InceptionA<B>,
    mixed_b: InceptionB<B>,
    mixed_c1: InceptionC<B>,
    mixed_c2: InceptionC<B>,

    classifier: SpatialConv<B>,

    num_classes: usize,
    in_channels: usize,
}

impl<B: Backend> Inception3<B> {
    pub fn new(
        num_classes: usize,
        in_channels: usize,
        mode: &ConvMode,
        device: &B::Device,
    ) -> Self {
        let pad1 = PaddingConfig2d::Explicit(1, 1);

        Self {
            stem1: BasicConv2d::new(in_channels, 32, [3, 3], [2, 2], pad1.clone(), mode, device),
            stem2: BasicConv2d::new(32, 32, [3, 3], [1, 1], pad1.clone(), mode, device),
            stem3: BasicConv2d::new(32, 64, [3, 3], [1, 1], pad1.clone(), mode, device),
            pool1: MaxPool2dConfig::new([3, 3])
                .with_strides([2, 2])
                .with_padding(pad1.clone())
                .init(),
            stem4: BasicConv2d::pointwise(64, 80, mode, device),
            stem5: BasicConv2d::new(80, 192, [3, 3], [1, 1], pad1.clone(), mode, device),
            pool2: MaxPool2dConfig::new([3, 3])
                .with_strides([2, 2])
                .with_padding(pad1)
                .init(),

            mixed_a1: InceptionA::new(192, 32, mode, device),
            mixed_a2: InceptionA::new(256, 64, mode, device),
            mixed_a3: InceptionA::new(288, 64, mode, device),
            mixed_b: InceptionB::new(288, mode, device),
            mixed_c1: InceptionC::new(768, 128, mode, device),
            mixed_c2: InceptionC::new(768, 192, mode, device),

            classifier: SpatialConvConfig::new([768, num_classes], [1, 1]).init(mode, device),

            num_classes,
            in_channels,
        }
    }

    /// Dense forward pass: [batch, bands, H, W] -> [batch, classes, H, W]
    pub fn forward(&self, x: Tensor<B, 4>) -> Tensor<B, 4> {
        let [_, _, height, width] = x.dims();

        let x = self.stem1.forward(x);
        let x = self.stem2.forward(x);
        let x = self.stem3.forward(x);
        let x = self.pool1.forward(x);
        let x = self.stem4.forward(x);
        let x = self.stem5.forward(x);
        let x = self.pool2.forward(x);

        let x = self.mixed_a1.forward(x);
        let x = self.mixed_a2.forward(x);
        let x = self.mixed_a3.forward(x);
        let x = self.mixed_b.forward(x);
        let x = self.mixed_c1.forward(x);
        let x = self.mixed_c2.forward(x);

        let logits = self.classifier.forward(x);
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
        self.stem1.conv.is_coord()
    }

    pub fn to_coordconv(&self, params: &CoordConvParams, device: &B::Device) -> Self {
        Self::new(
            self.num_classes,
            self.in_channels,
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
    fn test_inception_output_shape() {
        let device = default_device();
        let model = Inception3::<DefaultBackend>::new(6, 4, &ConvMode::Standard, &device);

        let input = Tensor::<DefaultBackend, 4>::zeros([1, 4, 64, 64], &device);
        let output = model.forward(input);

        assert_eq!(output.dims(), [1, 6, 64, 64]);
        assert_eq!(model.num_classes(), 6);
    }

    #[test]
    fn test_inception_coordconv_rebuild() {
        let device = default_device();
        let model = Inception3::<DefaultBackend>::new(2, 3, &ConvMode::Standard, &device);

        let converted = model.to_coordconv(&CoordConvParams::default(), &device);
        assert!(converted.is_coordconv());
    }
}
