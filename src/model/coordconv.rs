//! Coordinate Convolution
//!
//! A coordinate convolution augments its input with explicit positional
//! channels (an x ramp, a y ramp, optionally a radius) before the actual
//! convolution runs. Every architecture in this crate routes its
//! convolutions through [`SpatialConv`], so a whole network can be
//! rebuilt with coordinate-augmented layers in one structural pass.

use burn::{
    module::{Ignored, Module},
    nn::{
        conv::{Conv2d, Conv2dConfig},
        PaddingConfig2d,
    },
    tensor::{backend::Backend, Distribution, Int, Tensor},
};

use crate::config::CoordConvParams;

/// Appends coordinate channels to a feature map
#[derive(Debug, Clone)]
pub struct AddCoords {
    pub centered: bool,
    pub normalized: bool,
    pub noise: Option<f64>,
    pub radius_channel: bool,
    pub scale: f64,
}

impl AddCoords {
    pub fn new(params: &CoordConvParams) -> Self {
        Self {
            centered: params.centered,
            normalized: params.normalized,
            noise: params.noise,
            radius_channel: params.radius_channel,
            scale: params.scale,
        }
    }

    /// Number of channels this step appends
    pub fn extra_channels(&self) -> usize {
        if self.radius_channel {
            3
        } else {
            2
        }
    }

    pub fn forward<B: Backend>(&self, x: Tensor<B, 4>) -> Tensor<B, 4> {
        let [batch, _channels, height, width] = x.dims();
        let device = x.device();

        let xs = self.axis_ramp::<B>(width, &device);
        let ys = self.axis_ramp::<B>(height, &device);

        let x_channel = xs
            .reshape([1, 1, 1, width])
            .expand([batch, 1, height, width]);
        let y_channel = ys
            .reshape([1, 1, height, 1])
            .expand([batch, 1, height, width]);

        let mut extra = vec![x_channel.clone(), y_channel.clone()];
        if self.radius_channel {
            let radius =
                (x_channel.powf_scalar(2.0) + y_channel.powf_scalar(2.0)).sqrt();
            extra.push(radius);
        }

        let extra: Vec<Tensor<B, 4>> = extra.into_iter().map(|c| self.jitter(c)).collect();

        let mut channels = vec![x];
        channels.extend(extra);
        Tensor::cat(channels, 1)
    }

    /// Coordinate values along one axis, shaped [extent]
    fn axis_ramp<B: Backend>(&self, extent: usize, device: &B::Device) -> Tensor<B, 1> {
        let mut ramp = Tensor::<B, 1, Int>::arange(0..extent as i64, device).float();

        if self.normalized {
            ramp = ramp.div_scalar(extent.saturating_sub(1).max(1) as f64);
        }
        if self.centered {
            ramp = ramp.mul_scalar(2.0).sub_scalar(1.0);
        }

        ramp.mul_scalar(self.scale)
    }

    fn jitter<B: Backend>(&self, channel: Tensor<B, 4>) -> Tensor<B, 4> {
        match self.noise {
            Some(std) if std > 0.0 => {
                let noise = channel.random_like(Distribution::Normal(0.0, std));
                channel + noise
            }
            _ => channel,
        }
    }
}

/// A convolution preceded by coordinate-channel injection
#[derive(Module, Debug)]
pub struct CoordConv2d<B: Backend> {
    conv: Conv2d<B>,
    coords: Ignored<AddCoords>,
}

impl<B: Backend> CoordConv2d<B> {
    pub fn forward(&self, x: Tensor<B, 4>) -> Tensor<B, 4> {
        let x = self.coords.forward(x);
        self.conv.forward(x)
    }
}

/// How convolutions are built: plain, or coordinate-augmented
#[derive(Debug, Clone)]
pub enum ConvMode {
    Standard,
    Coord(CoordConvParams),
}

/// Geometry of a convolution, shared by both build modes
#[derive(Debug, Clone)]
pub struct SpatialConvConfig {
    pub channels: [usize; 2],
    pub kernel_size: [usize; 2],
    pub stride: [usize; 2],
    pub dilation: [usize; 2],
    pub padding: PaddingConfig2d,
    pub bias: bool,
}

impl SpatialConvConfig {
    pub fn new(channels: [usize; 2], kernel_size: [usize; 2]) -> Self {
        Self {
            channels,
            kernel_size,
            stride: [1, 1],
            dilation: [1, 1],
            padding: PaddingConfig2d::Valid,
            bias: true,
        }
    }

    pub fn with_stride(mut self, stride: [usize; 2]) -> Self {
        self.stride = stride;
        self
    }

    pub fn with_dilation(mut self, dilation: [usize; 2]) -> Self {
        self.dilation = dilation;
        self
    }

    pub fn with_padding(mut self, padding: PaddingConfig2d) -> Self {
        self.padding = padding;
        self
    }

    pub fn with_bias(mut self, bias: bool) -> Self {
        self.bias = bias;
        self
    }

    /// Build the layer in the requested mode. Coordinate mode widens the
    /// convolution's input by the number of appended channels.
    pub fn init<B: Backend>(&self, mode: &ConvMode, device: &B::Device) -> SpatialConv<B> {
        match mode {
            ConvMode::Standard => {
                SpatialConv::Standard(self.conv_config(self.channels[0]).init(device))
            }
            ConvMode::Coord(params) => {
                let coords = AddCoords::new(params);
                let conv = self
                    .conv_config(self.channels[0] + coords.extra_channels())
                    .init(device);
                SpatialConv::Coord(CoordConv2d {
                    conv,
                    coords: Ignored(coords),
                })
            }
        }
    }

    fn conv_config(&self, in_channels: usize) -> Conv2dConfig {
        Conv2dConfig::new([in_channels, self.channels[1]], self.kernel_size)
            .with_stride(self.stride)
            .with_dilation(self.dilation)
            .with_padding(self.padding.clone())
            .with_bias(self.bias)
    }
}

/// The swappable convolution layer used throughout the architectures
#[derive(Module, Debug)]
pub enum SpatialConv<B: Backend> {
    Standard(Conv2d<B>),
    Coord(CoordConv2d<B>),
}

impl<B: Backend> SpatialConv<B> {
    pub fn forward(&self, x: Tensor<B, 4>) -> Tensor<B, 4> {
        match self {
            SpatialConv::Standard(conv) => conv.forward(x),
            SpatialConv::Coord(conv) => conv.forward(x),
        }
    }

    /// Whether this layer is the coordinate-augmented form
    pub fn is_coord(&self) -> bool {
        matches!(self, SpatialConv::Coord(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{default_device, DefaultBackend};

    fn coords(params: CoordConvParams) -> AddCoords {
        AddCoords::new(&params)
    }

    #[test]
    fn test_extra_channels() {
        let plain = coords(CoordConvParams::default());
        assert_eq!(plain.extra_channels(), 2);

        let with_radius = coords(CoordConvParams {
            radius_channel: true,
            ..Default::default()
        });
        assert_eq!(with_radius.extra_channels(), 3);
    }

    #[test]
    fn test_add_coords_appends_channels() {
        let device = default_device();
        let input = Tensor::<DefaultBackend, 4>::zeros([2, 4, 8, 8], &device);

        let out = coords(CoordConvParams::default()).forward(input.clone());
        assert_eq!(out.dims(), [2, 6, 8, 8]);

        let out = coords(CoordConvParams {
            radius_channel: true,
            ..Default::default()
        })
        .forward(input);
        assert_eq!(out.dims(), [2, 7, 8, 8]);
    }

    #[test]
    fn test_centered_normalized_ramp_values() {
        let device = default_device();
        let input = Tensor::<DefaultBackend, 4>::zeros([1, 1, 2, 3], &device);

        let out = coords(CoordConvParams::default()).forward(input);

        // x channel, first row: [-1, 0, 1]
        let row: Vec<f32> = out
            .slice([0..1, 1..2, 0..1, 0..3])
            .into_data()
            .to_vec()
            .unwrap();
        let expected = [-1.0f32, 0.0, 1.0];
        for (value, want) in row.iter().zip(expected.iter()) {
            assert!((value - want).abs() < 1e-6, "got {:?}", row);
        }
    }

    #[test]
    fn test_uncentered_ramp_is_scaled() {
        let device = default_device();
        let input = Tensor::<DefaultBackend, 4>::zeros([1, 1, 1, 3], &device);

        let out = coords(CoordConvParams {
            centered: false,
            scale: 2.0,
            ..Default::default()
        })
        .forward(input);

        // normalized to [0, 1], then scaled by 2: [0, 1, 2]
        let row: Vec<f32> = out
            .slice([0..1, 1..2, 0..1, 0..3])
            .into_data()
            .to_vec()
            .unwrap();
        let expected = [0.0f32, 1.0, 2.0];
        for (value, want) in row.iter().zip(expected.iter()) {
            assert!((value - want).abs() < 1e-6, "got {:?}", row);
        }
    }

    #[test]
    fn test_spatial_conv_coord_mode() {
        let device = default_device();
        let config = SpatialConvConfig::new([4, 8], [3, 3]).with_padding(PaddingConfig2d::Same);

        let standard: SpatialConv<DefaultBackend> = config.init(&ConvMode::Standard, &device);
        assert!(!standard.is_coord());

        let coord: SpatialConv<DefaultBackend> =
            config.init(&ConvMode::Coord(CoordConvParams::default()), &device);
        assert!(coord.is_coord());

        let input = Tensor::<DefaultBackend, 4>::zeros([1, 4, 8, 8], &device);
        assert_eq!(standard.forward(input.clone()).dims(), [1, 8, 8, 8]);
        assert_eq!(coord.forward(input).dims(), [1, 8, 8, 8]);
    }
}
