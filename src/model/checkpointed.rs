//! Memory-Checkpointed U-Net
//!
//! Same topology as [`UNetSmall`], different forward: instead of holding
//! every encoder activation across the decoder, each skip tensor is
//! recomputed from the input when its decoder stage needs it. Peak
//! activation memory stays near a single encoder pass at the cost of
//! repeated encoder work, which is the right trade on devices where large
//! tiles otherwise exhaust memory.

use burn::{
    module::Module,
    tensor::{backend::Backend, Tensor},
};

use crate::config::CoordConvParams;
use crate::model::coordconv::ConvMode;
use crate::model::unet::UNetSmall;

/// UNetSmall with a recompute-instead-of-store forward pass
#[derive(Module, Debug)]
pub struct CheckpointedUNet<B: Backend> {
    inner: UNetSmall<B>,
}

impl<B: Backend> CheckpointedUNet<B> {
    pub fn new(
        num_classes: usize,
        in_channels: usize,
        dropout: bool,
        dropout_prob: f64,
        mode: &ConvMode,
        device: &B::Device,
    ) -> Self {
        Self {
            inner: UNetSmall::new(num_classes, in_channels, dropout, dropout_prob, mode, device),
        }
    }

    /// Dense forward pass: [batch, bands, H, W] -> [batch, classes, H, W]
    ///
    /// Skip activations are recomputed from the input rather than kept
    /// across the decoder.
    pub fn forward(&self, x: Tensor<B, 4>) -> Tensor<B, 4> {
        let mut deepest = self.encode_to(x.clone(), 3);
        if let Some(dropout) = &self.inner.dropout {
            deepest = dropout.forward(deepest);
        }

        let y = self.inner.up1.forward(deepest, self.encode_to(x.clone(), 2));
        let y = self.inner.up2.forward(y, self.encode_to(x.clone(), 1));
        let y = self.inner.up3.forward(y, self.encode_to(x, 0));
        self.inner.head.forward(y)
    }

    /// Run the encoder from the input up to the given stage
    fn encode_to(&self, x: Tensor<B, 4>, stage: usize) -> Tensor<B, 4> {
        let mut y = self.inner.inc.forward(x);
        if stage >= 1 {
            y = self.inner.down1.forward(y);
        }
        if stage >= 2 {
            y = self.inner.down2.forward(y);
        }
        if stage >= 3 {
            y = self.inner.down3.forward(y);
        }
        y
    }

    pub fn num_classes(&self) -> usize {
        self.inner.num_classes()
    }

    pub fn is_coordconv(&self) -> bool {
        self.inner.is_coordconv()
    }

    pub fn to_coordconv(&self, params: &CoordConvParams, device: &B::Device) -> Self {
        Self {
            inner: self.inner.to_coordconv(params, device),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{default_device, DefaultBackend};

    #[test]
    fn test_checkpointed_output_shape() {
        let device = default_device();
        let model =
            CheckpointedUNet::<DefaultBackend>::new(5, 4, true, 0.3, &ConvMode::Standard, &device);

        let input = Tensor::<DefaultBackend, 4>::zeros([2, 4, 32, 32], &device);
        let output = model.forward(input);

        assert_eq!(output.dims(), [2, 5, 32, 32]);
        assert_eq!(model.num_classes(), 5);
    }

    #[test]
    fn test_checkpointed_coordconv_rebuild() {
        let device = default_device();
        let model =
            CheckpointedUNet::<DefaultBackend>::new(2, 3, false, 0.5, &ConvMode::Standard, &device);

        let converted = model.to_coordconv(&CoordConvParams::default(), &device);
        assert!(converted.is_coordconv());
    }
}
