use burn::module::{Module, Param};
use burn::prelude::Backend;
use burn::tensor::module::conv2d;
use burn::tensor::ops::ConvOptions;
use burn::tensor::{Distribution, Tensor, TensorData};

use crate::error::{Error, Result};

/// Which part of a kernel a masked convolution may see.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Stack {
    /// `k x k` kernel over the rows above (and, unless masked, at) the current row.
    Vertical,
    /// `1 x k` kernel over the columns left of (and, unless masked, at) the current column.
    Horizontal,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct KernelMask {
    pub stack: Stack,
    pub kernel_size: usize,
    pub mask_center: bool,
}

impl KernelMask {
    pub fn new(stack: Stack, kernel_size: usize, mask_center: bool) -> Result<Self> {
        if kernel_size % 2 == 0 {
            return Err(Error::Config(format!(
                "masked convolutions need an odd kernel size, got {kernel_size}"
            )));
        }

        Ok(Self {
            stack,
            kernel_size,
            mask_center,
        })
    }

    pub fn shape(&self) -> [usize; 2] {
        match self.stack {
            Stack::Vertical => [self.kernel_size, self.kernel_size],
            Stack::Horizontal => [1, self.kernel_size],
        }
    }

    /// Row-major 0/1 values over the kernel support.
    pub fn values(&self) -> Vec<f32> {
        let [rows, cols] = self.shape();
        let center = self.kernel_size / 2;

        (0..rows)
            .flat_map(|row| (0..cols).map(move |col| (row, col)))
            .map(|(row, col)| {
                let visible = match self.stack {
                    Stack::Vertical if self.mask_center => row < center,
                    Stack::Vertical => row <= center,
                    Stack::Horizontal if self.mask_center => col < center,
                    Stack::Horizontal => col <= center,
                };
                if visible { 1.0 } else { 0.0 }
            })
            .collect()
    }
}

/// Convolution whose kernel is multiplied by a fixed mask on every call.
#[derive(Module, Debug)]
pub struct MaskedConv2d<B: Backend> {
    weight: Param<Tensor<B, 4>>,
    bias: Param<Tensor<B, 1>>,
    mask: Tensor<B, 4>,
    padding: [usize; 2],
    dilation: [usize; 2],
}

impl<B: Backend> MaskedConv2d<B> {
    pub fn new(channels: [usize; 2], mask: KernelMask, dilation: usize, device: &B::Device) -> Self {
        let [in_channels, out_channels] = channels;
        let [rows, cols] = mask.shape();
        let fan_in = (in_channels * rows * cols) as f64;
        let bound = 1.0 / fan_in.sqrt();

        let kernel = mask.values();
        let values = kernel
            .iter()
            .copied()
            .cycle()
            .take(out_channels * in_channels * kernel.len())
            .collect::<Vec<_>>();

        Self {
            weight: Param::from_tensor(Tensor::random(
                [out_channels, in_channels, rows, cols],
                Distribution::Uniform(-bound, bound),
                device,
            )),
            bias: Param::from_tensor(Tensor::random(
                [out_channels],
                Distribution::Uniform(-bound, bound),
                device,
            )),
            mask: Tensor::from_data(
                TensorData::new(values, [out_channels, in_channels, rows, cols]),
                device,
            ),
            padding: [dilation * (rows - 1) / 2, dilation * (cols - 1) / 2],
            dilation: [dilation, dilation],
        }
    }

    pub fn forward(&self, input: Tensor<B, 4>) -> Tensor<B, 4> {
        let weight = self.weight.val() * self.mask.clone();

        conv2d(
            input,
            weight,
            Some(self.bias.val()),
            ConvOptions::new([1, 1], self.padding, self.dilation, 1),
        )
    }
}
