//! Hiding parts of a code grid for inpainting.

pub mod block;

use burn::prelude::{Backend, Int};
use burn::tensor::{Bool, Tensor};
use rand::Rng;

use crate::model::prior::CodeContext;

pub trait MaskingStrategy<B: Backend> {
    type Config: Clone + Send + Sync;

    /// N x H x W grid, true where the code stays known.
    fn known_positions<R: Rng>(
        shape: [usize; 3],
        config: &Self::Config,
        rng: &mut R,
        device: &B::Device,
    ) -> Tensor<B, 3, Bool>;

    /// Keeps the known codes and zeroes the rest.
    fn apply_mask(codes: Tensor<B, 3, Int>, known: Tensor<B, 3, Bool>) -> CodeContext<B> {
        let codes = codes.mask_fill(known.clone().bool_not(), 0);
        CodeContext { codes, known }
    }

    fn mask_codes<R: Rng>(
        codes: Tensor<B, 3, Int>,
        config: &Self::Config,
        rng: &mut R,
    ) -> CodeContext<B> {
        let known = Self::known_positions(codes.dims(), config, rng, &codes.device());
        Self::apply_mask(codes, known)
    }
}
