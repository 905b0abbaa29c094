use burn::prelude::{Backend, Int};
use burn::tensor::activation::softmax;
use burn::tensor::{Tensor, TensorData};
use rand::distributions::{Distribution, WeightedIndex};
use rand::Rng;
use tracing::debug;

use crate::error::{check_shape, Error, Result};
use crate::model::prior::{CodeContext, Prior, PriorInput};

/// Ancestral sampling over an `[batch, height, width]` grid.
///
/// Positions are visited strictly in raster order; each one gets a fresh
/// forward pass over the grid filled so far. With a context, known positions
/// start from their context code and are never redrawn.
pub fn ancestral<B: Backend, P: Prior<B>, R: Rng>(
    prior: &P,
    shape: [usize; 3],
    context: Option<CodeContext<B>>,
    labels: Option<Tensor<B, 1, Int>>,
    rng: &mut R,
    device: &B::Device,
) -> Result<Tensor<B, 3, Int>> {
    let [batch, height, width] = shape;
    let classes = prior.num_classes();
    let cells = height * width;

    let (mut grid, known) = match &context {
        Some(context) => {
            check_shape("sampling context", &shape, &context.dims())?;
            let grid = context.codes.to_data().iter::<i64>().collect::<Vec<_>>();
            let known = context.known.to_data().iter::<bool>().collect::<Vec<_>>();
            (grid, known)
        }
        None => (vec![0; batch * cells], vec![false; batch * cells]),
    };

    let crop_rows = context.is_none() && prior.is_row_causal();
    debug!(batch, height, width, crop_rows, "sampling code grid");

    for row in 0..height {
        for column in 0..width {
            let offset = row * width + column;
            if (0..batch).all(|b| known[b * cells + offset]) {
                continue;
            }

            let rows = if crop_rows { row + 1 } else { height };
            let codes = (0..batch)
                .flat_map(|b| grid[b * cells..b * cells + rows * width].iter().copied())
                .collect::<Vec<_>>();
            let codes = Tensor::<B, 3, Int>::from_data(TensorData::new(codes, [batch, rows, width]), device);

            let input = PriorInput::new(codes)
                .with_context(context.clone())
                .with_labels(labels.clone());
            let logits = prior
                .forward(input)
                .slice([0..batch, 0..classes, row..row + 1, column..column + 1])
                .reshape([batch, classes]);
            let probs = softmax(logits, 1).into_data().iter::<f32>().collect::<Vec<_>>();

            for b in 0..batch {
                let index = b * cells + offset;
                if known[index] {
                    continue;
                }

                let distribution = WeightedIndex::new(&probs[b * classes..(b + 1) * classes])
                    .map_err(|source| Error::Sampling { row, column, source })?;
                grid[index] = distribution.sample(rng) as i64;
            }
        }
    }

    Ok(Tensor::from_data(TensorData::new(grid, shape), device))
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;

    use burn::backend::NdArray;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    use super::*;
    use crate::model::prior::inpainting::InpaintingPixelCnnConfig;
    use crate::model::prior::pixelcnn::PixelCnnConfig;
    use crate::model::prior::PriorConfig;

    type B = NdArray;

    #[test]
    fn samples_are_valid_codes() {
        let device = Default::default();
        let prior = PixelCnnConfig::new(5).with_hidden_channels(8).init::<B>(&device).unwrap();
        let mut rng = StdRng::seed_from_u64(7);

        let samples = prior.sample([3, 4, 4], None, None, &mut rng, &device).unwrap();
        assert_eq!(samples.dims(), [3, 4, 4]);

        let values = samples.into_data().iter::<i64>().collect::<Vec<_>>();
        assert!(values.iter().all(|code| (0..5).contains(code)));
        assert!(values.iter().collect::<HashSet<_>>().len() > 1);
    }

    #[test]
    fn same_seed_same_samples() {
        let device = Default::default();
        let prior = PixelCnnConfig::new(4)
            .with_hidden_channels(4)
            .with_use_dilation(false)
            .init::<B>(&device)
            .unwrap();

        let first = prior
            .sample([2, 3, 3], None, None, &mut StdRng::seed_from_u64(1), &device)
            .unwrap();
        let second = prior
            .sample([2, 3, 3], None, None, &mut StdRng::seed_from_u64(1), &device)
            .unwrap();

        first.into_data().assert_eq(&second.into_data(), true);
    }

    #[test]
    fn known_codes_survive_inpainting() {
        let device = Default::default();
        let prior = InpaintingPixelCnnConfig::new(PixelCnnConfig::new(6).with_hidden_channels(8))
            .with_context_channels(4)
            .init::<B>(&device)
            .unwrap();

        let codes = (0..2 * 4 * 4).map(|i| (i % 6) as i64).collect::<Vec<_>>();
        // top half and the first column are known
        let known = (0..2 * 4 * 4)
            .map(|i| {
                let cell = i % 16;
                cell / 4 < 2 || cell % 4 == 0
            })
            .collect::<Vec<_>>();
        let context = CodeContext::new(
            Tensor::from_data(TensorData::new(codes.clone(), [2, 4, 4]), &device),
            Tensor::from_data(TensorData::new(known.clone(), [2, 4, 4]), &device),
        )
        .unwrap();

        let samples = prior
            .sample([2, 4, 4], Some(context), None, &mut StdRng::seed_from_u64(3), &device)
            .unwrap();
        let values = samples.into_data().iter::<i64>().collect::<Vec<_>>();

        for (i, value) in values.iter().enumerate() {
            assert!((0..6).contains(value));
            if known[i] {
                assert_eq!(*value, codes[i], "known code at {i} was redrawn");
            }
        }
    }

    #[test]
    fn context_shape_must_match() {
        let device = Default::default();
        let prior = InpaintingPixelCnnConfig::new(PixelCnnConfig::new(3).with_hidden_channels(4))
            .with_context_channels(2)
            .init::<B>(&device)
            .unwrap();
        let codes = Tensor::<B, 3, Int>::zeros([1, 3, 3], &device);
        let context = CodeContext::from_pair(codes.clone(), codes);

        let result = prior.sample([1, 4, 4], Some(context), None, &mut StdRng::seed_from_u64(0), &device);
        assert!(matches!(result, Err(Error::Shape { .. })));
    }
}
