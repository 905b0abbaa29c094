use burn::data::dataloader::batcher::Batcher;
use burn::prelude::{Backend, Tensor};
use burn::tensor::TensorData;

pub mod folder;

/// One decoded image, channel-major pixels in [0, 1].
#[derive(Clone, Debug)]
pub struct ImageItem {
    pub name: String,
    pub pixels: Vec<f32>,
    pub channels: usize,
    pub size: usize,
}

/// A masked image and the full image it was cut from.
#[derive(Clone, Debug)]
pub struct InpaintingItem {
    pub input: ImageItem,
    pub target: ImageItem,
}

#[derive(Clone, Debug)]
pub struct ImageBatch<B: Backend> {
    pub names: Vec<String>,
    /// N x C x S x S
    pub images: Tensor<B, 4>,
}

#[derive(Clone, Debug)]
pub struct InpaintingBatch<B: Backend> {
    pub names: Vec<String>,
    pub inputs: Tensor<B, 4>,
    pub targets: Tensor<B, 4>,
}

impl<B: Backend> InpaintingBatch<B> {
    pub fn batch_size(&self) -> usize {
        self.names.len()
    }
}

fn stack<B: Backend>(items: &[&ImageItem], device: &B::Device) -> Tensor<B, 4> {
    let tensors = items
        .iter()
        .map(|item| {
            Tensor::<B, 3>::from_data(
                TensorData::new(item.pixels.clone(), [item.channels, item.size, item.size]),
                device,
            )
        })
        .collect::<Vec<_>>();

    Tensor::stack(tensors, 0)
}

#[derive(Clone, Debug)]
pub struct ImageBatcher<B: Backend> {
    device: B::Device,
}

impl<B: Backend> ImageBatcher<B> {
    pub fn new(device: B::Device) -> Self {
        Self { device }
    }
}

impl<B: Backend> Batcher<ImageItem, ImageBatch<B>> for ImageBatcher<B> {
    fn batch(&self, items: Vec<ImageItem>) -> ImageBatch<B> {
        let images = stack(&items.iter().collect::<Vec<_>>(), &self.device);

        ImageBatch {
            names: items.into_iter().map(|item| item.name).collect(),
            images,
        }
    }
}

#[derive(Clone, Debug)]
pub struct InpaintingBatcher<B: Backend> {
    device: B::Device,
}

impl<B: Backend> InpaintingBatcher<B> {
    pub fn new(device: B::Device) -> Self {
        Self { device }
    }
}

impl<B: Backend> Batcher<InpaintingItem, InpaintingBatch<B>> for InpaintingBatcher<B> {
    fn batch(&self, items: Vec<InpaintingItem>) -> InpaintingBatch<B> {
        let inputs = stack(&items.iter().map(|item| &item.input).collect::<Vec<_>>(), &self.device);
        let targets = stack(&items.iter().map(|item| &item.target).collect::<Vec<_>>(), &self.device);

        InpaintingBatch {
            names: items.into_iter().map(|item| item.target.name).collect(),
            inputs,
            targets,
        }
    }
}

#[cfg(test)]
mod tests {
    use burn::backend::NdArray;

    use super::*;

    fn item(name: &str, value: f32) -> ImageItem {
        ImageItem {
            name: name.to_string(),
            pixels: vec![value; 3 * 2 * 2],
            channels: 3,
            size: 2,
        }
    }

    #[test]
    fn batches_keep_item_order() {
        let batcher = ImageBatcher::<NdArray>::new(Default::default());
        let batch = batcher.batch(vec![item("a", 0.0), item("b", 1.0)]);

        assert_eq!(batch.names, vec!["a", "b"]);
        assert_eq!(batch.images.dims(), [2, 3, 2, 2]);
        assert_eq!(batch.images.slice([1..2, 0..3, 0..2, 0..2]).sum().into_scalar(), 12.0);
    }

    #[test]
    fn inpainting_pairs_stay_aligned() {
        let batcher = InpaintingBatcher::<NdArray>::new(Default::default());
        let batch = batcher.batch(vec![InpaintingItem {
            input: item("x", 0.25),
            target: item("x", 0.75),
        }]);

        assert_eq!(batch.batch_size(), 1);
        assert_eq!(batch.inputs.sum().into_scalar(), 3.0);
        assert_eq!(batch.targets.sum().into_scalar(), 9.0);
    }
}
