use burn::config::Config;
use burn::module::{Module, Param};
use burn::prelude::{Backend, Int};
use burn::tensor::{Distribution, Tensor};

use crate::error::{check_shape, Result};

#[derive(Config, Debug)]
pub struct CodeBookConfig {
    pub num_embeddings: usize,
    pub embedding_dim: usize,
    #[config(default = 0.25)]
    pub commitment_cost: f64,
}

impl CodeBookConfig {
    pub fn init<B: Backend>(&self, device: &B::Device) -> CodeBook<B> {
        let bound = 1.0 / self.num_embeddings as f64;

        CodeBook {
            embeddings: Param::from_tensor(Tensor::random(
                [self.num_embeddings, self.embedding_dim],
                Distribution::Uniform(-bound, bound),
                device,
            )),
            num_embeddings: self.num_embeddings,
            embedding_dim: self.embedding_dim,
            commitment_cost: self.commitment_cost,
        }
    }
}

/// Learned set of `K` prototype vectors of dimension `D`.
#[derive(Module, Debug)]
pub struct CodeBook<B: Backend> {
    embeddings: Param<Tensor<B, 2>>,
    num_embeddings: usize,
    embedding_dim: usize,
    commitment_cost: f64,
}

pub struct Quantized<B: Backend> {
    /// Nearest embedding per input row, with straight-through gradients to the input.
    pub quantized: Tensor<B, 2>,
    pub indices: Tensor<B, 1, Int>,
    pub commitment_loss: Tensor<B, 1>,
    pub perplexity: Tensor<B, 1>,
}

impl<B: Backend> CodeBook<B> {
    pub fn from_embeddings(embeddings: Tensor<B, 2>, commitment_cost: f64) -> Self {
        let [num_embeddings, embedding_dim] = embeddings.dims();

        Self {
            embeddings: Param::from_tensor(embeddings),
            num_embeddings,
            embedding_dim,
            commitment_cost,
        }
    }

    pub fn num_embeddings(&self) -> usize {
        self.num_embeddings
    }

    pub fn embedding_dim(&self) -> usize {
        self.embedding_dim
    }

    pub fn embeddings(&self) -> Tensor<B, 2> {
        self.embeddings.val()
    }

    /// Index of the closest embedding for every row of `vectors` (M x D).
    ///
    /// Exhaustive search over the whole book; equal distances resolve to the
    /// lowest index.
    pub fn nearest(&self, vectors: Tensor<B, 2>) -> Tensor<B, 1, Int> {
        let embeddings = self.embeddings.val();

        // |x|^2 + |e|^2 - 2 x.e : M x K
        let vector_norms = vectors.clone().powf_scalar(2.0).sum_dim(1);
        let embedding_norms = embeddings.clone().powf_scalar(2.0).sum_dim(1).transpose();
        let distances = vector_norms + embedding_norms - vectors.matmul(embeddings.transpose()) * 2.0;

        distances.argmin(1).squeeze(1)
    }

    pub fn lookup(&self, indices: Tensor<B, 1, Int>) -> Tensor<B, 2> {
        self.embeddings.val().select(0, indices)
    }

    /// Embeddings for a flat index tensor laid out as `[batch, height, width, dim]`.
    pub fn lookup_grid(&self, indices: Tensor<B, 1, Int>, shape: [usize; 4]) -> Result<Tensor<B, 4>> {
        let [batch, height, width, dim] = shape;

        check_shape("code book dimension", &[self.embedding_dim], &[dim])?;
        check_shape("code index count", &[batch * height * width], &indices.dims())?;

        Ok(self.lookup(indices).reshape(shape))
    }

    pub fn quantize(&self, vectors: Tensor<B, 2>) -> Quantized<B> {
        let [num_vectors, _] = vectors.dims();
        let device = vectors.device();

        let indices = self.nearest(vectors.clone().detach());
        let quantized = self.lookup(indices.clone());

        let commitment_loss = self.commitment_loss(vectors.clone(), quantized.clone());

        let encodings = Tensor::<B, 2>::zeros([num_vectors, self.num_embeddings], &device).scatter(
            1,
            indices.clone().unsqueeze_dim(1),
            Tensor::ones([num_vectors, 1], &device),
        );
        let perplexity = perplexity(encodings.mean_dim(0).squeeze(0));

        // straight-through: forward value is the embedding, gradient goes to the input
        let quantized = vectors.clone() + (quantized - vectors).detach();

        Quantized {
            quantized,
            indices,
            commitment_loss,
            perplexity,
        }
    }

    /// Pulls the book towards the encoder output and, weighted by the
    /// commitment cost, the encoder output towards the book.
    pub fn commitment_loss(&self, vectors: Tensor<B, 2>, quantized: Tensor<B, 2>) -> Tensor<B, 1> {
        let codebook_loss = (quantized.clone() - vectors.clone().detach()).powf_scalar(2.0).mean();
        let encoder_loss = (quantized.detach() - vectors).powf_scalar(2.0).mean();

        codebook_loss + encoder_loss * self.commitment_cost
    }
}

/// `exp(-sum p log p)` of an average assignment distribution.
pub fn perplexity<B: Backend>(probs: Tensor<B, 1>) -> Tensor<B, 1> {
    let entropy = (probs.clone() * (probs + 1e-10).log()).sum().neg();
    entropy.exp()
}
