pub mod autoencoder;
pub mod codebook;
pub mod layer;
pub mod loss;
pub mod prior;
pub mod vqvae;
