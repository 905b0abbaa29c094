pub mod autoencoder;
pub mod prior;
