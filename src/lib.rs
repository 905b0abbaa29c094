pub mod checkpoint;
pub mod config;
pub mod data;
pub mod error;
pub mod io;
pub mod mask;
pub mod metric;
pub mod model;
pub mod ops;
pub mod task;
pub mod train;

pub use error::{Error, Result};
