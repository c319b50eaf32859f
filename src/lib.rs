pub mod advisor;
pub mod config;
pub mod datasets;
pub mod diffusion;
mod error;
pub use error::{Error, Result};
pub mod eval;
pub mod graph;
pub mod nn;
pub mod shape;
pub mod train;
