//! Conditional diffusion over node-label vectors.

mod schedule;
pub use schedule::{standard_normal, BetaSchedule, NoiseSchedule, Posterior};

mod conditioner;
pub use conditioner::Conditioner;
mod denoiser;
pub use denoiser::{timestep_embedding, Denoiser};
mod model;
pub use model::{DiffusionModel, StepLoss};
