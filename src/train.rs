//! Epoch orchestration: conditioner pretraining, diffusion training with periodic
//! validation/testing, best-model tracking and checkpointing.

mod checkpoint;
pub use checkpoint::{BestTracker, CheckpointPaths};
mod scalars;
pub use scalars::{MemoryScalarWriter, ParquetScalarWriter, ScalarWriter};
mod scheduler;
pub use scheduler::StepLr;
mod trainer;
pub use trainer::*;
