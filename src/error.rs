use std::path::PathBuf;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error(transparent)]
    Candle(#[from] candle_core::Error),

    #[error("{name}: expected {expected}, got shape {shape:?}")]
    Shape {
        name: &'static str,
        expected: String,
        shape: Vec<usize>,
    },

    #[error("timestep {t} outside of [1, {num_timesteps}]")]
    TimestepOutOfRange { t: usize, num_timesteps: usize },

    #[error("unknown advisor strategy: {0}")]
    UnknownAdvisor(String),

    #[error("unknown gnn type: {0}")]
    UnknownGnnType(String),

    #[error("unknown activation: {0}")]
    UnknownActivation(String),

    #[error("unknown beta schedule: {0}")]
    UnknownSchedule(String),

    #[error("unknown selection policy: {0}")]
    UnknownSelection(String),

    #[error("checkpoint not found: {}", .0.display())]
    CheckpointNotFound(PathBuf),

    #[error("split {split}: {graphs} graphs but {advisors} advisor tensors")]
    AdvisorCountMismatch {
        split: String,
        graphs: usize,
        advisors: usize,
    },

    #[error("dataset is missing `{0}`")]
    MissingKey(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Regex(#[from] regex::Error),

    #[error(transparent)]
    Template(#[from] indicatif::style::TemplateError),

    #[error(transparent)]
    Polars(#[from] polars::prelude::PolarsError),
}

pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    pub(crate) fn shape(name: &'static str, expected: impl Into<String>, shape: &[usize]) -> Self {
        Self::Shape {
            name,
            expected: expected.into(),
            shape: shape.to_vec(),
        }
    }
}
