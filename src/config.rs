//! Run configuration. Serialised next to the checkpoints as the `.args` file.

use std::{fmt, fs::File, io::BufWriter, path::Path, str::FromStr};

use serde::{Deserialize, Serialize};

use crate::{
    advisor::AdvisorStrategy,
    diffusion::BetaSchedule,
    nn::EncoderParams,
    Error, Result,
};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelConfig {
    /// Channels of the diffused label signal.
    pub in_dim: usize,
    /// Channels of the observed node features.
    pub feat_dim: usize,
    pub num_advisors: usize,
    pub noise_emb_dim: usize,
    pub hidden_dim: usize,
    pub mlp_layers: usize,
    pub encoder: EncoderParams,
    pub beta_schedule: BetaSchedule,
    pub num_timesteps: usize,
    /// Predict x0 directly instead of the noise.
    pub pred_x0: bool,
    /// Weight of the advisor term in the training loss.
    pub guide_weight: f64,
    /// Interpolation weight toward the advisor during sampling.
    pub sample_guidance: f64,
}
impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            in_dim: 1,
            feat_dim: 1,
            num_advisors: 1,
            noise_emb_dim: 128,
            hidden_dim: 128,
            mlp_layers: 4,
            encoder: EncoderParams::default(),
            beta_schedule: BetaSchedule::Linear,
            num_timesteps: 500,
            pred_x0: true,
            guide_weight: 0.5,
            sample_guidance: 0.1,
        }
    }
}

/// How a continuous sample becomes a binary prediction.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SelectionPolicy {
    /// `score > p`
    Threshold(f32),
    /// The `k` best-scoring nodes, `k` = number of positive ground-truth nodes.
    TopK,
}
impl Default for SelectionPolicy {
    fn default() -> Self {
        Self::Threshold(0.5)
    }
}
impl FromStr for SelectionPolicy {
    type Err = Error;
    /// `topk`, `threshold` or `threshold:<p>`.
    fn from_str(s: &str) -> std::result::Result<Self, Error> {
        let lower = s.to_lowercase();
        match lower.split_once(':') {
            None if lower == "topk" || lower == "top_k" => Ok(Self::TopK),
            None if lower == "threshold" => Ok(Self::default()),
            Some(("threshold", p)) => p
                .parse()
                .map(Self::Threshold)
                .map_err(|_| Error::UnknownSelection(s.to_owned())),
            _ => Err(Error::UnknownSelection(s.to_owned())),
        }
    }
}
impl fmt::Display for SelectionPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Threshold(p) => write!(f, "threshold:{}", p),
            Self::TopK => f.write_str("topk"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrainConfig {
    pub dataset: String,
    pub save_path: String,
    pub run_dir: String,
    pub lr: f64,
    pub max_epoch: usize,
    pub scheduler: bool,
    pub advisors: Vec<AdvisorStrategy>,
    pub train_cond: bool,
    pub max_cond_epoch: usize,
    pub seed: u64,
    pub valid_selection: SelectionPolicy,
    pub test_selection: SelectionPolicy,
    pub model: ModelConfig,
}
impl Default for TrainConfig {
    fn default() -> Self {
        Self {
            dataset: "jazz_IC50".to_owned(),
            save_path: "./saved_diffusers/".to_owned(),
            run_dir: "./runs".to_owned(),
            lr: 1e-3,
            max_epoch: 500,
            scheduler: true,
            advisors: vec![AdvisorStrategy::default()],
            train_cond: false,
            max_cond_epoch: 10,
            seed: 44,
            valid_selection: SelectionPolicy::TopK,
            test_selection: SelectionPolicy::default(),
            model: ModelConfig::default(),
        }
    }
}
impl TrainConfig {
    /// `{dataset}_{gnn_type}_{hidden_dim}_{num_layers}_{activation}_{mlp_layers}`
    pub fn run_name(&self) -> String {
        let model = &self.model;
        format!(
            "{}_{}_{}_{}_{}_{}",
            self.dataset,
            model.encoder.gnn_type,
            model.hidden_dim,
            model.encoder.num_layers,
            model.encoder.activation,
            model.mlp_layers
        )
    }
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let writer = BufWriter::new(File::create(path)?);
        serde_json::to_writer_pretty(writer, self)?;
        Ok(())
    }
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let file = File::open(path)?;
        Ok(serde_json::from_reader(file)?)
    }
}
