use std::path::{Path, PathBuf};

use anyhow::Context;
use candle_core::Device;
use clap::{ArgAction, Parser};
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use tracing_subscriber::EnvFilter;

use advised_diffusion::{
    advisor::{AdvisorGenerator, AdvisorStrategy, PairedSplit},
    config::{ModelConfig, SelectionPolicy, TrainConfig},
    datasets::{
        CascadeParams, Dataset, InfluenceDataset, RandomSplit, SampleLoader, SamplePool, Split,
    },
    diffusion::{BetaSchedule, DiffusionModel},
    nn::{ActivationKind, EncoderParams, GnnType},
    train::{pretrain_conditioner, train_diffusion, CheckpointPaths, ParquetScalarWriter, Splits},
};

const SYNTHETIC: &str = "synthetic";

#[derive(Parser, Debug)]
#[command(author, version, about = "Train an advisor-guided graph diffusion model")]
struct Args {
    /// Dataset name; `synthetic` generates independent cascades instead of loading a file
    #[arg(long, default_value = "jazz_IC50")]
    dataset: String,

    /// Directory holding `{dataset}.npz`
    #[arg(long, default_value = "datasets")]
    dataset_root: PathBuf,

    /// zip / tar.gz archive to fetch when the dataset file is missing
    #[arg(long)]
    dataset_url: Option<String>,

    #[arg(long, default_value = "gcn")]
    gnn_type: GnnType,

    #[arg(long, default_value_t = 128)]
    noise_emb_dim: usize,

    #[arg(long, default_value_t = 128)]
    hidden_dim: usize,

    /// Number of message-passing layers
    #[arg(long, default_value_t = 5)]
    num_layers: usize,

    #[arg(long, default_value = "prelu")]
    activation: ActivationKind,

    #[arg(long, default_value_t = 0.0)]
    feat_drop: f32,

    #[arg(long, default_value_t = 0.0)]
    attn_drop: f32,

    /// Negative slope of leaky relu
    #[arg(long, default_value_t = 0.2)]
    negative_slope: f64,

    #[arg(long, default_value_t = true, action = ArgAction::Set)]
    residual: bool,

    /// Step learning-rate decay during diffusion training
    #[arg(long, default_value_t = true, action = ArgAction::Set)]
    scheduler: bool,

    /// Attention heads (gat only)
    #[arg(long, default_value_t = 4)]
    enc_nhead: usize,

    #[arg(long, default_value_t = 4)]
    mlp_layers: usize,

    #[arg(long, default_value_t = 1e-3)]
    lr: f64,

    #[arg(long, default_value_t = 500)]
    max_epoch: usize,

    #[arg(long, default_value = "./saved_diffusers/")]
    save_path: String,

    /// Scalar logs go to `{run_dir}/{run name}/scalars.parquet`
    #[arg(long, default_value = "./runs")]
    run_dir: String,

    /// Advisor strategies, e.g. `lpsi` or `lpsi:0.3`; one advisor channel each
    #[arg(long, value_delimiter = ',', default_value = "lpsi")]
    advisors: Vec<AdvisorStrategy>,

    /// Weight of the advisor term in the training loss
    #[arg(long, default_value_t = 0.5)]
    guide_weight: f64,

    /// Interpolation weight toward the advisor while sampling
    #[arg(long, default_value_t = 0.1)]
    sample_guidance: f64,

    #[arg(long, default_value_t = 500)]
    num_timesteps: usize,

    #[arg(long, default_value = "linear")]
    beta_schedule: BetaSchedule,

    /// Train the denoiser to predict the noise instead of x0
    #[arg(long)]
    pred_eps: bool,

    #[arg(long, default_value = "topk")]
    valid_selection: SelectionPolicy,

    #[arg(long, default_value = "threshold:0.5")]
    test_selection: SelectionPolicy,

    #[arg(long, default_value_t = 44)]
    seed: u64,

    /// Pretrain the conditioner on the advisor scores first
    #[arg(long)]
    train_cond: bool,

    #[arg(long, default_value_t = 10)]
    max_cond_epoch: usize,

    /// Checkpoint to initialise from
    #[arg(long)]
    state_dict: Option<PathBuf>,

    /// Initialise from the latest periodic checkpoint of this run, if any
    #[arg(long, conflicts_with = "state_dict")]
    resume_latest: bool,
}

impl Args {
    fn train_config(&self) -> TrainConfig {
        TrainConfig {
            dataset: self.dataset.clone(),
            save_path: self.save_path.clone(),
            run_dir: self.run_dir.clone(),
            lr: self.lr,
            max_epoch: self.max_epoch,
            scheduler: self.scheduler,
            advisors: self.advisors.clone(),
            train_cond: self.train_cond,
            max_cond_epoch: self.max_cond_epoch,
            seed: self.seed,
            valid_selection: self.valid_selection,
            test_selection: self.test_selection,
            model: ModelConfig {
                num_advisors: self.advisors.len(),
                noise_emb_dim: self.noise_emb_dim,
                hidden_dim: self.hidden_dim,
                mlp_layers: self.mlp_layers,
                encoder: EncoderParams {
                    gnn_type: self.gnn_type,
                    num_layers: self.num_layers,
                    activation: self.activation,
                    feat_drop: self.feat_drop,
                    attn_drop: self.attn_drop,
                    negative_slope: self.negative_slope,
                    residual: self.residual,
                    num_heads: self.enc_nhead,
                },
                beta_schedule: self.beta_schedule,
                num_timesteps: self.num_timesteps,
                pred_x0: !self.pred_eps,
                guide_weight: self.guide_weight,
                sample_guidance: self.sample_guidance,
                ..Default::default()
            },
        }
    }
}

fn load_dataset(args: &Args, rng: &mut ChaCha8Rng) -> anyhow::Result<InfluenceDataset> {
    if args.dataset == SYNTHETIC {
        let pool = SamplePool::cascades(&CascadeParams::default(), &Device::Cpu, rng)?;
        return Ok(pool.random_split([0.6, 0.2, 0.2], rng)?);
    }
    InfluenceDataset::open(
        &args.dataset_root,
        &args.dataset,
        args.dataset_url.as_deref(),
        &Device::Cpu,
    )
    .with_context(|| format!("loading dataset {}", args.dataset))
}

/// Seeds the device RNG behind dropout. Only CUDA exposes one; returns whether it was seeded.
fn seed_device(device: &Device, seed: u64) -> anyhow::Result<bool> {
    if !device.is_cuda() {
        tracing::warn!(?device, "device rng cannot be seeded, dropout masks are not reproducible");
        return Ok(false);
    }
    device.set_seed(seed)?;
    Ok(true)
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("advised_diffusion=info")),
        )
        .init();

    let args = Args::parse();
    if args.advisors.is_empty() {
        anyhow::bail!("at least one advisor is required");
    }
    let config = args.train_config();
    let run_name = config.run_name();

    let device = Device::cuda_if_available(0)?;
    seed_device(&device, config.seed)?;
    let mut rng = ChaCha8Rng::seed_from_u64(config.seed);
    tracing::info!(run = %run_name, ?device, seed = config.seed, "starting");

    let dataset = load_dataset(&args, &mut rng)?;
    let generator = AdvisorGenerator::new(config.advisors.clone());
    let paired = |split: Split| -> anyhow::Result<PairedSplit> {
        let samples = SampleLoader::new(dataset.samples(split), &device)
            .collect::<advised_diffusion::Result<Vec<_>>>()?;
        Ok(generator.generate(split.name(), samples)?)
    };
    let splits = Splits {
        train: paired(Split::Train)?,
        valid: paired(Split::Valid)?,
        test: paired(Split::Test)?,
    };
    tracing::info!(
        dataset = dataset.name(),
        train = splits.train.len(),
        valid = splits.valid.len(),
        test = splits.test.len(),
        "dataset ready"
    );

    let paths = CheckpointPaths::new(&config.save_path, &run_name);
    std::fs::create_dir_all(paths.dir())?;
    config.save(paths.args())?;

    let mut model = DiffusionModel::new(config.model.clone(), &device)?;
    if let Some(path) = &args.state_dict {
        model.load(path)?;
        tracing::info!(path = %path.display(), "loaded checkpoint");
    } else if args.resume_latest {
        match paths.latest_periodic()? {
            Some((epoch, path)) => {
                model.load(&path)?;
                tracing::info!(epoch, path = %path.display(), "resumed from periodic checkpoint");
            }
            None => tracing::warn!(dir = %paths.dir().display(), "no periodic checkpoint to resume from"),
        }
    }

    let mut writer = ParquetScalarWriter::new(Path::new(&config.run_dir).join(&run_name))?;
    if config.train_cond {
        let summary = pretrain_conditioner(&model, &splits, &generator, &config, &mut writer)?;
        tracing::info!(valid_loss = ?summary.valid_loss, lr = summary.lr, "conditioner pretrained");
    }
    let summary = train_diffusion(&model, &splits, &config, &paths, &mut writer, &mut rng)?;

    if let Some((epoch, loss)) = summary.best {
        tracing::info!(epoch, loss, "best validation");
    }
    let m = summary.test.metrics;
    println!(
        "Final test: accuracy {:5.2}% precision {:5.2}% recall {:5.2}% f1 {:.4} ({:?} per sample)",
        100.0 * m.accuracy,
        100.0 * m.precision,
        100.0 * m.recall,
        m.f1,
        summary.test.time_per_sample,
    );
    tracing::info!(
        final_checkpoint = %summary.final_path.display(),
        scalars = %writer.path().display(),
        "done"
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cpu_runs_without_device_seed() -> anyhow::Result<()> {
        assert!(!seed_device(&Device::Cpu, 44)?);
        Ok(())
    }

    #[test]
    fn cli_defaults_match_train_config() {
        let args = Args::parse_from(["advised-diffusion"]);
        let config = args.train_config();
        assert_eq!(config.run_name(), TrainConfig::default().run_name());
        assert_eq!(config.valid_selection, SelectionPolicy::TopK);
        assert_eq!(config.test_selection, SelectionPolicy::Threshold(0.5));
        assert!(config.scheduler);
    }
}
