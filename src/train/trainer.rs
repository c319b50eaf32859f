use std::path::PathBuf;

use candle_core::Var;
use candle_nn::{AdamW, Optimizer, ParamsAdamW};
use indicatif::{ProgressBar, ProgressStyle};
use itertools::Itertools;
use rand::Rng;

use super::{
    checkpoint::{save_snapshot, BestTracker, CheckpointPaths},
    ScalarWriter, StepLr,
};
use crate::{
    advisor::{AdvisorGenerator, PairedSplit},
    config::{SelectionPolicy, TrainConfig},
    diffusion::DiffusionModel,
    eval::{evaluate, Evaluation},
    Result,
};

const EVAL_EVERY: usize = 5;

/// What happens in a given epoch besides training.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EpochPlan {
    pub validate: bool,
    pub test: bool,
    pub checkpoint: bool,
}
impl EpochPlan {
    pub fn for_epoch(epoch: usize, max_epoch: usize) -> Self {
        let periodic = (max_epoch / 5).max(1);
        Self {
            validate: epoch % EVAL_EVERY == 0,
            test: epoch % EVAL_EVERY == 0,
            checkpoint: epoch % periodic == 0,
        }
    }
}

/// Advisor-paired train/valid/test splits of one dataset.
pub struct Splits {
    pub train: PairedSplit,
    pub valid: PairedSplit,
    pub test: PairedSplit,
}

pub struct Validation {
    /// Sum of the per-sample training losses.
    pub loss: f64,
    pub evaluation: Evaluation,
}

pub struct TrainSummary {
    pub best: Option<(usize, f64)>,
    pub best_path: Option<PathBuf>,
    pub final_path: PathBuf,
    pub test: Evaluation,
}

fn adam(vars: Vec<Var>, lr: f64) -> Result<AdamW> {
    Ok(AdamW::new(
        vars,
        ParamsAdamW {
            lr,
            weight_decay: 0.0,
            ..Default::default()
        },
    )?)
}

fn progress_bar(len: usize, prefix: &str) -> Result<ProgressBar> {
    let pbar = ProgressBar::new(len as u64);
    pbar.set_style(
        ProgressStyle::default_bar()
            .template("{prefix} [{elapsed_precise}] [{wide_bar:.cyan/blue}] {pos}/{len} {msg}")?
            .progress_chars("#>-"),
    );
    pbar.set_prefix(prefix.to_owned());
    Ok(pbar)
}

/// One pass over the training split, one optimizer step per sample. Returns the mean loss.
pub fn train_epoch<R: Rng>(
    model: &DiffusionModel,
    split: &PairedSplit,
    optimizer: &mut AdamW,
    mut scheduler: Option<&mut StepLr>,
    rng: &mut R,
) -> Result<f64> {
    let mut total = 0.0;
    for (data, advisor) in split.iter() {
        let step = model.train_step(&data.label, &data.graph, &data.feat, advisor, rng)?;
        optimizer.backward_step(&step.loss)?;
        if let Some(scheduler) = scheduler.as_deref_mut() {
            scheduler.step(&mut *optimizer);
        }
        total += step.loss.to_scalar::<f32>()? as f64;
    }
    Ok(total / split.len().max(1) as f64)
}

/// Loss and sampled metrics on the validation split, logged at `epoch`.
pub fn validate<R: Rng, W: ScalarWriter>(
    model: &DiffusionModel,
    split: &PairedSplit,
    policy: SelectionPolicy,
    epoch: usize,
    writer: &mut W,
    rng: &mut R,
) -> Result<Validation> {
    let mut loss = 0.0;
    let mut guidance = 0.0;
    for (data, advisor) in split.iter() {
        let step = model.eval_loss(&data.label, &data.graph, &data.feat, advisor, rng)?;
        loss += step.loss.to_scalar::<f32>()? as f64;
        guidance += step.guidance.to_scalar::<f32>()? as f64;
    }
    let evaluation = evaluate(model, split, policy, rng)?;

    let mut sample_mean = 0.0;
    let mut sample_max = 0.0;
    for sample in &evaluation.samples {
        sample_mean += sample.mean_all()?.to_scalar::<f32>()? as f64;
        sample_max += sample.flatten_all()?.max(0)?.to_scalar::<f32>()? as f64;
    }
    let count = evaluation.samples.len().max(1) as f64;

    writer.add_scalar("Validation_intrain/Loss", loss, epoch);
    writer.add_scalar("Validation_intrain/Guidance", guidance, epoch);
    writer.add_scalar("Validation_intrain/SampleMean", sample_mean / count, epoch);
    writer.add_scalar("Validation_intrain/SampleMax", sample_max / count, epoch);
    writer.add_scalar("Validation_intrain/Accuracy", evaluation.metrics.accuracy, epoch);
    writer.add_scalar("Validation_intrain/F1", evaluation.metrics.f1, epoch);
    Ok(Validation { loss, evaluation })
}

/// Sampled metrics on the test split, logged at `epoch`.
pub fn test<R: Rng, W: ScalarWriter>(
    model: &DiffusionModel,
    split: &PairedSplit,
    policy: SelectionPolicy,
    epoch: usize,
    writer: &mut W,
    rng: &mut R,
) -> Result<Evaluation> {
    let evaluation = evaluate(model, split, policy, rng)?;
    let m = &evaluation.metrics;
    writer.add_scalar("Test/Accuracy", m.accuracy, epoch);
    writer.add_scalar("Test/Precision", m.precision, epoch);
    writer.add_scalar("Test/Recall", m.recall, epoch);
    writer.add_scalar("Test/F1", m.f1, epoch);
    writer.add_scalar(
        "Test/TimePerSample",
        evaluation.time_per_sample.as_secs_f64(),
        epoch,
    );
    tracing::info!(
        epoch,
        accuracy = m.accuracy,
        precision = m.precision,
        recall = m.recall,
        f1 = m.f1,
        time_per_sample = ?evaluation.time_per_sample,
        "test"
    );
    Ok(evaluation)
}

/// Full diffusion training run with periodic validation, testing and checkpoints.
pub fn train_diffusion<R: Rng, W: ScalarWriter>(
    model: &DiffusionModel,
    splits: &Splits,
    config: &TrainConfig,
    paths: &CheckpointPaths,
    writer: &mut W,
    rng: &mut R,
) -> Result<TrainSummary> {
    std::fs::create_dir_all(paths.dir())?;
    let mut optimizer = adam(model.parameters(), config.lr)?;
    let mut scheduler = config.scheduler.then(|| StepLr::new(config.lr, 200, 0.97));
    let mut tracker = BestTracker::default();
    let mut best_snapshot = None;

    let pbar = progress_bar(config.max_epoch, "diffusion")?;
    for epoch in 0..config.max_epoch {
        let plan = EpochPlan::for_epoch(epoch, config.max_epoch);
        if plan.validate {
            let report = validate(model, &splits.valid, config.valid_selection, epoch, writer, rng)?;
            tracing::info!(
                epoch,
                loss = report.loss,
                f1 = report.evaluation.metrics.f1,
                "validation"
            );
            if tracker.observe(epoch, report.loss) {
                best_snapshot = Some(model.snapshot()?);
            }
        }
        if plan.test {
            test(model, &splits.test, config.test_selection, epoch, writer, rng)?;
        }

        let loss = train_epoch(model, &splits.train, &mut optimizer, scheduler.as_mut(), rng)?;
        writer.add_scalar("Train/Loss_diff", loss, epoch);
        tracing::debug!(epoch, loss, lr = optimizer.learning_rate(), "train");

        if plan.checkpoint {
            model.save(paths.periodic(epoch))?;
        }
        pbar.set_message(format!("loss {:.5}", loss));
        pbar.inc(1);
    }
    pbar.finish();

    let final_path = paths.last();
    model.save(&final_path)?;
    let best_path = match (tracker.best(), best_snapshot) {
        (Some((epoch, loss)), Some(snapshot)) => {
            let path = paths.best(epoch);
            save_snapshot(&snapshot, &path)?;
            tracing::info!(epoch, loss, path = %path.display(), "best checkpoint");
            Some(path)
        }
        _ => None,
    };
    let test = test(
        model,
        &splits.test,
        config.test_selection,
        config.max_epoch + 1,
        writer,
        rng,
    )?;
    writer.flush()?;
    Ok(TrainSummary {
        best: tracker.best(),
        best_path,
        final_path,
        test,
    })
}

pub struct ConditionerSummary {
    /// Last validation loss (mean over samples), if any validation ran.
    pub valid_loss: Option<f64>,
    /// Learning rate after the final step.
    pub lr: f64,
}

/// Fits the conditioner alone to the advisor's normalised scores.
pub fn pretrain_conditioner<W: ScalarWriter>(
    model: &DiffusionModel,
    splits: &Splits,
    generator: &AdvisorGenerator,
    config: &TrainConfig,
    writer: &mut W,
) -> Result<ConditionerSummary> {
    let train_targets = generator.targets(splits.train.samples())?;
    let valid_targets = generator.targets(splits.valid.samples())?;
    let mut optimizer = adam(model.conditioner_parameters()?, config.lr)?;
    let mut scheduler = config.scheduler.then(|| StepLr::new(config.lr, 400, 0.99));

    let mut last = None;
    let pbar = progress_bar(config.max_cond_epoch, "conditioner")?;
    for epoch in 0..config.max_cond_epoch {
        let mut total = 0.0;
        for (data, target) in splits.train.samples().iter().zip_eq(&train_targets) {
            let loss = model.conditioner_loss(&data.graph, &data.feat, target)?;
            optimizer.backward_step(&loss)?;
            if let Some(scheduler) = scheduler.as_mut() {
                scheduler.step(&mut optimizer);
            }
            total += loss.to_scalar::<f32>()? as f64;
        }
        let train_loss = total / splits.train.len().max(1) as f64;
        writer.add_scalar("Conditioner/Train_loss", train_loss, epoch);

        if epoch % EVAL_EVERY == 0 {
            let mut total = 0.0;
            for (data, target) in splits.valid.samples().iter().zip_eq(&valid_targets) {
                let loss = model.conditioner_loss(&data.graph, &data.feat, target)?;
                total += loss.to_scalar::<f32>()? as f64;
            }
            let valid_loss = total / splits.valid.len().max(1) as f64;
            writer.add_scalar("Conditioner/Valid_loss", valid_loss, epoch);
            tracing::info!(epoch, train_loss, valid_loss, "conditioner validation");
            last = Some(valid_loss);
        }
        pbar.set_message(format!("loss {:.5}", train_loss));
        pbar.inc(1);
    }
    pbar.finish();
    Ok(ConditionerSummary {
        valid_loss: last,
        lr: optimizer.learning_rate(),
    })
}
