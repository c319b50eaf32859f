use std::{collections::HashMap, path::Path};

use candle_core::{DType, Device, Tensor, Var};
use candle_nn::{loss, VarBuilder, VarMap};
use rand::Rng;

use super::{standard_normal, Conditioner, Denoiser, NoiseSchedule};
use crate::{config::ModelConfig, graph::Graph, shape, Error, Result};

const CONDITIONER_PREFIX: &str = "conditioner";
const DENOISER_PREFIX: &str = "denoiser";

/// Output of one training step.
pub struct StepLoss {
    /// Reconstruction plus weighted guidance term; this is what gets backpropagated.
    pub loss: Tensor,
    /// Weighted guidance term alone, for diagnostics.
    pub guidance: Tensor,
}

/// Node-label diffusion model conditioned on node features and advisor estimates.
pub struct DiffusionModel {
    config: ModelConfig,
    schedule: NoiseSchedule,
    conditioner: Conditioner,
    denoiser: Denoiser,
    varmap: VarMap,
    device: Device,
}

impl DiffusionModel {
    pub fn new(config: ModelConfig, device: &Device) -> Result<Self> {
        if config.num_timesteps == 0 {
            return Err(Error::TimestepOutOfRange {
                t: 1,
                num_timesteps: 0,
            });
        }
        let varmap = VarMap::new();
        let vs = VarBuilder::from_varmap(&varmap, DType::F32, device);
        let conditioner = Conditioner::new(
            config.feat_dim,
            config.hidden_dim,
            config.encoder.activation,
            vs.pp(CONDITIONER_PREFIX),
        )?;
        let denoiser = Denoiser::new(&config, vs.pp(DENOISER_PREFIX))?;
        Ok(Self {
            schedule: NoiseSchedule::new(config.beta_schedule, config.num_timesteps),
            config,
            conditioner,
            denoiser,
            varmap,
            device: device.clone(),
        })
    }

    pub fn config(&self) -> &ModelConfig {
        &self.config
    }
    pub fn schedule(&self) -> &NoiseSchedule {
        &self.schedule
    }
    pub fn device(&self) -> &Device {
        &self.device
    }

    /// Every trainable variable, conditioner included.
    pub fn parameters(&self) -> Vec<Var> {
        self.varmap.all_vars()
    }

    /// Only the conditioner's variables.
    pub fn conditioner_parameters(&self) -> Result<Vec<Var>> {
        let prefix = format!("{}.", CONDITIONER_PREFIX);
        let data = self
            .varmap
            .data()
            .lock()
            .map_err(|_| candle_core::Error::Msg("variable map lock poisoned".to_owned()))?;
        Ok(data
            .iter()
            .filter(|(name, _)| name.starts_with(&prefix))
            .map(|(_, var)| var.clone())
            .collect())
    }

    /// Returns `(raw network output, x0 estimate)`, both `[num_nodes, in_dim]`.
    #[allow(clippy::too_many_arguments)]
    fn predict(
        &self,
        x_t: &Tensor,
        t: usize,
        feat: &Tensor,
        advisor: &Tensor,
        guess: &Tensor,
        graph: &Graph,
        train: bool,
    ) -> Result<(Tensor, Tensor)> {
        let out = self
            .denoiser
            .forward_t(x_t, t, feat, advisor, guess, graph.edge_index(), train)?;
        let x0 = if self.config.pred_x0 {
            out.clone()
        } else {
            self.schedule.x0_from_eps(x_t, t, &out)?
        };
        Ok((out, x0))
    }

    /// Denoising loss at a uniformly drawn timestep plus the advisor guidance term.
    ///
    /// `gt`, `cond` and `advisor` may come in any layout accepted by
    /// [`shape::node_signal`].
    pub fn train_step<R: Rng>(
        &self,
        gt: &Tensor,
        graph: &Graph,
        cond: &Tensor,
        advisor: &Tensor,
        rng: &mut R,
    ) -> Result<StepLoss> {
        self.step_loss(gt, graph, cond, advisor, true, rng)
    }

    /// Same loss as [`Self::train_step`] with dropout disabled, for validation.
    pub fn eval_loss<R: Rng>(
        &self,
        gt: &Tensor,
        graph: &Graph,
        cond: &Tensor,
        advisor: &Tensor,
        rng: &mut R,
    ) -> Result<StepLoss> {
        self.step_loss(gt, graph, cond, advisor, false, rng)
    }

    fn step_loss<R: Rng>(
        &self,
        gt: &Tensor,
        graph: &Graph,
        cond: &Tensor,
        advisor: &Tensor,
        train: bool,
        rng: &mut R,
    ) -> Result<StepLoss> {
        let n = graph.num_nodes();
        let gt = shape::node_signal("ground truth", gt, n)?;
        assert_eq!(gt.rank(), 3);
        let x0 = gt.squeeze(0)?;
        let feat = shape::per_node("features", cond, n)?;
        let advisor = shape::per_node("advisor", advisor, n)?;

        let t = rng.random_range(1..=self.schedule.num_timesteps());
        let (x_t, eps) = self.schedule.forward_noise(&x0, t, rng)?;
        let guess = self
            .conditioner
            .forward_t(&feat, graph.edge_index(), train)?;
        let (out, x0_hat) = self.predict(&x_t, t, &feat, &advisor, &guess, graph, train)?;

        let target = if self.config.pred_x0 { &x0 } else { &eps };
        let recon = loss::mse(&out, target)?;
        let advice = advisor.mean_keepdim(1)?;
        let guidance = loss::mse(&x0_hat, &advice.broadcast_as(x0_hat.shape())?)?
            .affine(self.config.guide_weight, 0.0)?;
        Ok(StepLoss {
            loss: (recon + &guidance)?,
            guidance,
        })
    }

    /// Reverse process from pure noise; returns label probabilities `[1, num_nodes, in_dim]`.
    /// Nothing is tracked for backprop: every network output is detached.
    pub fn sample<R: Rng>(
        &self,
        graph: &Graph,
        cond: &Tensor,
        advisor: &Tensor,
        rng: &mut R,
    ) -> Result<Tensor> {
        let n = graph.num_nodes();
        let feat = shape::node_signal("features", cond, n)?;
        let advisor = shape::node_signal("advisor", advisor, n)?;
        assert_eq!(feat.rank(), 3);
        assert_eq!(advisor.rank(), 3);
        let feat = feat.squeeze(0)?;
        let advisor = advisor.squeeze(0)?;

        let w = self.config.sample_guidance;
        let advice = advisor.mean_keepdim(1)?.affine(w, 0.0)?;
        let guess = self
            .conditioner
            .forward_t(&feat, graph.edge_index(), false)?
            .detach();

        let mut x_t = standard_normal(&[n, self.config.in_dim], &self.device, rng)?;
        let mut x0 = x_t.zeros_like()?;
        for t in (1..=self.schedule.num_timesteps()).rev() {
            let (_, pred) = self.predict(&x_t, t, &feat, &advisor, &guess, graph, false)?;
            x0 = pred
                .detach()
                .maximum(0f32)?
                .minimum(1f32)?
                .affine(1.0 - w, 0.0)?
                .broadcast_add(&advice)?;
            if t > 1 {
                let posterior = self.schedule.posterior(t)?;
                let mean = (x0.affine(posterior.x0_coef, 0.0)?
                    + x_t.affine(posterior.xt_coef, 0.0)?)?;
                let z = standard_normal(mean.dims(), &self.device, rng)?;
                x_t = (mean + z.affine(posterior.variance.sqrt(), 0.0)?)?;
            }
        }
        let sample = x0.detach().unsqueeze(0)?;
        assert_eq!(sample.rank(), 3);
        Ok(sample)
    }

    /// Conditioner output `[num_nodes, 1]` for the given features.
    pub fn condition(&self, graph: &Graph, cond: &Tensor) -> Result<Tensor> {
        let feat = shape::per_node("features", cond, graph.num_nodes())?;
        Ok(self.conditioner.forward_t(&feat, graph.edge_index(), false)?)
    }

    /// Regression loss of the conditioner against a per-node target.
    pub fn conditioner_loss(&self, graph: &Graph, cond: &Tensor, target: &Tensor) -> Result<Tensor> {
        let n = graph.num_nodes();
        let feat = shape::per_node("features", cond, n)?;
        let target = shape::per_node("conditioner target", target, n)?;
        Ok(self.conditioner.loss(&feat, graph.edge_index(), &target)?)
    }

    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        Ok(self.varmap.save(path)?)
    }

    pub fn load<P: AsRef<Path>>(&mut self, path: P) -> Result<()> {
        let path = path.as_ref();
        if !path.exists() {
            return Err(Error::CheckpointNotFound(path.to_path_buf()));
        }
        Ok(self.varmap.load(path)?)
    }

    /// Detached copy of every variable, suitable for `candle_core::safetensors::save`.
    pub fn snapshot(&self) -> Result<HashMap<String, Tensor>> {
        let data = self
            .varmap
            .data()
            .lock()
            .map_err(|_| candle_core::Error::Msg("variable map lock poisoned".to_owned()))?;
        data.iter()
            .map(|(name, var)| Ok((name.clone(), var.as_tensor().copy()?)))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::nn::EncoderParams;
    use candle_nn::{AdamW, Optimizer, ParamsAdamW};
    use rand::SeedableRng;
    use rand_chacha::ChaCha8Rng;

    fn tiny_config() -> ModelConfig {
        ModelConfig {
            noise_emb_dim: 8,
            hidden_dim: 8,
            mlp_layers: 2,
            num_timesteps: 8,
            encoder: EncoderParams {
                num_layers: 2,
                ..Default::default()
            },
            ..Default::default()
        }
    }

    fn ring(n: u32, device: &Device) -> Result<Graph> {
        let edges = (0..n).map(|i| (i, (i + 1) % n)).collect::<Vec<_>>();
        Graph::undirected(n as usize, &edges, device)
    }

    #[test]
    fn sampling_is_deterministic_under_a_seed() -> Result<()> {
        let device = Device::Cpu;
        let model = DiffusionModel::new(tiny_config(), &device)?;
        let graph = ring(6, &device)?;
        let feat = Tensor::new(&[1f32, 1., 0., 0., 0., 1.], &device)?;
        let advisor = Tensor::new(&[[1f32], [0.], [0.], [0.], [0.], [0.]], &device)?;
        let draw = |seed| -> Result<Vec<f32>> {
            let mut rng = ChaCha8Rng::seed_from_u64(seed);
            let sample = model.sample(&graph, &feat, &advisor, &mut rng)?;
            Ok(sample.flatten_all()?.to_vec1::<f32>()?)
        };
        assert_eq!(draw(11)?, draw(11)?);
        Ok(())
    }

    #[test]
    fn sample_shape_does_not_depend_on_input_rank() -> Result<()> {
        let device = Device::Cpu;
        let model = DiffusionModel::new(tiny_config(), &device)?;
        let graph = ring(5, &device)?;
        let feat2 = Tensor::ones((5, 1), DType::F32, &device)?;
        let feat3 = feat2.unsqueeze(0)?;
        let adv2 = Tensor::zeros((5, 1), DType::F32, &device)?;
        let adv3 = adv2.unsqueeze(0)?;
        let mut rng = ChaCha8Rng::seed_from_u64(0);
        let a = model.sample(&graph, &feat2, &adv2, &mut rng)?;
        let b = model.sample(&graph, &feat3, &adv3, &mut rng)?;
        assert_eq!(a.dims(), [1, 5, 1]);
        assert_eq!(b.dims(), [1, 5, 1]);
        Ok(())
    }

    #[test]
    fn sample_stays_in_unit_interval() -> Result<()> {
        let device = Device::Cpu;
        let model = DiffusionModel::new(tiny_config(), &device)?;
        let graph = ring(4, &device)?;
        let feat = Tensor::ones(4, DType::F32, &device)?;
        let advisor = Tensor::ones(4, DType::F32, &device)?;
        let mut rng = ChaCha8Rng::seed_from_u64(5);
        let values = model
            .sample(&graph, &feat, &advisor, &mut rng)?
            .flatten_all()?
            .to_vec1::<f32>()?;
        assert!(values.iter().all(|v| (0.0..=1.0).contains(v)));
        Ok(())
    }

    #[test]
    fn sampling_leaves_no_gradient_path() -> Result<()> {
        let device = Device::Cpu;
        let model = DiffusionModel::new(tiny_config(), &device)?;
        let graph = ring(5, &device)?;
        let feat = Tensor::new(&[1f32, 1., 0., 0., 1.], &device)?;
        let advisor = Tensor::new(&[1f32, 0., 0., 0., 0.], &device)?;
        let mut rng = ChaCha8Rng::seed_from_u64(4);
        let sample = model.sample(&graph, &feat, &advisor, &mut rng)?;
        let grads = sample.sum_all()?.backward()?;
        for var in model.parameters() {
            assert!(grads.get(var.as_tensor()).is_none());
        }
        Ok(())
    }

    #[test]
    fn eval_loss_ignores_dropout() -> Result<()> {
        let device = Device::Cpu;
        let config = ModelConfig {
            encoder: EncoderParams {
                num_layers: 2,
                feat_drop: 0.9,
                ..Default::default()
            },
            ..tiny_config()
        };
        let model = DiffusionModel::new(config, &device)?;
        let graph = ring(6, &device)?;
        let feat = Tensor::new(&[1f32, 1., 0., 0., 0., 1.], &device)?;
        let gt = Tensor::new(&[1f32, 0., 0., 0., 0., 0.], &device)?;
        let loss = |seed| -> Result<f32> {
            let mut rng = ChaCha8Rng::seed_from_u64(seed);
            Ok(model
                .eval_loss(&gt, &graph, &feat, &gt, &mut rng)?
                .loss
                .to_scalar::<f32>()?)
        };
        assert_eq!(loss(8)?, loss(8)?);
        Ok(())
    }

    #[test]
    fn train_step_rejects_mismatched_ground_truth() -> Result<()> {
        let device = Device::Cpu;
        let model = DiffusionModel::new(tiny_config(), &device)?;
        let graph = ring(4, &device)?;
        let feat = Tensor::ones((4, 1), DType::F32, &device)?;
        let gt = Tensor::ones((3, 1), DType::F32, &device)?;
        let mut rng = ChaCha8Rng::seed_from_u64(0);
        let result = model.train_step(&gt, &graph, &feat, &feat, &mut rng);
        assert!(matches!(result, Err(Error::Shape { .. })));
        Ok(())
    }

    #[test]
    fn train_step_reports_both_terms() -> Result<()> {
        let device = Device::Cpu;
        for pred_x0 in [true, false] {
            let config = ModelConfig {
                pred_x0,
                ..tiny_config()
            };
            let model = DiffusionModel::new(config, &device)?;
            let graph = ring(4, &device)?;
            let feat = Tensor::new(&[1f32, 1., 0., 0.], &device)?;
            let gt = Tensor::new(&[1f32, 0., 0., 0.], &device)?;
            let mut rng = ChaCha8Rng::seed_from_u64(2);
            let step = model.train_step(&gt, &graph, &feat, &gt, &mut rng)?;
            let loss = step.loss.to_scalar::<f32>()?;
            let guidance = step.guidance.to_scalar::<f32>()?;
            assert!(loss.is_finite() && guidance >= 0.0 && loss >= guidance);
        }
        Ok(())
    }

    #[test]
    fn checkpoint_round_trip_reproduces_samples() -> Result<()> {
        let device = Device::Cpu;
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("model.safetensors");
        let graph = ring(6, &device)?;
        let feat = Tensor::new(&[1f32, 0., 1., 0., 0., 0.], &device)?;
        let advisor = Tensor::new(&[0f32, 0., 1., 0., 0., 0.], &device)?;

        let model = DiffusionModel::new(tiny_config(), &device)?;
        model.save(&path)?;
        let mut restored = DiffusionModel::new(tiny_config(), &device)?;
        restored.load(&path)?;

        let mut rng = ChaCha8Rng::seed_from_u64(9);
        let a = model.sample(&graph, &feat, &advisor, &mut rng)?;
        let mut rng = ChaCha8Rng::seed_from_u64(9);
        let b = restored.sample(&graph, &feat, &advisor, &mut rng)?;
        assert_eq!(
            a.flatten_all()?.to_vec1::<f32>()?,
            b.flatten_all()?.to_vec1::<f32>()?
        );
        Ok(())
    }

    #[test]
    fn missing_checkpoint_is_reported() -> Result<()> {
        let mut model = DiffusionModel::new(tiny_config(), &Device::Cpu)?;
        let result = model.load("/nonexistent/model.safetensors");
        assert!(matches!(result, Err(Error::CheckpointNotFound(_))));
        Ok(())
    }

    #[test]
    fn conditioner_learns_identity_mapping() -> Result<()> {
        let device = Device::Cpu;
        let model = DiffusionModel::new(tiny_config(), &device)?;
        let graph = ring(8, &device)?;
        let feat = Tensor::new(&[1f32, 0., 0., 1., 1., 0., 1., 0.], &device)?;
        let mut optimizer = AdamW::new(
            model.conditioner_parameters()?,
            ParamsAdamW {
                lr: 0.01,
                weight_decay: 0.0,
                ..Default::default()
            },
        )?;
        let before = model.conditioner_loss(&graph, &feat, &feat)?.to_scalar::<f32>()?;
        for _ in 0..200 {
            let loss = model.conditioner_loss(&graph, &feat, &feat)?;
            optimizer.backward_step(&loss)?;
        }
        let after = model.conditioner_loss(&graph, &feat, &feat)?.to_scalar::<f32>()?;
        assert!(after < before, "before={before} after={after}");
        Ok(())
    }

    #[test]
    fn conditioner_parameters_are_a_strict_subset() -> Result<()> {
        let model = DiffusionModel::new(tiny_config(), &Device::Cpu)?;
        let subset = model.conditioner_parameters()?.len();
        assert!(subset > 0);
        assert!(subset < model.parameters().len());
        Ok(())
    }
}
