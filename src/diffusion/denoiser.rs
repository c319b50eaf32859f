use candle_core::{Device, Module, Result, Tensor};
use candle_nn::{ops, Linear, VarBuilder};

use crate::config::ModelConfig;
use crate::nn::{linear, GnnEncoder, GnnModule, Mlp};

/// Transformer-style sinusoidal embedding of an integer timestep, `[1, dim]`.
pub fn timestep_embedding(t: usize, dim: usize, device: &Device) -> Result<Tensor> {
    let half = dim / 2;
    let mut emb = vec![0f32; dim];
    for i in 0..half {
        let freq = (-(10_000f64.ln()) * i as f64 / half as f64).exp();
        let arg = t as f64 * freq;
        emb[i] = arg.sin() as f32;
        emb[half + i] = arg.cos() as f32;
    }
    Tensor::from_vec(emb, (1, dim), device)
}

/// Per-node denoising network.
///
/// Input channels are `[x_t | feat | advisor | conditioner guess]`; the timestep enters
/// as a broadcast embedding added after the input projection.
pub struct Denoiser {
    input_proj: Linear,
    time_mlp: Mlp,
    encoder: GnnEncoder,
    head: Mlp,
    noise_emb_dim: usize,
    squash: bool,
}
impl Denoiser {
    pub fn new(config: &ModelConfig, vs: VarBuilder) -> Result<Self> {
        let in_channels = config.in_dim + config.feat_dim + config.num_advisors + 1;
        let activation = config.encoder.activation;
        Ok(Self {
            input_proj: linear(in_channels, config.hidden_dim, vs.pp("input_proj"))?,
            time_mlp: Mlp::new(
                config.noise_emb_dim,
                config.hidden_dim,
                config.hidden_dim,
                2,
                activation,
                vs.pp("time_mlp"),
            )?,
            encoder: GnnEncoder::new(config.hidden_dim, &config.encoder, vs.pp("encoder"))?,
            head: Mlp::new(
                config.hidden_dim,
                config.hidden_dim,
                config.in_dim,
                config.mlp_layers,
                activation,
                vs.pp("head"),
            )?,
            noise_emb_dim: config.noise_emb_dim,
            squash: config.pred_x0,
        })
    }

    /// All per-node inputs are `[num_nodes, channels]`; returns `[num_nodes, in_dim]`.
    #[allow(clippy::too_many_arguments)]
    pub fn forward_t(
        &self,
        x_t: &Tensor,
        t: usize,
        feat: &Tensor,
        advisor: &Tensor,
        guess: &Tensor,
        edge_index: &Tensor,
        train: bool,
    ) -> Result<Tensor> {
        let xs = Tensor::cat(&[x_t, feat, advisor, guess], 1)?;
        let temb = timestep_embedding(t, self.noise_emb_dim, xs.device())?;
        let h = self
            .input_proj
            .forward(&xs)?
            .broadcast_add(&self.time_mlp.forward(&temb)?)?;
        let h = self.encoder.forward_t(&h, edge_index, train)?;
        let out = self.head.forward(&h)?;
        if self.squash {
            ops::sigmoid(&out)
        } else {
            Ok(out)
        }
    }
}
