use candle_core::{Module, Result, Tensor};
use candle_nn::{Linear, VarBuilder};

use super::{linear, Act, ActivationKind};

/// Stack of linear layers with a shared activation between them (none after the last).
pub struct Mlp {
    layers: Vec<Linear>,
    act: Act,
}
impl Mlp {
    /// `num_layers` linear maps: `in_dim -> hidden_dim -> ... -> out_dim`.
    pub fn new(
        in_dim: usize,
        hidden_dim: usize,
        out_dim: usize,
        num_layers: usize,
        activation: ActivationKind,
        vs: VarBuilder,
    ) -> Result<Self> {
        let num_layers = num_layers.max(1);
        let mut layers = Vec::with_capacity(num_layers);
        for i in 0..num_layers {
            let d_in = if i == 0 { in_dim } else { hidden_dim };
            let d_out = if i + 1 == num_layers { out_dim } else { hidden_dim };
            layers.push(linear(d_in, d_out, vs.pp(format!("layer_{}", i)))?);
        }
        Ok(Self {
            layers,
            act: Act::new(activation, 0.2, vs.pp("act"))?,
        })
    }
}
impl Module for Mlp {
    fn forward(&self, xs: &Tensor) -> Result<Tensor> {
        let mut h = self.layers[0].forward(xs)?;
        for layer in &self.layers[1..] {
            h = layer.forward(&self.act.forward(&h)?)?;
        }
        Ok(h)
    }
}
