use candle_core::{Module, Result, Tensor};
use candle_nn::{loss, ops, Linear, VarBuilder};

use crate::nn::{linear, Act, ActivationKind, GcnConv, GnnModule};

/// Maps observed node features to a per-node label probability `[num_nodes, 1]`.
///
/// One propagation step with a skip connection, so that both a purely local and a
/// neighbourhood-smoothed mapping are representable.
pub struct Conditioner {
    lift: Linear,
    conv: GcnConv,
    act: Act,
    proj: Linear,
}
impl Conditioner {
    pub fn new(
        feat_dim: usize,
        hidden_dim: usize,
        activation: ActivationKind,
        vs: VarBuilder,
    ) -> Result<Self> {
        Ok(Self {
            lift: linear(feat_dim, hidden_dim, vs.pp("lift"))?,
            conv: GcnConv::new(hidden_dim, hidden_dim, vs.pp("conv"))?,
            act: Act::new(activation, 0.2, vs.pp("act"))?,
            proj: linear(hidden_dim, 1, vs.pp("proj"))?,
        })
    }

    pub fn forward_t(&self, feat: &Tensor, edge_index: &Tensor, train: bool) -> Result<Tensor> {
        let h = self.lift.forward(feat)?;
        let h = (self.conv.forward_t(&h, edge_index, train)? + h)?;
        ops::sigmoid(&self.proj.forward(&self.act.forward(&h)?)?)
    }

    /// Mean squared error against a per-node target of the same shape.
    pub fn loss(&self, feat: &Tensor, edge_index: &Tensor, target: &Tensor) -> Result<Tensor> {
        loss::mse(&self.forward_t(feat, edge_index, true)?, target)
    }
}
