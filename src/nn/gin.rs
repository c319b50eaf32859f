use candle_core::{Module, Result, Tensor};
use candle_nn::VarBuilder;

use super::{traits::GnnModule, utils::sum_agg, ActivationKind, Mlp};

/// Xu et al. isomorphism layer, `mlp((1 + eps) * x_v + sum_u x_u)`.
pub struct GinConv {
    mlp: Mlp,
    eps: Tensor,
}
impl GinConv {
    pub fn new(
        in_dim: usize,
        out_dim: usize,
        activation: ActivationKind,
        vs: VarBuilder,
    ) -> Result<Self> {
        let hidden_dim = (in_dim + out_dim) / 2;
        Ok(Self {
            mlp: Mlp::new(in_dim, hidden_dim.max(1), out_dim, 2, activation, vs.pp("mlp"))?,
            eps: vs.get_with_hints((1,), "eps", candle_nn::init::Init::Const(0.0))?,
        })
    }
}
impl GnnModule for GinConv {
    fn forward_t(&self, xs: &Tensor, edge_index: &Tensor, _train: bool) -> Result<Tensor> {
        let root = xs.broadcast_mul(&(1.0 + &self.eps)?)?;
        self.mlp.forward(&sum_agg(xs, edge_index, &root)?)
    }
}
