use candle_core::{IndexOp, Result, Tensor, D};
use candle_nn::{ops, Init, VarBuilder};

use super::traits::GnnModule;

/// Multi-head graph attention. Every node also attends to itself, so isolated
/// nodes keep their own projection instead of dividing by an empty sum.
pub struct GatConv {
    in_dim: usize,
    out_dim: usize,
    num_heads: usize,
    attention_dropout: f32,
    negative_slope: f64,
    weight: Tensor,
    att_src: Tensor,
    att_dst: Tensor,
}
impl GatConv {
    pub fn new(
        in_dim: usize,
        out_dim: usize,
        num_heads: usize,
        negative_slope: f64,
        attention_dropout: f32,
        vs: VarBuilder,
    ) -> Result<Self> {
        assert!(out_dim % num_heads == 0);
        let hidden_dim = out_dim / num_heads;
        let bound = (6.0 / (in_dim + out_dim) as f64).sqrt();
        let att_bound = (6.0 / (1 + hidden_dim) as f64).sqrt();
        let att_init = Init::Uniform {
            lo: -att_bound,
            up: att_bound,
        };
        Ok(Self {
            in_dim,
            out_dim,
            weight: vs.get_with_hints(
                (in_dim, out_dim),
                "weight",
                Init::Uniform {
                    lo: -bound,
                    up: bound,
                },
            )?,
            att_src: vs.get_with_hints((1, num_heads, hidden_dim), "att_src", att_init)?,
            att_dst: vs.get_with_hints((1, num_heads, hidden_dim), "att_dst", att_init)?,
            num_heads,
            negative_slope,
            attention_dropout,
        })
    }
}
impl GnnModule for GatConv {
    fn forward_t(&self, x: &Tensor, edge_index: &Tensor, train: bool) -> Result<Tensor> {
        assert_eq!(x.shape().rank(), 2);
        assert_eq!(x.shape().dims()[1], self.in_dim);
        let hidden_dim = self.out_dim / self.num_heads;
        let receiver = edge_index.i((0, ..))?;
        let sender = edge_index.i((1, ..))?;

        let num_nodes = x.shape().dims()[0];
        let h = x
            .matmul(&self.weight)?
            .reshape(&[num_nodes, self.num_heads, hidden_dim])?;

        // (n, heads, 1)
        let a_dst = h.broadcast_mul(&self.att_dst)?.sum_keepdim(D::Minus1)?;
        let a_src = h.broadcast_mul(&self.att_src)?.sum_keepdim(D::Minus1)?;
        let score = |logits: &Tensor| -> Result<Tensor> {
            let a = ops::leaky_relu(logits, self.negative_slope)?.exp()?;
            if train && self.attention_dropout > 0.0 {
                ops::dropout(&a, self.attention_dropout)
            } else {
                Ok(a)
            }
        };
        let a_self = score(&(&a_dst + &a_src)?)?;
        let a_edge = score(&(a_dst.i(&receiver)? + a_src.i(&sender)?)?)?;

        let a_sum = a_self.index_add(&receiver, &a_edge, 0)?;
        h.broadcast_mul(&a_self)?
            .index_add(&receiver, &h.i(&sender)?.broadcast_mul(&a_edge)?, 0)?
            .broadcast_div(&a_sum)?
            .reshape(&[num_nodes, self.out_dim])
    }
}
