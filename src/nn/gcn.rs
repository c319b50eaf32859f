use candle_core::{IndexOp, Result, Tensor};
use candle_nn::{Init, VarBuilder};

use super::{
    traits::GnnModule,
    utils::{in_degree, weighted_sum_agg},
};

/// Kipf & Welling convolution with self loops, `D^{-1/2} (A + I) D^{-1/2} X W + b`.
pub struct GcnConv {
    weight: Tensor,
    bias: Tensor,
}
impl GcnConv {
    pub fn new(in_dim: usize, out_dim: usize, vs: VarBuilder) -> Result<Self> {
        // Xavier Uniform
        let bound = (6.0 / (in_dim + out_dim) as f64).sqrt();
        let weight = vs.get_with_hints(
            (in_dim, out_dim),
            "weight",
            Init::Uniform {
                lo: -bound,
                up: bound,
            },
        )?;
        let bias = vs.get_with_hints((1, out_dim), "bias", Init::Const(0.0))?;
        Ok(Self { weight, bias })
    }
}
impl GnnModule for GcnConv {
    fn forward_t(&self, xs: &Tensor, edge_index: &Tensor, _train: bool) -> Result<Tensor> {
        let num_nodes = xs.dim(0)?;
        let degree = in_degree(edge_index, num_nodes)?.affine(1.0, 1.0)?;
        let inv_sqrt = degree.powf(-0.5)?;
        let edge_weight = inv_sqrt
            .i(&edge_index.i((0, ..))?)?
            .mul(&inv_sqrt.i(&edge_index.i((1, ..))?)?)?;
        let xs = xs.matmul(&self.weight)?;
        let self_loop = xs.broadcast_mul(&degree.recip()?.unsqueeze(1)?)?;
        weighted_sum_agg(&xs, edge_index, &edge_weight, &self_loop)?.broadcast_add(&self.bias)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use candle_core::{DType, Device};
    use candle_nn::VarMap;

    #[test]
    fn output_shape_and_isolated_node() -> Result<()> {
        let device = Device::Cpu;
        let varmap = VarMap::new();
        let vs = VarBuilder::from_varmap(&varmap, DType::F32, &device);
        let conv = GcnConv::new(2, 3, vs)?;
        // node 2 is isolated
        let edge_index = Tensor::new(&[[0u32, 1], [1, 0]], &device)?;
        let xs = Tensor::ones((3, 2), DType::F32, &device)?;
        let h = conv.forward(&xs, &edge_index)?;
        assert_eq!(h.dims(), [3, 3]);
        // with all-ones input every node sees the same normalised mass
        let rows = h.to_vec2::<f32>()?;
        for (a, b) in rows[0].iter().zip(&rows[2]) {
            assert!((a - b).abs() < 1e-5);
        }
        Ok(())
    }
}
