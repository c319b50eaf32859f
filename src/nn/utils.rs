use candle_core::{DType, IndexOp, Result, Tensor};

/// Number of occurrences of every node id in `index`.
pub fn degree(index: &Tensor, num_nodes: usize) -> Result<Tensor> {
    let ones = Tensor::ones(index.dims1()?, DType::F32, index.device())?;
    Tensor::zeros(num_nodes, DType::F32, index.device())?.index_add(index, &ones, 0)
}

pub fn in_degree(edge_index: &Tensor, num_nodes: usize) -> Result<Tensor> {
    degree(&edge_index.i((0, ..))?, num_nodes)
}

/// `init[v] + sum_{(v, u)} xs[u]`
pub fn sum_agg(xs: &Tensor, edge_index: &Tensor, init: &Tensor) -> Result<Tensor> {
    init.index_add(&edge_index.i((0, ..))?, &xs.i(&edge_index.i((1, ..))?)?, 0)
}

/// `init[v] + sum_{e = (v, u)} edge_weight[e] * xs[u]`
pub fn weighted_sum_agg(
    xs: &Tensor,
    edge_index: &Tensor,
    edge_weight: &Tensor,
    init: &Tensor,
) -> Result<Tensor> {
    let messages = xs
        .i(&edge_index.i((1, ..))?)?
        .broadcast_mul(&edge_weight.unsqueeze(1)?)?;
    init.index_add(&edge_index.i((0, ..))?, &messages, 0)
}

/// Symmetric normalisation `D^{-1/2} A D^{-1/2}` as per-edge weights, together with
/// the `D^{-1/2}` vector. Isolated nodes get degree 1.
pub fn sym_norm_weights(edge_index: &Tensor, num_nodes: usize) -> Result<(Tensor, Tensor)> {
    let inv_sqrt = in_degree(edge_index, num_nodes)?.maximum(1f32)?.powf(-0.5)?;
    let weight = inv_sqrt
        .i(&edge_index.i((0, ..))?)?
        .mul(&inv_sqrt.i(&edge_index.i((1, ..))?)?)?;
    Ok((weight, inv_sqrt))
}
