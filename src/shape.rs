//! Boundary normalisation of per-node signals.
//!
//! Everything past this point sees node signals as `[1, num_nodes, channels]`.

use candle_core::Tensor;

use crate::{Error, Result};

/// Bring a per-node signal into the canonical `[1, num_nodes, channels]` layout.
///
/// Accepted inputs: `[N]`, `[N, C]`, `[C, N]` (channel-major, only when `C != N`) and
/// `[1, N, C]`. Anything else is a contract breach of the data pipeline.
pub fn node_signal(name: &'static str, xs: &Tensor, num_nodes: usize) -> Result<Tensor> {
    let dims = xs.dims();
    let canonical = match *dims {
        [n] if n == num_nodes => xs.reshape((1, n, 1))?,
        [n, _] if n == num_nodes => xs.unsqueeze(0)?,
        [_, n] if n == num_nodes => xs.t()?.contiguous()?.unsqueeze(0)?,
        [1, n, _] if n == num_nodes => xs.clone(),
        _ => {
            return Err(Error::shape(
                name,
                format!("a signal over {} nodes", num_nodes),
                dims,
            ))
        }
    };
    Ok(canonical)
}

/// `[1, N, C] -> [N, C]`
pub fn per_node(name: &'static str, xs: &Tensor, num_nodes: usize) -> Result<Tensor> {
    Ok(node_signal(name, xs, num_nodes)?.squeeze(0)?)
}
