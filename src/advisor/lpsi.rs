//! Label propagation based source identification (Wang et al., AAAI 2017).
//!
//! Observed states `Y` (+1 infected, -1 otherwise) are propagated with
//! `G <- alpha * S G + (1 - alpha) * Y`, `S = D^{-1/2} A D^{-1/2}`, until the
//! fixed point `(1 - alpha) (I - alpha S)^{-1} Y` is reached. Sources are the
//! positive local maxima of `G`.

use candle_core::{DType, Tensor};
use serde::{Deserialize, Serialize};

use crate::{
    graph::Graph,
    nn::utils::{sym_norm_weights, weighted_sum_agg},
    shape, Result,
};

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LpsiParams {
    pub alpha: f64,
    pub max_iter: usize,
    pub tol: f32,
}
impl Default for LpsiParams {
    fn default() -> Self {
        Self {
            alpha: 0.5,
            max_iter: 500,
            tol: 1e-6,
        }
    }
}

#[derive(Debug, Clone)]
pub struct LpsiEstimate {
    /// 1 for detected sources, 0 elsewhere, `[num_nodes, 1]`.
    pub seeds: Tensor,
    /// Converged propagation score, `[num_nodes, 1]`.
    pub scores: Tensor,
    pub iterations: usize,
}
impl LpsiEstimate {
    /// Scores min-max scaled to `[0, 1]`; a constant score maps to zero.
    pub fn normalized_scores(&self) -> Result<Tensor> {
        let flat = self.scores.flatten_all()?;
        let lo = flat.min(0)?.to_scalar::<f32>()?;
        let hi = flat.max(0)?.to_scalar::<f32>()?;
        if hi - lo <= f32::EPSILON {
            return Ok(self.scores.zeros_like()?);
        }
        let scale = 1.0 / (hi - lo) as f64;
        Ok(self.scores.affine(scale, -(lo as f64) * scale)?)
    }
}

/// `feat` is any per-node layout accepted by [`shape::node_signal`]; its first channel
/// is the observed indicator.
pub fn lpsi(feat: &Tensor, graph: &Graph, params: &LpsiParams) -> Result<LpsiEstimate> {
    let num_nodes = graph.num_nodes();
    let edge_index = graph.edge_index();
    let observed = shape::per_node("feat", feat, num_nodes)?.narrow(1, 0, 1)?;
    let y = observed
        .gt(0f32)?
        .to_dtype(DType::F32)?
        .affine(2.0, -1.0)?;

    let (edge_weight, _) = sym_norm_weights(edge_index, num_nodes)?;
    let base = y.affine(1.0 - params.alpha, 0.0)?;
    let mut g = y;
    let mut iterations = 0;
    while iterations < params.max_iter {
        iterations += 1;
        let next = weighted_sum_agg(&g.affine(params.alpha, 0.0)?, edge_index, &edge_weight, &base)?;
        let delta = (&next - &g)?
            .abs()?
            .flatten_all()?
            .max(0)?
            .to_scalar::<f32>()?;
        g = next;
        if delta < params.tol {
            break;
        }
    }

    let scores = g.flatten_all()?.to_vec1::<f32>()?;
    let seeds = graph
        .neighbours()?
        .iter()
        .enumerate()
        .map(|(v, neighbours)| {
            let is_peak = scores[v] > 0.0 && neighbours.iter().all(|&u| scores[v] > scores[u]);
            if is_peak {
                1f32
            } else {
                0f32
            }
        })
        .collect::<Vec<_>>();
    let seeds = Tensor::from_vec(seeds, (num_nodes, 1), g.device())?;
    Ok(LpsiEstimate {
        seeds,
        scores: g,
        iterations,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use candle_core::Device;

    #[test]
    fn centre_of_infected_path_is_the_source() -> Result<()> {
        let device = Device::Cpu;
        // 0 - 1 - 2 - 3 - 4 - 5 - 6, nodes 1..=5 infected
        let edges = [(0, 1), (1, 2), (2, 3), (3, 4), (4, 5), (5, 6)];
        let graph = Graph::undirected(7, &edges, &device)?;
        let feat = Tensor::new(&[0f32, 1., 1., 1., 1., 1., 0.], &device)?;
        let estimate = lpsi(&feat, &graph, &LpsiParams::default())?;
        assert!(estimate.iterations < LpsiParams::default().max_iter);
        assert_eq!(
            estimate.seeds.flatten_all()?.to_vec1::<f32>()?,
            [0.0, 0.0, 0.0, 1.0, 0.0, 0.0, 0.0]
        );
        Ok(())
    }

    #[test]
    fn isolated_infected_nodes_are_sources() -> Result<()> {
        let device = Device::Cpu;
        let graph = Graph::undirected(3, &[(0, 1)], &device)?;
        let feat = Tensor::new(&[[0f32], [0.], [1.]], &device)?;
        let estimate = lpsi(&feat, &graph, &LpsiParams::default())?;
        assert_eq!(estimate.seeds.flatten_all()?.to_vec1::<f32>()?, [0.0, 0.0, 1.0]);
        Ok(())
    }

    #[test]
    fn normalized_scores_span_unit_interval() -> Result<()> {
        let device = Device::Cpu;
        let graph = Graph::undirected(4, &[(0, 1), (1, 2), (2, 3)], &device)?;
        let feat = Tensor::new(&[1f32, 1., 0., 0.], &device)?;
        let scores = lpsi(&feat, &graph, &LpsiParams::default())?
            .normalized_scores()?
            .flatten_all()?
            .to_vec1::<f32>()?;
        let lo = scores.iter().cloned().fold(f32::INFINITY, f32::min);
        let hi = scores.iter().cloned().fold(f32::NEG_INFINITY, f32::max);
        assert!(lo.abs() < 1e-6 && (hi - 1.0).abs() < 1e-6);
        Ok(())
    }
}
