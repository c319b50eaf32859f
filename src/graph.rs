use candle_core::{DType, Device, Tensor};

use crate::{shape, Error, Result};

/// Graph structure shared by every sample of a dataset.
#[derive(Debug, Clone)]
pub struct Graph {
    num_nodes: usize,
    edge_index: Tensor,
}
impl Graph {
    /// `edge_index` is `[2, num_edges]`; row 0 receives, row 1 sends.
    pub fn new(num_nodes: usize, edge_index: Tensor) -> Result<Self> {
        let dims = edge_index.dims();
        if dims.len() != 2 || dims[0] != 2 {
            return Err(Error::shape("edge_index", "[2, num_edges]", dims));
        }
        Ok(Self {
            num_nodes,
            edge_index: edge_index.to_dtype(DType::U32)?,
        })
    }
    /// Undirected graph from an edge list; both directions are stored.
    pub fn undirected(num_nodes: usize, edges: &[(u32, u32)], device: &Device) -> Result<Self> {
        let mut receiver = Vec::with_capacity(2 * edges.len());
        let mut sender = Vec::with_capacity(2 * edges.len());
        for &(u, v) in edges {
            receiver.extend([u, v]);
            sender.extend([v, u]);
        }
        let num_edges = receiver.len();
        receiver.extend(sender);
        Self::new(num_nodes, Tensor::from_vec(receiver, (2, num_edges), device)?)
    }
    pub fn num_nodes(&self) -> usize {
        self.num_nodes
    }
    pub fn num_edges(&self) -> usize {
        self.edge_index.dims()[1]
    }
    pub fn edge_index(&self) -> &Tensor {
        &self.edge_index
    }
    pub fn to_device(&self, device: &Device) -> Result<Self> {
        Ok(Self {
            num_nodes: self.num_nodes,
            edge_index: self.edge_index.to_device(device)?,
        })
    }
    /// Host-side adjacency lists, indexed by receiving node.
    pub fn neighbours(&self) -> Result<Vec<Vec<usize>>> {
        let rows = self.edge_index.to_vec2::<u32>()?;
        let mut adjacency = vec![Vec::new(); self.num_nodes];
        for (&v, &u) in rows[0].iter().zip(&rows[1]) {
            adjacency[v as usize].push(u as usize);
        }
        Ok(adjacency)
    }
}

/// One observation on a graph: observed indicator `feat` and ground truth `label`,
/// both `[num_nodes, channels]` in `f32`.
#[derive(Debug, Clone)]
pub struct GraphSample {
    pub graph: Graph,
    pub feat: Tensor,
    pub label: Tensor,
}
impl GraphSample {
    pub fn new(graph: Graph, feat: &Tensor, label: &Tensor) -> Result<Self> {
        let n = graph.num_nodes();
        let feat = shape::per_node("feat", &feat.to_dtype(DType::F32)?, n)?;
        let label = shape::per_node("label", &label.to_dtype(DType::F32)?, n)?;
        Ok(Self { graph, feat, label })
    }
    pub fn num_nodes(&self) -> usize {
        self.graph.num_nodes()
    }
    pub fn to_device(&self, device: &Device) -> Result<Self> {
        Ok(Self {
            graph: self.graph.to_device(device)?,
            feat: self.feat.to_device(device)?,
            label: self.label.to_device(device)?,
        })
    }
    /// Ground truth as a flat boolean vector (`label > 0`).
    pub fn positives(&self) -> Result<Vec<bool>> {
        Ok(self
            .label
            .flatten_all()?
            .to_vec1::<f32>()?
            .into_iter()
            .map(|y| y > 0.0)
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn undirected_stores_both_directions() -> Result<()> {
        let graph = Graph::undirected(3, &[(0, 1), (1, 2)], &Device::Cpu)?;
        assert_eq!(graph.num_edges(), 4);
        assert_eq!(graph.neighbours()?, vec![vec![1], vec![0, 2], vec![1]]);
        Ok(())
    }

    #[test]
    fn sample_signals_are_node_major() -> Result<()> {
        let device = Device::Cpu;
        let graph = Graph::undirected(3, &[(0, 1)], &device)?;
        let feat = Tensor::new(&[1f32, 0., 1.], &device)?;
        let label = Tensor::new(&[[[0f32], [0.], [1.]]], &device)?;
        let sample = GraphSample::new(graph, &feat, &label)?;
        assert_eq!(sample.feat.dims(), [3, 1]);
        assert_eq!(sample.label.dims(), [3, 1]);
        assert_eq!(sample.positives()?, [false, false, true]);
        Ok(())
    }

    #[test]
    fn edge_index_must_have_two_rows() -> Result<()> {
        let edge_index = Tensor::zeros((3, 2), DType::U32, &Device::Cpu)?;
        assert!(Graph::new(3, edge_index).is_err());
        Ok(())
    }
}
