use std::collections::{HashMap, VecDeque};

use candle_core::{Device, Tensor};
use rand::{seq::index::sample, Rng};

use super::{InfluenceDataset, RandomSplit, Split};
use crate::{
    graph::{Graph, GraphSample},
    Result,
};

/// Independent-cascade observations on a random graph: `label` marks the seeds,
/// `feat` marks every node the cascade reached.
#[derive(Debug, Clone)]
pub struct CascadeParams {
    pub num_nodes: usize,
    /// Expected number of random neighbours per node, on top of a ring backbone.
    pub avg_degree: f64,
    pub num_seeds: usize,
    pub spread_prob: f64,
    pub num_samples: usize,
}
impl Default for CascadeParams {
    fn default() -> Self {
        Self {
            num_nodes: 64,
            avg_degree: 3.0,
            num_seeds: 3,
            spread_prob: 0.3,
            num_samples: 50,
        }
    }
}

/// Unsplit observations on one graph.
pub struct SamplePool {
    pub name: String,
    pub graph: Graph,
    pub samples: Vec<GraphSample>,
}

impl SamplePool {
    pub fn cascades<R: Rng>(params: &CascadeParams, device: &Device, rng: &mut R) -> Result<Self> {
        let n = params.num_nodes;
        let p = if n > 1 {
            (params.avg_degree / (n - 1) as f64).min(1.0)
        } else {
            0.0
        };
        let mut edges = Vec::new();
        for u in 0..n {
            for v in (u + 1)..n {
                if v == u + 1 || rng.random_bool(p) {
                    edges.push((u as u32, v as u32));
                }
            }
        }
        let graph = Graph::undirected(n, &edges, device)?;
        let adjacency = graph.neighbours()?;

        let mut samples = Vec::with_capacity(params.num_samples);
        for _ in 0..params.num_samples {
            let mut label = vec![0f32; n];
            let mut feat = vec![0f32; n];
            let mut frontier = VecDeque::new();
            for seed in sample(rng, n, params.num_seeds.min(n)) {
                label[seed] = 1.0;
                feat[seed] = 1.0;
                frontier.push_back(seed);
            }
            while let Some(u) = frontier.pop_front() {
                for &v in &adjacency[u] {
                    if feat[v] == 0.0 && rng.random_bool(params.spread_prob) {
                        feat[v] = 1.0;
                        frontier.push_back(v);
                    }
                }
            }
            samples.push(GraphSample::new(
                graph.clone(),
                &Tensor::from_vec(feat, (n, 1), device)?,
                &Tensor::from_vec(label, (n, 1), device)?,
            )?);
        }
        Ok(Self {
            name: "synthetic".to_owned(),
            graph,
            samples,
        })
    }
}

impl RandomSplit<[f32; 3]> for SamplePool {
    type Output = InfluenceDataset;
    /// Shuffles the pool and cuts it into train/valid/test by the given fractions.
    fn random_split<R: Rng>(&self, ratio: [f32; 3], rng: &mut R) -> Result<InfluenceDataset> {
        let total = self.samples.len();
        let order = sample(rng, total, total).into_vec();
        let mut splits = HashMap::new();
        let mut start = 0;
        let mut cumsum = 0.0;
        for (split, f) in Split::ALL.into_iter().zip(ratio) {
            cumsum += f;
            let end = if split == Split::Test {
                total
            } else {
                ((cumsum * total as f32).round() as usize).clamp(start, total)
            };
            let samples = order[start..end]
                .iter()
                .map(|&i| self.samples[i].clone())
                .collect();
            splits.insert(split, samples);
            start = end;
        }
        Ok(InfluenceDataset::new(&self.name, self.graph.clone(), splits))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::datasets::Dataset;
    use rand::SeedableRng;
    use rand_chacha::ChaCha8Rng;

    fn pool(rng: &mut ChaCha8Rng) -> Result<SamplePool> {
        let params = CascadeParams {
            num_nodes: 20,
            num_samples: 10,
            ..Default::default()
        };
        SamplePool::cascades(&params, &Device::Cpu, rng)
    }

    #[test]
    fn seeds_are_observed() -> Result<()> {
        let mut rng = ChaCha8Rng::seed_from_u64(0);
        for sample in pool(&mut rng)?.samples {
            let feat = sample.feat.flatten_all()?.to_vec1::<f32>()?;
            let label = sample.label.flatten_all()?.to_vec1::<f32>()?;
            assert_eq!(label.iter().sum::<f32>(), 3.0);
            for (x, y) in feat.iter().zip(&label) {
                assert!(*y == 0.0 || *x == 1.0);
            }
        }
        Ok(())
    }

    #[test]
    fn split_partitions_the_pool() -> Result<()> {
        let mut rng = ChaCha8Rng::seed_from_u64(1);
        let dataset = pool(&mut rng)?.random_split([0.6, 0.2, 0.2], &mut rng)?;
        let sizes = Split::ALL.map(|split| dataset.samples(split).len());
        assert_eq!(sizes, [6, 2, 2]);
        Ok(())
    }

    #[test]
    fn npz_round_trip() -> Result<()> {
        let mut rng = ChaCha8Rng::seed_from_u64(2);
        let dataset = pool(&mut rng)?.random_split([0.6, 0.2, 0.2], &mut rng)?;
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("synthetic.npz");
        dataset.to_file(&path)?;
        let loaded = InfluenceDataset::from_file(&path, "synthetic", &Device::Cpu)?;
        assert_eq!(loaded.graph().num_nodes(), 20);
        assert_eq!(loaded.graph().num_edges(), dataset.graph().num_edges());
        for split in Split::ALL {
            let (a, b) = (dataset.samples(split), loaded.samples(split));
            assert_eq!(a.len(), b.len());
            for (x, y) in a.iter().zip(b) {
                assert_eq!(x.positives()?, y.positives()?);
            }
        }
        Ok(())
    }
}
