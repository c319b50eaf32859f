//! Heuristic advisors: per-node seed estimates computed once per split and
//! paired with the samples they were computed from.

use std::{fmt, str::FromStr};

use candle_core::Tensor;
use itertools::Itertools;
use serde::{Deserialize, Serialize};

use crate::{graph::GraphSample, Error, Result};

mod lpsi;
pub use lpsi::{lpsi, LpsiEstimate, LpsiParams};

/// Closed set of advisor heuristics. Adding a heuristic means adding a variant.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AdvisorStrategy {
    Lpsi(LpsiParams),
}
impl Default for AdvisorStrategy {
    fn default() -> Self {
        Self::Lpsi(LpsiParams::default())
    }
}
impl AdvisorStrategy {
    /// Seed estimate `[num_nodes, 1]` for one observation.
    pub fn compute(&self, sample: &GraphSample) -> Result<Tensor> {
        match self {
            Self::Lpsi(params) => Ok(lpsi(&sample.feat, &sample.graph, params)?.seeds),
        }
    }
    /// Continuous score in `[0, 1]` used as the conditioner's regression target.
    pub fn target(&self, sample: &GraphSample) -> Result<Tensor> {
        match self {
            Self::Lpsi(params) => lpsi(&sample.feat, &sample.graph, params)?.normalized_scores(),
        }
    }
}
impl FromStr for AdvisorStrategy {
    type Err = Error;
    /// `lpsi` or `lpsi:<alpha>`.
    fn from_str(s: &str) -> std::result::Result<Self, Error> {
        let lower = s.to_lowercase();
        let (name, arg) = match lower.split_once(':') {
            Some((name, arg)) => (name, Some(arg)),
            None => (lower.as_str(), None),
        };
        match (name, arg) {
            ("lpsi", None) => Ok(Self::default()),
            ("lpsi", Some(alpha)) => match alpha.parse::<f64>() {
                Ok(alpha) if alpha > 0.0 && alpha < 1.0 => Ok(Self::Lpsi(LpsiParams {
                    alpha,
                    ..Default::default()
                })),
                _ => Err(Error::UnknownAdvisor(s.to_owned())),
            },
            _ => Err(Error::UnknownAdvisor(s.to_owned())),
        }
    }
}
impl fmt::Display for AdvisorStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Lpsi(params) => write!(f, "lpsi:{}", params.alpha),
        }
    }
}

/// Samples of one split together with their advisor tensors, in the same order.
#[derive(Debug, Clone)]
pub struct PairedSplit {
    name: String,
    samples: Vec<GraphSample>,
    advisors: Vec<Tensor>,
}
impl PairedSplit {
    pub fn new(name: &str, samples: Vec<GraphSample>, advisors: Vec<Tensor>) -> Result<Self> {
        if samples.len() != advisors.len() {
            return Err(Error::AdvisorCountMismatch {
                split: name.to_owned(),
                graphs: samples.len(),
                advisors: advisors.len(),
            });
        }
        for (sample, advisor) in samples.iter().zip(&advisors) {
            if advisor.dims().first() != Some(&sample.num_nodes()) {
                return Err(Error::shape("advisor", "[num_nodes, num_advisors]", advisor.dims()));
            }
        }
        Ok(Self {
            name: name.to_owned(),
            samples,
            advisors,
        })
    }
    pub fn name(&self) -> &str {
        &self.name
    }
    pub fn len(&self) -> usize {
        self.samples.len()
    }
    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }
    pub fn samples(&self) -> &[GraphSample] {
        &self.samples
    }
    pub fn iter(&self) -> impl Iterator<Item = (&GraphSample, &Tensor)> {
        self.samples.iter().zip_eq(&self.advisors)
    }
}

/// Runs every strategy on every sample of a split, once.
#[derive(Debug, Clone)]
pub struct AdvisorGenerator {
    strategies: Vec<AdvisorStrategy>,
}
impl AdvisorGenerator {
    pub fn new(strategies: Vec<AdvisorStrategy>) -> Self {
        Self { strategies }
    }
    pub fn num_advisors(&self) -> usize {
        self.strategies.len()
    }
    /// `[num_nodes, num_advisors]`, one column per strategy.
    pub fn advise(&self, sample: &GraphSample) -> Result<Tensor> {
        let columns = self
            .strategies
            .iter()
            .map(|strategy| strategy.compute(sample))
            .collect::<Result<Vec<_>>>()?;
        Ok(Tensor::cat(&columns, 1)?)
    }
    pub fn generate(&self, name: &str, samples: Vec<GraphSample>) -> Result<PairedSplit> {
        let advisors = samples
            .iter()
            .map(|sample| self.advise(sample))
            .collect::<Result<Vec<_>>>()?;
        tracing::info!(
            split = name,
            samples = samples.len(),
            advisors = self.num_advisors(),
            "advisor estimates ready"
        );
        PairedSplit::new(name, samples, advisors)
    }
    /// Conditioner pretraining targets, taken from the first strategy.
    pub fn targets(&self, samples: &[GraphSample]) -> Result<Vec<Tensor>> {
        let strategy = self.strategies.first().copied().unwrap_or_default();
        samples.iter().map(|sample| strategy.target(sample)).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::Graph;
    use candle_core::Device;

    fn star_sample() -> Result<GraphSample> {
        let device = Device::Cpu;
        let graph = Graph::undirected(4, &[(0, 1), (0, 2), (0, 3)], &device)?;
        let feat = Tensor::new(&[1f32, 1., 1., 0.], &device)?;
        let label = Tensor::new(&[1f32, 0., 0., 0.], &device)?;
        GraphSample::new(graph, &feat, &label)
    }

    #[test]
    fn strategy_names() {
        assert_eq!("lpsi".parse::<AdvisorStrategy>().unwrap(), AdvisorStrategy::default());
        let strategy = "LPSI:0.3".parse::<AdvisorStrategy>().unwrap();
        assert_eq!(strategy.to_string(), "lpsi:0.3");
        assert!(matches!(
            "netsleuth".parse::<AdvisorStrategy>(),
            Err(Error::UnknownAdvisor(_))
        ));
        assert!("lpsi:1.5".parse::<AdvisorStrategy>().is_err());
    }

    #[test]
    fn one_column_per_strategy() -> Result<()> {
        let sample = star_sample()?;
        let generator = AdvisorGenerator::new(vec![
            AdvisorStrategy::default(),
            "lpsi:0.9".parse()?,
        ]);
        let split = generator.generate("train", vec![sample.clone(), sample])?;
        assert_eq!(split.len(), 2);
        for (sample, advisor) in split.iter() {
            assert_eq!(advisor.dims(), [sample.num_nodes(), 2]);
        }
        Ok(())
    }

    #[test]
    fn pairing_requires_equal_lengths() -> Result<()> {
        let sample = star_sample()?;
        let advisor = AdvisorStrategy::default().compute(&sample)?;
        let err = PairedSplit::new("valid", vec![sample.clone(), sample], vec![advisor]);
        assert!(matches!(
            err,
            Err(Error::AdvisorCountMismatch {
                graphs: 2,
                advisors: 1,
                ..
            })
        ));
        Ok(())
    }
}
