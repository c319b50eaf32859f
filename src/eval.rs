//! Binary selection of sampled label probabilities and split-level metrics.

use std::time::{Duration, Instant};

use candle_core::Tensor;
use rand::Rng;

use crate::{
    advisor::PairedSplit, config::SelectionPolicy, diffusion::DiffusionModel, Error, Result,
};

impl SelectionPolicy {
    /// `scores` and `truth` are per node; top-k uses `k = #truth`.
    pub fn select(&self, scores: &[f32], truth: &[bool]) -> Vec<bool> {
        match *self {
            SelectionPolicy::Threshold(p) => scores.iter().map(|&s| s > p).collect(),
            SelectionPolicy::TopK => {
                let k = truth.iter().filter(|&&y| y).count();
                let mut order = (0..scores.len()).collect::<Vec<_>>();
                // stable sort keeps the lower index first on ties
                order.sort_by(|&a, &b| scores[b].total_cmp(&scores[a]));
                let mut selected = vec![false; scores.len()];
                for &i in &order[..k.min(order.len())] {
                    selected[i] = true;
                }
                selected
            }
        }
    }
}

/// Classification metrics of one sample or the mean over a split.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct Metrics {
    pub accuracy: f64,
    pub precision: f64,
    pub recall: f64,
    pub f1: f64,
}
impl Metrics {
    /// Undefined ratios (no predicted or no actual positives) count as zero.
    pub fn binary(truth: &[bool], pred: &[bool]) -> Result<Self> {
        if truth.len() != pred.len() {
            return Err(Error::shape(
                "prediction",
                format!("{} entries, one per label", truth.len()),
                &[pred.len()],
            ));
        }
        let (mut tp, mut fp, mut fn_, mut tn) = (0usize, 0usize, 0usize, 0usize);
        for (&y, &p) in truth.iter().zip(pred) {
            match (y, p) {
                (true, true) => tp += 1,
                (false, true) => fp += 1,
                (true, false) => fn_ += 1,
                (false, false) => tn += 1,
            }
        }
        let ratio = |num: usize, den: usize| if den == 0 { 0.0 } else { num as f64 / den as f64 };
        let precision = ratio(tp, tp + fp);
        let recall = ratio(tp, tp + fn_);
        let f1 = if precision + recall == 0.0 {
            0.0
        } else {
            2.0 * precision * recall / (precision + recall)
        };
        Ok(Self {
            accuracy: ratio(tp + tn, truth.len()),
            precision,
            recall,
            f1,
        })
    }
}

/// Arithmetic mean over samples; every sample weighs the same regardless of its size.
#[derive(Debug, Clone, Default)]
pub struct MetricsMean {
    sum: Metrics,
    count: usize,
}
impl MetricsMean {
    pub fn push(&mut self, m: Metrics) {
        self.sum.accuracy += m.accuracy;
        self.sum.precision += m.precision;
        self.sum.recall += m.recall;
        self.sum.f1 += m.f1;
        self.count += 1;
    }
    pub fn count(&self) -> usize {
        self.count
    }
    pub fn mean(&self) -> Metrics {
        if self.count == 0 {
            return Metrics::default();
        }
        let n = self.count as f64;
        Metrics {
            accuracy: self.sum.accuracy / n,
            precision: self.sum.precision / n,
            recall: self.sum.recall / n,
            f1: self.sum.f1 / n,
        }
    }
}

#[derive(Debug, Clone)]
pub struct Evaluation {
    pub metrics: Metrics,
    pub time_per_sample: Duration,
    /// Sampled probabilities, one `[1, num_nodes, 1]` tensor per sample, in split order.
    pub samples: Vec<Tensor>,
}

/// Samples every graph of a split and scores it against the ground truth.
pub fn evaluate<R: Rng>(
    model: &DiffusionModel,
    split: &PairedSplit,
    policy: SelectionPolicy,
    rng: &mut R,
) -> Result<Evaluation> {
    let mut mean = MetricsMean::default();
    let mut samples = Vec::with_capacity(split.len());
    let start = Instant::now();
    for (data, advisor) in split.iter() {
        let sample = model.sample(&data.graph, &data.feat, advisor, rng)?;
        let scores = sample.flatten_all()?.to_vec1::<f32>()?;
        let truth = data.positives()?;
        mean.push(Metrics::binary(&truth, &policy.select(&scores, &truth))?);
        samples.push(sample);
    }
    let time_per_sample = start.elapsed() / split.len().max(1) as u32;
    Ok(Evaluation {
        metrics: mean.mean(),
        time_per_sample,
        samples,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn perfect_predictions() -> Result<()> {
        let truth = [true, false, false, true];
        let mut mean = MetricsMean::default();
        mean.push(Metrics::binary(&truth, &truth)?);
        mean.push(Metrics::binary(&[false, true], &[false, true])?);
        let m = mean.mean();
        assert_eq!(m.accuracy, 1.0);
        assert_eq!(m.f1, 1.0);
        Ok(())
    }

    #[test]
    fn split_mean_is_per_sample_not_pooled() -> Result<()> {
        let truth = [true, false, true, false];
        let wrong = [false, true, false, true];
        let mut mean = MetricsMean::default();
        mean.push(Metrics::binary(&truth, &truth)?);
        mean.push(Metrics::binary(&truth, &wrong)?);
        assert_eq!(mean.count(), 2);
        assert_eq!(mean.mean().accuracy, 0.5);
        assert_eq!(mean.mean().f1, 0.5);
        Ok(())
    }

    #[test]
    fn unequal_sizes_are_not_node_weighted() -> Result<()> {
        let mut mean = MetricsMean::default();
        mean.push(Metrics::binary(&[true; 2], &[true; 2])?);
        mean.push(Metrics::binary(&[true; 8], &[false; 8])?);
        assert_eq!(mean.mean().accuracy, 0.5);
        Ok(())
    }

    #[test]
    fn no_predicted_positives_gives_zero() -> Result<()> {
        let m = Metrics::binary(&[true, false], &[false, false])?;
        assert_eq!(m.precision, 0.0);
        assert_eq!(m.recall, 0.0);
        assert_eq!(m.f1, 0.0);
        assert_eq!(m.accuracy, 0.5);
        Ok(())
    }

    #[test]
    fn mismatched_lengths_are_a_shape_error() {
        let result = Metrics::binary(&[true, false, true], &[true, false]);
        assert!(matches!(result, Err(Error::Shape { name: "prediction", .. })));
    }

    #[test]
    fn threshold_and_topk_selection() {
        let scores = [0.9, 0.2, 0.6, 0.6, 0.1];
        let truth = [true, false, false, true, false];
        assert_eq!(
            SelectionPolicy::Threshold(0.5).select(&scores, &truth),
            [true, false, true, true, false]
        );
        // k = 2, tie between nodes 2 and 3 goes to the lower index
        assert_eq!(
            SelectionPolicy::TopK.select(&scores, &truth),
            [true, false, true, false, false]
        );
    }
}
