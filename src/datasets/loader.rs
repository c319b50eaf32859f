use candle_core::Device;

use crate::{graph::GraphSample, Result};

/// Lazy pass over one split, moving each sample to `device` when it is reached.
/// Create a new loader to iterate again.
pub struct SampleLoader<'a> {
    samples: &'a [GraphSample],
    device: &'a Device,
    position: usize,
}
impl<'a> SampleLoader<'a> {
    pub fn new(samples: &'a [GraphSample], device: &'a Device) -> Self {
        Self {
            samples,
            device,
            position: 0,
        }
    }
}

impl<'a> Iterator for SampleLoader<'a> {
    type Item = Result<GraphSample>;
    fn next(&mut self) -> Option<Self::Item> {
        let sample = self.samples.get(self.position)?;
        self.position += 1;
        Some(sample.to_device(self.device))
    }
    fn size_hint(&self) -> (usize, Option<usize>) {
        let remaining = self.samples.len() - self.position;
        (remaining, Some(remaining))
    }
}
impl<'a> ExactSizeIterator for SampleLoader<'a> {}
