use std::fmt;

use rand::Rng;

use crate::{graph::GraphSample, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Split {
    Train,
    Valid,
    Test,
}
impl Split {
    pub const ALL: [Split; 3] = [Split::Train, Split::Valid, Split::Test];
    pub fn name(&self) -> &'static str {
        match self {
            Split::Train => "train",
            Split::Valid => "valid",
            Split::Test => "test",
        }
    }
}
impl fmt::Display for Split {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}
/// A collection of observations, grouped by split, in a fixed order.
pub trait Dataset {
    fn name(&self) -> &str;
    fn samples(&self, split: Split) -> &[GraphSample];
}

pub trait RandomSplit<Ratio> {
    type Output;
    fn random_split<R: Rng>(&self, ratio: Ratio, rng: &mut R) -> Result<Self::Output>;
}
