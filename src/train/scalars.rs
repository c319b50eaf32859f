use std::{
    fs::File,
    path::{Path, PathBuf},
};

use polars::prelude::*;

use crate::Result;

/// Sink for `(tag, value, step)` time series such as `Train/Loss_diff`.
pub trait ScalarWriter {
    fn add_scalar(&mut self, tag: &str, value: f64, step: usize);
    fn flush(&mut self) -> Result<()> {
        Ok(())
    }
}

/// Buffers scalars and writes them as one parquet table (`tag`, `step`, `value`).
pub struct ParquetScalarWriter {
    path: PathBuf,
    tags: Vec<String>,
    steps: Vec<i64>,
    values: Vec<f64>,
}
impl ParquetScalarWriter {
    /// Writes to `{dir}/scalars.parquet`.
    pub fn new<P: AsRef<Path>>(dir: P) -> Result<Self> {
        std::fs::create_dir_all(dir.as_ref())?;
        Ok(Self {
            path: dir.as_ref().join("scalars.parquet"),
            tags: Vec::new(),
            steps: Vec::new(),
            values: Vec::new(),
        })
    }
    pub fn path(&self) -> &Path {
        &self.path
    }
}
impl ScalarWriter for ParquetScalarWriter {
    fn add_scalar(&mut self, tag: &str, value: f64, step: usize) {
        self.tags.push(tag.to_owned());
        self.steps.push(step as i64);
        self.values.push(value);
    }
    fn flush(&mut self) -> Result<()> {
        let mut df = df! {
            "tag" => &self.tags,
            "step" => &self.steps,
            "value" => &self.values,
        }?;
        ParquetWriter::new(File::create(&self.path)?).finish(&mut df)?;
        Ok(())
    }
}

#[derive(Debug, Default)]
pub struct MemoryScalarWriter {
    pub rows: Vec<(String, f64, usize)>,
}
impl MemoryScalarWriter {
    /// `(step, value)` pairs recorded under `tag`, in insertion order.
    pub fn series(&self, tag: &str) -> Vec<(usize, f64)> {
        self.rows
            .iter()
            .filter(|(t, _, _)| t == tag)
            .map(|&(_, value, step)| (step, value))
            .collect()
    }
}
impl ScalarWriter for MemoryScalarWriter {
    fn add_scalar(&mut self, tag: &str, value: f64, step: usize) {
        self.rows.push((tag.to_owned(), value, step));
    }
}
