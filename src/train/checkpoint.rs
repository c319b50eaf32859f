use std::{
    collections::HashMap,
    path::{Path, PathBuf},
};

use candle_core::Tensor;
use regex::Regex;

use crate::Result;

const EXTENSION: &str = "safetensors";

/// File names of one run: `{dir}/{stem}[_at_{epoch}|_final|_best_at_{epoch}].safetensors`
/// plus `{dir}/{stem}.args` for the configuration.
#[derive(Debug, Clone)]
pub struct CheckpointPaths {
    dir: PathBuf,
    stem: String,
}
impl CheckpointPaths {
    pub fn new<P: AsRef<Path>>(dir: P, stem: &str) -> Self {
        Self {
            dir: dir.as_ref().to_path_buf(),
            stem: stem.to_owned(),
        }
    }
    pub fn dir(&self) -> &Path {
        &self.dir
    }
    fn file(&self, suffix: &str) -> PathBuf {
        self.dir
            .join(format!("{}{}.{}", self.stem, suffix, EXTENSION))
    }
    pub fn periodic(&self, epoch: usize) -> PathBuf {
        self.file(&format!("_at_{}", epoch))
    }
    pub fn last(&self) -> PathBuf {
        self.file("_final")
    }
    pub fn best(&self, epoch: usize) -> PathBuf {
        self.file(&format!("_best_at_{}", epoch))
    }
    pub fn args(&self) -> PathBuf {
        self.dir.join(format!("{}.args", self.stem))
    }
    /// Most recent `_at_{epoch}` checkpoint in the directory, if any.
    pub fn latest_periodic(&self) -> Result<Option<(usize, PathBuf)>> {
        if !self.dir.exists() {
            return Ok(None);
        }
        let pattern = Regex::new(&format!(
            r"^{}_at_(\d+)\.{}$",
            regex::escape(&self.stem),
            EXTENSION
        ))?;
        let mut latest = None;
        for entry in std::fs::read_dir(&self.dir)? {
            let path = entry?.path();
            let Some(name) = path.file_name().and_then(|name| name.to_str()) else {
                continue;
            };
            let Some(epoch) = pattern
                .captures(name)
                .and_then(|c| c[1].parse::<usize>().ok())
            else {
                continue;
            };
            if latest.as_ref().map_or(true, |(best, _)| epoch > *best) {
                latest = Some((epoch, path));
            }
        }
        Ok(latest)
    }
}

/// Writes a detached variable snapshot (see `DiffusionModel::snapshot`).
pub fn save_snapshot<P: AsRef<Path>>(snapshot: &HashMap<String, Tensor>, path: P) -> Result<()> {
    Ok(candle_core::safetensors::save(snapshot, path.as_ref())?)
}

/// Lowest validation loss seen so far; the first observation always wins.
#[derive(Debug, Clone, Default)]
pub struct BestTracker {
    best: Option<(usize, f64)>,
}
impl BestTracker {
    /// Returns whether `loss` is the new best.
    pub fn observe(&mut self, epoch: usize, loss: f64) -> bool {
        match self.best {
            Some((_, best)) if loss >= best => false,
            _ => {
                self.best = Some((epoch, loss));
                true
            }
        }
    }
    pub fn best(&self) -> Option<(usize, f64)> {
        self.best
    }
}
