use std::{collections::HashMap, path::Path};

use candle_core::{DType, Device, Tensor};

use super::{download_and_extract, CompressionFormat, Dataset, Split};
use crate::{
    graph::{Graph, GraphSample},
    Error, Result,
};

// Layout of `{root}/{name}.npz`:
//
//   edge_index    [2, E]   receiving node in row 0, sending node in row 1
//   num_nodes     [1]      optional, defaults to the width of train_feat
//   {split}_feat  [S, N]   observed indicator per sample, split in train/valid/test
//   {split}_label [S, N]   ground truth per sample
pub struct InfluenceDataset {
    name: String,
    graph: Graph,
    splits: HashMap<Split, Vec<GraphSample>>,
}
impl InfluenceDataset {
    pub fn new(name: &str, graph: Graph, splits: HashMap<Split, Vec<GraphSample>>) -> Self {
        Self {
            name: name.to_owned(),
            graph,
            splits,
        }
    }
    /// Opens `{root}/{name}.npz`, fetching the archive at `url` first if the file is missing.
    pub fn open<P: AsRef<Path>>(
        root: P,
        name: &str,
        url: Option<&str>,
        device: &Device,
    ) -> anyhow::Result<Self> {
        let root = root.as_ref();
        let path = root.join(format!("{}.npz", name));
        if !path.exists() {
            if let Some(url) = url {
                std::fs::create_dir_all(root)?;
                download_and_extract(url, root, CompressionFormat::from_url(url)?)?;
            }
        }
        Ok(Self::from_file(&path, name, device)?)
    }
    pub fn from_file<P: AsRef<Path>>(path: P, name: &str, device: &Device) -> Result<Self> {
        let mut arrays: HashMap<String, Tensor> =
            HashMap::from_iter(Tensor::read_npz(path.as_ref())?);
        let edge_index = take(&mut arrays, "edge_index")?
            .to_dtype(DType::U32)?
            .to_device(device)?;
        let num_nodes = match arrays.remove("num_nodes") {
            Some(n) => n
                .to_dtype(DType::U32)?
                .flatten_all()?
                .to_vec1::<u32>()?
                .first()
                .copied()
                .ok_or_else(|| Error::MissingKey("num_nodes".to_owned()))?
                as usize,
            None => take_ref(&arrays, "train_feat")?.dim(1)?,
        };
        let graph = Graph::new(num_nodes, edge_index)?;

        let mut splits = HashMap::new();
        for split in Split::ALL {
            let feat = take(&mut arrays, &format!("{}_feat", split))?.to_device(device)?;
            let label = take(&mut arrays, &format!("{}_label", split))?.to_device(device)?;
            if feat.dims() != label.dims() || feat.rank() != 2 {
                return Err(Error::shape("label", format!("{:?}", feat.dims()), label.dims()));
            }
            let samples = (0..feat.dim(0)?)
                .map(|i| GraphSample::new(graph.clone(), &feat.get(i)?, &label.get(i)?))
                .collect::<Result<Vec<_>>>()?;
            splits.insert(split, samples);
        }
        Ok(Self::new(name, graph, splits))
    }
    pub fn to_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let n = self.graph.num_nodes();
        let device = self.graph.edge_index().device();
        let mut arrays = vec![
            ("edge_index".to_owned(), self.graph.edge_index().clone()),
            ("num_nodes".to_owned(), Tensor::new(&[n as u32], device)?),
        ];
        for split in Split::ALL {
            let samples = self.samples(split);
            let feats = samples.iter().map(|s| &s.feat).collect::<Vec<_>>();
            let labels = samples.iter().map(|s| &s.label).collect::<Vec<_>>();
            arrays.push((format!("{}_feat", split), stack_rows(&feats, n, device)?));
            arrays.push((format!("{}_label", split), stack_rows(&labels, n, device)?));
        }
        Ok(Tensor::write_npz(&arrays, path.as_ref())?)
    }
    pub fn graph(&self) -> &Graph {
        &self.graph
    }
}
impl Dataset for InfluenceDataset {
    fn name(&self) -> &str {
        &self.name
    }
    fn samples(&self, split: Split) -> &[GraphSample] {
        self.splits.get(&split).map(Vec::as_slice).unwrap_or(&[])
    }
}

/// `[n, 1]` rows to `[rows, n]`.
fn stack_rows(rows: &[&Tensor], n: usize, device: &Device) -> Result<Tensor> {
    if rows.is_empty() {
        return Ok(Tensor::zeros((0, n), DType::F32, device)?);
    }
    let rows = rows
        .iter()
        .map(|row| row.reshape((1, n)))
        .collect::<candle_core::Result<Vec<_>>>()?;
    Ok(Tensor::cat(&rows, 0)?)
}

fn take(arrays: &mut HashMap<String, Tensor>, key: &str) -> Result<Tensor> {
    arrays
        .remove(key)
        .ok_or_else(|| Error::MissingKey(key.to_owned()))
}

fn take_ref<'a>(arrays: &'a HashMap<String, Tensor>, key: &str) -> Result<&'a Tensor> {
    arrays
        .get(key)
        .ok_or_else(|| Error::MissingKey(key.to_owned()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_num_nodes_is_reported() -> Result<()> {
        let device = Device::Cpu;
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("broken.npz");
        let arrays = [
            ("edge_index", Tensor::new(&[[0u32], [1]], &device)?),
            ("num_nodes", Tensor::from_vec(Vec::<u32>::new(), 0, &device)?),
        ];
        Tensor::write_npz(&arrays, &path)?;
        let result = InfluenceDataset::from_file(&path, "broken", &device);
        assert!(matches!(result, Err(Error::MissingKey(key)) if key == "num_nodes"));
        Ok(())
    }
}
