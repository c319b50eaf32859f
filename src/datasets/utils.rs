use std::{
    io::{Read, Seek, SeekFrom},
    path::Path,
    time::Duration,
};

use anyhow::Result;
use flate2::read::GzDecoder;
use indicatif::{ProgressBar, ProgressStyle};
use tar::Archive;
use zip::ZipArchive;

/// Blocking HTTP body that reports progress as it is read.
pub struct RemoteFile {
    response: reqwest::blocking::Response,
    current_size: u64,
    pbar: Option<ProgressBar>,
}
impl RemoteFile {
    pub fn with_pbar(url: &str) -> Result<Self> {
        Self::with_config(url, 3600, true)
    }
    pub fn with_config(url: &str, timeout: u64, pbar: bool) -> Result<Self> {
        let client = reqwest::blocking::Client::new();
        let response = client
            .get(url)
            .timeout(Duration::from_secs(timeout))
            .send()?
            .error_for_status()?;

        let pbar = if pbar {
            // servers may omit the length; fall back to a spinner
            let pbar = match response.content_length() {
                Some(total_size) => {
                    let pbar = ProgressBar::new(total_size);
                    pbar.set_style(ProgressStyle::default_bar()
                        .template("{msg}\n{spinner:.green} [{elapsed_precise}] [{wide_bar:.cyan/blue}] {bytes}/{total_bytes} ({bytes_per_sec}, {eta})")?
                        .progress_chars("#>-"));
                    pbar
                }
                None => ProgressBar::new_spinner(),
            };
            pbar.set_message(format!("Downloading {}", url));
            Some(pbar)
        } else {
            None
        };
        Ok(Self {
            response,
            current_size: 0,
            pbar,
        })
    }
    fn update(&mut self, size: usize) {
        self.current_size += size as u64;
        if let Some(pbar) = &self.pbar {
            pbar.set_position(self.current_size);
        }
    }
}

impl Read for RemoteFile {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        let size = self.response.read(buf)?;
        self.update(size);
        if size == 0 {
            if let Some(pbar) = &self.pbar {
                pbar.finish_and_clear();
            }
        }
        Ok(size)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompressionFormat {
    Zip,
    Tgz,
}
impl CompressionFormat {
    pub fn from_url(url: &str) -> Result<Self> {
        let path = url.split(['?', '#']).next().unwrap_or(url);
        if path.ends_with(".zip") {
            Ok(Self::Zip)
        } else if path.ends_with(".tar.gz") || path.ends_with(".tgz") {
            Ok(Self::Tgz)
        } else {
            anyhow::bail!("cannot infer archive format of {}", url)
        }
    }
}

pub fn download_and_extract<P: AsRef<Path>>(
    url: &str,
    path: P,
    format: CompressionFormat,
) -> Result<()> {
    let mut remote_file = RemoteFile::with_pbar(url)?;
    let mut archive = tempfile::tempfile()?;
    std::io::copy(&mut remote_file, &mut archive)?;
    archive.seek(SeekFrom::Start(0))?;

    match format {
        CompressionFormat::Zip => {
            let mut archive = ZipArchive::new(&archive)?;
            archive.extract(path)?;
        }
        CompressionFormat::Tgz => {
            let tar = GzDecoder::new(&archive);
            let mut archive = Archive::new(tar);
            archive.unpack(path)?;
        }
    }
    tracing::info!(url, "dataset archive extracted");
    Ok(())
}
