// src/deliver/local.rs
use anyhow::{Context, Result};
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use tokio::fs;

use super::{Delivery, Dispatcher};

/// Write `bytes` to `dir/filename`, creating `dir` if needed.
pub async fn save_to_disk(dir: impl AsRef<Path>, filename: &str, bytes: &[u8]) -> Result<PathBuf> {
    let dir = dir.as_ref();
    fs::create_dir_all(dir)
        .await
        .with_context(|| format!("creating output directory {}", dir.display()))?;
    let dest = dir.join(filename);
    fs::write(&dest, bytes)
        .await
        .with_context(|| format!("writing {}", dest.display()))?;
    Ok(dest)
}

pub struct LocalFileDispatcher {
    dir: PathBuf,
}

impl LocalFileDispatcher {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }
}

#[async_trait]
impl Dispatcher for LocalFileDispatcher {
    fn name(&self) -> &str {
        "save file locally"
    }

    async fn deliver(&self, delivery: &Delivery<'_>) -> Result<String> {
        let path = save_to_disk(
            &self.dir,
            &delivery.artifact.filename,
            &delivery.artifact.bytes,
        )
        .await?;
        Ok(format!("File saved to {}", path.display()))
    }
}
