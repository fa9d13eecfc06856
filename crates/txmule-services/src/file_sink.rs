//! Writes completed message-data payloads to `<dir>/<payload_id>.msg`.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use async_trait::async_trait;

use crate::service::PayloadSink;

#[derive(Debug, Clone)]
pub struct FileSink {
    dir: PathBuf,
}

impl FileSink {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Target file for a payload. Z85 ids may contain path characters.
    pub fn path_for(&self, payload_id: &str) -> PathBuf {
        let name: String = payload_id
            .chars()
            .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '_' { c } else { '_' })
            .collect();
        self.dir.join(format!("{name}.msg"))
    }
}

#[async_trait]
impl PayloadSink for FileSink {
    async fn deliver(&self, payload_id: &str, data: &str) -> Result<()> {
        tokio::fs::create_dir_all(&self.dir)
            .await
            .with_context(|| format!("failed to create {}", self.dir.display()))?;
        let path = self.path_for(payload_id);
        tokio::fs::write(&path, data)
            .await
            .with_context(|| format!("failed to write {}", path.display()))?;
        tracing::info!(payload_id, path = %path.display(), bytes = data.len(), "payload written");
        Ok(())
    }
}
