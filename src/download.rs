use std::path::PathBuf;

use anyhow::Context as _;

use crate::{assemble::VideoArtifact, error::PlotrecResult};

/// Delivery of a finished video artifact. The artifact is transient; after a
/// sink accepts it, the pipeline discards it.
pub trait DownloadSink: Send {
    fn deliver(&mut self, artifact: &VideoArtifact, filename: &str) -> PlotrecResult<()>;
}

/// Writes artifacts into a directory, the stand-in for a browser download.
pub struct FileSink {
    dir: PathBuf,
}

impl FileSink {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }
}

impl DownloadSink for FileSink {
    fn deliver(&mut self, artifact: &VideoArtifact, filename: &str) -> PlotrecResult<()> {
        std::fs::create_dir_all(&self.dir)
            .with_context(|| format!("create download directory '{}'", self.dir.display()))?;
        let path = self.dir.join(filename);
        std::fs::write(&path, &artifact.data)
            .with_context(|| format!("write video artifact '{}'", path.display()))?;
        tracing::info!(path = %path.display(), bytes = artifact.data.len(), "delivered video");
        Ok(())
    }
}

/// Collects delivered artifacts in memory, for tests and headless use.
#[derive(Default)]
pub struct MemorySink {
    delivered: Vec<(String, VideoArtifact)>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn delivered(&self) -> &[(String, VideoArtifact)] {
        &self.delivered
    }
}

impl DownloadSink for MemorySink {
    fn deliver(&mut self, artifact: &VideoArtifact, filename: &str) -> PlotrecResult<()> {
        self.delivered.push((filename.to_string(), artifact.clone()));
        Ok(())
    }
}

/// Shared handle pair so a test can keep reading a sink after the director
/// has taken ownership of it.
pub fn shared_memory_sink() -> (SharedMemorySink, std::sync::Arc<std::sync::Mutex<MemorySink>>) {
    let inner = std::sync::Arc::new(std::sync::Mutex::new(MemorySink::new()));
    (
        SharedMemorySink {
            inner: std::sync::Arc::clone(&inner),
        },
        inner,
    )
}

pub struct SharedMemorySink {
    inner: std::sync::Arc<std::sync::Mutex<MemorySink>>,
}

impl DownloadSink for SharedMemorySink {
    fn deliver(&mut self, artifact: &VideoArtifact, filename: &str) -> PlotrecResult<()> {
        self.inner
            .lock()
            .expect("memory sink lock poisoned")
            .deliver(artifact, filename)
    }
}
