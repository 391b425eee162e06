use std::future::Future;
use std::path::{Path, PathBuf};

use thiserror::Error;
use tracing::warn;

use crate::model::ProducedArtifact;

#[derive(Debug, Error)]
pub enum SinkError {
    #[error("write {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Destination for produced artifacts.
pub trait ArtifactSink: Send + Sync {
    /// Persists one artifact and returns where it landed.
    fn write(
        &self,
        artifact: &ProducedArtifact,
    ) -> impl Future<Output = Result<PathBuf, SinkError>> + Send;

    /// Writes `artifact` and records its location. A failed write is logged and the artifact
    /// keeps no location.
    fn store(&self, artifact: &mut ProducedArtifact) -> impl Future<Output = ()> + Send {
        async move {
            let written = self.write(artifact).await;
            match written {
                Ok(path) => artifact.location = Some(path),
                Err(e) => warn!(artifact = %artifact.id, "sink write failed: {e}"),
            }
        }
    }
}

/// Writes each artifact as `<filename>.stf` holding its descriptor as pretty JSON.
#[derive(Debug, Clone)]
pub struct DirectorySink {
    root: PathBuf,
}

impl DirectorySink {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Like [`DirectorySink::new`], creating the directory if needed.
    pub async fn create(root: impl Into<PathBuf>) -> Result<Self, SinkError> {
        let root = root.into();
        tokio::fs::create_dir_all(&root).await.map_err(|source| SinkError::Io {
            path: root.clone(),
            source,
        })?;
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }
}

impl ArtifactSink for DirectorySink {
    async fn write(&self, artifact: &ProducedArtifact) -> Result<PathBuf, SinkError> {
        let path = self.root.join(format!("{}.stf", artifact.filename));
        let body = serde_json::to_vec_pretty(&artifact.descriptor())
            .map_err(|e| SinkError::Io {
                path: path.clone(),
                source: e.into(),
            })?;
        tokio::fs::write(&path, body).await.map_err(|source| SinkError::Io {
            path: path.clone(),
            source,
        })?;
        Ok(path)
    }
}
