use crate::shared::fs_atomic::atomic_write_file;
use crate::store::record::ArchivedWorkflow;
use std::fs;
use std::path::{Path, PathBuf};

#[derive(Debug, thiserror::Error)]
pub enum ArchiveError {
    #[error("io error at {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("json error at {path}: {source}")]
    Json {
        path: String,
        #[source]
        source: serde_json::Error,
    },
}

/// Cold-storage collaborator for terminal workflows.
pub trait ArchiveSink: Send + Sync {
    fn write(&self, archived: &ArchivedWorkflow) -> Result<(), ArchiveError>;
}

/// Writes `<dir>/<workflow_id>.json` with atomic replace semantics.
#[derive(Debug, Clone)]
pub struct FileArchiveSink {
    dir: PathBuf,
}

impl FileArchiveSink {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn path_for(&self, workflow_id: &str) -> PathBuf {
        self.dir.join(format!("{workflow_id}.json"))
    }

    pub fn load(&self, workflow_id: &str) -> Result<Option<ArchivedWorkflow>, ArchiveError> {
        let path = self.path_for(workflow_id);
        let raw = match fs::read_to_string(&path) {
            Ok(raw) => raw,
            Err(source) if source.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(source) => return Err(io_error(&path, source)),
        };
        serde_json::from_str(&raw)
            .map(Some)
            .map_err(|source| json_error(&path, source))
    }
}

impl ArchiveSink for FileArchiveSink {
    fn write(&self, archived: &ArchivedWorkflow) -> Result<(), ArchiveError> {
        let path = self.path_for(archived.workflow_id.as_str());
        let body = serde_json::to_vec_pretty(archived).map_err(|e| json_error(&path, e))?;
        atomic_write_file(&path, &body).map_err(|e| io_error(&path, e))
    }
}

fn io_error(path: &Path, source: std::io::Error) -> ArchiveError {
    ArchiveError::Io {
        path: path.display().to_string(),
        source,
    }
}

fn json_error(path: &Path, source: serde_json::Error) -> ArchiveError {
    ArchiveError::Json {
        path: path.display().to_string(),
        source,
    }
}
