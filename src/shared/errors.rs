#[derive(Debug, thiserror::Error)]
pub enum RuntimeError {
    #[error("failed to create runtime path {path}: {source}")]
    CreateDir {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to spawn worker `{worker_id}`: {source}")]
    Spawn {
        worker_id: String,
        #[source]
        source: std::io::Error,
    },
    #[error("worker `{worker_id}` panicked")]
    WorkerPanicked { worker_id: String },
}
