use thiserror::Error;

#[derive(Debug, Error)]
pub enum FinalizerError {
    #[error("failed to spawn the finalizer thread: {0}")]
    Spawn(#[from] std::io::Error),
}
