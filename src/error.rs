use std::path::PathBuf;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum BurrowError {
    #[error("no {kind} found for the current filters")]
    EmptyResource { kind: &'static str },

    #[error("tunnel could not be established: {0}")]
    TransportEstablishment(String),

    #[error("fetch failed: {0}")]
    TransientFetch(String),

    #[error("ssh key material at {} is unusable", path.display())]
    CredentialIo {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to synchronize ssh config {}", path.display())]
    ConfigSynchronization {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl BurrowError {
    pub fn empty(kind: &'static str) -> Self {
        Self::EmptyResource { kind }
    }
}
