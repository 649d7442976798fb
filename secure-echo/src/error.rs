use std::path::PathBuf;

use thiserror::Error;

use crate::rpc::RpcStatus;

/// Errors produced while composing, running or calling the echo service.
#[derive(Debug, Error)]
pub enum EchoError {
    /// Contradictory or incomplete options. Always raised before any
    /// network resource is acquired.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// A credential file could not be read.
    #[error("failed to read credential file {path:?}: {source}")]
    CredentialIo {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Bind, listen or dial failure.
    #[error("transport error: {0}")]
    Transport(String),

    /// A single RPC call failed.
    #[error("{0}")]
    Request(RpcStatus),

    /// The service rejected the caller's credentials.
    #[error("authentication failed: {0}")]
    Authentication(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl EchoError {
    pub fn config(message: impl Into<String>) -> Self {
        Self::Configuration(message.into())
    }

    pub fn credential_io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::CredentialIo {
            path: path.into(),
            source,
        }
    }
}

pub type Result<T> = std::result::Result<T, EchoError>;
