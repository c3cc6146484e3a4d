use thiserror::Error;

/// Daemon error types
#[derive(Error, Debug)]
pub enum NavError {
    #[error("{what} bind failed on {addr}: {source}")]
    Bind {
        what: &'static str,
        addr: String,
        #[source]
        source: std::io::Error,
    },

    #[error("No device: {0}")]
    NoDevice(String),

    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl NavError {
    pub fn bind(what: &'static str, addr: impl ToString, source: std::io::Error) -> Self {
        NavError::Bind {
            what,
            addr: addr.to_string(),
            source,
        }
    }
}

pub type Result<T> = std::result::Result<T, NavError>;

