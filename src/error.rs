use std::{io, path::PathBuf};

use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("failed to load config {path}: {source}")]
    Config {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    #[error("failed to open pseudo-terminal: {0}")]
    Pty(String),

    #[error("failed to spawn '{command}': {reason}")]
    Spawn { command: String, reason: String },

    #[error("'{command}' exited with code {code:?} and produced no output")]
    CommandFailed { command: String, code: Option<i32> },

    #[error("invalid argument: {0}")]
    InvalidArgument(String),
}
