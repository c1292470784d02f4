//! Error taxonomy for the execution & job core.
//!
//! One enum, one variant per failure class, built on `thiserror` so each
//! variant's `Display` doubles as its `std::error::Error` message.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("could not connect to agent at {addr}")]
    Connect {
        addr: String,
        #[source]
        source: tonic::transport::Error,
    },

    #[error("remote agent reported an error: {0}")]
    Remote(String),

    #[error("command line was empty")]
    EmptyCommand,

    #[error("malformed batch definition: {0}")]
    MalformedBatch(String),

    #[error("path is a directory, not a file: {0}")]
    PathIsDirectory(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Toml(#[from] toml::de::Error),
}

pub type Result<T> = std::result::Result<T, Error>;
