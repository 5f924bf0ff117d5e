use std::path::PathBuf;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("failed to write '{path}': {source}")]
    Write {
        path:   PathBuf,
        source: std::io::Error,
    },

    #[error("failed to read '{path}': {source}")]
    Read {
        path:   PathBuf,
        source: std::io::Error,
    },

    #[error("failed to remove '{path}': {source}")]
    Remove {
        path:   PathBuf,
        source: std::io::Error,
    },

    #[error("failed to move '{staging}' onto '{target}'")]
    SwapFailed { staging: PathBuf, target: PathBuf },

    #[error("'{0}' has no parent directory")]
    NoParent(PathBuf),

    #[error("'{0}' is not a directory")]
    NotADirectory(PathBuf),
}

pub type Result<T> = std::result::Result<T, Error>;
