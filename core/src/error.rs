use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("configuration error: {0}")]
    Configuration(String),

    #[error("integrity error: {0}")]
    Integrity(String),

    #[error("snapshot not found: {name}")]
    NotFound { name: String },

    #[error("{0}")]
    Soft(String),

    #[error("failed to parse size estimate from output:\n{output}")]
    EstimateParse { output: String },

    #[error("object store error: {0}")]
    Store(String),

    #[error("command failed: {0}")]
    Command(String),
}

impl Error {
    /// Soft errors are expected conditions; `main` reports them on stderr
    /// and exits cleanly instead of failing the process.
    pub fn is_soft(&self) -> bool {
        matches!(self, Error::Soft(_))
    }
}

pub type Result<T> = std::result::Result<T, Error>;
