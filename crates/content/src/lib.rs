pub mod files;
pub mod fsutil;
pub mod index;
pub mod read;
pub mod singleflight;

pub use files::Files;
pub use index::{Index, Indices, Section};

use std::sync::Arc;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Json(#[from] serde_json::Error),
    #[error(transparent)]
    Fbc(#[from] fbc::Error),
    #[error("catalog {0:?} is not stored")]
    NotFound(String),
    #[error("storing canceled")]
    Canceled,
    #[error("{0}")]
    Shared(Arc<Error>),
}

impl From<Arc<Error>> for Error {
    fn from(err: Arc<Error>) -> Self {
        Self::Shared(err)
    }
}

impl Error {
    /// The io::ErrorKind underlying this error, if it is an I/O error.
    /// Serving layers map kinds onto HTTP statuses.
    pub fn io_kind(&self) -> Option<std::io::ErrorKind> {
        match self {
            Self::Io(err) => Some(err.kind()),
            Self::Fbc(fbc::Error::Io(err)) => Some(err.kind()),
            Self::Shared(err) => err.io_kind(),
            _ => None,
        }
    }

    /// Whether this error means the requested content does not exist.
    pub fn is_not_found(&self) -> bool {
        match self {
            Self::NotFound(_) => true,
            Self::Shared(err) => err.is_not_found(),
            _ => self.io_kind() == Some(std::io::ErrorKind::NotFound),
        }
    }
}
