/// Shared error type used across all ChatRelay crates.
#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("HTTP: {0}")]
    Http(String),

    #[error("timeout: {0}")]
    Timeout(String),

    #[error("assistant backend {endpoint} returned {status}: {message}")]
    Backend {
        endpoint: String,
        status: u16,
        message: String,
    },
}

impl Error {
    /// True for a 404 from the assistant backend.
    pub fn is_not_found(&self) -> bool {
        matches!(self, Error::Backend { status: 404, .. })
    }
}

pub type Result<T> = std::result::Result<T, Error>;
