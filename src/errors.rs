use std::collections::TryReserveError;

#[non_exhaustive]
#[derive(Debug)]
pub enum Error {
    /// The cell matrix does not describe a usable simulation cell
    InvalidBox(String),
    /// The cutoff is incompatible with the cell (non-positive, or so large
    /// that wrapping would be ambiguous)
    InvalidCutoff(String),
    /// Positions input with the wrong dimensionality
    DimensionMismatch(String),
    /// Growing one of the internal buffers failed
    Capacity(String),
    /// Error used when a panic was caught inside a pairwise map
    Aborted(String),
}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Error::InvalidBox(e) => write!(f, "invalid cell matrix: {}", e),
            Error::InvalidCutoff(e) => write!(f, "invalid cutoff: {}", e),
            Error::DimensionMismatch(e) => write!(f, "dimension mismatch: {}", e),
            Error::Capacity(e) => write!(f, "allocation failure: {}", e),
            Error::Aborted(e) => write!(f, "pairwise map aborted: {}", e),
        }
    }
}

impl std::error::Error for Error {}

impl From<TryReserveError> for Error {
    fn from(error: TryReserveError) -> Error {
        Error::Capacity(error.to_string())
    }
}

// Box<dyn Any + Send + 'static> is the error type in std::panic::catch_unwind
impl From<Box<dyn std::any::Any + Send + 'static>> for Error {
    fn from(error: Box<dyn std::any::Any + Send + 'static>) -> Error {
        let message = if let Some(message) = error.downcast_ref::<String>() {
            message.clone()
        } else if let Some(message) = error.downcast_ref::<&str>() {
            (*message).to_owned()
        } else {
            "panic payload is not a string".to_owned()
        };

        Error::Aborted(message)
    }
}
