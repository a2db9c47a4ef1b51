use std::time::Duration;

/// Every failure the library can surface. Lookup misses never leave the
/// engine boundary as errors; they come back as `None`.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("{0}")]
    PreconditionFailed(String),

    #[error("invalid constraint: {0}")]
    InvalidConstraint(String),

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("{0}")]
    Engine(String),

    #[error("timed out after {}s", .0.as_secs_f64())]
    TimedOut(Duration),
}

impl Error {
    pub fn engine(message: impl Into<String>) -> Self {
        Error::Engine(message.into())
    }
}

impl From<bollard::errors::Error> for Error {
    fn from(err: bollard::errors::Error) -> Self {
        match err {
            bollard::errors::Error::DockerResponseServerError { message, .. } => {
                Error::Engine(message)
            }
            other => Error::Engine(other.to_string()),
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
