use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

/// everything that can go wrong in a fit or a prediction
#[derive(Error, Debug, Clone, PartialEq)]
pub enum Error {
    #[error("invalid input data: {message}")]
    InvalidInput { message: String },

    #[error("no events to fit: {message}")]
    InsufficientEvents { message: String },

    #[error("optimizer failed to converge: {message}")]
    NonConvergence { message: String },

    #[error("query outside fitted time domain: {message}")]
    OutOfRange { message: String },

    #[error("landmark sub-cohort is degenerate: {message}")]
    DegenerateCohort { message: String },
}

impl Error {
    pub fn invalid_input(message: impl Into<String>) -> Self {
        Self::InvalidInput { message: message.into() }
    }

    pub fn insufficient_events(message: impl Into<String>) -> Self {
        Self::InsufficientEvents { message: message.into() }
    }

    pub fn non_convergence(message: impl Into<String>) -> Self {
        Self::NonConvergence { message: message.into() }
    }

    pub fn out_of_range(message: impl Into<String>) -> Self {
        Self::OutOfRange { message: message.into() }
    }

    pub fn degenerate_cohort(message: impl Into<String>) -> Self {
        Self::DegenerateCohort { message: message.into() }
    }
}
