use thiserror::Error;

#[derive(Debug, Error)]
pub enum SchedulerError {
    #[error("calendar data error: {0}")]
    Data(String),
    #[error("invalid scheduling range: {0}")]
    Range(String),
    #[error("transient suggestion service error: {0}")]
    TransientService(String),
    #[error("suggestion service unavailable: {0}")]
    ServiceUnavailable(String),
    #[error("malformed suggestion response: {0}")]
    MalformedResponse(String),
    #[error("Invalid config: {0}")]
    InvalidConfig(String),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("request was cancelled")]
    Cancelled,
}

/// Coarse classification the hosting layer maps onto its own responses.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    BadInput,
    ExternalService,
    NothingUsable,
    Internal,
}

impl SchedulerError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Data(_) | Self::Range(_) => ErrorKind::BadInput,
            Self::TransientService(_) | Self::ServiceUnavailable(_) => ErrorKind::ExternalService,
            Self::MalformedResponse(_) => ErrorKind::NothingUsable,
            Self::InvalidConfig(_) | Self::Io(_) | Self::Json(_) | Self::Cancelled => {
                ErrorKind::Internal
            }
        }
    }

    pub fn is_transient(&self) -> bool {
        matches!(self, Self::TransientService(_))
    }
}

impl From<crate::domain::suggestion_validator::MalformedResponse> for SchedulerError {
    fn from(error: crate::domain::suggestion_validator::MalformedResponse) -> Self {
        Self::MalformedResponse(error.0)
    }
}
