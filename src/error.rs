use crate::channel::ChannelError;
use std::fmt;

/// Input rejected locally, before any I/O is attempted
#[derive(Debug, Clone, PartialEq)]
pub enum ValidationError {
    MissingSubject,
    MissingReading,
    EmptyReading,
    InvalidSchedule(String),
}

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ValidationError::MissingSubject => write!(f, "subject id is required"),
            ValidationError::MissingReading => {
                write!(f, "no sensor reading available to predict from")
            }
            ValidationError::EmptyReading => write!(f, "sensor reading has no metrics"),
            ValidationError::InvalidSchedule(reason) => {
                write!(f, "invalid schedule input: {}", reason)
            }
        }
    }
}

impl std::error::Error for ValidationError {}

/// Outcome of a failed sync operation.
///
/// Returned from every mutating operation of the session; expected failures
/// (no data, service unavailable, stale response) never surface as panics.
#[derive(Debug, Clone, PartialEq)]
pub enum SyncError {
    Validation(ValidationError),
    /// A capability call (fetch, predict, schedule) failed
    Transport(String),
    /// The response belonged to a request that a newer one replaced
    Superseded { request: u64 },
    Channel(ChannelError),
}

impl fmt::Display for SyncError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SyncError::Validation(e) => write!(f, "{}", e),
            SyncError::Transport(msg) => write!(f, "{}", msg),
            SyncError::Superseded { request } => {
                write!(f, "response to request #{} was superseded", request)
            }
            SyncError::Channel(e) => write!(f, "{}", e),
        }
    }
}

impl std::error::Error for SyncError {}

impl From<ValidationError> for SyncError {
    fn from(e: ValidationError) -> Self {
        SyncError::Validation(e)
    }
}

impl From<ChannelError> for SyncError {
    fn from(e: ChannelError) -> Self {
        SyncError::Channel(e)
    }
}
