//! Failure taxonomy shared by every backend

/// Error type for generation calls.
/// Implements Clone so failures can cross channels.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum Error
{   /// Settings outside the accepted ranges, or rejected by the provider
    #[error("Invalid settings: {0}")]
    InvalidSettings(String)
  , /// The caller signalled cancellation before the call finished
    #[error("Generation cancelled")]
    Cancelled
  , /// The provider could not be reached or failed irrecoverably
    #[error("Backend unavailable: {0}")]
    BackendUnavailable(String)
  , /// Malformed configuration or an unknown backend name.
    /// Only raised while building backends, never by a generation call.
    #[error("Invalid configuration: {0}")]
    InvalidConfiguration(String)
}

impl Error
{   /// Only an unreachable backend is worth another attempt
    pub fn is_retryable(&self) -> bool
    {   matches!(self, Error::BackendUnavailable(_))
    }

    pub fn is_cancelled(&self) -> bool
    {   matches!(self, Error::Cancelled)
    }
}

/// A streaming failure pinned to its position in the sequence.
///
/// `delivered` counts the chunks handed to the caller before the failure,
/// so zero means the call failed before producing anything.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{error} (after {delivered} chunks)")]
pub struct StreamFailure
{   pub delivered: usize
  , pub error: Error
}

impl StreamFailure
{   pub fn new(delivered: usize, error: Error) -> Self
    {   StreamFailure
        {   delivered
          , error
        }
    }
}

impl From<StreamFailure> for Error
{   fn from(failure: StreamFailure) -> Self
    {   failure.error
    }
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
