use thiserror::Error;

/// A precondition or post-condition violation raised by a guard or a command.
/// The message is meant for a clinician/engineer reading a log line, not for
/// programmatic matching.
#[derive(Debug, Error)]
#[error("{0}")]
pub struct PdmError(pub String);

impl PdmError {
    pub fn new(msg: impl Into<String>) -> Self {
        Self(msg.into())
    }
}

/// Raised by `RadioLink` when the peer's message/packet counters disagree
/// with ours. Recovered once per logical exchange via interim resync; a
/// second occurrence in the same exchange is fatal.
#[derive(Debug, Error)]
#[error("radio transmission out of sync")]
pub struct TransmissionOutOfSyncError;

/// Raised when a caller attempts to take the single-flight lock while it is
/// held by another logical caller. `is_busy()` swallows this and returns
/// `true`.
#[derive(Debug, Error)]
#[error("PDM is busy with another command")]
pub struct PdmBusyError;

/// Parent of every error this crate can raise. Any other error (a panic-free
/// `std::error::Error` bubbling up through the protocol/persistence layers)
/// is wrapped as `Unexpected`, preserving the cause via `#[source]`.
#[derive(Debug, Error)]
pub enum OmnipyError {
    #[error(transparent)]
    Pdm(#[from] PdmError),

    #[error(transparent)]
    OutOfSync(#[from] TransmissionOutOfSyncError),

    #[error(transparent)]
    Busy(#[from] PdmBusyError),

    #[error("Unexpected error")]
    Unexpected {
        #[source]
        source: Box<dyn std::error::Error + Send + Sync + 'static>,
    },
}

impl OmnipyError {
    /// Wraps an arbitrary error as the `Unexpected` variant, the fallback
    /// case every command's `except Exception` branch maps to in the source.
    pub fn unexpected(source: impl std::error::Error + Send + Sync + 'static) -> Self {
        Self::Unexpected {
            source: Box::new(source),
        }
    }
}

pub type PdmResult<T> = Result<T, OmnipyError>;
