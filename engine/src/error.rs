use thiserror::Error;

/// A caller bug: an operation was invoked on a position that does not satisfy
/// its precondition (e.g. asking for the winner of a non-terminal position).
#[derive(Debug, Error, PartialEq, Eq)]
#[error("precondition violated: {0}")]
pub struct PreconditionError(pub String);

impl PreconditionError {
    pub fn new(message: impl Into<String>) -> Self {
        Self(message.into())
    }
}
