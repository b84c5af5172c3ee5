use thiserror::Error;

/// Failure modes of the delivery coordinator, shared by both transports.
///
/// A receiver without a live connection is deliberately NOT represented
/// here: skipped fan-out is a successful operation, the durable row is
/// authoritative and the receiver catches up on the next history fetch.
#[derive(Debug, Error)]
pub enum DeliveryError {
    /// Missing or malformed input, rejected before any persistence.
    #[error("invalid request: {0}")]
    Validation(String),

    /// The acting user is not the message's sender, or the message is
    /// already deleted. No state was mutated.
    #[error("forbidden")]
    Forbidden,

    /// Referenced message or user does not exist.
    #[error("{0} not found")]
    NotFound(&'static str),

    /// The durable store failed; the caller may retry. Writes are
    /// single-row operations so no partial state is left behind.
    #[error("persistence failure: {0}")]
    Persistence(String),
}

impl DeliveryError {
    pub fn persistence(err: impl std::fmt::Display) -> Self {
        Self::Persistence(err.to_string())
    }
}
