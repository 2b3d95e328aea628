use thiserror::Error;

/// Errors surfaced by the business data API.
///
/// Callers branch on the kind: `NotFound` for an operator badge is a valid
/// business outcome, `AlreadyRegistered` means the side effect was applied by
/// an earlier pass, everything else aborts the current resolution only.
#[derive(Debug, Error)]
pub enum ProductDataError {
    #[error("no product record for tag {epc}")]
    NotFound { epc: String },

    #[error("tag {epc} already registered: {detail}")]
    AlreadyRegistered { epc: String, detail: String },

    #[error("invalid product record for tag {epc}: {reason}")]
    InvalidData { epc: String, reason: String },

    #[error("data service request failed: {0}")]
    Network(String),

    #[error("unexpected data service response for tag {epc}: HTTP {status}")]
    Unexpected { epc: String, status: u16 },
}

impl From<reqwest::Error> for ProductDataError {
    fn from(err: reqwest::Error) -> Self {
        ProductDataError::Network(err.to_string())
    }
}

impl From<reqwest_middleware::Error> for ProductDataError {
    fn from(err: reqwest_middleware::Error) -> Self {
        ProductDataError::Network(err.to_string())
    }
}

/// Errors from the reader lifecycle layer.
#[derive(Debug, Error)]
pub enum ReaderError {
    /// The requested transition is not legal from the current state
    /// (start while running, stop while stopped). Reported to the caller,
    /// never retried.
    #[error("{0}")]
    IllegalState(String),

    /// Connect/configure/start failure from the hardware driver. Drives the
    /// reconnection state machine and never propagates past it.
    #[error("reader hardware error: {0}")]
    Hardware(String),
}
