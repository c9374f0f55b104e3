use thiserror::Error;

/// JSON-RPC error code returned by the sequencer when `__validate__` of the
/// sender account fails.
pub const VALIDATION_FAILURE_CODE: i64 = 55;

#[derive(Debug, Error)]
pub enum Error {
    #[error("Error in HTTP transport: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("RPC error {code}: {message}")]
    Rpc {
        code: i64,
        message: String,
        data: Option<serde_json::Value>,
    },
    #[error("Failed to decode RPC response: {0}")]
    Decode(#[from] serde_json::Error),
    #[error("RPC response has neither result nor error")]
    MissingResult,
}

impl Error {
    pub fn code(&self) -> Option<i64> {
        match self {
            Error::Rpc { code, .. } => Some(*code),
            _ => None,
        }
    }

    /// Account validation failure usually means that a transaction this one
    /// depends on (e.g. funding of the account) is still in the mempool.
    pub fn is_validation_failure(&self) -> bool {
        self.code() == Some(VALIDATION_FAILURE_CODE)
    }
}
