use thiserror::Error;

pub type Result<T, E = TransportError> = core::result::Result<T, E>;

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("device enumeration failed: {0}")]
    Enumeration(String),
    #[error("adapter not found: {0}")]
    NotFound(String),
    #[error("driver error during {op}: {detail}")]
    Driver { op: &'static str, detail: String },
    #[error("adapter session is not open")]
    NotOpen,
}

impl TransportError {
    pub fn driver(op: &'static str, detail: impl Into<String>) -> Self {
        TransportError::Driver {
            op,
            detail: detail.into(),
        }
    }
}
