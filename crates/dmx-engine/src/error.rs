use dmx_transport::TransportError;
use thiserror::Error;

pub type Result<T, E = EngineError> = core::result::Result<T, E>;

#[derive(Debug, Error)]
pub enum EngineError {
    #[error(transparent)]
    Transport(#[from] TransportError),
    #[error("transmitter needs an open adapter session")]
    SessionClosed,
    #[error("failed to spawn transmit worker: {0}")]
    Spawn(String),
    #[error("invalid frame timing: {0}")]
    InvalidTiming(String),
    #[error("metrics: {0}")]
    Metrics(#[from] prometheus::Error),
}
