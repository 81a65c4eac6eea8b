//! Discovery core error types
//!
//! Probe failures are not errors: they end as registry state and
//! notifications. These variants cover requests the core cannot start.

use protocol::{BusId, ProtocolError};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum XptError {
    #[error("Unknown bus: {0}")]
    UnknownBus(BusId),

    #[error("{bus} reports {max_target} targets, at most 15 are addressable")]
    InvalidTopology { bus: BusId, max_target: u8 },

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Invalid probe configuration: {0}")]
    Config(String),

    #[error(transparent)]
    Protocol(#[from] ProtocolError),
}

pub type Result<T> = std::result::Result<T, XptError>;
