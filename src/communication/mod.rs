mod socket;

pub use socket::{ModbusSocket, TcpSocket};

use std::time::Duration;
use thiserror::Error;

/// The only things a session needs to know about a failed byte transfer.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("Couldn't open connection to {address}: {reason}")]
    Connect { address: String, reason: String },

    #[error("send failed: {0}")]
    Send(String),

    #[error("receive failed: {0}")]
    Receive(String),

    #[error("timed out after {} ms", .0.as_millis())]
    Timeout(Duration),

    #[error("connection closed by peer")]
    Closed,

    #[error("socket isn't connected")]
    NotConnected,
}

impl TransportError {
    /// Whether the connection can't carry another request.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            TransportError::Closed | TransportError::NotConnected | TransportError::Connect { .. }
        )
    }
}
