//! Error kinds surfaced while driving the server handshake.
//!
//! The state machine distinguishes failures that can still be reported to the
//! peer as an `@ERROR:` line from failures of the channel itself, which can
//! only propagate to the caller. A single helper at the state-machine
//! boundary performs the wire echo; everything below it just returns typed
//! errors.

use rsyncd_protocol::{ChannelError, CharsetError, NegotiationError};

use crate::module::ModuleError;

/// Errors produced by the server handshake.
#[derive(Debug, thiserror::Error)]
pub enum HandshakeError {
    /// The underlying channel failed; the connection is unusable.
    #[error(transparent)]
    Channel(#[from] ChannelError),
    /// The peer violated the handshake protocol.
    #[error("{0}")]
    Protocol(String),
    /// Authentication failed or a supplied path escaped the module root.
    #[error("{0}")]
    Security(String),
    /// Module lookup or definition failed.
    #[error(transparent)]
    Module(#[from] ModuleError),
    /// Text could not be converted in the negotiated character set.
    #[error(transparent)]
    Codec(#[from] CharsetError),
}

impl HandshakeError {
    /// Whether the failure can still be echoed to the peer as `@ERROR:`.
    ///
    /// Channel failures cannot: the write would fail the same way.
    #[must_use]
    pub fn is_reportable(&self) -> bool {
        !matches!(self, Self::Channel(_))
    }
}

impl From<NegotiationError> for HandshakeError {
    fn from(err: NegotiationError) -> Self {
        Self::Protocol(err.to_string())
    }
}
