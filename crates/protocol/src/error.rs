//! Error types shared by the greeting and version-negotiation modules.

use std::io;

use crate::version::ProtocolVersion;

/// Errors that can occur while exchanging and validating `@RSYNCD:` greetings.
#[derive(Clone, Debug, Eq, PartialEq, thiserror::Error)]
pub enum NegotiationError {
    /// The greeting line did not match `@RSYNCD: <maj>.<min>`.
    #[error("malformed rsync daemon greeting: {input:?}")]
    MalformedGreeting {
        /// The raw greeting text without trailing line terminators.
        input: String,
    },
    /// The negotiated version fell below the oldest protocol this daemon speaks.
    #[error("peer protocol version {version} is older than the oldest supported ({oldest})")]
    UnsupportedVersion {
        /// The version the exchange agreed on.
        version: ProtocolVersion,
        /// The oldest version this implementation accepts.
        oldest: ProtocolVersion,
    },
}

impl From<NegotiationError> for io::Error {
    fn from(err: NegotiationError) -> Self {
        io::Error::new(io::ErrorKind::InvalidData, err)
    }
}
