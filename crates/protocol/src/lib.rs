#![deny(unsafe_code)]
#![deny(missing_docs)]
#![deny(rustdoc::broken_intra_doc_links)]

//! # Overview
//!
//! `rsyncd_protocol` implements the wire-level primitives of the rsync daemon
//! handshake: the framed byte channel, the ASCII `@RSYNCD:` banners, protocol
//! version negotiation, strict character conversion, and the capability bits
//! exchanged once arguments have been parsed. The crate carries no policy;
//! the session state machine in `rsyncd_daemon` composes these pieces.
//!
//! # Design
//!
//! - [`channel`] provides [`DaemonChannel`], buffered byte/int/line/NUL-string
//!   framing with an explicit [`DaemonChannel::flush`].
//! - [`greeting`] parses and formats `@RSYNCD: <maj>.<min>` banners and the
//!   typed [`SessionStatus`] keywords (`OK`, `EXIT`, `AUTHREQ`, `@ERROR`).
//! - [`version`] holds [`ProtocolVersion`] and the lesser-of-two
//!   [`negotiate`] rule with its minimum-version floor.
//! - [`charset`] wraps the session character set with strict encode/decode.
//! - [`compat`] models the `CF_*` capability byte and the peer's `-e` token.
//!
//! # Invariants
//!
//! - Every framed read is bounded by [`MAX_BUF_SIZE`]; the peer cannot grow
//!   buffers without limit.
//! - Character conversion never substitutes replacement characters; lossy
//!   conversions are errors.
//! - Formatted greetings round-trip through the greeting parser.
//!
//! # Errors
//!
//! Each module surfaces its own error type ([`ChannelError`],
//! [`NegotiationError`], [`CharsetError`], [`CapabilityError`]); all implement
//! [`std::error::Error`] and the negotiation errors convert into
//! [`std::io::Error`] for transport callers.

pub mod channel;
pub mod charset;
pub mod compat;
pub mod error;
pub mod greeting;
pub mod version;

pub use channel::{ChannelError, DaemonChannel, MAX_BUF_SIZE};
pub use charset::{Charset, CharsetError};
pub use compat::{CapabilityError, CompatFlags, PeerCapabilities};
pub use error::NegotiationError;
pub use greeting::{format_greeting, parse_greeting, SessionStatus};
pub use version::{negotiate, ProtocolVersion};
