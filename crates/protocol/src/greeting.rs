//! The ASCII `@RSYNCD:` banner lines exchanged during the handshake.
//!
//! Both the version greeting and the status keywords (`OK`, `EXIT`,
//! `AUTHREQ`, `@ERROR`) share this surface. Formatting is byte-exact with
//! upstream rsync; parsing tolerates the line-ending and spacing variations
//! peers produce in practice and rejects everything else.

use std::fmt;

use crate::error::NegotiationError;
use crate::version::ProtocolVersion;

/// Prefix shared by every `@RSYNCD:` control line.
pub(crate) const RSYNCD_PREFIX: &str = "@RSYNCD:";

/// Formats the daemon greeting sent at the start of every session.
///
/// The layout matches upstream rsync byte for byte: `@RSYNCD: 31.0\n`. The
/// rendered line round-trips through [`parse_greeting`].
#[must_use]
pub fn format_greeting(version: ProtocolVersion) -> String {
    format!("{RSYNCD_PREFIX} {}.{}\n", version.major(), version.minor())
}

/// Parses a daemon greeting of the form `@RSYNCD: <maj>.<min>`.
///
/// Trailing carriage returns and line feeds are ignored, whitespace after the
/// prefix is tolerated, and the fractional minor component is optional (some
/// peers send a bare `@RSYNCD: 30`). Digit runs saturate rather than overflow
/// so absurdly long version numbers are still classified as greetings and then
/// settled by negotiation. Everything else is malformed.
pub fn parse_greeting(line: &str) -> Result<ProtocolVersion, NegotiationError> {
    let trimmed = line.trim_end_matches(['\r', '\n']);
    let malformed = || NegotiationError::MalformedGreeting {
        input: trimmed.to_owned(),
    };

    let after_prefix = trimmed.strip_prefix(RSYNCD_PREFIX).ok_or_else(malformed)?;
    let remainder = after_prefix.trim_start();

    let major_len = ascii_digit_prefix_len(remainder);
    if major_len == 0 {
        return Err(malformed());
    }
    let major = parse_ascii_digits(&remainder[..major_len]);

    let mut minor = 0;
    let mut rest = &remainder[major_len..];
    if let Some(after_dot) = rest.strip_prefix('.') {
        let minor_len = ascii_digit_prefix_len(after_dot);
        if minor_len == 0 {
            return Err(malformed());
        }
        minor = parse_ascii_digits(&after_dot[..minor_len]);
        rest = &after_dot[minor_len..];
    }

    if !rest.trim_start().is_empty() {
        return Err(malformed());
    }

    Ok(ProtocolVersion::new(major, minor))
}

/// Returns the length of the leading ASCII-digit run within `input`.
fn ascii_digit_prefix_len(input: &str) -> usize {
    input
        .as_bytes()
        .iter()
        .take_while(|byte| byte.is_ascii_digit())
        .count()
}

/// Parses a run of ASCII digits into an `i32`, saturating on overflow.
fn parse_ascii_digits(digits: &str) -> i32 {
    let mut value: i32 = 0;
    for &byte in digits.as_bytes() {
        debug_assert!(byte.is_ascii_digit());
        value = value.saturating_mul(10);
        value = value.saturating_add(i32::from(byte - b'0'));
    }
    value
}

/// Terminal and intermediate status signals sent by the server during the
/// handshake.
///
/// Each variant renders as the exact wire keyword upstream rsync emits. The
/// [`Error`](Self::Error) variant renders the `@ERROR` marker alone; callers
/// append `: <message>` themselves.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum SessionStatus {
    /// Module selection (and authentication, if any) succeeded: `@RSYNCD: OK`.
    Ok,
    /// The server is closing the session cleanly: `@RSYNCD: EXIT`.
    Exit,
    /// The handshake failed: `@ERROR`.
    Error,
    /// The selected module requires authentication: `@RSYNCD: AUTHREQ`.
    AuthReq,
}

impl SessionStatus {
    /// Returns the wire keyword for this status.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Ok => "@RSYNCD: OK",
            Self::Exit => "@RSYNCD: EXIT",
            Self::Error => "@ERROR",
            Self::AuthReq => "@RSYNCD: AUTHREQ",
        }
    }
}

impl fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
