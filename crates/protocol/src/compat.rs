//! Compatibility flags and the peer capability token.
//!
//! After argument parsing the server advertises a single byte of capability
//! bits to the client. The bit values mirror upstream rsync's `CF_*`
//! constants exactly; the peer's side of the exchange arrives earlier, folded
//! into the value of its `--rsh`/`-e` option.

use std::ops::{BitOr, BitOrAssign};

/// Capability bits written by the server after argument parsing.
///
/// A typed view over the wire byte so higher layers never manipulate raw bit
/// positions. Only the bits this daemon understands are modeled; the rest of
/// the byte stays zero.
#[derive(Clone, Copy, Debug, Default, Eq, Hash, PartialEq)]
pub struct CompatFlags(u8);

impl CompatFlags {
    /// Incremental recursion is in effect (`CF_INC_RECURSE`).
    pub const INC_RECURSE: Self = Self(0x01);

    /// The peer supports length-framed, size-bounded file list entries
    /// (`CF_SAFE_FLIST`).
    pub const SAFE_FLIST: Self = Self(0x04);

    /// Returns the empty flag set.
    #[must_use]
    pub const fn empty() -> Self {
        Self(0)
    }

    /// Returns the raw wire byte.
    #[must_use]
    pub const fn bits(self) -> u8 {
        self.0
    }

    /// Reports whether every bit of `other` is set in `self`.
    #[must_use]
    pub const fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }
}

impl BitOr for CompatFlags {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

impl BitOrAssign for CompatFlags {
    fn bitor_assign(&mut self, rhs: Self) {
        self.0 |= rhs.0;
    }
}

/// Error returned when the peer capability token is not understood.
#[derive(Clone, Debug, Eq, PartialEq, thiserror::Error)]
#[error("protocol not supported - got {token:?} from peer")]
pub struct CapabilityError {
    /// The token the peer supplied.
    token: String,
}

/// Capabilities the peer folded into its `--rsh`/`-e` option value.
///
/// The token must begin with `.`; each following letter stands alone. `i`
/// requests incremental recursion and `f` the safe file list. `L` (symlink
/// times) and `s` (symlink iconv) are accepted and ignored, as are letters
/// newer peers may add, matching upstream tolerance.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct PeerCapabilities {
    incremental_recurse: bool,
    safe_file_list: bool,
}

impl PeerCapabilities {
    /// Parses the capability token sent as the `-e` option value.
    pub fn parse(token: &str) -> Result<Self, CapabilityError> {
        let Some(letters) = token.strip_prefix('.') else {
            return Err(CapabilityError {
                token: token.to_owned(),
            });
        };

        Ok(Self {
            incremental_recurse: letters.contains('i'),
            safe_file_list: letters.contains('f'),
        })
    }

    /// Whether the peer advertised incremental recursion (`i`).
    #[must_use]
    pub const fn incremental_recurse(self) -> bool {
        self.incremental_recurse
    }

    /// Whether the peer advertised the safe file list (`f`).
    #[must_use]
    pub const fn safe_file_list(self) -> bool {
        self.safe_file_list
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flag_bits_match_upstream_values() {
        assert_eq!(CompatFlags::INC_RECURSE.bits(), 0x01);
        assert_eq!(CompatFlags::SAFE_FLIST.bits(), 0x04);
    }

    #[test]
    fn flags_combine_with_bit_or() {
        let flags = CompatFlags::INC_RECURSE | CompatFlags::SAFE_FLIST;
        assert_eq!(flags.bits(), 0x05);
        assert!(flags.contains(CompatFlags::INC_RECURSE));
        assert!(flags.contains(CompatFlags::SAFE_FLIST));

        let mut accumulated = CompatFlags::empty();
        accumulated |= CompatFlags::SAFE_FLIST;
        assert_eq!(accumulated.bits(), 0x04);
    }

    #[test]
    fn parses_incremental_and_safe_list_letters() {
        let caps = PeerCapabilities::parse(".if").expect("valid token");
        assert!(caps.incremental_recurse());
        assert!(caps.safe_file_list());
    }

    #[test]
    fn bare_dot_advertises_nothing() {
        let caps = PeerCapabilities::parse(".").expect("valid token");
        assert!(!caps.incremental_recurse());
        assert!(!caps.safe_file_list());
    }

    #[test]
    fn reserved_letters_are_accepted_and_ignored() {
        let caps = PeerCapabilities::parse(".iLsf").expect("valid token");
        assert!(caps.incremental_recurse());
        assert!(caps.safe_file_list());
    }

    #[test]
    fn unknown_letters_from_newer_peers_are_tolerated() {
        let caps = PeerCapabilities::parse(".iLsfxC").expect("newer peers send more letters");
        assert!(caps.incremental_recurse());
        assert!(caps.safe_file_list());
    }

    #[test]
    fn tokens_without_the_leading_dot_are_rejected() {
        let err = PeerCapabilities::parse("if").unwrap_err();
        assert_eq!(err.to_string(), "protocol not supported - got \"if\" from peer");
    }
}
