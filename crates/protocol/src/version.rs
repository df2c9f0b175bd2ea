//! Protocol versions and the lesser-of-two negotiation rule.

use std::fmt;

use crate::error::NegotiationError;

/// Protocol version advertised in an `@RSYNCD: <maj>.<min>` greeting.
///
/// Both sides of a daemon session announce the newest protocol they speak and
/// the exchange settles on the lesser of the two. Ordering is lexicographic
/// over `(major, minor)`, so `30.0 < 31.0 < 31.1`.
#[derive(Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub struct ProtocolVersion {
    major: i32,
    minor: i32,
}

impl ProtocolVersion {
    /// The newest protocol version this implementation advertises.
    pub const CURRENT: Self = Self::new(31, 0);

    /// The oldest protocol version this implementation accepts.
    ///
    /// Versions below this predate the safe-file-list capability and are
    /// rejected during negotiation.
    pub const OLDEST: Self = Self::new(27, 0);

    /// Creates a version from its major and minor components.
    #[must_use]
    pub const fn new(major: i32, minor: i32) -> Self {
        Self { major, minor }
    }

    /// Returns the major component.
    #[must_use]
    pub const fn major(self) -> i32 {
        self.major
    }

    /// Returns the minor component.
    #[must_use]
    pub const fn minor(self) -> i32 {
        self.minor
    }
}

impl fmt::Display for ProtocolVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.major, self.minor)
    }
}

/// Selects the protocol version shared with a peer.
///
/// The agreed version is the lesser of the two advertisements. If that falls
/// below [`ProtocolVersion::OLDEST`] the session cannot continue and
/// [`NegotiationError::UnsupportedVersion`] is returned.
pub fn negotiate(
    ours: ProtocolVersion,
    peer: ProtocolVersion,
) -> Result<ProtocolVersion, NegotiationError> {
    let agreed = ours.min(peer);
    if agreed < ProtocolVersion::OLDEST {
        return Err(NegotiationError::UnsupportedVersion {
            version: agreed,
            oldest: ProtocolVersion::OLDEST,
        });
    }
    Ok(agreed)
}
