//! Challenge-response authentication for restricted modules.
//!
//! The daemon protects restricted modules with the classic rsync scheme: the
//! server emits a one-time challenge, the client answers with
//! `base64(md5(secret || challenge))`, and the server compares that against
//! the digest it derives from its own secret store. Verification is
//! constant-time so response comparison leaks nothing about the position of
//! the first differing byte.

use std::io;

use base64::engine::general_purpose::STANDARD_NO_PAD;
use base64::Engine as _;
use md5::{Digest, Md5};

#[cfg(test)]
use std::cell::RefCell;

/// Number of random bytes behind one challenge (22 base64 characters).
const CHALLENGE_LEN: usize = 16;

#[cfg(test)]
thread_local! {
    static TEST_CHALLENGE: RefCell<Option<String>> = const { RefCell::new(None) };
}

/// Runs `func` with every [`AuthContext::new`] on this thread yielding the
/// given challenge, restoring the previous override afterwards.
#[cfg(test)]
pub(crate) fn with_test_challenge<F, R>(challenge: &str, func: F) -> R
where
    F: FnOnce() -> R,
{
    let previous =
        TEST_CHALLENGE.with(|cell| cell.borrow_mut().replace(challenge.to_owned()));
    let result = func();
    TEST_CHALLENGE.with(|cell| {
        *cell.borrow_mut() = previous;
    });
    result
}

/// Per-handshake authentication state: one fresh challenge.
///
/// The challenge is a cryptographically random token rendered as unpadded
/// base64, safe to embed in a single `@RSYNCD: AUTHREQ <challenge>` line.
#[derive(Clone, Debug)]
pub struct AuthContext {
    challenge: String,
}

impl AuthContext {
    /// Generates a fresh challenge from the system's secure random source.
    pub fn new() -> io::Result<Self> {
        #[cfg(test)]
        if let Some(challenge) = TEST_CHALLENGE.with(|cell| cell.borrow().clone()) {
            return Ok(Self { challenge });
        }

        let mut bytes = [0u8; CHALLENGE_LEN];
        getrandom::fill(&mut bytes)?;
        Ok(Self {
            challenge: STANDARD_NO_PAD.encode(bytes),
        })
    }

    /// Builds a context around a known challenge.
    ///
    /// Useful for clients replaying a server-issued challenge and for
    /// deterministic tests.
    #[must_use]
    pub fn from_challenge(challenge: impl Into<String>) -> Self {
        Self {
            challenge: challenge.into(),
        }
    }

    /// Returns the challenge string for this handshake.
    #[must_use]
    pub fn challenge(&self) -> &str {
        &self.challenge
    }
}

/// Computes the response a client derives from its secret and the challenge.
///
/// This is the digest restricted modules expect back:
/// `base64(md5(secret || challenge))`, unpadded.
#[must_use]
pub fn compute_response(secret: &str, challenge: &str) -> String {
    let mut hasher = Md5::new();
    hasher.update(secret.as_bytes());
    hasher.update(challenge.as_bytes());
    let digest = hasher.finalize();
    STANDARD_NO_PAD.encode(digest)
}

/// Compares an expected response against the peer's answer in constant time.
///
/// The loop always visits the longer of the two lengths and folds every byte
/// difference into one accumulator, so the runtime does not depend on where
/// the strings first diverge.
#[must_use]
pub fn verify(expected: &str, actual: &str) -> bool {
    let expected = expected.as_bytes();
    let actual = actual.as_bytes();

    let mut diff = expected.len() ^ actual.len();
    for index in 0..expected.len().max(actual.len()) {
        let lhs = expected.get(index).copied().unwrap_or(0);
        let rhs = actual.get(index).copied().unwrap_or(0);
        diff |= usize::from(lhs ^ rhs);
    }
    diff == 0
}
