//! Strict conversion between the negotiated character set and wire bytes.
//!
//! The daemon decides the session character set before the handshake runs and
//! it stays frozen for the lifetime of the connection. Conversion is strict in
//! both directions: an unmappable character or an undecodable byte sequence is
//! an error, never a replacement character, because a silently altered module
//! name or path argument would defeat the later safety checks.

use encoding_rs::Encoding;

/// Errors produced by strict character conversion.
#[derive(Clone, Debug, Eq, PartialEq, thiserror::Error)]
pub enum CharsetError {
    /// No encoding is known under the requested label.
    #[error("unknown character set label {0:?}")]
    UnknownLabel(String),
    /// The text contains characters the session character set cannot express.
    #[error("text is not representable in {charset}")]
    Unmappable {
        /// Name of the session character set.
        charset: &'static str,
    },
    /// The bytes are not a valid sequence in the session character set.
    #[error("byte sequence is not valid {charset}")]
    Undecodable {
        /// Name of the session character set.
        charset: &'static str,
    },
}

/// The character set negotiated for one daemon session.
///
/// A thin wrapper over an [`encoding_rs::Encoding`] that exposes only the
/// strict conversions the handshake needs.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct Charset {
    encoding: &'static Encoding,
}

impl Charset {
    /// Returns the UTF-8 character set, the common case for modern peers.
    #[must_use]
    pub fn utf8() -> Self {
        Self {
            encoding: encoding_rs::UTF_8,
        }
    }

    /// Looks up a character set by WHATWG label (for example `ISO-8859-1`).
    pub fn for_label(label: &str) -> Result<Self, CharsetError> {
        Encoding::for_label(label.as_bytes())
            .map(|encoding| Self { encoding })
            .ok_or_else(|| CharsetError::UnknownLabel(label.to_owned()))
    }

    /// Returns the canonical name of this character set.
    #[must_use]
    pub fn name(&self) -> &'static str {
        self.encoding.name()
    }

    /// Encodes text into wire bytes, failing on unmappable characters.
    pub fn encode(&self, text: &str) -> Result<Vec<u8>, CharsetError> {
        let (bytes, _, had_errors) = self.encoding.encode(text);
        if had_errors {
            return Err(CharsetError::Unmappable {
                charset: self.name(),
            });
        }
        Ok(bytes.into_owned())
    }

    /// Decodes wire bytes into text, failing on invalid sequences.
    pub fn decode(&self, bytes: &[u8]) -> Result<String, CharsetError> {
        let (text, had_errors) = self.encoding.decode_without_bom_handling(bytes);
        if had_errors {
            return Err(CharsetError::Undecodable {
                charset: self.name(),
            });
        }
        Ok(text.into_owned())
    }
}

impl Default for Charset {
    fn default() -> Self {
        Self::utf8()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn utf8_round_trips_non_ascii_text() {
        let charset = Charset::utf8();
        let bytes = charset.encode("café").expect("utf-8 encodes everything");
        assert_eq!(charset.decode(&bytes).unwrap(), "café");
    }

    #[test]
    fn utf8_rejects_invalid_byte_sequences() {
        let err = Charset::utf8().decode(b"module\xff").unwrap_err();
        assert_eq!(err, CharsetError::Undecodable { charset: "UTF-8" });
    }

    #[test]
    fn latin1_rejects_unmappable_characters() {
        let charset = Charset::for_label("ISO-8859-1").expect("known label");
        let err = charset.encode("日本語").unwrap_err();
        assert!(matches!(err, CharsetError::Unmappable { .. }));
    }

    #[test]
    fn latin1_encodes_what_it_can_express() {
        let charset = Charset::for_label("ISO-8859-1").expect("known label");
        let bytes = charset.encode("café").expect("latin-1 text");
        assert_eq!(bytes, b"caf\xe9");
        assert_eq!(charset.decode(&bytes).unwrap(), "café");
    }

    #[test]
    fn unknown_labels_are_rejected() {
        let err = Charset::for_label("no-such-charset").unwrap_err();
        assert_eq!(err, CharsetError::UnknownLabel("no-such-charset".into()));
    }
}
