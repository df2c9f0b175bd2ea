//! Property tests for strict character conversion.

use proptest::prelude::*;
use rsyncd_protocol::Charset;

proptest! {
    /// Encoding then decoding round-trips every string UTF-8 can represent.
    #[test]
    fn utf8_encode_decode_round_trips(text in ".*") {
        let charset = Charset::utf8();
        let bytes = charset.encode(&text).expect("utf-8 encodes all of Unicode");
        let decoded = charset.decode(&bytes).expect("own output must decode");
        prop_assert_eq!(decoded, text);
    }

    /// Latin-1 round-trips every string it can express at all.
    #[test]
    fn latin1_round_trips_representable_text(text in "[ -~\u{a0}-\u{ff}]*") {
        let charset = Charset::for_label("ISO-8859-1").expect("known label");
        let bytes = charset.encode(&text).expect("text drawn from the latin-1 range");
        let decoded = charset.decode(&bytes).expect("own output must decode");
        prop_assert_eq!(decoded, text);
    }

    /// Arbitrary bytes either decode strictly or fail; decoding never alters
    /// content silently.
    #[test]
    fn utf8_decode_is_strict(bytes in proptest::collection::vec(any::<u8>(), 0..256)) {
        let charset = Charset::utf8();
        match charset.decode(&bytes) {
            Ok(text) => prop_assert_eq!(text.as_bytes(), bytes.as_slice()),
            Err(_) => prop_assert!(std::str::from_utf8(&bytes).is_err()),
        }
    }
}
