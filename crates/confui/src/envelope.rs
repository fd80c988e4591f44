use serde::Serialize;
use thiserror::Error;

/// Upper bound on the encoded envelope; prompts and extra data are small and
/// the HAL rejects larger messages anyway.
pub const MAX_ENVELOPE_BYTES: usize = 6144;

#[derive(Debug, Error)]
pub enum EnvelopeError {
    #[error("prompt is not valid UTF-8")]
    MalformedUtf8,
    #[error("encoded envelope exceeds {MAX_ENVELOPE_BYTES} bytes")]
    Overflow,
    #[error("CBOR encoding failed: {0}")]
    Encode(#[from] serde_cbor::Error),
}

#[derive(Serialize)]
struct Envelope<'a> {
    prompt: &'a str,
    #[serde(with = "serde_bytes")]
    extra: &'a [u8],
}

/// Build the canonical CBOR confirmation envelope.
///
/// A definite-length map of exactly two entries: `"prompt"` (text string,
/// the prompt verbatim) and `"extra"` (byte string, opaque HAL data). The
/// prompt arrives from the HAL as raw bytes and is rejected here unless it
/// is valid UTF-8 (RFC 3629: 1-4 byte sequences, correct continuation
/// bytes, no truncated tail). Encoding is deterministic, so the signed
/// bytes for a given prompt/extra pair never vary.
pub fn build(prompt: &[u8], extra: &[u8]) -> Result<Vec<u8>, EnvelopeError> {
    let prompt = std::str::from_utf8(prompt).map_err(|_| EnvelopeError::MalformedUtf8)?;
    let encoded = serde_cbor::to_vec(&Envelope { prompt, extra })?;
    if encoded.len() > MAX_ENVELOPE_BYTES {
        return Err(EnvelopeError::Overflow);
    }
    Ok(encoded)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn canonical_encoding_of_known_vector() {
        let cbor = build(b"Pay $5", &[0x01, 0x02]).unwrap();
        let expected: &[u8] = &[
            0xa2, // map(2)
            0x66, b'p', b'r', b'o', b'm', b'p', b't', // "prompt"
            0x66, b'P', b'a', b'y', b' ', b'$', b'5', // "Pay $5"
            0x65, b'e', b'x', b't', b'r', b'a', // "extra"
            0x42, 0x01, 0x02, // bytes(2)
        ];
        assert_eq!(cbor, expected);
    }

    #[test]
    fn deterministic_for_identical_inputs() {
        let a = build("Zahle 5 \u{20ac}".as_bytes(), &[0xff]).unwrap();
        let b = build("Zahle 5 \u{20ac}".as_bytes(), &[0xff]).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn empty_prompt_and_extra() {
        let cbor = build(b"", &[]).unwrap();
        let expected: &[u8] = &[
            0xa2, 0x66, b'p', b'r', b'o', b'm', b'p', b't', 0x60, 0x65, b'e', b'x', b't', b'r',
            b'a', 0x40,
        ];
        assert_eq!(cbor, expected);
    }

    #[test]
    fn multibyte_utf8_accepted() {
        // 2-, 3- and 4-byte sequences
        for prompt in ["\u{00e9}", "\u{20ac}", "\u{1f512}"] {
            assert!(build(prompt.as_bytes(), &[]).is_ok());
        }
    }

    #[test]
    fn invalid_utf8_rejected() {
        let cases: &[&[u8]] = &[
            &[0x80],             // bare continuation byte
            &[0xc3],             // truncated 2-byte sequence
            &[0xe2, 0x82],       // truncated 3-byte sequence
            &[0xf0, 0x9f, 0x94], // truncated 4-byte sequence
            &[0xc3, 0x28],       // continuation not 10xxxxxx
            &[0xc0, 0xaf],       // overlong encoding
            &[0xf8, 0x88, 0x80, 0x80, 0x80], // 5-byte sequence
            &[0xed, 0xa0, 0x80], // UTF-16 surrogate
        ];
        for case in cases {
            assert!(
                matches!(build(case, &[]), Err(EnvelopeError::MalformedUtf8)),
                "accepted invalid bytes {case:02x?}"
            );
        }
    }

    #[test]
    fn oversize_envelope_rejected() {
        let prompt = vec![b'a'; MAX_ENVELOPE_BYTES];
        assert!(matches!(
            build(&prompt, &[]),
            Err(EnvelopeError::Overflow)
        ));
    }
}
