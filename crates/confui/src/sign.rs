use hmac::{Hmac, Mac};
use sha2::Sha256;
use thiserror::Error;

/// Domain separation prefix for confirmation signatures.
const CONFIRMATION_CONTEXT: &[u8] = b"confirmation token";

pub const KEY_BYTES: usize = 32;

/// The well-known test key: 32 bytes of 0xA5. Used when no key file is
/// provisioned; validators in test setups share it.
pub const TEST_KEY: [u8; KEY_BYTES] = [0xa5; KEY_BYTES];

#[derive(Debug, Error)]
pub enum KeyError {
    #[error("failed to read key file: {0}")]
    Io(#[from] std::io::Error),
    #[error("key file holds {0} bytes, expected exactly {KEY_BYTES}")]
    WrongSize(usize),
}

/// HMAC-SHA256 over `"confirmation token" || message`.
pub fn sign_confirmation(key: &[u8; KEY_BYTES], message: &[u8]) -> Vec<u8> {
    let mut mac =
        Hmac::<Sha256>::new_from_slice(key).expect("HMAC accepts keys of any length");
    mac.update(CONFIRMATION_CONTEXT);
    mac.update(message);
    mac.finalize().into_bytes().to_vec()
}

/// Load the per-device auth-token key from a file of exactly 32 bytes.
pub fn load_key(path: &str) -> Result<[u8; KEY_BYTES], KeyError> {
    let bytes = std::fs::read(path)?;
    let len = bytes.len();
    let key: [u8; KEY_BYTES] = bytes.try_into().map_err(|_| KeyError::WrongSize(len))?;
    Ok(key)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn signature_is_32_bytes_and_stable() {
        let a = sign_confirmation(&TEST_KEY, b"payload");
        let b = sign_confirmation(&TEST_KEY, b"payload");
        assert_eq!(a.len(), 32);
        assert_eq!(a, b);
    }

    #[test]
    fn signature_depends_on_message_and_key() {
        let base = sign_confirmation(&TEST_KEY, b"payload");
        assert_ne!(base, sign_confirmation(&TEST_KEY, b"payloae"));
        let other_key = [0x5a; KEY_BYTES];
        assert_ne!(base, sign_confirmation(&other_key, b"payload"));
    }

    #[test]
    fn context_is_prefixed_not_appended() {
        // Signing m under the context must differ from signing
        // "confirmation token" || m with a raw HMAC over the reversed order.
        let mut mac = Hmac::<Sha256>::new_from_slice(&TEST_KEY).unwrap();
        mac.update(b"payload");
        mac.update(b"confirmation token");
        let reversed = mac.finalize().into_bytes().to_vec();
        assert_ne!(reversed, sign_confirmation(&TEST_KEY, b"payload"));
    }

    #[test]
    fn known_vector_matches_reference_hmac() {
        // Cross-check against a directly computed HMAC of the concatenation.
        let message = [0xa2u8, 0x60, 0x40];
        let mut concat = b"confirmation token".to_vec();
        concat.extend_from_slice(&message);
        let mut mac = Hmac::<Sha256>::new_from_slice(&TEST_KEY).unwrap();
        mac.update(&concat);
        let expected = mac.finalize().into_bytes().to_vec();
        assert_eq!(sign_confirmation(&TEST_KEY, &message), expected);
    }
}
