//! Session token and CSRF MAC primitives.
//!
//! The CSRF cookie is `make_token(session_token ‖ session_secret)`, so
//! possession of the session token alone cannot forge a valid CSRF value.

use hmac::{Hmac, Mac};
use rand::RngCore;
use rand::rngs::OsRng;
use sha2::Sha256;

type HmacSha256 = Hmac<Sha256>;

/// Returns a hex-encoded random string of length `2n`, drawn from the
/// operating system RNG. RNG failure propagates to the caller.
pub fn generate_token(n: usize) -> Result<String, rand::Error> {
    let mut buf = vec![0u8; n];
    OsRng.try_fill_bytes(&mut buf)?;
    Ok(hex::encode(buf))
}

/// Lowercase-hex HMAC-SHA256 of `msg` under `secret`.
pub fn make_token(msg: &str, secret: &str) -> String {
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
        .expect("HMAC-SHA256 accepts keys of any length");
    mac.update(msg.as_bytes());
    hex::encode(mac.finalize().into_bytes())
}

/// Compares an observed mac against `make_token(plain, secret)` in constant
/// time. Non-hex input is rejected outright.
pub fn check_mac(plain: &str, mac_hex: &str, secret: &str) -> bool {
    let Ok(observed) = hex::decode(mac_hex) else {
        return false;
    };

    let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
        .expect("HMAC-SHA256 accepts keys of any length");
    mac.update(plain.as_bytes());
    mac.verify_slice(&observed).is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generate_token_is_hex_of_double_length() {
        let token = generate_token(128).expect("os rng");
        assert_eq!(token.len(), 256);
        assert!(token.chars().all(|c| c.is_ascii_hexdigit()));

        let other = generate_token(128).expect("os rng");
        assert_ne!(token, other);
    }

    #[test]
    fn make_token_round_trips_through_check_mac() {
        let mac = make_token("session-token-value", "secret-key");
        assert!(check_mac("session-token-value", &mac, "secret-key"));
    }

    #[test]
    fn check_mac_rejects_tampering() {
        let mac = make_token("session-token-value", "secret-key");

        assert!(!check_mac("other-token", &mac, "secret-key"));
        assert!(!check_mac("session-token-value", &mac, "other-secret"));

        let mut flipped = mac.clone().into_bytes();
        flipped[0] = if flipped[0] == b'a' { b'b' } else { b'a' };
        let flipped = String::from_utf8(flipped).unwrap();
        assert!(!check_mac("session-token-value", &flipped, "secret-key"));
    }

    #[test]
    fn check_mac_rejects_non_hex_input() {
        assert!(!check_mac("token", "not hex at all!", "secret-key"));
        assert!(!check_mac("token", "", "secret-key"));
    }
}
