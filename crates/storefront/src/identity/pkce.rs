//! PKCE verifier and S256 challenge.

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use rand::Rng;
use sha2::{Digest, Sha256};

const VERIFIER_CHARSET: &[u8] =
    b"ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz0123456789-._~";
const STATE_CHARSET: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz0123456789";

fn random_string(charset: &[u8], length: usize) -> String {
    let mut rng = rand::rng();
    (0..length)
        .map(|_| {
            let idx = rng.random_range(0..charset.len());
            charset.get(idx).copied().map_or('A', char::from)
        })
        .collect()
}

/// Random alphanumeric value for the OAuth `state` parameter.
#[must_use]
pub fn random_state(length: usize) -> String {
    random_string(STATE_CHARSET, length)
}

/// A code verifier and its S256 challenge.
#[derive(Debug, Clone)]
pub struct Pkce {
    pub verifier: String,
    pub challenge: String,
}

impl Pkce {
    /// Generate a fresh 64-character verifier.
    #[must_use]
    pub fn generate() -> Self {
        Self::from_verifier(random_string(VERIFIER_CHARSET, 64))
    }

    #[must_use]
    pub fn from_verifier(verifier: String) -> Self {
        let challenge = URL_SAFE_NO_PAD.encode(Sha256::digest(verifier.as_bytes()));
        Self {
            verifier,
            challenge,
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_rfc7636_vector() {
        let pkce = Pkce::from_verifier("dBjftJeZ4CVP-mB92K27uhbUJU1p1r_wW1gFWFOEjXk".to_owned());
        assert_eq!(pkce.challenge, "E9Melhoa2OwvFrEMTJguCHaoeK1t8URWbuGJSstw-cM");
    }

    #[test]
    fn test_generated_verifier() {
        let pkce = Pkce::generate();
        assert_eq!(pkce.verifier.len(), 64);
        assert!(
            pkce.verifier
                .bytes()
                .all(|b| VERIFIER_CHARSET.contains(&b))
        );
    }

    #[test]
    fn test_state_is_alphanumeric() {
        let state = random_state(32);
        assert_eq!(state.len(), 32);
        assert!(state.chars().all(|c| c.is_ascii_alphanumeric()));
    }
}
