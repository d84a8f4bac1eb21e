use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use rand::rngs::OsRng;
use rand::RngCore;
use sha2::{Digest, Sha256};

use super::AuthError;

pub const CHALLENGE_METHOD: &str = "S256";

/// PKCE code verifier and challenge pair, generated once per login attempt.
#[derive(Debug)]
pub struct PkcePair {
    verifier: String,
    challenge: String,
}

impl PkcePair {
    /// Create a new random verifier/challenge pair following RFC 7636 recommendations.
    ///
    /// Reads from the operating system's secure random source and fails rather
    /// than falling back to weaker randomness.
    pub fn generate() -> Result<Self, AuthError> {
        let verifier = generate_verifier()?;
        let challenge = challenge_for(&verifier);
        Ok(Self {
            verifier,
            challenge,
        })
    }

    pub fn verifier(&self) -> &str {
        &self.verifier
    }

    pub fn challenge(&self) -> &str {
        &self.challenge
    }
}

fn generate_verifier() -> Result<String, AuthError> {
    const BYTE_LEN: usize = 32;
    let mut bytes = [0u8; BYTE_LEN];
    OsRng.try_fill_bytes(&mut bytes)?;
    Ok(URL_SAFE_NO_PAD.encode(bytes))
}

/// The S256 transform: base64url (no padding) of the SHA-256 digest.
pub fn challenge_for(verifier: &str) -> String {
    let digest = Sha256::digest(verifier.as_bytes());
    URL_SAFE_NO_PAD.encode(digest)
}
