//! Credential boundary
//!
//! Stored credentials are opaque strings. A [`CredentialCipher`] turns them
//! into usable keys and back; the dispatcher never sees plaintext outside of
//! the adapter that holds it.

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use secrecy::SecretString;

use crate::error::LlmError;

/// Characters revealed at each end by [`mask_secret`].
const MASK_VISIBLE: usize = 4;
/// Fixed-length placeholder between the revealed ends.
const MASK_PLACEHOLDER: &str = "********";

/// Encrypt/decrypt/mask boundary for credentials at rest.
pub trait CredentialCipher: Send + Sync {
    fn encrypt(&self, plaintext: &str) -> Result<String, LlmError>;

    /// Decrypt an opaque credential. Must fail with
    /// [`LlmError::CredentialError`] rather than yield an empty key.
    fn decrypt(&self, opaque: &str) -> Result<SecretString, LlmError>;

    fn mask(&self, value: &str) -> String {
        mask_secret(value)
    }
}

/// Mask a secret for display.
///
/// Short values (where prefix and suffix would overlap) are fully hidden.
pub fn mask_secret(value: &str) -> String {
    let chars: Vec<char> = value.chars().collect();
    if chars.len() <= MASK_VISIBLE * 2 {
        return MASK_PLACEHOLDER.to_string();
    }
    let prefix: String = chars[..MASK_VISIBLE].iter().collect();
    let suffix: String = chars[chars.len() - MASK_VISIBLE..].iter().collect();
    format!("{prefix}{MASK_PLACEHOLDER}{suffix}")
}

/// Base64 codec.
///
/// Encoding only, not encryption: for tests and local setups where the store
/// is already protected.
#[derive(Debug, Clone, Copy, Default)]
pub struct Base64Cipher;

impl CredentialCipher for Base64Cipher {
    fn encrypt(&self, plaintext: &str) -> Result<String, LlmError> {
        Ok(STANDARD.encode(plaintext.as_bytes()))
    }

    fn decrypt(&self, opaque: &str) -> Result<SecretString, LlmError> {
        let bytes = STANDARD
            .decode(opaque.trim())
            .map_err(|e| LlmError::CredentialError(format!("invalid credential encoding: {e}")))?;
        let plain = String::from_utf8(bytes)
            .map_err(|_| LlmError::CredentialError("credential is not valid UTF-8".into()))?;
        non_empty(plain)
    }
}

/// Pass-through cipher for stores that keep keys in plaintext.
#[derive(Debug, Clone, Copy, Default)]
pub struct PlaintextCipher;

impl CredentialCipher for PlaintextCipher {
    fn encrypt(&self, plaintext: &str) -> Result<String, LlmError> {
        Ok(plaintext.to_string())
    }

    fn decrypt(&self, opaque: &str) -> Result<SecretString, LlmError> {
        non_empty(opaque.to_string())
    }
}

fn non_empty(plain: String) -> Result<SecretString, LlmError> {
    if plain.trim().is_empty() {
        return Err(LlmError::CredentialError(
            "credential decrypted to an empty value".into(),
        ));
    }
    Ok(SecretString::from(plain))
}
