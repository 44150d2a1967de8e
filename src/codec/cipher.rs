//! AES-CBC payload obfuscation.
//!
//! When a shared key is configured the serialized envelope is encrypted
//! before it is written, and request bodies are decrypted before decoding.
//!
//! ```text
//! plaintext ──PKCS#7──▶ AES-CBC(key, iv) ──▶ iv ‖ ciphertext ──▶ HEX (upper) | base64
//! ```
//!
//! The key is the configured string with dashes and surrounding blanks
//! removed, cut down to the largest AES key size that fits (32, 24 or 16).

use aes::cipher::block_padding::Pkcs7;
use aes::cipher::{BlockDecryptMut, BlockEncryptMut, KeyIvInit};
use base64::Engine;
use rand::RngCore;

use crate::error::{EngineError, Result};

/// AES block size, also the IV length.
pub const IV_SIZE: usize = 16;

/// Minimum configured key length that enables obfuscation.
pub const MIN_KEY_LEN: usize = 16;

/// Text encoding of the ciphertext.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CipherEncoding {
    /// Upper-case hexadecimal.
    #[default]
    Hex,
    /// Standard base64 with padding.
    Base64,
}

/// Symmetric cipher for request and response bodies.
#[derive(Clone)]
pub struct PayloadCipher {
    key: Vec<u8>,
    encoding: CipherEncoding,
}

impl std::fmt::Debug for PayloadCipher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PayloadCipher")
            .field("key_bits", &(self.key.len() * 8))
            .field("encoding", &self.encoding)
            .finish()
    }
}

impl PayloadCipher {
    /// Build a cipher from a shared key string.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::InvalidKey`] when the configured key is shorter
    /// than [`MIN_KEY_LEN`]. Dashes and surrounding spaces are stripped only
    /// after that check; key material left shorter than 16 bytes is
    /// zero-padded.
    pub fn new(key: &str, encoding: CipherEncoding) -> Result<Self> {
        if key.len() < MIN_KEY_LEN {
            return Err(EngineError::InvalidKey(key.len()));
        }
        let trimmed = key.replace('-', "");
        let mut material = trimmed.trim().as_bytes().to_vec();
        let size = match material.len() {
            n if n >= 32 => 32,
            n if n >= 24 => 24,
            _ => 16,
        };
        material.resize(size, 0);
        Ok(Self {
            key: material,
            encoding,
        })
    }

    /// Build a cipher only when the key is long enough to enable obfuscation.
    pub fn from_option(key: Option<&str>, encoding: CipherEncoding) -> Option<Self> {
        key.and_then(|k| Self::new(k, encoding).ok())
    }

    pub fn encoding(&self) -> CipherEncoding {
        self.encoding
    }

    /// Encrypt and encode `plaintext`.
    pub fn seal(&self, plaintext: &[u8]) -> Result<Vec<u8>> {
        let mut iv = [0u8; IV_SIZE];
        rand::thread_rng().fill_bytes(&mut iv);

        let ciphertext = match self.key.len() {
            32 => encrypt::<aes::Aes256>(&self.key, &iv, plaintext)?,
            24 => encrypt::<aes::Aes192>(&self.key, &iv, plaintext)?,
            _ => encrypt::<aes::Aes128>(&self.key, &iv, plaintext)?,
        };

        let mut raw = Vec::with_capacity(IV_SIZE + ciphertext.len());
        raw.extend_from_slice(&iv);
        raw.extend_from_slice(&ciphertext);

        Ok(match self.encoding {
            CipherEncoding::Hex => hex::encode_upper(raw).into_bytes(),
            CipherEncoding::Base64 => base64::engine::general_purpose::STANDARD
                .encode(raw)
                .into_bytes(),
        })
    }

    /// Decode and decrypt a sealed body.
    pub fn open(&self, sealed: &[u8]) -> Result<Vec<u8>> {
        let text = std::str::from_utf8(sealed)
            .map_err(|e| EngineError::Cipher(e.to_string()))?
            .trim();
        let raw = match self.encoding {
            CipherEncoding::Hex => hex::decode(text).map_err(|e| EngineError::Cipher(e.to_string()))?,
            CipherEncoding::Base64 => base64::engine::general_purpose::STANDARD
                .decode(text)
                .map_err(|e| EngineError::Cipher(e.to_string()))?,
        };
        if raw.len() < 2 * IV_SIZE || raw.len() % IV_SIZE != 0 {
            return Err(EngineError::Cipher(format!(
                "ciphertext length {} is not a whole number of blocks",
                raw.len()
            )));
        }
        let (iv, ciphertext) = raw.split_at(IV_SIZE);

        match self.key.len() {
            32 => decrypt::<aes::Aes256>(&self.key, iv, ciphertext),
            24 => decrypt::<aes::Aes192>(&self.key, iv, ciphertext),
            _ => decrypt::<aes::Aes128>(&self.key, iv, ciphertext),
        }
    }
}

fn encrypt<C>(key: &[u8], iv: &[u8], plaintext: &[u8]) -> Result<Vec<u8>>
where
    cbc::Encryptor<C>: KeyIvInit + BlockEncryptMut,
    C: aes::cipher::BlockCipher + aes::cipher::BlockEncryptMut,
{
    let encryptor = cbc::Encryptor::<C>::new_from_slices(key, iv)
        .map_err(|e| EngineError::Cipher(e.to_string()))?;
    Ok(encryptor.encrypt_padded_vec_mut::<Pkcs7>(plaintext))
}

fn decrypt<C>(key: &[u8], iv: &[u8], ciphertext: &[u8]) -> Result<Vec<u8>>
where
    cbc::Decryptor<C>: KeyIvInit + BlockDecryptMut,
    C: aes::cipher::BlockCipher + aes::cipher::BlockDecryptMut,
{
    let decryptor = cbc::Decryptor::<C>::new_from_slices(key, iv)
        .map_err(|e| EngineError::Cipher(e.to_string()))?;
    decryptor
        .decrypt_padded_vec_mut::<Pkcs7>(ciphertext)
        .map_err(|e| EngineError::Cipher(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    const KEY: &str = "3f756b58-1656-11ec-879b-3c7d0a0ab31b";

    #[test]
    fn test_short_key_is_rejected() {
        let err = PayloadCipher::new("too-short", CipherEncoding::Hex).unwrap_err();
        assert!(matches!(err, EngineError::InvalidKey(9)));
        assert!(PayloadCipher::from_option(Some("short"), CipherEncoding::Hex).is_none());
        assert!(PayloadCipher::from_option(None, CipherEncoding::Hex).is_none());
    }

    #[test]
    fn test_length_gate_counts_dashes() {
        // Sixteen characters as configured, fifteen once the dash is stripped.
        let cipher = PayloadCipher::new("0123456789abcde-", CipherEncoding::Hex).unwrap();
        assert_eq!(cipher.key.len(), 16);
        assert_eq!(&cipher.key[..15], b"0123456789abcde");
        assert_eq!(cipher.key[15], 0);

        let sealed = cipher.seal(b"[1,2,3]").unwrap();
        assert_eq!(cipher.open(&sealed).unwrap(), b"[1,2,3]");

        let padded = PayloadCipher::new("  0123-4567-89ab ", CipherEncoding::Hex).unwrap();
        assert_eq!(&padded.key[..12], b"0123456789ab");
    }

    #[test]
    fn test_key_size_selection() {
        assert_eq!(PayloadCipher::new("0123456789abcdef", CipherEncoding::Hex).unwrap().key.len(), 16);
        assert_eq!(PayloadCipher::new(&"k".repeat(30), CipherEncoding::Hex).unwrap().key.len(), 24);
        assert_eq!(PayloadCipher::new(KEY, CipherEncoding::Hex).unwrap().key.len(), 32);
    }

    #[test]
    fn test_hex_seal_is_upper_case_and_opens() {
        let cipher = PayloadCipher::new(KEY, CipherEncoding::Hex).unwrap();
        let sealed = cipher.seal(br#"{"id":1,"result":true}"#).unwrap();
        let text = std::str::from_utf8(&sealed).unwrap();
        assert!(text.chars().all(|c| c.is_ascii_digit() || c.is_ascii_uppercase()));

        let opened = cipher.open(&sealed).unwrap();
        assert_eq!(opened, br#"{"id":1,"result":true}"#);

        // Lower-case input is accepted as well.
        let lower = text.to_ascii_lowercase();
        assert_eq!(cipher.open(lower.as_bytes()).unwrap(), opened);
    }

    #[test]
    fn test_base64_seal_opens() {
        let cipher = PayloadCipher::new("0123456789abcdef", CipherEncoding::Base64).unwrap();
        let sealed = cipher.seal(b"payload").unwrap();
        assert_eq!(cipher.open(&sealed).unwrap(), b"payload");
    }

    #[test]
    fn test_fresh_iv_per_seal() {
        let cipher = PayloadCipher::new(KEY, CipherEncoding::Hex).unwrap();
        assert_ne!(cipher.seal(b"same").unwrap(), cipher.seal(b"same").unwrap());
    }

    #[test]
    fn test_open_rejects_garbage() {
        let cipher = PayloadCipher::new(KEY, CipherEncoding::Hex).unwrap();
        assert!(cipher.open(b"{\"id\":1}").is_err());
        assert!(cipher.open(b"ABCD").is_err());

        let other = PayloadCipher::new("fedcba9876543210", CipherEncoding::Hex).unwrap();
        let sealed = other.seal(b"secret").unwrap();
        // Wrong key almost always breaks the padding; never yields the plaintext.
        if let Ok(opened) = cipher.open(&sealed) {
            assert_ne!(opened, b"secret");
        }
    }
}
