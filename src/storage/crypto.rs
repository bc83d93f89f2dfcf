//! AES-256-GCM sealing for values at rest.
//!
//! Every call to [`seal`] draws a fresh random 96-bit nonce from the system CSPRNG.
//! The associated data binds a ciphertext to the slot it was written to, so a value
//! copied under another key fails to open.

use ring::aead::{AES_256_GCM, Aad, LessSafeKey, NONCE_LEN, Nonce, UnboundKey};
use ring::rand::{SecureRandom, SystemRandom};
use zeroize::Zeroizing;

use super::StorageError;

pub const KEY_LEN: usize = 32;

/// A 256-bit key that is wiped from memory on drop
pub type EncryptionKey = Zeroizing<[u8; KEY_LEN]>;

fn sealing_key(key: &EncryptionKey) -> Result<LessSafeKey, StorageError> {
    let unbound = UnboundKey::new(&AES_256_GCM, &key[..])
        .map_err(|_| StorageError::Crypto("failed to create AES-256-GCM key".to_string()))?;
    Ok(LessSafeKey::new(unbound))
}

/// Encrypt `plaintext`, returning `(ciphertext_with_tag, nonce)`
#[inline]
pub fn seal(
    key: &EncryptionKey,
    aad: &[u8],
    plaintext: &[u8],
) -> Result<(Vec<u8>, [u8; NONCE_LEN]), StorageError> {
    let sealing = sealing_key(key)?;

    let mut nonce_bytes = [0u8; NONCE_LEN];
    SystemRandom::new()
        .fill(&mut nonce_bytes)
        .map_err(|_| StorageError::Crypto("failed to generate random nonce".to_string()))?;

    let mut in_out = plaintext.to_vec();
    sealing
        .seal_in_place_append_tag(
            Nonce::assume_unique_for_key(nonce_bytes),
            Aad::from(aad),
            &mut in_out,
        )
        .map_err(|_| StorageError::Crypto("AES-256-GCM encryption failed".to_string()))?;

    Ok((in_out, nonce_bytes))
}

/// Decrypt a value produced by [`seal`] with the same key and associated data
#[inline]
pub fn open(
    key: &EncryptionKey,
    aad: &[u8],
    nonce: &[u8],
    ciphertext: &[u8],
) -> Result<Vec<u8>, StorageError> {
    let sealing = sealing_key(key)?;
    let nonce = Nonce::try_assume_unique_for_key(nonce)
        .map_err(|_| StorageError::Crypto("stored nonce has the wrong length".to_string()))?;

    let mut in_out = ciphertext.to_vec();
    let plaintext = sealing
        .open_in_place(nonce, Aad::from(aad), &mut in_out)
        .map_err(|_| {
            StorageError::Crypto(
                "AES-256-GCM decryption failed: wrong key or corrupted data".to_string(),
            )
        })?;

    Ok(plaintext.to_vec())
}

/// Generate a random key suitable for AES-256-GCM
#[inline]
pub fn generate_key() -> Result<EncryptionKey, StorageError> {
    let mut key = Zeroizing::new([0u8; KEY_LEN]);
    SystemRandom::new()
        .fill(&mut key[..])
        .map_err(|_| StorageError::Crypto("failed to generate random key".to_string()))?;
    Ok(key)
}
