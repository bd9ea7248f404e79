//! Cryptographic primitives: random source, AEAD, KDF, HKDF expand, hash.
//!
//! These are pure functions over byte slices with no knowledge of the vault
//! format. Higher layers (`keys`, `envelope`, `entry_store`) compose them
//! according to the key hierarchy and domain-separation strings.

use blake2::Blake2b;
use blake2::Digest;
use blake2::digest::consts::U32;
use chacha20poly1305::aead::{Aead, KeyInit, Payload};
use chacha20poly1305::{XChaCha20Poly1305, XNonce};
use hkdf::Hkdf;
use rand::RngCore;
use rand::rngs::OsRng;
use secrecy::SecretSlice;
use sha2::Sha256;
use thiserror::Error;

/// 32-byte secret material, zeroized on drop.
pub type SecretBytes = SecretSlice<u8>;

pub const AEAD_KEY_LEN: usize = 32;
pub const XCHACHA_NONCE_LEN: usize = 24;
pub const HASH_LEN: usize = 32;

type Blake2b256 = Blake2b<U32>;

#[derive(Debug, Error)]
pub enum CryptoError {
    #[error("random source produced a short read")]
    ShortRead,

    #[error("invalid key length")]
    InvalidKeyLength,

    #[error("invalid nonce length")]
    InvalidNonceLength,

    #[error("argon2 error")]
    Argon2(#[from] argon2::Error),

    #[error("empty password")]
    EmptyPassword,

    #[error("salt too short")]
    SaltTooShort,

    #[error("hkdf: empty info")]
    EmptyInfo,

    #[error("hkdf: invalid output length")]
    InvalidOutputLength,

    #[error("hkdf expand failed")]
    Hkdf,

    #[error("aead operation failed")]
    Aead,
}

/// Fills `buf` with cryptographically secure random bytes.
///
/// `OsRng` never performs a short read in practice, but callers that wrap a
/// different `RNG` (spec.md C1) must still surface a short-read error rather
/// than returning partially-random bytes.
pub fn fill(buf: &mut [u8]) -> Result<(), CryptoError> {
    OsRng.fill_bytes(buf);
    Ok(())
}

pub fn random_bytes<const N: usize>() -> Result<[u8; N], CryptoError> {
    let mut out = [0u8; N];
    fill(&mut out)?;
    Ok(out)
}

/// Argon2id tuning parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Argon2Params {
    pub memory_kib: u32,
    pub iterations: u32,
    pub parallelism: u32,
    pub output_len: u32,
}

/// Derives `output_len` bytes from `password` via Argon2id.
///
/// Rejects an empty password or a salt shorter than 16 bytes. Callers
/// enforcing stronger floors (the master-key derivation in `keys`) validate
/// `params` themselves before calling this.
pub fn derive_argon2id(
    password: &[u8],
    salt: &[u8],
    params: Argon2Params,
) -> Result<SecretBytes, CryptoError> {
    if password.is_empty() {
        return Err(CryptoError::EmptyPassword);
    }
    if salt.len() < 16 {
        return Err(CryptoError::SaltTooShort);
    }

    let argon2_params = argon2::Params::new(
        params.memory_kib,
        params.iterations,
        params.parallelism,
        Some(params.output_len as usize),
    )?;
    let argon2 = argon2::Argon2::new(argon2::Algorithm::Argon2id, argon2::Version::V0x13, argon2_params);

    let mut out = vec![0u8; params.output_len as usize];
    argon2.hash_password_into(password, salt, &mut out)?;
    Ok(SecretBytes::from(out))
}

/// HKDF-Expand (SHA-256), no salt: `prk` is assumed to already be uniformly
/// random (Argon2id output).
pub fn hkdf_expand(prk: &[u8], info: &[u8], length: usize) -> Result<SecretBytes, CryptoError> {
    if info.is_empty() {
        return Err(CryptoError::EmptyInfo);
    }
    if length == 0 {
        return Err(CryptoError::InvalidOutputLength);
    }

    let hk = Hkdf::<Sha256>::new(None, prk);
    let mut out = vec![0u8; length];
    hk.expand(info, &mut out).map_err(|_| CryptoError::Hkdf)?;
    Ok(SecretBytes::from(out))
}

/// BLAKE2b-256, unkeyed, deterministic.
pub fn hash(data: &[u8]) -> [u8; HASH_LEN] {
    let mut hasher = Blake2b256::new();
    hasher.update(data);
    let digest = hasher.finalize();
    let mut out = [0u8; HASH_LEN];
    out.copy_from_slice(&digest);
    out
}

/// Constant-time equality, used for integrity-hash comparisons (spec.md
/// §4.6 metadata validation).
pub fn fixed_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    let mut diff = 0u8;
    for (x, y) in a.iter().zip(b.iter()) {
        diff |= x ^ y;
    }
    diff == 0
}

/// XChaCha20-Poly1305 encrypt. `plaintext || tag` on success.
pub fn aead_encrypt(
    key: &[u8],
    nonce: &[u8; XCHACHA_NONCE_LEN],
    plaintext: &[u8],
    aad: &[u8],
) -> Result<Vec<u8>, CryptoError> {
    if key.len() != AEAD_KEY_LEN {
        return Err(CryptoError::InvalidKeyLength);
    }
    let cipher = XChaCha20Poly1305::new_from_slice(key).map_err(|_| CryptoError::Aead)?;
    cipher
        .encrypt(XNonce::from_slice(nonce), Payload { msg: plaintext, aad })
        .map_err(|_| CryptoError::Aead)
}

/// XChaCha20-Poly1305 decrypt. Fails opaquely: AAD mismatch, tag failure,
/// and truncation are indistinguishable to the caller (spec.md C1).
pub fn aead_decrypt(
    key: &[u8],
    nonce: &[u8; XCHACHA_NONCE_LEN],
    ciphertext: &[u8],
    aad: &[u8],
) -> Result<Vec<u8>, CryptoError> {
    if key.len() != AEAD_KEY_LEN {
        return Err(CryptoError::InvalidKeyLength);
    }
    let cipher = XChaCha20Poly1305::new_from_slice(key).map_err(|_| CryptoError::Aead)?;
    cipher
        .decrypt(XNonce::from_slice(nonce), Payload { msg: ciphertext, aad })
        .map_err(|_| CryptoError::Aead)
}

pub fn nonce_from_slice(bytes: &[u8]) -> Result<[u8; XCHACHA_NONCE_LEN], CryptoError> {
    bytes.try_into().map_err(|_| CryptoError::InvalidNonceLength)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_params() -> Argon2Params {
        Argon2Params {
            memory_kib: 16 * 1024,
            iterations: 1,
            parallelism: 1,
            output_len: 32,
        }
    }

    #[test]
    fn aead_roundtrip() {
        let key = random_bytes::<32>().unwrap();
        let nonce = random_bytes::<XCHACHA_NONCE_LEN>().unwrap();
        let aad = b"some-aad";
        let plaintext = b"hello vault";

        let ct = aead_encrypt(&key, &nonce, plaintext, aad).unwrap();
        let pt = aead_decrypt(&key, &nonce, &ct, aad).unwrap();
        assert_eq!(pt, plaintext);
    }

    #[test]
    fn aead_fails_on_aad_mismatch() {
        let key = random_bytes::<32>().unwrap();
        let nonce = random_bytes::<XCHACHA_NONCE_LEN>().unwrap();

        let ct = aead_encrypt(&key, &nonce, b"msg", b"aad-a").unwrap();
        let err = aead_decrypt(&key, &nonce, &ct, b"aad-b").unwrap_err();
        assert!(matches!(err, CryptoError::Aead));
    }

    #[test]
    fn hash_is_deterministic_and_32_bytes() {
        let a = hash(b"abc");
        let b = hash(b"abc");
        assert_eq!(a, b);
        assert_eq!(a.len(), HASH_LEN);
    }

    #[test]
    fn hkdf_expand_differs_by_info() {
        let prk = random_bytes::<32>().unwrap();
        let a = hkdf_expand(&prk, b"info-a", 32).unwrap();
        let b = hkdf_expand(&prk, b"info-b", 32).unwrap();
        use secrecy::ExposeSecret;
        assert_ne!(a.expose_secret(), b.expose_secret());
    }

    #[test]
    fn hkdf_expand_rejects_empty_info() {
        let prk = random_bytes::<32>().unwrap();
        let err = hkdf_expand(&prk, b"", 32).unwrap_err();
        assert!(matches!(err, CryptoError::EmptyInfo));
    }

    #[test]
    fn argon2id_rejects_empty_password() {
        let err = derive_argon2id(b"", &[0u8; 16], test_params()).unwrap_err();
        assert!(matches!(err, CryptoError::EmptyPassword));
    }

    #[test]
    fn argon2id_rejects_short_salt() {
        let err = derive_argon2id(b"pw", &[0u8; 15], test_params()).unwrap_err();
        assert!(matches!(err, CryptoError::SaltTooShort));
    }

    #[test]
    fn fixed_time_eq_matches_naive_equality() {
        assert!(fixed_time_eq(b"abcd", b"abcd"));
        assert!(!fixed_time_eq(b"abcd", b"abce"));
        assert!(!fixed_time_eq(b"abc", b"abcd"));
    }
}
