//! String protection primitives shared by the encryption pass and the runtime.
//!
//! Each protected string is sealed with AES-256-CBC and authenticated with an
//! HMAC-SHA256 tag over `salt ‖ iv ‖ ciphertext` (encrypt-then-MAC). Per-string
//! encryption and MAC keys come from HKDF-SHA256 over the artifact's master
//! secret and the record's salt, so a fixed seed reproduces identical
//! ciphertext while a different seed changes every key.

use aes::Aes256;
use cbc::cipher::{block_padding::Pkcs7, BlockDecryptMut, BlockEncryptMut, KeyIvInit};
use hmac::{Hmac, Mac};
use sha2::{Digest, Sha256};
use thiserror::Error;

use crate::ir::EncryptionRecord;

type Aes256CbcEnc = cbc::Encryptor<Aes256>;
type Aes256CbcDec = cbc::Decryptor<Aes256>;
type HmacSha256 = Hmac<Sha256>;

const BLOCK_SIZE: usize = 16;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CryptoError {
    #[error("invalid key length")]
    KeyLength,
    #[error("authentication tag mismatch")]
    Authentication,
    #[error("bad padding in ciphertext")]
    Padding,
    #[error("decrypted bytes are not valid UTF-8")]
    Utf8,
}

pub fn sha256(parts: &[&[u8]]) -> [u8; 32] {
    let mut hasher = Sha256::new();
    for part in parts {
        hasher.update(part);
    }
    hasher.finalize().into()
}

/// Per-artifact master secret: a pure function of the build genome and the
/// file being protected.
pub fn derive_master_secret(genome: u64, file_id: &str) -> [u8; 32] {
    sha256(&[b"hos.master", &genome.to_le_bytes(), file_id.as_bytes()])
}

fn hmac_sha256(key: &[u8], data: &[&[u8]]) -> Result<[u8; 32], CryptoError> {
    let mut mac = <HmacSha256 as Mac>::new_from_slice(key).map_err(|_| CryptoError::KeyLength)?;
    for d in data {
        mac.update(d);
    }
    Ok(mac.finalize().into_bytes().into())
}

/// HKDF-SHA256 (RFC 5869) producing `N` bytes, `N <= 255 * 32`.
pub fn hkdf_sha256<const N: usize>(ikm: &[u8], salt: &[u8], info: &[u8]) -> Result<[u8; N], CryptoError> {
    let zero_salt = [0u8; 32];
    let salt = if salt.is_empty() { &zero_salt[..] } else { salt };
    let prk = hmac_sha256(salt, &[ikm])?;

    let mut okm = [0u8; N];
    let mut previous: Vec<u8> = Vec::new();
    for (i, chunk) in okm.chunks_mut(32).enumerate() {
        let counter = [(i + 1) as u8];
        let t = hmac_sha256(&prk, &[&previous, info, &counter])?;
        chunk.copy_from_slice(&t[..chunk.len()]);
        previous = t.to_vec();
    }
    Ok(okm)
}

struct StringKeys {
    enc: [u8; 32],
    mac: [u8; 32],
}

fn derive_keys(master: &[u8; 32], salt: &[u8; 16]) -> Result<StringKeys, CryptoError> {
    let okm: [u8; 64] = hkdf_sha256(master, salt, b"hos.string.v1")?;
    let mut enc = [0u8; 32];
    let mut mac = [0u8; 32];
    enc.copy_from_slice(&okm[..32]);
    mac.copy_from_slice(&okm[32..]);
    Ok(StringKeys { enc, mac })
}

/// Encrypt `plaintext`. `salt` and `iv` come from the caller's seeded
/// generator so the result is reproducible.
pub fn seal(
    master: &[u8; 32],
    salt: [u8; 16],
    iv: [u8; 16],
    plaintext: &str,
) -> Result<EncryptionRecord, CryptoError> {
    let keys = derive_keys(master, &salt)?;
    let cipher = Aes256CbcEnc::new_from_slices(&keys.enc, &iv).map_err(|_| CryptoError::KeyLength)?;
    let data = plaintext.as_bytes();
    let padded_len = (data.len() / BLOCK_SIZE + 1) * BLOCK_SIZE;
    let mut buf = vec![0u8; padded_len];
    buf[..data.len()].copy_from_slice(data);
    let ciphertext = cipher
        .encrypt_padded_mut::<Pkcs7>(&mut buf, data.len())
        .map_err(|_| CryptoError::Padding)?
        .to_vec();
    let tag = hmac_sha256(&keys.mac, &[&salt, &iv, &ciphertext])?;
    Ok(EncryptionRecord {
        ciphertext,
        iv,
        salt,
        tag,
    })
}

/// Verify and decrypt a record. Fails closed on any tampering.
pub fn open(master: &[u8; 32], record: &EncryptionRecord) -> Result<String, CryptoError> {
    let keys = derive_keys(master, &record.salt)?;
    let mut mac = <HmacSha256 as Mac>::new_from_slice(&keys.mac).map_err(|_| CryptoError::KeyLength)?;
    mac.update(&record.salt);
    mac.update(&record.iv);
    mac.update(&record.ciphertext);
    mac.verify_slice(&record.tag)
        .map_err(|_| CryptoError::Authentication)?;

    if record.ciphertext.is_empty() || record.ciphertext.len() % BLOCK_SIZE != 0 {
        return Err(CryptoError::Padding);
    }
    let cipher =
        Aes256CbcDec::new_from_slices(&keys.enc, &record.iv).map_err(|_| CryptoError::KeyLength)?;
    let mut buf = record.ciphertext.clone();
    let plain = cipher
        .decrypt_padded_mut::<Pkcs7>(&mut buf)
        .map_err(|_| CryptoError::Padding)?;
    String::from_utf8(plain.to_vec()).map_err(|_| CryptoError::Utf8)
}
