//! User Security Model: key localization, authentication, privacy.
//!
//! Key localization follows RFC 3414 §A.2 (MD5/SHA-1) and RFC 7860
//! (SHA-2 family): hash the password repeated to one megabyte, then
//! localize against the authoritative engine id. Privacy keys reuse the
//! auth key-derivation with the privacy password; AES-256 extends the
//! localized key by hash chaining.

use hmac::{Hmac, Mac};
use md5::Md5;
use sha1::Sha1;
use sha2::{Digest, Sha224, Sha256, Sha384, Sha512};

use crate::SnmpError;

/// SNMPv3 security level. Production configurations require `AuthPriv`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SecurityLevel {
    NoAuthNoPriv,
    AuthNoPriv,
    AuthPriv,
}

impl SecurityLevel {
    /// msgFlags bits (authFlag, privFlag), without the reportable bit.
    pub fn flags(&self) -> u8 {
        match self {
            SecurityLevel::NoAuthNoPriv => 0x00,
            SecurityLevel::AuthNoPriv => 0x01,
            SecurityLevel::AuthPriv => 0x03,
        }
    }
}

/// Supported authentication HMACs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthProtocol {
    Md5,
    Sha1,
    Sha224,
    Sha256,
    Sha384,
    Sha512,
}

impl AuthProtocol {
    /// Truncated HMAC length carried in msgAuthenticationParameters
    /// (RFC 3414 §6/§7, RFC 7860 §4.1).
    pub fn auth_param_len(&self) -> usize {
        match self {
            AuthProtocol::Md5 | AuthProtocol::Sha1 => 12,
            AuthProtocol::Sha224 => 16,
            AuthProtocol::Sha256 => 24,
            AuthProtocol::Sha384 => 32,
            AuthProtocol::Sha512 => 48,
        }
    }

    fn digest_len(&self) -> usize {
        match self {
            AuthProtocol::Md5 => 16,
            AuthProtocol::Sha1 => 20,
            AuthProtocol::Sha224 => 28,
            AuthProtocol::Sha256 => 32,
            AuthProtocol::Sha384 => 48,
            AuthProtocol::Sha512 => 64,
        }
    }
}

/// Supported privacy ciphers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PrivProtocol {
    Des,
    Aes128,
    Aes256,
}

impl PrivProtocol {
    fn key_len(&self) -> usize {
        match self {
            PrivProtocol::Des => 16, // 8 key octets + 8 pre-IV octets
            PrivProtocol::Aes128 => 16,
            PrivProtocol::Aes256 => 32,
        }
    }
}

fn hash_repeated<D: Digest>(password: &[u8]) -> Vec<u8> {
    // RFC 3414 §A.2: feed the password circularly until 1MB has been
    // hashed.
    const TOTAL: usize = 1_048_576;
    let mut hasher = D::new();
    let mut fed = 0usize;
    let mut buf = [0u8; 64];
    let mut idx = 0usize;
    while fed < TOTAL {
        for slot in buf.iter_mut() {
            *slot = password[idx % password.len()];
            idx += 1;
        }
        hasher.update(buf);
        fed += buf.len();
    }
    hasher.finalize().to_vec()
}

fn localize<D: Digest>(ku: &[u8], engine_id: &[u8]) -> Vec<u8> {
    let mut hasher = D::new();
    hasher.update(ku);
    hasher.update(engine_id);
    hasher.update(ku);
    hasher.finalize().to_vec()
}

/// Derive the localized key for `password` against `engine_id`.
///
/// Passwords shorter than the USM minimum of 8 characters are rejected
/// up front; localization of an empty password would loop forever.
pub fn localized_key(
    protocol: AuthProtocol,
    password: &str,
    engine_id: &[u8],
) -> Result<Vec<u8>, SnmpError> {
    if password.len() < 8 {
        return Err(SnmpError::Config(
            "SNMPv3 keys must be at least 8 characters".to_string(),
        ));
    }
    let pw = password.as_bytes();
    let key = match protocol {
        AuthProtocol::Md5 => localize::<Md5>(&hash_repeated::<Md5>(pw), engine_id),
        AuthProtocol::Sha1 => localize::<Sha1>(&hash_repeated::<Sha1>(pw), engine_id),
        AuthProtocol::Sha224 => localize::<Sha224>(&hash_repeated::<Sha224>(pw), engine_id),
        AuthProtocol::Sha256 => localize::<Sha256>(&hash_repeated::<Sha256>(pw), engine_id),
        AuthProtocol::Sha384 => localize::<Sha384>(&hash_repeated::<Sha384>(pw), engine_id),
        AuthProtocol::Sha512 => localize::<Sha512>(&hash_repeated::<Sha512>(pw), engine_id),
    };
    Ok(key)
}

/// Derive a localized privacy key of the length `privacy` needs, using
/// `auth` as the key-derivation hash.
pub fn localized_priv_key(
    auth: AuthProtocol,
    privacy: PrivProtocol,
    password: &str,
    engine_id: &[u8],
) -> Result<Vec<u8>, SnmpError> {
    let mut key = localized_key(auth, password, engine_id)?;
    // Blumenthal key expansion for ciphers needing more key material
    // than the hash produces.
    while key.len() < privacy.key_len() {
        let ext = match auth {
            AuthProtocol::Md5 => Md5::digest(&key).to_vec(),
            AuthProtocol::Sha1 => Sha1::digest(&key).to_vec(),
            AuthProtocol::Sha224 => Sha224::digest(&key).to_vec(),
            AuthProtocol::Sha256 => Sha256::digest(&key).to_vec(),
            AuthProtocol::Sha384 => Sha384::digest(&key).to_vec(),
            AuthProtocol::Sha512 => Sha512::digest(&key).to_vec(),
        };
        key.extend_from_slice(&ext);
    }
    key.truncate(privacy.key_len());
    Ok(key)
}

fn hmac_digest(
    protocol: AuthProtocol,
    key: &[u8],
    message: &[u8],
) -> Result<Vec<u8>, SnmpError> {
    macro_rules! mac {
        ($alg:ty) => {{
            let mut mac = <Hmac<$alg>>::new_from_slice(key)
                .map_err(|e| SnmpError::Authentication(e.to_string()))?;
            mac.update(message);
            mac.finalize().into_bytes().to_vec()
        }};
    }
    let digest = match protocol {
        AuthProtocol::Md5 => mac!(Md5),
        AuthProtocol::Sha1 => mac!(Sha1),
        AuthProtocol::Sha224 => mac!(Sha224),
        AuthProtocol::Sha256 => mac!(Sha256),
        AuthProtocol::Sha384 => mac!(Sha384),
        AuthProtocol::Sha512 => mac!(Sha512),
    };
    debug_assert_eq!(digest.len(), protocol.digest_len());
    Ok(digest)
}

/// Compute the truncated msgAuthenticationParameters for `message`
/// (which must contain the zero-filled placeholder at this point).
pub fn auth_params(
    protocol: AuthProtocol,
    key: &[u8],
    message: &[u8],
) -> Result<Vec<u8>, SnmpError> {
    let mut digest = hmac_digest(protocol, key, message)?;
    digest.truncate(protocol.auth_param_len());
    Ok(digest)
}

/// Constant-position verification of a received HMAC.
pub fn verify_auth(
    protocol: AuthProtocol,
    key: &[u8],
    message_with_zeroed_params: &[u8],
    received: &[u8],
) -> Result<(), SnmpError> {
    let expected = auth_params(protocol, key, message_with_zeroed_params)?;
    if expected.len() != received.len() {
        return Err(SnmpError::Authentication(
            "authentication parameter length mismatch".to_string(),
        ));
    }
    let mut diff = 0u8;
    for (a, b) in expected.iter().zip(received) {
        diff |= a ^ b;
    }
    if diff != 0 {
        return Err(SnmpError::Authentication("HMAC mismatch".to_string()));
    }
    Ok(())
}

/// Encrypt a scoped PDU, returning (ciphertext, msgPrivacyParameters).
pub fn encrypt(
    protocol: PrivProtocol,
    priv_key: &[u8],
    engine_boots: u32,
    engine_time: u32,
    salt: u64,
    plaintext: &[u8],
) -> Result<(Vec<u8>, Vec<u8>), SnmpError> {
    match protocol {
        PrivProtocol::Des => des_encrypt(priv_key, engine_boots, salt, plaintext),
        PrivProtocol::Aes128 | PrivProtocol::Aes256 => {
            aes_cfb(protocol, priv_key, engine_boots, engine_time, salt, plaintext, true)
        }
    }
}

/// Decrypt a scoped PDU.
pub fn decrypt(
    protocol: PrivProtocol,
    priv_key: &[u8],
    engine_boots: u32,
    engine_time: u32,
    priv_params: &[u8],
    ciphertext: &[u8],
) -> Result<Vec<u8>, SnmpError> {
    match protocol {
        PrivProtocol::Des => des_decrypt(priv_key, priv_params, ciphertext),
        PrivProtocol::Aes128 | PrivProtocol::Aes256 => {
            if priv_params.len() != 8 {
                return Err(SnmpError::Privacy("AES salt must be 8 octets".to_string()));
            }
            let salt = u64::from_be_bytes(priv_params.try_into().unwrap_or([0; 8]));
            let (out, _) = aes_cfb(
                protocol,
                priv_key,
                engine_boots,
                engine_time,
                salt,
                ciphertext,
                false,
            )?;
            Ok(out)
        }
    }
}

/// DES-CBC per RFC 3414 §8.1.1.1: key = first 8 octets, pre-IV = last 8;
/// salt = engineBoots || counter; IV = salt XOR pre-IV.
fn des_encrypt(
    priv_key: &[u8],
    engine_boots: u32,
    salt: u64,
    plaintext: &[u8],
) -> Result<(Vec<u8>, Vec<u8>), SnmpError> {
    use cipher::{BlockEncryptMut, KeyIvInit};
    type DesCbcEnc = cbc::Encryptor<des::Des>;

    if priv_key.len() < 16 {
        return Err(SnmpError::Privacy("DES key too short".to_string()));
    }
    let mut salt_bytes = [0u8; 8];
    salt_bytes[..4].copy_from_slice(&engine_boots.to_be_bytes());
    salt_bytes[4..].copy_from_slice(&(salt as u32).to_be_bytes());

    let mut iv = [0u8; 8];
    for i in 0..8 {
        iv[i] = salt_bytes[i] ^ priv_key[8 + i];
    }

    // Zero-pad to the block size; the inner BER length delimits the PDU.
    let mut padded = plaintext.to_vec();
    while padded.len() % 8 != 0 {
        padded.push(0);
    }

    let enc = DesCbcEnc::new_from_slices(&priv_key[..8], &iv)
        .map_err(|e| SnmpError::Privacy(e.to_string()))?;
    let len = padded.len();
    let ciphertext = enc
        .encrypt_padded_mut::<cipher::block_padding::NoPadding>(&mut padded, len)
        .map_err(|e| SnmpError::Privacy(e.to_string()))?
        .to_vec();
    Ok((ciphertext, salt_bytes.to_vec()))
}

fn des_decrypt(
    priv_key: &[u8],
    priv_params: &[u8],
    ciphertext: &[u8],
) -> Result<Vec<u8>, SnmpError> {
    use cipher::{BlockDecryptMut, KeyIvInit};
    type DesCbcDec = cbc::Decryptor<des::Des>;

    if priv_key.len() < 16 || priv_params.len() != 8 {
        return Err(SnmpError::Privacy("bad DES parameters".to_string()));
    }
    if ciphertext.is_empty() || ciphertext.len() % 8 != 0 {
        return Err(SnmpError::Privacy(
            "DES ciphertext not block aligned".to_string(),
        ));
    }
    let mut iv = [0u8; 8];
    for i in 0..8 {
        iv[i] = priv_params[i] ^ priv_key[8 + i];
    }
    let dec = DesCbcDec::new_from_slices(&priv_key[..8], &iv)
        .map_err(|e| SnmpError::Privacy(e.to_string()))?;
    let mut buf = ciphertext.to_vec();
    let plaintext = dec
        .decrypt_padded_mut::<cipher::block_padding::NoPadding>(&mut buf)
        .map_err(|e| SnmpError::Privacy(e.to_string()))?
        .to_vec();
    Ok(plaintext)
}

/// AES-CFB128 per RFC 3826: IV = engineBoots || engineTime || salt.
fn aes_cfb(
    protocol: PrivProtocol,
    priv_key: &[u8],
    engine_boots: u32,
    engine_time: u32,
    salt: u64,
    data: &[u8],
    encrypting: bool,
) -> Result<(Vec<u8>, Vec<u8>), SnmpError> {
    use aes::{Aes128, Aes256};
    use cipher::{AsyncStreamCipher, KeyIvInit};

    let mut iv = [0u8; 16];
    iv[..4].copy_from_slice(&engine_boots.to_be_bytes());
    iv[4..8].copy_from_slice(&engine_time.to_be_bytes());
    iv[8..].copy_from_slice(&salt.to_be_bytes());

    let mut buf = data.to_vec();
    match protocol {
        PrivProtocol::Aes128 => {
            if priv_key.len() < 16 {
                return Err(SnmpError::Privacy("AES-128 key too short".to_string()));
            }
            if encrypting {
                cfb_mode::Encryptor::<Aes128>::new_from_slices(&priv_key[..16], &iv)
                    .map_err(|e| SnmpError::Privacy(e.to_string()))?
                    .encrypt(&mut buf);
            } else {
                cfb_mode::Decryptor::<Aes128>::new_from_slices(&priv_key[..16], &iv)
                    .map_err(|e| SnmpError::Privacy(e.to_string()))?
                    .decrypt(&mut buf);
            }
        }
        PrivProtocol::Aes256 => {
            if priv_key.len() < 32 {
                return Err(SnmpError::Privacy("AES-256 key too short".to_string()));
            }
            if encrypting {
                cfb_mode::Encryptor::<Aes256>::new_from_slices(&priv_key[..32], &iv)
                    .map_err(|e| SnmpError::Privacy(e.to_string()))?
                    .encrypt(&mut buf);
            } else {
                cfb_mode::Decryptor::<Aes256>::new_from_slices(&priv_key[..32], &iv)
                    .map_err(|e| SnmpError::Privacy(e.to_string()))?
                    .decrypt(&mut buf);
            }
        }
        PrivProtocol::Des => unreachable!("DES handled by des_encrypt/des_decrypt"),
    }
    Ok((buf, salt.to_be_bytes().to_vec()))
}

#[cfg(test)]
mod tests {
    use super::*;

    // RFC 3414 §A.3 test vectors: password "maplesyrup" localized
    // against engine id 00 00 00 00 00 00 00 00 00 00 00 02.
    const ENGINE_ID: [u8; 12] = [0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 2];

    #[test]
    fn test_md5_key_localization_rfc3414() {
        let key = localized_key(AuthProtocol::Md5, "maplesyrup", &ENGINE_ID).unwrap();
        assert_eq!(
            key,
            vec![
                0x52, 0x6f, 0x5e, 0xed, 0x9f, 0xcc, 0xe2, 0x6f, 0x89, 0x64, 0xc2, 0x93, 0x07,
                0x87, 0xd8, 0x2b
            ]
        );
    }

    #[test]
    fn test_sha1_key_localization_rfc3414() {
        let key = localized_key(AuthProtocol::Sha1, "maplesyrup", &ENGINE_ID).unwrap();
        assert_eq!(
            key,
            vec![
                0x66, 0x95, 0xfe, 0xbc, 0x92, 0x88, 0xe3, 0x62, 0x82, 0x23, 0x5f, 0xc7, 0x15,
                0x1f, 0x12, 0x84, 0x97, 0xb3, 0x8f, 0x3f
            ]
        );
    }

    #[test]
    fn test_short_password_rejected() {
        assert!(localized_key(AuthProtocol::Sha256, "short", &ENGINE_ID).is_err());
    }

    #[test]
    fn test_auth_params_verify() {
        let key = localized_key(AuthProtocol::Sha256, "maplesyrup", &ENGINE_ID).unwrap();
        let message = b"some message with zeroed auth params";
        let params = auth_params(AuthProtocol::Sha256, &key, message).unwrap();
        assert_eq!(params.len(), 24);
        verify_auth(AuthProtocol::Sha256, &key, message, &params).unwrap();

        let mut tampered = params.clone();
        tampered[0] ^= 0xff;
        assert!(verify_auth(AuthProtocol::Sha256, &key, message, &tampered).is_err());
    }

    #[test]
    fn test_des_round_trip() {
        let key = localized_priv_key(
            AuthProtocol::Md5,
            PrivProtocol::Des,
            "maplesyrup",
            &ENGINE_ID,
        )
        .unwrap();
        let plaintext = b"scoped pdu bytes that are not block aligned";
        let (ciphertext, salt) = encrypt(PrivProtocol::Des, &key, 7, 0, 42, plaintext).unwrap();
        assert_ne!(&ciphertext[..plaintext.len().min(8)], &plaintext[..8]);
        let decrypted = decrypt(PrivProtocol::Des, &key, 7, 0, &salt, &ciphertext).unwrap();
        assert_eq!(&decrypted[..plaintext.len()], plaintext);
    }

    #[test]
    fn test_aes128_round_trip() {
        let key = localized_priv_key(
            AuthProtocol::Sha1,
            PrivProtocol::Aes128,
            "maplesyrup",
            &ENGINE_ID,
        )
        .unwrap();
        let plaintext = b"aes does not need block alignment";
        let (ciphertext, salt) =
            encrypt(PrivProtocol::Aes128, &key, 3, 1234, 99, plaintext).unwrap();
        assert_eq!(ciphertext.len(), plaintext.len());
        let decrypted =
            decrypt(PrivProtocol::Aes128, &key, 3, 1234, &salt, &ciphertext).unwrap();
        assert_eq!(decrypted, plaintext);
    }

    #[test]
    fn test_aes256_key_expansion() {
        let key = localized_priv_key(
            AuthProtocol::Sha1,
            PrivProtocol::Aes256,
            "maplesyrup",
            &ENGINE_ID,
        )
        .unwrap();
        assert_eq!(key.len(), 32);

        let plaintext = b"expanded key material";
        let (ciphertext, salt) =
            encrypt(PrivProtocol::Aes256, &key, 1, 2, 3, plaintext).unwrap();
        let decrypted = decrypt(PrivProtocol::Aes256, &key, 1, 2, &salt, &ciphertext).unwrap();
        assert_eq!(decrypted, plaintext);
    }
}
