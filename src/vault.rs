//! Vault for encrypted secrets management.
//!
//! Connection passwords, private keys, and console secrets are stored by
//! the account layer as opaque tokens produced here. A token is three
//! colon-separated hex fields, `salt:iv:ciphertext`, with a fresh 16-byte
//! salt and IV per encryption. The key is derived per token with Argon2id
//! from the process-wide master secret; the cipher is AES-256-CBC with
//! PKCS7 padding. CBC carries no authenticity tag, so tampering surfaces
//! as a padding or UTF-8 failure at decrypt time.
//!
//! Tokens with only two fields (`iv:ciphertext`) come from the scheme that
//! predates per-token salts and decrypt against a fixed application salt.
//! That path is read-only; new tokens always carry three fields.

use aes::cipher::{block_padding::Pkcs7, BlockDecryptMut, BlockEncryptMut, KeyIvInit};
use argon2::Argon2;
use rand::rngs::OsRng;
use rand::RngCore;

use crate::error::{Error, Result};

type Aes256CbcEnc = cbc::Encryptor<aes::Aes256>;
type Aes256CbcDec = cbc::Decryptor<aes::Aes256>;

/// Minimum accepted master secret length in characters.
pub const MIN_MASTER_SECRET_LEN: usize = 32;

/// Salt length in bytes.
const SALT_LEN: usize = 16;

/// IV length in bytes.
const IV_LEN: usize = 16;

/// Fixed salt used by the legacy two-field token scheme.
const LEGACY_SALT: &[u8; SALT_LEN] = b"craftops.vault.0";

/// Byte length of a generated console secret (hex doubles it).
const CONSOLE_SECRET_LEN: usize = 16;

/// Symmetric vault bound to one master secret.
pub struct SecretVault {
    master_secret: String,
}

impl SecretVault {
    /// Creates a vault. The master secret is not validated here; call
    /// [`SecretVault::verify_configuration`] once at startup.
    pub fn new(master_secret: impl Into<String>) -> Self {
        Self {
            master_secret: master_secret.into(),
        }
    }

    /// Encrypts a plaintext into a `salt:iv:ciphertext` hex token.
    ///
    /// Two encryptions of the same plaintext produce different tokens
    /// because both salt and IV are drawn fresh.
    pub fn encrypt(&self, plaintext: &str) -> Result<String> {
        if plaintext.is_empty() {
            return Err(Error::EncryptionFailed("empty plaintext".into()));
        }

        let mut salt = [0u8; SALT_LEN];
        let mut iv = [0u8; IV_LEN];
        OsRng.fill_bytes(&mut salt);
        OsRng.fill_bytes(&mut iv);

        let key = self.derive_key(&salt)?;
        let ciphertext = Aes256CbcEnc::new(&key.into(), &iv.into())
            .encrypt_padded_vec_mut::<Pkcs7>(plaintext.as_bytes());

        Ok(format!(
            "{}:{}:{}",
            hex::encode(salt),
            hex::encode(iv),
            hex::encode(ciphertext)
        ))
    }

    /// Decrypts a token produced by [`SecretVault::encrypt`] or by the
    /// legacy two-field scheme. Every malformation maps to
    /// [`Error::DecryptionFailed`].
    pub fn decrypt(&self, token: &str) -> Result<String> {
        let fields: Vec<&str> = token.split(':').collect();
        let (salt, iv_hex, ct_hex) = match fields.as_slice() {
            [salt_hex, iv_hex, ct_hex] => {
                let salt = decode_field::<SALT_LEN>(salt_hex, "salt")?;
                (salt, *iv_hex, *ct_hex)
            }
            [iv_hex, ct_hex] => (*LEGACY_SALT, *iv_hex, *ct_hex),
            _ => {
                return Err(Error::DecryptionFailed(format!(
                    "expected 2 or 3 fields, found {}",
                    fields.len()
                )))
            }
        };

        let iv = decode_field::<IV_LEN>(iv_hex, "iv")?;
        let ciphertext = hex::decode(ct_hex)
            .map_err(|_| Error::DecryptionFailed("ciphertext is not valid hex".into()))?;
        if ciphertext.is_empty() || ciphertext.len() % 16 != 0 {
            return Err(Error::DecryptionFailed(
                "ciphertext length is not a multiple of the block size".into(),
            ));
        }

        let key = self.derive_key(&salt)?;
        let plaintext = Aes256CbcDec::new(&key.into(), &iv.into())
            .decrypt_padded_vec_mut::<Pkcs7>(&ciphertext)
            .map_err(|_| Error::DecryptionFailed("bad padding, wrong master secret?".into()))?;

        String::from_utf8(plaintext)
            .map_err(|_| Error::DecryptionFailed("decrypted content is not UTF-8".into()))
    }

    /// Startup self-check: enforces the minimum master secret length and
    /// proves a round trip. Call once before serving requests; a failure
    /// here is the one error worth dying for.
    pub fn verify_configuration(&self) -> Result<()> {
        if self.master_secret.chars().count() < MIN_MASTER_SECRET_LEN {
            return Err(Error::Configuration(format!(
                "master secret must be at least {MIN_MASTER_SECRET_LEN} characters"
            )));
        }
        let probe = "craftops-vault-selfcheck";
        let round_trip = self.decrypt(&self.encrypt(probe)?)?;
        if round_trip != probe {
            return Err(Error::Configuration(
                "vault round trip produced different plaintext".into(),
            ));
        }
        Ok(())
    }

    /// Mints a console secret: 16 random bytes as a 32-character hex
    /// string, ready for [`SecretVault::encrypt`].
    pub fn generate_console_secret() -> String {
        let mut bytes = [0u8; CONSOLE_SECRET_LEN];
        OsRng.fill_bytes(&mut bytes);
        hex::encode(bytes)
    }

    /// Argon2id key derivation from the master secret and a salt.
    fn derive_key(&self, salt: &[u8; SALT_LEN]) -> Result<[u8; 32]> {
        let argon2 = Argon2::default();
        let mut key = [0u8; 32];
        argon2
            .hash_password_into(self.master_secret.as_bytes(), salt, &mut key)
            .map_err(|e| Error::Internal(format!("key derivation failed: {e}")))?;
        Ok(key)
    }
}

impl std::fmt::Debug for SecretVault {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SecretVault")
            .field("master_secret", &"<redacted>")
            .finish()
    }
}

/// Decodes one fixed-length hex field of a token.
fn decode_field<const N: usize>(hex_str: &str, what: &str) -> Result<[u8; N]> {
    let bytes = hex::decode(hex_str)
        .map_err(|_| Error::DecryptionFailed(format!("{what} is not valid hex")))?;
    bytes
        .try_into()
        .map_err(|_| Error::DecryptionFailed(format!("{what} must be {N} bytes")))
}

// ============================================================================
// Tests
// ============================================================================
