//! Web3 Secret Storage (keystore V3) encoding of a private key.
//!
//! Layout, as written by geth, eth-account and friends:
//!
//! ```json
//! {
//!   "version": 3,
//!   "id": "uuid-v4",
//!   "address": "40 lowercase hex chars",
//!   "crypto": {
//!     "cipher": "aes-128-ctr",
//!     "cipherparams": { "iv": "hex" },
//!     "ciphertext": "hex",
//!     "kdf": "scrypt",
//!     "kdfparams": { "dklen": 32, "n": 262144, "r": 8, "p": 1, "salt": "hex" },
//!     "mac": "hex"
//!   }
//! }
//! ```
//!
//! `mac = keccak256(dk[16..32] || ciphertext)`; the cipher key is `dk[0..16]`.
//! `pbkdf2` keyfiles (`{"dklen", "c", "prf": "hmac-sha256", "salt"}`) are accepted on read.
//!
//! Scrypt parameters must satisfy RFC 7914 (`n < 2^(16 r)`), so keyfiles written with
//! `r = 1` and `n >= 2^16` are refused as corrupt.

use crate::{
    errors::WalletError,
    key::{fill_random, KeyMaterial, SECRET_LEN},
};
use aes::cipher::{KeyIvInit as _, StreamCipher as _};
use alloy::primitives::keccak256;
use secrecy::{ExposeSecret as _, SecretString};
use serde::{Deserialize, Serialize};
use subtle::ConstantTimeEq as _;
use zeroize::Zeroizing;

type Aes128Ctr = ctr::Ctr128BE<aes::Aes128>;

pub const KEYFILE_VERSION: u32 = 3;
pub const CIPHER: &str = "aes-128-ctr";
pub const KDF_SCRYPT: &str = "scrypt";
pub const KDF_PBKDF2: &str = "pbkdf2";
pub const PRF_HMAC_SHA256: &str = "hmac-sha256";
const DKLEN: u32 = 32;
const MAX_DKLEN: u32 = 64;
const SALT_LEN: usize = 32;
const IV_LEN: usize = 16;
const MAC_LEN: usize = 32;
// Upper bounds on what a keyfile may ask for before any MAC check.
const MAX_SCRYPT_LOG_N: u8 = 20;
const MAX_SCRYPT_R: u32 = 32;
const MAX_SCRYPT_P: u32 = 16;
/// `128 * r * n` bytes.
const MAX_SCRYPT_MEMORY: u64 = 1 << 30;
const MAX_PBKDF2_ROUNDS: u32 = 10_000_000;

/// Scrypt cost used when writing new keyfiles.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScryptWork {
    pub log_n: u8,
    pub r: u32,
    pub p: u32,
}

impl Default for ScryptWork {
    fn default() -> Self {
        // geth's standard: n = 2^18, r = 8, p = 1 (256 MiB).
        Self {
            log_n: 18,
            r: 8,
            p: 1,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct EncryptedKeyfile {
    pub version: u32,
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub address: Option<String>,
    #[serde(alias = "Crypto")]
    pub crypto: CryptoJson,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct CryptoJson {
    pub cipher: String,
    pub cipherparams: CipherParams,
    pub ciphertext: String,
    pub kdf: String,
    pub kdfparams: KdfParams,
    pub mac: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct CipherParams {
    pub iv: String,
}

/// The two parameter shapes are told apart by their fields; `kdf` must name the same one.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(untagged)]
pub enum KdfParams {
    Scrypt(ScryptParams),
    Pbkdf2(Pbkdf2Params),
}

impl KdfParams {
    pub const fn name(&self) -> &'static str {
        match self {
            Self::Scrypt(_) => KDF_SCRYPT,
            Self::Pbkdf2(_) => KDF_PBKDF2,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ScryptParams {
    pub dklen: u32,
    pub n: u64,
    pub r: u32,
    pub p: u32,
    pub salt: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Pbkdf2Params {
    pub dklen: u32,
    pub c: u32,
    pub prf: String,
    pub salt: String,
}

impl EncryptedKeyfile {
    /// Parse keyfile JSON. Anything that does not have the V3 shape is `CorruptKeyfile`.
    pub fn from_json(s: &str) -> eyre::Result<Self> {
        serde_json::from_str(s)
            .map_err(|e| WalletError::corrupt(format!("keyfile is not valid keystore json: {e}")).into())
    }

    pub fn to_json(&self) -> eyre::Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }
}

fn decode_hex(field: &str, value: &str) -> Result<Vec<u8>, WalletError> {
    let v = value.strip_prefix("0x").unwrap_or(value);
    hex::decode(v).map_err(|e| WalletError::corrupt(format!("{field} is not hex: {e}")))
}

fn decode_hex_len(field: &str, value: &str, len: usize) -> Result<Vec<u8>, WalletError> {
    let bytes = decode_hex(field, value)?;
    if bytes.len() != len {
        return Err(WalletError::corrupt(format!(
            "{field} must be {len} bytes, got {}",
            bytes.len()
        )));
    }
    Ok(bytes)
}

fn scrypt_params(log_n: u8, r: u32, p: u32, dklen: usize) -> Result<scrypt::Params, String> {
    if log_n > MAX_SCRYPT_LOG_N {
        return Err(format!("n = 2^{log_n} exceeds 2^{MAX_SCRYPT_LOG_N}"));
    }
    if !(1..=MAX_SCRYPT_R).contains(&r) {
        return Err(format!("r = {r} is outside 1..={MAX_SCRYPT_R}"));
    }
    if !(1..=MAX_SCRYPT_P).contains(&p) {
        return Err(format!("p = {p} is outside 1..={MAX_SCRYPT_P}"));
    }
    let memory = 128_u64
        .saturating_mul(u64::from(r))
        .saturating_mul(1_u64 << log_n);
    if memory > MAX_SCRYPT_MEMORY {
        return Err(format!(
            "n = 2^{log_n}, r = {r} needs {} MiB, above the {} MiB limit",
            memory >> 20,
            MAX_SCRYPT_MEMORY >> 20
        ));
    }
    // RFC 7914: n < 2^(16 r).
    if u32::from(log_n) >= r.saturating_mul(16) {
        return Err(format!("n = 2^{log_n} is not below 2^(16 r) for r = {r}"));
    }
    scrypt::Params::new(log_n, r, p, dklen).map_err(|e| e.to_string())
}

fn derive_key(kdf: &KdfParams, password: &SecretString) -> Result<Zeroizing<Vec<u8>>, WalletError> {
    let pw = password.expose_secret().as_bytes();
    match kdf {
        KdfParams::Scrypt(k) => {
            check_dklen(k.dklen)?;
            if k.n < 2 || !k.n.is_power_of_two() {
                return Err(WalletError::corrupt(format!(
                    "scrypt n must be a power of two, got {}",
                    k.n
                )));
            }
            let log_n = u8::try_from(k.n.trailing_zeros())
                .map_err(|e| WalletError::corrupt(format!("scrypt n: {e}")))?;
            let dklen = k.dklen as usize;
            let params = scrypt_params(log_n, k.r, k.p, dklen)
                .map_err(|e| WalletError::corrupt(format!("unsupported scrypt params: {e}")))?;
            let salt = decode_hex("kdfparams.salt", &k.salt)?;
            let mut dk = Zeroizing::new(vec![0_u8; dklen]);
            scrypt::scrypt(pw, &salt, &params, &mut dk)
                .map_err(|e| WalletError::corrupt(format!("scrypt: {e}")))?;
            Ok(dk)
        }
        KdfParams::Pbkdf2(k) => {
            check_dklen(k.dklen)?;
            if k.prf != PRF_HMAC_SHA256 {
                return Err(WalletError::corrupt(format!("unsupported prf: {}", k.prf)));
            }
            if !(1..=MAX_PBKDF2_ROUNDS).contains(&k.c) {
                return Err(WalletError::corrupt(format!(
                    "pbkdf2 iteration count {} is outside 1..={MAX_PBKDF2_ROUNDS}",
                    k.c
                )));
            }
            let salt = decode_hex("kdfparams.salt", &k.salt)?;
            let mut dk = Zeroizing::new(vec![0_u8; k.dklen as usize]);
            pbkdf2::pbkdf2_hmac::<sha2::Sha256>(pw, &salt, k.c, &mut dk);
            Ok(dk)
        }
    }
}

fn check_dklen(dklen: u32) -> Result<(), WalletError> {
    if (DKLEN..=MAX_DKLEN).contains(&dklen) {
        Ok(())
    } else {
        Err(WalletError::corrupt(format!(
            "dklen must be between {DKLEN} and {MAX_DKLEN}, got {dklen}"
        )))
    }
}

/// `keccak256(dk[16..32] || ciphertext)`.
fn compute_mac(dk: &[u8], ciphertext: &[u8]) -> Result<[u8; MAC_LEN], WalletError> {
    let mac_key = dk
        .get(16..32)
        .ok_or_else(|| WalletError::corrupt("derived key too short"))?;
    let mut input = Zeroizing::new(Vec::with_capacity(mac_key.len() + ciphertext.len()));
    input.extend_from_slice(mac_key);
    input.extend_from_slice(ciphertext);
    Ok(keccak256(input.as_slice()).0)
}

fn apply_ctr(dk: &[u8], iv: &[u8], buf: &mut [u8]) -> Result<(), WalletError> {
    let enc_key = dk
        .get(..16)
        .ok_or_else(|| WalletError::corrupt("derived key too short"))?;
    let mut cipher = Aes128Ctr::new_from_slices(enc_key, iv)
        .map_err(|e| WalletError::corrupt(format!("aes-128-ctr init: {e}")))?;
    cipher.apply_keystream(buf);
    Ok(())
}

/// Encrypt `key` under `password`. Every call draws a fresh salt, IV and id.
pub fn encrypt(
    key: &KeyMaterial,
    password: &SecretString,
    work: ScryptWork,
) -> eyre::Result<EncryptedKeyfile> {
    let mut salt = [0_u8; SALT_LEN];
    fill_random(&mut salt);
    let mut iv = [0_u8; IV_LEN];
    fill_random(&mut iv);

    // Validate the work factor up front so a bad setting is reported as such.
    scrypt_params(work.log_n, work.r, work.p, DKLEN as usize)
        .map_err(|e| eyre::eyre!("invalid scrypt work factor: {e}"))?;

    let kdfparams = KdfParams::Scrypt(ScryptParams {
        dklen: DKLEN,
        n: 1_u64 << work.log_n,
        r: work.r,
        p: work.p,
        salt: hex::encode(salt),
    });
    let dk = derive_key(&kdfparams, password)?;

    let mut ciphertext = key.secret_bytes().to_vec();
    apply_ctr(&dk, &iv, &mut ciphertext)?;
    let mac = compute_mac(&dk, &ciphertext)?;

    Ok(EncryptedKeyfile {
        version: KEYFILE_VERSION,
        id: uuid::Uuid::new_v4().to_string(),
        address: Some(hex::encode(key.address().as_slice())),
        crypto: CryptoJson {
            cipher: CIPHER.to_owned(),
            cipherparams: CipherParams {
                iv: hex::encode(iv),
            },
            ciphertext: hex::encode(&ciphertext),
            kdf: KDF_SCRYPT.to_owned(),
            kdfparams,
            mac: hex::encode(mac),
        },
    })
}

/// Decrypt a keyfile.
///
/// The MAC is checked before anything is decrypted: a mismatch is `InvalidPassword`.
/// Structural problems are `CorruptKeyfile`.
pub fn decrypt(keyfile: &EncryptedKeyfile, password: &SecretString) -> eyre::Result<KeyMaterial> {
    if keyfile.version != KEYFILE_VERSION {
        return Err(WalletError::corrupt(format!(
            "unsupported keyfile version {}",
            keyfile.version
        ))
        .into());
    }
    let c = &keyfile.crypto;
    if !c.cipher.eq_ignore_ascii_case(CIPHER) {
        return Err(WalletError::corrupt(format!("unsupported cipher {}", c.cipher)).into());
    }
    if !c.kdf.eq_ignore_ascii_case(c.kdfparams.name()) {
        return Err(WalletError::corrupt(format!(
            "kdf {} does not match its kdfparams ({})",
            c.kdf,
            c.kdfparams.name()
        ))
        .into());
    }
    let iv = decode_hex_len("cipherparams.iv", &c.cipherparams.iv, IV_LEN)?;
    let ciphertext = decode_hex_len("ciphertext", &c.ciphertext, SECRET_LEN)?;
    let expected_mac = decode_hex_len("mac", &c.mac, MAC_LEN)?;

    let dk = derive_key(&c.kdfparams, password)?;
    let mac = compute_mac(&dk, &ciphertext)?;
    if !bool::from(mac.as_slice().ct_eq(expected_mac.as_slice())) {
        tracing::debug!("keyfile mac mismatch");
        return Err(WalletError::InvalidPassword.into());
    }

    let mut plain = Zeroizing::new(ciphertext);
    apply_ctr(&dk, &iv, &mut plain)?;
    let key = KeyMaterial::from_bytes(&plain)
        .map_err(|e| WalletError::corrupt(format!("decrypted key is not valid: {e}")))?;

    if let Some(stored) = keyfile.address.as_deref() {
        let stored = stored.trim_start_matches("0x");
        let derived = hex::encode(key.address().as_slice());
        if !stored.eq_ignore_ascii_case(&derived) {
            return Err(WalletError::corrupt(format!(
                "keyfile address {stored} does not match its key (0x{derived})"
            ))
            .into());
        }
    }
    Ok(key)
}
