use alloy::{primitives::Address, signers::local::PrivateKeySigner};
use eyre::Context as _;
use rand::Rng as _;
use zeroize::Zeroizing;

pub const SECRET_LEN: usize = 32;

pub fn fill_random(buf: &mut [u8]) {
    let mut rng = rand::rng();
    rng.fill_bytes(buf);
}

/// A private key together with the address derived from it.
///
/// The address is never accepted from outside; it is always recomputed from the secret.
/// The secret lives in a zeroizing buffer and is wiped when this value is dropped.
pub struct KeyMaterial {
    secret: Zeroizing<[u8; SECRET_LEN]>,
    address: Address,
}

impl KeyMaterial {
    /// Generate a fresh key from the OS CSPRNG.
    pub fn generate() -> eyre::Result<Self> {
        // A uniformly random 32-byte string is outside the secp256k1 scalar range with
        // probability ~2^-128; retry instead of failing.
        for _ in 0_u8..8_u8 {
            let mut bytes = Zeroizing::new([0_u8; SECRET_LEN]);
            fill_random(&mut *bytes);
            if let Ok(k) = Self::from_bytes(&*bytes) {
                return Ok(k);
            }
        }
        eyre::bail!("failed to generate a valid secp256k1 key")
    }

    pub fn from_bytes(bytes: &[u8]) -> eyre::Result<Self> {
        let secret: [u8; SECRET_LEN] = bytes
            .try_into()
            .with_context(|| format!("private key must be {SECRET_LEN} bytes"))?;
        let secret = Zeroizing::new(secret);
        let address = address_of(&secret)?;
        Ok(Self { secret, address })
    }

    pub const fn address(&self) -> Address {
        self.address
    }

    pub fn secret_bytes(&self) -> &[u8; SECRET_LEN] {
        &self.secret
    }

    /// Signer scoped to the caller; the underlying signing key zeroizes on drop.
    pub fn signer(&self) -> eyre::Result<PrivateKeySigner> {
        PrivateKeySigner::from_slice(&*self.secret).context("load secp256k1 key")
    }
}

impl std::fmt::Debug for KeyMaterial {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KeyMaterial")
            .field("address", &self.address)
            .field("secret", &"<redacted>")
            .finish()
    }
}

/// `keccak256(uncompressed_pubkey[1..])[12..]` of the key, via the secp256k1 signer.
pub fn address_of(secret: &[u8; SECRET_LEN]) -> eyre::Result<Address> {
    let signer = PrivateKeySigner::from_slice(secret).context("invalid secp256k1 private key")?;
    Ok(signer.address())
}
