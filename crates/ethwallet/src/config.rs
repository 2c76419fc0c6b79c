use crate::keyfile::ScryptWork;
use serde::{Deserialize, Serialize};

pub const DEFAULT_RPC_URL: &str = "http://127.0.0.1:8545";
pub const DEFAULT_GAS_LIMIT: u64 = 21_000;
pub const DEFAULT_GAS_PRICE_GWEI: &str = "50";

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct RpcConfig {
    /// JSON-RPC endpoint queried first.
    pub url: String,
    /// Tried in order when `url` is unreachable.
    pub fallback_urls: Vec<String>,
    pub timeout_seconds: u64,
    pub connect_timeout_seconds: u64,
    /// Rounds over all endpoints for read-only calls before giving up.
    pub retry_rounds: u32,
}

impl Default for RpcConfig {
    fn default() -> Self {
        Self {
            url: DEFAULT_RPC_URL.into(),
            fallback_urls: vec![],
            timeout_seconds: 20,
            connect_timeout_seconds: 5,
            retry_rounds: 3,
        }
    }
}

impl RpcConfig {
    /// Primary URL followed by fallbacks, without blanks or duplicates.
    pub fn urls(&self) -> Vec<String> {
        let mut out: Vec<String> = vec![];
        for u in std::iter::once(&self.url).chain(self.fallback_urls.iter()) {
            let u = u.trim();
            if !u.is_empty() && !out.iter().any(|x| x == u) {
                out.push(u.to_owned());
            }
        }
        out
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct TxConfig {
    pub gas_limit: u64,
    /// Decimal gwei string, parsed exactly.
    pub gas_price_gwei: String,
    /// EIP-155 chain id. When unset the node is asked.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub chain_id: Option<u64>,
}

impl Default for TxConfig {
    fn default() -> Self {
        Self {
            gas_limit: DEFAULT_GAS_LIMIT,
            gas_price_gwei: DEFAULT_GAS_PRICE_GWEI.into(),
            chain_id: None,
        }
    }
}

/// Scrypt cost for newly written keyfiles. Existing keyfiles carry their own parameters.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct KeystoreConfig {
    pub scrypt_log_n: u8,
    pub scrypt_r: u32,
    pub scrypt_p: u32,
}

impl Default for KeystoreConfig {
    fn default() -> Self {
        let w = ScryptWork::default();
        Self {
            scrypt_log_n: w.log_n,
            scrypt_r: w.r,
            scrypt_p: w.p,
        }
    }
}

impl KeystoreConfig {
    pub const fn work(&self) -> ScryptWork {
        ScryptWork {
            log_n: self.scrypt_log_n,
            r: self.scrypt_r,
            p: self.scrypt_p,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct Settings {
    pub rpc: RpcConfig,
    pub tx: TxConfig,
    pub keystore: KeystoreConfig,
}
