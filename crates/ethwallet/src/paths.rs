use directories::BaseDirs;
use eyre::ContextCompat as _;
use serde::Serialize;
use std::path::{Path, PathBuf};

pub const WALLET_DIR_NAME: &str = ".ethereum-wallet";

/// Locations of every file the wallet owns. All of them live in one directory.
#[derive(Debug, Clone, Serialize)]
pub struct WalletPaths {
    pub wallet_dir: PathBuf,
    pub config_file: PathBuf,
    pub keyfile: PathBuf,
    pub settings_file: PathBuf,
    pub lock_file: PathBuf,
    pub log_file: PathBuf,
}

impl WalletPaths {
    pub fn discover() -> eyre::Result<Self> {
        // Test/CI override knob.
        if let Ok(dir) = std::env::var("ETHWALLET_DIR") {
            let dir = dir.trim();
            if !dir.is_empty() {
                return Ok(Self::from_dir(dir));
            }
        }

        // ~/.ethereum-wallet on every platform.
        let base = BaseDirs::new().context("failed to resolve home directory")?;
        Ok(Self::from_dir(base.home_dir().join(WALLET_DIR_NAME)))
    }

    pub fn from_dir(dir: impl AsRef<Path>) -> Self {
        let wallet_dir = dir.as_ref().to_path_buf();
        Self {
            config_file: wallet_dir.join("config.json"),
            keyfile: wallet_dir.join("keyfile.json"),
            settings_file: wallet_dir.join("settings.toml"),
            lock_file: wallet_dir.join("wallet.lock"),
            log_file: wallet_dir.join("ethwallet.log.jsonl"),
            wallet_dir,
        }
    }

    pub fn ensure_private_dir(&self) -> eyre::Result<()> {
        crate::fsutil::ensure_private_dir(&self.wallet_dir)
    }
}
