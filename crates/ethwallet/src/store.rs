use crate::{config::Settings, paths::WalletPaths};
use eyre::Context as _;
use std::{fs, path::PathBuf};

#[derive(Debug, Clone)]
pub struct SettingsStore {
    path: PathBuf,
}

/// Apply environment overrides (endpoint, chain id) on top of the file.
fn apply_env_overrides(cfg: &mut Settings, var: impl Fn(&str) -> Option<String>) {
    /// Helper: if a var is set and non-empty, apply `setter` with the trimmed value.
    fn apply_env(value: Option<String>, setter: impl FnOnce(&str)) {
        if let Some(u) = value {
            let t = u.trim();
            if !t.is_empty() {
                setter(t);
            }
        }
    }

    apply_env(var("ETHWALLET_RPC_URL"), |v| {
        v.clone_into(&mut cfg.rpc.url);
    });
    apply_env(var("ETHWALLET_CHAIN_ID"), |v| match v.parse::<u64>() {
        Ok(id) if id > 0 => cfg.tx.chain_id = Some(id),
        _ => tracing::warn!(value = v, "ignoring invalid ETHWALLET_CHAIN_ID"),
    });
}

fn process_env(name: &str) -> Option<String> {
    std::env::var(name).ok()
}

impl SettingsStore {
    pub fn new(paths: &WalletPaths) -> Self {
        Self {
            path: paths.settings_file.clone(),
        }
    }

    /// Settings from disk (defaults when the file is absent) with env overrides applied.
    pub fn load(&self) -> eyre::Result<Settings> {
        let mut cfg = self.load_file()?;
        apply_env_overrides(&mut cfg, process_env);
        Ok(cfg)
    }

    fn load_file(&self) -> eyre::Result<Settings> {
        if !self.path.exists() {
            return Ok(Settings::default());
        }
        let s = fs::read_to_string(&self.path).context("read settings.toml")?;
        toml::from_str(&s).context("parse settings.toml")
    }

    /// Write the file with defaults if it does not exist yet, so users have something to edit.
    pub fn init_if_missing(&self) -> eyre::Result<()> {
        if self.path.exists() {
            return Ok(());
        }
        self.save(&Settings::default())
    }

    pub fn save(&self, cfg: &Settings) -> eyre::Result<()> {
        if let Some(parent) = self.path.parent() {
            crate::fsutil::ensure_private_dir(parent)?;
        }
        let s = toml::to_string_pretty(cfg).context("serialize settings.toml")?;
        crate::fsutil::write_string_atomic_restrictive(
            &self.path,
            &s,
            crate::fsutil::MODE_FILE_PRIVATE,
        )
        .context("write settings.toml")?;
        Ok(())
    }
}
