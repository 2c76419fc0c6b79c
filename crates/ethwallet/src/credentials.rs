use crate::{
    errors::WalletError,
    fsutil::StagedWrite,
    key::KeyMaterial,
    keyfile::{self, EncryptedKeyfile, ScryptWork},
    paths::WalletPaths,
};
use alloy::primitives::Address;
use eyre::Context as _;
use fs2::FileExt;
use secrecy::SecretString;
use serde::{Deserialize, Serialize};
use std::{
    fs::{self, File, OpenOptions},
    path::{Path, PathBuf},
    str::FromStr as _,
};

/// Contents of `config.json`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct WalletConfig {
    /// `0x`-prefixed, EIP-55 checksummed.
    pub address: String,
}

impl WalletConfig {
    pub fn for_address(address: Address) -> Self {
        Self {
            address: address.to_checksum(None),
        }
    }

    fn parsed_address(&self) -> Result<Address, WalletError> {
        Address::from_str(self.address.trim()).map_err(|e| {
            WalletError::corrupt(format!("config.json address {:?}: {e}", self.address))
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum LockMode {
    Shared,
    Exclusive,
}

/// Owns the two wallet records on disk: `keyfile.json` and `config.json`.
#[derive(Debug, Clone)]
pub struct CredentialStore {
    paths: WalletPaths,
    work: ScryptWork,
}

impl CredentialStore {
    pub const fn new(paths: WalletPaths, work: ScryptWork) -> Self {
        Self { paths, work }
    }

    #[cfg(test)]
    pub const fn paths(&self) -> &WalletPaths {
        &self.paths
    }

    pub fn is_initialized(&self) -> bool {
        self.paths.config_file.exists() && self.paths.keyfile.exists()
    }

    /// Lock `wallet.lock` without blocking. Contention is `WalletBusy`.
    ///
    /// The lock is held until the returned file is dropped or passed to [`Self::release_lock`].
    fn acquire_lock(&self, mode: LockMode) -> eyre::Result<File> {
        let p = &self.paths.lock_file;
        let mut oo = OpenOptions::new();
        oo.create(true).read(true).write(true).truncate(false);
        #[cfg(unix)]
        {
            use std::os::unix::fs::OpenOptionsExt as _;
            oo.mode(crate::fsutil::MODE_FILE_PRIVATE);
        }
        let f = oo.open(p).context("open lock file")?;
        // fs2's methods, not the newer inherent `File` ones with a different error type.
        let locked = match mode {
            LockMode::Shared => FileExt::try_lock_shared(&f),
            LockMode::Exclusive => FileExt::try_lock_exclusive(&f),
        };
        match locked {
            Ok(()) => Ok(f),
            Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => {
                Err(WalletError::WalletBusy.into())
            }
            Err(e) => Err(eyre::Report::new(e).wrap_err(format!("lock {mode:?}"))),
        }
    }

    fn release_lock(f: File) -> eyre::Result<()> {
        FileExt::unlock(&f).context("unlock")?;
        Ok(())
    }

    /// Generate a key, encrypt it, and commit `keyfile.json` then `config.json`.
    ///
    /// With `overwrite`, existing records are renamed to timestamped `.bak` files first.
    pub fn create_account(&self, password: &SecretString, overwrite: bool) -> eyre::Result<Address> {
        self.paths.ensure_private_dir()?;
        let lock = self.acquire_lock(LockMode::Exclusive)?;

        let existing: Vec<&Path> = [&self.paths.keyfile, &self.paths.config_file]
            .into_iter()
            .map(PathBuf::as_path)
            .filter(|p| p.exists())
            .collect();
        if !existing.is_empty() && !overwrite {
            return Err(
                WalletError::AlreadyExists(self.paths.wallet_dir.display().to_string()).into(),
            );
        }

        let key = KeyMaterial::generate()?;
        let address = key.address();
        let encrypted = keyfile::encrypt(&key, password, self.work).context("encrypt keyfile")?;
        drop(key);

        let keyfile_json = encrypted.to_json()?;
        let config_json = serde_json::to_string_pretty(&WalletConfig::for_address(address))
            .context("serialize config.json")?;

        // Nothing becomes visible until commit.
        let mut staged = StagedWrite::new();
        staged.stage(&self.paths.keyfile, keyfile_json.as_bytes())?;
        staged.stage(&self.paths.config_file, config_json.as_bytes())?;

        let backups = backup_existing(&existing)?;
        if let Err(e) = staged.commit() {
            restore_backups(&backups);
            return Err(e.wrap_err("write wallet files"));
        }
        for (_, bak) in &backups {
            tracing::info!(backup = %bak.display(), "previous wallet file kept");
        }

        Self::release_lock(lock)?;
        tracing::info!(%address, "account created");
        Ok(address)
    }

    /// Decrypt the stored key and check it against the stored address.
    pub fn load_credentials(&self, password: &SecretString) -> eyre::Result<KeyMaterial> {
        if !self.paths.wallet_dir.is_dir() {
            return Err(WalletError::NotInitialized.into());
        }
        let lock = self.acquire_lock(LockMode::Shared)?;

        let has_config = self.paths.config_file.exists();
        let has_keyfile = self.paths.keyfile.exists();
        match (has_config, has_keyfile) {
            (false, false) => return Err(WalletError::NotInitialized.into()),
            (true, false) => {
                return Err(WalletError::corrupt("config.json present but keyfile.json missing").into())
            }
            (false, true) => {
                return Err(WalletError::corrupt("keyfile.json present but config.json missing").into())
            }
            (true, true) => {}
        }

        let stored = self.read_config()?.parsed_address()?;
        let s = fs::read_to_string(&self.paths.keyfile).context("read keyfile.json")?;
        let encrypted = EncryptedKeyfile::from_json(&s)?;
        let key = keyfile::decrypt(&encrypted, password)?;
        if key.address() != stored {
            return Err(WalletError::corrupt(format!(
                "config.json address {stored} does not match keyfile key {}",
                key.address()
            ))
            .into());
        }

        Self::release_lock(lock)?;
        tracing::debug!(address = %stored, "credentials loaded");
        Ok(key)
    }

    /// The address from `config.json`, without touching the keyfile or the password.
    pub fn stored_address(&self) -> eyre::Result<Address> {
        if !self.paths.config_file.exists() {
            return Err(WalletError::NotInitialized.into());
        }
        let lock = self.acquire_lock(LockMode::Shared)?;
        let address = self.read_config()?.parsed_address()?;
        Self::release_lock(lock)?;
        Ok(address)
    }

    fn read_config(&self) -> eyre::Result<WalletConfig> {
        let s = fs::read_to_string(&self.paths.config_file).context("read config.json")?;
        serde_json::from_str(&s)
            .map_err(|e| WalletError::corrupt(format!("config.json: {e}")).into())
    }
}

fn backup_path(path: &Path, stamp: &str) -> PathBuf {
    let name = path
        .file_name()
        .and_then(|s| s.to_str())
        .unwrap_or("wallet");
    let mut candidate = path.with_file_name(format!("{name}.{stamp}.bak"));
    let mut n = 1_u32;
    while candidate.exists() {
        candidate = path.with_file_name(format!("{name}.{stamp}-{n}.bak"));
        n = n.saturating_add(1);
    }
    candidate
}

/// Rename each file to `<name>.<utc timestamp>.bak`. Undone if any rename fails.
fn backup_existing(existing: &[&Path]) -> eyre::Result<Vec<(PathBuf, PathBuf)>> {
    let stamp = chrono::Utc::now().format("%Y%m%dT%H%M%SZ").to_string();
    let mut done: Vec<(PathBuf, PathBuf)> = vec![];
    for p in existing {
        let bak = backup_path(p, &stamp);
        if let Err(e) = fs::rename(p, &bak) {
            restore_backups(&done);
            return Err(eyre::Report::new(e).wrap_err(format!("back up {}", p.display())));
        }
        done.push((p.to_path_buf(), bak));
    }
    Ok(done)
}

fn restore_backups(backups: &[(PathBuf, PathBuf)]) {
    for (orig, bak) in backups {
        if let Err(e) = fs::rename(bak, orig) {
            tracing::error!(error = %e, backup = %bak.display(), "failed to restore backup");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use eyre::ContextCompat as _;

    const TEST_WORK: ScryptWork = ScryptWork {
        log_n: 4,
        r: 8,
        p: 1,
    };

    fn pw(s: &str) -> SecretString {
        SecretString::new(s.to_owned().into())
    }

    fn store(dir: &Path) -> CredentialStore {
        CredentialStore::new(WalletPaths::from_dir(dir.join("wallet")), TEST_WORK)
    }

    fn kind<T: std::fmt::Debug>(r: eyre::Result<T>) -> eyre::Result<WalletError> {
        let e = r.err().context("expected an error")?;
        WalletError::find(&e)
            .cloned()
            .context("expected a structured wallet error")
    }

    fn backups_in(dir: &Path) -> eyre::Result<Vec<String>> {
        let mut out = vec![];
        for entry in fs::read_dir(dir)? {
            let name = entry?.file_name().to_string_lossy().into_owned();
            if name.ends_with(".bak") {
                out.push(name);
            }
        }
        out.sort();
        Ok(out)
    }

    #[test]
    fn create_then_load_with_right_and_wrong_password() -> eyre::Result<()> {
        let dir = tempfile::tempdir()?;
        let s = store(dir.path());
        assert!(!s.is_initialized());

        let a = s.create_account(&pw("secret1"), false)?;
        assert!(s.is_initialized());
        assert_eq!(s.stored_address()?, a);

        let k1 = s.load_credentials(&pw("secret1"))?;
        let k2 = s.load_credentials(&pw("secret1"))?;
        assert_eq!(k1.address(), a);
        assert_eq!(k1.secret_bytes(), k2.secret_bytes());

        assert_eq!(
            kind(s.load_credentials(&pw("wrong")))?,
            WalletError::InvalidPassword
        );
        Ok(())
    }

    #[test]
    fn config_json_holds_checksummed_address() -> eyre::Result<()> {
        let dir = tempfile::tempdir()?;
        let s = store(dir.path());
        let a = s.create_account(&pw("pw"), false)?;
        let cfg: WalletConfig = serde_json::from_str(&fs::read_to_string(&s.paths().config_file)?)?;
        assert_eq!(cfg.address, a.to_checksum(None));

        let kf: serde_json::Value = serde_json::from_str(&fs::read_to_string(&s.paths().keyfile)?)?;
        assert_eq!(kf["version"], 3);
        assert_eq!(kf["address"], hex::encode(a.as_slice()));
        Ok(())
    }

    #[cfg(unix)]
    #[test]
    fn wallet_files_are_private() -> eyre::Result<()> {
        use std::os::unix::fs::PermissionsExt as _;
        let dir = tempfile::tempdir()?;
        let s = store(dir.path());
        s.create_account(&pw("pw"), false)?;
        for p in [&s.paths().keyfile, &s.paths().config_file] {
            assert_eq!(fs::metadata(p)?.permissions().mode() & 0o777, 0o600);
        }
        assert_eq!(
            fs::metadata(&s.paths().wallet_dir)?.permissions().mode() & 0o777,
            0o700
        );
        Ok(())
    }

    #[test]
    fn empty_store_is_not_initialized() -> eyre::Result<()> {
        let dir = tempfile::tempdir()?;
        let s = store(dir.path());
        assert_eq!(
            kind(s.load_credentials(&pw("pw")))?,
            WalletError::NotInitialized
        );
        assert_eq!(kind(s.stored_address())?, WalletError::NotInitialized);
        // Loading must not create the wallet directory.
        assert!(!s.paths().wallet_dir.exists());

        fs::create_dir_all(&s.paths().wallet_dir)?;
        assert_eq!(
            kind(s.load_credentials(&pw("pw")))?,
            WalletError::NotInitialized
        );
        Ok(())
    }

    #[test]
    fn second_create_needs_overwrite_and_keeps_backups() -> eyre::Result<()> {
        let dir = tempfile::tempdir()?;
        let s = store(dir.path());
        let first = s.create_account(&pw("one"), false)?;

        assert!(matches!(
            kind(s.create_account(&pw("two"), false))?,
            WalletError::AlreadyExists(_)
        ));
        assert_eq!(s.load_credentials(&pw("one"))?.address(), first);

        let second = s.create_account(&pw("two"), true)?;
        assert_ne!(first, second);
        assert_eq!(s.load_credentials(&pw("two"))?.address(), second);

        let baks = backups_in(&s.paths().wallet_dir)?;
        assert_eq!(baks.len(), 2, "{baks:?}");
        let kf_bak = baks
            .iter()
            .find(|n| n.starts_with("keyfile.json."))
            .context("keyfile backup")?;
        let old = EncryptedKeyfile::from_json(&fs::read_to_string(
            s.paths().wallet_dir.join(kf_bak),
        )?)?;
        assert_eq!(keyfile::decrypt(&old, &pw("one"))?.address(), first);
        Ok(())
    }

    #[test]
    fn partial_wallet_is_corrupt() -> eyre::Result<()> {
        let dir = tempfile::tempdir()?;
        let s = store(dir.path());
        s.create_account(&pw("pw"), false)?;
        let config = fs::read(&s.paths().config_file)?;

        fs::remove_file(&s.paths().config_file)?;
        assert!(matches!(
            kind(s.load_credentials(&pw("pw")))?,
            WalletError::CorruptKeyfile(_)
        ));

        fs::write(&s.paths().config_file, config)?;
        fs::remove_file(&s.paths().keyfile)?;
        assert!(matches!(
            kind(s.load_credentials(&pw("pw")))?,
            WalletError::CorruptKeyfile(_)
        ));
        Ok(())
    }

    #[test]
    fn unparsable_records_are_corrupt() -> eyre::Result<()> {
        let dir = tempfile::tempdir()?;
        let s = store(dir.path());
        s.create_account(&pw("pw"), false)?;
        let keyfile = fs::read(&s.paths().keyfile)?;

        fs::write(&s.paths().keyfile, b"{\"version\": 3}")?;
        assert!(matches!(
            kind(s.load_credentials(&pw("pw")))?,
            WalletError::CorruptKeyfile(_)
        ));

        fs::write(&s.paths().keyfile, keyfile)?;
        fs::write(&s.paths().config_file, b"{\"address\": \"not-an-address\"}")?;
        assert!(matches!(
            kind(s.load_credentials(&pw("pw")))?,
            WalletError::CorruptKeyfile(_)
        ));
        Ok(())
    }

    #[test]
    fn stored_address_must_match_key() -> eyre::Result<()> {
        let dir = tempfile::tempdir()?;
        let s = store(dir.path());
        s.create_account(&pw("pw"), false)?;
        let other = KeyMaterial::generate()?.address();
        let json = serde_json::to_string(&WalletConfig::for_address(other))?;
        fs::write(&s.paths().config_file, json)?;
        assert!(matches!(
            kind(s.load_credentials(&pw("pw")))?,
            WalletError::CorruptKeyfile(_)
        ));
        Ok(())
    }

    #[test]
    fn contended_lock_is_wallet_busy() -> eyre::Result<()> {
        let dir = tempfile::tempdir()?;
        let s = store(dir.path());
        s.create_account(&pw("pw"), false)?;

        let held = s.acquire_lock(LockMode::Exclusive)?;
        assert_eq!(
            kind(s.load_credentials(&pw("pw")))?,
            WalletError::WalletBusy
        );
        assert_eq!(
            kind(s.create_account(&pw("pw"), true))?,
            WalletError::WalletBusy
        );
        CredentialStore::release_lock(held)?;

        assert!(s.load_credentials(&pw("pw")).is_ok());
        Ok(())
    }
}
