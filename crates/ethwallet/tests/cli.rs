use std::{fs, path::Path};

use assert_cmd::Command;
use eyre::{Context as _, ContextCompat as _};
use predicates::prelude::*;

/// Cheap scrypt and a single RPC round against a closed port keep these fast.
const TEST_SETTINGS: &str = r#"
[rpc]
url = "http://127.0.0.1:1"
timeout_seconds = 2
connect_timeout_seconds = 1
retry_rounds = 1

[tx]
chain_id = 1337

[keystore]
scrypt_log_n = 4
scrypt_r = 8
scrypt_p = 1
"#;

fn wallet_dir() -> eyre::Result<tempfile::TempDir> {
    let dir = tempfile::tempdir()?;
    fs::write(dir.path().join("settings.toml"), TEST_SETTINGS)?;
    Ok(dir)
}

fn ethwallet(dir: &Path, password: Option<&str>) -> Command {
    let mut cmd = Command::new(assert_cmd::cargo::cargo_bin!("ethwallet"));
    cmd.env("ETHWALLET_DIR", dir)
        .env("NO_COLOR", "1")
        .env_remove("ETHWALLET_RPC_URL")
        .env_remove("ETHWALLET_CHAIN_ID")
        .env_remove("ETHWALLET_PASSWORD")
        .env_remove("RUST_LOG");
    if let Some(pw) = password {
        cmd.env("ETHWALLET_PASSWORD", pw);
    }
    cmd
}

fn created_address(stdout: &[u8]) -> eyre::Result<String> {
    let s = String::from_utf8(stdout.to_vec())?;
    let addr = s
        .split_whitespace()
        .find(|w| w.starts_with("0x"))
        .context("address in create-account output")?;
    Ok(addr.to_owned())
}

#[test]
fn paths_prints_wallet_files_as_json() -> eyre::Result<()> {
    let dir = wallet_dir()?;
    let out = ethwallet(dir.path(), None)
        .arg("paths")
        .output()
        .context("run ethwallet paths")?;
    assert!(out.status.success(), "paths failed: {out:?}");

    let v: serde_json::Value = serde_json::from_slice(&out.stdout).context("parse paths json")?;
    let keyfile = v
        .get("keyfile")
        .and_then(serde_json::Value::as_str)
        .context("keyfile path")?;
    assert_eq!(Path::new(keyfile), dir.path().join("keyfile.json"));
    assert!(v.get("config_file").is_some());
    assert!(v.get("lock_file").is_some());
    Ok(())
}

#[test]
fn create_account_writes_both_files_and_refuses_to_overwrite() -> eyre::Result<()> {
    let dir = wallet_dir()?;
    let out = ethwallet(dir.path(), Some("secret1"))
        .arg("create-account")
        .output()
        .context("run create-account")?;
    assert!(out.status.success(), "create-account failed: {out:?}");
    let address = created_address(&out.stdout)?;
    assert_eq!(address.len(), 42);

    let config: serde_json::Value =
        serde_json::from_str(&fs::read_to_string(dir.path().join("config.json"))?)?;
    assert_eq!(
        config.get("address").and_then(serde_json::Value::as_str),
        Some(address.as_str())
    );
    assert!(dir.path().join("keyfile.json").exists());

    ethwallet(dir.path(), Some("secret1"))
        .arg("create-account")
        .assert()
        .failure()
        .stderr(predicate::str::contains("already exists"));

    let out = ethwallet(dir.path(), Some("secret2"))
        .args(["create-account", "--force"])
        .output()
        .context("run create-account --force")?;
    assert!(out.status.success(), "create-account --force failed: {out:?}");
    assert_ne!(created_address(&out.stdout)?, address);

    let backups = fs::read_dir(dir.path())?
        .filter_map(Result::ok)
        .filter(|e| e.file_name().to_string_lossy().ends_with(".bak"))
        .count();
    assert_eq!(backups, 2);
    Ok(())
}

#[test]
fn empty_new_password_is_refused() -> eyre::Result<()> {
    let dir = wallet_dir()?;
    ethwallet(dir.path(), Some(""))
        .arg("create-account")
        .assert()
        .failure()
        .stderr(predicate::str::contains("must not be empty"));
    assert!(!dir.path().join("keyfile.json").exists());
    Ok(())
}

#[test]
fn check_balance_without_wallet_fails() -> eyre::Result<()> {
    let dir = wallet_dir()?;
    ethwallet(dir.path(), Some("pw"))
        .arg("check-balance")
        .assert()
        .failure()
        .stderr(predicate::str::contains("no wallet found"));
    Ok(())
}

#[test]
fn check_balance_reports_wrong_password_and_dead_node() -> eyre::Result<()> {
    let dir = wallet_dir()?;
    ethwallet(dir.path(), Some("secret1"))
        .arg("create-account")
        .assert()
        .success();

    ethwallet(dir.path(), Some("wrong"))
        .arg("check-balance")
        .assert()
        .failure()
        .stderr(predicate::str::contains("incorrect password"));

    ethwallet(dir.path(), Some("secret1"))
        .arg("check-balance")
        .assert()
        .failure()
        .stderr(predicate::str::contains("node unreachable"));
    Ok(())
}

#[test]
fn send_ether_validates_input_before_unlocking() -> eyre::Result<()> {
    let dir = wallet_dir()?;
    ethwallet(dir.path(), Some("pw"))
        .args(["send-ether", "0.1", "0xnot-an-address"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("invalid address"));

    ethwallet(dir.path(), Some("pw"))
        .args([
            "send-ether",
            "--",
            "-1",
            "0x5aAeb6053F3E94C9b9A09f33669435E7Ef1BeAed",
        ])
        .assert()
        .failure()
        .stderr(predicate::str::contains("invalid amount"));
    Ok(())
}

#[test]
fn send_ether_to_dead_node_is_unreachable() -> eyre::Result<()> {
    let dir = wallet_dir()?;
    ethwallet(dir.path(), Some("pw"))
        .arg("create-account")
        .assert()
        .success();
    ethwallet(dir.path(), Some("pw"))
        .args([
            "send-ether",
            "0.01",
            "0x5aaeb6053f3e94c9b9a09f33669435e7ef1beaed",
        ])
        .assert()
        .failure()
        .stderr(predicate::str::contains("node unreachable"));
    Ok(())
}
