//! Terminal interaction: password prompts and notices on stderr. Results go to stdout in `main`.

use secrecy::{ExposeSecret as _, SecretString};
use std::io::Write as _;

/// Headless mode: when set, this is used instead of prompting.
pub const PASSWORD_ENV: &str = "ETHWALLET_PASSWORD";

fn stderr_writeln(s: &str) {
    let mut stderr = std::io::stderr().lock();
    if stderr.write_all(s.as_bytes()).is_err() {
        return;
    }
    if stderr.write_all(b"\n").is_err() {
        return;
    }
    let _flush = stderr.flush();
}

/// Human-facing notice on stderr (never secrets).
pub fn print_notice(s: &str) {
    stderr_writeln(s);
}

fn env_password() -> Option<SecretString> {
    std::env::var(PASSWORD_ENV)
        .ok()
        .map(|pw| SecretString::new(pw.into()))
}

fn prompt(label: &str) -> eyre::Result<SecretString> {
    let pw = rpassword::prompt_password(label)
        .map_err(|e| eyre::eyre!("read password (no terminal? set {PASSWORD_ENV}): {e}"))?;
    Ok(SecretString::new(pw.into()))
}

/// Password for an existing wallet.
pub fn read_password() -> eyre::Result<SecretString> {
    if let Some(pw) = env_password() {
        return Ok(pw);
    }
    prompt("Password: ")
}

fn check_new_password(pw: &SecretString, confirm: &SecretString) -> eyre::Result<()> {
    if pw.expose_secret().is_empty() {
        eyre::bail!("password must not be empty");
    }
    if pw.expose_secret() != confirm.expose_secret() {
        eyre::bail!("passwords do not match");
    }
    Ok(())
}

/// Password for a new wallet: asked twice, must match and be non-empty.
pub fn read_new_password() -> eyre::Result<SecretString> {
    if let Some(pw) = env_password() {
        check_new_password(&pw, &pw)?;
        return Ok(pw);
    }
    let pw = prompt("New password: ")?;
    let confirm = prompt("Repeat password: ")?;
    check_new_password(&pw, &confirm)?;
    Ok(pw)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn s(v: &str) -> SecretString {
        SecretString::new(v.to_owned().into())
    }

    #[test]
    fn new_password_rules() {
        assert!(check_new_password(&s("hunter2"), &s("hunter2")).is_ok());
        assert!(check_new_password(&s("hunter2"), &s("hunter3")).is_err());
        assert!(check_new_password(&s(""), &s("")).is_err());
    }
}
