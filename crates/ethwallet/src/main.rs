#![recursion_limit = "256"]
#![expect(
    clippy::multiple_crate_versions,
    reason = "transitive dependency duplication"
)]

use clap::{Parser, Subcommand};
use eyre::Context as _;
use std::io::Write as _;
use tracing_subscriber::prelude::*;

mod amount;
mod chain;
mod cli_output;
mod config;
mod credentials;
mod errors;
mod fsutil;
mod key;
mod keyfile;
mod paths;
mod retry;
mod store;
mod tx;
mod wallet;

use crate::{
    chain::RpcChainClient, credentials::CredentialStore, errors::WalletError, paths::WalletPaths,
    store::SettingsStore,
    wallet::{SendOverrides, Wallet},
};

#[derive(Parser, Debug)]
#[command(name = "ethwallet", version, about = "Single-account Ethereum wallet")]
struct Cli {
    #[command(subcommand)]
    cmd: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Generate a new account and store it encrypted under a password.
    CreateAccount {
        /// Replace an existing wallet. The old files are kept as timestamped `.bak` copies.
        #[arg(long, default_value_t = false)]
        force: bool,
    },

    /// Print the account balance in ether.
    CheckBalance,

    /// Send ether to an address.
    SendEther {
        /// Amount in ether, e.g. `0.01`.
        ether: String,
        /// Recipient address (`0x` + 40 hex digits).
        to: String,
        /// Override `[tx] gas_limit`.
        #[arg(long)]
        gas_limit: Option<u64>,
        /// Override `[tx] gas_price_gwei`.
        #[arg(long)]
        gas_price_gwei: Option<String>,
    },

    /// Print resolved paths (useful for debugging).
    Paths,
}

fn init_logging(paths: &WalletPaths) -> tracing_appender::non_blocking::WorkerGuard {
    let env_filter = tracing_subscriber::EnvFilter::from_default_env();
    let file_name = paths
        .log_file
        .file_name()
        .and_then(|s| s.to_str())
        .unwrap_or("ethwallet.log.jsonl");
    let file_appender = tracing_appender::rolling::never(&paths.wallet_dir, file_name);
    let (file_writer, guard) = tracing_appender::non_blocking(file_appender);

    let stderr_layer = tracing_subscriber::fmt::layer()
        .json()
        .with_writer(std::io::stderr)
        .with_filter(env_filter.clone());
    let file_layer = tracing_subscriber::fmt::layer()
        .json()
        .with_writer(file_writer)
        .with_filter(env_filter);

    tracing_subscriber::registry()
        .with(stderr_layer)
        .with(file_layer)
        .init();

    guard
}

fn stdout_line(s: &str) -> eyre::Result<()> {
    writeln!(std::io::stdout().lock(), "{s}").context("write stdout")
}

fn open_wallet(paths: &WalletPaths) -> eyre::Result<Wallet<RpcChainClient>> {
    let settings = SettingsStore::new(paths).load()?;
    let credentials = CredentialStore::new(paths.clone(), settings.keystore.work());
    let chain = RpcChainClient::new(&settings.rpc)?;
    tracing::debug!(rpc = ?chain.urls(), "rpc endpoints");
    Ok(Wallet::new(credentials, chain, settings.tx))
}

/// Tell the user which account the password prompt is for.
fn announce_account(wallet: &Wallet<RpcChainClient>) {
    if let Ok(address) = wallet.credentials().stored_address() {
        cli_output::print_notice(&format!("Account {address}"));
    }
}

async fn run(cmd: Command, paths: &WalletPaths) -> eyre::Result<()> {
    match cmd {
        Command::CreateAccount { force } => {
            let wallet = open_wallet(paths)?;
            // Fail before prompting; the store checks again under its lock.
            if !force && wallet.credentials().is_initialized() {
                return Err(
                    WalletError::AlreadyExists(paths.wallet_dir.display().to_string()).into(),
                );
            }
            let password = cli_output::read_new_password()?;
            let address = wallet
                .create_account(&password, force)
                .context("create account")?;
            SettingsStore::new(paths).init_if_missing()?;
            stdout_line(&format!("Account created: {address}"))?;
            cli_output::print_notice(&format!(
                "Keyfile: {}\nThere is no way to recover the key without the password.",
                paths.keyfile.display()
            ));
            Ok(())
        }
        Command::CheckBalance => {
            let wallet = open_wallet(paths)?;
            announce_account(&wallet);
            let password = cli_output::read_password()?;
            let balance = wallet
                .check_balance(&password)
                .await
                .context("check balance")?;
            stdout_line(&format!("{}: {} ETH", balance.address, balance.ether()))
        }
        Command::SendEther {
            ether,
            to,
            gas_limit,
            gas_price_gwei,
        } => {
            let wallet = open_wallet(paths)?;
            announce_account(&wallet);
            let password = cli_output::read_password()?;
            let overrides = SendOverrides {
                gas_limit,
                gas_price_gwei,
            };
            let hash = wallet
                .send_ether(&password, &ether, &to, &overrides)
                .await
                .context("send ether")?;
            stdout_line(&format!("Sent {ether} ETH to {to}\nTransaction hash: {hash}"))
        }
        Command::Paths => {
            let s = serde_json::to_string(paths).context("serialize paths")?;
            stdout_line(&s)
        }
    }
}

#[tokio::main]
async fn main() -> eyre::Result<()> {
    color_eyre::install()?;
    let cli = Cli::parse();

    let paths = WalletPaths::discover()?;
    paths.ensure_private_dir().context("create wallet dir")?;
    let _log_guard = init_logging(&paths);

    let res = run(cli.cmd, &paths).await;
    if let Err(e) = &res {
        let code = WalletError::find(e).map_or("internal", WalletError::code);
        tracing::error!(code, error = %e, "command failed");
    }
    res
}
