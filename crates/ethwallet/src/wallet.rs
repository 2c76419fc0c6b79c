use crate::{
    amount::{format_ether, parse_ether, parse_gwei},
    chain::ChainClient,
    config::TxConfig,
    credentials::CredentialStore,
    errors::WalletError,
    tx::{build_transaction, parse_address, sign},
};
use alloy::primitives::{Address, B256, U256};
use secrecy::SecretString;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Balance {
    pub address: Address,
    pub wei: U256,
}

impl Balance {
    /// Exact decimal ether, trailing zeros trimmed.
    pub fn ether(&self) -> String {
        format_ether(self.wei)
    }
}

/// Per-send replacements for the `[tx]` settings.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SendOverrides {
    pub gas_limit: Option<u64>,
    pub gas_price_gwei: Option<String>,
}

/// The three user operations, over a credential store and a chain client.
#[derive(Debug)]
pub struct Wallet<C> {
    credentials: CredentialStore,
    chain: C,
    tx: TxConfig,
}

impl<C: ChainClient> Wallet<C> {
    pub const fn new(credentials: CredentialStore, chain: C, tx: TxConfig) -> Self {
        Self {
            credentials,
            chain,
            tx,
        }
    }

    pub const fn credentials(&self) -> &CredentialStore {
        &self.credentials
    }

    pub fn create_account(&self, password: &SecretString, force: bool) -> eyre::Result<Address> {
        self.credentials.create_account(password, force)
    }

    /// Unlock to prove the password, then ask the node for the balance.
    pub async fn check_balance(&self, password: &SecretString) -> eyre::Result<Balance> {
        let address = self.credentials.load_credentials(password)?.address();
        let wei = self.chain.get_balance(address).await?;
        tracing::info!(%address, %wei, "balance fetched");
        Ok(Balance { address, wei })
    }

    /// Transfer `ether` to `to`. Returns the transaction hash reported by the node.
    pub async fn send_ether(
        &self,
        password: &SecretString,
        ether: &str,
        to: &str,
        overrides: &SendOverrides,
    ) -> eyre::Result<B256> {
        let gas_limit = overrides.gas_limit.unwrap_or(self.tx.gas_limit);
        let gas_price_gwei = overrides
            .gas_price_gwei
            .as_deref()
            .unwrap_or(&self.tx.gas_price_gwei);

        // Cheap checks first: a typo should not cost a key derivation.
        parse_address(to)?;
        parse_ether(ether)?;
        parse_gwei(gas_price_gwei)?;
        if gas_limit == 0 {
            return Err(WalletError::amount("gas limit must be positive").into());
        }

        let key = self.credentials.load_credentials(password)?;
        let sender = key.address();
        let nonce = self.chain.get_nonce(sender).await?;
        let chain_id = match self.tx.chain_id {
            Some(id) => id,
            None => self.chain.get_chain_id().await?,
        };

        let request = build_transaction(nonce, sender, to, ether, gas_limit, gas_price_gwei)?
            .with_chain_id(chain_id);
        let signed = sign(&request, &key)?;
        drop(key);
        if signed.recover_sender()? != sender {
            eyre::bail!("signature does not recover to {sender}");
        }

        tracing::info!(
            from = %sender,
            to = %request.recipient,
            wei = %request.value,
            nonce,
            chain_id,
            hash = %signed.hash,
            "submitting transfer"
        );
        let hash = self.chain.submit_raw_transaction(&signed.raw).await?;
        if hash != signed.hash {
            tracing::warn!(node = %hash, local = %signed.hash, "node reported a different hash");
        }
        Ok(hash)
    }
}
