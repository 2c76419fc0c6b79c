use crate::{
    config::RpcConfig,
    errors::WalletError,
    retry::{try_all_with_backoff, BackoffConfig},
};
use alloy::{
    primitives::{keccak256, Address, B256, U256},
    providers::{Provider as _, RootProvider},
    transports::{RpcError, TransportErrorKind},
};
use eyre::Context as _;
use reqwest::Client;
use std::{future::Future, time::Duration};

type EvmProvider = RootProvider;

/// What the wallet needs from an Ethereum node.
pub trait ChainClient: Send + Sync {
    /// Balance in wei at the latest block.
    fn get_balance(&self, address: Address) -> impl Future<Output = eyre::Result<U256>> + Send;

    /// Pending transaction count, i.e. the next nonce to use.
    fn get_nonce(&self, address: Address) -> impl Future<Output = eyre::Result<u64>> + Send;

    fn get_chain_id(&self) -> impl Future<Output = eyre::Result<u64>> + Send;

    /// Broadcast a signed transaction. Fails with `NodeUnreachable` or `RejectedByNode`.
    fn submit_raw_transaction(&self, raw: &[u8])
        -> impl Future<Output = eyre::Result<B256>> + Send;
}

fn is_unreachable(err: &eyre::Report) -> bool {
    matches!(WalletError::find(err), Some(WalletError::NodeUnreachable(_)))
}

/// A JSON-RPC error object is the node's verdict; anything else means we never got one.
fn classify(url: &str, err: &RpcError<TransportErrorKind>) -> WalletError {
    err.as_error_resp().map_or_else(
        || WalletError::NodeUnreachable(format!("{url}: {err}")),
        |payload| WalletError::RejectedByNode(payload.message.to_string()),
    )
}

/// Nodes answer a resubmission of a transaction they already hold with one of these.
fn is_already_known(message: &str) -> bool {
    let s = message.to_lowercase();
    s.contains("already known")
        || s.contains("known transaction")
        || s.contains("already imported")
        || s.contains("already in mempool")
}

/// `ChainClient` over HTTP JSON-RPC with fallback endpoints.
#[derive(Debug, Clone)]
pub struct RpcChainClient {
    urls: Vec<String>,
    backoff: BackoffConfig,
    timeout: Duration,
    connect_timeout: Duration,
}

impl RpcChainClient {
    pub fn new(cfg: &RpcConfig) -> eyre::Result<Self> {
        let urls = cfg.urls();
        if urls.is_empty() {
            eyre::bail!("no rpc url configured (set [rpc] url in settings.toml or ETHWALLET_RPC_URL)");
        }
        Ok(Self {
            urls,
            backoff: BackoffConfig::with_rounds(cfg.retry_rounds),
            timeout: Duration::from_secs(cfg.timeout_seconds.max(1)),
            connect_timeout: Duration::from_secs(cfg.connect_timeout_seconds.max(1)),
        })
    }

    #[cfg(test)]
    #[must_use]
    pub fn with_backoff(mut self, backoff: BackoffConfig) -> Self {
        self.backoff = backoff;
        self
    }

    pub fn urls(&self) -> &[String] {
        &self.urls
    }

    fn provider_for_url(&self, url: &str) -> eyre::Result<EvmProvider> {
        let u: reqwest::Url = url
            .parse()
            .with_context(|| format!("invalid rpc url: {url}"))?;
        let client = Client::builder()
            .timeout(self.timeout)
            .connect_timeout(self.connect_timeout)
            .build()
            .context("build rpc http client")?;
        let http = alloy::transports::http::Http::with_client(client, u);
        let rpc_client = alloy::rpc::client::RpcClient::new(http, false);
        Ok(RootProvider::new(rpc_client))
    }

    /// Read-only call: every endpoint in turn, retried with backoff while nodes are unreachable.
    async fn with_fallback_and_backoff<T, Fut>(
        &self,
        context_label: &'static str,
        f: impl Fn(EvmProvider, String) -> Fut + Sync,
    ) -> eyre::Result<T>
    where
        T: Send,
        Fut: Future<Output = eyre::Result<T>> + Send,
    {
        try_all_with_backoff(
            &self.urls,
            &self.backoff,
            |u| {
                let u = u.clone();
                let f = &f;
                async move {
                    let p = self.provider_for_url(&u)?;
                    f(p, u).await
                }
            },
            is_unreachable,
            context_label,
        )
        .await
    }
}

impl ChainClient for RpcChainClient {
    async fn get_balance(&self, address: Address) -> eyre::Result<U256> {
        self.with_fallback_and_backoff("get balance", |p, url| async move {
            p.get_balance(address)
                .await
                .map_err(|e| eyre::Report::from(classify(&url, &e)))
        })
        .await
    }

    async fn get_nonce(&self, address: Address) -> eyre::Result<u64> {
        self.with_fallback_and_backoff("get nonce", |p, url| async move {
            p.get_transaction_count(address)
                .pending()
                .await
                .map_err(|e| eyre::Report::from(classify(&url, &e)))
        })
        .await
    }

    async fn get_chain_id(&self) -> eyre::Result<u64> {
        self.with_fallback_and_backoff("get chain id", |p, url| async move {
            p.get_chain_id()
                .await
                .map_err(|e| eyre::Report::from(classify(&url, &e)))
        })
        .await
    }

    async fn submit_raw_transaction(&self, raw: &[u8]) -> eyre::Result<B256> {
        // Each endpoint gets the same bytes once; a rejection is final.
        let local_hash = keccak256(raw);
        let mut last: Option<WalletError> = None;
        for url in &self.urls {
            let p = self.provider_for_url(url)?;
            match p.send_raw_transaction(raw).await {
                Ok(pending) => {
                    let hash = *pending.tx_hash();
                    tracing::info!(%hash, rpc = %url, "transaction submitted");
                    return Ok(hash);
                }
                Err(e) => match classify(url, &e) {
                    WalletError::RejectedByNode(m) if is_already_known(&m) => {
                        tracing::info!(hash = %local_hash, rpc = %url, "node already has transaction");
                        return Ok(local_hash);
                    }
                    WalletError::NodeUnreachable(m) => {
                        tracing::warn!(rpc = %url, error = %m, "submit failed; trying next endpoint");
                        last = Some(WalletError::NodeUnreachable(m));
                    }
                    other => return Err(other.into()),
                },
            }
        }
        Err(last
            .unwrap_or_else(|| WalletError::NodeUnreachable("no rpc endpoints".into()))
            .into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use eyre::ContextCompat as _;

    fn closed_port_client() -> eyre::Result<RpcChainClient> {
        let cfg = RpcConfig {
            url: "http://127.0.0.1:1".into(),
            timeout_seconds: 2,
            connect_timeout_seconds: 1,
            ..Default::default()
        };
        Ok(RpcChainClient::new(&cfg)?.with_backoff(BackoffConfig {
            rounds: 1,
            ..Default::default()
        }))
    }

    #[test]
    fn error_responses_are_rejections() -> eyre::Result<()> {
        let err: RpcError<TransportErrorKind> = RpcError::ErrorResp(serde_json::from_str(
            r#"{"code": -32000, "message": "nonce too low"}"#,
        )?);
        assert_eq!(
            classify("http://node", &err),
            WalletError::RejectedByNode("nonce too low".into())
        );
        Ok(())
    }

    #[test]
    fn transport_failures_are_unreachable() {
        let err = TransportErrorKind::custom_str("connection refused");
        assert!(matches!(
            classify("http://node", &err),
            WalletError::NodeUnreachable(m) if m.contains("http://node")
        ));
    }

    #[test]
    fn recognizes_duplicate_submissions() {
        assert!(is_already_known("already known"));
        assert!(is_already_known("Known transaction: 0xabc"));
        assert!(is_already_known("transaction already imported"));
        assert!(!is_already_known("nonce too low"));
        assert!(!is_already_known("insufficient funds for gas * price + value"));
    }

    #[test]
    fn needs_at_least_one_url() {
        let cfg = RpcConfig {
            url: " ".into(),
            ..Default::default()
        };
        assert!(RpcChainClient::new(&cfg).is_err());
    }

    #[tokio::test]
    async fn closed_port_is_node_unreachable() -> eyre::Result<()> {
        let client = closed_port_client()?;
        let e = client
            .get_balance(Address::ZERO)
            .await
            .err()
            .context("expected get_balance to fail")?;
        assert!(is_unreachable(&e), "{e:?}");

        let e = client
            .submit_raw_transaction(&[0xf8, 0x01])
            .await
            .err()
            .context("expected submit to fail")?;
        assert!(is_unreachable(&e), "{e:?}");
        Ok(())
    }
}
