use thiserror::Error;

/// Failures a wallet command reports to the user.
///
/// Operations return `eyre::Result`; these values travel inside the report so callers can
/// recover the kind with [`WalletError::find`] regardless of the context layered on top.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum WalletError {
    #[error("no wallet found; run `ethwallet create-account` first")]
    NotInitialized,

    #[error("a wallet already exists at {0}; pass --force to replace it (old files are kept as .bak)")]
    AlreadyExists(String),

    #[error("incorrect password")]
    InvalidPassword,

    #[error("corrupt keyfile: {0}")]
    CorruptKeyfile(String),

    #[error("invalid address: {0}")]
    InvalidAddress(String),

    #[error("invalid amount: {0}")]
    InvalidAmount(String),

    #[error("node unreachable: {0}")]
    NodeUnreachable(String),

    #[error("transaction rejected by node: {0}")]
    RejectedByNode(String),

    #[error("wallet busy; another ethwallet process is using it")]
    WalletBusy,
}

impl WalletError {
    pub const fn code(&self) -> &'static str {
        match self {
            Self::NotInitialized => "not_initialized",
            Self::AlreadyExists(_) => "already_exists",
            Self::InvalidPassword => "invalid_password",
            Self::CorruptKeyfile(_) => "corrupt_keyfile",
            Self::InvalidAddress(_) => "invalid_address",
            Self::InvalidAmount(_) => "invalid_amount",
            Self::NodeUnreachable(_) => "node_unreachable",
            Self::RejectedByNode(_) => "rejected_by_node",
            Self::WalletBusy => "wallet_busy",
        }
    }

    /// Find the structured error carried by a report, if any.
    pub fn find(report: &eyre::Report) -> Option<&Self> {
        report.downcast_ref::<Self>()
    }

    pub(crate) fn corrupt(detail: impl Into<String>) -> Self {
        Self::CorruptKeyfile(detail.into())
    }

    pub(crate) fn amount(detail: impl Into<String>) -> Self {
        Self::InvalidAmount(detail.into())
    }
}
