use super::any_tx::AnyTx;
use serde::Deserialize;
use solana_sdk::{
    hash::Hash,
    pubkey::Pubkey,
    signature::Signature,
    transaction::TransactionError,
};

/// Recent blockhash together with the last block height it is accepted at.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Freshness {
    pub blockhash: Hash,
    pub last_valid_block_height: u64,
}

#[derive(Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
pub struct SendOptions {
    #[serde(default = "default_skip_preflight")]
    pub skip_preflight: bool,
    #[serde(default)]
    pub max_retries: Option<usize>,
}

fn default_skip_preflight() -> bool {
    true
}

impl Default for SendOptions {
    fn default() -> Self {
        Self {
            skip_preflight: default_skip_preflight(),
            max_retries: None,
        }
    }
}

/// Status of a submitted signature as seen by the endpoint at the requested commitment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SignatureStatus {
    /// Unknown to the endpoint or below the requested commitment.
    Pending,
    Confirmed,
    Failed(TransactionError),
}

/// Everything the submitter needs from a ledger node.
#[async_trait::async_trait]
pub trait LedgerEndpoint: Send + Sync {
    fn name(&self) -> &str;

    async fn latest_freshness(&self) -> anyhow::Result<Freshness>;

    async fn send(&self, tx: &AnyTx, options: SendOptions) -> anyhow::Result<Signature>;

    async fn signature_status(&self, signature: &Signature) -> anyhow::Result<SignatureStatus>;

    async fn block_height(&self) -> anyhow::Result<u64>;

    async fn account_data(&self, address: &Pubkey) -> anyhow::Result<Option<Vec<u8>>>;
}
