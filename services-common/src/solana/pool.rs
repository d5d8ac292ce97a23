use super::{
    any_tx::AnyTx,
    endpoint::{Freshness, LedgerEndpoint, SendOptions, SignatureStatus},
};
use crate::utils::limiter::{LimiterGuard, RateLimitConfig};
use anyhow::{bail, Context as _};
use derive_more::derive::Deref;
use serde::Deserialize;
use solana_client::{nonblocking::rpc_client::RpcClient, rpc_config::RpcSendTransactionConfig};
use solana_sdk::{
    commitment_config::{CommitmentConfig, CommitmentLevel},
    pubkey::Pubkey,
    signature::Signature,
};
use std::sync::{atomic, Arc};

#[derive(Deserialize, Debug, Clone)]
pub struct SolanaPoolConfig {
    pub rpc_clients: Vec<SolanaClientConfig>,
}

/// All configured ledger endpoints.
/// Reads go to one endpoint picked round-robin, broadcasts go to every endpoint.
#[derive(Clone)]
pub struct SolanaPool {
    endpoints: Arc<Balancer<Arc<dyn LedgerEndpoint>>>,
}

impl SolanaPool {
    pub fn from_cfg(cfg: SolanaPoolConfig) -> anyhow::Result<Self> {
        let endpoints = cfg
            .rpc_clients
            .into_iter()
            .map(|client_cfg| Arc::new(SolanaRpcClient::new(client_cfg)) as Arc<dyn LedgerEndpoint>)
            .collect();
        Self::from_endpoints(endpoints)
    }

    pub fn from_endpoints(endpoints: Vec<Arc<dyn LedgerEndpoint>>) -> anyhow::Result<Self> {
        if endpoints.is_empty() {
            bail!("at least one ledger endpoint must be configured");
        }
        Ok(Self {
            endpoints: Arc::new(Balancer::new(endpoints)),
        })
    }

    pub fn rpc_client(&self) -> &Arc<dyn LedgerEndpoint> {
        self.endpoints.next()
    }

    /// First configured endpoint. Used where every call must observe the same node.
    pub fn primary(&self) -> &Arc<dyn LedgerEndpoint> {
        &self.endpoints.data[0]
    }

    pub fn endpoints(&self) -> &[Arc<dyn LedgerEndpoint>] {
        &self.endpoints.data
    }
}

#[derive(Deref)]
pub struct SolanaRpcClient {
    name: String,
    #[deref]
    rpc_client: LimiterGuard<RpcClient>,
}

impl SolanaRpcClient {
    pub fn new(config: SolanaClientConfig) -> Self {
        let url = config.node.rpc_url();
        let name = config.name.unwrap_or_else(|| config.node.display_name());
        let rpc_client =
            RpcClient::new_with_commitment(url, CommitmentConfig { commitment: config.commitment });
        let rpc_client = LimiterGuard::new(rpc_client, config.limit.limiter());
        Self { name, rpc_client }
    }
}

#[async_trait::async_trait]
impl LedgerEndpoint for SolanaRpcClient {
    fn name(&self) -> &str {
        &self.name
    }

    async fn latest_freshness(&self) -> anyhow::Result<Freshness> {
        let client = self.use_single().await;
        let (blockhash, last_valid_block_height) = client
            .get_latest_blockhash_with_commitment(client.commitment())
            .await
            .with_context(|| format!("fetch latest blockhash from {}", self.name))?;
        Ok(Freshness {
            blockhash,
            last_valid_block_height,
        })
    }

    async fn send(&self, tx: &AnyTx, options: SendOptions) -> anyhow::Result<Signature> {
        let client = self.use_single().await;
        let config = RpcSendTransactionConfig {
            skip_preflight: options.skip_preflight,
            preflight_commitment: Some(client.commitment().commitment),
            max_retries: options.max_retries,
            ..Default::default()
        };
        client
            .send_transaction_with_config(tx, config)
            .await
            .with_context(|| format!("send transaction via {}", self.name))
    }

    async fn signature_status(&self, signature: &Signature) -> anyhow::Result<SignatureStatus> {
        let client = self.use_single().await;
        let status = client
            .get_signature_status_with_commitment(signature, client.commitment())
            .await
            .with_context(|| format!("fetch status of {signature} from {}", self.name))?;
        Ok(match status {
            None => SignatureStatus::Pending,
            Some(Ok(())) => SignatureStatus::Confirmed,
            Some(Err(err)) => SignatureStatus::Failed(err),
        })
    }

    async fn block_height(&self) -> anyhow::Result<u64> {
        let client = self.use_single().await;
        client
            .get_block_height_with_commitment(client.commitment())
            .await
            .with_context(|| format!("fetch block height from {}", self.name))
    }

    async fn account_data(&self, address: &Pubkey) -> anyhow::Result<Option<Vec<u8>>> {
        let client = self.use_single().await;
        let response = client
            .get_account_with_commitment(address, client.commitment())
            .await
            .with_context(|| format!("fetch account {address} from {}", self.name))?;
        Ok(response.value.map(|account| account.data))
    }
}

#[derive(Deserialize, Debug, Clone)]
pub struct SolanaClientConfig {
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    limit: RateLimitConfig,
    #[serde(default = "default_commitment")]
    commitment: CommitmentLevel,
    node: NodeType,
}

fn default_commitment() -> CommitmentLevel {
    CommitmentLevel::Confirmed
}

#[derive(Deserialize, Debug, Clone)]
#[serde(tag = "type")]
#[serde(rename_all = "lowercase")]
pub enum NodeType {
    Helius { api_key: String },
    Any { rpc_url: String },
}

impl NodeType {
    pub fn rpc_url(&self) -> String {
        match self {
            NodeType::Helius { api_key } => {
                format!("https://mainnet.helius-rpc.com?api-key={}", api_key)
            }
            NodeType::Any { rpc_url } => rpc_url.clone(),
        }
    }

    /// Name safe for logs: never includes the api key.
    pub fn display_name(&self) -> String {
        match self {
            NodeType::Helius { .. } => "helius".to_owned(),
            NodeType::Any { rpc_url } => rpc_url
                .split('?')
                .next()
                .unwrap_or(rpc_url.as_str())
                .to_owned(),
        }
    }
}

struct Balancer<T> {
    data: Vec<T>,
    current_pos: atomic::AtomicUsize,
}

impl<T> Balancer<T> {
    fn new(data: Vec<T>) -> Self {
        Self {
            data,
            current_pos: atomic::AtomicUsize::default(),
        }
    }

    fn next(&self) -> &T {
        let length = self.data.len();
        let pos = self
            .current_pos
            .fetch_update(atomic::Ordering::SeqCst, atomic::Ordering::SeqCst, |x| {
                Some((x + 1) % length)
            })
            .expect("invariant: always ok");
        &self.data[pos]
    }
}
