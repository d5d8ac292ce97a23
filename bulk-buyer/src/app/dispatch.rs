use super::{batch::Batch, seal::SealedTx};
use futures::future::join_all;
use serde::Deserialize;
use services_common::{
    solana::endpoint::{Freshness, LedgerEndpoint, SendOptions, SignatureStatus},
    utils::repeat_until_ok,
};
use solana_sdk::{pubkey::Pubkey, signature::Signature};
use std::{sync::Arc, time::Duration};
use tracing::{debug, info, instrument, warn};

#[derive(Deserialize, Debug, Clone, serde_derive_default::Default)]
pub struct DispatchConfig {
    /// Used for fire-and-forget submissions.
    #[serde(default)]
    pub broadcast: SendOptions,
    /// Used for submissions awaited until confirmation.
    #[serde(default = "default_confirmed_send")]
    pub confirmed: SendOptions,
    #[serde(with = "humantime_serde", default = "default_poll_interval")]
    pub poll_interval: Duration,
    /// Consecutive failed status or block height requests tolerated per poll.
    /// Zero means the first failure rejects the transaction.
    #[serde(default = "default_poll_max_errors")]
    pub poll_max_errors: u64,
}

fn default_confirmed_send() -> SendOptions {
    SendOptions {
        skip_preflight: false,
        max_retries: None,
    }
}

fn default_poll_interval() -> Duration {
    Duration::from_millis(500)
}

fn default_poll_max_errors() -> u64 {
    5
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SubmissionOutcome {
    Accepted,
    Rejected(String),
}

/// One send attempt of one transaction to one endpoint.
#[derive(Debug, Clone)]
pub struct SubmissionRecord {
    pub endpoint: String,
    pub signature: Signature,
    pub wallets: Vec<Pubkey>,
    pub outcome: SubmissionOutcome,
}

/// Sends every transaction to every endpoint at once and waits for all sends to finish.
/// Returns exactly `txs.len() * endpoints.len()` records; no attempt cancels another.
pub async fn broadcast(
    endpoints: &[Arc<dyn LedgerEndpoint>],
    txs: &[SealedTx],
    options: SendOptions,
) -> Vec<SubmissionRecord> {
    let attempts = txs.iter().flat_map(move |sealed| {
        endpoints.iter().map(move |endpoint| async move {
            let signature = sealed.tx.signature();
            let outcome = match endpoint.send(&sealed.tx, options).await {
                Ok(_) => {
                    debug!("{signature} accepted by {}", endpoint.name());
                    SubmissionOutcome::Accepted
                }
                Err(err) => {
                    warn!("{signature} rejected by {}: {err:#}", endpoint.name());
                    SubmissionOutcome::Rejected(format!("{err:#}"))
                }
            };
            SubmissionRecord {
                endpoint: endpoint.name().to_owned(),
                signature,
                wallets: sealed.wallets.clone(),
                outcome,
            }
        })
    });
    join_all(attempts).await
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfirmationOutcome {
    Confirmed,
    Rejected(String),
    /// The blockhash aged out before the transaction was seen confirmed.
    Expired,
}

#[derive(Debug, Clone)]
pub struct ConfirmedRecord {
    pub signature: Signature,
    pub wallets: Vec<Pubkey>,
    pub outcome: ConfirmationOutcome,
}

impl ConfirmedRecord {
    pub fn is_confirmed(&self) -> bool {
        self.outcome == ConfirmationOutcome::Confirmed
    }
}

/// Seals each batch with a freshly fetched blockhash, sends it and waits for its outcome
/// before touching the next one.
pub async fn submit_sequentially<F>(
    endpoint: &dyn LedgerEndpoint,
    batches: Vec<Batch>,
    mut seal_with: F,
    config: &DispatchConfig,
) -> anyhow::Result<Vec<ConfirmedRecord>>
where
    F: FnMut(Batch, Freshness) -> anyhow::Result<SealedTx>,
{
    let total = batches.len();
    let mut records = Vec::with_capacity(total);
    for (position, batch) in batches.into_iter().enumerate() {
        let freshness = endpoint.latest_freshness().await?;
        let sealed = seal_with(batch, freshness)?;
        let record = submit_confirmed(endpoint, &sealed, config).await;
        info!(
            "transaction {}/{total} {}: {:?}",
            position + 1,
            record.signature,
            record.outcome
        );
        records.push(record);
    }
    Ok(records)
}

/// Sends one transaction and polls until it is confirmed, fails, or its blockhash expires.
#[instrument(skip_all, fields(signature = %sealed.tx.signature()))]
pub async fn submit_confirmed(
    endpoint: &dyn LedgerEndpoint,
    sealed: &SealedTx,
    config: &DispatchConfig,
) -> ConfirmedRecord {
    let signature = sealed.tx.signature();
    let outcome = match endpoint.send(&sealed.tx, config.confirmed).await {
        Ok(_) => await_confirmation(endpoint, &signature, &sealed.freshness, config).await,
        Err(err) => ConfirmationOutcome::Rejected(format!("{err:#}")),
    };
    ConfirmedRecord {
        signature,
        wallets: sealed.wallets.clone(),
        outcome,
    }
}

async fn await_confirmation(
    endpoint: &dyn LedgerEndpoint,
    signature: &Signature,
    freshness: &Freshness,
    config: &DispatchConfig,
) -> ConfirmationOutcome {
    let attempts = config.poll_max_errors.saturating_add(1);
    loop {
        let status = repeat_until_ok(
            || endpoint.signature_status(signature),
            attempts,
            config.poll_interval,
        )
        .await;
        match status {
            Ok(SignatureStatus::Confirmed) => return ConfirmationOutcome::Confirmed,
            Ok(SignatureStatus::Failed(err)) => {
                return ConfirmationOutcome::Rejected(err.to_string())
            }
            Ok(SignatureStatus::Pending) => {}
            Err(err) => {
                return ConfirmationOutcome::Rejected(format!("status unavailable: {err:#}"))
            }
        }

        let height =
            repeat_until_ok(|| endpoint.block_height(), attempts, config.poll_interval).await;
        match height {
            Ok(height) if height > freshness.last_valid_block_height => {
                return ConfirmationOutcome::Expired
            }
            Ok(_) => debug!("transaction not confirmed yet"),
            Err(err) => {
                warn!("block height unavailable: {err:#}");
                return ConfirmationOutcome::Rejected(format!(
                    "block height unavailable: {err:#}"
                ));
            }
        }
        tokio::time::sleep(config.poll_interval).await;
    }
}
