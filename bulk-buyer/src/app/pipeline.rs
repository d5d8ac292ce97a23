use super::{
    batch::{accumulate, Batch, BatchingConfig, Operation},
    dispatch::{
        broadcast, submit_sequentially, ConfirmedRecord, DispatchConfig, SubmissionOutcome,
        SubmissionRecord,
    },
    instructions::{
        pumpfun::{self, BuyCalculator, BuyTarget, CurveState, TokenMetadata},
        token, InstructionsConfig,
    },
    keystore::{Keystore, Wallet},
    seal::{seal, SealedTx},
};
use crate::solana::SolanaKeys;
use anyhow::{bail, Context as _};
use derive_more::Deref;
use serde::Deserialize;
use serde_with::{serde_as, DisplayFromStr};
use services_common::{
    solana::{endpoint::LedgerEndpoint, pool::SolanaPool},
    utils::keypair::SaneKeypair,
};
use solana_sdk::{pubkey::Pubkey, signature::Signature};
use std::{collections::HashMap, sync::Arc};
use tracing::{info, instrument, warn};

#[serde_as]
#[derive(Debug, Clone, Deserialize)]
pub struct PipelineConfig {
    /// Token to buy. A test token is launched when absent.
    #[serde_as(as = "Option<DisplayFromStr>")]
    #[serde(default)]
    pub mint: Option<Pubkey>,
    #[serde(default = "default_launch")]
    pub launch: TokenMetadata,
    #[serde(default = "default_native_funding")]
    pub native_funding_lamports: u64,
    #[serde(default = "default_wsol_funding")]
    pub wsol_funding_lamports: u64,
    #[serde(default)]
    pub purchase: PurchasePolicy,
}

fn default_launch() -> TokenMetadata {
    TokenMetadata {
        name: "name".to_owned(),
        symbol: "symbol".to_owned(),
        uri: "uri".to_owned(),
    }
}

fn default_native_funding() -> u64 {
    10_000_000
}

fn default_wsol_funding() -> u64 {
    10_000
}

/// How much each wallet spends on the buy, fee included.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PurchasePolicy {
    Flat { lamports: u64 },
    /// Per-wallet `solAmount` from the keystore summary. Wallets without one are skipped.
    PerWallet,
}

impl Default for PurchasePolicy {
    fn default() -> Self {
        Self::Flat { lamports: 10_000 }
    }
}

/// Per-wallet result of the buy stage.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BuyReport {
    pub transactions: usize,
    pub submissions: usize,
    /// Wallets whose transaction was accepted by at least one endpoint.
    pub accepted: Vec<Pubkey>,
    pub rejected: Vec<Pubkey>,
}

impl BuyReport {
    pub fn tally(records: &[SubmissionRecord]) -> Self {
        let mut order: Vec<&SubmissionRecord> = vec![];
        let mut any_accepted: HashMap<Signature, bool> = HashMap::new();
        for record in records {
            let accepted = record.outcome == SubmissionOutcome::Accepted;
            any_accepted
                .entry(record.signature)
                .and_modify(|known| *known |= accepted)
                .or_insert_with(|| {
                    order.push(record);
                    accepted
                });
        }

        let mut report = BuyReport {
            transactions: order.len(),
            submissions: records.len(),
            ..Default::default()
        };
        for record in order {
            let bucket = if any_accepted[&record.signature] {
                &mut report.accepted
            } else {
                &mut report.rejected
            };
            bucket.extend(record.wallets.iter().copied());
        }
        report
    }
}

#[derive(Clone, Deref)]
struct Tools {
    internal: Arc<ToolsInternal>,
}

struct ToolsInternal {
    solana_pool: SolanaPool,
    solana_keys: SolanaKeys,
    keystore: Keystore,

    batching: BatchingConfig,
    dispatch: DispatchConfig,
    pipeline: PipelineConfig,
    instructions: InstructionsConfig,
}

pub struct RunConfig {
    pub batching: BatchingConfig,
    pub dispatch: DispatchConfig,
    pub pipeline: PipelineConfig,
    pub instructions: InstructionsConfig,
}

/// Runs the stages in fixed order: wallets, optional launch, token accounts for the mint
/// and for WSOL, native funding, WSOL wrap, WSOL funding, buy.
/// The first failing stage stops the run. Nothing is rolled back.
pub struct BulkBuyer {
    tools: Tools,
}

impl BulkBuyer {
    pub fn new(
        solana_pool: SolanaPool,
        solana_keys: SolanaKeys,
        keystore: Keystore,
        config: RunConfig,
    ) -> Self {
        let tools = Tools {
            internal: Arc::new(ToolsInternal {
                solana_pool,
                solana_keys,
                keystore,
                batching: config.batching,
                dispatch: config.dispatch,
                pipeline: config.pipeline,
                instructions: config.instructions,
            }),
        };
        Self { tools }
    }

    pub async fn run(&self) -> anyhow::Result<BuyReport> {
        info!("fee payer: {}", self.payer().key());
        let wallets = self.tools.keystore.ensure_wallets().await?;

        let mint = match self.tools.pipeline.mint {
            Some(mint) => mint,
            None => self.launch_token().await?,
        };

        self.create_accounts(&wallets, &mint).await?;
        info!("created {mint} token accounts for {} wallets", wallets.len());
        self.create_accounts(&wallets, &token::wsol_mint()).await?;
        info!("created wsol token accounts for {} wallets", wallets.len());

        self.fund_native(&wallets).await?;
        info!("wallets funded with sol");
        self.wrap_sol(wallets.len()).await?;
        self.fund_wsol(&wallets).await?;
        info!("wallets funded with wsol");

        let report = self.buy(&wallets, &mint).await?;
        info!(
            "tokens bought: {} wallets accepted, {} rejected",
            report.accepted.len(),
            report.rejected.len()
        );
        Ok(report)
    }

    /// Launches a fresh token with the payer as creator and returns its mint.
    #[instrument(skip(self))]
    pub async fn launch_token(&self) -> anyhow::Result<Pubkey> {
        let payer = self.payer();
        let mint = SaneKeypair::new();
        info!("launching test token {}", mint.key());

        let create = pumpfun::create(&mint.key(), &payer.key(), &self.tools.pipeline.launch)?;
        let batch = Batch::single(
            &self.tools.batching.funding.policy(),
            Operation::signed_by(&mint, vec![create]),
        );
        self.submit_confirmed("launch token", vec![batch]).await?;
        Ok(mint.key())
    }

    /// Creates every wallet's associated account for `mint`. Safe to repeat.
    #[instrument(skip(self, wallets))]
    pub async fn create_accounts(
        &self,
        wallets: &[Wallet],
        mint: &Pubkey,
    ) -> anyhow::Result<Vec<ConfirmedRecord>> {
        let payer = self.payer().key();
        let batches = accumulate(
            wallets,
            &self.tools.batching.create_accounts.policy(),
            |wallet| {
                let owner = wallet.keypair.key();
                Ok(Operation::unsigned(
                    owner,
                    vec![token::create_associated_account(&payer, &owner, mint)],
                ))
            },
        );
        self.submit_confirmed("create accounts", batches).await
    }

    /// Sends native SOL to every wallet. Repeating it pays again.
    pub async fn fund_native(&self, wallets: &[Wallet]) -> anyhow::Result<Vec<SubmissionRecord>> {
        let payer = self.payer().key();
        let lamports = self.tools.pipeline.native_funding_lamports;
        let batches = accumulate(wallets, &self.tools.batching.funding.policy(), |wallet| {
            let wallet = wallet.keypair.key();
            Ok(Operation::unsigned(
                wallet,
                vec![token::transfer_native(&payer, &wallet, lamports)],
            ))
        });
        self.submit_unconfirmed("fund native", batches).await
    }

    /// Wraps enough SOL into the payer's WSOL account to fund `wallets` wallets.
    pub async fn wrap_sol(&self, wallets: usize) -> anyhow::Result<()> {
        let payer = self.payer().key();
        let lamports = self
            .tools
            .pipeline
            .wsol_funding_lamports
            .checked_mul(wallets as u64)
            .context("wsol amount overflows")?;
        if lamports == 0 {
            return Ok(());
        }

        let batch = Batch::single(
            &self.tools.batching.funding.policy(),
            Operation::unsigned(payer, token::wrap_sol(&payer, lamports)?),
        );
        self.submit_confirmed("wrap sol", vec![batch]).await?;
        Ok(())
    }

    /// Sends WSOL from the payer's account to every wallet. Repeating it pays again.
    pub async fn fund_wsol(&self, wallets: &[Wallet]) -> anyhow::Result<Vec<SubmissionRecord>> {
        let payer = self.payer().key();
        let lamports = self.tools.pipeline.wsol_funding_lamports;
        let batches = accumulate(wallets, &self.tools.batching.funding.policy(), |wallet| {
            let wallet = wallet.keypair.key();
            Ok(Operation::unsigned(
                wallet,
                vec![token::transfer_wsol(&payer, &wallet, lamports)?],
            ))
        });
        self.submit_unconfirmed("fund wsol", batches).await
    }

    /// Buys `mint` from every wallet. All transactions share one blockhash and go to every
    /// endpoint. Quotes are computed against a local copy of the curve that is advanced after
    /// each planned purchase; trades landing in between are only bounded by slippage.
    #[instrument(skip(self, wallets))]
    pub async fn buy(&self, wallets: &[Wallet], mint: &Pubkey) -> anyhow::Result<BuyReport> {
        let tools = &self.tools;
        let reader = tools.solana_pool.rpc_client();
        let global = pumpfun::fetch_global(reader.as_ref()).await?;
        let curve_account = pumpfun::fetch_bonding_curve(reader.as_ref(), mint).await?;
        if curve_account.complete {
            bail!("bonding curve of {mint} is complete");
        }
        let summary = match tools.pipeline.purchase {
            PurchasePolicy::PerWallet => Some(tools.keystore.read_summary().await?),
            PurchasePolicy::Flat { .. } => None,
        };

        let target = BuyTarget::new(*mint, &global, &curve_account);
        let mut curve = CurveState::from(&curve_account);
        let batches = accumulate(wallets, &tools.batching.buy.policy(), |wallet| {
            let sols = match tools.pipeline.purchase {
                PurchasePolicy::Flat { lamports } => lamports,
                PurchasePolicy::PerWallet => summary
                    .as_ref()
                    .and_then(|summary| summary.planned_lamports(wallet))
                    .with_context(|| format!("no planned amount for wallet {}", wallet.index))?,
            };
            let params = BuyCalculator::new(&curve, global.buy_fee(), tools.instructions.slippage)
                .fixed_sols(sols);
            if params.tokens == 0 {
                bail!("{sols} lamports buy no tokens for wallet {}", wallet.index);
            }
            let ix = pumpfun::buy(
                &target,
                &wallet.keypair.key(),
                &params,
                tools.instructions.track_volume,
            )?;
            curve.commit_buy(&params);
            Ok(Operation::signed_by(&wallet.keypair, vec![ix]))
        });

        let freshness = tools.solana_pool.primary().latest_freshness().await?;
        let txs = batches
            .into_iter()
            .map(|batch| {
                seal(
                    batch,
                    self.payer(),
                    freshness,
                    tools.batching.message_version,
                )
            })
            .collect::<anyhow::Result<Vec<_>>>()?;
        info!(
            "buying with {} transactions via {} endpoints",
            txs.len(),
            tools.solana_pool.endpoints().len()
        );

        let records = broadcast(
            tools.solana_pool.endpoints(),
            &txs,
            tools.dispatch.broadcast,
        )
        .await;
        let report = BuyReport::tally(&records);
        for wallet in &report.rejected {
            warn!("buy for {wallet} was not accepted by any endpoint");
        }
        Ok(report)
    }

    async fn submit_confirmed(
        &self,
        stage: &str,
        batches: Vec<Batch>,
    ) -> anyhow::Result<Vec<ConfirmedRecord>> {
        let tools = &self.tools;
        let records = submit_sequentially(
            tools.solana_pool.primary().as_ref(),
            batches,
            |batch, freshness| {
                seal(
                    batch,
                    self.payer(),
                    freshness,
                    tools.batching.message_version,
                )
            },
            &tools.dispatch,
        )
        .await?;

        let failed = records.iter().filter(|record| !record.is_confirmed()).count();
        if failed > 0 {
            bail!(
                "{stage}: {failed} of {} transactions were not confirmed",
                records.len()
            );
        }
        Ok(records)
    }

    /// Seals each batch with its own blockhash, then sends them all at once without waiting.
    async fn submit_unconfirmed(
        &self,
        stage: &str,
        batches: Vec<Batch>,
    ) -> anyhow::Result<Vec<SubmissionRecord>> {
        let tools = &self.tools;
        let endpoint = tools.solana_pool.primary();
        let mut txs: Vec<SealedTx> = Vec::with_capacity(batches.len());
        for batch in batches {
            let freshness = endpoint.latest_freshness().await?;
            txs.push(seal(
                batch,
                self.payer(),
                freshness,
                tools.batching.message_version,
            )?);
        }

        let records = broadcast(
            std::slice::from_ref(endpoint),
            &txs,
            tools.dispatch.broadcast,
        )
        .await;
        let rejected = records
            .iter()
            .filter(|record| record.outcome != SubmissionOutcome::Accepted)
            .count();
        info!(
            "{stage}: {} transactions sent, {rejected} rejected",
            records.len()
        );
        Ok(records)
    }

    fn payer(&self) -> &SaneKeypair {
        self.tools.solana_keys.payer_keypair()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::app::{
        instructions::pumpfun::tests::{account_bytes, fresh_curve, sample_global},
        keystore::{KeystoreConfig, KeystoreMode},
        testing::FakeLedger,
    };
    use serde_json::json;
    use services_common::utils::tests::logger_setup;
    use std::{collections::HashSet, path::Path, time::Duration};

    struct Setup {
        buyer: BulkBuyer,
        primary: Arc<FakeLedger>,
        secondary: Arc<FakeLedger>,
        payer: SaneKeypair,
        mint: Pubkey,
        _dir: tempfile::TempDir,
    }

    fn keystore(dir: &Path, wallets: usize) -> Keystore {
        Keystore::new(KeystoreConfig {
            directory: dir.join("keypairs"),
            summary_path: dir.join("keyInfo.json"),
            mode: KeystoreMode::Create { count: wallets },
        })
    }

    fn setup(wallets: usize, buy_batch: usize, primary: FakeLedger) -> Setup {
        logger_setup();
        let dir = tempfile::tempdir().unwrap();
        let mint = Pubkey::new_unique();
        let global = account_bytes(&sample_global());
        let curve = account_bytes(&fresh_curve(&sample_global(), Pubkey::new_unique()));
        let with_pump_accounts = |ledger: FakeLedger| {
            ledger
                .with_account(*pumpfun::GLOBAL, global.clone())
                .with_account(pumpfun::bonding_curve(&mint), curve.clone())
        };
        let primary = Arc::new(with_pump_accounts(primary));
        let secondary = Arc::new(with_pump_accounts(FakeLedger::new("secondary")));
        let pool = SolanaPool::from_endpoints(vec![
            primary.clone() as Arc<dyn LedgerEndpoint>,
            secondary.clone(),
        ])
        .unwrap();

        let payer = SaneKeypair::new();
        let keys = SolanaKeys {
            payer: payer.clone(),
        };
        let mut batching = BatchingConfig::default();
        batching.buy.max_operations = buy_batch.try_into().unwrap();
        let config = RunConfig {
            batching,
            dispatch: DispatchConfig {
                poll_interval: Duration::ZERO,
                ..Default::default()
            },
            pipeline: serde_json::from_value(json!({ "mint": mint.to_string() })).unwrap(),
            instructions: InstructionsConfig::default(),
        };

        Setup {
            buyer: BulkBuyer::new(pool, keys, keystore(dir.path(), wallets), config),
            primary,
            secondary,
            payer,
            mint,
            _dir: dir,
        }
    }

    #[tokio::test]
    async fn full_run_funds_and_buys_from_every_wallet() {
        let setup = setup(3, 2, FakeLedger::new("primary"));
        let report = setup.buyer.run().await.unwrap();

        assert_eq!(report.transactions, 2);
        assert_eq!(report.submissions, 4);
        assert_eq!(report.accepted.len(), 3);
        assert!(report.rejected.is_empty());

        let wallets = setup.buyer.tools.keystore.load().await.unwrap();
        let wsol = token::wsol_mint();
        for wallet in &wallets {
            let key = wallet.keypair.key();
            assert_eq!(setup.primary.lamports(&key), default_native_funding());
            assert_eq!(
                setup
                    .primary
                    .token_balance(&token::associated_account(&key, &wsol)),
                Some(default_wsol_funding())
            );
            assert_eq!(
                setup
                    .primary
                    .token_balance(&token::associated_account(&key, &setup.mint)),
                Some(0)
            );
        }
        let buyers: HashSet<Pubkey> = setup.primary.buyers().into_iter().collect();
        assert_eq!(buyers, wallets.iter().map(|w| w.keypair.key()).collect());
        assert_eq!(setup.secondary.sent().len(), 2);
    }

    #[tokio::test]
    async fn buy_batches_share_one_blockhash() {
        let setup = setup(5, 2, FakeLedger::new("primary"));
        let wallets = setup.buyer.tools.keystore.ensure_wallets().await.unwrap();
        setup.buyer.create_accounts(&wallets, &setup.mint).await.unwrap();

        let report = setup.buyer.buy(&wallets, &setup.mint).await.unwrap();
        assert_eq!(report.transactions, 3);
        assert_eq!(report.submissions, 6);

        let txs = setup.secondary.sent();
        assert_eq!(txs.len(), 3);
        let signer_counts: Vec<usize> = txs.iter().map(|tx| tx.signer_keys().len()).collect();
        assert_eq!(signer_counts, vec![3, 3, 2]);
        assert!(txs.iter().all(|tx| tx.signer_keys()[0] == setup.payer.key()));
        let blockhashes: HashSet<_> = txs.iter().map(|tx| tx.recent_blockhash()).collect();
        assert_eq!(blockhashes.len(), 1);
    }

    #[tokio::test]
    async fn account_creation_is_idempotent_but_funding_is_not() {
        let setup = setup(4, 4, FakeLedger::new("primary"));
        let wallets = setup.buyer.tools.keystore.ensure_wallets().await.unwrap();

        for _ in 0..2 {
            let records = setup
                .buyer
                .create_accounts(&wallets, &setup.mint)
                .await
                .unwrap();
            assert!(records.iter().all(ConfirmedRecord::is_confirmed));
        }
        assert_eq!(setup.primary.token_account_count(), wallets.len());

        setup.buyer.fund_native(&wallets).await.unwrap();
        setup.buyer.fund_native(&wallets).await.unwrap();
        for wallet in &wallets {
            assert_eq!(
                setup.primary.lamports(&wallet.keypair.key()),
                2 * default_native_funding()
            );
        }
    }

    #[tokio::test]
    async fn repeated_wsol_funding_and_buy_apply_twice() {
        let setup = setup(3, 2, FakeLedger::new("primary"));
        let wallets = setup.buyer.tools.keystore.ensure_wallets().await.unwrap();
        let wsol = token::wsol_mint();
        setup.buyer.create_accounts(&wallets, &wsol).await.unwrap();
        setup.buyer.wrap_sol(wallets.len() * 2).await.unwrap();

        setup.buyer.fund_wsol(&wallets).await.unwrap();
        setup.buyer.fund_wsol(&wallets).await.unwrap();
        for wallet in &wallets {
            let account = token::associated_account(&wallet.keypair.key(), &wsol);
            assert_eq!(
                setup.primary.token_balance(&account),
                Some(2 * default_wsol_funding())
            );
        }

        setup.buyer.buy(&wallets, &setup.mint).await.unwrap();
        setup.buyer.buy(&wallets, &setup.mint).await.unwrap();
        let buyers = setup.primary.buyers();
        assert_eq!(buyers.len(), 2 * wallets.len());
        for wallet in &wallets {
            let key = wallet.keypair.key();
            assert_eq!(buyers.iter().filter(|b| **b == key).count(), 2);
        }
    }

    #[tokio::test]
    async fn failing_stage_stops_the_run() {
        let setup = setup(2, 4, FakeLedger::new("primary").rejecting_sends());
        assert!(setup.buyer.run().await.is_err());
        assert!(setup.primary.buyers().is_empty());
        assert!(setup.secondary.sent().is_empty());
    }

    #[tokio::test]
    async fn per_wallet_purchase_skips_wallets_without_amount() {
        let mut setup = setup(3, 4, FakeLedger::new("primary"));
        let wallets = setup.buyer.tools.keystore.ensure_wallets().await.unwrap();

        let mut summary = setup.buyer.tools.keystore.read_summary().await.unwrap();
        for wallet in &wallets[..2] {
            summary
                .wallets
                .get_mut(&wallet.keypair.key().to_string())
                .unwrap()
                .sol_amount = Some(0.01);
        }
        std::fs::write(
            setup._dir.path().join("keyInfo.json"),
            serde_json::to_vec(&summary).unwrap(),
        )
        .unwrap();

        let tools = &setup.buyer.tools;
        let mut pipeline = tools.pipeline.clone();
        pipeline.purchase = PurchasePolicy::PerWallet;
        setup.buyer = BulkBuyer::new(
            tools.solana_pool.clone(),
            tools.solana_keys.clone(),
            keystore(setup._dir.path(), 3),
            RunConfig {
                batching: tools.batching.clone(),
                dispatch: tools.dispatch.clone(),
                pipeline,
                instructions: tools.instructions.clone(),
            },
        );

        let report = setup.buyer.buy(&wallets, &setup.mint).await.unwrap();
        assert_eq!(report.transactions, 1);
        assert_eq!(
            report.accepted,
            vec![wallets[0].keypair.key(), wallets[1].keypair.key()]
        );
    }

    #[test]
    fn tally_counts_a_wallet_once_if_any_endpoint_accepted() {
        let signature = Signature::new_unique();
        let wallet = Pubkey::new_unique();
        let record = |endpoint: &str, outcome| SubmissionRecord {
            endpoint: endpoint.to_owned(),
            signature,
            wallets: vec![wallet],
            outcome,
        };
        let report = BuyReport::tally(&[
            record("a", SubmissionOutcome::Rejected("blockhash not found".into())),
            record("b", SubmissionOutcome::Accepted),
        ]);
        assert_eq!(report.transactions, 1);
        assert_eq!(report.submissions, 2);
        assert_eq!(report.accepted, vec![wallet]);
        assert!(report.rejected.is_empty());
    }

    #[test]
    fn pipeline_config_defaults() {
        let config: PipelineConfig = serde_json::from_value(json!({})).unwrap();
        assert!(config.mint.is_none());
        assert_eq!(config.purchase, PurchasePolicy::Flat { lamports: 10_000 });

        let config: PipelineConfig = serde_json::from_value(json!({
            "purchase": "per_wallet",
            "mint": "So11111111111111111111111111111111111111112",
        }))
        .unwrap();
        assert_eq!(config.purchase, PurchasePolicy::PerWallet);
        assert_eq!(config.mint, Some(token::wsol_mint()));
    }
}
