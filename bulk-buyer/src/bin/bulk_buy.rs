use bulk_buyer::{
    app::{
        keystore::Keystore,
        pipeline::{BulkBuyer, RunConfig},
    },
    cfg::Config,
    log::setup_log,
    solana::SolanaKeys,
};
use services_common::{cfg::load_config, solana::pool::SolanaPool};
use tracing::info;

#[tokio::main(flavor = "current_thread")]
pub async fn main() -> anyhow::Result<()> {
    setup_log();
    let cfg = load_config::<Config>("bulk_buy")?;
    let solana_pool = SolanaPool::from_cfg(cfg.solana_pool)?;
    let solana_keys = SolanaKeys::from_cfg(cfg.keys);
    let keystore = Keystore::new(cfg.keystore);

    let buyer = BulkBuyer::new(
        solana_pool,
        solana_keys,
        keystore,
        RunConfig {
            batching: cfg.batching,
            dispatch: cfg.dispatch,
            pipeline: cfg.pipeline,
            instructions: cfg.instructions,
        },
    );
    let report = buyer.run().await?;
    info!(
        "done: {} transactions, {} submissions, {} wallets accepted",
        report.transactions,
        report.submissions,
        report.accepted.len()
    );
    Ok(())
}
