use super::batch::Batch;
use services_common::solana::{
    any_tx::{AnyTx, AnyTxPrepare, MessageVersion},
    endpoint::Freshness,
};
use solana_sdk::{pubkey::Pubkey, signature::Keypair};

/// Signed transaction ready for dispatch, with the wallets it acts for.
#[derive(Debug, Clone)]
pub struct SealedTx {
    pub tx: AnyTx,
    pub freshness: Freshness,
    pub wallets: Vec<Pubkey>,
}

pub fn seal(
    batch: Batch,
    payer: &Keypair,
    freshness: Freshness,
    version: MessageVersion,
) -> anyhow::Result<SealedTx> {
    let Batch {
        instructions,
        signers,
        wallets,
    } = batch;
    let signers: Vec<&Keypair> = signers.iter().map(|signer| &**signer).collect();
    let tx = AnyTxPrepare::new(version, instructions).sign(payer, &signers, freshness.blockhash)?;
    Ok(SealedTx {
        tx,
        freshness,
        wallets,
    })
}
