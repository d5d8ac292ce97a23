use delegate::delegate;
use serde::{Deserialize, Serialize};
use solana_client::rpc_client::SerializableTransaction;
use solana_sdk::{
    address_lookup_table::AddressLookupTableAccount,
    hash::Hash,
    instruction::{CompiledInstruction, Instruction},
    message::{v0, VersionedMessage},
    pubkey::Pubkey,
    signature::{Keypair, Signature},
    signer::Signer,
    transaction::{Transaction, VersionedTransaction},
};

#[derive(Deserialize, Serialize, Debug, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum MessageVersion {
    Legacy,
    #[default]
    V0,
}

#[derive(Debug, Clone, derive_more::From)]
pub enum AnyTxPrepare {
    Legacy(LegacyTxPrepare),
    Versioned(VersionedTxPrepare),
}

impl AnyTxPrepare {
    pub fn new(version: MessageVersion, instructions: Vec<Instruction>) -> Self {
        match version {
            MessageVersion::Legacy => LegacyTxPrepare { instructions }.into(),
            MessageVersion::V0 => VersionedTxPrepare {
                alt_accounts: vec![],
                instructions,
            }
            .into(),
        }
    }

    /// Compiles the message with `payer` as fee payer and signs it.
    /// `payer` is always the first signer, followed by `signers` in order.
    /// Every required signer of the message must be present, and no extra ones.
    pub fn sign(
        self,
        payer: &Keypair,
        signers: &[&Keypair],
        blockhash: Hash,
    ) -> anyhow::Result<AnyTx> {
        let mut keypairs = Vec::with_capacity(signers.len() + 1);
        keypairs.push(payer);
        keypairs.extend(
            signers
                .iter()
                .copied()
                .filter(|signer| signer.pubkey() != payer.pubkey()),
        );

        match self {
            AnyTxPrepare::Legacy(tx_result) => {
                let mut tx =
                    Transaction::new_with_payer(&tx_result.instructions, Some(&payer.pubkey()));
                tx.try_sign(&keypairs, blockhash)?;
                Ok(AnyTx::Legacy(tx))
            }
            AnyTxPrepare::Versioned(versioned_tx_result) => {
                let message = v0::Message::try_compile(
                    &payer.pubkey(),
                    &versioned_tx_result.instructions,
                    &versioned_tx_result.alt_accounts,
                    blockhash,
                )?;
                Ok(VersionedTransaction::try_new(VersionedMessage::V0(message), &keypairs)?.into())
            }
        }
    }
}

#[derive(Debug, Clone, derive_more::From, Serialize)]
#[serde(untagged)]
pub enum AnyTx {
    Legacy(Transaction),
    Versioned(VersionedTransaction),
}

impl AnyTx {
    pub fn signature(&self) -> Signature {
        *self.get_signature()
    }

    pub fn recent_blockhash(&self) -> Hash {
        *self.get_recent_blockhash()
    }

    /// Keys required to sign the message, fee payer first.
    pub fn signer_keys(&self) -> Vec<Pubkey> {
        let (keys, required) = self.keys_and_required_signers();
        keys.iter().take(required).copied().collect()
    }

    pub fn account_keys(&self) -> &[Pubkey] {
        self.keys_and_required_signers().0
    }

    pub fn compiled_instructions(&self) -> &[CompiledInstruction] {
        match self {
            AnyTx::Legacy(tx) => &tx.message.instructions,
            AnyTx::Versioned(tx) => tx.message.instructions(),
        }
    }

    pub fn is_fully_signed(&self) -> bool {
        match self {
            AnyTx::Legacy(tx) => tx.verify().is_ok(),
            AnyTx::Versioned(tx) => tx.verify_with_results().into_iter().all(|ok| ok),
        }
    }

    fn keys_and_required_signers(&self) -> (&[Pubkey], usize) {
        match self {
            AnyTx::Legacy(tx) => (
                &tx.message.account_keys,
                tx.message.header.num_required_signatures as usize,
            ),
            AnyTx::Versioned(tx) => (
                tx.message.static_account_keys(),
                tx.message.header().num_required_signatures as usize,
            ),
        }
    }
}

#[derive(Debug, Clone)]
pub struct LegacyTxPrepare {
    pub instructions: Vec<Instruction>,
}

#[derive(Debug, Clone)]
pub struct VersionedTxPrepare {
    pub alt_accounts: Vec<AddressLookupTableAccount>,
    pub instructions: Vec<Instruction>,
}

impl SerializableTransaction for AnyTx {
    delegate! {
        to match &self {
            AnyTx::Legacy(tx) => tx,
            AnyTx::Versioned(tx) => tx,
        } {
            fn get_signature(&self) -> &Signature;
            fn get_recent_blockhash(&self) -> &Hash;
            fn uses_durable_nonce(&self) -> bool;
        }
    }
}
