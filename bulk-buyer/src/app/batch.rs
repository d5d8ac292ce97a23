use serde::Deserialize;
use services_common::{solana::any_tx::MessageVersion, utils::keypair::SaneKeypair};
use solana_sdk::{
    compute_budget::ComputeBudgetInstruction, instruction::Instruction, pubkey::Pubkey,
};
use std::num::NonZeroUsize;
use tracing::warn;

#[derive(Deserialize, Debug, Clone, serde_derive_default::Default)]
pub struct BatchingConfig {
    #[serde(default)]
    pub message_version: MessageVersion,
    #[serde(default = "default_create_accounts")]
    pub create_accounts: StageBatching,
    #[serde(default = "default_funding")]
    pub funding: StageBatching,
    #[serde(default = "default_buy")]
    pub buy: StageBatching,
}

#[derive(Deserialize, Debug, Clone, Copy)]
pub struct StageBatching {
    pub max_operations: NonZeroUsize,
    #[serde(default)]
    pub compute: Option<ComputeBudget>,
}

/// Priority fee prefix placed at the head of every transaction of a stage.
#[derive(Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
pub struct ComputeBudget {
    pub unit_limit: u32,
    pub unit_price_micro_lamports: u64,
}

impl ComputeBudget {
    pub fn instructions(&self) -> Vec<Instruction> {
        vec![
            ComputeBudgetInstruction::set_compute_unit_limit(self.unit_limit),
            ComputeBudgetInstruction::set_compute_unit_price(self.unit_price_micro_lamports),
        ]
    }
}

impl StageBatching {
    fn new(max_operations: usize, compute: Option<ComputeBudget>) -> Self {
        Self {
            max_operations: NonZeroUsize::new(max_operations).expect("invariant: non-zero literal"),
            compute,
        }
    }

    pub fn policy(&self) -> BatchPolicy {
        BatchPolicy {
            max_operations: self.max_operations,
            prefix: self
                .compute
                .map(|compute| compute.instructions())
                .unwrap_or_default(),
        }
    }
}

fn default_create_accounts() -> StageBatching {
    StageBatching::new(
        10,
        Some(ComputeBudget {
            unit_limit: 360_000,
            unit_price_micro_lamports: 1,
        }),
    )
}

fn default_funding() -> StageBatching {
    StageBatching::new(10, None)
}

fn default_buy() -> StageBatching {
    StageBatching::new(
        2,
        Some(ComputeBudget {
            unit_limit: 1_400_000,
            unit_price_micro_lamports: 1,
        }),
    )
}

#[derive(Debug, Clone)]
pub struct BatchPolicy {
    pub max_operations: NonZeroUsize,
    pub prefix: Vec<Instruction>,
}

/// Instructions for a single wallet plus the keys that must sign them.
/// The fee payer is never listed here.
#[derive(Debug, Clone)]
pub struct Operation {
    pub wallet: Pubkey,
    pub instructions: Vec<Instruction>,
    pub signers: Vec<SaneKeypair>,
}

impl Operation {
    pub fn unsigned(wallet: Pubkey, instructions: Vec<Instruction>) -> Self {
        Self {
            wallet,
            instructions,
            signers: vec![],
        }
    }

    pub fn signed_by(wallet: &SaneKeypair, instructions: Vec<Instruction>) -> Self {
        Self {
            wallet: wallet.key(),
            instructions,
            signers: vec![wallet.clone()],
        }
    }
}

#[derive(Debug, Clone)]
pub struct Batch {
    pub instructions: Vec<Instruction>,
    pub signers: Vec<SaneKeypair>,
    /// Wallets whose operations landed in this batch, in input order.
    pub wallets: Vec<Pubkey>,
}

impl Batch {
    fn open(policy: &BatchPolicy) -> Self {
        Self {
            instructions: policy.prefix.clone(),
            signers: vec![],
            wallets: vec![],
        }
    }

    fn push(&mut self, operation: Operation) {
        self.instructions.extend(operation.instructions);
        for signer in operation.signers {
            if !self.signers.iter().any(|known| known.key() == signer.key()) {
                self.signers.push(signer);
            }
        }
        self.wallets.push(operation.wallet);
    }

    pub fn operations(&self) -> usize {
        self.wallets.len()
    }

    pub fn single(policy: &BatchPolicy, operation: Operation) -> Self {
        let mut batch = Self::open(policy);
        batch.push(operation);
        batch
    }
}

/// Packs per-entity operations into batches of at most `policy.max_operations`.
/// Entities whose operation can't be built are skipped and don't take a slot.
pub fn accumulate<E, F>(
    entities: impl IntoIterator<Item = E>,
    policy: &BatchPolicy,
    mut build: F,
) -> Vec<Batch>
where
    F: FnMut(&E) -> anyhow::Result<Operation>,
{
    let mut batches = vec![];
    let mut current = Batch::open(policy);

    for entity in entities {
        let operation = match build(&entity) {
            Ok(operation) => operation,
            Err(err) => {
                warn!("skipping operation: {err:#}");
                continue;
            }
        };
        current.push(operation);
        if current.operations() == policy.max_operations.get() {
            batches.push(std::mem::replace(&mut current, Batch::open(policy)));
        }
    }

    if current.operations() > 0 {
        batches.push(current);
    }
    batches
}
