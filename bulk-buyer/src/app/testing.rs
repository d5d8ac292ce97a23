//! In-memory ledger endpoint for tests.
//!
//! Decodes submitted transactions and applies the parts the pipeline relies on:
//! associated account creation, system transfers, checked token transfers and curve buys.
//! A signature that already landed is not applied twice.

use super::instructions::pumpfun;
use anyhow::bail;
use services_common::solana::{
    any_tx::AnyTx,
    endpoint::{Freshness, LedgerEndpoint, SendOptions, SignatureStatus},
};
use solana_sdk::{
    hash::Hash,
    instruction::InstructionError,
    pubkey::Pubkey,
    signature::Signature,
    system_instruction::SystemInstruction,
    system_program,
    transaction::TransactionError,
};
use spl_token::instruction::TokenInstruction;
use std::{
    collections::HashMap,
    sync::{
        atomic::{AtomicUsize, Ordering},
        Mutex,
    },
};

const BLOCK_HEIGHT: u64 = 1_000;
const BLOCKHASH_LIFETIME: u64 = 150;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LedgerEvent {
    Freshness,
    Send(Signature),
    Status(Signature),
    StatusConfirmed(Signature),
}

#[derive(Default, Clone)]
struct LedgerState {
    events: Vec<LedgerEvent>,
    sent: Vec<AnyTx>,
    landed: HashMap<Signature, Result<(), TransactionError>>,
    polls: HashMap<Signature, usize>,
    lamports: HashMap<Pubkey, u64>,
    token_accounts: HashMap<Pubkey, u64>,
    accounts: HashMap<Pubkey, Vec<u8>>,
    buyers: Vec<Pubkey>,
}

pub struct FakeLedger {
    name: String,
    reject_sends: bool,
    confirm_after: usize,
    never_confirm: bool,
    fail_block_height: bool,
    block_height_requests: AtomicUsize,
    state: Mutex<LedgerState>,
}

impl FakeLedger {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_owned(),
            reject_sends: false,
            confirm_after: 0,
            never_confirm: false,
            fail_block_height: false,
            block_height_requests: AtomicUsize::new(0),
            state: Mutex::default(),
        }
    }

    pub fn rejecting_sends(mut self) -> Self {
        self.reject_sends = true;
        self
    }

    /// Reports landed transactions as pending for the first `polls` status requests.
    pub fn confirming_after(mut self, polls: usize) -> Self {
        self.confirm_after = polls;
        self
    }

    pub fn never_confirming(mut self) -> Self {
        self.never_confirm = true;
        self
    }

    pub fn failing_block_height(mut self) -> Self {
        self.fail_block_height = true;
        self
    }

    pub fn with_account(self, address: Pubkey, data: Vec<u8>) -> Self {
        self.state.lock().unwrap().accounts.insert(address, data);
        self
    }

    pub fn events(&self) -> Vec<LedgerEvent> {
        self.state.lock().unwrap().events.clone()
    }

    pub fn sent(&self) -> Vec<AnyTx> {
        self.state.lock().unwrap().sent.clone()
    }

    pub fn lamports(&self, address: &Pubkey) -> u64 {
        self.state
            .lock()
            .unwrap()
            .lamports
            .get(address)
            .copied()
            .unwrap_or_default()
    }

    pub fn token_balance(&self, address: &Pubkey) -> Option<u64> {
        self.state
            .lock()
            .unwrap()
            .token_accounts
            .get(address)
            .copied()
    }

    pub fn token_account_count(&self) -> usize {
        self.state.lock().unwrap().token_accounts.len()
    }

    pub fn block_height_requests(&self) -> usize {
        self.block_height_requests.load(Ordering::SeqCst)
    }

    pub fn buyers(&self) -> Vec<Pubkey> {
        self.state.lock().unwrap().buyers.clone()
    }
}

fn apply(state: &mut LedgerState, tx: &AnyTx) -> Result<(), TransactionError> {
    let mut next = state.clone();
    let keys = tx.account_keys();

    for (position, ix) in tx.compiled_instructions().iter().enumerate() {
        let program = keys[ix.program_id_index as usize];
        let account = |at: usize| keys[ix.accounts[at] as usize];
        let failed = || {
            TransactionError::InstructionError(position as u8, InstructionError::InvalidAccountData)
        };

        if program == system_program::ID {
            if let Ok(SystemInstruction::Transfer { lamports }) = bincode::deserialize(&ix.data) {
                *next.lamports.entry(account(1)).or_default() += lamports;
            }
        } else if program == anchor_spl::associated_token::ID {
            next.token_accounts.entry(account(1)).or_default();
        } else if program == spl_token::ID {
            match TokenInstruction::unpack(&ix.data).map_err(|_| failed())? {
                TokenInstruction::TransferChecked { amount, .. } => {
                    if !next.token_accounts.contains_key(&account(0)) {
                        return Err(failed());
                    }
                    let destination = next
                        .token_accounts
                        .get_mut(&account(2))
                        .ok_or_else(failed)?;
                    *destination += amount;
                }
                TokenInstruction::SyncNative => {}
                _ => return Err(failed()),
            }
        } else if program == pumpfun::PROGRAM {
            next.buyers.push(account(6));
        }
    }

    next.events = std::mem::take(&mut state.events);
    next.sent = std::mem::take(&mut state.sent);
    *state = next;
    Ok(())
}

#[async_trait::async_trait]
impl LedgerEndpoint for FakeLedger {
    fn name(&self) -> &str {
        &self.name
    }

    async fn latest_freshness(&self) -> anyhow::Result<Freshness> {
        self.state.lock().unwrap().events.push(LedgerEvent::Freshness);
        Ok(Freshness {
            blockhash: Hash::new_unique(),
            last_valid_block_height: BLOCK_HEIGHT + BLOCKHASH_LIFETIME,
        })
    }

    async fn send(&self, tx: &AnyTx, _options: SendOptions) -> anyhow::Result<Signature> {
        let signature = tx.signature();
        let mut state = self.state.lock().unwrap();
        state.events.push(LedgerEvent::Send(signature));
        if self.reject_sends {
            bail!("{} refused {signature}", self.name);
        }
        if !tx.is_fully_signed() {
            bail!("signature verification failed for {signature}");
        }
        state.sent.push(tx.clone());
        if !state.landed.contains_key(&signature) {
            let result = apply(&mut state, tx);
            state.landed.insert(signature, result);
        }
        Ok(signature)
    }

    async fn signature_status(&self, signature: &Signature) -> anyhow::Result<SignatureStatus> {
        let mut state = self.state.lock().unwrap();
        let Some(result) = state.landed.get(signature).cloned() else {
            state.events.push(LedgerEvent::Status(*signature));
            return Ok(SignatureStatus::Pending);
        };
        let polls = {
            let polls = state.polls.entry(*signature).or_default();
            *polls += 1;
            *polls
        };
        if self.never_confirm || polls <= self.confirm_after {
            state.events.push(LedgerEvent::Status(*signature));
            return Ok(SignatureStatus::Pending);
        }
        Ok(match result {
            Ok(()) => {
                state.events.push(LedgerEvent::StatusConfirmed(*signature));
                SignatureStatus::Confirmed
            }
            Err(err) => {
                state.events.push(LedgerEvent::Status(*signature));
                SignatureStatus::Failed(err)
            }
        })
    }

    async fn block_height(&self) -> anyhow::Result<u64> {
        self.block_height_requests.fetch_add(1, Ordering::SeqCst);
        if self.fail_block_height {
            bail!("{} block height unavailable", self.name);
        }
        if self.never_confirm {
            return Ok(BLOCK_HEIGHT + BLOCKHASH_LIFETIME + 1);
        }
        Ok(BLOCK_HEIGHT)
    }

    async fn account_data(&self, address: &Pubkey) -> anyhow::Result<Option<Vec<u8>>> {
        Ok(self.state.lock().unwrap().accounts.get(address).cloned())
    }
}
