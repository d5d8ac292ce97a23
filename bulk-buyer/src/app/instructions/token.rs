use anchor_spl::associated_token::{
    get_associated_token_address,
    spl_associated_token_account::instruction::create_associated_token_account_idempotent,
};
use solana_sdk::{instruction::Instruction, pubkey::Pubkey, system_instruction};

pub const WSOL_DECIMALS: u8 = 9;

pub fn wsol_mint() -> Pubkey {
    spl_token::native_mint::ID
}

pub fn associated_account(owner: &Pubkey, mint: &Pubkey) -> Pubkey {
    get_associated_token_address(owner, mint)
}

/// Creates `owner`'s associated account for `mint`, paid by `funder`. No-op if it exists.
pub fn create_associated_account(funder: &Pubkey, owner: &Pubkey, mint: &Pubkey) -> Instruction {
    create_associated_token_account_idempotent(funder, owner, mint, &spl_token::ID)
}

pub fn transfer_native(from: &Pubkey, to: &Pubkey, lamports: u64) -> Instruction {
    system_instruction::transfer(from, to, lamports)
}

/// Moves wrapped SOL between the associated accounts of `from` and `to`.
pub fn transfer_wsol(from: &Pubkey, to: &Pubkey, lamports: u64) -> anyhow::Result<Instruction> {
    let mint = wsol_mint();
    Ok(spl_token::instruction::transfer_checked(
        &spl_token::ID,
        &associated_account(from, &mint),
        &mint,
        &associated_account(to, &mint),
        from,
        &[],
        lamports,
        WSOL_DECIMALS,
    )?)
}

/// Wraps `lamports` into `owner`'s WSOL account, creating it first when missing.
pub fn wrap_sol(owner: &Pubkey, lamports: u64) -> anyhow::Result<Vec<Instruction>> {
    let mint = wsol_mint();
    let account = associated_account(owner, &mint);
    Ok(vec![
        create_associated_account(owner, owner, &mint),
        transfer_native(owner, &account, lamports),
        spl_token::instruction::sync_native(&spl_token::ID, &account)?,
    ])
}
