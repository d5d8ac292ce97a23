use super::{token::associated_account, BasisPoints};
use anyhow::{bail, Context as _};
use borsh::{BorshDeserialize, BorshSerialize};
use once_cell::sync::Lazy;
use services_common::solana::endpoint::LedgerEndpoint;
use solana_sdk::{
    instruction::{AccountMeta, Instruction},
    pubkey,
    pubkey::Pubkey,
    system_program, sysvar,
};

pub const PROGRAM: Pubkey = pubkey!("6EF8rrecthR5Dkzon8Nwu78hRvfCKubJ14M5uBEwF6P");
pub const FEE_PROGRAM: Pubkey = pubkey!("pfeeUxB6jkeY1Hxd7CsFCAjcbHA9rWtchMGdZ6VojVZ");
pub const METADATA_PROGRAM: Pubkey = pubkey!("metaqbxxUerdq28cj1RbAWkYQm3ybzjb6a8bt518x1s");
pub const EVENT_AUTHORITY: Pubkey = pubkey!("Ce6TQqeHC9p8KetsN6JsjHK7UTZk7nasjjnr7XxXp9F1");

pub static GLOBAL: Lazy<Pubkey> = Lazy::new(|| find(&[b"global"]));
pub static MINT_AUTHORITY: Lazy<Pubkey> = Lazy::new(|| find(&[b"mint-authority"]));
pub static GLOBAL_VOLUME_ACCUMULATOR: Lazy<Pubkey> =
    Lazy::new(|| find(&[b"global_volume_accumulator"]));
pub static FEE_CONFIG: Lazy<Pubkey> = Lazy::new(|| {
    Pubkey::find_program_address(&[b"fee_config", PROGRAM.as_ref()], &FEE_PROGRAM).0
});

const ACCOUNT_DISCRIMINATOR_LEN: usize = 8;
const BUY_DISCRIMINATOR: [u8; 8] = [102, 6, 61, 18, 1, 218, 235, 234];
const CREATE_DISCRIMINATOR: [u8; 8] = [24, 30, 200, 40, 5, 28, 7, 119];

fn find(seeds: &[&[u8]]) -> Pubkey {
    Pubkey::find_program_address(seeds, &PROGRAM).0
}

pub fn bonding_curve(mint: &Pubkey) -> Pubkey {
    find(&[b"bonding-curve", mint.as_ref()])
}

pub fn creator_vault(creator: &Pubkey) -> Pubkey {
    find(&[b"creator-vault", creator.as_ref()])
}

pub fn user_volume_accumulator(user: &Pubkey) -> Pubkey {
    find(&[b"user_volume_accumulator", user.as_ref()])
}

pub fn metadata_account(mint: &Pubkey) -> Pubkey {
    Pubkey::find_program_address(
        &[b"metadata", METADATA_PROGRAM.as_ref(), mint.as_ref()],
        &METADATA_PROGRAM,
    )
    .0
}

/// Leading fields of the program's global account. Trailing fields are ignored.
#[derive(BorshSerialize, BorshDeserialize, Debug, Clone, PartialEq, Eq)]
pub struct Global {
    pub initialized: bool,
    pub authority: Pubkey,
    pub fee_recipient: Pubkey,
    pub initial_virtual_token_reserves: u64,
    pub initial_virtual_sol_reserves: u64,
    pub initial_real_token_reserves: u64,
    pub token_total_supply: u64,
    pub fee_basis_points: u64,
    pub withdraw_authority: Pubkey,
    pub enable_migrate: bool,
    pub pool_migration_fee: u64,
    pub creator_fee_basis_points: u64,
}

impl Global {
    /// Fee taken on top of a buy, protocol and creator share combined.
    pub fn buy_fee(&self) -> BasisPoints {
        let total = self
            .fee_basis_points
            .saturating_add(self.creator_fee_basis_points);
        BasisPoints(total.min(u16::MAX as u64) as u16)
    }
}

#[derive(BorshSerialize, BorshDeserialize, Debug, Clone, PartialEq, Eq)]
pub struct BondingCurve {
    pub virtual_token_reserves: u64,
    pub virtual_sol_reserves: u64,
    pub real_token_reserves: u64,
    pub real_sol_reserves: u64,
    pub token_total_supply: u64,
    pub complete: bool,
    pub creator: Pubkey,
}

pub fn decode_account<T: BorshDeserialize>(data: &[u8]) -> anyhow::Result<T> {
    if data.len() < ACCOUNT_DISCRIMINATOR_LEN {
        bail!("account data is shorter than its discriminator");
    }
    Ok(T::deserialize(&mut &data[ACCOUNT_DISCRIMINATOR_LEN..])?)
}

pub async fn fetch_global(endpoint: &dyn LedgerEndpoint) -> anyhow::Result<Global> {
    let data = endpoint
        .account_data(&GLOBAL)
        .await?
        .context("pump.fun global account not found")?;
    decode_account(&data).context("decode pump.fun global account")
}

pub async fn fetch_bonding_curve(
    endpoint: &dyn LedgerEndpoint,
    mint: &Pubkey,
) -> anyhow::Result<BondingCurve> {
    let address = bonding_curve(mint);
    let data = endpoint
        .account_data(&address)
        .await?
        .with_context(|| format!("bonding curve of {mint} not found"))?;
    decode_account(&data).with_context(|| format!("decode bonding curve of {mint}"))
}

/// Local copy of curve reserves, advanced after each planned purchase.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CurveState {
    pub virtual_token_reserves: u64,
    pub virtual_sol_reserves: u64,
    pub real_token_reserves: u64,
    pub real_sol_reserves: u64,
}

impl CurveState {
    pub fn commit_buy(&mut self, params: &BuyParams) {
        self.real_token_reserves = self.real_token_reserves.saturating_sub(params.tokens);
        self.virtual_token_reserves = self.virtual_token_reserves.saturating_sub(params.tokens);

        self.real_sol_reserves = self.real_sol_reserves.saturating_add(params.sols_in);
        self.virtual_sol_reserves = self.virtual_sol_reserves.saturating_add(params.sols_in);
    }

    fn constant(&self) -> u128 {
        self.virtual_sol_reserves as u128 * self.virtual_token_reserves as u128
    }
}

impl From<&BondingCurve> for CurveState {
    fn from(curve: &BondingCurve) -> Self {
        Self {
            virtual_token_reserves: curve.virtual_token_reserves,
            virtual_sol_reserves: curve.virtual_sol_reserves,
            real_token_reserves: curve.real_token_reserves,
            real_sol_reserves: curve.real_sol_reserves,
        }
    }
}

pub struct BuyCalculator<'a> {
    curve: &'a CurveState,
    fee: BasisPoints,
    slippage: BasisPoints,
}

impl<'a> BuyCalculator<'a> {
    pub fn new(curve: &'a CurveState, fee: BasisPoints, slippage: BasisPoints) -> Self {
        Self {
            curve,
            fee,
            slippage,
        }
    }

    /// Tokens bought for `sols` lamports spent in total, fee included.
    pub fn fixed_sols(&self, sols: u64) -> BuyParams {
        let sols_in = self.fee.taken_from(sols);
        let tokens = if sols_in == 0 || self.curve.virtual_token_reserves == 0 {
            0
        } else {
            let new_sol_reserves = self.curve.virtual_sol_reserves as u128 + sols_in as u128;
            let new_token_reserves = self.curve.constant() / new_sol_reserves + 1;
            (self.curve.virtual_token_reserves as u128).saturating_sub(new_token_reserves) as u64
        };
        BuyParams {
            tokens: tokens.min(self.curve.real_token_reserves),
            sols_in,
            max_sol_cost: self.slippage.added_to(sols),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BuyParams {
    pub tokens: u64,
    /// Part of the spend that reaches the curve.
    pub sols_in: u64,
    pub max_sol_cost: u64,
}

#[derive(BorshSerialize)]
struct OptionBool(bool);

#[derive(BorshSerialize)]
struct BuyArgs {
    amount: u64,
    max_sol_cost: u64,
    track_volume: OptionBool,
}

#[derive(BorshSerialize)]
struct CreateArgs {
    name: String,
    symbol: String,
    uri: String,
    creator: Pubkey,
}

fn instruction_data(
    discriminator: [u8; 8],
    args: &impl BorshSerialize,
) -> anyhow::Result<Vec<u8>> {
    let mut data = discriminator.to_vec();
    args.serialize(&mut data)?;
    Ok(data)
}

/// Accounts shared by every buy of one mint.
#[derive(Debug, Clone)]
pub struct BuyTarget {
    pub mint: Pubkey,
    pub fee_recipient: Pubkey,
    pub creator: Pubkey,
}

impl BuyTarget {
    pub fn new(mint: Pubkey, global: &Global, curve: &BondingCurve) -> Self {
        Self {
            mint,
            fee_recipient: global.fee_recipient,
            creator: curve.creator,
        }
    }
}

pub fn buy(
    target: &BuyTarget,
    user: &Pubkey,
    params: &BuyParams,
    track_volume: bool,
) -> anyhow::Result<Instruction> {
    let bonding_curve = bonding_curve(&target.mint);
    let data = instruction_data(
        BUY_DISCRIMINATOR,
        &BuyArgs {
            amount: params.tokens,
            max_sol_cost: params.max_sol_cost,
            track_volume: OptionBool(track_volume),
        },
    )?;
    Ok(Instruction::new_with_bytes(
        PROGRAM,
        &data,
        vec![
            AccountMeta::new_readonly(*GLOBAL, false),
            AccountMeta::new(target.fee_recipient, false),
            AccountMeta::new_readonly(target.mint, false),
            AccountMeta::new(bonding_curve, false),
            AccountMeta::new(associated_account(&bonding_curve, &target.mint), false),
            AccountMeta::new(associated_account(user, &target.mint), false),
            AccountMeta::new(*user, true),
            AccountMeta::new_readonly(system_program::ID, false),
            AccountMeta::new_readonly(spl_token::ID, false),
            AccountMeta::new(creator_vault(&target.creator), false),
            AccountMeta::new_readonly(EVENT_AUTHORITY, false),
            AccountMeta::new_readonly(PROGRAM, false),
            AccountMeta::new(*GLOBAL_VOLUME_ACCUMULATOR, false),
            AccountMeta::new(user_volume_accumulator(user), false),
            AccountMeta::new_readonly(*FEE_CONFIG, false),
            AccountMeta::new_readonly(FEE_PROGRAM, false),
        ],
    ))
}

#[derive(Debug, Clone, serde::Deserialize)]
pub struct TokenMetadata {
    pub name: String,
    pub symbol: String,
    pub uri: String,
}

/// Launches a token on the curve. Both `mint` and `user` must sign.
pub fn create(
    mint: &Pubkey,
    user: &Pubkey,
    metadata: &TokenMetadata,
) -> anyhow::Result<Instruction> {
    let bonding_curve = bonding_curve(mint);
    let data = instruction_data(
        CREATE_DISCRIMINATOR,
        &CreateArgs {
            name: metadata.name.clone(),
            symbol: metadata.symbol.clone(),
            uri: metadata.uri.clone(),
            creator: *user,
        },
    )?;
    Ok(Instruction::new_with_bytes(
        PROGRAM,
        &data,
        vec![
            AccountMeta::new(*mint, true),
            AccountMeta::new_readonly(*MINT_AUTHORITY, false),
            AccountMeta::new(bonding_curve, false),
            AccountMeta::new(associated_account(&bonding_curve, mint), false),
            AccountMeta::new_readonly(*GLOBAL, false),
            AccountMeta::new_readonly(METADATA_PROGRAM, false),
            AccountMeta::new(metadata_account(mint), false),
            AccountMeta::new(*user, true),
            AccountMeta::new_readonly(system_program::ID, false),
            AccountMeta::new_readonly(spl_token::ID, false),
            AccountMeta::new_readonly(anchor_spl::associated_token::ID, false),
            AccountMeta::new_readonly(sysvar::rent::ID, false),
            AccountMeta::new_readonly(EVENT_AUTHORITY, false),
            AccountMeta::new_readonly(PROGRAM, false),
        ],
    ))
}
