pub mod cfg;
pub mod solana;
pub mod utils;
