pub mod app;
pub mod cfg;
pub mod log;
pub mod solana;
