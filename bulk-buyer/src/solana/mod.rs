use serde::Deserialize;
use services_common::utils::keypair::SaneKeypair;

/// `payer` accepts `{ path = "..." }`, `{ env = "..." }` or `{ array = [...] }`.
#[derive(Debug, Deserialize, Clone)]
pub struct SolanaKeysConfig {
    pub payer: SaneKeypair,
}

#[derive(Clone)]
pub struct SolanaKeys {
    pub payer: SaneKeypair,
}

impl SolanaKeys {
    pub fn from_cfg(cfg: SolanaKeysConfig) -> Self {
        Self { payer: cfg.payer }
    }

    pub fn payer_keypair(&self) -> &SaneKeypair {
        &self.payer
    }
}
