use serde::Deserialize;

use crate::app::batch::BatchingConfig;
use crate::app::dispatch::DispatchConfig;
use crate::app::instructions::InstructionsConfig;
use crate::app::keystore::KeystoreConfig;
use crate::app::pipeline::PipelineConfig;
use crate::solana::SolanaKeysConfig;
use services_common::solana::pool::SolanaPoolConfig;

#[derive(Deserialize, Debug, Clone)]
pub struct Config {
    pub keys: SolanaKeysConfig,
    pub solana_pool: SolanaPoolConfig,
    pub keystore: KeystoreConfig,
    #[serde(default)]
    pub batching: BatchingConfig,
    #[serde(default)]
    pub dispatch: DispatchConfig,
    pub pipeline: PipelineConfig,
    #[serde(default)]
    pub instructions: InstructionsConfig,
}
