use serde::{Deserialize, Serialize};
use services_common::utils::keypair::SaneKeypair;
use solana_sdk::{native_token::sol_to_lamports, signature::Keypair};
use std::{
    collections::BTreeMap,
    path::{Path, PathBuf},
};
use tokio::fs;
use tracing::{info, warn};

#[derive(Debug, Clone, Deserialize)]
pub struct KeystoreConfig {
    pub directory: PathBuf,
    #[serde(default = "default_summary_path")]
    pub summary_path: PathBuf,
    pub mode: KeystoreMode,
}

fn default_summary_path() -> PathBuf {
    PathBuf::from("keyInfo.json")
}

#[derive(Debug, Clone, Copy, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum KeystoreMode {
    /// Generate `count` fresh wallets, overwriting existing key files.
    Create { count: usize },
    Existing,
}

#[derive(Debug, thiserror::Error)]
pub enum KeystoreError {
    #[error("keystore directory {0:?} does not exist")]
    MissingDirectory(PathBuf),
    #[error("keystore directory {0:?} holds no keypair files")]
    Empty(PathBuf),
    #[error("malformed key file {path:?}: {reason}")]
    MalformedKeyFile { path: PathBuf, reason: String },
    #[error("malformed summary {path:?}")]
    MalformedSummary {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

#[derive(Debug, Clone)]
pub struct Wallet {
    /// Number in the key file name, starting from 1.
    pub index: usize,
    pub keypair: SaneKeypair,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct KeySummary {
    pub num_of_wallets: usize,
    #[serde(default)]
    pub wallets: BTreeMap<String, WalletInfo>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WalletInfo {
    pub index: usize,
    /// Planned purchase for this wallet, in SOL.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sol_amount: Option<f64>,
}

impl KeySummary {
    pub fn planned_lamports(&self, wallet: &Wallet) -> Option<u64> {
        self.wallets
            .get(&wallet.keypair.key().to_string())
            .and_then(|info| info.sol_amount)
            .map(sol_to_lamports)
    }
}

pub struct Keystore {
    config: KeystoreConfig,
}

impl Keystore {
    pub fn new(config: KeystoreConfig) -> Self {
        Self { config }
    }

    /// Generates or loads wallets according to the configured mode and refreshes the summary.
    pub async fn ensure_wallets(&self) -> Result<Vec<Wallet>, KeystoreError> {
        let wallets = match self.config.mode {
            KeystoreMode::Create { count } => self.generate(count).await?,
            KeystoreMode::Existing => self.load().await?,
        };
        self.update_summary(&wallets).await?;
        info!("{} wallets ready", wallets.len());
        Ok(wallets)
    }

    pub async fn generate(&self, count: usize) -> Result<Vec<Wallet>, KeystoreError> {
        warn!(
            "creating {count} new wallets in {:?}, existing key files will be overwritten",
            self.config.directory
        );
        fs::create_dir_all(&self.config.directory).await?;

        let mut wallets = Vec::with_capacity(count);
        for index in 1..=count {
            let keypair = Keypair::new();
            let secret = serde_json::to_vec(&keypair.to_bytes().to_vec())
                .map_err(std::io::Error::other)?;
            fs::write(self.key_path(index), secret).await?;
            let wallet = Wallet {
                index,
                keypair: keypair.into(),
            };
            info!("wallet {index}: {}", wallet.keypair.key());
            wallets.push(wallet);
        }
        Ok(wallets)
    }

    /// Loads every `keypairN.json` in the directory, ordered by `N`.
    /// Unreadable key files are skipped with a warning.
    pub async fn load(&self) -> Result<Vec<Wallet>, KeystoreError> {
        let directory = &self.config.directory;
        if !fs::try_exists(directory).await? {
            return Err(KeystoreError::MissingDirectory(directory.clone()));
        }

        let mut wallets = vec![];
        let mut entries = fs::read_dir(directory).await?;
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            let Some(index) = key_file_index(&path) else {
                continue;
            };
            match read_keypair(&path).await {
                Ok(keypair) => {
                    info!("loaded wallet {index}: {}", keypair.key());
                    wallets.push(Wallet { index, keypair });
                }
                Err(err) => warn!("{err}"),
            }
        }

        if wallets.is_empty() {
            return Err(KeystoreError::Empty(directory.clone()));
        }
        wallets.sort_by_key(|wallet| wallet.index);
        Ok(wallets)
    }

    pub async fn read_summary(&self) -> Result<KeySummary, KeystoreError> {
        let path = &self.config.summary_path;
        if !fs::try_exists(path).await? {
            return Ok(KeySummary::default());
        }
        let data = fs::read(path).await?;
        serde_json::from_slice(&data).map_err(|source| KeystoreError::MalformedSummary {
            path: path.clone(),
            source,
        })
    }

    /// Rewrites the summary for `wallets`, keeping planned amounts of wallets already listed.
    async fn update_summary(&self, wallets: &[Wallet]) -> Result<(), KeystoreError> {
        let mut previous = self.read_summary().await?;
        let summary = KeySummary {
            num_of_wallets: wallets.len(),
            wallets: wallets
                .iter()
                .map(|wallet| {
                    let key = wallet.keypair.key().to_string();
                    let sol_amount = previous
                        .wallets
                        .remove(&key)
                        .and_then(|info| info.sol_amount);
                    (
                        key,
                        WalletInfo {
                            index: wallet.index,
                            sol_amount,
                        },
                    )
                })
                .collect(),
        };
        let data = serde_json::to_vec_pretty(&summary).map_err(std::io::Error::other)?;
        fs::write(&self.config.summary_path, data).await?;
        Ok(())
    }

    fn key_path(&self, index: usize) -> PathBuf {
        self.config.directory.join(format!("keypair{index}.json"))
    }
}

fn key_file_index(path: &Path) -> Option<usize> {
    let name = path.file_name()?.to_str()?;
    let digits = name.strip_prefix("keypair")?.strip_suffix(".json")?;
    if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    digits.parse().ok()
}

async fn read_keypair(path: &Path) -> Result<SaneKeypair, KeystoreError> {
    let malformed = |reason: String| KeystoreError::MalformedKeyFile {
        path: path.to_owned(),
        reason,
    };
    let data = fs::read(path).await?;
    let bytes: Vec<u8> = serde_json::from_slice(&data).map_err(|err| malformed(err.to_string()))?;
    let keypair = Keypair::from_bytes(&bytes).map_err(|err| malformed(err.to_string()))?;
    Ok(keypair.into())
}
