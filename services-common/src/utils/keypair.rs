use std::{fs::File, ops::Deref, path::PathBuf, sync::Arc};

use anyhow::Context as _;
use serde::{
    de::{self},
    Deserialize, Deserializer,
};
use solana_sdk::{pubkey::Pubkey, signature::Keypair, signer::Signer};

/// Cheaply clonable keypair. `Debug` never prints secret material.
#[derive(Deserialize, PartialEq)]
pub struct SaneKeypair(#[serde(deserialize_with = "deserialize_keypair")] Arc<Keypair>);

impl SaneKeypair {
    pub fn new() -> Self {
        Self::from(Keypair::new())
    }

    pub fn to_keypair(&self) -> Keypair {
        self.0.insecure_clone()
    }

    pub fn key(&self) -> Pubkey {
        self.0.pubkey()
    }
}

impl Default for SaneKeypair {
    fn default() -> Self {
        Self::new()
    }
}

impl Clone for SaneKeypair {
    fn clone(&self) -> Self {
        Self(self.0.clone())
    }
}

impl Deref for SaneKeypair {
    type Target = Keypair;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl From<SaneKeypair> for Keypair {
    fn from(val: SaneKeypair) -> Self {
        val.0.insecure_clone()
    }
}

impl From<Keypair> for SaneKeypair {
    fn from(value: Keypair) -> Self {
        Self(value.into())
    }
}

impl std::fmt::Debug for SaneKeypair {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.pubkey())
    }
}

/// Accepts either a JSON byte array (`[1, 2, ...]`) or a base58 string.
pub fn parse_secret(raw: &str) -> anyhow::Result<Keypair> {
    let raw = raw.trim();
    let bytes: Vec<u8> = if raw.starts_with('[') {
        serde_json::from_str(raw).context("decode secret as json byte array")?
    } else {
        bs58::decode(raw)
            .into_vec()
            .context("decode secret as base58")?
    };
    Keypair::from_bytes(&bytes).context("secret is not a valid ed25519 keypair")
}

pub fn deserialize_keypair<'de, D, K: From<Keypair>>(deserializer: D) -> Result<K, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(rename_all = "lowercase")]
    #[serde(untagged)]
    enum SerdeKeypair {
        FromFile { path: PathBuf },
        FromEnv { env: String },
        Raw { array: Vec<u8> },
    }

    let raw = SerdeKeypair::deserialize(deserializer)?;
    let keypair = match raw {
        SerdeKeypair::FromFile { path } => {
            let bytes: Vec<u8> =
                serde_json::from_reader(File::open(&path).map_err(de::Error::custom)?)
                    .map_err(de::Error::custom)?;
            Keypair::from_bytes(&bytes).map_err(de::Error::custom)?
        }
        SerdeKeypair::FromEnv { env } => {
            let value = std::env::var(&env)
                .map_err(|err| de::Error::custom(format!("read secret from ${env}: {err}")))?;
            parse_secret(&value).map_err(|err| de::Error::custom(format!("{err:#}")))?
        }
        SerdeKeypair::Raw { array } => Keypair::from_bytes(&array).map_err(de::Error::custom)?,
    };
    Ok(keypair.into())
}
