use serde::Deserialize;

pub mod pumpfun;
pub mod token;

#[derive(Debug, Clone, Deserialize, serde_derive_default::Default)]
pub struct InstructionsConfig {
    /// Extra SOL a buy may spend over the quoted price.
    #[serde(default = "default_slippage")]
    pub slippage: BasisPoints,

    #[serde(default = "default_track_volume")]
    pub track_volume: bool,
}

fn default_slippage() -> BasisPoints {
    BasisPoints(100)
}

fn default_track_volume() -> bool {
    false
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(transparent)]
pub struct BasisPoints(pub u16);

impl BasisPoints {
    const MAX: u64 = 10_000;

    /// `amount` increased by this share.
    pub fn added_to(&self, amount: u64) -> u64 {
        ((amount as u128) * (Self::MAX + self.0 as u64) as u128 / Self::MAX as u128) as u64
    }

    /// Inverse of [`BasisPoints::added_to`]: the part of `total` left once this share is removed.
    pub fn taken_from(&self, total: u64) -> u64 {
        ((total as u128) * Self::MAX as u128 / (Self::MAX + self.0 as u64) as u128) as u64
    }
}
