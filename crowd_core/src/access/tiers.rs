use std::fmt;

use serde::{Deserialize, Serialize, Serializer};

/// Hourly injection allowance. Serialises as a count, or -1 for unlimited.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommandCap {
    Limited(u32),
    Unlimited,
}

impl CommandCap {
    pub fn allows(self, used: u32) -> bool {
        match self {
            CommandCap::Limited(cap) => used < cap,
            CommandCap::Unlimited => true,
        }
    }

    /// Slots left once `used` have been spent.
    pub fn remaining(self, used: u32) -> Remaining {
        match self {
            CommandCap::Limited(cap) => Remaining::Count(cap.saturating_sub(used)),
            CommandCap::Unlimited => Remaining::Unlimited,
        }
    }

    fn as_i64(self) -> i64 {
        match self {
            CommandCap::Limited(cap) => i64::from(cap),
            CommandCap::Unlimited => -1,
        }
    }
}

impl Serialize for CommandCap {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_i64(self.as_i64())
    }
}

impl fmt::Display for CommandCap {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CommandCap::Limited(cap) => write!(f, "{cap}"),
            CommandCap::Unlimited => f.write_str("unlimited"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Remaining {
    Count(u32),
    Unlimited,
}

impl Serialize for Remaining {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Remaining::Count(count) => serializer.serialize_u32(*count),
            Remaining::Unlimited => serializer.serialize_i64(-1),
        }
    }
}

/// Token-holding privilege levels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChampionTier {
    Champion,
    Elite,
    Legendary,
}

/// Token-burning privilege levels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BurnTier {
    Grunt,
    Executive,
    Boss,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct TierSpec<T: 'static> {
    pub tier: T,
    pub min: f64,
    #[serde(rename = "commands_per_hour")]
    pub cap: CommandCap,
    pub vote_weight: f64,
    pub label: &'static str,
}

/// Ascending threshold table. The tier for an amount is the highest entry
/// whose minimum it reaches.
#[derive(Debug, Clone, Copy)]
pub struct TierTable<T: 'static> {
    specs: &'static [TierSpec<T>],
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct NextTier<T> {
    pub tier: T,
    pub needed: f64,
}

impl<T: Copy + PartialEq> TierTable<T> {
    pub const fn new(specs: &'static [TierSpec<T>]) -> Self {
        Self { specs }
    }

    pub fn specs(&self) -> &'static [TierSpec<T>] {
        self.specs
    }

    pub fn tier_for(&self, amount: f64) -> Option<&'static TierSpec<T>> {
        self.specs.iter().rev().find(|spec| amount >= spec.min)
    }

    /// First tier above `amount`, or `None` at the top.
    pub fn next_above(&self, amount: f64) -> Option<NextTier<T>> {
        self.specs
            .iter()
            .find(|spec| amount < spec.min)
            .map(|spec| NextTier {
                tier: spec.tier,
                needed: spec.min - amount,
            })
    }
}

pub const CHAMPION_TIERS: TierTable<ChampionTier> = TierTable::new(&[
    TierSpec {
        tier: ChampionTier::Champion,
        min: 1_000_000.0,
        cap: CommandCap::Limited(1),
        vote_weight: 2.0,
        label: "Champion",
    },
    TierSpec {
        tier: ChampionTier::Elite,
        min: 5_000_000.0,
        cap: CommandCap::Limited(3),
        vote_weight: 3.0,
        label: "Elite Champion",
    },
    TierSpec {
        tier: ChampionTier::Legendary,
        min: 25_000_000.0,
        cap: CommandCap::Unlimited,
        vote_weight: 5.0,
        label: "Legendary",
    },
]);

pub const BURN_TIERS: TierTable<BurnTier> = TierTable::new(&[
    TierSpec {
        tier: BurnTier::Grunt,
        min: 10_000.0,
        cap: CommandCap::Limited(1),
        vote_weight: 1.0,
        label: "Grunt",
    },
    TierSpec {
        tier: BurnTier::Executive,
        min: 50_000.0,
        cap: CommandCap::Limited(3),
        vote_weight: 1.0,
        label: "Executive",
    },
    TierSpec {
        tier: BurnTier::Boss,
        min: 250_000.0,
        cap: CommandCap::Limited(10),
        vote_weight: 1.0,
        label: "Boss",
    },
]);
