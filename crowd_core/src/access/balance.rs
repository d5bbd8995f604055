use std::collections::{BTreeMap, HashMap};
use std::path::Path;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use anyhow::Result;
use serde::Serialize;

use super::ledger::{AccessDenied, AccessLedger, InjectPermit, SlotSpent};
use super::lookup::BalanceSource;
use super::tiers::{ChampionTier, TierSpec, CHAMPION_TIERS};
use super::InjectGate;
use crate::outcome::CommandSource;

pub const BALANCE_CACHE_TTL: Duration = Duration::from_secs(300);

const NOT_A_CHAMPION: &str = "Not a Champion. Hold PPP tokens for access!";

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BalanceCheck {
    pub balance: f64,
    pub tier: Option<ChampionTier>,
    pub label: Option<&'static str>,
    /// False when the value came from cache because a refetch failed.
    pub verified: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BalanceStats {
    pub cached_identities: usize,
    pub tiers: BTreeMap<&'static str, usize>,
}

struct BalanceState {
    ledger: AccessLedger<ChampionTier>,
    fetched_at: HashMap<String, Instant>,
}

/// Token-holding gate. Balances are cached for `ttl`; hourly slots are shared
/// per identity.
pub struct BalanceGate<S> {
    source: S,
    state: Mutex<BalanceState>,
    ttl: Duration,
}

impl<S: BalanceSource> BalanceGate<S> {
    pub fn new(source: S) -> Self {
        Self::with_ledger(source, AccessLedger::new(CHAMPION_TIERS, NOT_A_CHAMPION))
    }

    pub fn from_json_file(source: S, path: Option<&Path>) -> Result<Self> {
        let ledger = AccessLedger::from_json_file(CHAMPION_TIERS, NOT_A_CHAMPION, path)?;
        Ok(Self::with_ledger(source, ledger))
    }

    fn with_ledger(source: S, ledger: AccessLedger<ChampionTier>) -> Self {
        Self {
            source,
            state: Mutex::new(BalanceState {
                ledger,
                fetched_at: HashMap::new(),
            }),
            ttl: BALANCE_CACHE_TTL,
        }
    }

    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = ttl;
        self
    }

    fn lock(&self) -> MutexGuard<'_, BalanceState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Returns the identity's balance, refetching through `wallet` once the
    /// cached value is older than the TTL. A failed refetch serves the last
    /// known value and leaves the ledger untouched.
    pub async fn check_balance(&self, identity: &str, wallet: &str) -> BalanceCheck {
        {
            let state = self.lock();
            if let Some(fetched) = state.fetched_at.get(identity) {
                if fetched.elapsed() < self.ttl {
                    return describe(&state.ledger, identity, true);
                }
            }
        }

        match self.source.fetch_balance(wallet).await {
            Ok(balance) => {
                let mut state = self.lock();
                state.ledger.set_amount(identity, balance);
                state
                    .fetched_at
                    .insert(identity.to_string(), Instant::now());
                describe(&state.ledger, identity, true)
            }
            Err(err) => {
                log::warn!("[balance] lookup for {identity} failed: {err}");
                describe(&self.lock().ledger, identity, false)
            }
        }
    }

    /// Manual mode: trust the reported balance.
    pub fn set_balance(&self, identity: &str, balance: f64) -> BalanceCheck {
        let mut state = self.lock();
        state.ledger.set_amount(identity, balance);
        state
            .fetched_at
            .insert(identity.to_string(), Instant::now());
        describe(&state.ledger, identity, true)
    }

    /// Tier multiplier for chat votes; 1 without a tier.
    pub fn vote_weight(&self, identity: &str) -> f64 {
        self.lock()
            .ledger
            .tier(identity)
            .map_or(1.0, |spec| spec.vote_weight)
    }

    pub fn hourly_used(&self, identity: &str) -> u32 {
        self.lock().ledger.hourly_used(identity)
    }

    pub fn reset_hourly(&self) {
        self.lock().ledger.reset_hourly();
    }

    pub fn tiers(&self) -> &'static [TierSpec<ChampionTier>] {
        CHAMPION_TIERS.specs()
    }

    pub fn stats(&self) -> BalanceStats {
        let state = self.lock();
        let mut tiers: BTreeMap<&'static str, usize> = CHAMPION_TIERS
            .specs()
            .iter()
            .map(|spec| (tier_key(spec.tier), 0))
            .collect();
        let mut cached_identities = 0;
        for (_, record) in state.ledger.records() {
            cached_identities += 1;
            if let Some(spec) = CHAMPION_TIERS.tier_for(record.amount) {
                *tiers.entry(tier_key(spec.tier)).or_insert(0) += 1;
            }
        }
        BalanceStats {
            cached_identities,
            tiers,
        }
    }

    pub fn save(&self) -> Result<()> {
        self.lock().ledger.save()
    }
}

impl<S: BalanceSource> InjectGate for BalanceGate<S> {
    fn source(&self) -> CommandSource {
        CommandSource::Champions
    }

    fn can_inject(&self, identity: &str) -> Result<InjectPermit, AccessDenied> {
        self.lock().ledger.can_inject_command(identity)
    }

    fn spend_slot(&self, identity: &str) -> Result<SlotSpent, AccessDenied> {
        self.lock().ledger.spend_command_slot(identity)
    }
}

fn describe(ledger: &AccessLedger<ChampionTier>, identity: &str, verified: bool) -> BalanceCheck {
    let spec = ledger.tier(identity);
    BalanceCheck {
        balance: ledger.amount(identity),
        tier: spec.map(|spec| spec.tier),
        label: spec.map(|spec| spec.label),
        verified,
    }
}

fn tier_key(tier: ChampionTier) -> &'static str {
    match tier {
        ChampionTier::Champion => "champion",
        ChampionTier::Elite => "elite",
        ChampionTier::Legendary => "legendary",
    }
}
