//! Privilege gates that let an identity skip the vote.

mod balance;
mod burn;
mod ledger;
mod lookup;
mod tiers;

pub use balance::{BalanceCheck, BalanceGate, BalanceStats, BALANCE_CACHE_TTL};
pub use burn::{BurnError, BurnReceipt, BurnStatus, BurnVerifier};
pub use ledger::{
    AccessDenied, AccessLedger, AccessRecord, DenyReason, InjectPermit, LedgerError,
    LedgerSnapshot, SlotSpent,
};
pub use lookup::{BalanceSource, BurnTxSource, LookupError, OfflineLookup};
pub use tiers::{
    BurnTier, ChampionTier, CommandCap, NextTier, Remaining, TierSpec, TierTable, BURN_TIERS,
    CHAMPION_TIERS,
};

use crate::outcome::CommandSource;

/// Shared shape of the balance and burn gates for direct injection.
pub trait InjectGate {
    fn source(&self) -> CommandSource;
    /// Read-only check; never spends.
    fn can_inject(&self, identity: &str) -> Result<InjectPermit, AccessDenied>;
    /// Checks the cap and spends a slot under one lock.
    fn spend_slot(&self, identity: &str) -> Result<SlotSpent, AccessDenied>;
}
