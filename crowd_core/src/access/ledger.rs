use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::tiers::{CommandCap, Remaining, TierSpec, TierTable};

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AccessRecord {
    pub amount: f64,
    #[serde(default)]
    pub hourly_used: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LedgerError {
    #[error("transaction {0} was already recorded")]
    DuplicateSignature(String),
    #[error("amount must be a positive number")]
    NonPositiveAmount,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum DenyReason {
    NoTier,
    HourlyLimit { used: u32, cap: u32 },
}

/// Why an identity may not bypass the vote right now.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize)]
#[error("{message}")]
pub struct AccessDenied {
    pub reason: DenyReason,
    pub tier: Option<String>,
    pub message: String,
}

/// Result of an allowed check. Reading it never spends a slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InjectPermit {
    tier_label: &'static str,
    remaining: Remaining,
}

impl InjectPermit {
    pub fn tier_label(&self) -> &'static str {
        self.tier_label
    }

    /// Slots available right now.
    pub fn remaining(&self) -> Remaining {
        self.remaining
    }
}

/// A slot that was checked and spent in one step.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SlotSpent {
    pub tier_label: &'static str,
    /// Slots left after this one.
    pub remaining: Remaining,
}

/// Persisted form of a ledger.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LedgerSnapshot {
    #[serde(default)]
    pub records: BTreeMap<String, AccessRecord>,
    #[serde(default)]
    pub signatures: BTreeSet<String>,
}

/// Per-identity cumulative amounts and hourly usage for one gate.
#[derive(Debug, Clone)]
pub struct AccessLedger<T: 'static> {
    table: TierTable<T>,
    records: BTreeMap<String, AccessRecord>,
    signatures: BTreeSet<String>,
    denial_hint: &'static str,
    dirty: bool,
    backing_path: Option<PathBuf>,
}

impl<T: Copy + PartialEq> AccessLedger<T> {
    /// `denial_hint` is shown to identities that have no tier yet.
    pub fn new(table: TierTable<T>, denial_hint: &'static str) -> Self {
        Self {
            table,
            records: BTreeMap::new(),
            signatures: BTreeSet::new(),
            denial_hint,
            dirty: false,
            backing_path: None,
        }
    }

    pub fn from_json_file(
        table: TierTable<T>,
        denial_hint: &'static str,
        path: Option<&Path>,
    ) -> Result<Self> {
        let mut ledger = Self::new(table, denial_hint);
        ledger.backing_path = path.map(Path::to_path_buf);
        if let Some(p) = path {
            if p.exists() {
                let raw = fs::read_to_string(p)
                    .with_context(|| format!("failed to read ledger file: {}", p.display()))?;
                let snapshot: LedgerSnapshot = serde_json::from_str(&raw)
                    .with_context(|| format!("failed to parse ledger json: {}", p.display()))?;
                ledger.restore(snapshot);
            }
        }
        Ok(ledger)
    }

    pub fn table(&self) -> TierTable<T> {
        self.table
    }

    /// Adds `amount` to the identity's cumulative total. A signature is only
    /// ever accepted once.
    pub fn record_increase(
        &mut self,
        identity: &str,
        amount: f64,
        signature: Option<&str>,
    ) -> Result<f64, LedgerError> {
        if !amount.is_finite() || amount <= 0.0 {
            return Err(LedgerError::NonPositiveAmount);
        }
        if let Some(signature) = signature {
            if self.signatures.contains(signature) {
                return Err(LedgerError::DuplicateSignature(signature.to_string()));
            }
            self.signatures.insert(signature.to_string());
        }
        let record = self.records.entry(identity.to_string()).or_default();
        record.amount += amount;
        self.dirty = true;
        Ok(record.amount)
    }

    /// Replaces the identity's amount outright (balances, not burns).
    pub fn set_amount(&mut self, identity: &str, amount: f64) {
        let amount = if amount.is_finite() { amount.max(0.0) } else { 0.0 };
        let record = self.records.entry(identity.to_string()).or_default();
        if record.amount != amount {
            record.amount = amount;
            self.dirty = true;
        }
    }

    pub fn has_signature(&self, signature: &str) -> bool {
        self.signatures.contains(signature)
    }

    pub fn record(&self, identity: &str) -> Option<&AccessRecord> {
        self.records.get(identity)
    }

    pub fn amount(&self, identity: &str) -> f64 {
        self.records.get(identity).map_or(0.0, |record| record.amount)
    }

    pub fn hourly_used(&self, identity: &str) -> u32 {
        self.records.get(identity).map_or(0, |record| record.hourly_used)
    }

    pub fn tier(&self, identity: &str) -> Option<&'static TierSpec<T>> {
        self.table.tier_for(self.amount(identity))
    }

    pub fn records(&self) -> impl Iterator<Item = (&str, &AccessRecord)> {
        self.records.iter().map(|(id, record)| (id.as_str(), record))
    }

    pub fn can_inject_command(&self, identity: &str) -> Result<InjectPermit, AccessDenied> {
        let Some(spec) = self.tier(identity) else {
            return Err(AccessDenied {
                reason: DenyReason::NoTier,
                tier: None,
                message: self.denial_hint.to_string(),
            });
        };
        let used = self.hourly_used(identity);
        if let CommandCap::Limited(cap) = spec.cap {
            if used >= cap {
                return Err(AccessDenied {
                    reason: DenyReason::HourlyLimit { used, cap },
                    tier: Some(spec.label.to_string()),
                    message: format!("Hourly limit reached ({used}/{cap}). Resets every hour."),
                });
            }
        }
        Ok(InjectPermit {
            tier_label: spec.label,
            remaining: spec.cap.remaining(used),
        })
    }

    /// Re-runs the cap check and spends one hourly slot under the same
    /// borrow, so concurrent callers can never exceed the cap.
    pub fn spend_command_slot(&mut self, identity: &str) -> Result<SlotSpent, AccessDenied> {
        let permit = self.can_inject_command(identity)?;
        let record = self.records.entry(identity.to_string()).or_default();
        record.hourly_used = record.hourly_used.saturating_add(1);
        let used = record.hourly_used;
        self.dirty = true;
        let remaining = match self.table.tier_for(self.amount(identity)) {
            Some(spec) => spec.cap.remaining(used),
            None => Remaining::Count(0),
        };
        Ok(SlotSpent {
            tier_label: permit.tier_label,
            remaining,
        })
    }

    pub fn reset_hourly(&mut self) {
        for record in self.records.values_mut() {
            if record.hourly_used != 0 {
                record.hourly_used = 0;
                self.dirty = true;
            }
        }
    }

    pub fn snapshot(&self) -> LedgerSnapshot {
        LedgerSnapshot {
            records: self.records.clone(),
            signatures: self.signatures.clone(),
        }
    }

    pub fn restore(&mut self, snapshot: LedgerSnapshot) {
        self.records = snapshot.records;
        self.signatures = snapshot.signatures;
        self.dirty = false;
    }

    pub fn save(&mut self) -> Result<()> {
        let Some(path) = self.backing_path.as_ref() else {
            self.dirty = false;
            return Ok(());
        };
        if !self.dirty {
            return Ok(());
        }
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() && !parent.exists() {
                fs::create_dir_all(parent).with_context(|| {
                    format!("failed to create ledger directory: {}", parent.display())
                })?;
            }
        }
        let serialized = serde_json::to_string_pretty(&self.snapshot())
            .with_context(|| format!("failed to serialize ledger: {}", path.display()))?;
        fs::write(path, serialized)
            .with_context(|| format!("failed to write ledger file: {}", path.display()))?;
        self.dirty = false;
        Ok(())
    }
}

impl fmt::Display for DenyReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DenyReason::NoTier => f.write_str("no tier"),
            DenyReason::HourlyLimit { used, cap } => write!(f, "hourly limit {used}/{cap}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::access::tiers::{BurnTier, BURN_TIERS, CHAMPION_TIERS};
    use tempfile::tempdir;

    fn burns() -> AccessLedger<BurnTier> {
        AccessLedger::new(BURN_TIERS, "No burn tier")
    }

    #[test]
    fn no_tier_is_denied() {
        let ledger = burns();
        let denied = ledger.can_inject_command("ash").expect_err("no tier");
        assert_eq!(denied.reason, DenyReason::NoTier);
        assert_eq!(denied.tier, None);
    }

    #[test]
    fn cap_holds_until_hourly_reset() -> std::result::Result<(), LedgerError> {
        let mut ledger = burns();
        ledger.record_increase("ash", 10_000.0, None)?;

        let permit = ledger.can_inject_command("ash").expect("grunt slot");
        assert_eq!(permit.remaining(), Remaining::Count(1));
        let spent = ledger.spend_command_slot("ash").expect("spend");
        assert_eq!(spent.remaining, Remaining::Count(0));
        assert_eq!(spent.tier_label, "Grunt");

        let denied = ledger.can_inject_command("ash").expect_err("capped");
        assert_eq!(denied.reason, DenyReason::HourlyLimit { used: 1, cap: 1 });
        assert_eq!(denied.tier.as_deref(), Some("Grunt"));

        ledger.reset_hourly();
        assert!(ledger.can_inject_command("ash").is_ok());
        Ok(())
    }

    #[test]
    fn unlimited_tier_never_caps() {
        let mut ledger = AccessLedger::new(CHAMPION_TIERS, "Not a Champion");
        ledger.set_amount("misty", 30_000_000.0);
        for _ in 0..100 {
            let spent = ledger.spend_command_slot("misty").expect("unlimited");
            assert_eq!(spent.remaining, Remaining::Unlimited);
        }
    }

    #[test]
    fn earlier_checks_cannot_be_spent_twice() -> std::result::Result<(), LedgerError> {
        let mut ledger = burns();
        ledger.record_increase("ash", 10_000.0, None)?;
        assert!(ledger.can_inject_command("ash").is_ok());
        assert!(ledger.can_inject_command("ash").is_ok());

        assert!(ledger.spend_command_slot("ash").is_ok());
        let denied = ledger.spend_command_slot("ash").expect_err("capped");
        assert_eq!(denied.reason, DenyReason::HourlyLimit { used: 1, cap: 1 });
        assert_eq!(ledger.hourly_used("ash"), 1);
        Ok(())
    }

    #[test]
    fn spending_without_a_tier_is_denied() {
        let mut ledger = burns();
        let denied = ledger.spend_command_slot("gary").expect_err("no tier");
        assert_eq!(denied.reason, DenyReason::NoTier);
        assert!(ledger.record("gary").is_none());
    }

    #[test]
    fn replayed_signature_is_rejected() {
        let mut ledger = burns();
        assert_eq!(ledger.record_increase("ash", 6_000.0, Some("sig-1")), Ok(6_000.0));
        assert_eq!(
            ledger.record_increase("brock", 6_000.0, Some("sig-1")),
            Err(LedgerError::DuplicateSignature("sig-1".to_string()))
        );
        assert_eq!(ledger.amount("brock"), 0.0);
        assert_eq!(ledger.record_increase("ash", 6_000.0, Some("sig-2")), Ok(12_000.0));
        assert_eq!(ledger.tier("ash").map(|s| s.tier), Some(BurnTier::Grunt));
    }

    #[test]
    fn non_positive_amounts_leave_state_alone() {
        let mut ledger = burns();
        assert_eq!(
            ledger.record_increase("ash", 0.0, Some("sig")),
            Err(LedgerError::NonPositiveAmount)
        );
        assert!(!ledger.has_signature("sig"));
        assert!(ledger.record("ash").is_none());
    }

    #[test]
    fn ledger_survives_save_and_reload() -> Result<()> {
        let dir = tempdir()?;
        let path = dir.path().join("state").join("burns.json");

        let mut ledger = AccessLedger::from_json_file(BURN_TIERS, "No burn tier", Some(&path))?;
        ledger
            .record_increase("ash", 50_000.0, Some("sig-a"))
            .map_err(anyhow::Error::from)?;
        ledger
            .spend_command_slot("ash")
            .map_err(anyhow::Error::from)?;
        ledger.save()?;

        let restored = AccessLedger::from_json_file(BURN_TIERS, "No burn tier", Some(&path))?;
        assert_eq!(restored.amount("ash"), 50_000.0);
        assert_eq!(restored.hourly_used("ash"), 1);
        assert!(restored.has_signature("sig-a"));
        Ok(())
    }
}
