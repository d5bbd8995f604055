use std::path::Path;
use std::sync::{Mutex, MutexGuard, PoisonError};

use anyhow::Result;
use serde::Serialize;
use thiserror::Error;

use super::ledger::{AccessDenied, AccessLedger, InjectPermit, LedgerError, SlotSpent};
use super::lookup::{BurnTxSource, LookupError};
use super::tiers::{BurnTier, CommandCap, NextTier, Remaining, TierSpec, BURN_TIERS};
use super::InjectGate;
use crate::outcome::CommandSource;

const NO_BURN_TIER: &str = "No burn tier. Burn PPP tokens to join Team Rocket!";

#[derive(Debug, Error)]
pub enum BurnError {
    #[error("transaction {0} was already recorded")]
    Duplicate(String),
    #[error("Burn verification failed: {0}")]
    Verification(#[from] LookupError),
    #[error(transparent)]
    Ledger(LedgerError),
}

impl From<LedgerError> for BurnError {
    fn from(err: LedgerError) -> Self {
        match err {
            LedgerError::DuplicateSignature(signature) => BurnError::Duplicate(signature),
            other => BurnError::Ledger(other),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BurnReceipt {
    pub amount: f64,
    pub total: f64,
    pub tier: Option<BurnTier>,
    pub verified: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BurnStatus {
    pub burned: f64,
    pub tier: Option<BurnTier>,
    pub tier_label: &'static str,
    pub commands_per_hour: CommandCap,
    pub commands_used: u32,
    pub commands_remaining: u32,
    pub next_tier: Option<NextTier<BurnTier>>,
}

/// Token-burning gate. Burns accumulate; a transaction signature counts once.
pub struct BurnVerifier<S> {
    source: S,
    ledger: Mutex<AccessLedger<BurnTier>>,
}

impl<S: BurnTxSource> BurnVerifier<S> {
    pub fn new(source: S) -> Self {
        Self {
            source,
            ledger: Mutex::new(AccessLedger::new(BURN_TIERS, NO_BURN_TIER)),
        }
    }

    pub fn from_json_file(source: S, path: Option<&Path>) -> Result<Self> {
        Ok(Self {
            source,
            ledger: Mutex::new(AccessLedger::from_json_file(BURN_TIERS, NO_BURN_TIER, path)?),
        })
    }

    fn lock(&self) -> MutexGuard<'_, AccessLedger<BurnTier>> {
        self.ledger.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Records a reported burn without checking it on chain.
    pub fn record_burn(
        &self,
        identity: &str,
        amount: f64,
        signature: Option<&str>,
    ) -> Result<BurnReceipt, BurnError> {
        let mut ledger = self.lock();
        let total = ledger.record_increase(identity, amount, signature)?;
        let tier = ledger.tier(identity).map(|spec| spec.tier);
        log::info!("[burn] {identity} burned {amount} (total {total})");
        Ok(BurnReceipt {
            amount,
            total,
            tier,
            verified: false,
        })
    }

    /// Looks `signature` up and credits the burned amount to `identity`. A
    /// signature already on the ledger is refused before any lookup.
    pub async fn verify_and_record(
        &self,
        identity: &str,
        signature: &str,
        wallet: &str,
    ) -> Result<BurnReceipt, BurnError> {
        if self.lock().has_signature(signature) {
            return Err(BurnError::Duplicate(signature.to_string()));
        }
        let amount = self.source.verify_burn(signature, wallet).await?;
        let mut receipt = self.record_burn(identity, amount, Some(signature))?;
        receipt.verified = true;
        Ok(receipt)
    }

    pub fn burn_status(&self, identity: &str) -> BurnStatus {
        let ledger = self.lock();
        let burned = ledger.amount(identity);
        let used = ledger.hourly_used(identity);
        let spec = ledger.tier(identity);
        let cap = spec.map_or(CommandCap::Limited(0), |spec| spec.cap);
        let commands_remaining = match cap.remaining(used) {
            Remaining::Count(count) => count,
            Remaining::Unlimited => u32::MAX,
        };
        BurnStatus {
            burned,
            tier: spec.map(|spec| spec.tier),
            tier_label: spec.map_or("None", |spec| spec.label),
            commands_per_hour: cap,
            commands_used: used,
            commands_remaining,
            next_tier: BURN_TIERS.next_above(burned),
        }
    }

    pub fn reset_hourly(&self) {
        self.lock().reset_hourly();
    }

    pub fn tiers(&self) -> &'static [TierSpec<BurnTier>] {
        BURN_TIERS.specs()
    }

    pub fn save(&self) -> Result<()> {
        self.lock().save()
    }
}

impl<S: BurnTxSource> InjectGate for BurnVerifier<S> {
    fn source(&self) -> CommandSource {
        CommandSource::TeamRocket
    }

    fn can_inject(&self, identity: &str) -> Result<InjectPermit, AccessDenied> {
        self.lock().can_inject_command(identity)
    }

    fn spend_slot(&self, identity: &str) -> Result<SlotSpent, AccessDenied> {
        self.lock().spend_command_slot(identity)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::access::lookup::OfflineLookup;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[derive(Clone, Default)]
    struct FixedBurn {
        amount: f64,
        calls: Arc<AtomicUsize>,
    }

    impl BurnTxSource for FixedBurn {
        async fn verify_burn(&self, _signature: &str, _wallet: &str) -> Result<f64, LookupError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(self.amount)
        }
    }

    #[tokio::test]
    async fn replayed_signature_skips_the_lookup() {
        let source = FixedBurn {
            amount: 60_000.0,
            calls: Arc::new(AtomicUsize::new(0)),
        };
        let verifier = BurnVerifier::new(source.clone());

        let receipt = verifier
            .verify_and_record("jessie", "sig-1", "wallet")
            .await
            .expect("first burn");
        assert!(receipt.verified);
        assert_eq!(receipt.tier, Some(BurnTier::Executive));

        let replay = verifier.verify_and_record("james", "sig-1", "wallet").await;
        assert!(matches!(replay, Err(BurnError::Duplicate(sig)) if sig == "sig-1"));
        assert_eq!(source.calls.load(Ordering::SeqCst), 1);
        assert_eq!(verifier.burn_status("james").burned, 0.0);
    }

    #[tokio::test]
    async fn offline_lookup_leaves_ledger_untouched() {
        let verifier = BurnVerifier::new(OfflineLookup);
        let err = verifier
            .verify_and_record("jessie", "sig-1", "wallet")
            .await
            .expect_err("offline");
        assert_eq!(
            err.to_string(),
            "Burn verification failed: On-chain verification not available"
        );
        assert_eq!(verifier.burn_status("jessie").burned, 0.0);
        verifier
            .record_burn("jessie", 10_000.0, Some("sig-1"))
            .expect("signature was never consumed");
    }

    #[test]
    fn status_reports_progress_and_usage() {
        let verifier = BurnVerifier::new(OfflineLookup);
        let empty = verifier.burn_status("meowth");
        assert_eq!(empty.tier_label, "None");
        assert_eq!(empty.commands_remaining, 0);
        assert_eq!(empty.next_tier.map(|n| n.needed), Some(10_000.0));

        verifier.record_burn("meowth", 55_000.0, None).expect("burn");
        assert!(verifier.can_inject("meowth").is_ok());
        let spent = verifier.spend_slot("meowth").expect("executive");
        assert_eq!(spent.remaining, Remaining::Count(2));
        assert_eq!(spent.tier_label, "Executive");

        let status = verifier.burn_status("meowth");
        assert_eq!(status.tier, Some(BurnTier::Executive));
        assert_eq!(status.commands_used, 1);
        assert_eq!(status.commands_remaining, 2);
        assert_eq!(
            status.next_tier,
            Some(NextTier {
                tier: BurnTier::Boss,
                needed: 195_000.0
            })
        );
    }

    #[test]
    fn non_positive_burn_is_rejected() {
        let verifier = BurnVerifier::new(OfflineLookup);
        assert!(matches!(
            verifier.record_burn("meowth", -5.0, None),
            Err(BurnError::Ledger(LedgerError::NonPositiveAmount))
        ));
    }
}
