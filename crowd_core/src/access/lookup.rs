use std::future::Future;

use thiserror::Error;

/// Failures from the external balance and transaction lookups. Display text
/// is what API callers see.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LookupError {
    #[error("On-chain verification not available")]
    Unavailable,
    #[error("Transaction not found")]
    NotFound,
    #[error("Transaction failed on-chain")]
    FailedOnChain,
    #[error("No matching burn transfer found in transaction")]
    NoMatchingTransfer,
    #[error("lookup transport error: {0}")]
    Transport(String),
}

/// Reads a wallet's token balance.
pub trait BalanceSource: Send + Sync {
    fn fetch_balance(&self, wallet: &str)
        -> impl Future<Output = Result<f64, LookupError>> + Send;
}

/// Confirms a burn transaction sent by `wallet` and reports the burned amount.
pub trait BurnTxSource: Send + Sync {
    fn verify_burn(
        &self,
        signature: &str,
        wallet: &str,
    ) -> impl Future<Output = Result<f64, LookupError>> + Send;
}

/// Manual/trust mode: nothing can be checked on chain.
#[derive(Debug, Clone, Copy, Default)]
pub struct OfflineLookup;

impl BalanceSource for OfflineLookup {
    async fn fetch_balance(&self, _wallet: &str) -> Result<f64, LookupError> {
        Err(LookupError::Unavailable)
    }
}

impl BurnTxSource for OfflineLookup {
    async fn verify_burn(&self, _signature: &str, _wallet: &str) -> Result<f64, LookupError> {
        Err(LookupError::Unavailable)
    }
}
