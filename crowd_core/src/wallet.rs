use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::outcome::unix_millis;

const BASE58: &str = "123456789ABCDEFGHJKLMNPQRSTUVWXYZabcdefghijkmnopqrstuvwxyz";

/// Base58, 32 to 44 characters.
pub fn is_valid_address(address: &str) -> bool {
    (32..=44).contains(&address.len()) && address.chars().all(|c| BASE58.contains(c))
}

/// Extracts the address from a `!wallet <address>` chat line. The command
/// word is case-insensitive; the address is not.
pub fn parse_wallet_registration(text: &str) -> Option<&str> {
    let text = text.trim();
    let rest = text.strip_prefix(['!', '/', '-', '.'])?;
    let split = rest.find(char::is_whitespace)?;
    let (word, address) = rest.split_at(split);
    if !word.eq_ignore_ascii_case("wallet") && !word.eq_ignore_ascii_case("address") {
        return None;
    }
    let address = address.trim_start();
    is_valid_address(address).then_some(address)
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WalletInfo {
    pub identity: String,
    pub display_name: String,
    pub wallet_address: String,
    pub registered_at_ms: u64,
    #[serde(default)]
    pub locked: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum WalletError {
    #[error("Invalid Solana address format")]
    InvalidAddress,
    #[error("Wallet already locked. Cannot change.")]
    Locked,
    #[error("This address is already registered to another user")]
    Taken,
    #[error("No wallet registered")]
    NotRegistered,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct WalletStats {
    pub total: usize,
    pub locked: usize,
}

/// Identity to wallet address directory.
#[derive(Debug, Default, Clone)]
pub struct WalletRegistry {
    wallets: BTreeMap<String, WalletInfo>,
    dirty: bool,
    backing_path: Option<PathBuf>,
}

impl WalletRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_json_file(path: Option<&Path>) -> Result<Self> {
        let mut registry = Self {
            backing_path: path.map(Path::to_path_buf),
            ..Self::default()
        };
        if let Some(p) = path {
            if p.exists() {
                let raw = fs::read_to_string(p)
                    .with_context(|| format!("failed to read wallet file: {}", p.display()))?;
                registry.wallets = serde_json::from_str(&raw)
                    .with_context(|| format!("failed to parse wallet json: {}", p.display()))?;
            }
        }
        Ok(registry)
    }

    pub fn register(
        &mut self,
        identity: &str,
        display_name: &str,
        address: &str,
    ) -> Result<&WalletInfo, WalletError> {
        if !is_valid_address(address) {
            return Err(WalletError::InvalidAddress);
        }
        if self.wallets.get(identity).is_some_and(|info| info.locked) {
            return Err(WalletError::Locked);
        }
        let taken = self
            .wallets
            .iter()
            .any(|(key, info)| key != identity && info.wallet_address == address);
        if taken {
            return Err(WalletError::Taken);
        }

        let info = self
            .wallets
            .entry(identity.to_string())
            .or_insert_with(|| WalletInfo {
                identity: identity.to_string(),
                display_name: String::new(),
                wallet_address: String::new(),
                registered_at_ms: unix_millis(),
                locked: false,
            });
        info.display_name = display_name.to_string();
        info.wallet_address = address.to_string();
        self.dirty = true;
        log::info!("[wallet] {identity} registered {}", short_address(address));
        Ok(info)
    }

    /// One-way: a locked wallet can no longer be changed.
    pub fn lock(&mut self, identity: &str) -> Result<(), WalletError> {
        let info = self
            .wallets
            .get_mut(identity)
            .ok_or(WalletError::NotRegistered)?;
        if info.locked {
            return Err(WalletError::Locked);
        }
        info.locked = true;
        self.dirty = true;
        Ok(())
    }

    pub fn wallet(&self, identity: &str) -> Option<&WalletInfo> {
        self.wallets.get(identity)
    }

    pub fn address(&self, identity: &str) -> Option<&str> {
        self.wallets
            .get(identity)
            .map(|info| info.wallet_address.as_str())
    }

    pub fn stats(&self) -> WalletStats {
        WalletStats {
            total: self.wallets.len(),
            locked: self.wallets.values().filter(|info| info.locked).count(),
        }
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
                    format!("failed to create wallet directory: {}", parent.display())
                })?;
            }
        }
        let serialized = serde_json::to_string_pretty(&self.wallets)
            .with_context(|| format!("failed to serialize wallets: {}", path.display()))?;
        fs::write(path, serialized)
            .with_context(|| format!("failed to write wallet file: {}", path.display()))?;
        self.dirty = false;
        Ok(())
    }
}

/// `abcdefgh...wxyz` form used in logs and chat replies.
pub fn short_address(address: &str) -> String {
    if address.len() <= 12 {
        return address.to_string();
    }
    format!("{}...{}", &address[..8], &address[address.len() - 4..])
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    const ADDR_A: &str = "7xKXtg2CW87d97TXJSDpbD5jBkheTqA83TZRuJosgAsU";
    const ADDR_B: &str = "9WzDXwBbmkg8ZTbNMqUxvQRAyrZzDsGYdLVL9zYtAWWM";

    #[test]
    fn chat_registration_is_recognised() {
        assert_eq!(parse_wallet_registration(&format!("!wallet {ADDR_A}")), Some(ADDR_A));
        assert_eq!(parse_wallet_registration(&format!("/ADDRESS   {ADDR_B}")), Some(ADDR_B));
        assert_eq!(parse_wallet_registration("!wallet 0OIl"), None);
        assert_eq!(parse_wallet_registration(&format!("wallet {ADDR_A}")), None);
    }

    #[test]
    fn address_cannot_be_claimed_twice() {
        let mut wallets = WalletRegistry::new();
        wallets.register("ash", "Ash", ADDR_A).expect("register");
        assert_eq!(wallets.register("gary", "Gary", ADDR_A), Err(WalletError::Taken));
        wallets.register("ash", "Ash", ADDR_B).expect("change before lock");
        assert_eq!(wallets.address("ash"), Some(ADDR_B));
    }

    #[test]
    fn locked_wallet_is_final() {
        let mut wallets = WalletRegistry::new();
        assert_eq!(wallets.lock("ash"), Err(WalletError::NotRegistered));
        wallets.register("ash", "Ash", ADDR_A).expect("register");
        wallets.lock("ash").expect("lock");
        assert_eq!(wallets.register("ash", "Ash", ADDR_B), Err(WalletError::Locked));
        assert_eq!(wallets.stats(), WalletStats { total: 1, locked: 1 });
    }

    #[test]
    fn invalid_address_is_rejected() {
        let mut wallets = WalletRegistry::new();
        assert_eq!(wallets.register("ash", "Ash", "short"), Err(WalletError::InvalidAddress));
        assert!(wallets.wallet("ash").is_none());
    }

    #[test]
    fn wallets_persist_between_runs() -> Result<()> {
        let dir = tempdir()?;
        let path = dir.path().join("wallets.json");
        let mut wallets = WalletRegistry::from_json_file(Some(&path))?;
        wallets
            .register("ash", "Ash", ADDR_A)
            .map_err(anyhow::Error::from)?;
        wallets.save()?;

        let reloaded = WalletRegistry::from_json_file(Some(&path))?;
        assert_eq!(reloaded.address("ash"), Some(ADDR_A));
        assert_eq!(short_address(ADDR_A), "7xKXtg2C...gAsU");
        Ok(())
    }
}
