use std::path::Path;
use std::sync::{Mutex, MutexGuard, PoisonError, RwLock, RwLockReadGuard};

use anyhow::Result;
use crowd_core::access::{BalanceGate, BurnVerifier, OfflineLookup};
use crowd_core::emulator::SharedQueue;
use crowd_core::inject::DirectInjector;
use crowd_core::wallet::WalletRegistry;
use crowd_core::{
    ActiveGame, CommandGrammar, ConfigCatalog, ConfigError, FeatureFlags, VotingSettings,
};
use thiserror::Error;

use crate::vote_loop::{LoopClosed, VoteHandle};

pub const BALANCES_FILE: &str = "champions.json";
pub const BURNS_FILE: &str = "team_rocket.json";
pub const WALLETS_FILE: &str = "wallets.json";

#[derive(Debug, Error)]
pub enum SwitchError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Loop(#[from] LoopClosed),
}

/// Token gates and the wallet directory. Present only with the economy flag.
pub struct Economy {
    pub balances: BalanceGate<OfflineLookup>,
    pub burns: BurnVerifier<OfflineLookup>,
    wallets: Mutex<WalletRegistry>,
}

impl Economy {
    #[cfg(test)]
    pub fn in_memory() -> Self {
        Self {
            balances: BalanceGate::new(OfflineLookup),
            burns: BurnVerifier::new(OfflineLookup),
            wallets: Mutex::new(WalletRegistry::new()),
        }
    }

    /// Restores ledgers and wallets from `state_dir`; absent files start empty.
    pub fn load(state_dir: &Path) -> Result<Self> {
        let balances =
            BalanceGate::from_json_file(OfflineLookup, Some(&state_dir.join(BALANCES_FILE)))?;
        let burns = BurnVerifier::from_json_file(OfflineLookup, Some(&state_dir.join(BURNS_FILE)))?;
        let wallets = WalletRegistry::from_json_file(Some(&state_dir.join(WALLETS_FILE)))?;
        let stats = wallets.stats();
        log::info!(
            "[economy] state loaded from {} ({} wallets)",
            state_dir.display(),
            stats.total
        );
        Ok(Self {
            balances,
            burns,
            wallets: Mutex::new(wallets),
        })
    }

    pub fn wallets(&self) -> MutexGuard<'_, WalletRegistry> {
        self.wallets.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn wallet_address(&self, identity: &str) -> Option<String> {
        self.wallets().address(identity).map(str::to_string)
    }

    pub fn reset_hourly(&self) {
        self.balances.reset_hourly();
        self.burns.reset_hourly();
        log::info!("[economy] hourly limits reset");
    }

    pub fn save(&self) -> Result<()> {
        self.balances.save()?;
        self.burns.save()?;
        self.wallets().save()
    }
}

/// Shared by the control routes and chat ingestion.
pub struct AppState {
    catalog: ConfigCatalog,
    grammar: RwLock<CommandGrammar>,
    window_override_ms: Option<u64>,
    pub features: FeatureFlags,
    pub votes: VoteHandle,
    pub queue: SharedQueue,
    pub injector: DirectInjector,
    pub economy: Option<Economy>,
}

impl AppState {
    pub fn new(
        catalog: ConfigCatalog,
        grammar: CommandGrammar,
        window_override_ms: Option<u64>,
        votes: VoteHandle,
        queue: SharedQueue,
        injector: DirectInjector,
        economy: Option<Economy>,
    ) -> Self {
        Self {
            catalog,
            grammar: RwLock::new(grammar),
            window_override_ms,
            features: FeatureFlags {
                economy: economy.is_some(),
            },
            votes,
            queue,
            injector,
            economy,
        }
    }

    pub fn catalog(&self) -> &ConfigCatalog {
        &self.catalog
    }

    /// Never hold the guard across an `.await`.
    pub fn grammar(&self) -> RwLockReadGuard<'_, CommandGrammar> {
        self.grammar.read().unwrap_or_else(PoisonError::into_inner)
    }

    /// Stops voting, swaps the active game and starts a fresh window.
    pub async fn switch_game(&self, game_id: &str) -> Result<ActiveGame, SwitchError> {
        let active = self.catalog.activate(game_id, self.window_override_ms)?;
        let grammar = CommandGrammar::for_game(active.clone())?;
        let settings = VotingSettings::for_game(&active);
        {
            let mut current = self.grammar.write().unwrap_or_else(PoisonError::into_inner);
            *current = grammar;
        }
        self.queue.lock().set_game(active.name.clone());
        self.votes.restart(settings).await?;
        log::info!("[game] switched to {} ({})", active.name, active.id);
        Ok(active)
    }
}

#[cfg(test)]
pub(crate) fn test_catalog() -> ConfigCatalog {
    use serde_json::json;

    let mut catalog = ConfigCatalog::default();
    catalog.insert_system(
        serde_json::from_value(json!({
            "id": "gba",
            "name": "Game Boy Advance",
            "buttons": {"a": {}, "b": {}, "up": {}, "down": {}, "left": {}, "right": {}},
            "aliases": {"u": "up"},
            "command_prefixes": ["!"],
            "hold_commands": true,
        }))
        .expect("gba system"),
    );
    catalog.insert_system(
        serde_json::from_value(json!({
            "id": "n64",
            "name": "Nintendo 64",
            "buttons": {"a": {}, "b": {}, "up": {}, "down": {}, "z": {}},
            "command_prefixes": ["!"],
        }))
        .expect("n64 system"),
    );
    catalog.insert_game(
        serde_json::from_value(json!({"id": "test", "name": "Test Quest", "system": "gba"}))
            .expect("test game"),
    );
    catalog.insert_game(
        serde_json::from_value(json!({
            "id": "party",
            "name": "Party Game",
            "system": "n64",
            "vote_window_ms": 1500,
            "multiplayer": {"enabled": true, "max_players": 2, "team_prefixes": ["1", "2"]},
        }))
        .expect("party game"),
    );
    catalog
}

/// In-memory engine on the `test` game with a running vote loop.
#[cfg(test)]
pub(crate) fn test_state(
    economy: Option<Economy>,
) -> (std::sync::Arc<AppState>, tokio::task::JoinHandle<()>) {
    use std::sync::Arc;

    use crowd_core::dispatch::{DispatchError, Dispatcher, EmulatorSink, OverlaySink};
    use crowd_core::emulator::CommandQueue;
    use crowd_core::{CommandIdSequence, VotingCore, WinnerResult};

    use crate::vote_loop::VoteLoop;

    struct NoOverlay;

    impl OverlaySink for NoOverlay {
        fn command_executed(&self, _result: &WinnerResult) -> Result<(), DispatchError> {
            Ok(())
        }
    }

    let catalog = test_catalog();
    let active = catalog.activate("test", None).expect("test game");
    let grammar = CommandGrammar::for_game(active.clone()).expect("grammar");
    let queue = SharedQueue::new(CommandQueue::new(active.name.clone()));
    let emulator: Arc<dyn EmulatorSink> = Arc::new(queue.clone());
    let dispatcher = Dispatcher::new(emulator, Arc::new(NoOverlay));
    let ids = CommandIdSequence::new();
    let core = VotingCore::new(VotingSettings::for_game(&active), ids.clone());
    let (votes, task) = VoteLoop::new(core, dispatcher.clone(), None).spawn();
    let injector = DirectInjector::new(ids, dispatcher);
    let state = AppState::new(catalog, grammar, None, votes, queue, injector, economy);
    (Arc::new(state), task)
}
