use std::{
    collections::BTreeMap,
    fs,
    path::{Path, PathBuf},
    time::Duration,
};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

pub const DEFAULT_VOTE_WINDOW_MS: u64 = 3000;

fn default_prefixes() -> Vec<String> {
    ["-", "/", "!", "."].iter().map(|p| p.to_string()).collect()
}

fn default_hold_prefix() -> String {
    "hold".to_string()
}

fn default_hold_min_ms() -> u64 {
    100
}

fn default_hold_max_ms() -> u64 {
    2000
}

fn default_hold_default_ms() -> u64 {
    500
}

fn default_max_players() -> u8 {
    1
}

/// Free-form metadata attached to a button (label, emulator key binding, ...).
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct ButtonSpec {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
    #[serde(flatten)]
    pub extra: BTreeMap<String, Value>,
}

/// Controller layout shared by every game on one console.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SystemConfig {
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub buttons: BTreeMap<String, ButtonSpec>,
    #[serde(default)]
    pub aliases: BTreeMap<String, String>,
    #[serde(default = "default_prefixes")]
    pub command_prefixes: Vec<String>,
    #[serde(default)]
    pub hold_commands: bool,
    #[serde(default = "default_hold_prefix")]
    pub hold_prefix: String,
    #[serde(default = "default_hold_min_ms")]
    pub hold_min_ms: u64,
    #[serde(default = "default_hold_max_ms")]
    pub hold_max_ms: u64,
    #[serde(default = "default_hold_default_ms")]
    pub hold_default_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct MultiplayerConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default = "default_max_players")]
    pub max_players: u8,
    #[serde(default)]
    pub team_prefixes: Vec<String>,
}

impl Default for MultiplayerConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            max_players: default_max_players(),
            team_prefixes: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GameConfig {
    pub id: String,
    pub name: String,
    pub system: String,
    #[serde(default)]
    pub emulator: Option<String>,
    #[serde(default)]
    pub rom: Option<String>,
    #[serde(default)]
    pub vote_window_ms: Option<u64>,
    #[serde(default)]
    pub multiplayer: MultiplayerConfig,
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct HoldSettings {
    pub prefix: String,
    pub min_ms: u64,
    pub max_ms: u64,
    pub default_ms: u64,
}

impl HoldSettings {
    pub fn clamp(&self, duration_ms: u64) -> u64 {
        duration_ms.clamp(self.min_ms, self.max_ms)
    }
}

/// A game merged with its system, validated and ready to drive the grammar
/// and the voting core.
#[derive(Debug, Clone, Serialize)]
pub struct ActiveGame {
    pub id: String,
    pub name: String,
    pub system: String,
    pub emulator: Option<String>,
    pub buttons: BTreeMap<String, ButtonSpec>,
    pub aliases: BTreeMap<String, String>,
    pub command_prefixes: Vec<String>,
    pub hold: Option<HoldSettings>,
    pub multiplayer: MultiplayerConfig,
    #[serde(rename = "vote_window_ms", serialize_with = "serialize_millis")]
    pub vote_window: Duration,
}

fn serialize_millis<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
where
    S: serde::Serializer,
{
    serializer.serialize_u64(duration.as_millis() as u64)
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("game config not found: {0}")]
    UnknownGame(String),
    #[error("system config not found: {system} (required by game {game})")]
    UnknownSystem { game: String, system: String },
    #[error("game {0} has no button map")]
    NoButtons(String),
    #[error("game {game} hold bounds are inverted ({min_ms}ms > {max_ms}ms)")]
    InvalidHoldBounds {
        game: String,
        min_ms: u64,
        max_ms: u64,
    },
    #[error("game {0} enables multiplayer with zero players")]
    NoPlayers(String),
    #[error("game {0} has a zero-length vote window")]
    EmptyWindow(String),
    #[error("hold prefix {prefix:?} does not form a valid pattern: {reason}")]
    HoldPattern { prefix: String, reason: String },
}

impl ActiveGame {
    pub fn from_parts(
        game: &GameConfig,
        system: &SystemConfig,
        window_override_ms: Option<u64>,
    ) -> Result<Self, ConfigError> {
        if system.buttons.is_empty() {
            return Err(ConfigError::NoButtons(game.id.clone()));
        }

        let hold = if system.hold_commands {
            if system.hold_min_ms > system.hold_max_ms {
                return Err(ConfigError::InvalidHoldBounds {
                    game: game.id.clone(),
                    min_ms: system.hold_min_ms,
                    max_ms: system.hold_max_ms,
                });
            }
            Some(HoldSettings {
                prefix: system.hold_prefix.to_lowercase(),
                min_ms: system.hold_min_ms,
                max_ms: system.hold_max_ms,
                default_ms: system
                    .hold_default_ms
                    .clamp(system.hold_min_ms, system.hold_max_ms),
            })
        } else {
            None
        };

        if game.multiplayer.enabled && game.multiplayer.max_players == 0 {
            return Err(ConfigError::NoPlayers(game.id.clone()));
        }

        let window_ms = game
            .vote_window_ms
            .or(window_override_ms)
            .unwrap_or(DEFAULT_VOTE_WINDOW_MS);
        if window_ms == 0 {
            return Err(ConfigError::EmptyWindow(game.id.clone()));
        }

        Ok(Self {
            id: game.id.clone(),
            name: game.name.clone(),
            system: system.id.clone(),
            emulator: game.emulator.clone(),
            buttons: system
                .buttons
                .iter()
                .map(|(name, spec)| (name.to_lowercase(), spec.clone()))
                .collect(),
            aliases: system
                .aliases
                .iter()
                .map(|(from, to)| (from.to_lowercase(), to.to_lowercase()))
                .collect(),
            command_prefixes: system.command_prefixes.clone(),
            hold,
            multiplayer: game.multiplayer.clone(),
            vote_window: Duration::from_millis(window_ms),
        })
    }

    pub fn multiplayer_enabled(&self) -> bool {
        self.multiplayer.enabled
    }
}

/// Feature toggles read from the environment at startup.
#[derive(Debug, Clone, Copy, Default, Serialize, PartialEq, Eq)]
pub struct FeatureFlags {
    pub economy: bool,
}

/// Every system and game definition found under a config root.
#[derive(Debug, Default, Clone)]
pub struct ConfigCatalog {
    systems: BTreeMap<String, SystemConfig>,
    games: BTreeMap<String, GameConfig>,
}

impl ConfigCatalog {
    /// Loads `<root>/systems/*.json` and `<root>/games/*.json`. Missing
    /// directories yield an empty section.
    pub fn load(root: &Path) -> Result<Self> {
        let mut catalog = ConfigCatalog::default();
        for path in json_files(&root.join("systems"))? {
            let system: SystemConfig = read_json(&path)?;
            catalog.systems.insert(system.id.clone(), system);
        }
        for path in json_files(&root.join("games"))? {
            let game: GameConfig = read_json(&path)?;
            catalog.games.insert(game.id.clone(), game);
        }
        log::info!(
            "[config] loaded {} systems, {} games from {}",
            catalog.systems.len(),
            catalog.games.len(),
            root.display()
        );
        Ok(catalog)
    }

    pub fn insert_system(&mut self, system: SystemConfig) {
        self.systems.insert(system.id.clone(), system);
    }

    pub fn insert_game(&mut self, game: GameConfig) {
        self.games.insert(game.id.clone(), game);
    }

    pub fn games(&self) -> impl Iterator<Item = &GameConfig> {
        self.games.values()
    }

    pub fn activate(
        &self,
        game_id: &str,
        window_override_ms: Option<u64>,
    ) -> Result<ActiveGame, ConfigError> {
        let game = self
            .games
            .get(game_id)
            .ok_or_else(|| ConfigError::UnknownGame(game_id.to_string()))?;
        let system = self
            .systems
            .get(&game.system)
            .ok_or_else(|| ConfigError::UnknownSystem {
                game: game.id.clone(),
                system: game.system.clone(),
            })?;
        let active = ActiveGame::from_parts(game, system, window_override_ms)?;
        log::info!("[config] active game: {} ({})", active.name, active.system);
        Ok(active)
    }
}

fn json_files(dir: &Path) -> Result<Vec<PathBuf>> {
    if !dir.is_dir() {
        return Ok(Vec::new());
    }
    let mut files = Vec::new();
    for entry in
        fs::read_dir(dir).with_context(|| format!("listing config dir {}", dir.display()))?
    {
        let path = entry?.path();
        if path.extension().and_then(|ext| ext.to_str()) == Some("json") {
            files.push(path);
        }
    }
    files.sort();
    Ok(files)
}

fn read_json<T>(path: &Path) -> Result<T>
where
    T: for<'de> Deserialize<'de>,
{
    let raw = fs::read_to_string(path)
        .with_context(|| format!("failed to read config file: {}", path.display()))?;
    serde_json::from_str(&raw)
        .with_context(|| format!("failed to parse config json: {}", path.display()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn system(buttons: Value) -> SystemConfig {
        serde_json::from_value(json!({
            "id": "gba",
            "buttons": buttons,
            "hold_commands": true,
            "hold_min_ms": 100,
            "hold_max_ms": 2000,
            "hold_default_ms": 5000,
        }))
        .expect("system json")
    }

    fn game() -> GameConfig {
        serde_json::from_value(json!({
            "id": "firered",
            "name": "Fire Red",
            "system": "gba",
        }))
        .expect("game json")
    }

    #[test]
    fn active_game_applies_defaults() {
        let active = ActiveGame::from_parts(&game(), &system(json!({"A": {}, "up": {}})), None)
            .expect("valid game");
        assert!(active.buttons.contains_key("a"));
        assert_eq!(active.vote_window, Duration::from_millis(DEFAULT_VOTE_WINDOW_MS));
        assert_eq!(active.command_prefixes, vec!["-", "/", "!", "."]);
        let hold = active.hold.as_ref().expect("hold enabled");
        assert_eq!(hold.default_ms, 2000);
        assert!(!active.multiplayer_enabled());
    }

    #[test]
    fn game_without_buttons_is_fatal() {
        let err = ActiveGame::from_parts(&game(), &system(json!({})), None).unwrap_err();
        assert_eq!(err, ConfigError::NoButtons("firered".to_string()));
    }

    #[test]
    fn game_window_beats_override() {
        let mut game = game();
        game.vote_window_ms = Some(1500);
        let active =
            ActiveGame::from_parts(&game, &system(json!({"a": {}})), Some(9000)).expect("valid");
        assert_eq!(active.vote_window, Duration::from_millis(1500));
    }

    #[test]
    fn catalog_reports_missing_system() {
        let mut catalog = ConfigCatalog::default();
        catalog.insert_game(game());
        assert_eq!(
            catalog.activate("firered", None).unwrap_err(),
            ConfigError::UnknownSystem {
                game: "firered".to_string(),
                system: "gba".to_string(),
            }
        );
        assert_eq!(
            catalog.activate("missing", None).unwrap_err(),
            ConfigError::UnknownGame("missing".to_string())
        );
    }
}
