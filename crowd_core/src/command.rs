use std::fmt;

use regex::Regex;
use serde::Serialize;

use crate::config::{ActiveGame, ConfigError};

/// What the emulator should do with the button.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Action {
    Press,
    Hold { duration_ms: u64 },
}

impl Action {
    pub fn as_str(self) -> &'static str {
        match self {
            Action::Press => "press",
            Action::Hold { .. } => "hold",
        }
    }

    pub fn duration_ms(self) -> Option<u64> {
        match self {
            Action::Press => None,
            Action::Hold { duration_ms } => Some(duration_ms),
        }
    }
}

/// A validated chat command. Only [`CommandGrammar::parse`] builds these.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct Command {
    #[serde(flatten)]
    pub action: Action,
    pub button: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub team: Option<u8>,
    pub raw: String,
}

impl Command {
    /// Tally key: votes for equivalent commands land on the same key.
    pub fn key(&self) -> String {
        match self.action {
            Action::Press => self.button.clone(),
            Action::Hold { duration_ms } => format!("hold:{}:{duration_ms}", self.button),
        }
    }

    /// Copy of this command routed to another team pool.
    pub fn with_team(mut self, team: Option<u8>) -> Self {
        self.team = team;
        self
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(team) = self.team {
            write!(f, "{team}:")?;
        }
        match self.action {
            Action::Press => write!(f, "{}", self.button),
            Action::Hold { duration_ms } => write!(f, "hold {} {duration_ms}ms", self.button),
        }
    }
}

/// Parses chat text against one active game's controls.
#[derive(Debug, Clone)]
pub struct CommandGrammar {
    game: ActiveGame,
    hold_pattern: Option<Regex>,
}

impl CommandGrammar {
    pub fn for_game(game: ActiveGame) -> Result<Self, ConfigError> {
        let hold_pattern = match game.hold.as_ref() {
            Some(hold) => {
                let pattern = format!(r"^{}(\w+)(?:\s+(\d+))?$", regex::escape(&hold.prefix));
                Some(Regex::new(&pattern).map_err(|err| ConfigError::HoldPattern {
                    prefix: hold.prefix.clone(),
                    reason: err.to_string(),
                })?)
            }
            None => None,
        };
        Ok(Self { game, hold_pattern })
    }

    pub fn game(&self) -> &ActiveGame {
        &self.game
    }

    pub fn parse(&self, raw_message: &str) -> Option<Command> {
        let text = raw_message.trim().to_lowercase();

        let mut command = text.as_str();
        for prefix in &self.game.command_prefixes {
            if prefix.is_empty() {
                continue;
            }
            if let Some(rest) = command.strip_prefix(prefix.as_str()) {
                command = rest.trim();
                break;
            }
        }
        if command.is_empty() {
            return None;
        }

        let mut team = None;
        if self.game.multiplayer.enabled {
            for (index, prefix) in self.game.multiplayer.team_prefixes.iter().enumerate() {
                let prefix = prefix.to_lowercase();
                if prefix.is_empty() || command.len() <= prefix.len() {
                    continue;
                }
                if let Some(rest) = command.strip_prefix(prefix.as_str()) {
                    team = Some(team_number(&prefix, index));
                    command = rest;
                    break;
                }
            }
        }

        let command = self.resolve_alias(command);

        if let Some(parsed) = self.parse_hold(command, team) {
            return Some(parsed);
        }

        if self.game.buttons.contains_key(command) {
            return Some(Command {
                action: Action::Press,
                button: command.to_string(),
                team,
                raw: command.to_string(),
            });
        }

        None
    }

    pub fn is_valid(&self, raw_message: &str) -> bool {
        self.parse(raw_message).is_some()
    }

    /// Press-button names followed by their hold forms when holds are enabled.
    pub fn valid_commands(&self) -> Vec<String> {
        let mut commands: Vec<String> = self.game.buttons.keys().cloned().collect();
        if let Some(hold) = self.game.hold.as_ref() {
            commands.extend(
                self.game
                    .buttons
                    .keys()
                    .map(|button| format!("{}{button}", hold.prefix)),
            );
        }
        commands
    }

    fn resolve_alias<'a>(&'a self, token: &'a str) -> &'a str {
        self.game
            .aliases
            .get(token)
            .map(String::as_str)
            .unwrap_or(token)
    }

    fn parse_hold(&self, command: &str, team: Option<u8>) -> Option<Command> {
        let hold = self.game.hold.as_ref()?;
        let captures = self.hold_pattern.as_ref()?.captures(command)?;
        let button = self.resolve_alias(captures.get(1)?.as_str());
        if !self.game.buttons.contains_key(button) {
            return None;
        }
        let requested = match captures.get(2) {
            // Digit runs that overflow u64 are clamped like any other long hold.
            Some(digits) => digits.as_str().parse::<u64>().unwrap_or(u64::MAX),
            None => hold.default_ms,
        };
        Some(Command {
            action: Action::Hold {
                duration_ms: hold.clamp(requested),
            },
            button: button.to_string(),
            team,
            raw: command.to_string(),
        })
    }
}

fn team_number(prefix: &str, index: usize) -> u8 {
    prefix
        .parse::<u8>()
        .unwrap_or_else(|_| u8::try_from(index + 1).unwrap_or(u8::MAX))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{GameConfig, SystemConfig};
    use serde_json::json;

    fn grammar(multiplayer: serde_json::Value) -> CommandGrammar {
        let system: SystemConfig = serde_json::from_value(json!({
            "id": "gba",
            "buttons": {"a": {}, "b": {}, "up": {}, "down": {}, "left": {}, "right": {}, "start": {}},
            "aliases": {"u": "up", "d": "down", "jump": "a"},
            "command_prefixes": ["!", "-", "/", "."],
            "hold_commands": true,
            "hold_prefix": "hold",
            "hold_min_ms": 100,
            "hold_max_ms": 2000,
            "hold_default_ms": 500,
        }))
        .expect("system");
        let game: GameConfig = serde_json::from_value(json!({
            "id": "test",
            "name": "Test",
            "system": "gba",
            "multiplayer": multiplayer,
        }))
        .expect("game");
        let active = ActiveGame::from_parts(&game, &system, None).expect("active game");
        CommandGrammar::for_game(active).expect("grammar")
    }

    fn single() -> CommandGrammar {
        grammar(json!({"enabled": false}))
    }

    #[test]
    fn press_with_prefix_and_case() {
        let cmd = single().parse("  !A ").expect("press");
        assert_eq!(cmd.action, Action::Press);
        assert_eq!(cmd.button, "a");
        assert_eq!(cmd.team, None);
        assert_eq!(cmd.key(), "a");
    }

    #[test]
    fn alias_resolves_once() {
        let g = single();
        assert_eq!(g.parse("u").map(|c| c.button), Some("up".to_string()));
        assert_eq!(g.parse("!jump").map(|c| c.button), Some("a".to_string()));
    }

    #[test]
    fn hold_duration_clamps_to_bounds() {
        let g = single();
        let cmd = g.parse("holdup 99999").expect("hold");
        assert_eq!(cmd.action, Action::Hold { duration_ms: 2000 });
        assert_eq!(cmd.button, "up");

        let short = g.parse("holdup 5").expect("hold");
        assert_eq!(short.action.duration_ms(), Some(100));

        let default = g.parse("!holdb").expect("hold");
        assert_eq!(default.action.duration_ms(), Some(500));

        let huge = g.parse("holda 999999999999999999999999").expect("hold");
        assert_eq!(huge.action.duration_ms(), Some(2000));
    }

    #[test]
    fn hold_button_goes_through_alias() {
        let cmd = single().parse("holdd 300").expect("hold alias");
        assert_eq!(cmd.button, "down");
        assert_eq!(cmd.key(), "hold:down:300");
    }

    #[test]
    fn invalid_text_is_rejected() {
        let g = single();
        assert!(g.parse("").is_none());
        assert!(g.parse("!").is_none());
        assert!(g.parse("  /  ").is_none());
        assert!(g.parse("hello").is_none());
        assert!(g.parse("holdx 100").is_none());
        assert!(!g.is_valid("select"));
    }

    #[test]
    fn team_prefix_routes_in_multiplayer() {
        let g = grammar(json!({"enabled": true, "max_players": 2, "team_prefixes": ["1", "2"]}));
        let first = g.parse("1up").expect("team 1");
        assert_eq!(first.team, Some(1));
        assert_eq!(first.button, "up");
        let second = g.parse("!2down").expect("team 2");
        assert_eq!(second.team, Some(2));
        assert_eq!(second.button, "down");
        let hold = g.parse("2holda 700").expect("team hold");
        assert_eq!(hold.team, Some(2));
        assert_eq!(hold.action.duration_ms(), Some(700));
    }

    #[test]
    fn bare_team_prefix_is_not_a_command() {
        let g = grammar(json!({"enabled": true, "max_players": 2, "team_prefixes": ["1", "2"]}));
        assert!(g.parse("1").is_none());
        assert_eq!(g.parse("a").and_then(|c| c.team), None);
    }

    #[test]
    fn team_prefix_ignored_without_multiplayer() {
        let g = grammar(json!({"enabled": false, "team_prefixes": ["1", "2"]}));
        assert!(g.parse("1up").is_none());
    }

    #[test]
    fn named_team_prefix_uses_position() {
        let g = grammar(json!({"enabled": true, "max_players": 2, "team_prefixes": ["p1", "p2"]}));
        assert_eq!(g.parse("p2a").and_then(|c| c.team), Some(2));
    }

    #[test]
    fn valid_commands_include_hold_forms() {
        let commands = single().valid_commands();
        assert!(commands.contains(&"a".to_string()));
        assert!(commands.contains(&"holdstart".to_string()));
        assert_eq!(commands.len(), 14);
    }
}
