use std::collections::{BTreeMap, VecDeque};

use serde::Serialize;

use crate::outcome::WinnerResult;

const HISTORY_LIMIT: usize = 20;

/// Points awarded per bonus multiplier.
pub const POINTS_PER_BONUS: u32 = 10;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Combo {
    pub id: &'static str,
    pub name: &'static str,
    pub sequence: &'static [&'static str],
    pub bonus: u32,
    pub description: &'static str,
}

pub const COMBOS: &[Combo] = &[
    Combo {
        id: "hadouken",
        name: "Hadouken",
        sequence: &["down", "right", "a"],
        bonus: 3,
        description: "Down → Right → A",
    },
    Combo {
        id: "shoryuken",
        name: "Shoryuken",
        sequence: &["right", "down", "right", "a"],
        bonus: 4,
        description: "Right → Down → Right → A",
    },
    Combo {
        id: "triple_tap",
        name: "Triple Tap",
        sequence: &["a", "a", "a"],
        bonus: 2,
        description: "A → A → A",
    },
    Combo {
        id: "dash_left",
        name: "Dash Left",
        sequence: &["left", "left", "left"],
        bonus: 2,
        description: "Left → Left → Left",
    },
    Combo {
        id: "dash_right",
        name: "Dash Right",
        sequence: &["right", "right", "right"],
        bonus: 2,
        description: "Right → Right → Right",
    },
    Combo {
        id: "menu_master",
        name: "Menu Master",
        sequence: &["start", "a", "a", "b"],
        bonus: 3,
        description: "Start → A → A → B",
    },
    Combo {
        id: "b_cancel",
        name: "B Cancel",
        sequence: &["a", "b", "a", "b"],
        bonus: 2,
        description: "A → B → A → B",
    },
    Combo {
        id: "konami",
        name: "Konami Code",
        sequence: &[
            "up", "up", "down", "down", "left", "right", "left", "right", "b", "a",
        ],
        bonus: 10,
        description: "The legendary code",
    },
];

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ComboHit {
    pub combo: Combo,
    pub bonus_points: u32,
    pub finisher: String,
    pub finisher_identity: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ComboEntry {
    #[serde(flatten)]
    pub combo: Combo,
    pub times_landed: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ComboStats {
    pub total_combos: u32,
    pub combos_landed: BTreeMap<&'static str, u32>,
    pub recent_commands: Vec<String>,
}

/// Watches executed buttons for registered sequences.
#[derive(Debug, Clone, Default)]
pub struct ComboTracker {
    history: VecDeque<String>,
    landed: BTreeMap<&'static str, u32>,
    total: u32,
}

impl ComboTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends the executed button and reports at most one combo. A landed
    /// combo clears the history so it cannot fire again on the next command.
    pub fn track(&mut self, result: &WinnerResult) -> Option<ComboHit> {
        if self.history.len() == HISTORY_LIMIT {
            self.history.pop_front();
        }
        self.history.push_back(result.command.button.clone());

        let combo = COMBOS.iter().find(|combo| self.ends_with(combo.sequence))?;
        self.total += 1;
        *self.landed.entry(combo.id).or_insert(0) += 1;
        self.history.clear();
        log::info!("[combo] {} landed ({}x bonus)", combo.name, combo.bonus);
        Some(ComboHit {
            combo: *combo,
            bonus_points: combo.bonus * POINTS_PER_BONUS,
            finisher: result.first_voter_display_name.clone(),
            finisher_identity: result.first_voter_identity.clone(),
        })
    }

    fn ends_with(&self, sequence: &[&str]) -> bool {
        if self.history.len() < sequence.len() {
            return false;
        }
        let start = self.history.len() - sequence.len();
        self.history
            .iter()
            .skip(start)
            .zip(sequence)
            .all(|(button, expected)| button == expected)
    }

    pub fn combos(&self) -> Vec<ComboEntry> {
        COMBOS
            .iter()
            .map(|combo| ComboEntry {
                combo: *combo,
                times_landed: self.landed.get(combo.id).copied().unwrap_or(0),
            })
            .collect()
    }

    pub fn stats(&self) -> ComboStats {
        let skip = self.history.len().saturating_sub(10);
        ComboStats {
            total_combos: self.total,
            combos_landed: self.landed.clone(),
            recent_commands: self.history.iter().skip(skip).cloned().collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::command::{Action, Command};
    use crate::outcome::CommandSource;

    fn executed(button: &str) -> WinnerResult {
        WinnerResult {
            id: 1,
            command: Command {
                action: Action::Press,
                button: button.to_string(),
                team: None,
                raw: button.to_string(),
            },
            vote_count: 1.0,
            first_voter_identity: Some("red".to_string()),
            first_voter_display_name: "Red".to_string(),
            total_distinct_voters: 1,
            window: Some(1),
            team: None,
            source: CommandSource::Vote,
            timestamp_ms: 0,
        }
    }

    fn feed(tracker: &mut ComboTracker, buttons: &[&str]) -> Vec<&'static str> {
        buttons
            .iter()
            .filter_map(|button| tracker.track(&executed(button)))
            .map(|hit| hit.combo.id)
            .collect()
    }

    #[test]
    fn hadouken_lands_and_resets_history() {
        let mut tracker = ComboTracker::new();
        assert_eq!(feed(&mut tracker, &["b", "down", "right"]), Vec::<&str>::new());
        let hit = tracker.track(&executed("a")).expect("hadouken");
        assert_eq!(hit.combo.id, "hadouken");
        assert_eq!(hit.bonus_points, 30);
        assert_eq!(hit.finisher, "Red");
        assert!(tracker.stats().recent_commands.is_empty());
    }

    #[test]
    fn history_reset_stops_overlapping_refire() {
        let mut tracker = ComboTracker::new();
        // Without the reset the fourth and fifth "a" would each land again.
        assert_eq!(feed(&mut tracker, &["a", "a", "a", "a", "a"]), vec!["triple_tap"]);
        assert_eq!(feed(&mut tracker, &["a"]), vec!["triple_tap"]);
    }

    #[test]
    fn first_registered_combo_wins_a_tie() {
        let mut tracker = ComboTracker::new();
        // right, down, right, a completes both shoryuken and hadouken.
        assert_eq!(
            feed(&mut tracker, &["right", "down", "right", "a"]),
            vec!["hadouken"]
        );
    }

    #[test]
    fn konami_needs_the_full_sequence() {
        let mut tracker = ComboTracker::new();
        let seq = [
            "up", "up", "down", "down", "left", "right", "left", "right", "b", "a",
        ];
        assert_eq!(feed(&mut tracker, &seq), vec!["konami"]);
        let konami = tracker
            .combos()
            .into_iter()
            .find(|entry| entry.combo.id == "konami")
            .expect("registered");
        assert_eq!(konami.times_landed, 1);
        assert_eq!(tracker.stats().total_combos, 1);
    }
}
