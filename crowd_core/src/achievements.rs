use std::collections::{HashMap, HashSet};

use serde::Serialize;

use crate::outcome::{CommandSource, WinnerResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Measure {
    Votes,
    Wins,
    Streak,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Threshold {
    pub measure: Measure,
    pub at: u64,
    pub name: &'static str,
    pub description: &'static str,
}

const fn threshold(measure: Measure, at: u64, name: &'static str, description: &'static str) -> Threshold {
    Threshold {
        measure,
        at,
        name,
        description,
    }
}

pub const THRESHOLDS: &[Threshold] = &[
    threshold(Measure::Votes, 10, "Rookie Trainer", "10 commands"),
    threshold(Measure::Votes, 50, "Pokemon Trainer", "50 commands"),
    threshold(Measure::Votes, 100, "Ace Trainer", "100 commands"),
    threshold(Measure::Votes, 500, "Gym Leader", "500 commands"),
    threshold(Measure::Votes, 1000, "Elite Four", "1000 commands"),
    threshold(Measure::Votes, 5000, "Champion", "5000 commands"),
    threshold(Measure::Wins, 5, "First Victory", "5 winning votes"),
    threshold(Measure::Wins, 25, "Strategist", "25 winning votes"),
    threshold(Measure::Wins, 100, "Tactician", "100 winning votes"),
    threshold(Measure::Wins, 500, "Commander", "500 winning votes"),
    threshold(Measure::Streak, 3, "Hot Streak", "3 wins in a row"),
    threshold(Measure::Streak, 5, "On Fire", "5 wins in a row"),
    threshold(Measure::Streak, 10, "Unstoppable", "10 wins in a row"),
];

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AchievementEarned {
    pub identity: String,
    pub display_name: String,
    pub achievement: &'static str,
    pub description: &'static str,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct VoterStats {
    pub display_name: String,
    pub votes: u64,
    pub wins: u64,
    pub streak: u64,
    pub best_streak: u64,
}

impl VoterStats {
    fn measure(&self, measure: Measure) -> u64 {
        match measure {
            Measure::Votes => self.votes,
            Measure::Wins => self.wins,
            Measure::Streak => self.best_streak,
        }
    }
}

/// Per-identity counters. Each achievement is reported once per identity.
#[derive(Debug, Clone, Default)]
pub struct AchievementTracker {
    voters: HashMap<String, VoterStats>,
    earned: HashSet<(String, &'static str)>,
    streak_holder: Option<String>,
}

impl AchievementTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Counts an accepted vote.
    pub fn record_vote(&mut self, identity: &str, display_name: &str) -> Vec<AchievementEarned> {
        let stats = self.voters.entry(identity.to_string()).or_default();
        stats.display_name = display_name.to_string();
        stats.votes += 1;
        self.check(identity)
    }

    /// Credits the first voter of a voted winner. Injected commands do not
    /// count as wins.
    pub fn record_win(&mut self, result: &WinnerResult) -> Vec<AchievementEarned> {
        if result.source != CommandSource::Vote {
            return Vec::new();
        }
        let Some(identity) = result.first_voter_identity.as_deref() else {
            return Vec::new();
        };

        if self.streak_holder.as_deref() != Some(identity) {
            if let Some(previous) = self.streak_holder.take() {
                if let Some(stats) = self.voters.get_mut(&previous) {
                    stats.streak = 0;
                }
            }
            self.streak_holder = Some(identity.to_string());
        }

        let stats = self.voters.entry(identity.to_string()).or_default();
        if stats.display_name.is_empty() {
            stats.display_name = result.first_voter_display_name.clone();
        }
        stats.wins += 1;
        stats.streak += 1;
        stats.best_streak = stats.best_streak.max(stats.streak);
        self.check(identity)
    }

    pub fn stats(&self, identity: &str) -> Option<&VoterStats> {
        self.voters.get(identity)
    }

    fn check(&mut self, identity: &str) -> Vec<AchievementEarned> {
        let Some(stats) = self.voters.get(identity) else {
            return Vec::new();
        };
        let mut earned = Vec::new();
        for threshold in THRESHOLDS {
            if stats.measure(threshold.measure) < threshold.at {
                continue;
            }
            if self.earned.insert((identity.to_string(), threshold.name)) {
                log::info!(
                    "[achievement] {} earned {}",
                    stats.display_name,
                    threshold.name
                );
                earned.push(AchievementEarned {
                    identity: identity.to_string(),
                    display_name: stats.display_name.clone(),
                    achievement: threshold.name,
                    description: threshold.description,
                });
            }
        }
        earned
    }
}
