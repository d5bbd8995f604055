//! In-memory points table. Lives for the process; restarts start from zero.

use std::cmp::Reverse;
use std::collections::HashMap;

use serde::Serialize;

use crate::combo::ComboHit;
use crate::outcome::{CommandSource, WinnerResult};

pub const POINTS_PER_VOTE: u64 = 1;
pub const POINTS_PER_WIN: u64 = 10;
pub const DEFAULT_LIMIT: usize = 20;
pub const HOURLY_LIMIT: usize = 10;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Order {
    #[default]
    Points,
    Commands,
    Wins,
    Streak,
}

impl Order {
    /// Unknown names fall back to points.
    pub fn parse(name: &str) -> Self {
        match name {
            "commands" | "total_commands" => Order::Commands,
            "wins" | "total_wins" => Order::Wins,
            "streak" | "best_streak" => Order::Streak,
            _ => Order::Points,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Standing {
    pub identity: String,
    pub display_name: String,
    pub points: u64,
    pub commands: u64,
    pub wins: u64,
    pub combos: u64,
    pub current_streak: u64,
    pub best_streak: u64,
}

impl Standing {
    fn key(&self, order: Order) -> u64 {
        match order {
            Order::Points => self.points,
            Order::Commands => self.commands,
            Order::Wins => self.wins,
            Order::Streak => self.best_streak,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct HourlyStanding {
    pub identity: String,
    pub display_name: String,
    pub commands: u64,
    pub wins: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Profile {
    #[serde(flatten)]
    pub standing: Standing,
    pub rank: usize,
    pub favorite_command: Option<String>,
}

#[derive(Debug, Clone, Default)]
struct Entry {
    standing: Standing,
    hourly_commands: u64,
    hourly_wins: u64,
    buttons: HashMap<String, u64>,
}

#[derive(Debug, Clone, Default)]
pub struct Leaderboard {
    entries: HashMap<String, Entry>,
    streak_holder: Option<String>,
}

impl Leaderboard {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_vote(&mut self, identity: &str, display_name: &str, button: &str) {
        let entry = self.entry(identity, display_name);
        entry.standing.commands += 1;
        entry.standing.points += POINTS_PER_VOTE;
        entry.hourly_commands += 1;
        *entry.buttons.entry(button.to_string()).or_insert(0) += 1;
    }

    /// Credits the first voter of a voted winner.
    pub fn record_win(&mut self, result: &WinnerResult) {
        if result.source != CommandSource::Vote {
            return;
        }
        let Some(identity) = result.first_voter_identity.as_deref() else {
            return;
        };

        if self.streak_holder.as_deref() != Some(identity) {
            if let Some(previous) = self.streak_holder.replace(identity.to_string()) {
                if let Some(entry) = self.entries.get_mut(&previous) {
                    entry.standing.current_streak = 0;
                }
            }
        }

        let entry = self.entry(identity, &result.first_voter_display_name);
        let standing = &mut entry.standing;
        standing.wins += 1;
        standing.points += POINTS_PER_WIN;
        standing.current_streak += 1;
        standing.best_streak = standing.best_streak.max(standing.current_streak);
        entry.hourly_wins += 1;
    }

    /// Bonus goes to whoever voted in the command that closed the sequence.
    pub fn record_combo(&mut self, hit: &ComboHit) {
        let Some(identity) = hit.finisher_identity.as_deref() else {
            return;
        };
        let entry = self.entry(identity, &hit.finisher);
        entry.standing.points += u64::from(hit.bonus_points);
        entry.standing.combos += 1;
    }

    /// Highest first; ties go to the identity that sorts first.
    pub fn top(&self, limit: usize, order: Order) -> Vec<Standing> {
        let mut standings: Vec<&Standing> = self.entries.values().map(|e| &e.standing).collect();
        standings.sort_by(|a, b| {
            Reverse(a.key(order))
                .cmp(&Reverse(b.key(order)))
                .then_with(|| a.identity.cmp(&b.identity))
        });
        standings.into_iter().take(limit).cloned().collect()
    }

    /// Voters active since the last hourly reset, most commands first.
    pub fn hourly(&self, limit: usize) -> Vec<HourlyStanding> {
        let mut standings: Vec<HourlyStanding> = self
            .entries
            .values()
            .filter(|entry| entry.hourly_commands > 0 || entry.hourly_wins > 0)
            .map(|entry| HourlyStanding {
                identity: entry.standing.identity.clone(),
                display_name: entry.standing.display_name.clone(),
                commands: entry.hourly_commands,
                wins: entry.hourly_wins,
            })
            .collect();
        standings.sort_by(|a, b| {
            Reverse(a.commands)
                .cmp(&Reverse(b.commands))
                .then_with(|| a.identity.cmp(&b.identity))
        });
        standings.truncate(limit);
        standings
    }

    pub fn profile(&self, identity: &str) -> Option<Profile> {
        let entry = self.entries.get(identity)?;
        let points = entry.standing.points;
        let rank = 1 + self
            .entries
            .values()
            .filter(|other| other.standing.points > points)
            .count();
        let favorite_command = entry
            .buttons
            .iter()
            .max_by(|a, b| a.1.cmp(b.1).then_with(|| b.0.cmp(a.0)))
            .map(|(button, _)| button.clone());
        Some(Profile {
            standing: entry.standing.clone(),
            rank,
            favorite_command,
        })
    }

    pub fn reset_hourly(&mut self) {
        for entry in self.entries.values_mut() {
            entry.hourly_commands = 0;
            entry.hourly_wins = 0;
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn entry(&mut self, identity: &str, display_name: &str) -> &mut Entry {
        let entry = self.entries.entry(identity.to_string()).or_default();
        if entry.standing.identity.is_empty() {
            entry.standing.identity = identity.to_string();
        }
        if !display_name.is_empty() {
            entry.standing.display_name = display_name.to_string();
        }
        entry
    }
}
