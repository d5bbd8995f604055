use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use serde::Serialize;

use crate::command::Command;

/// Where an executed command came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CommandSource {
    Vote,
    Champions,
    TeamRocket,
    Remote,
}

impl CommandSource {
    pub fn as_str(self) -> &'static str {
        match self {
            CommandSource::Vote => "vote",
            CommandSource::Champions => "champions",
            CommandSource::TeamRocket => "team_rocket",
            CommandSource::Remote => "remote",
        }
    }
}

/// Process-wide command id counter. Clones share the same sequence, so voted
/// winners and direct injections never reuse an id.
#[derive(Debug, Clone)]
pub struct CommandIdSequence {
    next: Arc<AtomicU64>,
}

impl CommandIdSequence {
    pub fn new() -> Self {
        Self::starting_at(1)
    }

    pub fn starting_at(first: u64) -> Self {
        Self {
            next: Arc::new(AtomicU64::new(first)),
        }
    }

    pub fn allocate(&self) -> u64 {
        self.next.fetch_add(1, Ordering::SeqCst)
    }

    pub fn peek(&self) -> u64 {
        self.next.load(Ordering::SeqCst)
    }
}

impl Default for CommandIdSequence {
    fn default() -> Self {
        Self::new()
    }
}

/// One command handed to the emulator: a window winner or a direct injection.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct WinnerResult {
    pub id: u64,
    pub command: Command,
    pub vote_count: f64,
    pub first_voter_identity: Option<String>,
    pub first_voter_display_name: String,
    /// Everyone who voted in the window, across all pools.
    pub total_distinct_voters: usize,
    /// `None` for commands that bypassed the vote.
    pub window: Option<u64>,
    pub team: Option<u8>,
    pub source: CommandSource,
    pub timestamp_ms: u64,
}

pub fn unix_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| elapsed.as_millis() as u64)
        .unwrap_or(0)
}
