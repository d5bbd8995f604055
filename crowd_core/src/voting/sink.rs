use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};

use serde::Serialize;

use super::window::Phase;
use crate::outcome::WinnerResult;

/// State of the open window as pushed to observers.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct WindowSnapshot {
    pub phase: Phase,
    pub window: u64,
    pub window_ms: u64,
    pub time_remaining_ms: u64,
    pub votes: BTreeMap<String, f64>,
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub teams: BTreeMap<u8, BTreeMap<String, f64>>,
    pub voter_count: usize,
    pub multiplayer: bool,
}

/// Observer registered on the voting core. Calls happen synchronously on the
/// thread that owns the core and must not block.
pub trait VoteSink: Send {
    fn vote_update(&self, snapshot: &WindowSnapshot);
    fn vote_winner(&self, result: &WinnerResult);
}

#[derive(Debug, Clone, PartialEq)]
pub enum VoteEvent {
    Update(WindowSnapshot),
    Winner(WinnerResult),
}

#[derive(Clone, Default)]
pub struct RecordingVoteSink {
    events: Arc<Mutex<Vec<VoteEvent>>>,
}

impl RecordingVoteSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<VoteEvent> {
        self.events
            .lock()
            .map(|events| events.clone())
            .unwrap_or_default()
    }

    pub fn winners(&self) -> Vec<WinnerResult> {
        self.events()
            .into_iter()
            .filter_map(|event| match event {
                VoteEvent::Winner(result) => Some(result),
                VoteEvent::Update(_) => None,
            })
            .collect()
    }

    fn push(&self, event: VoteEvent) {
        if let Ok(mut events) = self.events.lock() {
            events.push(event);
        }
    }
}

impl VoteSink for RecordingVoteSink {
    fn vote_update(&self, snapshot: &WindowSnapshot) {
        self.push(VoteEvent::Update(snapshot.clone()));
    }

    fn vote_winner(&self, result: &WinnerResult) {
        self.push(VoteEvent::Winner(result.clone()));
    }
}
