use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use serde::Serialize;

use crate::dispatch::{DispatchError, EmulatorSink};
use crate::outcome::{unix_millis, WinnerResult};

pub const EXECUTED_HISTORY_LIMIT: usize = 100;
/// Unacknowledged entries kept; the oldest are dropped past this.
pub const PENDING_LIMIT: usize = 500;

/// Flat entry polled by the emulator script.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct QueuedCommand {
    pub id: u64,
    pub button: String,
    #[serde(rename = "type")]
    pub kind: &'static str,
    pub duration: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub team: Option<u8>,
    pub timestamp_ms: u64,
}

impl QueuedCommand {
    pub fn from_result(result: &WinnerResult) -> Self {
        Self {
            id: result.id,
            button: result.command.button.clone(),
            kind: result.command.action.as_str(),
            duration: result.command.action.duration_ms(),
            team: result.team.or(result.command.team),
            timestamp_ms: unix_millis(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct AckReport {
    pub acknowledged: usize,
    pub queue_remaining: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct QueueStatus {
    pub connected: bool,
    pub queue_length: usize,
    pub last_ack_id: u64,
    pub game: String,
}

/// Commands waiting for the emulator, keyed by the shared command id.
#[derive(Debug, Clone, Serialize)]
pub struct CommandQueue {
    pending: VecDeque<QueuedCommand>,
    executed: VecDeque<QueuedCommand>,
    last_ack_id: u64,
    connected: bool,
    game: String,
}

impl CommandQueue {
    pub fn new(game: impl Into<String>) -> Self {
        Self {
            pending: VecDeque::new(),
            executed: VecDeque::with_capacity(EXECUTED_HISTORY_LIMIT),
            last_ack_id: 0,
            connected: true,
            game: game.into(),
        }
    }

    pub fn push(&mut self, result: &WinnerResult) -> Result<(), DispatchError> {
        if !self.connected {
            return Err(DispatchError::EmulatorDisconnected(result.id));
        }
        if self.pending.len() >= PENDING_LIMIT {
            if let Some(dropped) = self.pending.pop_front() {
                log::warn!(
                    "[queue] {PENDING_LIMIT} commands unacknowledged, dropped #{}",
                    dropped.id
                );
            }
        }
        self.pending.push_back(QueuedCommand::from_result(result));
        Ok(())
    }

    /// Entries with an id above `after_id`, oldest first.
    pub fn pending(&self, after_id: u64) -> Vec<QueuedCommand> {
        self.pending
            .iter()
            .filter(|cmd| cmd.id > after_id)
            .cloned()
            .collect()
    }

    /// Moves every entry up to and including `last_id` into the executed
    /// history and records the high-water mark.
    pub fn acknowledge(&mut self, last_id: u64) -> AckReport {
        let mut acknowledged = 0;
        let mut remaining = VecDeque::with_capacity(self.pending.len());
        for cmd in self.pending.drain(..) {
            if cmd.id <= last_id {
                acknowledged += 1;
                if self.executed.len() == EXECUTED_HISTORY_LIMIT {
                    self.executed.pop_front();
                }
                self.executed.push_back(cmd);
            } else {
                remaining.push_back(cmd);
            }
        }
        self.pending = remaining;
        self.last_ack_id = self.last_ack_id.max(last_id);
        AckReport {
            acknowledged,
            queue_remaining: self.pending.len(),
        }
    }

    pub fn executed(&self) -> impl ExactSizeIterator<Item = &QueuedCommand> {
        self.executed.iter()
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    /// Disconnecting drops whatever was still waiting.
    pub fn set_connected(&mut self, connected: bool) {
        self.connected = connected;
        if !connected {
            self.pending.clear();
        }
    }

    pub fn set_game(&mut self, game: impl Into<String>) {
        self.game = game.into();
    }

    pub fn status(&self) -> QueueStatus {
        QueueStatus {
            connected: self.connected,
            queue_length: self.pending.len(),
            last_ack_id: self.last_ack_id,
            game: self.game.clone(),
        }
    }
}

/// Handle shared between the dispatcher and the emulator routes.
#[derive(Debug, Clone)]
pub struct SharedQueue {
    inner: Arc<Mutex<CommandQueue>>,
}

impl SharedQueue {
    pub fn new(queue: CommandQueue) -> Self {
        Self {
            inner: Arc::new(Mutex::new(queue)),
        }
    }

    pub fn lock(&self) -> MutexGuard<'_, CommandQueue> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl EmulatorSink for SharedQueue {
    fn send_command(&self, result: &WinnerResult) -> Result<(), DispatchError> {
        self.lock().push(result)
    }
}
