use std::collections::{BTreeMap, HashSet, VecDeque};
use std::time::{Duration, Instant};

use rand::rngs::StdRng;
use rand::SeedableRng;
use serde::Serialize;

use super::sink::{VoteSink, WindowSnapshot};
use super::window::{Phase, PoolId, VoteWindow};
use crate::command::Command;
use crate::config::ActiveGame;
use crate::outcome::{unix_millis, CommandIdSequence, CommandSource, WinnerResult};

pub const HISTORY_LIMIT: usize = 50;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VotingSettings {
    pub window: Duration,
    pub multiplayer: bool,
    pub max_players: u8,
}

impl VotingSettings {
    pub fn for_game(game: &ActiveGame) -> Self {
        Self {
            window: game.vote_window,
            multiplayer: game.multiplayer_enabled(),
            max_players: game.multiplayer.max_players,
        }
    }

    fn pool_for(&self, command: &Command) -> PoolId {
        match command.team {
            Some(team) if self.multiplayer && team >= 1 && team <= self.max_players => {
                PoolId::Team(team)
            }
            _ => PoolId::Default,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct VoteStats {
    pub phase: Phase,
    pub window: u64,
    pub window_ms: u64,
    pub multiplayer: bool,
    pub total_votes: u64,
    pub windows_completed: u64,
    pub window_voters: usize,
    pub session_voters: usize,
    pub votes: BTreeMap<String, f64>,
    pub chaos_level: f64,
    pub last_command: Option<WinnerResult>,
}

/// The collect/resolve state machine. Owned by a single task; nothing in here
/// suspends or performs I/O.
pub struct VotingCore {
    settings: VotingSettings,
    pending_settings: Option<VotingSettings>,
    phase: Phase,
    window: Option<VoteWindow>,
    last_sequence: u64,
    ids: CommandIdSequence,
    rng: StdRng,
    sinks: Vec<Box<dyn VoteSink>>,
    history: VecDeque<WinnerResult>,
    total_votes: u64,
    windows_completed: u64,
    session_voters: HashSet<String>,
}

impl VotingCore {
    pub fn new(settings: VotingSettings, ids: CommandIdSequence) -> Self {
        Self::with_rng(settings, ids, StdRng::from_os_rng())
    }

    pub fn with_rng(settings: VotingSettings, ids: CommandIdSequence, rng: StdRng) -> Self {
        Self {
            settings,
            pending_settings: None,
            phase: Phase::Idle,
            window: None,
            last_sequence: 0,
            ids,
            rng,
            sinks: Vec::new(),
            history: VecDeque::with_capacity(HISTORY_LIMIT),
            total_votes: 0,
            windows_completed: 0,
            session_voters: HashSet::new(),
        }
    }

    pub fn subscribe(&mut self, sink: Box<dyn VoteSink>) {
        self.sinks.push(sink);
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    /// Opens a collecting window. Returns false when already running.
    pub fn start(&mut self, now: Instant) -> bool {
        if self.phase != Phase::Idle {
            return false;
        }
        self.open_window(now);
        log::info!(
            "[vote] started: window {} ({} ms)",
            self.last_sequence,
            self.settings.window.as_millis()
        );
        true
    }

    /// Drops the open window without resolving it. Nothing is emitted until
    /// the next `start`.
    pub fn stop(&mut self) {
        if let Some(window) = self.window.take() {
            log::info!("[vote] stopped during window {}", window.sequence());
        }
        self.phase = Phase::Idle;
    }

    /// New timing and team settings take effect when the next window opens.
    pub fn reconfigure(&mut self, settings: VotingSettings) {
        self.pending_settings = Some(settings);
    }

    /// When the open window should be resolved, if one is collecting.
    pub fn deadline(&self) -> Option<Instant> {
        match self.phase {
            Phase::Collecting => self.window.as_ref().map(VoteWindow::deadline),
            _ => None,
        }
    }

    pub fn add_vote(
        &mut self,
        identity: &str,
        command: &Command,
        display_name: &str,
        weight: f64,
        now: Instant,
    ) -> bool {
        if self.phase != Phase::Collecting {
            return false;
        }
        if !weight.is_finite() || weight <= 0.0 {
            log::debug!("[vote] ignoring vote from {identity} with weight {weight}");
            return false;
        }
        let pool = self.settings.pool_for(command);
        let Some(window) = self.window.as_mut() else {
            return false;
        };
        window.cast(pool, identity, command, display_name, weight);
        self.total_votes += 1;
        self.session_voters.insert(identity.to_string());
        self.publish_update(now);
        true
    }

    /// Resolves the window and opens the next one. In multiplayer, once any
    /// team pool has votes only team pools resolve; otherwise the default
    /// pool does, so at most `max_players` winners come out.
    pub fn end_window(&mut self, now: Instant) -> Vec<WinnerResult> {
        if self.phase != Phase::Collecting {
            return Vec::new();
        }
        self.phase = Phase::Processing;
        let Some(window) = self.window.take() else {
            self.phase = Phase::Idle;
            return Vec::new();
        };

        let teams_voted = self.settings.multiplayer
            && window
                .pools()
                .any(|(id, pool)| id.team().is_some() && !pool.is_empty());
        let mut results = Vec::new();
        for (pool_id, pool) in window.pools() {
            if teams_voted && pool_id == PoolId::Default {
                continue;
            }
            let Some(winner) = pool.resolve(&mut self.rng) else {
                continue;
            };
            let team = pool_id.team();
            let (first_voter_identity, first_voter_display_name) = match winner.first_voter {
                Some(voter) => (Some(voter.identity), voter.display_name),
                None => (None, String::new()),
            };
            results.push(WinnerResult {
                id: self.ids.allocate(),
                command: winner.command.with_team(team),
                vote_count: winner.vote_count,
                first_voter_identity,
                first_voter_display_name,
                total_distinct_voters: window.voter_count(),
                window: Some(window.sequence()),
                team,
                source: CommandSource::Vote,
                timestamp_ms: unix_millis(),
            });
        }
        self.windows_completed += 1;

        for result in &results {
            log::info!(
                "[vote] window {} winner #{}: {} ({} votes)",
                window.sequence(),
                result.id,
                result.command,
                result.vote_count
            );
            self.remember(result.clone());
            for sink in &self.sinks {
                sink.vote_winner(result);
            }
        }

        self.phase = Phase::Idle;
        self.open_window(now);
        results
    }

    pub fn snapshot(&self, now: Instant) -> WindowSnapshot {
        let mut votes = BTreeMap::new();
        let mut teams = BTreeMap::new();
        let (window_ms, time_remaining_ms, voter_count) = match self.window.as_ref() {
            Some(window) => {
                for (id, pool) in window.pools() {
                    match id {
                        PoolId::Default => votes = pool.tally().clone(),
                        PoolId::Team(team) => {
                            teams.insert(team, pool.tally().clone());
                        }
                    }
                }
                (
                    millis(window.duration()),
                    millis(window.remaining(now)),
                    window.voter_count(),
                )
            }
            None => (millis(self.settings.window), 0, 0),
        };
        WindowSnapshot {
            phase: self.phase,
            window: self.last_sequence,
            window_ms,
            time_remaining_ms,
            votes,
            teams,
            voter_count,
            multiplayer: self.settings.multiplayer,
        }
    }

    pub fn stats(&self) -> VoteStats {
        let votes = self
            .window
            .as_ref()
            .and_then(|window| window.pool(PoolId::Default))
            .map(|pool| pool.tally().clone())
            .unwrap_or_default();
        VoteStats {
            phase: self.phase,
            window: self.last_sequence,
            window_ms: millis(self.settings.window),
            multiplayer: self.settings.multiplayer,
            total_votes: self.total_votes,
            windows_completed: self.windows_completed,
            window_voters: self.window.as_ref().map_or(0, VoteWindow::voter_count),
            session_voters: self.session_voters.len(),
            votes,
            chaos_level: self.chaos_level(),
            last_command: self.last_command().cloned(),
        }
    }

    /// Most recent winners, oldest first.
    pub fn history(&self) -> impl Iterator<Item = &WinnerResult> {
        self.history.iter()
    }

    pub fn last_command(&self) -> Option<&WinnerResult> {
        self.history.back()
    }

    pub fn chaos_level(&self) -> f64 {
        self.window
            .as_ref()
            .and_then(|window| window.pool(PoolId::Default))
            .map_or(0.0, |pool| pool.chaos_level())
    }

    fn open_window(&mut self, now: Instant) {
        if let Some(settings) = self.pending_settings.take() {
            self.settings = settings;
        }
        self.last_sequence += 1;
        self.window = Some(VoteWindow::open(
            self.last_sequence,
            now,
            self.settings.window,
        ));
        self.phase = Phase::Collecting;
        self.publish_update(now);
    }

    fn remember(&mut self, result: WinnerResult) {
        if self.history.len() == HISTORY_LIMIT {
            self.history.pop_front();
        }
        self.history.push_back(result);
    }

    fn publish_update(&self, now: Instant) {
        if self.sinks.is_empty() {
            return;
        }
        let snapshot = self.snapshot(now);
        for sink in &self.sinks {
            sink.vote_update(&snapshot);
        }
    }
}

fn millis(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}
