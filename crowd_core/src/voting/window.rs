use std::collections::{BTreeMap, HashSet};
use std::time::{Duration, Instant};

use serde::Serialize;

use super::pool::VotePool;
use crate::command::Command;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    Idle,
    Collecting,
    Processing,
}

impl Phase {
    pub fn as_str(self) -> &'static str {
        match self {
            Phase::Idle => "idle",
            Phase::Collecting => "collecting",
            Phase::Processing => "processing",
        }
    }
}

/// Which tally a vote lands in. The default pool sorts first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum PoolId {
    Default,
    Team(u8),
}

impl PoolId {
    pub fn team(self) -> Option<u8> {
        match self {
            PoolId::Default => None,
            PoolId::Team(team) => Some(team),
        }
    }
}

/// One time-boxed collection cycle. Created fresh for every window.
#[derive(Debug)]
pub struct VoteWindow {
    sequence: u64,
    started_at: Instant,
    duration: Duration,
    pools: BTreeMap<PoolId, VotePool>,
    voters: HashSet<String>,
}

impl VoteWindow {
    pub fn open(sequence: u64, started_at: Instant, duration: Duration) -> Self {
        Self {
            sequence,
            started_at,
            duration,
            pools: BTreeMap::new(),
            voters: HashSet::new(),
        }
    }

    pub fn sequence(&self) -> u64 {
        self.sequence
    }

    pub fn duration(&self) -> Duration {
        self.duration
    }

    pub fn deadline(&self) -> Instant {
        self.started_at + self.duration
    }

    pub fn remaining(&self, now: Instant) -> Duration {
        self.deadline().saturating_duration_since(now)
    }

    pub fn cast(
        &mut self,
        pool: PoolId,
        identity: &str,
        command: &Command,
        display_name: &str,
        weight: f64,
    ) {
        self.pools
            .entry(pool)
            .or_default()
            .cast(identity, command, display_name, weight);
        self.voters.insert(identity.to_string());
    }

    pub fn pool(&self, id: PoolId) -> Option<&VotePool> {
        self.pools.get(&id)
    }

    pub fn pools(&self) -> impl Iterator<Item = (PoolId, &VotePool)> {
        self.pools.iter().map(|(id, pool)| (*id, pool))
    }

    /// Distinct identities across every pool of this window.
    pub fn voter_count(&self) -> usize {
        self.voters.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::command::Action;

    fn press(button: &str) -> Command {
        Command {
            action: Action::Press,
            button: button.to_string(),
            team: None,
            raw: button.to_string(),
        }
    }

    #[test]
    fn pools_are_created_lazily_in_order() {
        let start = Instant::now();
        let mut window = VoteWindow::open(1, start, Duration::from_millis(3000));
        assert_eq!(window.pools().count(), 0);

        window.cast(PoolId::Team(2), "x", &press("a"), "X", 1.0);
        window.cast(PoolId::Default, "y", &press("b"), "Y", 1.0);
        window.cast(PoolId::Team(1), "x", &press("b"), "X", 1.0);

        let ids: Vec<PoolId> = window.pools().map(|(id, _)| id).collect();
        assert_eq!(ids, vec![PoolId::Default, PoolId::Team(1), PoolId::Team(2)]);
        assert_eq!(window.voter_count(), 2);
    }

    #[test]
    fn remaining_time_saturates_after_deadline() {
        let start = Instant::now();
        let window = VoteWindow::open(1, start, Duration::from_millis(500));
        assert_eq!(window.remaining(start), Duration::from_millis(500));
        assert_eq!(
            window.remaining(start + Duration::from_secs(2)),
            Duration::ZERO
        );
    }
}
