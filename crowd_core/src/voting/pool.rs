use std::collections::{BTreeMap, HashMap};

use rand::Rng;
use serde::Serialize;

use crate::command::Command;

/// Tallies this close are treated as equal, and a tally this small is gone.
const WEIGHT_EPSILON: f64 = 1e-9;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FirstVoter {
    pub identity: String,
    pub display_name: String,
}

#[derive(Debug, Clone)]
struct Choice {
    key: String,
    weight: f64,
}

/// Weighted tallies for one team (or the default pool) during one window.
#[derive(Debug, Default, Clone)]
pub struct VotePool {
    tally: BTreeMap<String, f64>,
    choices: HashMap<String, Choice>,
    first_voters: HashMap<String, FirstVoter>,
    commands: HashMap<String, Command>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct PoolWinner {
    pub command: Command,
    pub vote_count: f64,
    pub first_voter: Option<FirstVoter>,
}

impl VotePool {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records `identity`'s choice, replacing whatever they picked before in
    /// this pool. Their influence is always exactly `weight`.
    pub fn cast(&mut self, identity: &str, command: &Command, display_name: &str, weight: f64) {
        self.withdraw(identity);

        let key = command.key();
        *self.tally.entry(key.clone()).or_insert(0.0) += weight;
        self.choices.insert(
            identity.to_string(),
            Choice {
                key: key.clone(),
                weight,
            },
        );
        self.commands
            .entry(key.clone())
            .or_insert_with(|| command.clone());
        self.first_voters.entry(key).or_insert_with(|| FirstVoter {
            identity: identity.to_string(),
            display_name: display_name.to_string(),
        });
    }

    fn withdraw(&mut self, identity: &str) {
        let Some(previous) = self.choices.remove(identity) else {
            return;
        };
        if let Some(count) = self.tally.get_mut(&previous.key) {
            *count -= previous.weight;
            if *count <= WEIGHT_EPSILON {
                self.tally.remove(&previous.key);
            }
        }
    }

    pub fn is_empty(&self) -> bool {
        self.tally.is_empty()
    }

    pub fn tally(&self) -> &BTreeMap<String, f64> {
        &self.tally
    }

    pub fn choice_of(&self, identity: &str) -> Option<&str> {
        self.choices.get(identity).map(|choice| choice.key.as_str())
    }

    pub fn voter_count(&self) -> usize {
        self.choices.len()
    }

    pub fn first_voter(&self, key: &str) -> Option<&FirstVoter> {
        self.first_voters.get(key)
    }

    pub fn total_weight(&self) -> f64 {
        self.tally.values().sum()
    }

    /// Highest tally and every key tied at it, in key order.
    pub fn leaders(&self) -> Option<(f64, Vec<&str>)> {
        let max = self.tally.values().copied().fold(f64::NEG_INFINITY, f64::max);
        if !max.is_finite() {
            return None;
        }
        let tied = self
            .tally
            .iter()
            .filter(|(_, count)| (max - **count).abs() <= WEIGHT_EPSILON)
            .map(|(key, _)| key.as_str())
            .collect();
        Some((max, tied))
    }

    /// Picks the winner, breaking ties uniformly at random.
    pub fn resolve<R: Rng + ?Sized>(&self, rng: &mut R) -> Option<PoolWinner> {
        let (vote_count, tied) = self.leaders()?;
        let key = tied[rng.random_range(0..tied.len())];
        let command = self.commands.get(key)?.clone();
        Some(PoolWinner {
            command,
            vote_count,
            first_voter: self.first_voters.get(key).cloned(),
        })
    }

    /// Normalised Shannon entropy of the tally: 0 for consensus, 1 for an
    /// even split.
    pub fn chaos_level(&self) -> f64 {
        if self.tally.len() <= 1 {
            return 0.0;
        }
        let total = self.total_weight();
        if total <= 0.0 {
            return 0.0;
        }
        let entropy: f64 = self
            .tally
            .values()
            .map(|count| count / total)
            .filter(|p| *p > 0.0)
            .map(|p| -p * p.log2())
            .sum();
        let max_entropy = (self.tally.len() as f64).log2();
        if max_entropy > 0.0 {
            entropy / max_entropy
        } else {
            0.0
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::command::Action;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn press(button: &str) -> Command {
        Command {
            action: Action::Press,
            button: button.to_string(),
            team: None,
            raw: button.to_string(),
        }
    }

    #[test]
    fn revote_moves_weight_instead_of_adding() {
        let mut pool = VotePool::new();
        pool.cast("x", &press("a"), "X", 2.0);
        pool.cast("x", &press("a"), "X", 2.0);
        assert_eq!(pool.tally().get("a"), Some(&2.0));

        pool.cast("x", &press("b"), "X", 3.0);
        assert_eq!(pool.tally().get("a"), None);
        assert_eq!(pool.tally().get("b"), Some(&3.0));
        assert_eq!(pool.choice_of("x"), Some("b"));
        assert_eq!(pool.voter_count(), 1);
    }

    #[test]
    fn withdrawn_weight_uses_the_original_cast() {
        let mut pool = VotePool::new();
        pool.cast("x", &press("a"), "X", 5.0);
        pool.cast("y", &press("a"), "Y", 1.0);
        pool.cast("x", &press("b"), "X", 1.0);
        assert_eq!(pool.tally().get("a"), Some(&1.0));
        assert_eq!(pool.tally().get("b"), Some(&1.0));
        assert_eq!(pool.total_weight(), 2.0);
    }

    #[test]
    fn first_voter_claim_survives_being_outvoted() {
        let mut pool = VotePool::new();
        pool.cast("x", &press("a"), "Xavier", 1.0);
        pool.cast("y", &press("a"), "Yan", 1.0);
        pool.cast("x", &press("b"), "Xavier", 1.0);
        assert_eq!(
            pool.first_voter("a").map(|v| v.display_name.as_str()),
            Some("Xavier")
        );
    }

    #[test]
    fn resolve_prefers_highest_tally() {
        let mut pool = VotePool::new();
        pool.cast("x", &press("a"), "X", 1.0);
        pool.cast("y", &press("b"), "Y", 1.5);
        let mut rng = StdRng::seed_from_u64(7);
        let winner = pool.resolve(&mut rng).expect("winner");
        assert_eq!(winner.command.button, "b");
        assert_eq!(winner.vote_count, 1.5);
        assert_eq!(
            winner.first_voter.map(|v| v.identity),
            Some("y".to_string())
        );
    }

    #[test]
    fn empty_pool_has_no_winner() {
        let pool = VotePool::new();
        let mut rng = StdRng::seed_from_u64(1);
        assert!(pool.resolve(&mut rng).is_none());
        assert_eq!(pool.chaos_level(), 0.0);
    }

    #[test]
    fn chaos_level_spans_consensus_to_split() {
        let mut pool = VotePool::new();
        pool.cast("x", &press("a"), "X", 1.0);
        assert_eq!(pool.chaos_level(), 0.0);
        pool.cast("y", &press("b"), "Y", 1.0);
        assert!((pool.chaos_level() - 1.0).abs() < 1e-9);
    }
}
