use serde::Serialize;
use thiserror::Error;

use crate::access::{AccessDenied, InjectGate, Remaining};
use crate::command::{Command, CommandGrammar};
use crate::dispatch::{DispatchReport, Dispatcher};
use crate::outcome::{unix_millis, CommandIdSequence, CommandSource, WinnerResult};

#[derive(Debug, Error)]
pub enum InjectError {
    #[error("Invalid command")]
    InvalidCommand { valid: Vec<String> },
    #[error(transparent)]
    AccessDenied(#[from] AccessDenied),
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Injection {
    pub result: WinnerResult,
    /// Slots left after this one; `None` for ungated injections.
    pub remaining: Option<Remaining>,
    pub tier: Option<&'static str>,
    #[serde(skip)]
    pub dispatch: Option<DispatchReport>,
}

/// Sends commands straight to dispatch, skipping the vote. Ids come from the
/// same sequence the voting core uses.
#[derive(Clone)]
pub struct DirectInjector {
    ids: CommandIdSequence,
    dispatcher: Dispatcher,
}

impl DirectInjector {
    pub fn new(ids: CommandIdSequence, dispatcher: Dispatcher) -> Self {
        Self { ids, dispatcher }
    }

    /// Gate check first, then parse. The slot is spent last, with the cap
    /// re-checked under the gate's lock.
    pub fn inject_gated<G>(
        &self,
        gate: &G,
        grammar: &CommandGrammar,
        identity: &str,
        raw: &str,
    ) -> Result<Injection, InjectError>
    where
        G: InjectGate + ?Sized,
    {
        gate.can_inject(identity)?;
        let command = parse(grammar, raw)?;
        let spent = gate.spend_slot(identity)?;
        let tier = spent.tier_label;
        let remaining = spent.remaining;

        let source = gate.source();
        let label = match source {
            CommandSource::Champions => "Champion",
            CommandSource::TeamRocket => "Team Rocket",
            CommandSource::Vote | CommandSource::Remote => "Direct",
        };
        let result = self.synthesize(
            command,
            source,
            Some(identity.to_string()),
            format!("{label} ({tier})"),
            0.0,
            0,
        );
        log::info!(
            "[inject] {} #{} {} for {identity}",
            source.as_str(),
            result.id,
            result.command
        );
        let dispatch = self.dispatcher.dispatch(&result);
        Ok(Injection {
            result,
            remaining: Some(remaining),
            tier: Some(tier),
            dispatch: Some(dispatch),
        })
    }

    /// Operator injection from the control surface. `team` overrides any team
    /// prefix in the text.
    pub fn inject_remote(
        &self,
        grammar: &CommandGrammar,
        raw: &str,
        team: Option<u8>,
    ) -> Result<Injection, InjectError> {
        let mut command = parse(grammar, raw)?;
        if team.is_some() {
            command.team = team;
        }
        let result = self.synthesize(
            command,
            CommandSource::Remote,
            None,
            "Remote".to_string(),
            1.0,
            1,
        );
        log::info!("[inject] remote #{} {}", result.id, result.command);
        let dispatch = self.dispatcher.dispatch(&result);
        Ok(Injection {
            result,
            remaining: None,
            tier: None,
            dispatch: Some(dispatch),
        })
    }

    fn synthesize(
        &self,
        command: Command,
        source: CommandSource,
        first_voter_identity: Option<String>,
        first_voter_display_name: String,
        vote_count: f64,
        total_distinct_voters: usize,
    ) -> WinnerResult {
        WinnerResult {
            id: self.ids.allocate(),
            team: command.team,
            command,
            vote_count,
            first_voter_identity,
            first_voter_display_name,
            total_distinct_voters,
            window: None,
            source,
            timestamp_ms: unix_millis(),
        }
    }
}

fn parse(grammar: &CommandGrammar, raw: &str) -> Result<Command, InjectError> {
    grammar
        .parse(raw)
        .ok_or_else(|| InjectError::InvalidCommand {
            valid: grammar.valid_commands(),
        })
}
