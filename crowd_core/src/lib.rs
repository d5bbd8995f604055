//! Crowd-plays voting core: command grammar, the window state machine,
//! privilege gates and the dispatch plumbing shared by the engine binary.

pub mod access;
pub mod achievements;
pub mod combo;
pub mod command;
pub mod config;
pub mod dispatch;
pub mod emulator;
pub mod inject;
pub mod leaderboard;
pub mod outcome;
pub mod voting;
pub mod wallet;

pub use command::{Action, Command, CommandGrammar};
pub use config::{ActiveGame, ConfigCatalog, ConfigError, FeatureFlags};
pub use outcome::{CommandIdSequence, CommandSource, WinnerResult};
pub use voting::{VotingCore, VotingSettings};
