mod machine;
mod pool;
mod sink;
mod window;

pub use machine::{VoteStats, VotingCore, VotingSettings, HISTORY_LIMIT};
pub use pool::{FirstVoter, PoolWinner, VotePool};
pub use sink::{RecordingVoteSink, VoteEvent, VoteSink, WindowSnapshot};
pub use window::{Phase, PoolId, VoteWindow};
