use std::time::Instant;

use crowd_core::achievements::{AchievementEarned, AchievementTracker};
use crowd_core::combo::{ComboEntry, ComboStats, ComboTracker};
use crowd_core::dispatch::Dispatcher;
use crowd_core::leaderboard::{HourlyStanding, Leaderboard, Order, Profile, Standing};
use crowd_core::voting::VoteStats;
use crowd_core::{Command, VotingCore, VotingSettings, WinnerResult};
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;

use crate::overlay::OverlayHandle;

const REQUEST_BUFFER: usize = 256;

#[derive(Debug, Error, PartialEq, Eq)]
#[error("vote loop is not running")]
pub struct LoopClosed;

pub struct Vote {
    pub identity: String,
    pub display_name: String,
    pub command: Command,
    pub weight: f64,
}

enum Request {
    Vote(Vote, oneshot::Sender<bool>),
    Stats(oneshot::Sender<VoteStats>),
    History(oneshot::Sender<Vec<WinnerResult>>),
    Combos(oneshot::Sender<Vec<ComboEntry>>),
    ComboStats(oneshot::Sender<ComboStats>),
    Leaderboard(usize, Order, oneshot::Sender<Vec<Standing>>),
    Hourly(usize, oneshot::Sender<Vec<HourlyStanding>>),
    Profile(String, oneshot::Sender<Option<Profile>>),
    ResetHourly,
    Restart(VotingSettings, oneshot::Sender<()>),
    Shutdown,
}

/// Client side of the vote loop. Dropping every handle stops the loop.
#[derive(Clone)]
pub struct VoteHandle {
    tx: mpsc::Sender<Request>,
}

impl VoteHandle {
    /// True when the vote landed in the open window.
    pub async fn vote(&self, vote: Vote) -> Result<bool, LoopClosed> {
        self.ask(|reply| Request::Vote(vote, reply)).await
    }

    pub async fn stats(&self) -> Result<VoteStats, LoopClosed> {
        self.ask(Request::Stats).await
    }

    pub async fn history(&self) -> Result<Vec<WinnerResult>, LoopClosed> {
        self.ask(Request::History).await
    }

    pub async fn combos(&self) -> Result<Vec<ComboEntry>, LoopClosed> {
        self.ask(Request::Combos).await
    }

    pub async fn combo_stats(&self) -> Result<ComboStats, LoopClosed> {
        self.ask(Request::ComboStats).await
    }

    pub async fn leaderboard(&self, limit: usize, order: Order) -> Result<Vec<Standing>, LoopClosed> {
        self.ask(|reply| Request::Leaderboard(limit, order, reply)).await
    }

    pub async fn hourly_leaderboard(&self, limit: usize) -> Result<Vec<HourlyStanding>, LoopClosed> {
        self.ask(|reply| Request::Hourly(limit, reply)).await
    }

    pub async fn profile(&self, identity: &str) -> Result<Option<Profile>, LoopClosed> {
        let identity = identity.to_string();
        self.ask(|reply| Request::Profile(identity, reply)).await
    }

    pub async fn reset_hourly(&self) -> Result<(), LoopClosed> {
        self.tx
            .send(Request::ResetHourly)
            .await
            .map_err(|_| LoopClosed)
    }

    /// Stops the running window, applies `settings` and starts a fresh one.
    pub async fn restart(&self, settings: VotingSettings) -> Result<(), LoopClosed> {
        self.ask(|reply| Request::Restart(settings, reply)).await
    }

    pub async fn shutdown(&self) {
        let _ = self.tx.send(Request::Shutdown).await;
    }

    async fn ask<T>(
        &self,
        request: impl FnOnce(oneshot::Sender<T>) -> Request,
    ) -> Result<T, LoopClosed> {
        let (reply, rx) = oneshot::channel();
        self.tx.send(request(reply)).await.map_err(|_| LoopClosed)?;
        rx.await.map_err(|_| LoopClosed)
    }
}

/// Everything that reacts to a resolved window, owned by the loop task.
pub struct VoteLoop {
    core: VotingCore,
    combos: ComboTracker,
    achievements: AchievementTracker,
    leaderboard: Leaderboard,
    dispatcher: Dispatcher,
    overlay: Option<OverlayHandle>,
}

impl VoteLoop {
    pub fn new(core: VotingCore, dispatcher: Dispatcher, overlay: Option<OverlayHandle>) -> Self {
        Self {
            core,
            combos: ComboTracker::new(),
            achievements: AchievementTracker::new(),
            leaderboard: Leaderboard::new(),
            dispatcher,
            overlay,
        }
    }

    /// Starts the core and runs it on its own task.
    pub fn spawn(self) -> (VoteHandle, JoinHandle<()>) {
        let (tx, rx) = mpsc::channel(REQUEST_BUFFER);
        let task = tokio::spawn(self.run(rx));
        (VoteHandle { tx }, task)
    }

    async fn run(mut self, mut rx: mpsc::Receiver<Request>) {
        self.core.start(now());
        loop {
            let deadline = self.core.deadline();
            tokio::select! {
                _ = sleep_until(deadline) => {
                    let winners = self.core.end_window(now());
                    for winner in &winners {
                        self.on_winner(winner);
                    }
                }
                request = rx.recv() => match request {
                    Some(Request::Shutdown) | None => break,
                    Some(request) => self.handle(request),
                },
            }
        }
        self.core.stop();
        log::info!("[vote] loop stopped");
    }

    fn handle(&mut self, request: Request) {
        match request {
            Request::Vote(vote, reply) => {
                let accepted = self.core.add_vote(
                    &vote.identity,
                    &vote.command,
                    &vote.display_name,
                    vote.weight,
                    now(),
                );
                if accepted {
                    self.leaderboard.record_vote(
                        &vote.identity,
                        &vote.display_name,
                        &vote.command.button,
                    );
                    let earned = self
                        .achievements
                        .record_vote(&vote.identity, &vote.display_name);
                    self.announce(&earned);
                }
                let _ = reply.send(accepted);
            }
            Request::Stats(reply) => {
                let _ = reply.send(self.core.stats());
            }
            Request::History(reply) => {
                let _ = reply.send(self.core.history().cloned().collect());
            }
            Request::Combos(reply) => {
                let _ = reply.send(self.combos.combos());
            }
            Request::ComboStats(reply) => {
                let _ = reply.send(self.combos.stats());
            }
            Request::Leaderboard(limit, order, reply) => {
                let _ = reply.send(self.leaderboard.top(limit, order));
            }
            Request::Hourly(limit, reply) => {
                let _ = reply.send(self.leaderboard.hourly(limit));
            }
            Request::Profile(identity, reply) => {
                let _ = reply.send(self.leaderboard.profile(&identity));
            }
            Request::ResetHourly => self.leaderboard.reset_hourly(),
            Request::Restart(settings, reply) => {
                self.core.stop();
                self.core.reconfigure(settings);
                self.core.start(now());
                let _ = reply.send(());
            }
            Request::Shutdown => {}
        }
    }

    fn on_winner(&mut self, winner: &WinnerResult) {
        self.dispatcher.dispatch(winner);
        self.leaderboard.record_win(winner);
        if let Some(hit) = self.combos.track(winner) {
            self.leaderboard.record_combo(&hit);
            if let Some(overlay) = &self.overlay {
                if let Err(err) = overlay.send_combo(&hit) {
                    log::warn!("[vote] combo broadcast failed: {err}");
                }
            }
        }
        let earned = self.achievements.record_win(winner);
        self.announce(&earned);
    }

    fn announce(&self, earned: &[AchievementEarned]) {
        let Some(overlay) = &self.overlay else {
            return;
        };
        for achievement in earned {
            if let Err(err) = overlay.send_achievement(achievement) {
                log::warn!("[vote] achievement broadcast failed: {err}");
            }
        }
    }
}

// Read through tokio so paused test clocks and window deadlines agree.
fn now() -> Instant {
    tokio::time::Instant::now().into_std()
}

async fn sleep_until(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline.into()).await,
        None => std::future::pending().await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crowd_core::command::Action;
    use crowd_core::dispatch::{DispatchError, EmulatorSink, OverlaySink};
    use crowd_core::emulator::{CommandQueue, SharedQueue};
    use crowd_core::CommandIdSequence;
    use std::sync::Arc;
    use std::time::Duration;

    struct NoOverlay;

    impl OverlaySink for NoOverlay {
        fn command_executed(&self, _result: &WinnerResult) -> Result<(), DispatchError> {
            Ok(())
        }
    }

    fn spawn_loop(window: Duration, queue: &SharedQueue) -> (VoteHandle, JoinHandle<()>) {
        let settings = VotingSettings {
            window,
            multiplayer: false,
            max_players: 1,
        };
        let emulator: Arc<dyn EmulatorSink> = Arc::new(queue.clone());
        let dispatcher = Dispatcher::new(emulator, Arc::new(NoOverlay));
        let core = VotingCore::new(settings, CommandIdSequence::new());
        VoteLoop::new(core, dispatcher, None).spawn()
    }

    fn vote(identity: &str, button: &str) -> Vote {
        Vote {
            identity: identity.to_string(),
            display_name: identity.to_string(),
            command: Command {
                action: Action::Press,
                button: button.to_string(),
                team: None,
                raw: button.to_string(),
            },
            weight: 1.0,
        }
    }

    #[tokio::test(start_paused = true)]
    async fn expired_window_dispatches_winner() {
        let queue = SharedQueue::new(CommandQueue::new("test"));
        let (votes, task) = spawn_loop(Duration::from_millis(3000), &queue);
        assert_eq!(votes.vote(vote("red", "a")).await, Ok(true));
        assert_eq!(votes.vote(vote("blue", "a")).await, Ok(true));

        tokio::time::sleep(Duration::from_millis(3100)).await;
        let history = votes.history().await.expect("running");
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].command.button, "a");
        assert_eq!(history[0].vote_count, 2.0);
        assert_eq!(queue.lock().pending(0).len(), 1);

        votes.shutdown().await;
        task.await.expect("loop task");
    }

    #[tokio::test(start_paused = true)]
    async fn resolved_windows_feed_the_leaderboard() {
        let queue = SharedQueue::new(CommandQueue::new("test"));
        let (votes, task) = spawn_loop(Duration::from_millis(1000), &queue);
        votes.vote(vote("red", "a")).await.expect("running");
        votes.vote(vote("blue", "a")).await.expect("running");
        votes.vote(vote("green", "b")).await.expect("running");
        tokio::time::sleep(Duration::from_millis(1100)).await;

        let top = votes.leaderboard(10, Order::Points).await.expect("running");
        assert_eq!(top.len(), 3);
        assert_eq!(top[0].identity, "red");
        assert_eq!(top[0].points, 11);
        assert_eq!(top[0].wins, 1);

        let hourly = votes.hourly_leaderboard(10).await.expect("running");
        assert_eq!(hourly.len(), 3);
        votes.reset_hourly().await.expect("running");
        assert!(votes.hourly_leaderboard(10).await.expect("running").is_empty());

        let blue = votes.profile("blue").await.expect("running").expect("voted");
        assert_eq!(blue.standing.points, 1);
        assert_eq!(blue.favorite_command.as_deref(), Some("a"));
        assert!(votes.profile("gary").await.expect("running").is_none());

        votes.shutdown().await;
        task.await.expect("loop task");
    }

    #[tokio::test(start_paused = true)]
    async fn shutdown_discards_open_window() {
        let queue = SharedQueue::new(CommandQueue::new("test"));
        let (votes, task) = spawn_loop(Duration::from_millis(3000), &queue);
        assert_eq!(votes.vote(vote("red", "b")).await, Ok(true));
        votes.shutdown().await;
        task.await.expect("loop task");

        tokio::time::sleep(Duration::from_millis(5000)).await;
        assert!(queue.lock().is_empty());
        assert_eq!(votes.stats().await, Err(LoopClosed));
    }

    #[tokio::test(start_paused = true)]
    async fn restart_applies_new_window_immediately() {
        let queue = SharedQueue::new(CommandQueue::new("test"));
        let (votes, task) = spawn_loop(Duration::from_millis(3000), &queue);
        votes.vote(vote("red", "a")).await.expect("running");
        votes
            .restart(VotingSettings {
                window: Duration::from_millis(1000),
                multiplayer: false,
                max_players: 1,
            })
            .await
            .expect("running");

        let stats = votes.stats().await.expect("running");
        assert_eq!(stats.window_ms, 1000);
        assert_eq!(stats.window, 2);
        assert!(stats.votes.is_empty());

        tokio::time::sleep(Duration::from_millis(1100)).await;
        // The vote cast before the restart never resolves.
        assert!(votes.history().await.expect("running").is_empty());

        votes.shutdown().await;
        task.await.expect("loop task");
    }
}
