use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use crowd_core::dispatch::{Dispatcher, EmulatorSink};
use crowd_core::emulator::{CommandQueue, SharedQueue};
use crowd_core::inject::DirectInjector;
use crowd_core::{CommandGrammar, CommandIdSequence, ConfigCatalog, VotingCore, VotingSettings};

use crate::chat_feed::{self, FeedSource};
use crate::cli::Args;
use crate::control::ControlServer;
use crate::overlay::OverlayServer;
use crate::state::{AppState, Economy};
use crate::vote_loop::VoteLoop;

const HOURLY_RESET: Duration = Duration::from_secs(60 * 60);

pub async fn run(args: Args) -> Result<()> {
    let catalog = ConfigCatalog::load(&args.config_root)
        .with_context(|| format!("loading config from {}", args.config_root.display()))?;
    let active = catalog
        .activate(&args.game, args.vote_window_ms)
        .with_context(|| format!("activating game {}", args.game))?;
    let grammar = CommandGrammar::for_game(active.clone())
        .with_context(|| format!("building command grammar for {}", active.id))?;

    let queue = SharedQueue::new(CommandQueue::new(active.name.clone()));
    if args.emulator_disconnected {
        queue.lock().set_connected(false);
        log::warn!("[engine] emulator marked disconnected; winners will not be queued");
    }

    let overlay = OverlayServer::bind(
        args.overlay_addr.as_str(),
        Some(env!("CARGO_PKG_VERSION").to_string()),
    )?;
    let emulator: Arc<dyn EmulatorSink> = Arc::new(queue.clone());
    let dispatcher = Dispatcher::new(emulator, Arc::new(overlay.handle()));

    let ids = CommandIdSequence::new();
    let mut core = VotingCore::new(VotingSettings::for_game(&active), ids.clone());
    core.subscribe(Box::new(overlay.handle()));
    let (votes, vote_task) =
        VoteLoop::new(core, dispatcher.clone(), Some(overlay.handle())).spawn();

    let economy = if args.economy {
        Some(Economy::load(&args.state_dir)?)
    } else {
        None
    };
    let state = Arc::new(AppState::new(
        catalog,
        grammar,
        args.vote_window_ms,
        votes.clone(),
        queue,
        DirectInjector::new(ids, dispatcher),
        economy,
    ));

    let control = ControlServer::bind(&args.control_addr).await?;
    let control_task = tokio::spawn(control.serve(Arc::clone(&state)));

    let chat_task = match args.chat_feed.as_deref() {
        Some(arg) => {
            let rx = chat_feed::spawn_chat_reader(FeedSource::from_arg(arg))?;
            let state = Arc::clone(&state);
            Some(tokio::spawn(async move {
                chat_feed::run_ingest(&state, rx).await;
            }))
        }
        None => None,
    };

    log::info!(
        "[engine] running {} (control {}, overlay {})",
        active.name,
        args.control_addr,
        overlay.local_addr()
    );

    let mut hourly = tokio::time::interval_at(
        tokio::time::Instant::now() + HOURLY_RESET,
        HOURLY_RESET,
    );
    let mut heartbeat = tokio::time::interval(Duration::from_secs(args.heartbeat_secs.max(1)));
    loop {
        tokio::select! {
            signal = tokio::signal::ctrl_c() => {
                signal.context("waiting for ctrl-c")?;
                log::info!("[engine] shutting down");
                break;
            }
            _ = hourly.tick() => {
                if let Err(err) = votes.reset_hourly().await {
                    log::warn!("[vote] hourly leaderboard reset failed: {err}");
                }
                if let Some(economy) = state.economy.as_ref() {
                    economy.reset_hourly();
                    if let Err(err) = economy.save() {
                        log::error!("[economy] snapshot failed: {err:#}");
                    }
                }
            }
            _ = heartbeat.tick() => {
                if let Err(err) = overlay.handle().send_heartbeat() {
                    log::warn!("[overlay] heartbeat failed: {err}");
                }
            }
        }
    }

    votes.shutdown().await;
    if let Err(err) = vote_task.await {
        log::error!("[vote] loop task failed: {err}");
    }
    control_task.abort();
    if let Some(task) = chat_task {
        task.abort();
    }
    if let Some(economy) = state.economy.as_ref() {
        economy.save().context("saving economy state")?;
    }
    Ok(())
}
