use std::io::BufRead;
use std::path::{Path, PathBuf};
use std::thread;
use std::time::Duration;

use anyhow::{Context, Result};
use crowd_core::wallet::{parse_wallet_registration, WalletError};
use serde::Deserialize;
use tokio::sync::mpsc;

use crate::state::AppState;
use crate::vote_loop::{LoopClosed, Vote};

/// One chat line. Field aliases accept the chat relay's own key names.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
pub struct ChatMessage {
    #[serde(alias = "userAddress", alias = "user_key", alias = "userKey")]
    pub identity: String,
    #[serde(default, alias = "username", alias = "displayName")]
    pub display_name: String,
    #[serde(alias = "message")]
    pub text: String,
}

impl ChatMessage {
    fn display_name(&self) -> &str {
        if self.display_name.is_empty() {
            &self.identity
        } else {
            &self.display_name
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum FeedSource {
    /// Follow a JSON-lines file as it grows.
    File(PathBuf),
    /// Read JSON lines from standard input until it closes.
    Stdin,
}

impl FeedSource {
    pub fn from_arg(arg: &Path) -> Self {
        if arg == Path::new("-") {
            FeedSource::Stdin
        } else {
            FeedSource::File(arg.to_path_buf())
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Ingested {
    Vote { accepted: bool, weight: f64 },
    Wallet(Result<String, WalletError>),
    Ignored,
}

/// Reads the feed on its own thread so a blocked stdin never holds up
/// runtime shutdown.
pub fn spawn_chat_reader(source: FeedSource) -> Result<mpsc::Receiver<ChatMessage>> {
    let (tx, rx) = mpsc::channel(128);
    thread::Builder::new()
        .name("crowd_chat".to_string())
        .spawn(move || match read_feed(source, &tx) {
            Ok(()) => log::info!("[chat] reader finished"),
            Err(err) => log::error!("[chat] reader failed: {err:#}"),
        })
        .context("spawning chat reader thread")?;
    Ok(rx)
}

fn read_feed(source: FeedSource, tx: &mpsc::Sender<ChatMessage>) -> Result<()> {
    match source {
        FeedSource::File(path) => {
            wait_for_file(&path)?;
            let file = std::fs::File::open(&path)
                .with_context(|| format!("opening chat feed {}", path.display()))?;
            log::info!("[chat] following {}", path.display());
            read_lines(std::io::BufReader::new(file), tx, true)
        }
        FeedSource::Stdin => {
            log::info!("[chat] reading from stdin");
            read_lines(std::io::stdin().lock(), tx, false)
        }
    }
}

fn read_lines<R: BufRead>(
    mut reader: R,
    tx: &mpsc::Sender<ChatMessage>,
    follow: bool,
) -> Result<()> {
    let mut buffer = String::new();
    loop {
        buffer.clear();
        let bytes = reader.read_line(&mut buffer).context("reading chat feed")?;
        if bytes == 0 {
            if !follow || tx.is_closed() {
                return Ok(());
            }
            thread::sleep(Duration::from_millis(50));
            continue;
        }
        let line = buffer.trim();
        if line.is_empty() {
            continue;
        }
        match serde_json::from_str::<ChatMessage>(line) {
            Ok(message) => {
                if tx.blocking_send(message).is_err() {
                    return Ok(());
                }
            }
            Err(err) => {
                log::warn!("[chat] parse error ({err}): {line}");
            }
        }
    }
}

fn wait_for_file(path: &Path) -> Result<()> {
    let mut attempts = 0u32;
    loop {
        if path.exists() {
            return Ok(());
        }
        attempts += 1;
        thread::sleep(Duration::from_millis(250));
        if attempts > 240 {
            return Err(anyhow::anyhow!(
                "chat feed {} not created within timeout",
                path.display()
            ));
        }
    }
}

/// Routes one chat line: wallet registrations go to the directory, valid
/// commands become votes weighted by the sender's tier. Everything else is
/// dropped without a reply.
pub async fn ingest(state: &AppState, message: &ChatMessage) -> Result<Ingested, LoopClosed> {
    if let Some(address) = parse_wallet_registration(&message.text) {
        let Some(economy) = state.economy.as_ref() else {
            return Ok(Ingested::Ignored);
        };
        let outcome = economy
            .wallets()
            .register(&message.identity, message.display_name(), address)
            .map(|info| info.wallet_address.clone());
        if let Err(err) = &outcome {
            log::info!(
                "[chat] wallet registration from {} refused: {err}",
                message.identity
            );
        }
        return Ok(Ingested::Wallet(outcome));
    }

    let parsed = state.grammar().parse(&message.text);
    let Some(command) = parsed else {
        return Ok(Ingested::Ignored);
    };
    let weight = state
        .economy
        .as_ref()
        .map_or(1.0, |economy| economy.balances.vote_weight(&message.identity));
    let accepted = state
        .votes
        .vote(Vote {
            identity: message.identity.clone(),
            display_name: message.display_name().to_string(),
            command,
            weight,
        })
        .await?;
    Ok(Ingested::Vote { accepted, weight })
}

/// Drains the reader until it closes or the vote loop goes away.
pub async fn run_ingest(state: &AppState, mut rx: mpsc::Receiver<ChatMessage>) {
    while let Some(message) = rx.recv().await {
        match ingest(state, &message).await {
            Ok(Ingested::Vote { accepted: false, .. }) => {
                log::debug!("[chat] vote from {} rejected", message.identity);
            }
            Ok(_) => {}
            Err(LoopClosed) => break,
        }
    }
}
