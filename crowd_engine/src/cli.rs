use std::path::PathBuf;

use clap::Parser;

#[derive(Parser, Debug, Clone)]
#[command(about = "Crowd-plays vote engine: chat votes in, emulator commands out", version)]
pub struct Args {
    /// Directory holding `systems/*.json` and `games/*.json`
    #[arg(long, env = "CONFIG_ROOT", default_value = "config")]
    pub config_root: PathBuf,

    /// Game id to activate at startup
    #[arg(long, env = "ACTIVE_GAME", default_value = "pokemon-firered")]
    pub game: String,

    /// Vote window length for games that do not set their own
    #[arg(long, env = "VOTE_WINDOW_MS")]
    pub vote_window_ms: Option<u64>,

    /// Enable the Champions / Team Rocket token gates and wallet routes
    #[arg(long, env = "ENABLE_ECONOMY")]
    pub economy: bool,

    /// Address the overlay stream listens on
    #[arg(long, env = "OVERLAY_ADDR", default_value = "127.0.0.1:4001")]
    pub overlay_addr: String,

    /// Address the JSON-lines control socket listens on
    #[arg(long, env = "CONTROL_ADDR", default_value = "127.0.0.1:4000")]
    pub control_addr: String,

    /// JSON-lines chat feed to follow; `-` reads stdin
    #[arg(long, env = "CHAT_FEED")]
    pub chat_feed: Option<PathBuf>,

    /// Where ledger and wallet snapshots are kept
    #[arg(long, env = "STATE_DIR", default_value = "data")]
    pub state_dir: PathBuf,

    /// Start with the emulator marked offline; commands are dropped, not queued
    #[arg(long)]
    pub emulator_disconnected: bool,

    /// Seconds between overlay heartbeats
    #[arg(long, default_value_t = 5)]
    pub heartbeat_secs: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_local_setup() {
        let args = Args::try_parse_from(["crowd_engine"]).expect("defaults");
        assert_eq!(args.control_addr, "127.0.0.1:4000");
        assert_eq!(args.overlay_addr, "127.0.0.1:4001");
        assert!(args.chat_feed.is_none());
        assert!(!args.emulator_disconnected);
    }

    #[test]
    fn window_override_parses() {
        let args = Args::try_parse_from([
            "crowd_engine",
            "--game",
            "mario-kart-64",
            "--vote-window-ms",
            "1500",
            "--economy",
        ])
        .expect("flags");
        assert_eq!(args.game, "mario-kart-64");
        assert_eq!(args.vote_window_ms, Some(1500));
        assert!(args.economy);
    }
}
