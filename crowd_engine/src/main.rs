use anyhow::Result;
use clap::Parser;

mod api;
mod chat_feed;
mod cli;
mod control;
mod overlay;
mod runtime;
mod state;
mod vote_loop;

use cli::Args;

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();
    runtime::run(args).await
}
