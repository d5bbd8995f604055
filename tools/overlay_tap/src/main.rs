use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use crowd_stream::{
    decode_payload, Achievement, ComboLanded, ExecutedCommand, Heartbeat, Hello, MessageHeader,
    MessageKind, ProtocolError, VoteUpdate, HEADER_LEN,
};
use serde_json::{json, Value};
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;

const RECONNECT_DELAY_MS: u64 = 750;

#[derive(Parser, Debug)]
#[command(about = "Print the crowd overlay stream as JSON lines", version)]
struct Args {
    /// Overlay stream address (host:port).
    #[arg(long, default_value = "127.0.0.1:4001")]
    overlay_addr: String,

    /// Append events to this JSONL file instead of stdout.
    #[arg(long, value_hint = clap::ValueHint::FilePath)]
    output: Option<PathBuf>,

    /// Skip heartbeat messages.
    #[arg(long)]
    quiet_heartbeats: bool,

    /// Exit after the first disconnect instead of reconnecting.
    #[arg(long)]
    once: bool,
}

#[derive(Debug, Error)]
enum TapError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("protocol error: {0}")]
    Protocol(#[from] ProtocolError),
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    run(args).await
}

async fn run(args: Args) -> Result<()> {
    let mut sink: Box<dyn AsyncWrite + Unpin + Send> = match &args.output {
        Some(path) => Box::new(
            tokio::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .await
                .with_context(|| format!("opening {}", path.display()))?,
        ),
        None => Box::new(tokio::io::stdout()),
    };

    let mut attempt: u32 = 0;
    loop {
        attempt = attempt.wrapping_add(1);
        eprintln!("[overlay_tap] connecting to {} (attempt {attempt})", args.overlay_addr);
        match TcpStream::connect(&args.overlay_addr).await {
            Ok(mut stream) => {
                stream.set_nodelay(true).ok();
                match tap_session(&mut stream, &mut sink, args.quiet_heartbeats).await {
                    Ok(()) => eprintln!("[overlay_tap] stream closed"),
                    Err(err) => eprintln!("[overlay_tap] disconnected: {err}"),
                }
            }
            Err(err) => eprintln!("[overlay_tap] connect error: {err}"),
        }
        if args.once {
            return Ok(());
        }
        tokio::time::sleep(Duration::from_millis(RECONNECT_DELAY_MS)).await;
    }
}

/// Copies decoded messages to `sink` until the producer hangs up.
async fn tap_session<R, W>(stream: &mut R, sink: &mut W, quiet_heartbeats: bool) -> Result<(), TapError>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    loop {
        let (header, payload) = match read_message(stream).await {
            Ok(message) => message,
            Err(TapError::Io(err)) if err.kind() == std::io::ErrorKind::UnexpectedEof => {
                return Ok(());
            }
            Err(err) => return Err(err),
        };
        if quiet_heartbeats && header.kind == MessageKind::Heartbeat {
            continue;
        }
        let event = describe(header.kind, &payload)?;
        let mut line = serde_json::to_vec(&event)?;
        line.push(b'\n');
        sink.write_all(&line).await?;
        sink.flush().await?;
    }
}

fn describe(kind: MessageKind, payload: &[u8]) -> Result<Value, TapError> {
    let data = match kind {
        MessageKind::Hello => serde_json::to_value(decode_payload::<Hello>(payload)?)?,
        MessageKind::VoteUpdate => serde_json::to_value(decode_payload::<VoteUpdate>(payload)?)?,
        MessageKind::CommandExecuted => {
            serde_json::to_value(decode_payload::<ExecutedCommand>(payload)?)?
        }
        MessageKind::ComboLanded => serde_json::to_value(decode_payload::<ComboLanded>(payload)?)?,
        MessageKind::Achievement => serde_json::to_value(decode_payload::<Achievement>(payload)?)?,
        MessageKind::Heartbeat => serde_json::to_value(decode_payload::<Heartbeat>(payload)?)?,
    };
    Ok(json!({ "kind": format!("{kind:?}"), "data": data }))
}

async fn read_message<R>(stream: &mut R) -> Result<(MessageHeader, Vec<u8>), TapError>
where
    R: AsyncRead + Unpin,
{
    let mut header_bytes = [0u8; HEADER_LEN];
    stream.read_exact(&mut header_bytes).await?;
    let header = MessageHeader::decode(&header_bytes)?;
    let mut payload = vec![0u8; header.length as usize];
    stream.read_exact(&mut payload).await?;
    Ok((header, payload))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crowd_stream::encode_message;

    fn framed() -> Vec<u8> {
        let mut bytes = encode_message(
            MessageKind::Hello,
            &Hello::new("crowd_engine", Some("test".to_string())),
        )
        .expect("hello");
        bytes.extend(
            encode_message(
                MessageKind::Heartbeat,
                &Heartbeat {
                    seq: 4,
                    host_time_ns: 10,
                },
            )
            .expect("heartbeat"),
        );
        bytes.extend(
            encode_message(
                MessageKind::Achievement,
                &Achievement {
                    identity: "u1".to_string(),
                    display_name: "Ash".to_string(),
                    achievement: "First Vote".to_string(),
                    description: "Cast your first vote".to_string(),
                },
            )
            .expect("achievement"),
        );
        bytes
    }

    #[tokio::test]
    async fn prints_each_message_as_a_json_line() {
        let bytes = framed();
        let mut reader = bytes.as_slice();
        let mut out = Vec::new();
        tap_session(&mut reader, &mut out, false)
            .await
            .expect("session");

        let lines: Vec<Value> = String::from_utf8(out)
            .expect("utf8")
            .lines()
            .map(|line| serde_json::from_str(line).expect("json"))
            .collect();
        assert_eq!(lines.len(), 3);
        assert_eq!(lines[0]["kind"], "Hello");
        assert_eq!(lines[0]["data"]["producer"], "crowd_engine");
        assert_eq!(lines[1]["data"]["seq"], 4);
        assert_eq!(lines[2]["data"]["display_name"], "Ash");
    }

    #[tokio::test]
    async fn quiet_mode_drops_heartbeats() {
        let bytes = framed();
        let mut reader = bytes.as_slice();
        let mut out = Vec::new();
        tap_session(&mut reader, &mut out, true)
            .await
            .expect("session");
        let text = String::from_utf8(out).expect("utf8");
        assert_eq!(text.lines().count(), 2);
        assert!(!text.contains("Heartbeat"));
    }

    #[tokio::test]
    async fn truncated_stream_closes_and_foreign_magic_fails() {
        let mut bytes = framed();
        bytes.truncate(HEADER_LEN + 2);
        let mut reader = bytes.as_slice();
        let mut out = Vec::new();
        // EOF mid-message surfaces as a clean close
        tap_session(&mut reader, &mut out, false)
            .await
            .expect("session");
        assert!(out.is_empty());

        let mut garbage = b"GRIM".to_vec();
        garbage.extend_from_slice(&[0u8; HEADER_LEN - 4]);
        let mut reader = garbage.as_slice();
        let err = tap_session(&mut reader, &mut out, false)
            .await
            .expect_err("bad magic");
        assert!(matches!(err, TapError::Protocol(ProtocolError::BadMagic)));
    }

    #[tokio::test]
    async fn output_file_receives_lines() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("tap.jsonl");
        let mut file = tokio::fs::File::create(&path).await.expect("create");
        let bytes = framed();
        let mut reader = bytes.as_slice();
        tap_session(&mut reader, &mut file, true)
            .await
            .expect("session");
        drop(file);
        let text = std::fs::read_to_string(&path).expect("read");
        assert!(text.contains("First Vote"));
    }
}
