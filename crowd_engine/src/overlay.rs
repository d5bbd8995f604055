use std::io::{self, Write};
use std::net::{SocketAddr, TcpListener, TcpStream, ToSocketAddrs};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use anyhow::Context;
use crowd_core::achievements::AchievementEarned;
use crowd_core::combo::ComboHit;
use crowd_core::dispatch::{DispatchError, OverlaySink};
use crowd_core::voting::{VoteSink, WindowSnapshot};
use crowd_core::WinnerResult;
use crowd_stream::{
    encode_message, Achievement, ComboLanded, ExecutedCommand, Heartbeat, Hello, MessageKind,
    ProtocolError, TeamTally, VoteUpdate,
};
use serde::Serialize;
use thiserror::Error;

const WRITE_TIMEOUT: Duration = Duration::from_millis(250);

#[derive(Debug, Error)]
pub enum StreamError {
    #[error("overlay worker disconnected")]
    Disconnected,
    #[error("message encode failed: {0}")]
    Encode(#[from] ProtocolError),
}

enum Command {
    Send(Vec<u8>),
    Shutdown,
}

/// Owns the overlay worker thread. Dropping the server stops the worker.
pub struct OverlayServer {
    handle: OverlayHandle,
    local_addr: SocketAddr,
}

/// Cloneable sender side of the overlay stream.
#[derive(Clone)]
pub struct OverlayHandle {
    sender: Sender<Command>,
    start: Instant,
    seq: Arc<AtomicU64>,
}

impl OverlayServer {
    pub fn bind<A: ToSocketAddrs>(addr: A, build: Option<String>) -> anyhow::Result<Self> {
        let listener = TcpListener::bind(addr).context("binding overlay socket")?;
        listener
            .set_nonblocking(true)
            .context("setting overlay listener non-blocking")?;
        let local_addr = listener
            .local_addr()
            .context("reading overlay listener address")?;
        let (tx, rx) = mpsc::channel();
        let build_info = build.unwrap_or_else(|| "dev".to_string());
        thread::Builder::new()
            .name("crowd_overlay".to_string())
            .spawn(move || worker_loop(listener, rx, build_info))
            .context("spawning overlay worker thread")?;
        log::info!("[overlay] listening on {local_addr}");
        Ok(Self {
            handle: OverlayHandle {
                sender: tx,
                start: Instant::now(),
                seq: Arc::new(AtomicU64::new(0)),
            },
            local_addr,
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn handle(&self) -> OverlayHandle {
        self.handle.clone()
    }
}

impl Drop for OverlayServer {
    fn drop(&mut self) {
        let _ = self.handle.sender.send(Command::Shutdown);
    }
}

impl OverlayHandle {
    fn next_seq(&self) -> (u64, u64) {
        let seq = self.seq.fetch_add(1, Ordering::Relaxed);
        (seq, self.start.elapsed().as_nanos() as u64)
    }

    fn send<T: Serialize>(&self, kind: MessageKind, payload: &T) -> Result<(), StreamError> {
        let bytes = encode_message(kind, payload)?;
        self.sender
            .send(Command::Send(bytes))
            .map_err(|_| StreamError::Disconnected)
    }

    pub fn send_vote_update(&self, snapshot: &WindowSnapshot) -> Result<(), StreamError> {
        let (seq, host_time_ns) = self.next_seq();
        let update = VoteUpdate {
            seq,
            host_time_ns,
            phase: snapshot.phase.as_str().to_string(),
            window: snapshot.window,
            window_ms: snapshot.window_ms,
            time_remaining_ms: snapshot.time_remaining_ms,
            votes: snapshot.votes.clone(),
            teams: snapshot
                .teams
                .iter()
                .map(|(team, votes)| TeamTally {
                    team: *team,
                    votes: votes.clone(),
                })
                .collect(),
            voter_count: u32::try_from(snapshot.voter_count).unwrap_or(u32::MAX),
            multiplayer: snapshot.multiplayer,
        };
        self.send(MessageKind::VoteUpdate, &update)
    }

    pub fn send_command_executed(&self, result: &WinnerResult) -> Result<(), StreamError> {
        self.send(MessageKind::CommandExecuted, &executed_command(result))
    }

    pub fn send_combo(&self, hit: &ComboHit) -> Result<(), StreamError> {
        let landed = ComboLanded {
            combo_id: hit.combo.id.to_string(),
            name: hit.combo.name.to_string(),
            description: hit.combo.description.to_string(),
            bonus: hit.combo.bonus,
            bonus_points: hit.bonus_points,
            finisher: hit.finisher.clone(),
        };
        self.send(MessageKind::ComboLanded, &landed)
    }

    pub fn send_achievement(&self, earned: &AchievementEarned) -> Result<(), StreamError> {
        let achievement = Achievement {
            identity: earned.identity.clone(),
            display_name: earned.display_name.clone(),
            achievement: earned.achievement.to_string(),
            description: earned.description.to_string(),
        };
        self.send(MessageKind::Achievement, &achievement)
    }

    pub fn send_heartbeat(&self) -> Result<(), StreamError> {
        let (seq, host_time_ns) = self.next_seq();
        self.send(MessageKind::Heartbeat, &Heartbeat { seq, host_time_ns })
    }
}

fn executed_command(result: &WinnerResult) -> ExecutedCommand {
    ExecutedCommand {
        id: result.id,
        key: result.command.key(),
        button: result.command.button.clone(),
        action: result.command.action.as_str().to_string(),
        duration_ms: result.command.action.duration_ms(),
        team: result.team,
        vote_count: result.vote_count,
        first_voter: result.first_voter_display_name.clone(),
        total_voters: u32::try_from(result.total_distinct_voters).unwrap_or(u32::MAX),
        window: result.window,
        source: result.source.as_str().to_string(),
        timestamp_ms: result.timestamp_ms,
    }
}

impl OverlaySink for OverlayHandle {
    fn command_executed(&self, result: &WinnerResult) -> Result<(), DispatchError> {
        self.send_command_executed(result)
            .map_err(|err| DispatchError::Overlay(err.to_string()))
    }
}

impl VoteSink for OverlayHandle {
    fn vote_update(&self, snapshot: &WindowSnapshot) {
        if let Err(err) = self.send_vote_update(snapshot) {
            log::warn!("[overlay] vote update dropped: {err}");
        }
    }

    // Winners reach the overlay through dispatch as CommandExecuted.
    fn vote_winner(&self, _result: &WinnerResult) {}
}

fn worker_loop(listener: TcpListener, rx: Receiver<Command>, build_info: String) {
    let mut viewers: Vec<(SocketAddr, TcpStream)> = Vec::new();
    loop {
        match rx.recv_timeout(Duration::from_millis(16)) {
            Ok(Command::Send(buffer)) => {
                viewers.retain_mut(|(addr, conn)| match write_all(conn, &buffer) {
                    Ok(()) => true,
                    Err(err) => {
                        log::warn!("[overlay] send to {addr} failed: {err}; dropping viewer");
                        false
                    }
                });
            }
            Ok(Command::Shutdown) => break,
            Err(mpsc::RecvTimeoutError::Timeout) => {}
            Err(mpsc::RecvTimeoutError::Disconnected) => break,
        }

        loop {
            match listener.accept() {
                Ok((mut conn, addr)) => {
                    if let Err(err) = configure(&conn) {
                        log::warn!("[overlay] failed to configure connection from {addr}: {err}");
                        continue;
                    }
                    match send_hello(&mut conn, &build_info) {
                        Ok(()) => {
                            log::info!("[overlay] viewer connected from {addr}");
                            viewers.push((addr, conn));
                        }
                        Err(err) => {
                            log::warn!("[overlay] handshake error with {addr}: {err}");
                        }
                    }
                }
                Err(err) if err.kind() == io::ErrorKind::WouldBlock => break,
                Err(err) => {
                    log::error!("[overlay] accept error: {err}");
                    thread::sleep(Duration::from_millis(200));
                    break;
                }
            }
        }
    }
    log::info!("[overlay] worker stopped");
}

fn configure(conn: &TcpStream) -> io::Result<()> {
    conn.set_nonblocking(false)?;
    conn.set_nodelay(true)?;
    conn.set_write_timeout(Some(WRITE_TIMEOUT))
}

fn send_hello(stream: &mut TcpStream, build_info: &str) -> Result<(), io::Error> {
    let hello = Hello::new("crowd_engine", Some(build_info.to_string()));
    let message = encode_message(MessageKind::Hello, &hello)
        .map_err(|err| io::Error::new(io::ErrorKind::Other, err))?;
    write_all(stream, &message)
}

fn write_all(stream: &mut TcpStream, bytes: &[u8]) -> io::Result<()> {
    let mut offset = 0;
    while offset < bytes.len() {
        match stream.write(&bytes[offset..]) {
            Ok(0) => {
                return Err(io::Error::new(
                    io::ErrorKind::WriteZero,
                    "remote closed connection",
                ))
            }
            Ok(written) => offset += written,
            Err(ref err) if err.kind() == io::ErrorKind::Interrupted => continue,
            Err(err) => return Err(err),
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crowd_core::command::{Action, Command as GameCommand};
    use crowd_core::CommandSource;
    use crowd_stream::{decode_payload, MessageHeader, HEADER_LEN};
    use std::io::Read;

    fn read_message(stream: &mut TcpStream) -> (MessageHeader, Vec<u8>) {
        let mut header = [0u8; HEADER_LEN];
        stream.read_exact(&mut header).expect("header");
        let header = MessageHeader::decode(&header).expect("valid header");
        let mut payload = vec![0u8; header.length as usize];
        stream.read_exact(&mut payload).expect("payload");
        (header, payload)
    }

    fn connect(server: &OverlayServer) -> TcpStream {
        let stream = TcpStream::connect(server.local_addr()).expect("connect");
        stream
            .set_read_timeout(Some(Duration::from_secs(5)))
            .expect("read timeout");
        stream
    }

    #[test]
    fn viewers_receive_hello_then_broadcasts() {
        let server = OverlayServer::bind("127.0.0.1:0", Some("test".to_string())).expect("bind");
        let mut first = connect(&server);
        let mut second = connect(&server);

        for stream in [&mut first, &mut second] {
            let (header, payload) = read_message(stream);
            assert_eq!(header.kind, MessageKind::Hello);
            let hello: Hello = decode_payload(&payload).expect("hello");
            assert_eq!(hello.producer, "crowd_engine");
            assert_eq!(hello.build.as_deref(), Some("test"));
        }

        let result = WinnerResult {
            id: 7,
            command: GameCommand {
                action: Action::Hold { duration_ms: 500 },
                button: "up".to_string(),
                team: Some(2),
                raw: "2holdup 500".to_string(),
            },
            vote_count: 3.0,
            first_voter_identity: Some("red".to_string()),
            first_voter_display_name: "Red".to_string(),
            total_distinct_voters: 2,
            window: Some(4),
            team: Some(2),
            source: CommandSource::Vote,
            timestamp_ms: 1,
        };
        server
            .handle()
            .command_executed(&result)
            .expect("queued");

        for stream in [&mut first, &mut second] {
            let (header, payload) = read_message(stream);
            assert_eq!(header.kind, MessageKind::CommandExecuted);
            let executed: ExecutedCommand = decode_payload(&payload).expect("executed");
            assert_eq!(executed.id, 7);
            assert_eq!(executed.action, "hold");
            assert_eq!(executed.duration_ms, Some(500));
            assert_eq!(executed.team, Some(2));
            assert_eq!(executed.total_voters, 2);
        }
    }

    #[test]
    fn heartbeat_sequence_advances() {
        let server = OverlayServer::bind("127.0.0.1:0", None).expect("bind");
        let mut viewer = connect(&server);
        let (header, _) = read_message(&mut viewer);
        assert_eq!(header.kind, MessageKind::Hello);

        let handle = server.handle();
        handle.send_heartbeat().expect("first");
        handle.send_heartbeat().expect("second");
        let seqs: Vec<u64> = (0..2)
            .map(|_| {
                let (header, payload) = read_message(&mut viewer);
                assert_eq!(header.kind, MessageKind::Heartbeat);
                decode_payload::<Heartbeat>(&payload).expect("heartbeat").seq
            })
            .collect();
        assert_eq!(seqs, vec![0, 1]);
    }
}
