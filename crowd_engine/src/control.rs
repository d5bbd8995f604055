use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::{Context, Result};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, BufWriter};
use tokio::net::{TcpListener, TcpStream};

use crate::api::{self, ControlRequest, ControlResponse};
use crate::state::AppState;

/// JSON-lines control socket: one request object per line in, one response
/// object per line out.
pub struct ControlServer {
    listener: TcpListener,
}

impl ControlServer {
    pub async fn bind(addr: &str) -> Result<Self> {
        let listener = TcpListener::bind(addr)
            .await
            .with_context(|| format!("binding control socket {addr}"))?;
        Ok(Self { listener })
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        self.listener
            .local_addr()
            .context("reading control listener address")
    }

    /// Accepts clients until the task is aborted.
    pub async fn serve(self, state: Arc<AppState>) -> Result<()> {
        log::info!("[control] listening on {}", self.local_addr()?);
        loop {
            let (stream, addr) = self
                .listener
                .accept()
                .await
                .context("accepting control client")?;
            let state = Arc::clone(&state);
            tokio::spawn(async move {
                if let Err(err) = handle_client(stream, &state).await {
                    log::warn!("[control] client {addr} dropped: {err:#}");
                }
            });
        }
    }
}

async fn handle_client(stream: TcpStream, state: &AppState) -> Result<()> {
    let (reader, writer) = stream.into_split();
    let mut lines = BufReader::new(reader).lines();
    let mut writer = BufWriter::new(writer);
    while let Some(line) = lines.next_line().await.context("reading request")? {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        let response = match serde_json::from_str::<ControlRequest>(line) {
            Ok(request) => {
                log::debug!("[control] {} {}", request.method, request.path);
                api::route(state, request).await
            }
            Err(err) => ControlResponse {
                status: 400,
                body: serde_json::json!({ "error": format!("Malformed request: {err}") }),
            },
        };
        let mut encoded = serde_json::to_vec(&response).context("encoding response")?;
        encoded.push(b'\n');
        writer.write_all(&encoded).await?;
        writer.flush().await?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::test_state;
    use serde_json::Value;

    #[tokio::test]
    async fn answers_one_response_per_line() {
        let (state, _task) = test_state(None);
        let server = ControlServer::bind("127.0.0.1:0").await.expect("bind");
        let addr = server.local_addr().expect("addr");
        let serving = tokio::spawn(server.serve(state));

        let stream = TcpStream::connect(addr).await.expect("connect");
        let (reader, mut writer) = stream.into_split();
        writer
            .write_all(b"{\"method\":\"GET\",\"path\":\"/api/commands\"}\nnot json\n")
            .await
            .expect("write");
        let mut lines = BufReader::new(reader).lines();

        let first: Value =
            serde_json::from_str(&lines.next_line().await.expect("read").expect("line"))
                .expect("json");
        assert_eq!(first["status"], 200);
        assert!(first["body"]["commands"].is_array());

        let second: Value =
            serde_json::from_str(&lines.next_line().await.expect("read").expect("line"))
                .expect("json");
        assert_eq!(second["status"], 400);

        serving.abort();
    }
}
