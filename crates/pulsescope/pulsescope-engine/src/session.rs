//! One live connection.
//!
//! A session sends the series catalog first, then runs two halves until
//! either ends:
//!
//! - **push**: a single task owning the write half. Telemetry every 40 ms,
//!   the distance grid every 200 ms, a status message every second. A tick
//!   whose read is not ready is skipped; the next tick simply tries again.
//! - **inbound**: consumes control updates and writes them back into the
//!   segment. Anything that does not decode is ignored.
//!
//! Only the push task writes to the socket, so outbound frames never
//! interleave. Every write is bounded by [`WRITE_TIMEOUT`]; a client that
//! stops draining is dropped instead of stalling the tick loop.

use crate::bridge::Bridge;
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use pulsescope_events::{ServerMessage, decode_control, encode};
use pulsescope_shm::FIXED_SERIES;
use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::time::{Instant, MissedTickBehavior, interval_at, timeout};
use tokio_tungstenite::WebSocketStream;
use tokio_util::sync::CancellationToken;
use tungstenite::Message;

pub const TELEMETRY_PERIOD: Duration = Duration::from_millis(40);
pub const GRID_PERIOD: Duration = Duration::from_millis(200);
pub const STATUS_PERIOD: Duration = Duration::from_secs(1);
pub const WRITE_TIMEOUT: Duration = Duration::from_secs(2);

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("websocket: {0}")]
    WebSocket(#[from] tungstenite::Error),
    #[error("client did not drain a frame within {0:?}")]
    WriteTimeout(Duration),
    #[error("session already closed")]
    Closed,
}

/// Write-half lifecycle.
///
/// `Open` until the first catalog reaches the client, `Streaming` after. Any
/// failed or timed-out write moves straight to `Closed`: the sink may hold a
/// partial frame, so nothing else is written to it, not even a close frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SessionState {
    Open,
    Streaming,
    Closed,
}

/// Series names announced to one client.
///
/// Seeded with the fixed controller series and only ever grows, so a client
/// sees a metadata message exactly when a name it has not seen appears.
#[derive(Debug, Clone)]
pub struct SeriesCatalog {
    known: BTreeSet<String>,
}

impl Default for SeriesCatalog {
    fn default() -> Self {
        Self {
            known: FIXED_SERIES.iter().map(|s| s.to_string()).collect(),
        }
    }
}

impl SeriesCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record `names`; `true` if any of them was new.
    pub fn observe<'a, I>(&mut self, names: I) -> bool
    where
        I: IntoIterator<Item = &'a str>,
    {
        let mut grew = false;
        for name in names {
            if !self.known.contains(name) {
                self.known.insert(name.to_owned());
                grew = true;
            }
        }
        grew
    }

    pub fn contains(&self, name: &str) -> bool {
        self.known.contains(name)
    }

    pub fn len(&self) -> usize {
        self.known.len()
    }

    pub fn is_empty(&self) -> bool {
        self.known.is_empty()
    }

    pub fn metadata(&self) -> ServerMessage {
        ServerMessage::Metadata {
            available_series: self.known.iter().cloned().collect(),
        }
    }
}

struct Outbound<S> {
    sink: SplitSink<WebSocketStream<S>, Message>,
    state: SessionState,
    sent: u64,
}

impl<S> Outbound<S>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    fn new(sink: SplitSink<WebSocketStream<S>, Message>) -> Self {
        Self {
            sink,
            state: SessionState::Open,
            sent: 0,
        }
    }

    async fn send(&mut self, message: &ServerMessage) -> Result<(), SessionError> {
        if self.state == SessionState::Closed {
            return Err(SessionError::Closed);
        }
        let text = match encode(message) {
            Ok(text) => text,
            Err(e) => {
                tracing::warn!(kind = message.kind(), error = %e, "dropping unencodable message");
                return Ok(());
            }
        };
        let outcome = match timeout(WRITE_TIMEOUT, self.sink.send(Message::text(text))).await {
            Ok(result) => result.map_err(SessionError::from),
            Err(_) => Err(SessionError::WriteTimeout(WRITE_TIMEOUT)),
        };
        match outcome {
            Ok(()) => {
                self.sent += 1;
                if self.state == SessionState::Open
                    && matches!(message, ServerMessage::Metadata { .. })
                {
                    self.state = SessionState::Streaming;
                }
                Ok(())
            }
            Err(e) => {
                self.state = SessionState::Closed;
                Err(e)
            }
        }
    }

    /// Send a close frame unless the sink is already unusable.
    async fn close(&mut self) {
        if self.state == SessionState::Closed {
            return;
        }
        self.state = SessionState::Closed;
        let _ = timeout(WRITE_TIMEOUT, self.sink.close()).await;
    }
}

/// Drive one upgraded connection until the client leaves, a write fails, or
/// `cancel` fires.
pub async fn run_session<S>(
    ws: WebSocketStream<S>,
    bridge: Arc<Bridge>,
    cancel: CancellationToken,
) -> Result<(), SessionError>
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    let (sink, stream) = ws.split();
    let mut out = Outbound::new(sink);
    let mut catalog = SeriesCatalog::new();

    if let Err(e) = out.send(&catalog.metadata()).await {
        cancel.cancel();
        return Err(e);
    }
    tracing::debug!(state = ?out.state, series = catalog.len());

    let inbound = tokio::spawn(consume_controls(stream, bridge.clone(), cancel.clone()));
    let result = push_loop(&mut out, &bridge, &mut catalog, &cancel).await;

    cancel.cancel();
    let _ = inbound.await;
    out.close().await;

    tracing::debug!(state = ?out.state, sent = out.sent);
    result
}

async fn push_loop<S>(
    out: &mut Outbound<S>,
    bridge: &Bridge,
    catalog: &mut SeriesCatalog,
    cancel: &CancellationToken,
) -> Result<(), SessionError>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let start = Instant::now();
    let mut telemetry = interval_at(start + TELEMETRY_PERIOD, TELEMETRY_PERIOD);
    let mut grid = interval_at(start + GRID_PERIOD, GRID_PERIOD);
    let mut status = interval_at(start + STATUS_PERIOD, STATUS_PERIOD);
    for ticker in [&mut telemetry, &mut grid, &mut status] {
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    }

    loop {
        tokio::select! {
            _ = cancel.cancelled() => return Ok(()),
            _ = telemetry.tick() => {
                let Some(snapshot) = bridge.telemetry() else {
                    tracing::trace!("telemetry not ready");
                    continue;
                };
                if catalog.observe(snapshot.series.keys().map(String::as_str)) {
                    out.send(&catalog.metadata()).await?;
                }
                out.send(&ServerMessage::Data {
                    timestamp: snapshot.timestamp_ms,
                    series: snapshot.series,
                })
                .await?;
            }
            _ = grid.tick() => {
                let Some(snapshot) = bridge.grid() else {
                    tracing::trace!("grid not ready");
                    continue;
                };
                out.send(&ServerMessage::map(snapshot.timestamp_ms, snapshot.cells)).await?;
            }
            _ = status.tick() => {
                out.send(&bridge.status_message()).await?;
            }
        }
    }
}

async fn consume_controls<S>(
    mut stream: SplitStream<WebSocketStream<S>>,
    bridge: Arc<Bridge>,
    cancel: CancellationToken,
) where
    S: AsyncRead + AsyncWrite + Unpin,
{
    loop {
        let frame = tokio::select! {
            _ = cancel.cancelled() => return,
            frame = stream.next() => frame,
        };
        match frame {
            Some(Ok(Message::Text(text))) => apply_frame(&bridge, text.as_bytes()),
            Some(Ok(Message::Binary(bytes))) => apply_frame(&bridge, &bytes),
            Some(Ok(Message::Close(_))) | None => {
                tracing::debug!("client closed");
                break;
            }
            Some(Ok(_)) => {}
            Some(Err(e)) => {
                tracing::debug!(error = %e, "read failed");
                break;
            }
        }
    }
    cancel.cancel();
}

fn apply_frame(bridge: &Bridge, frame: &[u8]) {
    match decode_control(frame) {
        Ok(update) if update.is_empty() => {}
        Ok(update) => {
            bridge.apply_control(&update);
        }
        Err(e) => tracing::debug!(error = %e, "ignoring malformed control message"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::DuplexStream;
    use tungstenite::protocol::Role;

    async fn socket_pair(buffer: usize) -> (WebSocketStream<DuplexStream>, WebSocketStream<DuplexStream>) {
        let (server, client) = tokio::io::duplex(buffer);
        let server = WebSocketStream::from_raw_socket(server, Role::Server, None).await;
        let client = WebSocketStream::from_raw_socket(client, Role::Client, None).await;
        (server, client)
    }

    #[tokio::test]
    async fn outbound_streams_after_catalog_and_closes_once() {
        let (server, mut client) = socket_pair(64 * 1024).await;
        let (sink, _stream) = server.split();
        let mut out = Outbound::new(sink);
        assert_eq!(out.state, SessionState::Open);

        out.send(&SeriesCatalog::new().metadata()).await.expect("catalog");
        assert_eq!(out.state, SessionState::Streaming);
        assert_eq!(out.sent, 1);

        out.close().await;
        assert_eq!(out.state, SessionState::Closed);
        out.close().await;
        assert!(matches!(
            out.send(&ServerMessage::map(0, Vec::new())).await,
            Err(SessionError::Closed)
        ));

        let first = client.next().await.expect("frame").expect("ok");
        assert!(first.is_text());
        let second = client.next().await.expect("frame").expect("ok");
        assert!(second.is_close());
    }

    #[tokio::test(start_paused = true)]
    async fn undrained_client_hits_the_write_deadline() {
        // the peer never reads, so the pipe fills and a write stalls
        let (server, _client) = socket_pair(256).await;
        let (sink, _stream) = server.split();
        let mut out = Outbound::new(sink);

        let big = ServerMessage::map(1, vec![0.5; 4096]);
        let err = out.send(&big).await.expect_err("stalled write");
        assert!(matches!(err, SessionError::WriteTimeout(d) if d == WRITE_TIMEOUT));
        assert_eq!(out.state, SessionState::Closed);

        // teardown does not wait on the stalled sink again
        out.close().await;
        assert!(matches!(out.send(&big).await, Err(SessionError::Closed)));
    }

    #[test]
    fn catalog_starts_with_fixed_series() {
        let catalog = SeriesCatalog::new();
        assert_eq!(catalog.len(), FIXED_SERIES.len());
        for name in FIXED_SERIES {
            assert!(catalog.contains(name));
        }
        assert_eq!(
            catalog.metadata(),
            ServerMessage::Metadata {
                available_series: vec![
                    "exposure".into(),
                    "fire_enabled".into(),
                    "pid_d".into(),
                    "pid_i".into(),
                    "pid_p".into(),
                ],
            }
        );
    }

    #[test]
    fn observe_reports_only_growth() {
        let mut catalog = SeriesCatalog::new();
        assert!(!catalog.observe(["pid_p", "exposure"]));
        assert!(catalog.observe(["pid_p", "temp"]));
        assert!(!catalog.observe(["temp"]));
        assert!(catalog.contains("temp"));
        assert_eq!(catalog.len(), FIXED_SERIES.len() + 1);
    }

    #[test]
    fn catalog_never_shrinks() {
        let mut catalog = SeriesCatalog::new();
        catalog.observe(["a", "b"]);
        assert!(!catalog.observe(std::iter::empty()));
        assert!(catalog.contains("a") && catalog.contains("b"));
        match catalog.metadata() {
            ServerMessage::Metadata { available_series } => {
                let mut sorted = available_series.clone();
                sorted.sort();
                assert_eq!(available_series, sorted);
                assert_eq!(available_series.len(), FIXED_SERIES.len() + 2);
            }
            other => panic!("expected metadata, got {other:?}"),
        }
    }
}
