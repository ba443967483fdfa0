//! WebSocket listener.
//!
//! Every accepted connection gets its own task and its own session. The
//! upgrade is refused with 403 when the request's `Origin` is not on the
//! allow-list.

use crate::bridge::Bridge;
use crate::session::run_session;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinSet;
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;
use tracing::Instrument;
use tungstenite::handshake::server::{ErrorResponse, Request, Response};
use tungstenite::http::StatusCode;
use tungstenite::http::header::ORIGIN;

pub const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(5);
const ACCEPT_BACKOFF: Duration = Duration::from_millis(100);

/// Which browser origins may open a session.
///
/// Only browser requests are policed. A request without an `Origin` header
/// is admitted rather than refused, so command-line clients connect without
/// forging one. An empty list admits every origin.
#[derive(Debug, Clone, Default)]
pub struct OriginPolicy {
    allowed: Vec<String>,
}

impl OriginPolicy {
    pub fn new(allowed: Vec<String>) -> Self {
        Self { allowed }
    }

    pub fn allow_all() -> Self {
        Self::default()
    }

    pub fn permits(&self, origin: Option<&str>) -> bool {
        match origin {
            None => true,
            Some(_) if self.allowed.is_empty() => true,
            Some(origin) => self.allowed.iter().any(|a| a == origin),
        }
    }
}

/// Accept connections until `shutdown` fires, then wait for every session to end.
pub async fn serve(
    listener: TcpListener,
    bridge: Arc<Bridge>,
    policy: Arc<OriginPolicy>,
    shutdown: CancellationToken,
) {
    let mut sessions = JoinSet::new();
    loop {
        let (stream, peer) = tokio::select! {
            _ = shutdown.cancelled() => break,
            accepted = listener.accept() => match accepted {
                Ok(pair) => pair,
                Err(e) => {
                    tracing::warn!(error = %e, "accept failed");
                    tokio::time::sleep(ACCEPT_BACKOFF).await;
                    continue;
                }
            },
        };

        let span = tracing::info_span!("session", %peer);
        sessions.spawn(
            handle_connection(
                stream,
                peer,
                bridge.clone(),
                policy.clone(),
                shutdown.child_token(),
            )
            .instrument(span),
        );
        while sessions.try_join_next().is_some() {}
    }

    tracing::info!(open = sessions.len(), "listener stopped, draining sessions");
    while sessions.join_next().await.is_some() {}
}

async fn handle_connection(
    stream: TcpStream,
    peer: SocketAddr,
    bridge: Arc<Bridge>,
    policy: Arc<OriginPolicy>,
    cancel: CancellationToken,
) {
    let _ = stream.set_nodelay(true);

    let check_origin = |request: &Request, response: Response| -> Result<Response, ErrorResponse> {
        let origin = request
            .headers()
            .get(ORIGIN)
            .and_then(|value| value.to_str().ok());
        if policy.permits(origin) {
            Ok(response)
        } else {
            tracing::info!(origin = origin.unwrap_or_default(), "origin rejected");
            Err(forbidden())
        }
    };

    let ws = match timeout(
        HANDSHAKE_TIMEOUT,
        tokio_tungstenite::accept_hdr_async(stream, check_origin),
    )
    .await
    {
        Ok(Ok(ws)) => ws,
        Ok(Err(e)) => {
            tracing::debug!(error = %e, "handshake failed");
            return;
        }
        Err(_) => {
            tracing::debug!("handshake timed out");
            return;
        }
    };

    tracing::info!(%peer, "session opened");
    match run_session(ws, bridge, cancel).await {
        Ok(()) => tracing::info!("session closed"),
        Err(e) => tracing::info!(error = %e, "session dropped"),
    }
}

fn forbidden() -> ErrorResponse {
    let mut response = ErrorResponse::new(Some("origin not allowed".to_string()));
    *response.status_mut() = StatusCode::FORBIDDEN;
    response
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_allow_list_admits_everyone() {
        let policy = OriginPolicy::allow_all();
        assert!(policy.permits(Some("http://anywhere.example")));
        assert!(policy.permits(None));
    }

    #[test]
    fn allow_list_is_exact_match() {
        let policy = OriginPolicy::new(vec!["http://localhost:3000".into()]);
        assert!(policy.permits(Some("http://localhost:3000")));
        assert!(!policy.permits(Some("http://localhost:3001")));
        assert!(!policy.permits(Some("http://localhost:3000/")));
        assert!(policy.permits(None));
    }

    #[test]
    fn forbidden_response_is_403() {
        assert_eq!(forbidden().status(), StatusCode::FORBIDDEN);
    }
}
