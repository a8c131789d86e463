//! WebSocket transport.
//!
//! `/logs/{projectId}` (or the older `/ws/{projectId}/log`) opens a project
//! subscription. Any other path opens a control session that receives the
//! target snapshot, its session id, every tick record and command replies.

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Context;
use futures::{SinkExt, StreamExt};
use tokio::net::{TcpListener, TcpStream, ToSocketAddrs};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};
use tokio_tungstenite::tungstenite::http::Uri;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::fanout::{Fanout, LiveChannel, SessionChannel, SubscriberId};
use crate::protocol::{handle_message, session_record, snapshot_json};
use crate::registry::JobRegistry;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Route {
    Logs { project_id: String },
    Control { session_id: Option<String> },
}

impl Route {
    pub fn from_uri(uri: &Uri) -> Self {
        let segments: Vec<&str> = uri.path().split('/').filter(|s| !s.is_empty()).collect();

        match segments.as_slice() {
            ["logs", project_id] | ["ws", project_id, "log"] => {
                Route::Logs { project_id: (*project_id).to_string() }
            }
            _ => {
                let session_id = uri.query().and_then(|query| {
                    url::form_urlencoded::parse(query.as_bytes())
                        .find(|(key, _)| key == "sessionId")
                        .map(|(_, value)| value.into_owned())
                        .filter(|value| !value.is_empty())
                });
                Route::Control { session_id }
            }
        }
    }
}

#[derive(Clone)]
struct Shared {
    registry: Arc<JobRegistry>,
    fanout: Arc<Fanout>,
}

pub struct Server {
    listener: TcpListener,
    shared: Shared,
}

impl Server {
    pub async fn bind(
        addr: impl ToSocketAddrs,
        registry: Arc<JobRegistry>,
        fanout: Arc<Fanout>,
    ) -> std::io::Result<Self> {
        let listener = TcpListener::bind(addr).await?;
        Ok(Self { listener, shared: Shared { registry, fanout } })
    }

    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Accept connections until `shutdown` fires. Each connection runs on its own task.
    pub async fn run(self, shutdown: CancellationToken) {
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                accepted = self.listener.accept() => match accepted {
                    Ok((stream, peer)) => {
                        let shared = self.shared.clone();
                        let shutdown = shutdown.clone();
                        tokio::spawn(async move {
                            if let Err(e) = handle_connection(shared, stream, peer, shutdown).await {
                                debug!(%peer, error = %e, "connection ended with error");
                            }
                        });
                    }
                    Err(e) => warn!(error = %e, "failed to accept connection"),
                },
            }
        }
        info!("server stopped accepting connections");
    }
}

async fn handle_connection(
    shared: Shared,
    stream: TcpStream,
    peer: SocketAddr,
    shutdown: CancellationToken,
) -> anyhow::Result<()> {
    let mut uri = None;
    let ws = tokio_tungstenite::accept_hdr_async(stream, |request: &Request, response: Response| -> Result<Response, ErrorResponse> {
        uri = Some(request.uri().clone());
        Ok(response)
    })
    .await
    .context("websocket handshake failed")?;

    let route = uri.as_ref().map(Route::from_uri).unwrap_or(Route::Control { session_id: None });
    let (channel, mut outbound) = SessionChannel::new();
    let channel = Arc::new(channel);

    let registration = match &route {
        Route::Logs { project_id } => {
            let id = shared.fanout.subscribe(project_id, channel.clone())?;
            debug!(%peer, project = %project_id, "log subscription opened");
            Registration::Subscriber(id)
        }
        Route::Control { session_id } => {
            let session_id = session_id.clone().unwrap_or_else(|| Uuid::new_v4().to_string());
            let snapshot = match shared.registry.snapshot_active().await {
                Ok(targets) => snapshot_json(&targets),
                Err(e) => format!("Error: {e}"),
            };
            channel.send_text(snapshot)?;
            channel.send_text(session_record(&session_id))?;
            debug!(%peer, session = %session_id, "control session opened");
            Registration::Watcher(shared.fanout.watch(channel.clone()))
        }
    };

    let (commands, executor) = match &route {
        Route::Control { .. } => {
            let (tx, rx) = mpsc::unbounded_channel();
            (Some(tx), Some(spawn_command_queue(shared.registry.clone(), channel.clone(), rx)))
        }
        Route::Logs { .. } => (None, None),
    };

    let (mut write, mut read) = ws.split();
    let outcome = loop {
        tokio::select! {
            _ = shutdown.cancelled() => break Ok(()),
            outgoing = outbound.recv() => match outgoing {
                Some(text) => {
                    if let Err(e) = write.send(Message::Text(text.into())).await {
                        break Err(e.into());
                    }
                }
                None => break Ok(()),
            },
            incoming = read.next() => match incoming {
                Some(Ok(Message::Text(text))) => match &commands {
                    Some(commands) => {
                        if commands.send(text.as_str().to_owned()).is_err() {
                            break Ok(());
                        }
                    }
                    None => debug!(%peer, "ignoring text on log subscription"),
                },
                Some(Ok(Message::Close(_))) | None => break Ok(()),
                Some(Ok(_)) => {}
                Some(Err(e)) => break Err(e.into()),
            },
        }
    };

    // Commands already queued still run, their replies just have nowhere to go
    drop(commands);
    if let Some(executor) = executor {
        let _ = executor.await;
    }

    match registration {
        Registration::Subscriber(id) => shared.fanout.unsubscribe(id),
        Registration::Watcher(id) => shared.fanout.unwatch(id),
    }
    let _ = write.close().await;
    debug!(%peer, "connection closed");

    outcome
}

/// Runs one session's commands in arrival order. Pause and ping may wait on a
/// full probe, so they run here rather than in the socket loop.
fn spawn_command_queue(
    registry: Arc<JobRegistry>,
    channel: Arc<SessionChannel>,
    mut commands: mpsc::UnboundedReceiver<String>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        while let Some(text) = commands.recv().await {
            let reply = handle_message(&registry, &text).await;
            if channel.send_text(reply).is_err() {
                debug!("session closed before reply");
            }
        }
    })
}

enum Registration {
    Subscriber(SubscriberId),
    Watcher(SubscriberId),
}
