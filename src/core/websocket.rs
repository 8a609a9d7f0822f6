/// WebSocket transport: session admission at upgrade time, then one reader and
/// one writer task per connection.
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use futures_util::stream::SplitSink;
use futures_util::{SinkExt, StreamExt};
use tokio::net::{TcpListener, TcpStream};
use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};
use tokio_tungstenite::tungstenite::http::header::{COOKIE, SET_COOKIE};
use tokio_tungstenite::tungstenite::http::{HeaderValue, StatusCode};
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode as WireCloseCode;
use tokio_tungstenite::tungstenite::protocol::{CloseFrame, Message};
use tokio_tungstenite::{accept_hdr_async, WebSocketStream};
use tracing::{debug, info, warn};

use crate::config::ServerConfig;
use crate::core::connection::{CloseCode, Connection, Outlet};
use crate::core::router::Router;
use crate::core::session::{session_from_cookies, set_cookie_header, SessionId};
use crate::error::SessionError;

type WsSink = SplitSink<WebSocketStream<TcpStream>, Message>;

/// Session resolved during the handshake.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Admission {
    pub session: SessionId,
    /// Present when the session was minted for this request.
    pub set_cookie: Option<String>,
}

/// Decide which session an upgrade belongs to.
pub fn admit(cookie_header: Option<&str>, config: &ServerConfig) -> Result<Admission, SessionError> {
    match session_from_cookies(cookie_header, &config.cookie_name) {
        Ok(session) => Ok(Admission {
            session,
            set_cookie: None,
        }),
        Err(SessionError::Missing) if config.issue_sessions => {
            let session = SessionId::generate();
            let set_cookie = set_cookie_header(&config.cookie_name, &session);
            Ok(Admission {
                session,
                set_cookie: Some(set_cookie),
            })
        }
        Err(err) => Err(err),
    }
}

pub struct WebSocketServer {
    listener: TcpListener,
    config: Arc<ServerConfig>,
    router: Router,
}

impl WebSocketServer {
    pub async fn bind(config: ServerConfig, router: Router) -> Result<Self> {
        let addr = config.bind_addr();
        let listener = TcpListener::bind(&addr)
            .await
            .with_context(|| format!("failed to bind {addr}"))?;
        Ok(Self {
            listener,
            config: Arc::new(config),
            router,
        })
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    /// Accept connections until the task is dropped.
    pub async fn run(self) -> Result<()> {
        info!(
            addr = %self.local_addr()?,
            path = %self.config.ws_path,
            "websocket server listening"
        );
        loop {
            let (stream, peer) = match self.listener.accept().await {
                Ok(accepted) => accepted,
                Err(err) => {
                    warn!(error = %err, "accept failed");
                    tokio::time::sleep(Duration::from_millis(100)).await;
                    continue;
                }
            };
            if let Err(err) = stream.set_nodelay(true) {
                debug!(%peer, error = %err, "could not disable nagle");
            }
            tokio::spawn(serve(stream, peer, self.config.clone(), self.router.clone()));
        }
    }
}

async fn serve(stream: TcpStream, peer: SocketAddr, config: Arc<ServerConfig>, router: Router) {
    let mut admission = None;
    let callback = |request: &Request, mut response: Response| {
        if request.uri().path() != config.ws_path {
            let mut refusal = ErrorResponse::new(Some("not found".into()));
            *refusal.status_mut() = StatusCode::NOT_FOUND;
            return Err(refusal);
        }
        let cookies: Vec<&str> = request
            .headers()
            .get_all(COOKIE)
            .iter()
            .filter_map(|value| value.to_str().ok())
            .collect();
        let cookies = (!cookies.is_empty()).then(|| cookies.join("; "));
        let outcome = admit(cookies.as_deref(), &config);
        if let Ok(Admission {
            set_cookie: Some(cookie),
            ..
        }) = &outcome
        {
            if let Ok(value) = HeaderValue::from_str(cookie) {
                response.headers_mut().append(SET_COOKIE, value);
            }
        }
        admission = Some(outcome);
        Ok(response)
    };

    let ws = match accept_hdr_async(stream, callback).await {
        Ok(ws) => ws,
        Err(err) => {
            debug!(%peer, error = %err, "websocket handshake failed");
            return;
        }
    };
    let (mut sink, mut source) = ws.split();

    let session = match admission {
        Some(Ok(admission)) => admission.session,
        Some(Err(err)) => {
            warn!(%peer, error = %err, "rejecting connection");
            let _ = sink.send(close_message(CloseCode::Policy, "No session")).await;
            return;
        }
        None => return,
    };

    let (connection, outlet) = Connection::open(session, config.queue_depth);
    let shutdown = outlet.shutdown.clone();
    router.on_join(&connection);
    info!(%peer, session = %connection.session(), connection = connection.id(), "connection opened");

    let writer = tokio::spawn(write_loop(
        sink,
        outlet,
        connection.clone(),
        config.ping_interval,
    ));

    loop {
        tokio::select! {
            _ = shutdown.cancelled() => break,
            message = source.next() => match message {
                Some(Ok(Message::Text(text))) => router.handle_text(connection.session(), &text),
                Some(Ok(Message::Close(_))) | None => break,
                Some(Ok(_)) => {}
                Some(Err(err)) => {
                    debug!(connection = connection.id(), error = %err, "read failed");
                    break;
                }
            }
        }
    }

    router.on_leave(&connection);
    connection.close(CloseCode::Normal);
    let _ = writer.await;
    info!(%peer, session = %connection.session(), connection = connection.id(), "connection closed");
}

async fn write_loop(
    mut sink: WsSink,
    mut outlet: Outlet,
    connection: Arc<Connection>,
    ping_every: Duration,
) {
    let mut ping = tokio::time::interval(ping_every);
    ping.tick().await;
    loop {
        tokio::select! {
            biased;
            _ = outlet.shutdown.cancelled() => break,
            frame = outlet.frames.recv() => {
                let Some(frame) = frame else { break };
                if let Err(err) = sink.send(Message::Text(frame.to_string())).await {
                    debug!(connection = connection.id(), error = %err, "write failed");
                    connection.close(CloseCode::Protocol);
                    return;
                }
            }
            _ = ping.tick() => {
                if sink.send(Message::Ping(Vec::new())).await.is_err() {
                    connection.close(CloseCode::Protocol);
                    return;
                }
            }
        }
    }
    let code = connection.close_code().unwrap_or(CloseCode::Normal);
    let _ = sink.send(close_message(code, "")).await;
    let _ = sink.close().await;
}

fn close_message(code: CloseCode, reason: &'static str) -> Message {
    let code = match code {
        CloseCode::Normal => WireCloseCode::Normal,
        CloseCode::Protocol => WireCloseCode::Protocol,
        CloseCode::Policy => WireCloseCode::Policy,
    };
    Message::Close(Some(CloseFrame {
        code,
        reason: reason.into(),
    }))
}
