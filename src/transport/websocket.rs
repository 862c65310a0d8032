//! WebSocket transport
//!
//! Accepts TCP connections, upgrades them and hands each one to the hub:
//! - the `Origin` header is checked against an [`OriginPolicy`]; a rejected
//!   origin gets a `403 Forbidden` instead of an upgrade
//! - the connecting identity is read from the request query string
//!   (`user_id` required, `tenant_id` and `token` optional); verifying it is
//!   left to whatever sits in front of this server
//! - the upgraded stream becomes a `Client` that is registered, started and
//!   greeted with a `welcome` message
//! - inbound frames are routed through `handle_client_message`

use std::collections::HashSet;
use std::net::SocketAddr;
use std::sync::Arc;

use futures_util::SinkExt;
use tokio::net::{TcpListener, TcpStream};
use tokio_tungstenite::accept_hdr_async_with_config;
use tracing::{error, info, warn};
use tungstenite::handshake::server::{ErrorResponse, Request, Response};
use tungstenite::http::StatusCode;
use tungstenite::http::header::ORIGIN;
use tungstenite::protocol::frame::coding::CloseCode;
use tungstenite::protocol::{CloseFrame, Message as WsMessage, WebSocketConfig};

use crate::client::Client;
use crate::config::HubConfig;
use crate::hub::Hub;
use crate::transport::message::{ServerMessage, handle_client_message};
use crate::utils::error::Result;

/// Who is connecting, as declared in the upgrade request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectParams {
    pub user_id: String,
    pub tenant_id: String,
    pub token: Option<String>,
}

impl ConnectParams {
    /// Parses `user_id`, `tenant_id` and `token` out of a query string.
    pub fn from_query(query: Option<&str>) -> Option<Self> {
        let mut user_id = None;
        let mut tenant_id = String::new();
        let mut token = None;

        for (key, value) in url::form_urlencoded::parse(query?.as_bytes()) {
            match key.as_ref() {
                "user_id" if !value.is_empty() => user_id = Some(value.into_owned()),
                "tenant_id" => tenant_id = value.into_owned(),
                "token" if !value.is_empty() => token = Some(value.into_owned()),
                _ => {}
            }
        }

        Some(Self {
            user_id: user_id?,
            tenant_id,
            token,
        })
    }
}

/// Which browser origins may open a connection.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum OriginPolicy {
    /// Accept every request, with or without an `Origin` header. Meant for
    /// development and non-browser clients.
    #[default]
    AllowAll,
    /// Accept only requests whose `Origin` header is one of these values.
    AllowOrigins(HashSet<String>),
}

impl OriginPolicy {
    /// An empty list allows every origin.
    pub fn from_origins<I, S>(origins: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let origins: HashSet<String> = origins.into_iter().map(Into::into).collect();
        if origins.is_empty() {
            Self::AllowAll
        } else {
            Self::AllowOrigins(origins)
        }
    }

    pub fn allows(&self, origin: Option<&str>) -> bool {
        match self {
            Self::AllowAll => true,
            Self::AllowOrigins(origins) => origin.is_some_and(|o| origins.contains(o)),
        }
    }
}

/// Binds `addr` and serves websocket clients until the listener fails.
pub async fn start_websocket_server(addr: &str, hub: Arc<Hub>, origins: OriginPolicy) -> Result<()> {
    let listener = TcpListener::bind(addr).await?;
    info!("WebSocket server listening on ws://{}", listener.local_addr()?);
    serve(listener, hub, origins).await
}

/// Accept loop over an already bound listener.
pub async fn serve(listener: TcpListener, hub: Arc<Hub>, origins: OriginPolicy) -> Result<()> {
    let origins = Arc::new(origins);
    loop {
        let (stream, peer) = listener.accept().await?;
        tokio::spawn(accept_connection(hub.clone(), origins.clone(), stream, peer));
    }
}

fn ws_config(config: &HubConfig) -> WebSocketConfig {
    WebSocketConfig::default()
        .read_buffer_size(config.read_buffer_size)
        .write_buffer_size(config.write_buffer_size)
        .max_message_size(Some(config.max_message_size))
}

fn forbidden(reason: &str) -> ErrorResponse {
    let mut response = ErrorResponse::new(Some(reason.to_string()));
    *response.status_mut() = StatusCode::FORBIDDEN;
    response
}

async fn accept_connection(hub: Arc<Hub>, origins: Arc<OriginPolicy>, stream: TcpStream, peer: SocketAddr) {
    let mut params = None;
    let callback = |request: &Request, response: Response| {
        let origin = request.headers().get(ORIGIN).and_then(|v| v.to_str().ok());
        if !origins.allows(origin) {
            warn!(peer = %peer, origin = ?origin, "Rejecting connection from disallowed origin");
            return Err(forbidden("origin not allowed"));
        }
        params = ConnectParams::from_query(request.uri().query());
        Ok(response)
    };

    let mut ws = match accept_hdr_async_with_config(stream, callback, Some(ws_config(hub.config()))).await {
        Ok(ws) => ws,
        Err(e) => {
            warn!(peer = %peer, "WebSocket handshake error: {e}");
            return;
        }
    };

    let Some(params) = params else {
        warn!(peer = %peer, "Rejecting connection without user_id");
        let frame = CloseFrame {
            code: CloseCode::Policy,
            reason: "user_id is required".into(),
        };
        let _ = ws.send(WsMessage::Close(Some(frame))).await;
        return;
    };

    let relay = Arc::downgrade(&hub);
    let mut builder = Client::builder(params.user_id, params.tenant_id)
        .metadata("peer_addr", peer.to_string())
        .on_message(move |client, raw| match relay.upgrade() {
            Some(hub) => handle_client_message(&hub, client, &raw),
            None => Ok(()),
        });
    if let Some(token) = params.token {
        builder = builder.token(token);
    }
    let client = builder.build(&hub);

    hub.register(client.clone());
    // make the registration visible before the first inbound frame is handled
    if let Err(e) = hub.flush().await {
        warn!(client_id = %client.id, error = %e, "Hub closed during connection setup");
        return;
    }
    if let Err(e) = client.start_websocket(ws) {
        error!(client_id = %client.id, error = %e, "Failed to start client");
        client.close();
        return;
    }

    let welcome = ServerMessage::Welcome {
        client_id: client.id.clone(),
        user_id: client.user_id.clone(),
    };
    if let Err(e) = client.send_json(&welcome) {
        error!(client_id = %client.id, error = %e, "Failed to greet client");
    }
}
