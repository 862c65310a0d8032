use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Weak};

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::Serialize;
use serde_json::Value;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::config::HubConfig;
use crate::hub::Hub;
use crate::utils::error::Result;

pub(crate) const COMPONENT: &str = "ws-client";

/// Unique connection identifier
pub type ClientId = String;

/// Invoked for every text or binary frame read from the peer.
pub type MessageHandler = Arc<dyn Fn(&Arc<Client>, Vec<u8>) -> anyhow::Result<()> + Send + Sync>;

/// Invoked exactly once when the read loop of a client terminates.
pub type DisconnectHandler = Arc<dyn Fn(&Arc<Client>) -> anyhow::Result<()> + Send + Sync>;

/// Lifecycle of a client. Transitions only move forward.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClientState {
    Open,
    /// `close` was requested; the write loop is still flushing the close frame.
    Closing,
    Closed,
}

pub(crate) struct Outbound {
    /// `None` once the client is closed; dropping it closes the queue.
    sender: Option<mpsc::Sender<Vec<u8>>>,
    state: ClientState,
    started: bool,
}

/// One live connection registered with a [`Hub`].
///
/// Outbound delivery goes through a bounded queue drained by the write loop,
/// so [`Client::send`] never waits on a slow peer: it either enqueues or
/// fails immediately.
pub struct Client {
    pub id: ClientId,
    pub user_id: String,
    pub tenant_id: String,
    /// Credential the connection was accepted with, kept for application calls.
    pub token: Option<String>,
    pub connected_at: DateTime<Utc>,
    metadata: Mutex<HashMap<String, Value>>,
    pub(crate) outbound: Mutex<Outbound>,
    pub(crate) queue: Mutex<Option<mpsc::Receiver<Vec<u8>>>>,
    pub(crate) hub: Weak<Hub>,
    pub(crate) config: HubConfig,
    pub(crate) shutdown: CancellationToken,
    pub(crate) on_message: Option<MessageHandler>,
    pub(crate) on_disconnect: Option<DisconnectHandler>,
}

impl fmt::Debug for Client {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Client")
            .field("id", &self.id)
            .field("user_id", &self.user_id)
            .field("tenant_id", &self.tenant_id)
            .field("state", &self.state())
            .finish()
    }
}

impl Client {
    /// Starts building a client owned by `user_id` within `tenant_id`.
    pub fn builder(user_id: impl Into<String>, tenant_id: impl Into<String>) -> ClientBuilder {
        ClientBuilder {
            id: None,
            user_id: user_id.into(),
            tenant_id: tenant_id.into(),
            token: None,
            metadata: HashMap::new(),
            on_message: None,
            on_disconnect: None,
        }
    }

    /// Enqueues `message` for the write loop.
    ///
    /// Returns `false` without blocking when the client is closed or its
    /// queue is full. A full queue drops the new message; queued ones stay.
    pub fn send(&self, message: impl Into<Vec<u8>>) -> bool {
        let outbound = self.outbound.lock();
        let Some(sender) = outbound.sender.as_ref() else {
            return false;
        };

        match sender.try_send(message.into()) {
            Ok(()) => true,
            Err(TrySendError::Full(_)) => {
                warn!(
                    component = COMPONENT,
                    client_id = %self.id,
                    user_id = %self.user_id,
                    tenant_id = %self.tenant_id,
                    "Client send buffer full, dropping message"
                );
                false
            }
            // write loop is gone; close() will follow from it
            Err(TrySendError::Closed(_)) => false,
        }
    }

    /// Serializes `value` as JSON and enqueues it.
    ///
    /// Serialization errors are returned before anything is enqueued; the
    /// boolean is the result of [`Client::send`].
    pub fn send_json<T: Serialize + ?Sized>(&self, value: &T) -> Result<bool> {
        let data = serde_json::to_vec(value)?;
        Ok(self.send(data))
    }

    pub fn get_metadata(&self, key: &str) -> Option<Value> {
        self.metadata.lock().get(key).cloned()
    }

    pub fn set_metadata(&self, key: impl Into<String>, value: impl Into<Value>) {
        self.metadata.lock().insert(key.into(), value.into());
    }

    /// Closes the outbound queue, stops both loops and asks the hub to drop
    /// this client from the registry and every group.
    ///
    /// Idempotent: only the first call has any effect. The write loop sends a
    /// close frame and shuts the connection down once it sees the queue end.
    pub fn close(self: &Arc<Self>) {
        {
            let mut outbound = self.outbound.lock();
            if outbound.state != ClientState::Open {
                return;
            }
            outbound.sender = None;
            outbound.state = if outbound.started {
                ClientState::Closing
            } else {
                ClientState::Closed
            };
        }
        self.shutdown.cancel();
        if let Some(hub) = self.hub.upgrade() {
            hub.unregister(self);
        }

        debug!(
            component = COMPONENT,
            client_id = %self.id,
            user_id = %self.user_id,
            "Client closed"
        );
    }

    pub fn state(&self) -> ClientState {
        self.outbound.lock().state
    }

    pub fn is_closed(&self) -> bool {
        self.state() != ClientState::Open
    }

    /// Number of messages waiting in the outbound queue.
    pub fn pending(&self) -> usize {
        self.outbound
            .lock()
            .sender
            .as_ref()
            .map(|s| s.max_capacity() - s.capacity())
            .unwrap_or(0)
    }

    pub(crate) fn mark_started(&self) {
        self.outbound.lock().started = true;
    }

    pub(crate) fn mark_closed(&self) {
        self.outbound.lock().state = ClientState::Closed;
    }

    /// Hands the outbound queue to its consumer. Only the first call gets it.
    pub(crate) fn take_queue(&self) -> Option<mpsc::Receiver<Vec<u8>>> {
        self.queue.lock().take()
    }
}

/// Builder returned by [`Client::builder`].
pub struct ClientBuilder {
    id: Option<ClientId>,
    user_id: String,
    tenant_id: String,
    token: Option<String>,
    metadata: HashMap<String, Value>,
    on_message: Option<MessageHandler>,
    on_disconnect: Option<DisconnectHandler>,
}

impl ClientBuilder {
    /// Overrides the generated `client-<uuid>` identifier.
    pub fn id(mut self, id: impl Into<ClientId>) -> Self {
        self.id = Some(id.into());
        self
    }

    pub fn token(mut self, token: impl Into<String>) -> Self {
        self.token = Some(token.into());
        self
    }

    pub fn metadata(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    pub fn on_message<F>(mut self, handler: F) -> Self
    where
        F: Fn(&Arc<Client>, Vec<u8>) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        self.on_message = Some(Arc::new(handler));
        self
    }

    pub fn on_disconnect<F>(mut self, handler: F) -> Self
    where
        F: Fn(&Arc<Client>) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        self.on_disconnect = Some(Arc::new(handler));
        self
    }

    /// Creates the client with the hub's configuration.
    ///
    /// The client only keeps a weak reference to `hub`; it is not registered
    /// until [`Hub::register`] is called.
    pub fn build(self, hub: &Arc<Hub>) -> Arc<Client> {
        let config = hub.config().clone();
        let (tx, rx) = mpsc::channel(config.send_buffer_size);

        Arc::new(Client {
            id: self
                .id
                .unwrap_or_else(|| format!("client-{}", uuid::Uuid::new_v4())),
            user_id: self.user_id,
            tenant_id: self.tenant_id,
            token: self.token,
            connected_at: Utc::now(),
            metadata: Mutex::new(self.metadata),
            outbound: Mutex::new(Outbound {
                sender: Some(tx),
                state: ClientState::Open,
                started: false,
            }),
            queue: Mutex::new(Some(rx)),
            hub: Arc::downgrade(hub),
            config,
            shutdown: CancellationToken::new(),
            on_message: self.on_message,
            on_disconnect: self.on_disconnect,
        })
    }
}
