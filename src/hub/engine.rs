//! Hub engine
//!
//! The hub is the one place that knows about more than one connection:
//! - tracking every live client by user and by group
//! - serializing registration and unregistration through a single event loop
//! - answering membership queries with independent snapshots
//!
//! Concurrency and usage notes:
//! - Create one hub per process with [`Hub::new`] and share the returned
//!   `Arc` with everything that needs it. Spawn [`Hub::run`] once.
//! - Register/unregister events and the direct mutators (group membership,
//!   `disconnect_user`) all mutate the registry under the same write lock,
//!   so a query never observes a half-applied change.
//! - Nothing awaits while the lock is held; fan-out under the read lock only
//!   performs non-blocking enqueues.

use std::fmt;
use std::ops::ControlFlow;
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info, warn};

use super::registry::Registry;
use crate::client::Client;
use crate::config::HubConfig;
use crate::utils::error::{HubError, Result};

pub(crate) const COMPONENT: &str = "ws-hub";

/// Work item consumed by [`Hub::run`].
#[derive(Debug)]
pub enum HubEvent {
    Register(Arc<Client>),
    Unregister(Arc<Client>),
    /// Answered once every earlier event has been applied.
    Flush(oneshot::Sender<()>),
    /// Close every client and stop the loop.
    Shutdown,
}

pub struct Hub {
    pub(crate) registry: RwLock<Registry>,
    events: mpsc::UnboundedSender<HubEvent>,
    inbox: Mutex<Option<mpsc::UnboundedReceiver<HubEvent>>>,
    config: HubConfig,
}

impl fmt::Debug for Hub {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let registry = self.registry.read();
        f.debug_struct("Hub")
            .field("users", &registry.clients.len())
            .field("groups", &registry.groups.len())
            .finish()
    }
}

impl Hub {
    /// Creates a hub after validating `config`.
    ///
    /// Register events are queued until [`Hub::run`] starts consuming them.
    pub fn new(config: HubConfig) -> Result<Arc<Self>> {
        config.validate()?;
        let (events, inbox) = mpsc::unbounded_channel();

        Ok(Arc::new(Self {
            registry: RwLock::new(Registry::default()),
            events,
            inbox: Mutex::new(Some(inbox)),
            config,
        }))
    }

    pub fn config(&self) -> &HubConfig {
        &self.config
    }

    /// Queues `client` for registration. Never blocks.
    ///
    /// If the hub has already shut down the client is closed instead.
    pub fn register(&self, client: Arc<Client>) {
        if let Err(mpsc::error::SendError(HubEvent::Register(client))) =
            self.events.send(HubEvent::Register(client))
        {
            warn!(
                component = COMPONENT,
                client_id = %client.id,
                user_id = %client.user_id,
                "Hub is closed, rejecting client"
            );
            client.close();
        }
    }

    /// Queues `client` for removal from the registry and every group.
    pub fn unregister(&self, client: &Arc<Client>) {
        if self
            .events
            .send(HubEvent::Unregister(Arc::clone(client)))
            .is_err()
        {
            // loop is gone and the registry was cleared on shutdown
            client.close();
        }
    }

    /// Resolves once every event submitted before this call has been applied.
    pub async fn flush(&self) -> Result<()> {
        let (tx, rx) = oneshot::channel();
        self.events
            .send(HubEvent::Flush(tx))
            .map_err(|_| HubError::HubClosed)?;
        rx.await.map_err(|_| HubError::HubClosed)
    }

    /// Asks the event loop to close every client and stop.
    pub fn shutdown(&self) {
        let _ = self.events.send(HubEvent::Shutdown);
    }

    /// Consumes register/unregister events one at a time until
    /// [`Hub::shutdown`] is requested.
    ///
    /// Only one loop may run per hub.
    pub async fn run(&self) -> Result<()> {
        let mut inbox = self.inbox.lock().take().ok_or(HubError::AlreadyRunning)?;
        info!(component = COMPONENT, "Hub event loop started");

        while let Some(event) = inbox.recv().await {
            if self.apply(event).is_break() {
                break;
            }
        }

        // nothing queued behind the shutdown will ever be applied
        inbox.close();
        while let Ok(event) = inbox.try_recv() {
            if let HubEvent::Register(client) = event {
                client.close();
            }
        }

        info!(component = COMPONENT, "Hub event loop stopped");
        Ok(())
    }

    fn apply(&self, event: HubEvent) -> ControlFlow<()> {
        match event {
            HubEvent::Register(client) => self.register_client(client),
            HubEvent::Unregister(client) => self.unregister_client(&client),
            HubEvent::Flush(done) => {
                let _ = done.send(());
            }
            HubEvent::Shutdown => {
                let clients = self.registry.write().clear();
                for client in &clients {
                    client.close();
                }
                info!(
                    component = COMPONENT,
                    count = clients.len(),
                    "Hub shut down, all clients closed"
                );
                return ControlFlow::Break(());
            }
        }
        ControlFlow::Continue(())
    }

    fn register_client(&self, client: Arc<Client>) {
        let mut registry = self.registry.write();

        // a client that died before its registration was applied has
        // already sent (or will never send) its unregister event
        if client.is_closed() {
            debug!(
                component = COMPONENT,
                client_id = %client.id,
                "Skipping registration of closed client"
            );
            return;
        }

        if let Some(previous) = registry.insert(Arc::clone(&client)) {
            if !Arc::ptr_eq(&previous, &client) {
                warn!(
                    component = COMPONENT,
                    client_id = %client.id,
                    user_id = %client.user_id,
                    "Client id reused, closing previous connection"
                );
                previous.close();
            }
        }

        info!(
            component = COMPONENT,
            client_id = %client.id,
            user_id = %client.user_id,
            tenant_id = %client.tenant_id,
            "Client registered"
        );
    }

    fn unregister_client(&self, client: &Arc<Client>) {
        let removed = {
            let mut registry = self.registry.write();
            let removed = registry.remove(client);
            client.close();
            removed
        };

        if removed {
            info!(
                component = COMPONENT,
                client_id = %client.id,
                user_id = %client.user_id,
                tenant_id = %client.tenant_id,
                "Client unregistered"
            );
        }
    }

    /// Adds `client` to `group_id`, creating the group on first use.
    ///
    /// Returns `false` for a client that is closed or not registered (yet),
    /// so a group only ever holds clients present in the registry. Callers
    /// that just called [`Hub::register`] should [`Hub::flush`] first.
    pub fn join_group(&self, group_id: &str, client: &Arc<Client>) -> bool {
        {
            let mut registry = self.registry.write();
            if client.is_closed() || !registry.contains(client) {
                debug!(
                    component = COMPONENT,
                    client_id = %client.id,
                    group_id = %group_id,
                    "Refusing group join of unregistered client"
                );
                return false;
            }
            registry.join(group_id, Arc::clone(client));
        }

        debug!(
            component = COMPONENT,
            client_id = %client.id,
            user_id = %client.user_id,
            group_id = %group_id,
            "Client joined group"
        );
        true
    }

    /// Removes `client` from `group_id`; empty groups are dropped.
    pub fn leave_group(&self, group_id: &str, client: &Client) -> bool {
        let removed = self.registry.write().leave(group_id, client);

        debug!(
            component = COMPONENT,
            client_id = %client.id,
            user_id = %client.user_id,
            group_id = %group_id,
            "Client left group"
        );
        removed
    }

    pub fn get_client(&self, user_id: &str, client_id: &str) -> Option<Arc<Client>> {
        self.registry
            .read()
            .clients
            .get(user_id)
            .and_then(|clients| clients.get(client_id))
            .cloned()
    }

    pub fn get_user_clients(&self, user_id: &str) -> Vec<Arc<Client>> {
        self.registry
            .read()
            .clients
            .get(user_id)
            .map(|clients| clients.values().cloned().collect())
            .unwrap_or_default()
    }

    pub fn get_group_clients(&self, group_id: &str) -> Vec<Arc<Client>> {
        self.registry
            .read()
            .groups
            .get(group_id)
            .map(|users| users.values().flat_map(|c| c.values().cloned()).collect())
            .unwrap_or_default()
    }

    pub fn get_group_user_ids(&self, group_id: &str) -> Vec<String> {
        self.registry
            .read()
            .groups
            .get(group_id)
            .map(|users| users.keys().cloned().collect())
            .unwrap_or_default()
    }

    pub fn is_group_member(&self, group_id: &str, client: &Client) -> bool {
        self.registry.read().is_member(group_id, client)
    }

    pub fn has_active_connection(&self, user_id: &str) -> bool {
        self.registry
            .read()
            .clients
            .get(user_id)
            .is_some_and(|clients| !clients.is_empty())
    }

    /// Users with at least one connection, optionally limited to one tenant.
    pub fn get_connected_user_ids(&self, tenant_id: Option<&str>) -> Vec<String> {
        self.registry
            .read()
            .clients
            .iter()
            .filter(|(_, clients)| match tenant_id {
                Some(tenant) => clients.values().any(|c| c.tenant_id == tenant),
                None => true,
            })
            .map(|(user_id, _)| user_id.clone())
            .collect()
    }

    pub fn client_count(&self) -> usize {
        self.registry.read().all().count()
    }

    pub fn user_count(&self) -> usize {
        self.registry.read().clients.len()
    }

    pub fn group_count(&self) -> usize {
        self.registry.read().groups.len()
    }

    /// Closes every connection of `user_id` and drops the user from all
    /// groups. Returns the number of connections that were told to close.
    pub fn disconnect_user(&self, user_id: &str) -> usize {
        let closed = {
            let mut registry = self.registry.write();
            match registry.remove_user(user_id) {
                Some(clients) => {
                    for client in clients.values() {
                        client.close();
                    }
                    clients.len()
                }
                None => 0,
            }
        };

        info!(
            component = COMPONENT,
            user_id = %user_id,
            count = closed,
            "Disconnected all clients for user"
        );
        closed
    }
}
