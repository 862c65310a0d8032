//! Fan-out helpers on top of the hub registry.
//!
//! Every operation takes the read lock for the duration of the traversal and
//! only performs non-blocking [`Client::send`] calls under it. The returned
//! count is the number of clients the message was enqueued for, not a
//! delivery guarantee. Relative order between a direct send and a broadcast
//! reaching the same client is undefined.

use std::collections::HashSet;
use std::sync::Arc;

use serde::Serialize;
use tracing::debug;

use super::engine::{COMPONENT, Hub};
use crate::client::Client;
use crate::utils::error::Result;

impl Hub {
    /// Enqueues `message` on every connection of `user_id`.
    pub fn send_to_user(&self, user_id: &str, message: &[u8]) -> usize {
        let registry = self.registry.read();
        let Some(clients) = registry.clients.get(user_id) else {
            debug!(component = COMPONENT, user_id = %user_id, "No clients found for user");
            return 0;
        };

        let count = clients.values().filter(|c| c.send(message)).count();
        debug!(
            component = COMPONENT,
            user_id = %user_id,
            client_count = count,
            "Message sent to user"
        );
        count
    }

    pub fn send_to_user_json<T: Serialize + ?Sized>(&self, user_id: &str, value: &T) -> Result<usize> {
        let data = serde_json::to_vec(value)?;
        Ok(self.send_to_user(user_id, &data))
    }

    /// Enqueues `message` once on every client in `group_id`.
    pub fn send_to_group(&self, group_id: &str, message: &[u8]) -> usize {
        self.fan_out_group(group_id, None, message)
    }

    pub fn send_to_group_json<T: Serialize + ?Sized>(&self, group_id: &str, value: &T) -> Result<usize> {
        let data = serde_json::to_vec(value)?;
        Ok(self.send_to_group(group_id, &data))
    }

    /// Like [`Hub::send_to_group`] but skips every client of `excluded_user_id`.
    pub fn send_to_group_except(&self, group_id: &str, excluded_user_id: &str, message: &[u8]) -> usize {
        self.fan_out_group(group_id, Some(excluded_user_id), message)
    }

    pub fn send_to_group_except_json<T: Serialize + ?Sized>(
        &self,
        group_id: &str,
        excluded_user_id: &str,
        value: &T,
    ) -> Result<usize> {
        let data = serde_json::to_vec(value)?;
        Ok(self.send_to_group_except(group_id, excluded_user_id, &data))
    }

    /// Enqueues `message` once on every registered client of `tenant_id`.
    pub fn send_to_tenant(&self, tenant_id: &str, message: &[u8]) -> usize {
        let registry = self.registry.read();
        let mut seen = HashSet::new();
        let count = registry
            .all()
            .filter(|c| c.tenant_id == tenant_id)
            .filter(|c| deliver_once(&mut seen, c, message))
            .count();

        debug!(
            component = COMPONENT,
            tenant_id = %tenant_id,
            client_count = count,
            "Message sent to tenant"
        );
        count
    }

    pub fn send_to_tenant_json<T: Serialize + ?Sized>(&self, tenant_id: &str, value: &T) -> Result<usize> {
        let data = serde_json::to_vec(value)?;
        Ok(self.send_to_tenant(tenant_id, &data))
    }

    /// Enqueues `message` on every registered client.
    pub fn broadcast_all(&self, message: &[u8]) -> usize {
        let registry = self.registry.read();
        registry.all().filter(|c| c.send(message)).count()
    }

    pub fn broadcast_all_json<T: Serialize + ?Sized>(&self, value: &T) -> Result<usize> {
        let data = serde_json::to_vec(value)?;
        Ok(self.broadcast_all(&data))
    }

    fn fan_out_group(&self, group_id: &str, excluded_user_id: Option<&str>, message: &[u8]) -> usize {
        let registry = self.registry.read();
        let Some(users) = registry.groups.get(group_id) else {
            return 0;
        };

        let mut seen = HashSet::new();
        let count = users
            .iter()
            .filter(|(user_id, _)| Some(user_id.as_str()) != excluded_user_id)
            .flat_map(|(_, clients)| clients.values())
            .filter(|c| deliver_once(&mut seen, c, message))
            .count();

        debug!(
            component = COMPONENT,
            group_id = %group_id,
            client_count = count,
            "Message sent to group"
        );
        count
    }
}

/// Sends to `client` unless it was already visited in this fan-out.
fn deliver_once(seen: &mut HashSet<*const Client>, client: &Arc<Client>, message: &[u8]) -> bool {
    seen.insert(Arc::as_ptr(client)) && client.send(message)
}
