use std::collections::HashMap;
use std::sync::Arc;

use crate::client::{Client, ClientId};

pub type UserId = String;
pub type GroupId = String;

/// Clients of one user, keyed by client id.
pub type UserClients = HashMap<ClientId, Arc<Client>>;

/// The two indexes guarded by the hub lock.
///
/// `clients` owns every live client exactly once. `groups` only refers back
/// to clients that also appear in `clients`; dropping an entry there never
/// closes anything. Empty buckets are removed eagerly in both maps.
#[derive(Debug, Default)]
pub struct Registry {
    pub clients: HashMap<UserId, UserClients>,
    pub groups: HashMap<GroupId, HashMap<UserId, UserClients>>,
}

impl Registry {
    /// Inserts `client`, returning the entry it replaced, if any.
    pub fn insert(&mut self, client: Arc<Client>) -> Option<Arc<Client>> {
        self.clients
            .entry(client.user_id.clone())
            .or_default()
            .insert(client.id.clone(), client)
    }

    /// Removes `client` from `clients` and from every group.
    ///
    /// Returns whether it was present in `clients`.
    pub fn remove(&mut self, client: &Client) -> bool {
        let removed = remove_from(&mut self.clients, client);

        self.groups.retain(|_, users| {
            remove_from(users, client);
            !users.is_empty()
        });

        removed
    }

    /// Removes a user's bucket and the user from every group.
    pub fn remove_user(&mut self, user_id: &str) -> Option<UserClients> {
        let clients = self.clients.remove(user_id);
        self.groups.retain(|_, users| {
            users.remove(user_id);
            !users.is_empty()
        });
        clients
    }

    pub fn join(&mut self, group_id: &str, client: Arc<Client>) {
        self.groups
            .entry(group_id.to_string())
            .or_default()
            .entry(client.user_id.clone())
            .or_default()
            .insert(client.id.clone(), client);
    }

    /// Returns whether the client was a member of the group.
    pub fn leave(&mut self, group_id: &str, client: &Client) -> bool {
        let Some(users) = self.groups.get_mut(group_id) else {
            return false;
        };
        let removed = remove_from(users, client);
        if users.is_empty() {
            self.groups.remove(group_id);
        }
        removed
    }

    pub fn contains(&self, client: &Client) -> bool {
        self.clients
            .get(&client.user_id)
            .and_then(|clients| clients.get(&client.id))
            .is_some_and(|entry| same_client(entry, client))
    }

    pub fn is_member(&self, group_id: &str, client: &Client) -> bool {
        self.groups
            .get(group_id)
            .and_then(|users| users.get(&client.user_id))
            .and_then(|clients| clients.get(&client.id))
            .is_some_and(|entry| same_client(entry, client))
    }

    /// Every registered client, in no particular order.
    pub fn all(&self) -> impl Iterator<Item = &Arc<Client>> {
        self.clients.values().flat_map(|clients| clients.values())
    }

    /// Drains both indexes, yielding the clients that were registered.
    pub fn clear(&mut self) -> Vec<Arc<Client>> {
        self.groups.clear();
        self.clients
            .drain()
            .flat_map(|(_, clients)| clients.into_values())
            .collect()
    }
}

/// Removes `client` from its user's bucket, pruning the bucket when it
/// becomes empty. An entry with the same id but a different identity (a
/// reconnect that reused the id) is left alone.
fn remove_from(map: &mut HashMap<UserId, UserClients>, client: &Client) -> bool {
    let Some(clients) = map.get_mut(&client.user_id) else {
        return false;
    };
    let removed = match clients.get(&client.id) {
        Some(entry) if same_client(entry, client) => clients.remove(&client.id).is_some(),
        _ => false,
    };
    if clients.is_empty() {
        map.remove(&client.user_id);
    }
    removed
}

fn same_client(entry: &Arc<Client>, client: &Client) -> bool {
    std::ptr::eq(Arc::as_ptr(entry), client)
}
