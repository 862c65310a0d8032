use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;

use crate::client::Client;
use crate::hub::Hub;

/// Messages a connected client may send.
#[derive(Debug, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    Join {
        group: String,
    },
    Leave {
        group: String,
    },
    /// Relay to every member of `group`; the sender's own connections only
    /// receive it when `echo` is set.
    Group {
        group: String,
        payload: Value,
        #[serde(default)]
        echo: bool,
    },
    Direct {
        user_id: String,
        payload: Value,
    },
    Tenant {
        payload: Value,
    },
    Broadcast {
        payload: Value,
    },
}

/// Messages the server pushes to clients.
#[derive(Debug, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    Welcome {
        client_id: String,
        user_id: String,
    },
    Joined {
        group: String,
    },
    Left {
        group: String,
    },
    Delivery {
        from: String,
        target: String,
        payload: Value,
    },
    /// How many connections a relayed message was queued for.
    Receipt {
        target: String,
        delivered: usize,
    },
    Error {
        message: String,
    },
}

/// Applies one inbound frame from `client` to the hub.
///
/// Malformed input is answered with an `error` message; only failures to
/// encode a reply are returned.
pub fn handle_client_message(hub: &Hub, client: &Arc<Client>, raw: &[u8]) -> anyhow::Result<()> {
    let msg = match serde_json::from_slice::<ClientMessage>(raw) {
        Ok(msg) => msg,
        Err(e) => {
            debug!(client_id = %client.id, error = %e, "Invalid client message");
            client.send_json(&ServerMessage::Error {
                message: format!("invalid message: {e}"),
            })?;
            return Ok(());
        }
    };

    let reply = match msg {
        ClientMessage::Join { group } => {
            if hub.join_group(&group, client) {
                ServerMessage::Joined { group }
            } else {
                ServerMessage::Error {
                    message: format!("cannot join group {group}"),
                }
            }
        }
        ClientMessage::Leave { group } => {
            hub.leave_group(&group, client);
            ServerMessage::Left { group }
        }
        ClientMessage::Group {
            group,
            payload,
            echo,
        } => {
            if !hub.is_group_member(&group, client) {
                ServerMessage::Error {
                    message: format!("not a member of group {group}"),
                }
            } else {
                let message = delivery(client, format!("group:{group}"), payload);
                let delivered = if echo {
                    hub.send_to_group_json(&group, &message)?
                } else {
                    hub.send_to_group_except_json(&group, &client.user_id, &message)?
                };
                receipt(format!("group:{group}"), delivered)
            }
        }
        ClientMessage::Direct { user_id, payload } => {
            let target = format!("user:{user_id}");
            let delivered = hub.send_to_user_json(&user_id, &delivery(client, target.clone(), payload))?;
            receipt(target, delivered)
        }
        ClientMessage::Tenant { payload } => {
            let target = format!("tenant:{}", client.tenant_id);
            let delivered =
                hub.send_to_tenant_json(&client.tenant_id, &delivery(client, target.clone(), payload))?;
            receipt(target, delivered)
        }
        ClientMessage::Broadcast { payload } => {
            let target = "all".to_string();
            let delivered = hub.broadcast_all_json(&delivery(client, target.clone(), payload))?;
            receipt(target, delivered)
        }
    };

    client.send_json(&reply)?;
    Ok(())
}

fn delivery(from: &Client, target: String, payload: Value) -> ServerMessage {
    ServerMessage::Delivery {
        from: from.user_id.clone(),
        target,
        payload,
    }
}

fn receipt(target: String, delivered: usize) -> ServerMessage {
    ServerMessage::Receipt { target, delivered }
}
