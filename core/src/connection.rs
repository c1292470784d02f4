//! Connection table: the single owner of every agent transport handle.
//!
//! Jobs never hold a transport handle directly, only the opaque
//! [`ConnectionId`] — [`ConnectionTable`] is the one value that owns the
//! set of live connections, and everything else reaches a connection by
//! id through it.

use std::collections::HashMap;

use tonic::transport::Channel;

use crate::error::{Error, Result};
use crate::event::EventBus;
use crate::job::ConnectionId;
use crate::proto::command_client::CommandClient;

/// One live connection to an agent: its id, its RPC client, and the
/// append-only history log shown in the interactive shell.
pub struct Connection {
    pub id: ConnectionId,
    pub addr: String,
    pub client: CommandClient<Channel>,
    pub history: Vec<String>,
}

impl Connection {
    pub fn push_history(&mut self, line: impl Into<String>) {
        self.history.push(line.into());
    }
}

/// Owns every live connection for one controller process.
pub struct ConnectionTable {
    connections: HashMap<ConnectionId, Connection>,
}

impl ConnectionTable {
    pub fn new() -> Self {
        ConnectionTable {
            connections: HashMap::new(),
        }
    }

    pub async fn connect(&mut self, addr: impl Into<String>) -> Result<ConnectionId> {
        let addr = addr.into();
        let endpoint = format!("http://{addr}");
        let client = CommandClient::connect(endpoint)
            .await
            .map_err(|source| Error::Connect {
                addr: addr.clone(),
                source,
            })?;
        let id = ConnectionId::new();
        self.connections.insert(
            id,
            Connection {
                id,
                addr,
                client,
                history: Vec::new(),
            },
        );
        Ok(id)
    }

    pub fn get(&self, id: ConnectionId) -> Option<&Connection> {
        self.connections.get(&id)
    }

    pub fn get_mut(&mut self, id: ConnectionId) -> Option<&mut Connection> {
        self.connections.get_mut(&id)
    }

    pub fn all(&self) -> impl Iterator<Item = &Connection> {
        self.connections.values()
    }

    pub fn len(&self) -> usize {
        self.connections.len()
    }

    pub fn is_empty(&self) -> bool {
        self.connections.is_empty()
    }

    /// Remove the connection and cancel every non-terminal job bound to it.
    /// The job registry is the only holder of each job's cancel handle, so
    /// the actual cancellation happens on the registry's own consumer task
    /// — this only removes the transport and asks the bus to relay the
    /// request. Use [`crate::job::JobRegistry::connection_is_drained`] to
    /// observe when cancellation has fully taken effect.
    pub async fn delete(&mut self, id: ConnectionId, bus: &EventBus) {
        self.connections.remove(&id);
        bus.cancel_connection(id).await;
    }
}

impl Default for ConnectionTable {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_table_has_no_connections() {
        let table = ConnectionTable::new();
        assert!(table.is_empty());
        assert_eq!(table.all().count(), 0);
    }
}
