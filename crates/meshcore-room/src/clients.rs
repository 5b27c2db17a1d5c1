//! Authenticated client sessions.
//!
//! Each client that has ever logged in occupies one slot keyed by its node
//! identity. When the store overflows, the least-recently-active non-admin
//! is evicted; admins are never evicted.

use std::sync::RwLock;

use meshcore_crypto::NodeId;

use crate::{Result, RoomError};

/// Default client capacity.
pub const DEFAULT_CLIENT_CAPACITY: usize = 64;

/// What a client may do in this room.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Permission {
    /// May neither read nor write; a parked session.
    Guest = 0,
    /// Receives pushed posts but may not write.
    ReadOnly = 1,
    /// Full participant.
    ReadWrite = 2,
    /// Full participant, never evicted, may administer.
    Admin = 3,
}

impl Permission {
    /// Whether this role may store posts.
    pub fn can_write(self) -> bool {
        matches!(self, Permission::ReadWrite | Permission::Admin)
    }

    /// The wire byte for login responses.
    pub fn bits(self) -> u8 {
        self as u8
    }
}

/// One authenticated session.
#[derive(Debug, Clone)]
pub struct ClientInfo {
    /// The client's node identity.
    pub id: NodeId,
    /// Granted role.
    pub permission: Permission,
    /// Newest login/message timestamp seen from this client; replay guard.
    pub last_timestamp: u32,
    /// Local time of the client's last activity; the eviction key.
    pub last_activity: u32,
    /// Timestamp of the newest post already delivered to this client.
    pub sync_since: u32,
    /// Consecutive failed pushes; pushing pauses at the limit.
    pub push_failures: u32,
    /// Timestamp of the post currently in flight to this client, if any.
    pub push_post_timestamp: Option<u32>,
}

impl ClientInfo {
    /// A fresh session for a newly authenticated client.
    pub fn new(id: NodeId, permission: Permission, timestamp: u32, sync_since: u32, now: u32) -> Self {
        Self {
            id,
            permission,
            last_timestamp: timestamp,
            last_activity: now,
            sync_since,
            push_failures: 0,
            push_post_timestamp: None,
        }
    }
}

/// The session table.
pub struct ClientStore {
    clients: RwLock<Vec<ClientInfo>>,
    capacity: usize,
}

impl ClientStore {
    /// Create a store with the default capacity.
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_CLIENT_CAPACITY)
    }

    /// Create a store with an explicit capacity.
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            clients: RwLock::new(Vec::new()),
            capacity,
        }
    }

    fn read(&self) -> std::sync::RwLockReadGuard<'_, Vec<ClientInfo>> {
        match self.clients.read() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    fn write(&self) -> std::sync::RwLockWriteGuard<'_, Vec<ClientInfo>> {
        match self.clients.write() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    /// Number of sessions.
    pub fn count(&self) -> usize {
        self.read().len()
    }

    /// Look up a session.
    pub fn get(&self, id: &NodeId) -> Option<ClientInfo> {
        self.read().iter().find(|c| c.id == *id).cloned()
    }

    /// The identities of every session, in slot order (the sync loop's
    /// round-robin universe).
    pub fn ids(&self) -> Vec<NodeId> {
        self.read().iter().map(|c| c.id).collect()
    }

    /// Insert or replace a session.
    ///
    /// # Errors
    ///
    /// Returns [`RoomError::ClientsFull`] when the store is full and every
    /// slot holds an admin.
    pub fn upsert(&self, client: ClientInfo) -> Result<()> {
        let mut clients = self.write();
        if let Some(existing) = clients.iter_mut().find(|c| c.id == client.id) {
            *existing = client;
            return Ok(());
        }
        if clients.len() >= self.capacity {
            let victim = clients
                .iter()
                .enumerate()
                .filter(|(_, c)| c.permission != Permission::Admin)
                .min_by_key(|(_, c)| c.last_activity)
                .map(|(i, _)| i)
                .ok_or(RoomError::ClientsFull)?;
            let evicted = clients.swap_remove(victim);
            tracing::debug!(client = %evicted.id, "evicted least-active client");
        }
        clients.push(client);
        Ok(())
    }

    /// Mutate a session in place.
    ///
    /// # Errors
    ///
    /// Returns [`RoomError::ClientNotFound`] for an unknown identity.
    pub fn with_client_mut<R>(
        &self,
        id: &NodeId,
        f: impl FnOnce(&mut ClientInfo) -> R,
    ) -> Result<R> {
        let mut clients = self.write();
        let client = clients
            .iter_mut()
            .find(|c| c.id == *id)
            .ok_or(RoomError::ClientNotFound)?;
        Ok(f(client))
    }

    /// Visit every session under the read lock.
    pub fn for_each(&self, mut f: impl FnMut(&ClientInfo)) {
        for client in self.read().iter() {
            f(client);
        }
    }
}

impl Default for ClientStore {
    fn default() -> Self {
        Self::new()
    }
}
