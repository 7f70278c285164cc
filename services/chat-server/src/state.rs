//! Client registry: the single source of truth for who is online, which
//! rooms they belong to, and how to reach them.
//!
//! Mirrors the donor's `Arc<RwLock<HashMap<...>>>` registry shape
//! (`broadcast_registry`, `active_receiver_sessions` in `state.rs`): callers
//! take a read lock for lookups and a write lock only for the mutating
//! register/unregister calls, never holding either across a socket write or
//! a database call.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

use chat_protocol::{ServerFrame, GERAL};
use tokio::sync::{mpsc, Notify, RwLock};

pub type ClientId = u64;
pub type Outbox = mpsc::UnboundedSender<ServerFrame>;

/// Hands out unique client ids for newly accepted connections.
#[derive(Default)]
pub struct ClientIdAllocator(AtomicU64);

impl ClientIdAllocator {
    pub fn next(&self) -> ClientId {
        self.0.fetch_add(1, Ordering::Relaxed)
    }
}

pub struct ClientHandle {
    pub username: String,
    pub rooms: HashSet<String>,
    pub last_ping: Instant,
    pub outbox: Outbox,
    /// Notified by the liveness supervisor to ask this connection to close.
    pub kick: Arc<Notify>,
}

#[derive(Default)]
pub struct Registry {
    clients: HashMap<ClientId, ClientHandle>,
    /// Room name -> member usernames. "Geral" always exists once a client
    /// has joined it; it is never removed even when empty.
    rooms: HashMap<String, HashSet<String>>,
}

impl Registry {
    pub fn is_username_online(&self, username: &str) -> bool {
        self.clients.values().any(|c| c.username == username)
    }

    /// Inserts a new client for `username`, unless one is already online.
    ///
    /// The existence check and the insert happen under this single call —
    /// and thus under one write-lock acquisition by the caller — so two
    /// concurrent logins for the same username can never both succeed.
    /// Returns `None` (doing nothing) if the username is already online.
    pub fn add_client_if_absent(
        &mut self,
        id: ClientId,
        username: String,
        outbox: Outbox,
    ) -> Option<Arc<Notify>> {
        if self.is_username_online(&username) {
            return None;
        }
        let kick = Arc::new(Notify::new());
        self.rooms
            .entry(GERAL.to_owned())
            .or_default()
            .insert(username.clone());
        self.clients.insert(
            id,
            ClientHandle {
                username,
                rooms: HashSet::from([GERAL.to_owned()]),
                last_ping: Instant::now(),
                outbox,
                kick: kick.clone(),
            },
        );
        Some(kick)
    }

    /// Removes a client, dropping it from every room it belonged to.
    /// Returns the username if the client was still registered.
    pub fn remove_client(&mut self, id: ClientId) -> Option<String> {
        let handle = self.clients.remove(&id)?;
        for room in &handle.rooms {
            if let Some(members) = self.rooms.get_mut(room) {
                members.remove(&handle.username);
            }
        }
        Some(handle.username)
    }

    pub fn touch_ping(&mut self, id: ClientId) {
        if let Some(handle) = self.clients.get_mut(&id) {
            handle.last_ping = Instant::now();
        }
    }

    pub fn is_room_member(&self, id: ClientId, room: &str) -> bool {
        self.clients
            .get(&id)
            .is_some_and(|c| c.rooms.contains(room))
    }

    pub fn online_usernames(&self) -> HashSet<String> {
        self.clients.values().map(|c| c.username.clone()).collect()
    }

    pub fn room_members(&self, room: &str) -> HashSet<String> {
        self.rooms.get(room).cloned().unwrap_or_default()
    }

    pub fn outbox_for(&self, username: &str) -> Option<Outbox> {
        self.clients
            .values()
            .find(|c| c.username == username)
            .map(|c| c.outbox.clone())
    }

    pub fn all_outboxes(&self) -> Vec<Outbox> {
        self.clients.values().map(|c| c.outbox.clone()).collect()
    }

    pub fn outboxes_for_room(&self, room: &str) -> Vec<Outbox> {
        let members = self.room_members(room);
        self.clients
            .values()
            .filter(|c| members.contains(&c.username))
            .map(|c| c.outbox.clone())
            .collect()
    }

    /// Clients whose last ping is older than `timeout`, as of `now`.
    pub fn stale_clients(&self, timeout: std::time::Duration, now: Instant) -> Vec<ClientId> {
        self.clients
            .iter()
            .filter(|(_, c)| now.duration_since(c.last_ping) > timeout)
            .map(|(id, _)| *id)
            .collect()
    }

    pub fn kick_handle(&self, id: ClientId) -> Option<Arc<Notify>> {
        self.clients.get(&id).map(|c| c.kick.clone())
    }
}

pub type SharedRegistry = Arc<RwLock<Registry>>;
