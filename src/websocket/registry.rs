use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::mpsc::UnboundedSender;
use uuid::Uuid;

/// Unique identifier for one realtime connection (one device/tab)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectionId(Uuid);

impl ConnectionId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for ConnectionId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.0.fmt(f)
    }
}

/// Broadcast group a connection can belong to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum GroupKey {
    /// Every connection of one identity
    Identity(Uuid),
    /// Every joined connection of both participants
    Conversation(Uuid),
}

struct Connection {
    identity: Uuid,
    sender: UnboundedSender<String>,
    groups: HashSet<GroupKey>,
}

#[derive(Default)]
struct RegistryState {
    identities: HashMap<Uuid, HashSet<ConnectionId>>,
    connections: HashMap<ConnectionId, Connection>,
    groups: HashMap<GroupKey, HashSet<ConnectionId>>,
}

impl RegistryState {
    fn join(&mut self, connection_id: ConnectionId, group: GroupKey) -> bool {
        let Some(connection) = self.connections.get_mut(&connection_id) else {
            return false;
        };
        if !connection.groups.insert(group) {
            return false;
        }
        self.groups.entry(group).or_default().insert(connection_id);
        true
    }

    fn leave_all(&mut self, connection_id: ConnectionId, groups: &HashSet<GroupKey>) {
        for group in groups {
            if let Some(members) = self.groups.get_mut(group) {
                members.remove(&connection_id);
                if members.is_empty() {
                    self.groups.remove(group);
                }
            }
        }
    }
}

/// Outcome of registering a connection
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Registration {
    /// True only for the identity's first live connection
    pub came_online: bool,
}

/// Outcome of removing a connection
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Departure {
    pub identity: Uuid,
    /// True only when the identity's last connection closed
    pub went_offline: bool,
    /// Conversation groups the departing connection had joined
    pub conversations: Vec<Uuid>,
}

/// Process-local presence bookkeeping.
///
/// The identity, connection and group maps are only ever mutated together
/// under one lock, which is what makes online and offline transitions fire
/// exactly once per identity. Nothing in here awaits.
#[derive(Default, Clone)]
pub struct PresenceRegistry {
    inner: Arc<Mutex<RegistryState>>,
}

impl PresenceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, RegistryState> {
        self.inner.lock().unwrap_or_else(|p| p.into_inner())
    }

    /// Register a connection, join its personal group and every given
    /// conversation group.
    pub fn register(
        &self,
        connection_id: ConnectionId,
        identity: Uuid,
        sender: UnboundedSender<String>,
        conversations: &[Uuid],
    ) -> Registration {
        let mut state = self.state();

        let connections = state.identities.entry(identity).or_default();
        let came_online = connections.is_empty();
        connections.insert(connection_id);

        state.connections.insert(
            connection_id,
            Connection {
                identity,
                sender,
                groups: HashSet::new(),
            },
        );
        state.join(connection_id, GroupKey::Identity(identity));
        for conversation_id in conversations {
            state.join(connection_id, GroupKey::Conversation(*conversation_id));
        }

        tracing::debug!(
            user_id = %identity,
            connection_id = %connection_id,
            came_online,
            "connection registered"
        );
        Registration { came_online }
    }

    /// Join every live connection of `identity` to a conversation group.
    /// Returns how many connections newly joined.
    pub fn join_conversation(&self, identity: Uuid, conversation_id: Uuid) -> usize {
        let mut state = self.state();
        let connection_ids: Vec<ConnectionId> = state
            .identities
            .get(&identity)
            .map(|set| set.iter().copied().collect())
            .unwrap_or_default();

        connection_ids
            .into_iter()
            .filter(|id| state.join(*id, GroupKey::Conversation(conversation_id)))
            .count()
    }

    /// Remove a connection. Returns None if it was never registered (or was
    /// already removed), so a double close cannot produce a second offline.
    pub fn deregister(&self, connection_id: ConnectionId) -> Option<Departure> {
        let mut state = self.state();
        let connection = state.connections.remove(&connection_id)?;
        state.leave_all(connection_id, &connection.groups);

        let identity = connection.identity;
        let remaining = state
            .identities
            .get_mut(&identity)
            .map(|set| {
                set.remove(&connection_id);
                set.len()
            })
            .unwrap_or(0);
        let went_offline = remaining == 0;
        if went_offline {
            state.identities.remove(&identity);
        }

        let mut conversations: Vec<Uuid> = connection
            .groups
            .iter()
            .filter_map(|g| match g {
                GroupKey::Conversation(id) => Some(*id),
                GroupKey::Identity(_) => None,
            })
            .collect();
        conversations.sort();

        tracing::debug!(
            user_id = %identity,
            connection_id = %connection_id,
            went_offline,
            "connection deregistered"
        );
        Some(Departure {
            identity,
            went_offline,
            conversations,
        })
    }

    /// Push a frame to every connection in `group`, skipping connections that
    /// belong to `exclude`. Returns the number of connections reached.
    pub fn deliver(&self, group: GroupKey, payload: &str, exclude: Option<Uuid>) -> usize {
        self.deliver_many(&[group], payload, exclude)
    }

    /// Like [`deliver`](Self::deliver) across several groups; a connection
    /// that sits in more than one of them receives the frame once.
    pub fn deliver_many(&self, groups: &[GroupKey], payload: &str, exclude: Option<Uuid>) -> usize {
        let state = self.state();
        let mut targets: HashSet<ConnectionId> = HashSet::new();
        for group in groups {
            if let Some(members) = state.groups.get(group) {
                targets.extend(members.iter().copied());
            }
        }

        let mut delivered = 0;
        for connection_id in targets {
            let Some(connection) = state.connections.get(&connection_id) else {
                continue;
            };
            if exclude == Some(connection.identity) {
                continue;
            }
            // A closed receiver means the session is shutting down; its own
            // deregistration handles cleanup.
            if connection.sender.send(payload.to_owned()).is_ok() {
                delivered += 1;
            } else {
                tracing::debug!(connection_id = %connection_id, "skipping closed connection");
            }
        }
        delivered
    }

    /// Push a frame to a single connection
    pub fn send_to(&self, connection_id: ConnectionId, payload: &str) -> bool {
        let state = self.state();
        state
            .connections
            .get(&connection_id)
            .map(|c| c.sender.send(payload.to_owned()).is_ok())
            .unwrap_or(false)
    }

    pub fn is_online(&self, identity: Uuid) -> bool {
        self.state()
            .identities
            .get(&identity)
            .map(|set| !set.is_empty())
            .unwrap_or(false)
    }

    pub fn connection_count(&self, identity: Uuid) -> usize {
        self.state()
            .identities
            .get(&identity)
            .map(|set| set.len())
            .unwrap_or(0)
    }

    pub fn identity_of(&self, connection_id: ConnectionId) -> Option<Uuid> {
        self.state()
            .connections
            .get(&connection_id)
            .map(|c| c.identity)
    }

    /// Conversation groups any of the identity's live connections has joined
    pub fn conversations_of(&self, identity: Uuid) -> Vec<Uuid> {
        let state = self.state();
        let mut conversations: HashSet<Uuid> = HashSet::new();
        if let Some(connection_ids) = state.identities.get(&identity) {
            for id in connection_ids {
                if let Some(connection) = state.connections.get(id) {
                    conversations.extend(connection.groups.iter().filter_map(|g| match g {
                        GroupKey::Conversation(c) => Some(*c),
                        GroupKey::Identity(_) => None,
                    }));
                }
            }
        }
        let mut conversations: Vec<Uuid> = conversations.into_iter().collect();
        conversations.sort();
        conversations
    }

    pub fn group_size(&self, group: GroupKey) -> usize {
        self.state().groups.get(&group).map(|g| g.len()).unwrap_or(0)
    }

    pub fn online_identities(&self) -> usize {
        self.state().identities.len()
    }

    pub fn open_connections(&self) -> usize {
        self.state().connections.len()
    }
}
