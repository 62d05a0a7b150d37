use std::sync::Arc;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use parking_lot::Mutex;

use crate::client::ClientId;
use crate::session::ClientSession;

pub type SharedSession = Arc<Mutex<ClientSession>>;

/// All sessions of a broker, keyed by client id.
///
/// Lock order is always map shard first, then session. Code holding a
/// session lock must not call back into the store.
#[derive(Debug, Default)]
pub struct SessionStore {
    sessions: DashMap<ClientId, SharedSession>,
}

impl SessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, client_id: &str) -> Option<SharedSession> {
        self.sessions.get(client_id).map(|entry| entry.value().clone())
    }

    pub fn contains(&self, client_id: &str) -> bool {
        self.sessions.contains_key(client_id)
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    /// Handles to every session. Shard locks are released before returning,
    /// so callers may lock the sessions one by one.
    pub fn snapshot(&self) -> Vec<(ClientId, SharedSession)> {
        self.sessions
            .iter()
            .map(|entry| (entry.key().clone(), entry.value().clone()))
            .collect()
    }

    /// Runs `f` on the slot for `client_id` while holding its shard lock, so
    /// concurrent connects with the same id are serialized. Whatever `f`
    /// leaves in the slot is stored; `None` removes the entry.
    pub fn with_entry<R>(&self, client_id: &ClientId, f: impl FnOnce(&mut Option<SharedSession>) -> R) -> R {
        match self.sessions.entry(client_id.clone()) {
            Entry::Occupied(mut occupied) => {
                let mut slot = Some(occupied.get().clone());
                let result = f(&mut slot);
                match slot {
                    Some(session) => {
                        occupied.insert(session);
                    }
                    None => {
                        occupied.remove();
                    }
                }
                result
            }
            Entry::Vacant(vacant) => {
                let mut slot = None;
                let result = f(&mut slot);
                if let Some(session) = slot {
                    vacant.insert(session);
                }
                result
            }
        }
    }

    /// Removes the session when `predicate` holds for it, evaluated under
    /// both the shard and the session lock.
    pub fn remove_if(&self, client_id: &str, predicate: impl FnOnce(&ClientSession) -> bool) -> Option<SharedSession> {
        self.sessions
            .remove_if(client_id, |_, session| predicate(&session.lock()))
            .map(|(_, session)| session)
    }
}
