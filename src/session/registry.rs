use super::handle::{SessionHandle, SessionSnapshot};
use super::state::SessionState;
use super::{ClientId, SessionId};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RegistryError {
    #[error("a live session already exists for client {0}")]
    AlreadyExists(ClientId),
}

/// Maps each client to its current session.
///
/// Every mutation goes through a single map operation, so concurrent starts,
/// teardowns and lookups for one client never observe a half-updated entry.
#[derive(Default)]
pub struct SessionRegistry {
    sessions: DashMap<ClientId, SessionHandle>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert `handle` unless the client already has a live session.
    /// A terminal leftover entry is overwritten.
    pub fn create(&self, handle: SessionHandle) -> Result<(), RegistryError> {
        match self.sessions.entry(handle.client_id().clone()) {
            Entry::Occupied(mut entry) => {
                if entry.get().is_live() {
                    return Err(RegistryError::AlreadyExists(handle.client_id().clone()));
                }
                entry.insert(handle);
                Ok(())
            }
            Entry::Vacant(entry) => {
                entry.insert(handle);
                Ok(())
            }
        }
    }

    pub fn get(&self, client_id: &ClientId) -> Option<SessionHandle> {
        self.sessions.get(client_id).map(|entry| entry.value().clone())
    }

    /// Look up a session that is ready to receive input.
    pub fn get_open(&self, client_id: &ClientId) -> Option<SessionHandle> {
        self.get(client_id)
            .filter(|handle| handle.state() == SessionState::ShellOpen)
    }

    pub fn remove(&self, client_id: &ClientId) -> Option<SessionHandle> {
        self.sessions.remove(client_id).map(|(_, handle)| handle)
    }

    /// Remove the entry only if it still belongs to `session_id`.
    ///
    /// A session tearing down after it was replaced must not evict its
    /// successor.
    pub fn remove_if_current(&self, client_id: &ClientId, session_id: &SessionId) -> bool {
        self.sessions
            .remove_if(client_id, |_, handle| handle.session_id() == session_id)
            .is_some()
    }

    pub fn handles(&self) -> Vec<SessionHandle> {
        self.sessions
            .iter()
            .map(|entry| entry.value().clone())
            .collect()
    }

    pub fn snapshot(&self) -> Vec<SessionSnapshot> {
        let mut sessions: Vec<SessionSnapshot> = self
            .sessions
            .iter()
            .map(|entry| entry.value().snapshot())
            .collect();
        sessions.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        sessions
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }
}
