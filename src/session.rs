use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Mutex;

use crate::error::ContextError;
use crate::layout::ImageResource;

/// The opaque identifier of one conversation with the messaging gateway.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ConversationId(pub i64);

impl std::fmt::Display for ConversationId {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(formatter, "{}", self.0)
    }
}

/// The step a conversation currently sits at. The absence of a session in the store is the
/// idle state, so every variant here describes an unfinished flow.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// `/newpdf` was received, the text block has not arrived yet.
    AwaitingText,
    /// The text block is stored, images may arrive until `/done`.
    AwaitingImages,
    /// `/convert` was received, the document to convert has not arrived yet.
    AwaitingDocument,
    /// The build pipeline is running for this session.
    Building,
    /// The document conversion is running for this session.
    Converting,
}

/// The per-conversation mutable state of an unfinished build or conversion flow.
#[derive(Debug)]
pub struct Session {
    pub id: ConversationId,
    pub state: SessionState,
    /// The single text block, set at most once per session.
    pub text: Option<String>,
    /// Image resources in arrival order, append-only and never reordered.
    pub images: Vec<ImageResource>,
    /// Guard preventing re-entrant build or convert triggers.
    pub busy: bool,
}

impl Session {
    pub fn new(id: ConversationId, state: SessionState) -> Session {
        Session {
            id,
            state,
            text: None,
            images: Vec::new(),
            busy: false,
        }
    }
}

/// The process-wide mapping from conversation ID to session state. A session exists in the
/// store exactly while a conversation has an unfinished flow; it is inserted by the start
/// commands and removed on every terminal transition. The mutex provides the per-key
/// exclusion the event handlers rely on.
#[derive(Default)]
pub struct SessionStore {
    inner: Mutex<HashMap<ConversationId, Session>>,
}

impl SessionStore {
    pub fn new() -> SessionStore {
        SessionStore::default()
    }

    /// Inserts a fresh session for the conversation, returning the session it replaced so
    /// that the caller can release its resources.
    pub fn begin(
        &self,
        id: ConversationId,
        state: SessionState,
    ) -> Result<Option<Session>, ContextError> {
        let mut sessions = self.lock()?;
        Ok(sessions.insert(id, Session::new(id, state)))
    }

    /// Removes the session of the conversation, handing it back for resource release.
    pub fn remove(&self, id: ConversationId) -> Result<Option<Session>, ContextError> {
        let mut sessions = self.lock()?;
        Ok(sessions.remove(&id))
    }

    /// Runs the closure against the session of the conversation, if one exists. The store
    /// lock is held for the duration of the closure, which keeps the check-then-mutate
    /// sequences of the event handlers atomic.
    pub fn with_session<T>(
        &self,
        id: ConversationId,
        operation: impl FnOnce(&mut Session) -> T,
    ) -> Result<Option<T>, ContextError> {
        let mut sessions = self.lock()?;
        Ok(sessions.get_mut(&id).map(operation))
    }

    /// Whether the conversation currently has an unfinished flow.
    pub fn contains(&self, id: ConversationId) -> Result<bool, ContextError> {
        let sessions = self.lock()?;
        Ok(sessions.contains_key(&id))
    }

    fn lock(
        &self,
    ) -> Result<std::sync::MutexGuard<'_, HashMap<ConversationId, Session>>, ContextError> {
        self.inner
            .lock()
            .map_err(|_| ContextError::with_context("The session store lock was poisoned"))
    }
}
