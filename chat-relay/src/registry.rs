use std::{collections::HashMap, fmt};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::color::Color;

/// Longest nickname accepted, counted in characters.
pub const MAX_NICKNAME_CHARS: usize = 15;

const DEFAULT_NICKNAME_PREFIX: &str = "User_";
const DEFAULT_NICKNAME_ID_CHARS: usize = 4;

/// Opaque token identifying one open connection.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ConnectionId(String);

impl ConnectionId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Fresh random id. Callers still check the registry for collisions.
    pub fn generate() -> Self {
        Self(nanoid::nanoid!())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    fn default_nickname(&self) -> String {
        let short: String = self.0.chars().take(DEFAULT_NICKNAME_ID_CHARS).collect();
        format!("{DEFAULT_NICKNAME_PREFIX}{short}")
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ConnectionId {
    fn from(id: &str) -> Self {
        Self::new(id)
    }
}

/// Nickname and color attached to one connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Identity {
    pub id: ConnectionId,
    pub nickname: String,
    pub color: Color,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum RegistryError {
    #[error("connection {0} is already registered")]
    DuplicateConnection(ConnectionId),
}

/// Result of a rename request against a registered connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RenameOutcome {
    Applied { previous: String, identity: Identity },
    /// Candidate was blank or equal to the current nickname.
    Unchanged(Identity),
}

/// Trims and truncates a requested nickname; `None` when nothing is left.
pub fn sanitize_nickname(candidate: &str) -> Option<String> {
    let trimmed = candidate.trim();
    if trimmed.is_empty() {
        return None;
    }
    Some(trimmed.chars().take(MAX_NICKNAME_CHARS).collect())
}

/// Identity of every open connection, keyed by connection id.
pub struct Registry {
    identities: HashMap<ConnectionId, Identity>,
    pick_color: Box<dyn FnMut() -> Color + Send>,
}

impl Registry {
    pub fn new() -> Self {
        Self::with_color_source(|| Color::random_readable(&mut rand::thread_rng()))
    }

    /// Registry drawing colors from `pick_color` instead of the thread RNG.
    pub fn with_color_source<F>(pick_color: F) -> Self
    where
        F: FnMut() -> Color + Send + 'static,
    {
        Self {
            identities: HashMap::new(),
            pick_color: Box::new(pick_color),
        }
    }

    pub fn register(&mut self, id: ConnectionId) -> Result<Identity, RegistryError> {
        if self.identities.contains_key(&id) {
            return Err(RegistryError::DuplicateConnection(id));
        }

        let identity = Identity {
            nickname: id.default_nickname(),
            color: (self.pick_color)(),
            id: id.clone(),
        };
        self.identities.insert(id, identity.clone());
        Ok(identity)
    }

    pub fn lookup(&self, id: &ConnectionId) -> Option<&Identity> {
        self.identities.get(id)
    }

    pub fn rename(&mut self, id: &ConnectionId, candidate: &str) -> Option<RenameOutcome> {
        let identity = self.identities.get_mut(id)?;

        let nickname = match sanitize_nickname(candidate) {
            Some(nickname) if nickname != identity.nickname => nickname,
            _ => return Some(RenameOutcome::Unchanged(identity.clone())),
        };

        let previous = std::mem::replace(&mut identity.nickname, nickname);
        Some(RenameOutcome::Applied {
            previous,
            identity: identity.clone(),
        })
    }

    pub fn remove(&mut self, id: &ConnectionId) -> Option<Identity> {
        self.identities.remove(id)
    }

    /// Copy of every identity; order is unspecified.
    pub fn snapshot(&self) -> Vec<Identity> {
        self.identities.values().cloned().collect()
    }

    pub fn contains(&self, id: &ConnectionId) -> bool {
        self.identities.contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.identities.len()
    }

    pub fn is_empty(&self) -> bool {
        self.identities.is_empty()
    }
}

impl Default for Registry {
    fn default() -> Self {
        Self::new()
    }
}
