//! Translates connection events into the events each peer should receive.
//!
//! The router owns the [`Registry`] and is purely synchronous: every call to
//! [`Router::dispatch`] returns the outbound events instead of sending them,
//! leaving delivery to the [`hub`](crate::hub).

use tracing::{debug, info, warn};

use crate::{
    color::Color,
    protocol::{ClientToServer, ServerToClient, SystemKind},
    registry::{ConnectionId, Registry, RenameOutcome},
};

/// Label used when an event references a connection that is already gone.
pub const UNKNOWN_SENDER: &str = "Unknown";

/// Lifecycle and message events observed on a single connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Inbound {
    Connect,
    Message(String),
    Rename(String),
    TypingStart,
    TypingStop,
    Disconnect,
    /// The transport could not decode a payload from this connection.
    Malformed(String),
}

impl From<ClientToServer> for Inbound {
    fn from(request: ClientToServer) -> Self {
        match request {
            ClientToServer::Chat { text } => Inbound::Message(text),
            ClientToServer::Rename { nickname } => Inbound::Rename(nickname),
            ClientToServer::Typing => Inbound::TypingStart,
            ClientToServer::StopTyping => Inbound::TypingStop,
        }
    }
}

/// Which connections an outbound event is addressed to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Target {
    All,
    AllExcept(ConnectionId),
    Only(ConnectionId),
}

impl Target {
    pub fn includes(&self, id: &ConnectionId) -> bool {
        match self {
            Target::All => true,
            Target::AllExcept(excluded) => excluded != id,
            Target::Only(only) => only == id,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Outbound {
    pub target: Target,
    pub message: ServerToClient,
}

impl Outbound {
    fn new(target: Target, message: ServerToClient) -> Self {
        Self { target, message }
    }
}

pub struct Router {
    registry: Registry,
}

impl Router {
    pub fn new(registry: Registry) -> Self {
        Self { registry }
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    pub fn dispatch(&mut self, id: &ConnectionId, event: Inbound) -> Vec<Outbound> {
        match event {
            Inbound::Connect => self.on_connect(id),
            Inbound::Message(text) => self.on_message(id, text),
            Inbound::Rename(candidate) => self.on_rename(id, &candidate),
            Inbound::TypingStart => self.on_typing(id, true),
            Inbound::TypingStop => self.on_typing(id, false),
            Inbound::Disconnect => self.on_disconnect(id),
            Inbound::Malformed(reason) => {
                debug!(%id, %reason, "rejecting malformed payload");
                vec![Outbound::new(
                    Target::Only(id.clone()),
                    ServerToClient::Error {
                        message: format!("invalid message: {reason}"),
                    },
                )]
            }
        }
    }

    fn on_connect(&mut self, id: &ConnectionId) -> Vec<Outbound> {
        let identity = match self.registry.register(id.clone()) {
            Ok(identity) => identity,
            Err(err) => {
                warn!(error = %err, "ignoring duplicate connect");
                return Vec::new();
            }
        };
        info!(%id, nickname = %identity.nickname, "user connected");

        vec![
            Outbound::new(
                Target::Only(id.clone()),
                ServerToClient::your_identity(&identity),
            ),
            Outbound::new(
                Target::AllExcept(id.clone()),
                system(
                    format!("{} has joined the chat.", identity.nickname),
                    SystemKind::Join,
                ),
            ),
            self.roster(),
        ]
    }

    fn on_message(&self, id: &ConnectionId, text: String) -> Vec<Outbound> {
        if text.trim().is_empty() {
            return Vec::new();
        }

        let (sender, color) = self.sender(id);
        debug!(%id, %sender, %text, "chat message");

        vec![Outbound::new(
            Target::All,
            ServerToClient::ChatMessage {
                text,
                sender,
                color,
                sender_id: id.clone(),
            },
        )]
    }

    fn on_rename(&mut self, id: &ConnectionId, candidate: &str) -> Vec<Outbound> {
        let (previous, identity) = match self.registry.rename(id, candidate) {
            Some(RenameOutcome::Applied { previous, identity }) => (previous, identity),
            Some(RenameOutcome::Unchanged(_)) | None => return Vec::new(),
        };
        info!(%id, from = %previous, to = %identity.nickname, "nickname changed");

        vec![
            Outbound::new(
                Target::All,
                system(
                    format!("{previous} is now known as {}.", identity.nickname),
                    SystemKind::NickChange,
                ),
            ),
            self.roster(),
            Outbound::new(
                Target::Only(id.clone()),
                ServerToClient::your_identity(&identity),
            ),
        ]
    }

    fn on_typing(&self, id: &ConnectionId, started: bool) -> Vec<Outbound> {
        let (sender, _) = self.sender(id);
        let message = if started {
            ServerToClient::Typing { sender }
        } else {
            ServerToClient::StopTyping { sender }
        };
        vec![Outbound::new(Target::AllExcept(id.clone()), message)]
    }

    fn on_disconnect(&mut self, id: &ConnectionId) -> Vec<Outbound> {
        let Some(identity) = self.registry.remove(id) else {
            debug!(%id, "disconnect for unregistered connection");
            return Vec::new();
        };
        info!(%id, nickname = %identity.nickname, "user disconnected");

        vec![
            Outbound::new(
                Target::All,
                system(
                    format!("{} has left the chat.", identity.nickname),
                    SystemKind::Leave,
                ),
            ),
            self.roster(),
        ]
    }

    fn sender(&self, id: &ConnectionId) -> (String, Color) {
        match self.registry.lookup(id) {
            Some(identity) => (identity.nickname.clone(), identity.color),
            None => (UNKNOWN_SENDER.to_string(), Color::BLACK),
        }
    }

    fn roster(&self) -> Outbound {
        Outbound::new(
            Target::All,
            ServerToClient::roster(&self.registry.snapshot()),
        )
    }
}

impl Default for Router {
    fn default() -> Self {
        Self::new(Registry::new())
    }
}

fn system(text: String, kind: SystemKind) -> ServerToClient {
    ServerToClient::SystemMessage { text, kind }
}
