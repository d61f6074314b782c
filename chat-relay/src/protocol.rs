use std::io;

use serde::{Deserialize, Serialize, de::DeserializeOwned};
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt};

use crate::{
    color::Color,
    registry::{ConnectionId, Identity},
};

const LINE_ENDINGS: &[char] = &['\n', '\r'];

/// Longest accepted inbound line or WebSocket message, terminator included.
pub const MAX_LINE_BYTES: usize = 64 * 1024;

/// Requests a connected client may send.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientToServer {
    Chat { text: String },
    Rename { nickname: String },
    Typing,
    StopTyping,
}

/// Events the relay pushes to clients.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerToClient {
    YourIdentity {
        nickname: String,
        color: Color,
    },
    SystemMessage {
        text: String,
        kind: SystemKind,
    },
    RosterUpdate {
        users: Vec<RosterEntry>,
    },
    ChatMessage {
        text: String,
        sender: String,
        color: Color,
        #[serde(rename = "senderId")]
        sender_id: ConnectionId,
    },
    Typing {
        sender: String,
    },
    StopTyping {
        sender: String,
    },
    Error {
        message: String,
    },
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum SystemKind {
    Join,
    Leave,
    NickChange,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RosterEntry {
    pub nickname: String,
    pub color: Color,
}

impl From<&Identity> for RosterEntry {
    fn from(identity: &Identity) -> Self {
        Self {
            nickname: identity.nickname.clone(),
            color: identity.color,
        }
    }
}

impl ServerToClient {
    pub fn your_identity(identity: &Identity) -> Self {
        Self::YourIdentity {
            nickname: identity.nickname.clone(),
            color: identity.color,
        }
    }

    pub fn roster(identities: &[Identity]) -> Self {
        Self::RosterUpdate {
            users: identities.iter().map(RosterEntry::from).collect(),
        }
    }
}

pub fn decode<T: DeserializeOwned>(payload: &str) -> io::Result<T> {
    serde_json::from_str(payload).map_err(to_io_error)
}

pub fn encode<T: Serialize>(message: &T) -> io::Result<String> {
    serde_json::to_string(message).map_err(to_io_error)
}

/// Reads the next JSON line.
///
/// An undecodable or oversized line is reported as
/// [`io::ErrorKind::InvalidData`] after the line has been consumed, so the
/// caller may keep reading.
pub async fn read_message<R, T>(reader: &mut R) -> io::Result<Option<T>>
where
    R: AsyncBufRead + Unpin,
    T: DeserializeOwned,
{
    read_message_within(reader, MAX_LINE_BYTES).await
}

async fn read_message_within<R, T>(reader: &mut R, limit: usize) -> io::Result<Option<T>>
where
    R: AsyncBufRead + Unpin,
    T: DeserializeOwned,
{
    loop {
        let Some(bytes) = read_line_within(reader, limit).await? else {
            return Ok(None);
        };
        let line = String::from_utf8(bytes)
            .map_err(|err| io::Error::new(io::ErrorKind::InvalidData, err))?;

        let trimmed = line.trim_end_matches(LINE_ENDINGS);
        if trimmed.is_empty() {
            continue;
        }

        return decode(trimmed).map(Some);
    }
}

/// Like `read_line`, but never buffers more than `limit` bytes. The rest of an
/// oversized line is discarded up to its terminator.
async fn read_line_within<R>(reader: &mut R, limit: usize) -> io::Result<Option<Vec<u8>>>
where
    R: AsyncBufRead + Unpin,
{
    let mut line = Vec::new();
    let mut oversized = false;
    loop {
        let available = reader.fill_buf().await?;
        if available.is_empty() {
            if line.is_empty() && !oversized {
                return Ok(None);
            }
            break;
        }

        let (chunk, complete) = match available.iter().position(|&byte| byte == b'\n') {
            Some(end) => (&available[..=end], true),
            None => (available, false),
        };
        let used = chunk.len();
        if !oversized && line.len() + used > limit {
            oversized = true;
            line = Vec::new();
        }
        if !oversized {
            line.extend_from_slice(chunk);
        }
        reader.consume(used);

        if complete {
            break;
        }
    }

    if oversized {
        return Err(io::Error::new(
            io::ErrorKind::InvalidData,
            format!("line longer than {limit} bytes"),
        ));
    }
    Ok(Some(line))
}

pub async fn write_message<W, T>(writer: &mut W, message: &T) -> io::Result<()>
where
    W: AsyncWrite + Unpin,
    T: Serialize,
{
    let mut encoded = serde_json::to_vec(message).map_err(to_io_error)?;
    encoded.push(b'\n');
    writer.write_all(&encoded).await?;
    writer.flush().await?;
    Ok(())
}

fn to_io_error(err: serde_json::Error) -> io::Error {
    io::Error::new(io::ErrorKind::InvalidData, err)
}
