use std::{future::Future, io, net::SocketAddr};

use anyhow::Result;
use tokio::{
    io::{AsyncBufRead, AsyncWrite, BufReader},
    net::{TcpListener, TcpStream},
    select,
};
use tracing::{debug, info, warn};

use crate::{
    hub::{Hub, Inbox, Session},
    protocol::{ClientToServer, read_message, write_message},
    registry::ConnectionId,
    router::Inbound,
};

pub const SHUTDOWN_NOTICE: &str = "relay shutting down";

/// TCP front end speaking newline-delimited JSON.
pub struct Relay {
    listener: TcpListener,
    hub: Hub,
}

impl Relay {
    pub fn new(listener: TcpListener, hub: Hub) -> Self {
        Self { listener, hub }
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    pub async fn run_until<F>(self, shutdown: F) -> Result<()>
    where
        F: Future<Output = ()> + Send,
    {
        let Relay { listener, hub } = self;
        tokio::pin!(shutdown);

        loop {
            select! {
                _ = &mut shutdown => {
                    info!("relay shutting down");
                    hub.shutdown(SHUTDOWN_NOTICE).await;
                    break;
                }
                accept_result = listener.accept() => {
                    handle_accept_result(accept_result, &hub);
                }
            }
        }

        Ok(())
    }
}

fn handle_accept_result(result: io::Result<(TcpStream, SocketAddr)>, hub: &Hub) {
    match result {
        Ok((stream, peer)) => spawn_connection_handler(stream, peer, hub),
        Err(err) => warn!(error = ?err, "failed to accept connection"),
    }
}

fn spawn_connection_handler(stream: TcpStream, peer: SocketAddr, hub: &Hub) {
    let hub = hub.clone();
    tokio::spawn(async move {
        if let Err(err) = handle_connection(stream, peer, hub).await {
            warn!(peer = %peer, error = ?err, "connection closed with error");
        }
    });
}

async fn handle_connection(stream: TcpStream, peer: SocketAddr, hub: Hub) -> Result<()> {
    let (reader, writer) = stream.into_split();
    let mut reader = BufReader::new(reader);

    let session = hub.connect().await;
    let id = session.id.clone();
    info!(%peer, %id, "connection accepted");

    let result = run_session(&hub, session, &mut reader, writer).await;
    hub.disconnect(&id).await;
    info!(%peer, %id, "connection closed");

    result
}

/// Feeds inbound lines into the hub while a separate task drains the
/// connection's queue to the socket. Returns once either side stops or the
/// hub evicts the connection; the caller then drops the socket.
pub async fn run_session<R, W>(
    hub: &Hub,
    session: Session,
    reader: &mut R,
    writer: W,
) -> Result<()>
where
    R: AsyncBufRead + Unpin,
    W: AsyncWrite + Unpin + Send + 'static,
{
    let Session {
        id,
        inbox,
        mut evicted,
    } = session;
    // Reads stay in this task so a partially read line is never dropped by select!.
    let mut forwarder = tokio::spawn(forward_events(id.clone(), writer, inbox));

    let result = loop {
        select! {
            request = read_message::<_, ClientToServer>(reader) => {
                match handle_request(request, hub, &id).await {
                    Ok(true) => {}
                    Ok(false) => break Ok(()),
                    Err(err) => break Err(err),
                }
            }
            _ = &mut forwarder => break Ok(()),
            _ = &mut evicted => {
                info!(%id, "connection evicted, closing");
                break Ok(());
            }
        }
    };

    forwarder.abort();
    result
}

async fn forward_events<W>(id: ConnectionId, mut writer: W, mut inbox: Inbox)
where
    W: AsyncWrite + Unpin,
{
    while let Some(message) = inbox.recv().await {
        if let Err(err) = write_message(&mut writer, &message).await {
            debug!(%id, ?err, "failed to deliver message to client");
            return;
        }
    }
    debug!(%id, "outbound queue closed by hub");
}

async fn handle_request(
    request: io::Result<Option<ClientToServer>>,
    hub: &Hub,
    id: &ConnectionId,
) -> Result<bool> {
    match request {
        Ok(Some(request)) => {
            hub.handle(id, Inbound::from(request)).await;
            Ok(true)
        }
        Ok(None) => Ok(false),
        Err(err) if err.kind() == io::ErrorKind::InvalidData => {
            hub.handle(id, Inbound::Malformed(err.to_string())).await;
            Ok(true)
        }
        Err(err) => Err(err.into()),
    }
}
