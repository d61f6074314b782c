//! HTTP front end: a WebSocket endpoint speaking the JSON envelopes, with
//! static assets served for every other path.

use std::{future::Future, io, net::SocketAddr, path::PathBuf};

use anyhow::Result;
use axum::{
    Router,
    extract::{
        State,
        ws::{Message, WebSocket, WebSocketUpgrade},
    },
    response::Response,
    routing::get,
};
use futures_util::{SinkExt, StreamExt, stream::SplitSink};
use tokio::{net::TcpListener, select};
use tower_http::{services::ServeDir, trace::TraceLayer};
use tracing::{debug, info, warn};

use crate::{
    hub::{Hub, Inbox, Session},
    protocol::{self, ClientToServer, MAX_LINE_BYTES},
    registry::ConnectionId,
    router::Inbound,
};

pub struct WebRelay {
    listener: TcpListener,
    hub: Hub,
    static_dir: PathBuf,
}

impl WebRelay {
    pub fn new(listener: TcpListener, hub: Hub, static_dir: impl Into<PathBuf>) -> Self {
        Self {
            listener,
            hub,
            static_dir: static_dir.into(),
        }
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    pub async fn run_until<F>(self, shutdown: F) -> Result<()>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let WebRelay {
            listener,
            hub,
            static_dir,
        } = self;

        if !static_dir.is_dir() {
            warn!(path = %static_dir.display(), "static asset directory not found");
        }

        axum::serve(listener, app(hub, static_dir))
            .with_graceful_shutdown(shutdown)
            .await?;
        info!("web relay stopped");
        Ok(())
    }
}

pub fn app(hub: Hub, static_dir: PathBuf) -> Router {
    Router::new()
        .route("/ws", get(ws_upgrade))
        .fallback_service(ServeDir::new(static_dir))
        .layer(TraceLayer::new_for_http())
        .with_state(hub)
}

async fn ws_upgrade(State(hub): State<Hub>, ws: WebSocketUpgrade) -> Response {
    ws.max_message_size(MAX_LINE_BYTES)
        .on_upgrade(move |socket| handle_socket(socket, hub))
}

async fn handle_socket(socket: WebSocket, hub: Hub) {
    let (sink, mut stream) = socket.split();
    let Session {
        id,
        inbox,
        mut evicted,
    } = hub.connect().await;
    info!(%id, "websocket connection accepted");

    let mut forwarder = tokio::spawn(forward_events(id.clone(), sink, inbox));

    loop {
        select! {
            frame = stream.next() => {
                match frame {
                    Some(Ok(Message::Text(text))) => handle_text(&hub, &id, &text).await,
                    Some(Ok(Message::Binary(_))) => {
                        let reason = "binary frames are not supported".to_string();
                        hub.handle(&id, Inbound::Malformed(reason)).await;
                    }
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Ok(_)) => {}
                    Some(Err(err)) => {
                        debug!(%id, ?err, "websocket read failed");
                        break;
                    }
                }
            }
            _ = &mut forwarder => break,
            _ = &mut evicted => {
                info!(%id, "websocket connection evicted, closing");
                break;
            }
        }
    }

    forwarder.abort();
    hub.disconnect(&id).await;
    info!(%id, "websocket connection closed");
}

async fn handle_text(hub: &Hub, id: &ConnectionId, text: &str) {
    let event = match protocol::decode::<ClientToServer>(text) {
        Ok(request) => Inbound::from(request),
        Err(err) => Inbound::Malformed(err.to_string()),
    };
    hub.handle(id, event).await;
}

async fn forward_events(
    id: ConnectionId,
    mut sink: SplitSink<WebSocket, Message>,
    mut inbox: Inbox,
) {
    while let Some(message) = inbox.recv().await {
        let payload = match protocol::encode(&message) {
            Ok(payload) => payload,
            Err(err) => {
                warn!(%id, ?err, "failed to encode outbound event");
                continue;
            }
        };
        if let Err(err) = sink.send(Message::Text(payload)).await {
            debug!(%id, ?err, "failed to deliver message to websocket");
            return;
        }
    }
    let _ = sink.close().await;
}
