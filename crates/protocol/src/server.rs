//! WebSocket accept loop and per-connection plumbing.
//!
//! Each connection gets a UUID and an entry in the active-connection set.
//! Inbound messages are dispatched on their own tasks; replies are funnelled
//! through an mpsc channel to the single socket writer, so handlers may
//! complete in any order and the client correlates replies by `callbackID`.

use crate::message::ServerReply;
use crate::plugins;
use crate::session::{dispatch, ConnectionContext, ServerEnv, Session};
use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Path, Query, State};
use axum::response::IntoResponse;
use axum::routing::get;
use axum::Router;
use futures::{SinkExt, StreamExt};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{info, warn};
use uuid::Uuid;

const REPLY_QUEUE_DEPTH: usize = 32;

#[derive(Clone)]
pub struct ProtocolServer {
    env: Arc<ServerEnv>,
    connections: Arc<parking_lot::Mutex<HashSet<Uuid>>>,
}

impl ProtocolServer {
    pub fn new(env: Arc<ServerEnv>) -> Self {
        Self {
            env,
            connections: Arc::new(parking_lot::Mutex::new(HashSet::new())),
        }
    }

    pub fn active_connections(&self) -> usize {
        self.connections.lock().len()
    }

    pub fn router(self) -> Router {
        Router::new()
            .route("/*path", get(ws_upgrade))
            .with_state(self)
    }
}

async fn ws_upgrade(
    ws: WebSocketUpgrade,
    Path(path): Path<String>,
    Query(params): Query<HashMap<String, String>>,
    State(server): State<ProtocolServer>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, server, path, params))
}

async fn handle_socket(
    socket: WebSocket,
    server: ProtocolServer,
    path: String,
    params: HashMap<String, String>,
) {
    let connection_id = Uuid::new_v4();
    server.connections.lock().insert(connection_id);
    info!(connection = %connection_id, %path, "client connected");

    run_connection(socket, &server, connection_id, path, params).await;

    server.connections.lock().remove(&connection_id);
    info!(connection = %connection_id, "client disconnected");
}

async fn run_connection(
    socket: WebSocket,
    server: &ProtocolServer,
    connection_id: Uuid,
    path: String,
    params: HashMap<String, String>,
) {
    let (mut sink, mut stream) = socket.split();

    // Resolution happens before the first message is accepted; a connection
    // that does not name a real database is told so once and closed.
    let request_path = format!("/{path}");
    let resolved = crate::session::resolve_database(&server.env.config, &request_path);
    let (project, database, db_dir) = match resolved {
        Ok(parts) => parts,
        Err(err) => {
            warn!(connection = %connection_id, %path, "rejecting connection");
            let reply = ServerReply::error("", err.client_message());
            if let Ok(text) = serde_json::to_string(&reply) {
                let _ = sink.send(Message::Text(text)).await;
            }
            let _ = sink.close().await;
            return;
        }
    };

    let handlers = match plugins::resolve_handlers(&db_dir, &database).await {
        Ok(handlers) => handlers,
        Err(err) => {
            warn!(connection = %connection_id, database, %err, "plugin resolution failed");
            let reply = ServerReply::error("", err.client_message());
            if let Ok(text) = serde_json::to_string(&reply) {
                let _ = sink.send(Message::Text(text)).await;
            }
            let _ = sink.close().await;
            return;
        }
    };

    let session = Arc::new(Session::new(
        server.env.clone(),
        ConnectionContext {
            connection_id,
            project,
            database,
            db_dir,
            secure_token: params.get("secureToken").cloned(),
        },
    ));

    let (tx, mut rx) = mpsc::channel::<Message>(REPLY_QUEUE_DEPTH);
    let writer = tokio::spawn(async move {
        while let Some(message) = rx.recv().await {
            if sink.send(message).await.is_err() {
                break;
            }
        }
        let _ = sink.close().await;
    });

    while let Some(Ok(message)) = stream.next().await {
        match message {
            Message::Text(text) => {
                let session = session.clone();
                let handlers = handlers.clone();
                let tx = tx.clone();
                tokio::spawn(async move {
                    let reply = dispatch(&session, handlers.as_ref(), &text).await;
                    match serde_json::to_string(&reply) {
                        Ok(text) => {
                            let _ = tx.send(Message::Text(text)).await;
                        }
                        Err(err) => {
                            warn!(connection = %session.ctx.connection_id, %err, "reply serialization failed");
                        }
                    }
                });
            }
            Message::Close(_) => break,
            // Pings are answered by axum itself.
            _ => {}
        }
    }

    drop(tx);
    let _ = writer.await;
}
