//! Per-connection session state and message dispatch.
//!
//! A connection moves through resolution (URL path to database directory),
//! authorization gating and the active message loop. Dispatch wraps every
//! handler invocation in a failure boundary: an error is logged with
//! connection context and turned into an ERROR reply carrying the original
//! `callbackID`, never a dropped connection.

use crate::handlers::HandlerSet;
use crate::message::{
    ClientMessage, GetBundlePayload, LogonPayload, SaveBundlePayload, ServerReply,
};
use emuprot_core::auth::{Authenticator, Identifier, User};
use emuprot_core::model::BundleListItem;
use emuprot_core::{paths, EmuError, EmuResult, LockManager, ServerConfig};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{error, warn};
use uuid::Uuid;

/// Sent when the requested path does not resolve to a database. One message
/// for every resolution failure so a probing client learns nothing about the
/// tree outside its database.
pub const NO_SUCH_DATABASE: &str = "Requested DB does not exist!";

/// Commands accepted before a successful logon or token identification.
const BOOTSTRAP_COMMANDS: [&str; 4] = [
    "GETPROTOCOL",
    "GETDOUSERMANAGEMENT",
    "LOGONUSER",
    "DISCONNECTWARNING",
];

/// Process-wide dependencies shared by all connections.
pub struct ServerEnv {
    pub config: ServerConfig,
    pub locks: LockManager,
    pub authenticator: Arc<dyn Authenticator>,
    pub identifier: Arc<dyn Identifier>,
}

/// Immutable facts established at resolution time.
#[derive(Debug, Clone)]
pub struct ConnectionContext {
    pub connection_id: Uuid,
    pub project: String,
    pub database: String,
    pub db_dir: PathBuf,
    pub secure_token: Option<String>,
}

/// Mutable per-connection state, only ever touched through the session.
#[derive(Debug, Default)]
pub struct SessionState {
    pub authorized: bool,
    pub user: Option<User>,
    pub bundle_list: Option<Vec<BundleListItem>>,
}

pub struct Session {
    pub env: Arc<ServerEnv>,
    pub ctx: ConnectionContext,
    pub state: RwLock<SessionState>,
}

impl Session {
    pub fn new(env: Arc<ServerEnv>, ctx: ConnectionContext) -> Self {
        Self {
            env,
            ctx,
            state: RwLock::new(SessionState::default()),
        }
    }

    pub async fn authorized(&self) -> bool {
        self.state.read().await.authorized
    }

    /// Attach an identity and its bundle list, flipping the gate open.
    pub async fn set_identity(&self, user: User, bundle_list: Option<Vec<BundleListItem>>) {
        let mut state = self.state.write().await;
        state.authorized = true;
        state.user = Some(user);
        state.bundle_list = bundle_list;
    }
}

/// Resolve a connection's request path (`/<project>/<database>`) to a
/// database directory.
///
/// The derived path must exist and, after canonicalization, stay under the
/// configured data root. Every failure collapses to the same client-facing
/// error.
pub fn resolve_database(
    config: &ServerConfig,
    request_path: &str,
) -> EmuResult<(String, String, PathBuf)> {
    let segments: Vec<&str> = request_path
        .split('/')
        .filter(|s| !s.is_empty())
        .collect();
    let [project, database] = segments[..] else {
        return Err(EmuError::UserInput(NO_SUCH_DATABASE.to_string()));
    };

    let db_dir = paths::database_dir(config.data_dir(), project, database);
    let db_dir = db_dir
        .canonicalize()
        .map_err(|_| EmuError::UserInput(NO_SUCH_DATABASE.to_string()))?;
    if !db_dir.starts_with(config.data_dir()) || !db_dir.is_dir() {
        return Err(EmuError::UserInput(NO_SUCH_DATABASE.to_string()));
    }

    Ok((project.to_string(), database.to_string(), db_dir))
}

/// Dispatch one raw inbound frame to the session's handler set.
///
/// Always produces exactly one reply.
pub async fn dispatch(session: &Session, handlers: &dyn HandlerSet, raw: &str) -> ServerReply {
    let msg: ClientMessage = match serde_json::from_str(raw) {
        Ok(msg) => msg,
        Err(e) => return ServerReply::error("", format!("Malformed message: {e}")),
    };
    let callback_id = msg.callback_id.clone();

    if !session.authorized().await && !BOOTSTRAP_COMMANDS.contains(&msg.command.as_str()) {
        return ServerReply::error(
            callback_id,
            format!("Not authorized. Request type was: {}", msg.command),
        );
    }

    let result = run_handler(session, handlers, &msg).await;

    match result {
        Ok(data) => ServerReply::success(callback_id, data),
        Err(err) => {
            if err.log_always() {
                if err.visible_to_client() {
                    warn!(
                        connection = %session.ctx.connection_id,
                        database = %session.ctx.database,
                        command = %msg.command,
                        %err,
                        "handler failed"
                    );
                } else {
                    error!(
                        connection = %session.ctx.connection_id,
                        database = %session.ctx.database,
                        command = %msg.command,
                        %err,
                        "handler failed"
                    );
                }
            }
            ServerReply::error(callback_id, err.client_message())
        }
    }
}

async fn run_handler(
    session: &Session,
    handlers: &dyn HandlerSet,
    msg: &ClientMessage,
) -> EmuResult<Option<serde_json::Value>> {
    match msg.command.as_str() {
        "GETPROTOCOL" => handlers.get_protocol(session).await.map(Some),
        "GETDOUSERMANAGEMENT" => handlers.get_do_user_management(session).await.map(Some),
        "LOGONUSER" => {
            let payload: LogonPayload = parse_payload(&msg.payload)?;
            handlers.logon_user(session, payload).await.map(Some)
        }
        "GETGLOBALDBCONFIG" => handlers.get_global_db_config(session).await.map(Some),
        "GETBUNDLELIST" => handlers.get_bundle_list(session).await.map(Some),
        "GETBUNDLE" => {
            let payload: GetBundlePayload = parse_payload(&msg.payload)?;
            handlers.get_bundle(session, payload).await.map(Some)
        }
        "SAVEBUNDLE" => {
            let payload: SaveBundlePayload = parse_payload(&msg.payload)?;
            handlers.save_bundle(session, payload).await
        }
        "DISCONNECTWARNING" => handlers.disconnect_warning(session).await,
        other => Err(EmuError::UserInput(format!(
            "Sent request type that is unknown to server! Request type was: {other}"
        ))),
    }
}

fn parse_payload<T: serde::de::DeserializeOwned>(payload: &serde_json::Value) -> EmuResult<T> {
    serde_json::from_value(payload.clone())
        .map_err(|e| EmuError::UserInput(format!("invalid message payload: {e}")))
}
