//! HTTP surface of the manager API.
//!
//! One endpoint, two transports: query-string GETs and form-encoded POSTs
//! carry the same field set. Replies always use the
//! `{success, data?, error?}` envelope with HTTP 200; clients inspect the
//! envelope, not the status code.

use crate::dispatch::{self, ManagerEnv};
use axum::extract::{Query, State};
use axum::routing::get;
use axum::{Form, Json, Router};
use emuprot_core::EmuError;
use serde::Serialize;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tracing::{error, warn};

#[derive(Debug, Serialize)]
pub struct ErrorBody {
    pub code: String,
    pub info: String,
}

#[derive(Debug, Serialize)]
pub struct Envelope {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorBody>,
}

impl Envelope {
    fn ok(data: Value) -> Self {
        Self {
            success: true,
            data: Some(data),
            error: None,
        }
    }

    fn err(err: &EmuError) -> Self {
        Self {
            success: false,
            data: None,
            error: Some(ErrorBody {
                code: err.code().to_string(),
                info: err.client_message(),
            }),
        }
    }
}

pub struct ManagerServer {
    env: Arc<ManagerEnv>,
}

impl ManagerServer {
    pub fn new(env: Arc<ManagerEnv>) -> Self {
        Self { env }
    }

    pub fn router(self) -> Router {
        Router::new()
            .route("/", get(handle_get).post(handle_post))
            .layer(CorsLayer::permissive())
            .with_state(self.env)
    }
}

async fn handle_get(
    State(env): State<Arc<ManagerEnv>>,
    Query(fields): Query<HashMap<String, String>>,
) -> Json<Envelope> {
    respond(&env, fields).await
}

async fn handle_post(
    State(env): State<Arc<ManagerEnv>>,
    Form(fields): Form<HashMap<String, String>>,
) -> Json<Envelope> {
    respond(&env, fields).await
}

async fn respond(env: &ManagerEnv, fields: HashMap<String, String>) -> Json<Envelope> {
    let query = fields.get("query").cloned().unwrap_or_default();
    match dispatch::handle_request(env, fields).await {
        Ok(data) => Json(Envelope::ok(data)),
        Err(err) => {
            if err.log_always() {
                if err.visible_to_client() {
                    warn!(query, code = err.code(), %err, "query failed");
                } else {
                    error!(query, code = err.code(), %err, "query failed");
                }
            }
            Json(Envelope::err(&err))
        }
    }
}
