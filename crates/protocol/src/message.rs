//! Wire envelope of the EMU-webApp websocket protocol.
//!
//! Client to server: `{"type": <UPPER command>, "callbackID": <string>, ...}`.
//! Server to client: `{"callbackID": <echo>, "data"?: ..., "status":
//! {"type": "SUCCESS"|"ERROR", "message": <string>}}`.
//!
//! The `callbackID` echo is mandatory; handlers complete in any order and the
//! client correlates replies to requests through it.

use serde::{Deserialize, Serialize};
use serde_json::Value;

pub const PROTOCOL_NAME: &str = "EMU-webApp-websocket-protocol";
pub const PROTOCOL_VERSION: &str = "0.0.1";

/// One inbound message, with command-specific fields kept raw until the
/// dispatcher knows which payload type to expect.
#[derive(Debug, Clone, Deserialize)]
pub struct ClientMessage {
    #[serde(rename = "type")]
    pub command: String,
    #[serde(rename = "callbackID", default)]
    pub callback_id: String,
    #[serde(flatten)]
    pub payload: Value,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum StatusType {
    Success,
    Error,
}

#[derive(Debug, Clone, Serialize)]
pub struct Status {
    #[serde(rename = "type")]
    pub status_type: StatusType,
    pub message: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct ServerReply {
    #[serde(rename = "callbackID")]
    pub callback_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
    pub status: Status,
}

impl ServerReply {
    pub fn success(callback_id: impl Into<String>, data: Option<Value>) -> Self {
        Self {
            callback_id: callback_id.into(),
            data,
            status: Status {
                status_type: StatusType::Success,
                message: String::new(),
            },
        }
    }

    pub fn error(callback_id: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            callback_id: callback_id.into(),
            data: None,
            status: Status {
                status_type: StatusType::Error,
                message: message.into(),
            },
        }
    }

    pub fn is_error(&self) -> bool {
        self.status.status_type == StatusType::Error
    }
}

/// LOGONUSER carries the credentials inline.
#[derive(Debug, Clone, Deserialize)]
pub struct LogonPayload {
    #[serde(rename = "userName")]
    pub username: String,
    #[serde(rename = "pwd")]
    pub password: String,
}

/// GETBUNDLE names one bundle by its (session, name) identity.
#[derive(Debug, Clone, Deserialize)]
pub struct GetBundlePayload {
    pub name: String,
    pub session: String,
}

/// A base64-tagged binary payload, both directions.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EncodedFile {
    #[serde(rename = "ssffTrackName", skip_serializing_if = "Option::is_none")]
    pub ssff_track_name: Option<String>,
    #[serde(rename = "fileExtension", skip_serializing_if = "Option::is_none", default)]
    pub file_extension: Option<String>,
    pub encoding: String,
    pub data: String,
}

/// SAVEBUNDLE wraps the bundle under a `data` key.
#[derive(Debug, Clone, Deserialize)]
pub struct SaveBundlePayload {
    pub data: SaveBundleData,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SaveBundleData {
    pub session: String,
    pub annotation: Value,
    #[serde(rename = "ssffFiles", default)]
    pub ssff_files: Vec<EncodedFile>,
    #[serde(rename = "finishedEditing", default)]
    pub finished_editing: bool,
    #[serde(default)]
    pub comment: String,
}

impl SaveBundleData {
    /// The bundle name is taken from the annotation object itself.
    pub fn bundle_name(&self) -> Option<&str> {
        self.annotation.get("name").and_then(Value::as_str)
    }
}
