//! Per-database handler overrides.
//!
//! A database may ship a `<db>_serverPlugins.json` descriptor naming built-in
//! plugin wrappers. The descriptor is read once at connection resolution; a
//! malformed descriptor or an unknown plugin name is fatal to the connection,
//! because a half-applied override set must never run.

use crate::handlers::{DefaultHandlers, HandlerSet};
use crate::message::{GetBundlePayload, LogonPayload, SaveBundlePayload};
use crate::session::Session;
use async_trait::async_trait;
use emuprot_core::{paths, EmuError, EmuResult};
use serde::Deserialize;
use serde_json::{json, Value};
use std::path::Path;
use std::sync::Arc;
use tracing::info;

#[derive(Debug, Deserialize)]
struct PluginDescriptor {
    plugins: Vec<String>,
}

/// Resolve the handler set for one database, applying plugin wrappers in
/// descriptor order (later entries wrap earlier ones).
pub async fn resolve_handlers(db_dir: &Path, database: &str) -> EmuResult<Arc<dyn HandlerSet>> {
    let descriptor_path = paths::database_plugin_config_file(db_dir, database);
    let raw = match tokio::fs::read(&descriptor_path).await {
        Ok(raw) => raw,
        // No descriptor means no overrides.
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            return Ok(Arc::new(DefaultHandlers));
        }
        Err(e) => return Err(e.into()),
    };

    let descriptor: PluginDescriptor = serde_json::from_slice(&raw).map_err(|_| {
        EmuError::Internal(format!("malformed plugin descriptor for database {database}"))
    })?;

    let mut handlers: Arc<dyn HandlerSet> = Arc::new(DefaultHandlers);
    for name in &descriptor.plugins {
        handlers = match name.as_str() {
            "read-only-access" => Arc::new(ReadOnlyAccess::new(handlers)),
            other => {
                return Err(EmuError::Internal(format!(
                    "unknown plugin {other} for database {database}"
                )));
            }
        };
        info!(database, plugin = %name, "applied plugin override");
    }
    Ok(handlers)
}

/// Token-only, read-only browsing.
///
/// Overrides the user-management handshake to require a valid secure token,
/// disables the web-app's save button in the delivered configuration, and
/// rejects every writing command outright.
pub struct ReadOnlyAccess {
    inner: Arc<dyn HandlerSet>,
}

impl ReadOnlyAccess {
    pub fn new(inner: Arc<dyn HandlerSet>) -> Self {
        Self { inner }
    }
}

#[async_trait]
impl HandlerSet for ReadOnlyAccess {
    async fn get_protocol(&self, session: &Session) -> EmuResult<Value> {
        self.inner.get_protocol(session).await
    }

    async fn get_do_user_management(&self, session: &Session) -> EmuResult<Value> {
        let token = session
            .ctx
            .secure_token
            .as_deref()
            .ok_or(EmuError::Authorization)?;
        match session.env.identifier.identify(token).await? {
            Some(user) => {
                session.set_identity(user, None).await;
                Ok(json!("NO"))
            }
            None => Err(EmuError::Authorization),
        }
    }

    async fn logon_user(&self, _session: &Session, _payload: LogonPayload) -> EmuResult<Value> {
        Err(EmuError::Authorization)
    }

    async fn get_global_db_config(&self, session: &Session) -> EmuResult<Value> {
        let mut config = self.inner.get_global_db_config(session).await?;
        let buttons = config
            .pointer_mut("/EMUwebAppConfig")
            .and_then(|webapp| {
                let obj = webapp.as_object_mut()?;
                Some(
                    obj.entry("activeButtons")
                        .or_insert_with(|| json!({})),
                )
            })
            .and_then(Value::as_object_mut);
        match buttons {
            Some(buttons) => {
                buttons.insert("saveBundle".to_string(), json!(false));
                Ok(config)
            }
            None => Err(EmuError::InvalidDbConfig {
                project: session.ctx.project.clone(),
                database: session.ctx.database.clone(),
            }),
        }
    }

    async fn get_bundle_list(&self, session: &Session) -> EmuResult<Value> {
        self.inner.get_bundle_list(session).await
    }

    async fn get_bundle(&self, session: &Session, payload: GetBundlePayload) -> EmuResult<Value> {
        self.inner.get_bundle(session, payload).await
    }

    async fn save_bundle(
        &self,
        _session: &Session,
        _payload: SaveBundlePayload,
    ) -> EmuResult<Option<Value>> {
        Err(EmuError::Authorization)
    }

    async fn disconnect_warning(&self, session: &Session) -> EmuResult<Option<Value>> {
        self.inner.disconnect_warning(session).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn missing_descriptor_yields_defaults() {
        let temp = TempDir::new().unwrap();
        assert!(resolve_handlers(temp.path(), "ae").await.is_ok());
    }

    #[tokio::test]
    async fn malformed_descriptor_is_fatal() {
        let temp = TempDir::new().unwrap();
        std::fs::write(temp.path().join("ae_serverPlugins.json"), b"{not json").unwrap();
        let err = resolve_handlers(temp.path(), "ae").await.unwrap_err();
        assert!(!err.visible_to_client());
    }

    #[tokio::test]
    async fn unknown_plugin_name_is_fatal() {
        let temp = TempDir::new().unwrap();
        std::fs::write(
            temp.path().join("ae_serverPlugins.json"),
            br#"{"plugins": ["does-not-exist"]}"#,
        )
        .unwrap();
        assert!(resolve_handlers(temp.path(), "ae").await.is_err());
    }

    #[tokio::test]
    async fn read_only_access_is_resolvable() {
        let temp = TempDir::new().unwrap();
        std::fs::write(
            temp.path().join("ae_serverPlugins.json"),
            br#"{"plugins": ["read-only-access"]}"#,
        )
        .unwrap();
        assert!(resolve_handlers(temp.path(), "ae").await.is_ok());
    }
}
