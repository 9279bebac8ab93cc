//! The default handler set: one method per protocol command.
//!
//! Plugins override a subset of these by wrapping the default set (see
//! [`crate::plugins`]); the capability table is resolved once at connection
//! resolution time and never mutated afterwards.

use crate::message::{
    EncodedFile, GetBundlePayload, LogonPayload, SaveBundlePayload, PROTOCOL_NAME,
    PROTOCOL_VERSION,
};
use crate::session::Session;
use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use emuprot_core::model::BundleListItem;
use emuprot_core::{bundle_list, paths, CommitAuthor, DbConfig, EmuError, EmuResult, GitService};
use serde_json::{json, Value};
use tracing::{info, warn};

#[async_trait]
pub trait HandlerSet: Send + Sync {
    async fn get_protocol(&self, session: &Session) -> EmuResult<Value>;
    async fn get_do_user_management(&self, session: &Session) -> EmuResult<Value>;
    async fn logon_user(&self, session: &Session, payload: LogonPayload) -> EmuResult<Value>;
    async fn get_global_db_config(&self, session: &Session) -> EmuResult<Value>;
    async fn get_bundle_list(&self, session: &Session) -> EmuResult<Value>;
    async fn get_bundle(&self, session: &Session, payload: GetBundlePayload) -> EmuResult<Value>;
    async fn save_bundle(
        &self,
        session: &Session,
        payload: SaveBundlePayload,
    ) -> EmuResult<Option<Value>>;
    async fn disconnect_warning(&self, session: &Session) -> EmuResult<Option<Value>>;
}

impl std::fmt::Debug for dyn HandlerSet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("HandlerSet")
    }
}

pub struct DefaultHandlers;

#[async_trait]
impl HandlerSet for DefaultHandlers {
    async fn get_protocol(&self, _session: &Session) -> EmuResult<Value> {
        Ok(json!({
            "protocol": PROTOCOL_NAME,
            "version": PROTOCOL_VERSION,
        }))
    }

    /// `YES` asks the client to collect credentials; `NO` means the secure
    /// token in the connection URL already identified the user.
    ///
    /// Any token failure falls back to `YES` for compatibility with deployed
    /// clients that treat the token as best-effort.
    async fn get_do_user_management(&self, session: &Session) -> EmuResult<Value> {
        if let Some(token) = &session.ctx.secure_token {
            match session.env.identifier.identify(token).await {
                Ok(Some(user)) => {
                    let list = load_bundle_list(session, &user.username).await?;
                    session.set_identity(user, list).await;
                    return Ok(json!("NO"));
                }
                Ok(None) => {
                    warn!(
                        connection = %session.ctx.connection_id,
                        "secure token did not identify a user, asking for credentials"
                    );
                }
                Err(err) => {
                    warn!(
                        connection = %session.ctx.connection_id,
                        %err,
                        "token identification failed, asking for credentials"
                    );
                }
            }
        }
        Ok(json!("YES"))
    }

    /// Reply strings travel as SUCCESS-status data; the status channel is
    /// reserved for transport-level failures.
    async fn logon_user(&self, session: &Session, payload: LogonPayload) -> EmuResult<Value> {
        let list = match bundle_list::read(
            session.env.config.data_dir(),
            &session.ctx.project,
            &session.ctx.database,
            None,
            &payload.username,
        )
        .await
        {
            Ok(items) => items,
            Err(EmuError::NoBundleList { .. }) => return Ok(json!("BADUSERNAME")),
            Err(e) => return Err(e),
        };

        match session
            .env
            .authenticator
            .authenticate(&payload.username, &payload.password)
            .await?
        {
            Some(user) => {
                info!(
                    connection = %session.ctx.connection_id,
                    user = %user.username,
                    "logon succeeded"
                );
                session.set_identity(user, Some(list)).await;
                Ok(json!("LOGGEDON"))
            }
            None => Ok(json!("Can't authenticate with given credentials")),
        }
    }

    async fn get_global_db_config(&self, session: &Session) -> EmuResult<Value> {
        let cfg = read_db_config(session).await?;
        Ok(serde_json::to_value(&cfg)?)
    }

    async fn get_bundle_list(&self, session: &Session) -> EmuResult<Value> {
        let state = session.state.read().await;
        let items = state.bundle_list.as_deref().unwrap_or(&[]);
        let visible =
            bundle_list::visible_entries(items, session.env.config.filter_finished_bundles());
        Ok(serde_json::to_value(visible)?)
    }

    /// Reads media, annotation and the web-app-relevant SSFF tracks of one
    /// bundle, base64-encoding the binary payloads.
    async fn get_bundle(&self, session: &Session, payload: GetBundlePayload) -> EmuResult<Value> {
        let cfg = read_db_config(session).await?;
        let db_dir = &session.ctx.db_dir;
        require_bundle(session, &payload.session, &payload.name)?;

        let media_path = paths::bundle_track_file(
            db_dir,
            &payload.session,
            &payload.name,
            &cfg.mediafile_extension,
        );
        let media = tokio::fs::read(&media_path)
            .await
            .map_err(|e| missing_as_user_input(e, &payload.session, &payload.name))?;

        let annot_path = paths::annotation_file(db_dir, &payload.session, &payload.name);
        let annot_raw = tokio::fs::read(&annot_path)
            .await
            .map_err(|e| missing_as_user_input(e, &payload.session, &payload.name))?;
        let annotation: Value = serde_json::from_slice(&annot_raw)?;

        let mut ssff_files = Vec::new();
        for track in cfg.tracks_needed_by_web_app() {
            let track_path = paths::bundle_track_file(
                db_dir,
                &payload.session,
                &payload.name,
                &track.file_extension,
            );
            match tokio::fs::read(&track_path).await {
                Ok(bytes) => ssff_files.push(EncodedFile {
                    ssff_track_name: Some(track.name.clone()),
                    file_extension: None,
                    encoding: "BASE64".to_string(),
                    data: BASE64.encode(bytes),
                }),
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                    warn!(
                        bundle = %payload.name,
                        track = %track.name,
                        "track file missing, omitting from bundle"
                    );
                }
                Err(e) => return Err(e.into()),
            }
        }

        Ok(json!({
            "mediaFile": {"encoding": "BASE64", "data": BASE64.encode(media)},
            "ssffFiles": ssff_files,
            "annotation": annotation,
        }))
    }

    /// The lock-mutate-commit pipeline: find-or-fail bundle-list update,
    /// annotation and track writes, stage, commit, unlock on every path.
    async fn save_bundle(
        &self,
        session: &Session,
        payload: SaveBundlePayload,
    ) -> EmuResult<Option<Value>> {
        let data = payload.data;
        let name = data
            .bundle_name()
            .ok_or_else(|| EmuError::UserInput("annotation is missing its name".to_string()))?
            .to_string();
        let author = commit_author(session).await?;

        let lock_id = session
            .env
            .locks
            .lock_database(&session.ctx.project, &session.ctx.database)
            .await?;
        let result = save_bundle_inner(session, &author, &data, &name).await;
        let unlocked = session.env.locks.unlock_database(
            &session.ctx.project,
            &session.ctx.database,
            lock_id,
        );
        result?;
        unlocked?;
        Ok(None)
    }

    async fn disconnect_warning(&self, _session: &Session) -> EmuResult<Option<Value>> {
        Ok(None)
    }
}

async fn read_db_config(session: &Session) -> EmuResult<DbConfig> {
    DbConfig::read(
        &session.ctx.db_dir,
        &session.ctx.project,
        &session.ctx.database,
    )
    .await
}

async fn load_bundle_list(
    session: &Session,
    username: &str,
) -> EmuResult<Option<Vec<BundleListItem>>> {
    match bundle_list::read(
        session.env.config.data_dir(),
        &session.ctx.project,
        &session.ctx.database,
        None,
        username,
    )
    .await
    {
        Ok(items) => Ok(Some(items)),
        Err(EmuError::NoBundleList { .. }) => Ok(None),
        Err(e) => Err(e),
    }
}

fn require_bundle(session: &Session, ses: &str, name: &str) -> EmuResult<()> {
    if paths::bundle_dir(&session.ctx.db_dir, ses, name).is_dir() {
        Ok(())
    } else {
        Err(no_such_bundle(ses, name))
    }
}

fn no_such_bundle(session: &str, name: &str) -> EmuError {
    EmuError::UserInput(format!("no bundle {name} in session {session}"))
}

fn missing_as_user_input(e: std::io::Error, session: &str, name: &str) -> EmuError {
    if e.kind() == std::io::ErrorKind::NotFound {
        no_such_bundle(session, name)
    } else {
        e.into()
    }
}

async fn commit_author(session: &Session) -> EmuResult<CommitAuthor> {
    let state = session.state.read().await;
    let user = state.user.as_ref().ok_or(EmuError::Authorization)?;
    let email = if user.email.is_empty() {
        format!("{}@localhost", user.username)
    } else {
        user.email.clone()
    };
    Ok(CommitAuthor {
        name: user.username.clone(),
        email,
    })
}

async fn save_bundle_inner(
    session: &Session,
    author: &CommitAuthor,
    data: &crate::message::SaveBundleData,
    name: &str,
) -> EmuResult<()> {
    let env = &session.env;
    let ctx = &session.ctx;
    require_bundle(session, &data.session, name)?;

    // Find-or-fail update of the caller's bundle list entry.
    let mut items = {
        let state = session.state.read().await;
        state
            .bundle_list
            .clone()
            .ok_or_else(|| EmuError::NoBundleList {
                project: ctx.project.clone(),
                database: ctx.database.clone(),
                bundle_list: author.name.clone(),
                archive_label: None,
            })?
    };
    bundle_list::update_entry(
        &mut items,
        BundleListItem {
            name: name.to_string(),
            session: data.session.clone(),
            finished_editing: data.finished_editing,
            comment: data.comment.clone(),
        },
    )?;
    bundle_list::write(
        env.config.data_dir(),
        &ctx.project,
        &ctx.database,
        None,
        &author.name,
        &items,
    )
    .await?;

    // Annotation JSON.
    let annot_rel = paths::annotation_file_relative(&data.session, name);
    let annot_json = serde_json::to_vec_pretty(&data.annotation)?;
    tokio::fs::write(ctx.db_dir.join(&annot_rel), annot_json).await?;

    // SSFF tracks declared for this database; undeclared uploads are dropped.
    let cfg = read_db_config(session).await?;
    let mut track_rels = Vec::new();
    for file in &data.ssff_files {
        let def = cfg.ssff_track_definitions.iter().find(|def| {
            file.ssff_track_name.as_deref() == Some(def.name.as_str())
                || file.file_extension.as_deref() == Some(def.file_extension.as_str())
        });
        let Some(def) = def else {
            warn!(bundle = %name, "ignoring track not declared for this database");
            continue;
        };
        let bytes = BASE64
            .decode(&file.data)
            .map_err(|e| EmuError::UserInput(format!("invalid base64 track data: {e}")))?;
        let rel = paths::bundle_track_file_relative(&data.session, name, &def.file_extension);
        tokio::fs::write(ctx.db_dir.join(&rel), bytes).await?;
        track_rels.push(rel);
    }

    // Stage everything this save touched and commit in one step.
    let git = GitService::open(&ctx.db_dir)?;
    git.stage(&annot_rel)?;
    for rel in &track_rels {
        git.stage(rel)?;
    }
    git.stage(&paths::bundle_list_file_relative(None, &author.name))?;
    git.commit_staged(
        author,
        &format!(
            "EMU-webApp auto save commit; user: {}; DB: {}; bundle: {}",
            author.name, ctx.database, name
        ),
    )?;

    session.state.write().await.bundle_list = Some(items);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::{dispatch as reply_to, resolve_database, ConnectionContext, ServerEnv, Session};
    use emuprot_core::auth::StaticDirectory;
    use emuprot_core::{LockManager, ServerConfig};
    use std::fs;
    use std::io::Write as _;
    use std::sync::Arc;
    use tempfile::TempDir;
    use uuid::Uuid;

    fn build_fixture(temp: &TempDir) -> ServerConfig {
        let db_dir = paths::database_dir(temp.path(), "demo", "ae");
        fs::create_dir_all(db_dir.join("0000_ses/msajc003_bndl")).unwrap();
        fs::create_dir_all(db_dir.join("bundleLists")).unwrap();

        fs::write(
            db_dir.join("ae_DBconfig.json"),
            serde_json::to_vec_pretty(&serde_json::json!({
                "name": "ae",
                "mediafileExtension": "wav",
                "ssffTrackDefinitions": [
                    {"name": "FORMANTS", "columnName": "fm", "fileExtension": "fms"}
                ],
                "levelDefinitions": [],
                "EMUwebAppConfig": {
                    "perspectives": [{
                        "signalCanvases": {
                            "order": ["OSCI", "SPECTO"],
                            "assign": [{"signalCanvasName": "SPECTO", "ssffTrackName": "FORMANTS"}]
                        },
                        "twoDimCanvases": {"twoDimDrawingDefinitions": []}
                    }]
                }
            }))
            .unwrap(),
        )
        .unwrap();
        fs::write(
            db_dir.join("0000_ses/msajc003_bndl/msajc003_annot.json"),
            r#"{"name": "msajc003", "annotates": "msajc003.wav", "levels": []}"#,
        )
        .unwrap();
        fs::write(db_dir.join("0000_ses/msajc003_bndl/msajc003.wav"), b"RIFF").unwrap();
        fs::write(db_dir.join("0000_ses/msajc003_bndl/msajc003.fms"), b"SSFF").unwrap();
        fs::write(
            db_dir.join("bundleLists/alice_bundleList.json"),
            r#"[{"name": "msajc003", "session": "0000"}]"#,
        )
        .unwrap();

        let git = GitService::init(&db_dir).unwrap();
        git.commit_all(
            &CommitAuthor {
                name: "setup".into(),
                email: "setup@example.com".into(),
            },
            "initial import",
        )
        .unwrap();

        ServerConfig::new(temp.path()).unwrap()
    }

    async fn build_session(config: ServerConfig, secure_token: Option<&str>) -> Session {
        let mut auth_file = tempfile::NamedTempFile::new().unwrap();
        write!(
            auth_file,
            r#"{{"users": [{{
                "username": "alice", "email": "alice@example.com",
                "password": "s3cret", "tokens": ["deadbeef"],
                "projects": {{"demo": "readWrite"}}
            }}]}}"#
        )
        .unwrap();
        let directory = Arc::new(StaticDirectory::load(auth_file.path()).await.unwrap());

        let locks = LockManager::new(&config);
        let (project, database, db_dir) = resolve_database(&config, "/demo/ae").unwrap();
        let env = Arc::new(ServerEnv {
            config,
            locks,
            authenticator: directory.clone(),
            identifier: directory,
        });
        Session::new(
            env,
            ConnectionContext {
                connection_id: Uuid::new_v4(),
                project,
                database,
                db_dir,
                secure_token: secure_token.map(str::to_string),
            },
        )
    }

    async fn logon(session: &Session) {
        let reply = reply_to(
            session,
            &DefaultHandlers,
            r#"{"type":"LOGONUSER","callbackID":"1","userName":"alice","pwd":"s3cret"}"#,
        )
        .await;
        assert_eq!(reply.data, Some(serde_json::json!("LOGGEDON")));
    }

    #[tokio::test]
    async fn commands_are_gated_until_logon() {
        let temp = TempDir::new().unwrap();
        let session = build_session(build_fixture(&temp), None).await;

        let reply = reply_to(
            &session,
            &DefaultHandlers,
            r#"{"type":"GETBUNDLE","callbackID":"9","name":"msajc003","session":"0000"}"#,
        )
        .await;
        assert!(reply.is_error());
        assert_eq!(reply.callback_id, "9");

        logon(&session).await;
        let reply = reply_to(
            &session,
            &DefaultHandlers,
            r#"{"type":"GETBUNDLE","callbackID":"10","name":"msajc003","session":"0000"}"#,
        )
        .await;
        assert!(!reply.is_error());
    }

    #[tokio::test]
    async fn logon_distinguishes_bad_username_from_bad_password() {
        let temp = TempDir::new().unwrap();
        let session = build_session(build_fixture(&temp), None).await;

        let reply = reply_to(
            &session,
            &DefaultHandlers,
            r#"{"type":"LOGONUSER","callbackID":"1","userName":"nobody","pwd":"x"}"#,
        )
        .await;
        assert_eq!(reply.data, Some(serde_json::json!("BADUSERNAME")));
        assert!(!reply.is_error());

        let reply = reply_to(
            &session,
            &DefaultHandlers,
            r#"{"type":"LOGONUSER","callbackID":"2","userName":"alice","pwd":"wrong"}"#,
        )
        .await;
        assert!(!reply.is_error());
        assert_ne!(reply.data, Some(serde_json::json!("LOGGEDON")));
        assert!(!session.authorized().await);
    }

    #[tokio::test]
    async fn secure_token_skips_user_management() {
        let temp = TempDir::new().unwrap();
        let session = build_session(build_fixture(&temp), Some("deadbeef")).await;

        let reply = reply_to(
            &session,
            &DefaultHandlers,
            r#"{"type":"GETDOUSERMANAGEMENT","callbackID":"1"}"#,
        )
        .await;
        assert_eq!(reply.data, Some(serde_json::json!("NO")));
        assert!(session.authorized().await);
    }

    #[tokio::test]
    async fn unknown_token_falls_back_to_credentials() {
        let temp = TempDir::new().unwrap();
        let session = build_session(build_fixture(&temp), Some("feedface")).await;

        let reply = reply_to(
            &session,
            &DefaultHandlers,
            r#"{"type":"GETDOUSERMANAGEMENT","callbackID":"1"}"#,
        )
        .await;
        assert_eq!(reply.data, Some(serde_json::json!("YES")));
        assert!(!session.authorized().await);
    }

    #[tokio::test]
    async fn get_bundle_returns_base64_payloads() {
        let temp = TempDir::new().unwrap();
        let session = build_session(build_fixture(&temp), None).await;
        logon(&session).await;

        let reply = reply_to(
            &session,
            &DefaultHandlers,
            r#"{"type":"GETBUNDLE","callbackID":"5","name":"msajc003","session":"0000"}"#,
        )
        .await;
        let data = reply.data.unwrap();
        assert_eq!(data["mediaFile"]["encoding"], "BASE64");
        assert_eq!(
            BASE64.decode(data["mediaFile"]["data"].as_str().unwrap()).unwrap(),
            b"RIFF"
        );
        assert_eq!(data["annotation"]["name"], "msajc003");
        assert_eq!(data["ssffFiles"][0]["ssffTrackName"], "FORMANTS");
        assert_eq!(
            BASE64
                .decode(data["ssffFiles"][0]["data"].as_str().unwrap())
                .unwrap(),
            b"SSFF"
        );
    }

    #[tokio::test]
    async fn save_then_reload_hides_finished_bundle_and_commits() {
        let temp = TempDir::new().unwrap();
        let config = build_fixture(&temp);
        let db_dir = paths::database_dir(temp.path(), "demo", "ae");
        let session = build_session(config, None).await;
        logon(&session).await;

        let save = serde_json::json!({
            "type": "SAVEBUNDLE",
            "callbackID": "20",
            "data": {
                "session": "0000",
                "annotation": {"name": "msajc003", "levels": [{"name": "Phonetic"}]},
                "ssffFiles": [{"fileExtension": "fms", "encoding": "BASE64",
                               "data": BASE64.encode(b"NEWSSFF")}],
                "finishedEditing": true,
                "comment": "ok"
            }
        });
        let reply = reply_to(&session, &DefaultHandlers, &save.to_string()).await;
        assert!(!reply.is_error(), "{:?}", reply.status.message);

        // Finished bundles disappear from the filtered list.
        let reply = reply_to(
            &session,
            &DefaultHandlers,
            r#"{"type":"GETBUNDLELIST","callbackID":"21"}"#,
        )
        .await;
        let list = reply.data.unwrap();
        assert_eq!(list.as_array().unwrap().len(), 0);

        // The annotation on disk reflects the save.
        let annot: Value = serde_json::from_slice(
            &fs::read(db_dir.join("0000_ses/msajc003_bndl/msajc003_annot.json")).unwrap(),
        )
        .unwrap();
        assert_eq!(annot["levels"][0]["name"], "Phonetic");
        assert_eq!(
            fs::read(db_dir.join("0000_ses/msajc003_bndl/msajc003.fms")).unwrap(),
            b"NEWSSFF"
        );

        // And a commit exists naming the bundle.
        let git = GitService::open(&db_dir).unwrap();
        let log = git.log().unwrap();
        assert!(log[0].message.contains("msajc003"));
        assert_eq!(log.len(), 2);
    }

    #[tokio::test]
    async fn saving_twice_is_idempotent_on_disk() {
        let temp = TempDir::new().unwrap();
        let config = build_fixture(&temp);
        let db_dir = paths::database_dir(temp.path(), "demo", "ae");
        let session = build_session(config, None).await;
        logon(&session).await;

        let save = serde_json::json!({
            "type": "SAVEBUNDLE",
            "callbackID": "1",
            "data": {
                "session": "0000",
                "annotation": {"name": "msajc003", "levels": []},
                "finishedEditing": false,
                "comment": ""
            }
        })
        .to_string();

        let first = reply_to(&session, &DefaultHandlers, &save).await;
        assert!(!first.is_error());
        let after_first =
            fs::read(db_dir.join("0000_ses/msajc003_bndl/msajc003_annot.json")).unwrap();

        let second = reply_to(&session, &DefaultHandlers, &save).await;
        assert!(!second.is_error());
        let after_second =
            fs::read(db_dir.join("0000_ses/msajc003_bndl/msajc003_annot.json")).unwrap();

        assert_eq!(after_first, after_second);
        let git = GitService::open(&db_dir).unwrap();
        assert_eq!(git.log().unwrap().len(), 3);
    }

    #[tokio::test]
    async fn save_of_unlisted_bundle_is_rejected_without_changes() {
        let temp = TempDir::new().unwrap();
        let config = build_fixture(&temp);
        let db_dir = paths::database_dir(temp.path(), "demo", "ae");
        fs::create_dir_all(db_dir.join("0000_ses/stranger_bndl")).unwrap();
        let session = build_session(config, None).await;
        logon(&session).await;

        let save = serde_json::json!({
            "type": "SAVEBUNDLE",
            "callbackID": "1",
            "data": {
                "session": "0000",
                "annotation": {"name": "stranger", "levels": []}
            }
        });
        let reply = reply_to(&session, &DefaultHandlers, &save.to_string()).await;
        assert!(reply.is_error());

        let git = GitService::open(&db_dir).unwrap();
        assert_eq!(git.log().unwrap().len(), 1);

        // The lock was released on the failure path.
        session
            .env
            .locks
            .lock_database("demo", "ae")
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn unknown_message_type_names_the_offender() {
        let temp = TempDir::new().unwrap();
        let session = build_session(build_fixture(&temp), None).await;
        logon(&session).await;

        let reply = reply_to(&session, &DefaultHandlers, r#"{"type":"FOO","callbackID":"x"}"#).await;
        assert!(reply.is_error());
        assert_eq!(reply.callback_id, "x");
        assert!(reply.status.message.contains("unknown"));
        assert!(reply.status.message.contains("FOO"));
    }

    #[tokio::test]
    async fn global_db_config_round_trips() {
        let temp = TempDir::new().unwrap();
        let session = build_session(build_fixture(&temp), None).await;
        logon(&session).await;

        let reply = reply_to(
            &session,
            &DefaultHandlers,
            r#"{"type":"GETGLOBALDBCONFIG","callbackID":"3"}"#,
        )
        .await;
        let data = reply.data.unwrap();
        assert_eq!(data["name"], "ae");
        assert_eq!(data["mediafileExtension"], "wav");
    }
}
