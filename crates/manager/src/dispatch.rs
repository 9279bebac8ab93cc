//! The request pipeline: validate, authenticate, authorize, run.
//!
//! Every request passes the same four stages in order. A failure at any
//! stage short-circuits; handlers never see a request that has not cleared
//! all three checks before them.

use crate::handlers::{bundle_lists, database, history, project};
use crate::validate::{self, ValidatedRequest};
use emuprot_core::auth::{Authenticator, Authorizer, Identifier, PermissionLevel, User};
use emuprot_core::{EmuError, EmuResult, LockManager, ServerConfig};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::debug;

/// Shared dependencies of the manager API, constructed once at startup.
pub struct ManagerEnv {
    pub config: ServerConfig,
    pub locks: LockManager,
    pub authenticator: Arc<dyn Authenticator>,
    pub identifier: Arc<dyn Identifier>,
    pub authorizer: Arc<dyn Authorizer>,
}

/// Run one request end to end and return the `data` payload of its reply.
pub async fn handle_request(
    env: &ManagerEnv,
    fields: HashMap<String, String>,
) -> EmuResult<Value> {
    let request = validate::validate(fields)?;
    let user = authenticate(env, &request).await?;
    authorize(env, &user, &request).await?;
    debug!(query = request.query.name, user = %user.username, "running query");
    run_query(env, &user, &request).await
}

/// Resolve the request's credentials to a user. A token takes precedence
/// over username/password; both failing the same way keeps the reply free of
/// hints about which part was wrong.
async fn authenticate(env: &ManagerEnv, request: &ValidatedRequest) -> EmuResult<User> {
    if let Some(token) = &request.auth_token {
        return env
            .identifier
            .identify(token)
            .await?
            .ok_or(EmuError::Authentication);
    }
    match (&request.username, &request.password) {
        (Some(username), Some(password)) => env
            .authenticator
            .authenticate(username, password)
            .await?
            .ok_or(EmuError::Authentication),
        _ => Err(EmuError::Authentication),
    }
}

async fn authorize(env: &ManagerEnv, user: &User, request: &ValidatedRequest) -> EmuResult<()> {
    let Some(required) = request.query.required else {
        // Queries without a project scope only need authentication.
        return Ok(());
    };
    let project = request.text("project")?;
    let level = env
        .authorizer
        .permission(&user.username, project)
        .await?
        .ok_or(EmuError::Authorization)?;
    if required == PermissionLevel::ReadWrite && !level.allows_write() {
        return Err(EmuError::Authorization);
    }
    Ok(())
}

async fn run_query(env: &ManagerEnv, user: &User, request: &ValidatedRequest) -> EmuResult<Value> {
    match request.query.name {
        "projectInfo" => project::project_info(env, request.text("project")?).await,
        "listProjects" => project::list_projects(env, user).await,
        // Authentication and authorization already happened; there is
        // nothing left to do.
        "login" => Ok(Value::Null),
        "listCommits" => {
            history::list_commits(env, request.text("project")?, request.text("databaseName")?)
                .await
        }
        "listTags" => {
            history::list_tags(env, request.text("project")?, request.text("databaseName")?).await
        }
        "addTag" => {
            history::add_tag(
                env,
                user,
                request.text("project")?,
                request.text("databaseName")?,
                request.text("gitCommitID")?,
                request.text("gitTagLabel")?,
            )
            .await
        }
        "renameDatabase" => {
            database::rename_database(
                env,
                user,
                request.text("project")?,
                request.text("oldDatabaseName")?,
                request.text("newDatabaseName")?,
            )
            .await
        }
        "editBundleList" => {
            bundle_lists::edit_bundle_list(
                env,
                user,
                request.text("project")?,
                request.text("databaseName")?,
                request.optional_text("oldArchiveLabel")?,
                request.text("oldBundleListName")?,
                request.optional_text("newArchiveLabel")?,
                request.text("newBundleListName")?,
            )
            .await
        }
        "deleteBundleList" => {
            bundle_lists::delete_bundle_list(
                env,
                user,
                request.text("project")?,
                request.text("databaseName")?,
                request.optional_text("archiveLabel")?,
                request.text("bundleListName")?,
            )
            .await
        }
        "setDatabaseConfiguration" => {
            database::set_database_configuration(
                env,
                user,
                request.text("project")?,
                request.text("databaseName")?,
                request.flag("bundleComments")?,
                request.flag("bundleFinishedEditing")?,
            )
            .await
        }
        other => Err(EmuError::Internal(format!("no handler for query {other}"))),
    }
}
