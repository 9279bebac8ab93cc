//! Database-level mutations: rename and configuration changes.
//!
//! Both run under the whole-project lock. A rename restructures the project
//! directory, and the configuration rewrite shares the lock level so the two
//! can never interleave.

use crate::dispatch::ManagerEnv;
use crate::handlers::commit_author;
use emuprot_core::auth::User;
use emuprot_core::{paths, EmuError, EmuResult, GitService};
use serde_json::{json, Value};
use tracing::info;

fn invalid_config(project: &str, database: &str) -> EmuError {
    EmuError::InvalidDbConfig {
        project: project.to_string(),
        database: database.to_string(),
    }
}

/// Rename a database directory and its configuration file in one commit.
pub async fn rename_database(
    env: &ManagerEnv,
    user: &User,
    project: &str,
    old_name: &str,
    new_name: &str,
) -> EmuResult<Value> {
    let lock_id = env.locks.lock_project(project).await?;
    let result = rename_inner(env, user, project, old_name, new_name).await;
    let unlocked = env.locks.unlock_project(project, lock_id);
    result?;
    unlocked?;

    info!(project, from = old_name, to = new_name, "renamed database");
    Ok(Value::Null)
}

async fn rename_inner(
    env: &ManagerEnv,
    user: &User,
    project: &str,
    old_name: &str,
    new_name: &str,
) -> EmuResult<()> {
    let data_dir = env.config.data_dir();
    let old_dir = paths::database_dir(data_dir, project, old_name);
    let new_dir = paths::database_dir(data_dir, project, new_name);

    if !old_dir.is_dir() {
        return Err(EmuError::NoDatabase {
            project: project.to_string(),
            database: old_name.to_string(),
        });
    }
    if new_dir.exists() {
        return Err(EmuError::DatabaseExists {
            project: project.to_string(),
            database: new_name.to_string(),
        });
    }

    // The config file must exist, parse, and agree on the database name
    // before anything is touched.
    let old_config_path = paths::database_config_file(data_dir, project, old_name);
    let raw = tokio::fs::read(&old_config_path)
        .await
        .map_err(|_| invalid_config(project, old_name))?;
    let mut config: Value =
        serde_json::from_slice(&raw).map_err(|_| invalid_config(project, old_name))?;
    if config.get("name").and_then(Value::as_str) != Some(old_name) {
        return Err(invalid_config(project, old_name));
    }

    let old_config_rel = paths::database_config_file_relative(old_name);
    let new_config_rel = paths::database_config_file_relative(new_name);
    GitService::open(&old_dir)?.require_tracked(&old_config_rel)?;

    tokio::fs::remove_file(&old_config_path).await?;
    tokio::fs::rename(&old_dir, &new_dir).await?;

    config["name"] = Value::String(new_name.to_string());
    tokio::fs::write(
        new_dir.join(&new_config_rel),
        serde_json::to_vec_pretty(&config)?,
    )
    .await?;

    // The repository moved with the directory; reopen it there.
    let git = GitService::open(&new_dir)?;
    git.stage_removal(&old_config_rel)?;
    git.stage(&new_config_rel)?;
    git.commit_staged(
        &commit_author(user),
        &format!("Renamed database ({old_name} -> {new_name})"),
    )?;
    Ok(())
}

/// Update the web-app restrictions in the database configuration.
///
/// Only `EMUwebAppConfig.restrictions.{bundleComments, bundleFinishedEditing}`
/// are written; everything else in the file is carried over untouched.
pub async fn set_database_configuration(
    env: &ManagerEnv,
    user: &User,
    project: &str,
    database: &str,
    bundle_comments: bool,
    bundle_finished_editing: bool,
) -> EmuResult<Value> {
    let lock_id = env.locks.lock_project(project).await?;
    let result = configure_inner(
        env,
        user,
        project,
        database,
        bundle_comments,
        bundle_finished_editing,
    )
    .await;
    let unlocked = env.locks.unlock_project(project, lock_id);
    result?;
    unlocked?;

    info!(project, database, "updated database configuration");
    Ok(Value::Null)
}

async fn configure_inner(
    env: &ManagerEnv,
    user: &User,
    project: &str,
    database: &str,
    bundle_comments: bool,
    bundle_finished_editing: bool,
) -> EmuResult<()> {
    let db_dir = paths::database_dir(env.config.data_dir(), project, database);
    if !db_dir.is_dir() {
        return Err(EmuError::NoDatabase {
            project: project.to_string(),
            database: database.to_string(),
        });
    }

    let git = GitService::open(&db_dir)?;
    let config_rel = paths::database_config_file_relative(database);
    git.require_tracked(&config_rel)?;

    let config_path = db_dir.join(&config_rel);
    let raw = tokio::fs::read(&config_path)
        .await
        .map_err(|_| invalid_config(project, database))?;
    let mut config: Value =
        serde_json::from_slice(&raw).map_err(|_| invalid_config(project, database))?;

    {
        let root = config
            .as_object_mut()
            .ok_or_else(|| invalid_config(project, database))?;
        let webapp = root
            .entry("EMUwebAppConfig")
            .or_insert_with(|| json!({}))
            .as_object_mut()
            .ok_or_else(|| invalid_config(project, database))?;
        let restrictions = webapp
            .entry("restrictions")
            .or_insert_with(|| json!({}))
            .as_object_mut()
            .ok_or_else(|| invalid_config(project, database))?;
        restrictions.insert("bundleComments".to_string(), json!(bundle_comments));
        restrictions.insert(
            "bundleFinishedEditing".to_string(),
            json!(bundle_finished_editing),
        );
    }

    tokio::fs::write(&config_path, serde_json::to_vec_pretty(&config)?).await?;
    git.stage(&config_rel)?;
    git.commit_staged(
        &commit_author(user),
        "Updated database configuration (bundleComment/bundleFinishedEditing)",
    )?;
    Ok(())
}
