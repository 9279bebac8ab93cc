//! Version history queries: commit log, tag listing, tag creation.

use crate::dispatch::ManagerEnv;
use crate::handlers::commit_author;
use emuprot_core::auth::User;
use emuprot_core::{paths, traversal, EmuError, EmuResult, GitService};
use serde_json::Value;
use tracing::info;

const TAG_MESSAGE: &str = "Created by emuDB Manager";

async fn open_database(env: &ManagerEnv, project: &str, database: &str) -> EmuResult<GitService> {
    if !traversal::database_exists(&env.config, project, database).await {
        return Err(EmuError::NoDatabase {
            project: project.to_string(),
            database: database.to_string(),
        });
    }
    GitService::open(&paths::database_dir(env.config.data_dir(), project, database))
}

pub async fn list_commits(env: &ManagerEnv, project: &str, database: &str) -> EmuResult<Value> {
    let git = open_database(env, project, database).await?;
    Ok(serde_json::to_value(git.log()?)?)
}

pub async fn list_tags(env: &ManagerEnv, project: &str, database: &str) -> EmuResult<Value> {
    let git = open_database(env, project, database).await?;
    Ok(serde_json::to_value(git.tag_names()?)?)
}

/// Attach an annotated tag to an existing commit, under the database lock.
pub async fn add_tag(
    env: &ManagerEnv,
    user: &User,
    project: &str,
    database: &str,
    commit_id: &str,
    label: &str,
) -> EmuResult<Value> {
    let lock_id = env.locks.lock_database(project, database).await?;
    let result = async {
        let git = open_database(env, project, database).await?;
        git.create_tag(label, commit_id, &commit_author(user), TAG_MESSAGE)
    }
    .await;
    let unlocked = env.locks.unlock_database(project, database, lock_id);
    result?;
    unlocked?;

    info!(project, database, label, commit = commit_id, "created tag");
    Ok(Value::Null)
}
