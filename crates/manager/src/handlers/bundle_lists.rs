//! Bundle-list administration: moving lists between editors or archive
//! labels, and deleting them. Both run under the database lock.

use crate::dispatch::ManagerEnv;
use crate::handlers::commit_author;
use emuprot_core::auth::User;
use emuprot_core::{paths, traversal, EmuError, EmuResult, GitService};
use serde_json::Value;
use tracing::info;

async fn require_database(env: &ManagerEnv, project: &str, database: &str) -> EmuResult<()> {
    if traversal::database_exists(&env.config, project, database).await {
        Ok(())
    } else {
        Err(EmuError::NoDatabase {
            project: project.to_string(),
            database: database.to_string(),
        })
    }
}

fn no_bundle_list(
    project: &str,
    database: &str,
    name: &str,
    archive_label: Option<&str>,
) -> EmuError {
    EmuError::NoBundleList {
        project: project.to_string(),
        database: database.to_string(),
        bundle_list: name.to_string(),
        archive_label: archive_label.map(str::to_string),
    }
}

fn bundle_list_exists(
    project: &str,
    database: &str,
    name: &str,
    archive_label: Option<&str>,
) -> EmuError {
    EmuError::BundleListExists {
        project: project.to_string(),
        database: database.to_string(),
        bundle_list: name.to_string(),
        archive_label: archive_label.map(str::to_string),
    }
}

/// Move a bundle list to a new editor name and/or archive label.
#[allow(clippy::too_many_arguments)]
pub async fn edit_bundle_list(
    env: &ManagerEnv,
    user: &User,
    project: &str,
    database: &str,
    old_label: Option<&str>,
    old_name: &str,
    new_label: Option<&str>,
    new_name: &str,
) -> EmuResult<Value> {
    let lock_id = env.locks.lock_database(project, database).await?;
    let result = edit_inner(
        env, user, project, database, old_label, old_name, new_label, new_name,
    )
    .await;
    let unlocked = env.locks.unlock_database(project, database, lock_id);
    result?;
    unlocked?;

    info!(
        project,
        database,
        from = old_name,
        to = new_name,
        "moved bundle list"
    );
    Ok(Value::Null)
}

#[allow(clippy::too_many_arguments)]
async fn edit_inner(
    env: &ManagerEnv,
    user: &User,
    project: &str,
    database: &str,
    old_label: Option<&str>,
    old_name: &str,
    new_label: Option<&str>,
    new_name: &str,
) -> EmuResult<()> {
    require_database(env, project, database).await?;

    let data_dir = env.config.data_dir();
    let old_path = paths::bundle_list_file(data_dir, project, database, old_label, old_name);
    let new_path = paths::bundle_list_file(data_dir, project, database, new_label, new_name);
    if !old_path.is_file() {
        return Err(no_bundle_list(project, database, old_name, old_label));
    }
    if new_path.exists() {
        return Err(bundle_list_exists(project, database, new_name, new_label));
    }

    let db_dir = paths::database_dir(data_dir, project, database);
    let git = GitService::open(&db_dir)?;
    let old_rel = paths::bundle_list_file_relative(old_label, old_name);
    let new_rel = paths::bundle_list_file_relative(new_label, new_name);
    git.require_tracked(&old_rel)?;
    // The target must be free in the committed tree as well, not just on disk.
    if git.head_has_file(&new_rel)? {
        return Err(bundle_list_exists(project, database, new_name, new_label));
    }

    if let Some(parent) = new_path.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }
    tokio::fs::rename(&old_path, &new_path).await?;

    git.stage_removal(&old_rel)?;
    git.stage(&new_rel)?;
    git.commit_staged(
        &commit_author(user),
        "Changed editor and/or archive label of bundle list",
    )?;
    Ok(())
}

/// Delete a bundle list. The removal is committed first and the file
/// unlinked afterwards, so the history never points at a file that was lost
/// without a commit.
pub async fn delete_bundle_list(
    env: &ManagerEnv,
    user: &User,
    project: &str,
    database: &str,
    archive_label: Option<&str>,
    name: &str,
) -> EmuResult<Value> {
    let lock_id = env.locks.lock_database(project, database).await?;
    let result = delete_inner(env, user, project, database, archive_label, name).await;
    let unlocked = env.locks.unlock_database(project, database, lock_id);
    result?;
    unlocked?;

    info!(project, database, name, "deleted bundle list");
    Ok(Value::Null)
}

async fn delete_inner(
    env: &ManagerEnv,
    user: &User,
    project: &str,
    database: &str,
    archive_label: Option<&str>,
    name: &str,
) -> EmuResult<()> {
    require_database(env, project, database).await?;

    let data_dir = env.config.data_dir();
    let path = paths::bundle_list_file(data_dir, project, database, archive_label, name);
    if !path.is_file() {
        return Err(no_bundle_list(project, database, name, archive_label));
    }

    let db_dir = paths::database_dir(data_dir, project, database);
    let git = GitService::open(&db_dir)?;
    let rel = paths::bundle_list_file_relative(archive_label, name);
    git.require_tracked(&rel)?;

    git.stage_removal(&rel)?;
    git.commit_staged(&commit_author(user), "Deleted bundle list")?;
    tokio::fs::remove_file(&path).await?;
    Ok(())
}
