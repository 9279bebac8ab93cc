//! Project-level read queries.

use crate::dispatch::ManagerEnv;
use emuprot_core::auth::User;
use emuprot_core::{traversal, EmuResult};
use serde_json::{json, Value};

/// The full picture of one project: databases (deep), uploads and downloads.
pub async fn project_info(env: &ManagerEnv, project: &str) -> EmuResult<Value> {
    let dataset = traversal::project_dataset(&env.config, project).await?;
    Ok(serde_json::to_value(dataset)?)
}

/// The projects the user holds any permission on, with their levels.
pub async fn list_projects(env: &ManagerEnv, user: &User) -> EmuResult<Value> {
    let names = env.authorizer.list_projects(&user.username).await?;
    let mut projects = Vec::with_capacity(names.len());
    for name in names {
        if let Some(level) = env.authorizer.permission(&user.username, &name).await? {
            projects.push(json!({"name": name, "permission": level}));
        }
    }
    Ok(Value::Array(projects))
}
