//! Filesystem traversal assembling the data model.
//!
//! All listing goes through here and nothing is cached: every query re-reads
//! the directory tree, so concurrent edits by other connections or external
//! tools are always observed. Traversal is all-or-nothing; an I/O error
//! anywhere aborts the whole listing rather than returning a partial view.

use crate::model::{
    Bundle, BundleList, Database, Download, ProjectDataset, Session, Upload, UploadProblem,
};
use crate::{paths, EmuError, EmuResult, ServerConfig};
use chrono::{DateTime, Utc};
use futures::future::try_join_all;
use std::path::Path;
use tracing::warn;

/// How much of a database to materialize.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Depth {
    /// Names only.
    Shallow,
    /// Sessions, bundles and bundle lists included.
    Deep,
}

async fn dir_names_with_suffix(dir: &Path, suffix: &str) -> EmuResult<Vec<String>> {
    let mut names = Vec::new();
    let mut entries = match tokio::fs::read_dir(dir).await {
        Ok(entries) => entries,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(names),
        Err(e) => return Err(e.into()),
    };
    while let Some(entry) = entries.next_entry().await? {
        if !entry.file_type().await?.is_dir() {
            continue;
        }
        let file_name = entry.file_name();
        if let Some(name) = file_name.to_str().and_then(|n| paths::strip_suffix(n, suffix)) {
            names.push(name.to_string());
        }
    }
    names.sort_unstable();
    Ok(names)
}

/// Whether `<db>_emuDB` exists for the given project.
pub async fn database_exists(config: &ServerConfig, project: &str, database: &str) -> bool {
    paths::database_dir(config.data_dir(), project, database).is_dir()
}

/// List a project's databases at the requested depth.
pub async fn list_databases(
    config: &ServerConfig,
    project: &str,
    depth: Depth,
) -> EmuResult<Vec<Database>> {
    let dbs_dir = paths::project_databases_dir(config.data_dir(), project);
    let names = dir_names_with_suffix(&dbs_dir, paths::DATABASE_SUFFIX).await?;

    match depth {
        Depth::Shallow => Ok(names
            .into_iter()
            .map(|name| Database {
                name,
                ..Database::default()
            })
            .collect()),
        Depth::Deep => {
            try_join_all(
                names
                    .into_iter()
                    .map(|name| read_database(config, project.to_string(), name)),
            )
            .await
        }
    }
}

async fn read_database(
    config: &ServerConfig,
    project: String,
    name: String,
) -> EmuResult<Database> {
    let db_dir = paths::database_dir(config.data_dir(), &project, &name);
    let sessions = read_sessions(&db_dir).await?;
    let bundle_lists = read_bundle_lists(&db_dir).await?;
    Ok(Database {
        name,
        sessions,
        bundle_lists,
    })
}

/// The sessions of one database directory, each with its bundles.
pub async fn read_sessions(db_dir: &Path) -> EmuResult<Vec<Session>> {
    let session_names = dir_names_with_suffix(db_dir, paths::SESSION_SUFFIX).await?;
    try_join_all(session_names.into_iter().map(|session| async move {
        let ses_dir = paths::session_dir(db_dir, &session);
        let bundle_names = dir_names_with_suffix(&ses_dir, paths::BUNDLE_SUFFIX).await?;
        let bundles = bundle_names
            .into_iter()
            .map(|name| Bundle {
                name,
                session: session.clone(),
            })
            .collect();
        Ok(Session {
            name: session,
            bundles,
        })
    }))
    .await
}

/// All bundle lists of one database: the unlabelled ones at the top of
/// `bundleLists/` and one set per `<label>_archiveLabel` subdirectory.
pub async fn read_bundle_lists(db_dir: &Path) -> EmuResult<Vec<BundleList>> {
    let mut lists = Vec::new();
    let lists_dir = db_dir.join(paths::BUNDLE_LISTS_DIR);
    read_bundle_list_dir(&lists_dir, None, &mut lists).await?;

    let labels = dir_names_with_suffix(&lists_dir, paths::ARCHIVE_LABEL_SUFFIX).await?;
    for label in labels {
        let label_dir = lists_dir.join(format!("{label}{}", paths::ARCHIVE_LABEL_SUFFIX));
        read_bundle_list_dir(&label_dir, Some(label), &mut lists).await?;
    }
    Ok(lists)
}

async fn read_bundle_list_dir(
    dir: &Path,
    archive_label: Option<String>,
    out: &mut Vec<BundleList>,
) -> EmuResult<()> {
    let mut entries = match tokio::fs::read_dir(dir).await {
        Ok(entries) => entries,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(()),
        Err(e) => return Err(e.into()),
    };
    while let Some(entry) = entries.next_entry().await? {
        if !entry.file_type().await?.is_file() {
            continue;
        }
        let file_name = entry.file_name();
        let Some(name) = file_name
            .to_str()
            .and_then(|n| paths::strip_suffix(n, paths::BUNDLE_LIST_SUFFIX))
        else {
            continue;
        };
        let raw = tokio::fs::read(entry.path()).await?;
        let items = serde_json::from_slice(&raw)?;
        out.push(BundleList {
            name: name.to_string(),
            archive_label: archive_label.clone(),
            items,
        });
    }
    out.sort_by(|a, b| (&a.archive_label, &a.name).cmp(&(&b.archive_label, &b.name)));
    Ok(())
}

/// List a project's uploads. Each upload is a UUID-named directory whose
/// `data/` must contain exactly one database; anything else is recorded as a
/// problem on the entry instead of failing the listing.
pub async fn list_uploads(config: &ServerConfig, project: &str) -> EmuResult<Vec<Upload>> {
    let uploads_dir = paths::project_uploads_dir(config.data_dir(), project);
    let mut uploads = Vec::new();
    let mut entries = match tokio::fs::read_dir(&uploads_dir).await {
        Ok(entries) => entries,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(uploads),
        Err(e) => return Err(e.into()),
    };

    while let Some(entry) = entries.next_entry().await? {
        if !entry.file_type().await?.is_dir() {
            continue;
        }
        let Some(uuid) = entry.file_name().to_str().map(str::to_string) else {
            continue;
        };
        let data_dir = entry.path().join("data");
        let mut db_names = dir_names_with_suffix(&data_dir, paths::DATABASE_SUFFIX).await?;

        let upload = match db_names.len() {
            0 => Upload {
                uuid,
                database: None,
                problem: Some(UploadProblem::NoDatabase),
            },
            1 => {
                let name = db_names.remove(0);
                let db_dir = data_dir.join(format!("{name}{}", paths::DATABASE_SUFFIX));
                let sessions = read_sessions(&db_dir).await?;
                let bundle_lists = read_bundle_lists(&db_dir).await?;
                Upload {
                    uuid,
                    database: Some(Database {
                        name,
                        sessions,
                        bundle_lists,
                    }),
                    problem: None,
                }
            }
            _ => Upload {
                uuid,
                database: None,
                problem: Some(UploadProblem::MultipleDatabases),
            },
        };
        uploads.push(upload);
    }
    uploads.sort_by(|a, b| a.uuid.cmp(&b.uuid));
    Ok(uploads)
}

/// List a project's download artefacts. File names that do not follow the
/// `<db>_emuDB.<treeish>.zip` convention are skipped with a warning.
pub async fn list_downloads(config: &ServerConfig, project: &str) -> EmuResult<Vec<Download>> {
    let downloads_dir = paths::project_downloads_dir(config.data_dir(), project);
    let mut downloads = Vec::new();
    let mut entries = match tokio::fs::read_dir(&downloads_dir).await {
        Ok(entries) => entries,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(downloads),
        Err(e) => return Err(e.into()),
    };

    while let Some(entry) = entries.next_entry().await? {
        if !entry.file_type().await?.is_file() {
            continue;
        }
        let file_name = entry.file_name();
        let Some(name) = file_name.to_str() else {
            continue;
        };
        let Some((database, treeish)) = parse_download_name(name) else {
            warn!(project, file = name, "skipping unparsable download artefact");
            continue;
        };
        let meta = entry.metadata().await?;
        let date = meta
            .modified()
            .map(DateTime::<Utc>::from)
            .unwrap_or_else(|_| Utc::now());
        downloads.push(Download {
            database: database.to_string(),
            treeish: treeish.to_string(),
            size: meta.len(),
            date,
        });
    }
    downloads.sort_by(|a, b| (&a.database, &a.treeish).cmp(&(&b.database, &b.treeish)));
    Ok(downloads)
}

fn parse_download_name(file_name: &str) -> Option<(&str, &str)> {
    let mut parts = file_name.split('.');
    let stem = parts.next()?;
    let treeish = parts.next()?;
    let ext = parts.next()?;
    if parts.next().is_some() || ext != "zip" {
        return None;
    }
    let database = paths::strip_suffix(stem, paths::DATABASE_SUFFIX)?;
    Some((database, treeish))
}

/// Assemble the full picture of one project.
pub async fn project_dataset(config: &ServerConfig, project: &str) -> EmuResult<ProjectDataset> {
    let (databases, uploads, downloads) = futures::try_join!(
        list_databases(config, project, Depth::Deep),
        list_uploads(config, project),
        list_downloads(config, project),
    )?;
    Ok(ProjectDataset {
        name: project.to_string(),
        databases,
        uploads,
        downloads,
    })
}

/// Verify that the project's databases directory exists.
pub async fn require_project(config: &ServerConfig, project: &str) -> EmuResult<()> {
    let dir = paths::project_dir(config.data_dir(), project);
    if dir.is_dir() {
        Ok(())
    } else {
        Err(EmuError::UserInput(format!("no such project: {project}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    fn config(temp: &TempDir) -> ServerConfig {
        ServerConfig::new(temp.path()).unwrap()
    }

    fn make_database(temp: &TempDir, project: &str, db: &str) -> std::path::PathBuf {
        let dir = paths::database_dir(temp.path(), project, db);
        fs::create_dir_all(&dir).unwrap();
        dir
    }

    #[tokio::test]
    async fn missing_project_lists_as_empty() {
        let temp = TempDir::new().unwrap();
        let cfg = config(&temp);
        let dbs = list_databases(&cfg, "ghost", Depth::Shallow).await.unwrap();
        assert!(dbs.is_empty());
    }

    #[tokio::test]
    async fn shallow_listing_carries_names_only() {
        let temp = TempDir::new().unwrap();
        make_database(&temp, "demo", "ae");
        make_database(&temp, "demo", "clarino");
        // A directory without the suffix is not a database.
        fs::create_dir_all(temp.path().join("demo/databases/notes")).unwrap();

        let cfg = config(&temp);
        let dbs = list_databases(&cfg, "demo", Depth::Shallow).await.unwrap();
        let names: Vec<&str> = dbs.iter().map(|d| d.name.as_str()).collect();
        assert_eq!(names, ["ae", "clarino"]);
        assert!(dbs.iter().all(|d| d.sessions.is_empty()));
    }

    #[tokio::test]
    async fn deep_listing_includes_sessions_bundles_and_lists() {
        let temp = TempDir::new().unwrap();
        let db_dir = make_database(&temp, "demo", "ae");
        fs::create_dir_all(db_dir.join("0000_ses/msajc003_bndl")).unwrap();
        fs::create_dir_all(db_dir.join("0000_ses/msajc010_bndl")).unwrap();
        fs::create_dir_all(db_dir.join("bundleLists/round2_archiveLabel")).unwrap();
        fs::write(
            db_dir.join("bundleLists/alice_bundleList.json"),
            r#"[{"name":"msajc003","session":"0000"}]"#,
        )
        .unwrap();
        fs::write(
            db_dir.join("bundleLists/round2_archiveLabel/bob_bundleList.json"),
            "[]",
        )
        .unwrap();

        let cfg = config(&temp);
        let dbs = list_databases(&cfg, "demo", Depth::Deep).await.unwrap();
        assert_eq!(dbs.len(), 1);
        let db = &dbs[0];
        assert_eq!(db.sessions.len(), 1);
        assert_eq!(db.sessions[0].bundles.len(), 2);
        assert_eq!(db.bundle_lists.len(), 2);
        assert_eq!(db.bundle_lists[0].name, "alice");
        assert_eq!(db.bundle_lists[0].archive_label, None);
        assert_eq!(db.bundle_lists[1].archive_label, Some("round2".into()));
    }

    #[tokio::test]
    async fn upload_problems_are_recorded_not_fatal() {
        let temp = TempDir::new().unwrap();
        let uploads = paths::project_uploads_dir(temp.path(), "demo");
        fs::create_dir_all(uploads.join("empty-upload/data")).unwrap();
        fs::create_dir_all(uploads.join("good-upload/data/ae_emuDB")).unwrap();
        fs::create_dir_all(uploads.join("crowded-upload/data/a_emuDB")).unwrap();
        fs::create_dir_all(uploads.join("crowded-upload/data/b_emuDB")).unwrap();

        let cfg = config(&temp);
        let listed = list_uploads(&cfg, "demo").await.unwrap();
        assert_eq!(listed.len(), 3);

        let by_uuid = |uuid: &str| listed.iter().find(|u| u.uuid == uuid).unwrap();
        assert_eq!(
            by_uuid("empty-upload").problem,
            Some(UploadProblem::NoDatabase)
        );
        assert_eq!(
            by_uuid("crowded-upload").problem,
            Some(UploadProblem::MultipleDatabases)
        );
        let good = by_uuid("good-upload");
        assert!(good.problem.is_none());
        assert_eq!(good.database.as_ref().unwrap().name, "ae");
    }

    #[tokio::test]
    async fn downloads_parse_the_zip_naming_convention() {
        let temp = TempDir::new().unwrap();
        let downloads = paths::project_downloads_dir(temp.path(), "demo");
        fs::create_dir_all(&downloads).unwrap();
        fs::write(downloads.join("ae_emuDB.main.zip"), b"zipzip").unwrap();
        fs::write(downloads.join("README.txt"), b"not a zip").unwrap();
        fs::write(downloads.join("odd.zip"), b"two components only").unwrap();

        let cfg = config(&temp);
        let listed = list_downloads(&cfg, "demo").await.unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].database, "ae");
        assert_eq!(listed[0].treeish, "main");
        assert_eq!(listed[0].size, 6);
    }

    #[tokio::test]
    async fn database_exists_requires_the_suffix_dir() {
        let temp = TempDir::new().unwrap();
        make_database(&temp, "demo", "ae");
        let cfg = config(&temp);
        assert!(database_exists(&cfg, "demo", "ae").await);
        assert!(!database_exists(&cfg, "demo", "nope").await);
    }
}
