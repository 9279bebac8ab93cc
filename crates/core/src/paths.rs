//! On-disk path construction for emuDB artefacts.
//!
//! Pure functions mapping logical identifiers (project, database, session,
//! bundle, archive label, bundle-list name, upload UUID) to filesystem paths.
//! No state, no I/O. The `*_relative` variants return paths relative to the
//! database directory, which is what the git index wants.
//!
//! Naming conventions follow the emuDB layout:
//!
//! ```text
//! <dataDir>/<project>/databases/<db>_emuDB/
//!     <db>_DBconfig.json
//!     bundleLists/<editor>_bundleList.json
//!     bundleLists/<label>_archiveLabel/<editor>_bundleList.json
//!     <session>_ses/<bundle>_bndl/<bundle>_annot.json
//! <dataDir>/<project>/uploads/<uuid>/data/<db>_emuDB/
//! <dataDir>/<project>/downloads/<db>_emuDB.<treeish>.zip
//! ```

use std::path::{Path, PathBuf};

pub const DATABASE_SUFFIX: &str = "_emuDB";
pub const SESSION_SUFFIX: &str = "_ses";
pub const BUNDLE_SUFFIX: &str = "_bndl";
pub const ANNOTATION_SUFFIX: &str = "_annot.json";
pub const BUNDLE_LIST_SUFFIX: &str = "_bundleList.json";
pub const ARCHIVE_LABEL_SUFFIX: &str = "_archiveLabel";
pub const DB_CONFIG_SUFFIX: &str = "_DBconfig.json";
pub const PLUGIN_CONFIG_SUFFIX: &str = "_serverPlugins.json";
pub const BUNDLE_LISTS_DIR: &str = "bundleLists";

//
// Paths that belong to the whole project
//

pub fn project_dir(data_dir: &Path, project: &str) -> PathBuf {
    data_dir.join(project)
}

pub fn project_databases_dir(data_dir: &Path, project: &str) -> PathBuf {
    project_dir(data_dir, project).join("databases")
}

pub fn project_uploads_dir(data_dir: &Path, project: &str) -> PathBuf {
    project_dir(data_dir, project).join("uploads")
}

pub fn project_downloads_dir(data_dir: &Path, project: &str) -> PathBuf {
    project_dir(data_dir, project).join("downloads")
}

//
// Paths that belong to a given database
//

pub fn database_dir(data_dir: &Path, project: &str, database: &str) -> PathBuf {
    project_databases_dir(data_dir, project).join(format!("{database}{DATABASE_SUFFIX}"))
}

pub fn database_config_file(data_dir: &Path, project: &str, database: &str) -> PathBuf {
    database_dir(data_dir, project, database).join(database_config_file_relative(database))
}

/// The config file path relative to the database directory.
pub fn database_config_file_relative(database: &str) -> PathBuf {
    PathBuf::from(format!("{database}{DB_CONFIG_SUFFIX}"))
}

pub fn database_plugin_config_file(db_dir: &Path, database: &str) -> PathBuf {
    db_dir.join(format!("{database}{PLUGIN_CONFIG_SUFFIX}"))
}

pub fn bundle_lists_dir(data_dir: &Path, project: &str, database: &str) -> PathBuf {
    database_dir(data_dir, project, database).join(BUNDLE_LISTS_DIR)
}

/// The directory holding bundle lists for an archive label, or the plain
/// `bundleLists` directory if no label is given.
pub fn archive_label_dir(
    data_dir: &Path,
    project: &str,
    database: &str,
    archive_label: Option<&str>,
) -> PathBuf {
    let base = bundle_lists_dir(data_dir, project, database);
    match archive_label {
        Some(label) => base.join(format!("{label}{ARCHIVE_LABEL_SUFFIX}")),
        None => base,
    }
}

pub fn bundle_list_file(
    data_dir: &Path,
    project: &str,
    database: &str,
    archive_label: Option<&str>,
    bundle_list: &str,
) -> PathBuf {
    archive_label_dir(data_dir, project, database, archive_label)
        .join(format!("{bundle_list}{BUNDLE_LIST_SUFFIX}"))
}

/// The bundle-list file path relative to the database directory.
pub fn bundle_list_file_relative(archive_label: Option<&str>, bundle_list: &str) -> PathBuf {
    let mut path = PathBuf::from(BUNDLE_LISTS_DIR);
    if let Some(label) = archive_label {
        path.push(format!("{label}{ARCHIVE_LABEL_SUFFIX}"));
    }
    path.push(format!("{bundle_list}{BUNDLE_LIST_SUFFIX}"));
    path
}

pub fn session_dir(db_dir: &Path, session: &str) -> PathBuf {
    db_dir.join(format!("{session}{SESSION_SUFFIX}"))
}

pub fn bundle_dir(db_dir: &Path, session: &str, bundle: &str) -> PathBuf {
    session_dir(db_dir, session).join(format!("{bundle}{BUNDLE_SUFFIX}"))
}

pub fn annotation_file(db_dir: &Path, session: &str, bundle: &str) -> PathBuf {
    bundle_dir(db_dir, session, bundle).join(format!("{bundle}{ANNOTATION_SUFFIX}"))
}

/// The annotation file path relative to the database directory.
pub fn annotation_file_relative(session: &str, bundle: &str) -> PathBuf {
    PathBuf::from(format!("{session}{SESSION_SUFFIX}"))
        .join(format!("{bundle}{BUNDLE_SUFFIX}"))
        .join(format!("{bundle}{ANNOTATION_SUFFIX}"))
}

/// A track or media file inside a bundle, identified by its file extension.
pub fn bundle_track_file(db_dir: &Path, session: &str, bundle: &str, extension: &str) -> PathBuf {
    bundle_dir(db_dir, session, bundle).join(format!("{bundle}.{extension}"))
}

pub fn bundle_track_file_relative(session: &str, bundle: &str, extension: &str) -> PathBuf {
    PathBuf::from(format!("{session}{SESSION_SUFFIX}"))
        .join(format!("{bundle}{BUNDLE_SUFFIX}"))
        .join(format!("{bundle}.{extension}"))
}

//
// Paths that belong to a given upload
//

pub fn upload_dir(data_dir: &Path, project: &str, upload: &str) -> PathBuf {
    project_uploads_dir(data_dir, project).join(upload)
}

pub fn upload_data_dir(data_dir: &Path, project: &str, upload: &str) -> PathBuf {
    upload_dir(data_dir, project, upload).join("data")
}

pub fn upload_database_dir(
    data_dir: &Path,
    project: &str,
    upload: &str,
    database: &str,
) -> PathBuf {
    upload_data_dir(data_dir, project, upload).join(format!("{database}{DATABASE_SUFFIX}"))
}

/// Strip a known suffix from a directory or file name, returning the logical
/// name. Returns `None` if the suffix is absent.
pub fn strip_suffix<'a>(file_name: &'a str, suffix: &str) -> Option<&'a str> {
    file_name.strip_suffix(suffix)
}
