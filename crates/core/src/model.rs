//! The emuDB data model.
//!
//! These types are assembled from the filesystem by [`crate::traversal`] and
//! serialized onto the wire by the manager API. The filesystem is the single
//! source of truth; nothing here is cached across requests.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Everything known about a project: its databases, uploads and downloads.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ProjectDataset {
    pub name: String,
    pub databases: Vec<Database>,
    pub uploads: Vec<Upload>,
    pub downloads: Vec<Download>,
}

/// A single emuDB. Shallow traversals fill in only `name`; deep traversals
/// populate sessions and bundle lists as well.
#[derive(Debug, Clone, Default, Serialize)]
pub struct Database {
    pub name: String,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub sessions: Vec<Session>,
    #[serde(rename = "bundleLists", skip_serializing_if = "Vec::is_empty")]
    pub bundle_lists: Vec<BundleList>,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct Session {
    pub name: String,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub bundles: Vec<Bundle>,
}

/// A bundle's identity is the pair (session, name).
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct Bundle {
    pub name: String,
    pub session: String,
}

/// One per-user (optionally per-archive-label) manifest of bundles.
#[derive(Debug, Clone, Serialize)]
pub struct BundleList {
    pub name: String,
    #[serde(rename = "archiveLabel")]
    pub archive_label: Option<String>,
    pub items: Vec<BundleListItem>,
}

/// One entry of a bundle list. At most one entry may exist per
/// (name, session) pair; updates replace in place, never append.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct BundleListItem {
    pub name: String,
    pub session: String,
    #[serde(default)]
    pub finished_editing: bool,
    #[serde(default)]
    pub comment: String,
}

/// Why an upload directory is unusable. These are expected, listable
/// conditions recorded on the [`Upload`], not faults.
#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub enum UploadProblem {
    NoDatabase,
    MultipleDatabases,
}

/// An upload directory named by a UUIDv4. A valid upload contains exactly one
/// `<db>_emuDB` subdirectory under `data/`.
#[derive(Debug, Clone, Serialize)]
pub struct Upload {
    pub uuid: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub database: Option<Database>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub problem: Option<UploadProblem>,
}

/// A zip artefact in the downloads directory, parsed from its
/// `<db>_emuDB.<treeish>.zip` file name. Existence and stat info is the only
/// state.
#[derive(Debug, Clone, Serialize)]
pub struct Download {
    pub database: String,
    pub treeish: String,
    pub size: u64,
    pub date: DateTime<Utc>,
}

/// Read-only projection of one commit in a database's history. Only ever
/// constructed by the git layer.
#[derive(Debug, Clone, Serialize)]
pub struct GitCommitRecord {
    #[serde(rename = "commitID")]
    pub commit_id: String,
    pub date: DateTime<Utc>,
    pub message: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bundle_list_item_round_trips_camel_case() {
        let json = r#"{"name":"msajc003","session":"0000","finishedEditing":true,"comment":"ok"}"#;
        let item: BundleListItem = serde_json::from_str(json).unwrap();
        assert!(item.finished_editing);
        let back = serde_json::to_value(&item).unwrap();
        assert_eq!(back["finishedEditing"], true);
        assert_eq!(back["session"], "0000");
    }

    #[test]
    fn bundle_list_item_defaults_optional_fields() {
        let json = r#"{"name":"msajc010","session":"0000"}"#;
        let item: BundleListItem = serde_json::from_str(json).unwrap();
        assert!(!item.finished_editing);
        assert!(item.comment.is_empty());
    }

    #[test]
    fn upload_problem_serializes_camel_case() {
        let v = serde_json::to_value(UploadProblem::MultipleDatabases).unwrap();
        assert_eq!(v, "multipleDatabases");
    }
}
