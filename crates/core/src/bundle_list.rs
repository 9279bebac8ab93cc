//! Reading, writing and updating bundle lists.
//!
//! A bundle list is a JSON array of [`BundleListItem`]s assigning bundles to
//! an editor, optionally under an archive label. The array is the unit of
//! persistence; single entries are updated by rewriting the whole file.

use crate::model::BundleListItem;
use crate::{paths, EmuError, EmuResult};
use std::path::{Path, PathBuf};

fn bundle_list_path(
    data_dir: &Path,
    project: &str,
    database: &str,
    archive_label: Option<&str>,
    name: &str,
) -> PathBuf {
    paths::bundle_list_file(data_dir, project, database, archive_label, name)
}

/// Read a bundle list, failing with [`EmuError::NoBundleList`] if the file
/// does not exist.
pub async fn read(
    data_dir: &Path,
    project: &str,
    database: &str,
    archive_label: Option<&str>,
    name: &str,
) -> EmuResult<Vec<BundleListItem>> {
    let path = bundle_list_path(data_dir, project, database, archive_label, name);
    let raw = match tokio::fs::read(&path).await {
        Ok(raw) => raw,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            return Err(EmuError::NoBundleList {
                project: project.to_string(),
                database: database.to_string(),
                bundle_list: name.to_string(),
                archive_label: archive_label.map(str::to_string),
            });
        }
        Err(e) => return Err(e.into()),
    };
    Ok(serde_json::from_slice(&raw)?)
}

/// Serialize and write a bundle list, creating parent directories as needed.
pub async fn write(
    data_dir: &Path,
    project: &str,
    database: &str,
    archive_label: Option<&str>,
    name: &str,
    items: &[BundleListItem],
) -> EmuResult<()> {
    let path = bundle_list_path(data_dir, project, database, archive_label, name);
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }
    let json = serde_json::to_vec_pretty(items)?;
    tokio::fs::write(&path, json).await?;
    Ok(())
}

/// Replace the entry matching `item` by (name, session), in place.
///
/// An entry must already exist; saves never grow a bundle list. The match is
/// on identity only, so `finishedEditing` and `comment` are free to change.
pub fn update_entry(items: &mut [BundleListItem], item: BundleListItem) -> EmuResult<()> {
    let slot = items
        .iter_mut()
        .find(|existing| existing.name == item.name && existing.session == item.session)
        .ok_or_else(|| EmuError::NoBundleListEntry {
            name: item.name.clone(),
            session: item.session.clone(),
        })?;
    *slot = item;
    Ok(())
}

/// The entries a protocol client gets to see. With filtering on, bundles the
/// editor marked finished are hidden; the file itself is never changed.
pub fn visible_entries(items: &[BundleListItem], filter_finished: bool) -> Vec<BundleListItem> {
    items
        .iter()
        .filter(|item| !(filter_finished && item.finished_editing))
        .cloned()
        .collect()
}
