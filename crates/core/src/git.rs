//! Git versioning of database directories.
//!
//! Every `<db>_emuDB` directory is its own repository (`git2`/libgit2). This
//! module centralises the handful of operations the servers need so that
//! commit creation is consistent across the protocol and manager services.
//!
//! ## Commit policy
//!
//! Save operations write the working tree first, then stage the touched paths
//! and commit with the current `HEAD` as sole parent. A repository without a
//! `HEAD` commit is only acceptable for the very first commit of a fresh
//! database; [`GitService::commit_staged`] therefore requires a parent while
//! [`GitService::commit_all`] tolerates an unborn branch.

use crate::model::GitCommitRecord;
use crate::{EmuError, EmuResult};
use chrono::{DateTime, Utc};
use std::path::{Path, PathBuf};
use tracing::debug;

/// Name and email recorded as both author and committer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommitAuthor {
    pub name: String,
    pub email: String,
}

impl CommitAuthor {
    fn signature(&self) -> EmuResult<git2::Signature<'static>> {
        git2::Signature::now(&self.name, &self.email).map_err(EmuError::Git)
    }
}

/// A repository handle bound to the database directory it versions.
pub struct GitService {
    repo: git2::Repository,
    workdir: PathBuf,
}

impl GitService {
    /// Open the repository at `workdir` and refresh its index from disk.
    ///
    /// The index is re-read on every open because other processes (or a
    /// previous connection) may have written it since.
    pub fn open(workdir: &Path) -> EmuResult<Self> {
        let repo = git2::Repository::open(workdir).map_err(EmuError::Git)?;
        let mut index = repo.index().map_err(EmuError::Git)?;
        index.read(true).map_err(EmuError::Git)?;
        Ok(Self {
            repo,
            workdir: workdir.to_path_buf(),
        })
    }

    /// Create a new repository at `workdir`.
    pub fn init(workdir: &Path) -> EmuResult<Self> {
        let repo = git2::Repository::init(workdir).map_err(EmuError::Git)?;
        Ok(Self {
            repo,
            workdir: workdir.to_path_buf(),
        })
    }

    pub fn workdir(&self) -> &Path {
        &self.workdir
    }

    /// Whether `relative_path` exists in the tree of the current `HEAD`
    /// commit. Untracked and merely-staged files do not count.
    pub fn head_has_file(&self, relative_path: &Path) -> EmuResult<bool> {
        let head = match self.repo.head() {
            Ok(head) => head,
            Err(e)
                if e.code() == git2::ErrorCode::UnbornBranch
                    || e.code() == git2::ErrorCode::NotFound =>
            {
                return Ok(false);
            }
            Err(e) => return Err(EmuError::Git(e)),
        };
        let tree = head
            .peel_to_commit()
            .and_then(|c| c.tree())
            .map_err(EmuError::Git)?;
        Ok(tree.get_path(relative_path).is_ok())
    }

    /// Fail unless `relative_path` is tracked in `HEAD`. Mutating pipelines
    /// call this before touching the working tree so a file git does not know
    /// about cannot be "edited".
    pub fn require_tracked(&self, relative_path: &Path) -> EmuResult<()> {
        if self.head_has_file(relative_path)? {
            Ok(())
        } else {
            Err(EmuError::Git(git2::Error::from_str(&format!(
                "file not tracked: {}",
                relative_path.display()
            ))))
        }
    }

    /// Stage one file (workdir-relative). The file must exist on disk.
    pub fn stage(&self, relative_path: &Path) -> EmuResult<()> {
        let mut index = self.repo.index().map_err(EmuError::Git)?;
        index.add_path(relative_path).map_err(EmuError::Git)?;
        index.write().map_err(EmuError::Git)?;
        Ok(())
    }

    /// Stage the removal of one file (workdir-relative).
    pub fn stage_removal(&self, relative_path: &Path) -> EmuResult<()> {
        let mut index = self.repo.index().map_err(EmuError::Git)?;
        index.remove_path(relative_path).map_err(EmuError::Git)?;
        index.write().map_err(EmuError::Git)?;
        Ok(())
    }

    /// Commit whatever is staged, with the current `HEAD` as sole parent.
    ///
    /// Refuses to run on a repository without any commit; database
    /// repositories always start with an initial import commit.
    pub fn commit_staged(&self, author: &CommitAuthor, message: &str) -> EmuResult<String> {
        let head = self
            .repo
            .head()
            .and_then(|h| h.peel_to_commit())
            .map_err(EmuError::Git)?;
        let oid = self.commit_index(author, message, &[&head])?;
        debug!(commit = %oid, "created commit");
        Ok(oid.to_string())
    }

    /// Stage every file under the workdir and commit. Tolerates an unborn
    /// branch, so it also serves as the initial import commit.
    pub fn commit_all(&self, author: &CommitAuthor, message: &str) -> EmuResult<String> {
        let mut index = self.repo.index().map_err(EmuError::Git)?;
        index
            .add_all(["*"].iter(), git2::IndexAddOption::DEFAULT, None)
            .map_err(EmuError::Git)?;
        index.write().map_err(EmuError::Git)?;

        let parents = match self.repo.head() {
            Ok(head) => vec![head.peel_to_commit().map_err(EmuError::Git)?],
            Err(e)
                if e.code() == git2::ErrorCode::UnbornBranch
                    || e.code() == git2::ErrorCode::NotFound =>
            {
                vec![]
            }
            Err(e) => return Err(EmuError::Git(e)),
        };
        let parent_refs: Vec<&git2::Commit> = parents.iter().collect();
        let oid = self.commit_index(author, message, &parent_refs)?;
        Ok(oid.to_string())
    }

    fn commit_index(
        &self,
        author: &CommitAuthor,
        message: &str,
        parents: &[&git2::Commit],
    ) -> EmuResult<git2::Oid> {
        let mut index = self.repo.index().map_err(EmuError::Git)?;
        let tree_id = index.write_tree().map_err(EmuError::Git)?;
        let tree = self.repo.find_tree(tree_id).map_err(EmuError::Git)?;
        let sig = author.signature()?;
        self.repo
            .commit(Some("HEAD"), &sig, &sig, message, &tree, parents)
            .map_err(EmuError::Git)
    }

    /// The commit history from `HEAD` backwards, newest first.
    pub fn log(&self) -> EmuResult<Vec<GitCommitRecord>> {
        let mut walk = self.repo.revwalk().map_err(EmuError::Git)?;
        match walk.push_head() {
            Ok(()) => {}
            Err(e)
                if e.code() == git2::ErrorCode::UnbornBranch
                    || e.code() == git2::ErrorCode::NotFound =>
            {
                return Ok(Vec::new());
            }
            Err(e) => return Err(EmuError::Git(e)),
        }

        let mut records = Vec::new();
        for oid in walk {
            let oid = oid.map_err(EmuError::Git)?;
            let commit = self.repo.find_commit(oid).map_err(EmuError::Git)?;
            records.push(GitCommitRecord {
                commit_id: oid.to_string(),
                date: commit_date(&commit),
                message: commit.summary().unwrap_or_default().to_string(),
            });
        }
        Ok(records)
    }

    /// All tag names in the repository.
    pub fn tag_names(&self) -> EmuResult<Vec<String>> {
        let tags = self.repo.tag_names(None).map_err(EmuError::Git)?;
        Ok(tags.iter().flatten().map(str::to_string).collect())
    }

    /// Create an annotated tag on the given commit. Refuses to overwrite an
    /// existing tag of the same name.
    pub fn create_tag(
        &self,
        name: &str,
        commit_id: &str,
        tagger: &CommitAuthor,
        message: &str,
    ) -> EmuResult<()> {
        let oid = git2::Oid::from_str(commit_id).map_err(EmuError::Git)?;
        let object = self.repo.find_object(oid, None).map_err(EmuError::Git)?;
        let sig = tagger.signature()?;
        self.repo
            .tag(name, &object, &sig, message, false)
            .map_err(EmuError::Git)?;
        Ok(())
    }
}

fn commit_date(commit: &git2::Commit) -> DateTime<Utc> {
    DateTime::from_timestamp(commit.time().seconds(), 0).unwrap_or_else(Utc::now)
}
