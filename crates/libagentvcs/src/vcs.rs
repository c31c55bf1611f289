use std::{
    fmt,
    path::{Path, PathBuf},
    str::FromStr,
};

use chrono::{DateTime, FixedOffset};
use serde::{Deserialize, Serialize};

use crate::{
    error::{Result, VcsError},
    exec::ExecContext,
};

/// Commits ahead on either side beyond which divergence counts as significant.
pub const DIVERGENCE_THRESHOLD: usize = 5;

/// Identifies a backend, or a directory holding both backends' metadata.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendTag {
    /// Snapshot-based backend with a staging area.
    Git,
    /// Change-based backend whose working copy is a commit.
    Jj,
    /// Both markers live in the same directory.
    Colocated,
}

impl BackendTag {
    /// Stable lowercase name.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Git => "git",
            Self::Jj => "jj",
            Self::Colocated => "colocated",
        }
    }

    /// The other concrete backend; `Colocated` has no counterpart.
    pub fn other(self) -> Option<Self> {
        match self {
            Self::Git => Some(Self::Jj),
            Self::Jj => Some(Self::Git),
            Self::Colocated => None,
        }
    }
}

impl fmt::Display for BackendTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for BackendTag {
    type Err = VcsError;

    /// Accepts the tag names plus the synonyms used in configuration.
    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "git" | "snapshot" => Ok(Self::Git),
            "jj" | "jujutsu" | "change" => Ok(Self::Jj),
            "colocated" => Ok(Self::Colocated),
            other => Err(VcsError::InvalidArgument(format!(
                "unknown backend '{other}'"
            ))),
        }
    }
}

/// A named pointer to a commit-equivalent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Ref {
    /// Reference name, without any remote prefix.
    pub name: String,
    /// Opaque commit identifier the reference points at.
    pub hash: String,
    /// Remote the reference belongs to, for remote references.
    pub remote: Option<String>,
    /// Whether this is a remote (read-mostly) reference.
    pub is_remote: bool,
}

/// A configured remote.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Remote {
    /// Remote name.
    pub name: String,
    /// Fetch URL.
    pub url: String,
}

/// Per-file change state, shared by both backends.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum StatusCode {
    /// No change.
    Unmodified,
    /// Content changed.
    Modified,
    /// Newly tracked.
    Added,
    /// Removed.
    Deleted,
    /// Moved.
    Renamed,
    /// Copied from another path.
    Copied,
    /// Present on disk but not tracked.
    Untracked,
    /// Ignored by the tool.
    Ignored,
    /// Both sides changed; needs resolution.
    Unmerged,
}

/// Change state of one path.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FileStatus {
    /// Path relative to the working directory root.
    pub path: PathBuf,
    /// State in the working directory.
    pub working: StatusCode,
    /// State in the staging area; always `Unmodified` on backends without one.
    pub staged: StatusCode,
}

/// Options for [`Vcs::commit`].
#[derive(Debug, Clone, Default)]
pub struct CommitOptions {
    /// Commit message; required.
    pub message: String,
    /// Restrict the commit to these paths.
    pub paths: Vec<PathBuf>,
    /// Author override, `Name <email>`.
    pub author: Option<String>,
    /// Skip signing.
    pub no_gpg_sign: bool,
    /// Skip commit hooks.
    pub no_verify: bool,
    /// Allow a commit with no changes.
    pub allow_empty: bool,
    /// Seal the current change and start an empty successor (change backend).
    pub create_new: bool,
}

impl CommitOptions {
    /// Options with just a message.
    pub fn message(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            ..Self::default()
        }
    }
}

/// Options for [`Vcs::pull`].
#[derive(Debug, Clone, Default)]
pub struct PullOptions {
    /// Remote to pull from; the backend default when `None`.
    pub remote: Option<String>,
    /// Reference to pull; the current one when `None`.
    pub reference: Option<String>,
    /// Rebase local work instead of merging.
    pub rebase: bool,
}

/// Options for [`Vcs::push`].
#[derive(Debug, Clone, Default)]
pub struct PushOptions {
    /// Remote to push to; the backend default when `None`.
    pub remote: Option<String>,
    /// Reference to push; the current one when `None`.
    pub reference: Option<String>,
    /// Overwrite the remote reference.
    pub force: bool,
    /// Record the remote as upstream / allow creating a new remote reference.
    pub set_upstream: bool,
}

/// How far two references have drifted apart.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Divergence {
    /// Commits only on the local side.
    pub local_ahead: usize,
    /// Commits only on the remote side.
    pub remote_ahead: usize,
    /// Both sides have unique commits.
    pub is_diverged: bool,
    /// Either side exceeds [`DIVERGENCE_THRESHOLD`].
    pub is_significant: bool,
}

impl Divergence {
    /// Derive the flags from the two counts.
    pub fn from_counts(local_ahead: usize, remote_ahead: usize) -> Self {
        Self {
            local_ahead,
            remote_ahead,
            is_diverged: local_ahead > 0 && remote_ahead > 0,
            is_significant: local_ahead > DIVERGENCE_THRESHOLD
                || remote_ahead > DIVERGENCE_THRESHOLD,
        }
    }
}

/// Options for [`Vcs::create_workspace`].
#[derive(Debug, Clone, Default)]
pub struct WorkspaceOptions {
    /// Workspace name.
    pub name: String,
    /// Explicit location; the backend picks one when `None`.
    pub path: Option<PathBuf>,
    /// Reference the workspace operates on; created when missing.
    pub reference: String,
    /// Limit the checkout to `sparse_paths`.
    pub sparse: bool,
    /// Paths kept in a sparse checkout.
    pub sparse_paths: Vec<String>,
}

/// A workspace known to the backend.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct WorkspaceInfo {
    /// Workspace name.
    pub name: String,
    /// Working directory, when the workspace has its own.
    pub path: Option<PathBuf>,
    /// Reference or change the workspace is on.
    pub reference: Option<String>,
}

/// An entry in the operation journal (or its reflog substitute).
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct OperationRecord {
    /// Backend-specific operation id.
    pub id: String,
    /// When the operation happened, if known.
    pub timestamp: Option<DateTime<FixedOffset>>,
    /// One-line description.
    pub description: String,
    /// Who performed it.
    pub user: String,
    /// Command-line arguments, when the backend records them.
    pub args: Vec<String>,
}

impl OperationRecord {
    /// Whether the description or arguments name `needle` as a whole word.
    ///
    /// A path-like word such as `refs/heads/agent-1` or `archive/agent-1`
    /// names its last component, so `agent-1` never matches `agent-10`.
    pub fn mentions(&self, needle: &str) -> bool {
        if needle.is_empty() {
            return false;
        }
        let suffix = format!("/{needle}");
        let names = |text: &str| {
            text.split(|c: char| !is_name_char(c))
                .map(|word| word.trim_end_matches('.'))
                .any(|word| word == needle || word.ends_with(&suffix))
        };
        names(&self.description) || self.args.iter().any(|a| names(a))
    }
}

/// Characters that may appear in a reference name word.
fn is_name_char(c: char) -> bool {
    c.is_alphanumeric() || matches!(c, '-' | '_' | '/' | '.')
}

/// Backend-neutral version-control operations.
///
/// A handle is bound to one repository. Calls on one handle are totally
/// ordered; handles for the same repository on different threads are only
/// serialized by the tool's own on-disk locking.
pub trait Vcs: Send + Sync {
    /// Backend tag; never `Colocated`.
    fn name(&self) -> BackendTag;
    /// Tool version string.
    fn version(&self, ctx: &ExecContext) -> Result<String>;

    /// Main repository root (not a worktree root).
    fn repo_root(&self) -> &Path;
    /// Metadata directory (`.git` or `.jj`).
    fn meta_dir(&self) -> &Path;
    /// Whether the handle's directory is still inside a repository.
    fn is_in_vcs(&self, ctx: &ExecContext) -> bool;

    /// Current reference name, or empty when detached / no active bookmark.
    fn current_ref(&self, ctx: &ExecContext) -> Result<String>;
    /// Whether a local or remote reference with this name exists.
    fn ref_exists(&self, ctx: &ExecContext, name: &str) -> Result<bool>;
    /// Create `name` at `base` (current head when empty).
    fn create_ref(&self, ctx: &ExecContext, name: &str, base: &str) -> Result<()>;
    /// Delete a local reference.
    fn delete_ref(&self, ctx: &ExecContext, name: &str) -> Result<()>;
    /// Point an existing local reference at `target`.
    fn move_ref(&self, ctx: &ExecContext, name: &str, target: &str) -> Result<()>;
    /// Local and remote references.
    fn list_refs(&self, ctx: &ExecContext) -> Result<Vec<Ref>>;

    /// Whether there are uncommitted changes, optionally limited to paths.
    fn has_changes(&self, ctx: &ExecContext, paths: &[PathBuf]) -> Result<bool>;
    /// Whether any path is unmerged.
    fn has_unmerged_paths(&self, ctx: &ExecContext) -> Result<bool>;
    /// Whether a rebase or merge is in progress.
    fn is_in_rebase_or_merge(&self, ctx: &ExecContext) -> Result<bool>;
    /// Whether any remote is configured.
    fn has_remote(&self, ctx: &ExecContext) -> Result<bool>;
    /// Configured remotes.
    fn remotes(&self, ctx: &ExecContext) -> Result<Vec<Remote>>;

    /// Stage paths; a no-op without a staging area.
    fn add(&self, ctx: &ExecContext, paths: &[PathBuf]) -> Result<()>;
    /// Per-file status, optionally limited to paths.
    fn status(&self, ctx: &ExecContext, paths: &[PathBuf]) -> Result<Vec<FileStatus>>;

    /// Record a commit.
    fn commit(&self, ctx: &ExecContext, opts: &CommitOptions) -> Result<()>;
    /// Opaque commit identifier for a reference.
    fn commit_hash(&self, ctx: &ExecContext, reference: &str) -> Result<String>;
    /// Create an empty change on top of `base` and return its commit id.
    fn start_change(&self, ctx: &ExecContext, base: &str, message: &str) -> Result<String>;
    /// Rebase the work on `name` onto `onto`.
    fn rebase_ref(&self, ctx: &ExecContext, name: &str, onto: &str) -> Result<()>;

    /// Fetch from a remote; silently succeeds without one.
    fn fetch(&self, ctx: &ExecContext, remote: &str, reference: &str) -> Result<()>;
    /// Pull; on the change backend this is a fetch.
    fn pull(&self, ctx: &ExecContext, opts: &PullOptions) -> Result<()>;
    /// Push; rejections surface as `PushRejected`.
    fn push(&self, ctx: &ExecContext, opts: &PushOptions) -> Result<()>;
    /// Commits ahead on each side of `local` and `remote`.
    fn divergence(&self, ctx: &ExecContext, local: &str, remote: &str) -> Result<Divergence>;

    /// Raw bytes of `path` at `reference`.
    fn extract_file(&self, ctx: &ExecContext, reference: &str, path: &Path) -> Result<Vec<u8>>;

    /// Create (or reuse) an isolated workspace on a reference.
    fn create_workspace(
        &self,
        ctx: &ExecContext,
        opts: &WorkspaceOptions,
    ) -> Result<Box<dyn Workspace>>;
    /// Workspaces known to the backend.
    fn list_workspaces(&self, ctx: &ExecContext) -> Result<Vec<WorkspaceInfo>>;

    /// Whether conflicts are present.
    fn has_conflicts(&self, ctx: &ExecContext) -> Result<bool>;
    /// Paths with conflicts.
    fn conflicted_files(&self, ctx: &ExecContext) -> Result<Vec<PathBuf>>;

    /// Whether there is anything to undo.
    fn can_undo(&self, ctx: &ExecContext) -> Result<bool>;
    /// Undo the most recent operation.
    fn undo(&self, ctx: &ExecContext) -> Result<()>;
    /// Most recent journal entries, newest first.
    fn operation_log(&self, ctx: &ExecContext, limit: usize) -> Result<Vec<OperationRecord>>;
    /// Commit `name` pointed at as of journal entry `operation`.
    fn ref_at_operation(&self, ctx: &ExecContext, operation: &str, name: &str)
    -> Result<String>;

    /// Run the tool directly. Prefer the typed methods.
    fn exec(&self, ctx: &ExecContext, args: &[&str]) -> Result<Vec<u8>>;
}

/// An isolated context for committing and syncing one reference.
///
/// A workspace owns its backend resources until [`Workspace::cleanup`].
pub trait Workspace: Send {
    /// Working directory used by the workspace.
    fn path(&self) -> &Path;
    /// Reference the workspace operates on.
    fn reference(&self) -> &str;
    /// Succeeds while the workspace is usable.
    fn is_healthy(&self, ctx: &ExecContext) -> Result<()>;
    /// Whether the workspace holds uncommitted work.
    fn has_changes(&self, ctx: &ExecContext) -> Result<bool>;
    /// Commit the workspace's changes to its reference.
    fn commit(&self, ctx: &ExecContext, opts: &CommitOptions) -> Result<()>;
    /// Pull the workspace's reference.
    fn pull(&self, ctx: &ExecContext, opts: &PullOptions) -> Result<()>;
    /// Push the workspace's reference.
    fn push(&self, ctx: &ExecContext, opts: &PushOptions) -> Result<()>;
    /// Release every backend resource. Safe to call more than once.
    fn cleanup(&mut self, ctx: &ExecContext) -> Result<()>;
}
