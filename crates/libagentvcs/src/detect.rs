use std::{
    env, fs,
    path::{Component, Path, PathBuf},
};

use serde::Serialize;
use tracing::debug;

use crate::{
    error::{Result, VcsError},
    exec,
    vcs::BackendTag,
};

/// Directory (or worktree pointer file) marking a Git repository.
pub const GIT_MARKER: &str = ".git";
/// Directory marking a Jujutsu repository.
pub const JJ_MARKER: &str = ".jj";
/// Git executable name.
pub const GIT_BINARY: &str = "git";
/// Jujutsu executable name.
pub const JJ_BINARY: &str = "jj";

/// Path segments under a Git meta-dir that hold per-worktree metadata.
const WORKTREE_SEGMENTS: &[&str] = &["worktrees", "beads-worktrees"];

/// What was found at and above a path.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DetectionResult {
    /// Backend to use; `Colocated` when both markers are present.
    pub tag: BackendTag,
    /// Nearest ancestor holding a marker (the worktree root inside a worktree).
    pub repo_root: PathBuf,
    /// Metadata directory for the backend.
    pub meta_dir: PathBuf,
    /// A Git marker is present.
    pub has_git: bool,
    /// A Jujutsu marker is present.
    pub has_jj: bool,
    /// Both markers are present.
    pub colocated: bool,
    /// `repo_root` is a linked Git worktree.
    pub is_worktree: bool,
    /// Root of the main repository; equals `repo_root` unless `is_worktree`.
    pub main_repo_root: PathBuf,
}

/// Which backend binaries can be executed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Availability {
    /// Git is installed.
    pub git: bool,
    /// Jujutsu is installed.
    pub jj: bool,
}

impl Availability {
    /// Search `PATH` and the well-known install locations.
    pub fn scan() -> Self {
        Self {
            git: find_binary(GIT_BINARY).is_some(),
            jj: find_binary(JJ_BINARY).is_some(),
        }
    }

    /// Whether the backend for `tag` is available. `Colocated` needs both.
    pub fn has(&self, tag: BackendTag) -> bool {
        match tag {
            BackendTag::Git => self.git,
            BackendTag::Jj => self.jj,
            BackendTag::Colocated => self.git && self.jj,
        }
    }

    /// Copy with the change backend switched off.
    pub fn without_jj(self) -> Self {
        Self { jj: false, ..self }
    }
}

/// Directories checked when a binary is not on `PATH`.
pub fn well_known_dirs() -> Vec<PathBuf> {
    let mut dirs = vec![
        PathBuf::from("/usr/bin"),
        PathBuf::from("/usr/local/bin"),
        PathBuf::from("/opt/homebrew/bin"),
    ];
    if let Some(home) = env::var_os("HOME") {
        let home = PathBuf::from(home);
        dirs.push(home.join(".cargo/bin"));
        dirs.push(home.join(".local/bin"));
        dirs.push(home.join(".nix-profile/bin"));
    }
    dirs
}

/// Locate an executable on `PATH` or in a well-known directory.
pub fn find_binary(name: &str) -> Option<PathBuf> {
    if let Ok(path) = which::which(name) {
        return Some(path);
    }
    well_known_dirs()
        .into_iter()
        .map(|dir| dir.join(name))
        .find(|candidate| candidate.is_file())
}

/// Resolve the binary for a backend, or report it unavailable.
pub fn require_binary(name: &str) -> Result<PathBuf> {
    find_binary(name).ok_or_else(|| VcsError::Unavailable {
        tool: name.to_string(),
        reason: "not found on PATH or in well-known locations".to_string(),
    })
}

/// Walk upward from `start` to the nearest directory holding a marker.
pub fn detect(start: &Path) -> Result<DetectionResult> {
    let start = absolute(start)?;
    let mut current = start.as_path();
    loop {
        let git_marker = current.join(GIT_MARKER);
        let jj_marker = current.join(JJ_MARKER);
        let has_git = git_marker.exists();
        let has_jj = jj_marker.is_dir();

        if has_git || has_jj {
            let result = describe(current, &git_marker, &jj_marker, has_git, has_jj)?;
            debug!(
                start = %start.display(),
                tag = %result.tag,
                root = %result.repo_root.display(),
                worktree = result.is_worktree,
                "detected repository"
            );
            return Ok(result);
        }

        match current.parent() {
            Some(parent) => current = parent,
            None => return Err(VcsError::NotInVcs { path: start }),
        }
    }
}

/// Detect, then make sure the chosen backend can actually run.
///
/// A colocated result is downgraded to whichever single backend is available.
pub fn detect_with_availability(
    start: &Path,
    availability: &Availability,
) -> Result<DetectionResult> {
    let mut result = detect(start)?;
    let tag = match result.tag {
        BackendTag::Colocated => match (availability.git, availability.jj) {
            (true, true) => BackendTag::Colocated,
            (true, false) => BackendTag::Git,
            (false, true) => BackendTag::Jj,
            (false, false) => return Err(unavailable(&["git", "jj"])),
        },
        BackendTag::Git if !availability.git => return Err(unavailable(&[GIT_BINARY])),
        BackendTag::Jj if !availability.jj => return Err(unavailable(&[JJ_BINARY])),
        tag => tag,
    };
    if tag != result.tag {
        debug!(from = %result.tag, to = %tag, "downgraded colocated detection");
        if tag == BackendTag::Git {
            result.meta_dir = git_meta_dir(&result.repo_root)?;
        }
        result.tag = tag;
    }
    Ok(result)
}

/// Error for binaries that could not be found.
fn unavailable(tools: &[&str]) -> VcsError {
    VcsError::Unavailable {
        tool: tools.join(" and "),
        reason: "not found on PATH or in well-known locations".to_string(),
    }
}

/// Build the result for a directory known to hold at least one marker.
fn describe(
    root: &Path,
    git_marker: &Path,
    jj_marker: &Path,
    has_git: bool,
    has_jj: bool,
) -> Result<DetectionResult> {
    let tag = match (has_git, has_jj) {
        (true, true) => BackendTag::Colocated,
        (true, false) => BackendTag::Git,
        _ => BackendTag::Jj,
    };

    let mut is_worktree = false;
    let mut main_repo_root = root.to_path_buf();
    let mut git_dir = git_marker.to_path_buf();

    if has_git && git_marker.is_file() {
        let pointer = read_gitdir_pointer(git_marker)?;
        if let Some(main) = main_root_from_gitdir(&pointer) {
            is_worktree = true;
            main_repo_root = main;
        }
        git_dir = pointer;
    }

    let meta_dir = if has_jj {
        jj_marker.to_path_buf()
    } else {
        git_dir
    };

    Ok(DetectionResult {
        tag,
        repo_root: root.to_path_buf(),
        meta_dir,
        has_git,
        has_jj,
        colocated: has_git && has_jj,
        is_worktree,
        main_repo_root,
    })
}

/// Git meta-dir for a root, following a worktree pointer file.
fn git_meta_dir(root: &Path) -> Result<PathBuf> {
    let marker = root.join(GIT_MARKER);
    if marker.is_file() {
        read_gitdir_pointer(&marker)
    } else {
        Ok(marker)
    }
}

/// Parse a `.git` file's `gitdir: <path>` line, resolving relative paths
/// against the file's directory.
pub fn read_gitdir_pointer(file: &Path) -> Result<PathBuf> {
    let contents = fs::read_to_string(file)?;
    let pointer = exec::parse_key_values(&contents, ':')
        .remove("gitdir")
        .filter(|p| !p.is_empty())
        .ok_or_else(|| VcsError::Parse {
            program: "git".to_string(),
            message: format!("{} has no gitdir line", file.display()),
        })?;

    let pointer = PathBuf::from(pointer);
    let resolved = if pointer.is_absolute() {
        pointer
    } else {
        file.parent().unwrap_or(Path::new("/")).join(pointer)
    };
    Ok(normalize_lexically(&resolved))
}

/// Main repository root for a worktree gitdir such as
/// `/repo/.git/worktrees/w1`: the grandparent of the worktrees segment.
pub fn main_root_from_gitdir(gitdir: &Path) -> Option<PathBuf> {
    let components: Vec<Component<'_>> = gitdir.components().collect();
    let index = components.iter().rposition(|c| {
        matches!(c, Component::Normal(name)
            if WORKTREE_SEGMENTS.iter().any(|s| name.to_str() == Some(*s)))
    })?;
    // A bare segment at the end is not a worktree entry.
    if index + 1 >= components.len() {
        return None;
    }
    let meta: PathBuf = components[..index].iter().collect();
    meta.parent().map(Path::to_path_buf)
}

/// Make `path` absolute and resolve symlinks where possible.
fn absolute(path: &Path) -> Result<PathBuf> {
    let joined = if path.is_absolute() {
        path.to_path_buf()
    } else {
        env::current_dir()?.join(path)
    };
    Ok(fs::canonicalize(&joined).unwrap_or_else(|_| normalize_lexically(&joined)))
}

/// Fold `.` and `..` without touching the filesystem.
fn normalize_lexically(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                out.pop();
            }
            other => out.push(other.as_os_str()),
        }
    }
    out
}
