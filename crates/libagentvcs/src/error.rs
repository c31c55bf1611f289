use std::{io, path::PathBuf, result::Result as StdResult, time::Duration};

use thiserror::Error;

use crate::vcs::BackendTag;

/// Custom Result type for VCS operations.
pub type Result<T> = StdResult<T, VcsError>;

/// Backend-neutral classification of a failure.
///
/// Every tagged [`VcsError`] variant maps to exactly one kind. Callers should
/// branch on kinds (or the predicates below) rather than on variants, because
/// the same kind can surface from different backends with different detail.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// The path is not inside any supported repository.
    NotInVcs,
    /// The backend binary is missing or disabled.
    VcsUnavailable,
    /// A workspace already occupies the requested name or path.
    WorkspaceExists,
    /// The workspace does not exist or has been cleaned up.
    WorkspaceNotFound,
    /// A reference with the requested name already exists.
    RefExists,
    /// The requested reference does not exist.
    RefNotFound,
    /// The repository has no (matching) remote.
    NoRemote,
    /// The operation produced or found conflicts.
    Conflicts,
    /// Uncommitted changes block the operation.
    DirtyWorkspace,
    /// The backend cannot perform the operation.
    NotSupported,
    /// The operation needs an attached head or active bookmark.
    Detached,
    /// The operation was aborted.
    Aborted,
    /// The remote rejected a push.
    PushRejected,
    /// Local and remote histories must be merged first.
    MergeRequired,
    /// The subprocess timed out or was cancelled.
    Timeout,
}

impl ErrorKind {
    /// Whether retrying the same call later may succeed.
    pub fn is_retryable(self) -> bool {
        matches!(self, Self::Timeout | Self::PushRejected | Self::MergeRequired)
    }

    /// Whether a human has to intervene before the operation can succeed.
    pub fn requires_user_action(self) -> bool {
        matches!(
            self,
            Self::Conflicts | Self::MergeRequired | Self::PushRejected
        )
    }

    /// Whether the environment makes every further operation pointless.
    pub fn is_fatal(self) -> bool {
        matches!(self, Self::NotInVcs | Self::VcsUnavailable)
    }
}

/// Errors produced by the VCS layer.
#[derive(Error, Debug)]
pub enum VcsError {
    /// No repository marker was found at or above the path.
    #[error("Not in a version-controlled directory: {}", path.display())]
    NotInVcs {
        /// Path the lookup started from.
        path: PathBuf,
    },

    /// The backend binary is missing, broken, or disabled by configuration.
    #[error("{tool} is not available: {reason}")]
    Unavailable {
        /// Binary name.
        tool: String,
        /// Why it cannot be used.
        reason: String,
    },

    /// A workspace already exists.
    #[error("Workspace '{name}' already exists")]
    WorkspaceExists {
        /// Workspace name or path.
        name: String,
    },

    /// A workspace was not found.
    #[error("Workspace '{name}' not found")]
    WorkspaceNotFound {
        /// Workspace name or path.
        name: String,
    },

    /// A reference already exists.
    #[error("Reference '{name}' already exists")]
    RefExists {
        /// Reference name.
        name: String,
    },

    /// A reference does not exist.
    #[error("Reference '{name}' not found")]
    RefNotFound {
        /// Reference name.
        name: String,
    },

    /// No remote is configured, or the named one is missing.
    #[error("No remote configured{}", remote.as_ref().map(|r| format!(" named '{r}'")).unwrap_or_default())]
    NoRemote {
        /// Remote name, when a specific one was requested.
        remote: Option<String>,
    },

    /// Conflicts are present.
    #[error("Conflicts present: {message}")]
    Conflicts {
        /// Tool output or a list of conflicted paths.
        message: String,
    },

    /// Uncommitted changes block the operation.
    #[error("Uncommitted changes present in {}", path.display())]
    DirtyWorkspace {
        /// Working directory holding the changes.
        path: PathBuf,
    },

    /// The backend does not support the operation.
    #[error("{operation} is not supported by the {backend} backend")]
    NotSupported {
        /// Backend that refused.
        backend: BackendTag,
        /// Operation name.
        operation: String,
    },

    /// The working copy has no current reference.
    #[error("Not on a named reference: {0}")]
    Detached(String),

    /// The operation was aborted.
    #[error("Aborted: {0}")]
    Aborted(String),

    /// The remote rejected the push.
    #[error("Push rejected: {message}")]
    PushRejected {
        /// Tool output describing the rejection.
        message: String,
    },

    /// Histories must be merged before continuing.
    #[error("Merge required: {message}")]
    MergeRequired {
        /// Tool output describing the divergence.
        message: String,
    },

    /// The subprocess ran out of time or was cancelled.
    #[error("Command timed out after {}s: {command}", timeout.as_secs())]
    Timeout {
        /// Rendered command line.
        command: String,
        /// Timeout that was in effect.
        timeout: Duration,
    },

    /// A tool command failed and its output matched no known pattern.
    #[error("Command failed: {program} {}\nError: {stderr}", args.join(" "))]
    Command {
        /// Program that was run.
        program: String,
        /// Arguments passed to it.
        args: Vec<String>,
        /// Exit code, if the process exited normally.
        code: Option<i32>,
        /// Full captured stderr.
        stderr: String,
    },

    /// Tool output could not be understood.
    #[error("Unexpected output from {program}: {message}")]
    Parse {
        /// Program whose output was parsed.
        program: String,
        /// What was wrong with it.
        message: String,
    },

    /// A constructor is already registered for the tag.
    #[error("Backend '{0}' is already registered")]
    DuplicateBackend(BackendTag),

    /// No constructor is registered for the tag.
    #[error("Backend '{tag}' is not registered (available: {})", display_tags(available))]
    UnknownBackend {
        /// Requested tag.
        tag: BackendTag,
        /// Tags that are registered.
        available: Vec<BackendTag>,
    },

    /// A caller-supplied argument was rejected before reaching the tool.
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// A lifecycle step failed; wraps the underlying error.
    #[error("{step}: {source}")]
    Step {
        /// Step that failed.
        step: String,
        /// Underlying error.
        #[source]
        source: Box<VcsError>,
    },

    /// An underlying I/O operation failed.
    #[error("IO error: {0}")]
    Io(#[from] io::Error),
}

/// Render a tag list for error messages.
fn display_tags(tags: &[BackendTag]) -> String {
    if tags.is_empty() {
        return "none".to_string();
    }
    tags.iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(", ")
}

impl VcsError {
    /// Taxonomy tag for this error, looking through step wrappers.
    pub fn kind(&self) -> Option<ErrorKind> {
        Some(match self {
            Self::NotInVcs { .. } => ErrorKind::NotInVcs,
            Self::Unavailable { .. } => ErrorKind::VcsUnavailable,
            Self::WorkspaceExists { .. } => ErrorKind::WorkspaceExists,
            Self::WorkspaceNotFound { .. } => ErrorKind::WorkspaceNotFound,
            Self::RefExists { .. } => ErrorKind::RefExists,
            Self::RefNotFound { .. } => ErrorKind::RefNotFound,
            Self::NoRemote { .. } => ErrorKind::NoRemote,
            Self::Conflicts { .. } => ErrorKind::Conflicts,
            Self::DirtyWorkspace { .. } => ErrorKind::DirtyWorkspace,
            Self::NotSupported { .. } => ErrorKind::NotSupported,
            Self::Detached(_) => ErrorKind::Detached,
            Self::Aborted(_) => ErrorKind::Aborted,
            Self::PushRejected { .. } => ErrorKind::PushRejected,
            Self::MergeRequired { .. } => ErrorKind::MergeRequired,
            Self::Timeout { .. } => ErrorKind::Timeout,
            Self::Step { source, .. } => return source.kind(),
            Self::Command { .. }
            | Self::Parse { .. }
            | Self::DuplicateBackend(_)
            | Self::UnknownBackend { .. }
            | Self::InvalidArgument(_)
            | Self::Io(_) => return None,
        })
    }

    /// Whether this error has the given kind.
    pub fn is(&self, kind: ErrorKind) -> bool {
        self.kind() == Some(kind)
    }

    /// Whether retrying later may succeed.
    pub fn is_retryable(&self) -> bool {
        self.kind().is_some_and(ErrorKind::is_retryable)
    }

    /// Whether a human must resolve something first.
    pub fn requires_user_action(&self) -> bool {
        self.kind().is_some_and(ErrorKind::requires_user_action)
    }

    /// Whether the environment cannot support any VCS operation.
    pub fn is_fatal(&self) -> bool {
        self.kind().is_some_and(ErrorKind::is_fatal)
    }

    /// Wrap this error with the name of the step that produced it.
    pub fn in_step(self, step: impl Into<String>) -> Self {
        Self::Step {
            step: step.into(),
            source: Box::new(self),
        }
    }

    /// Return the recommended process exit code for this error.
    pub fn exit_code(&self) -> i32 {
        match self.kind() {
            Some(ErrorKind::Timeout) => 124,
            Some(kind) if kind.requires_user_action() => 2,
            Some(kind) if kind.is_fatal() => 3,
            _ => 1,
        }
    }
}

/// Extension for attaching a step name to a fallible result.
pub trait StepExt<T> {
    /// Wrap the error, if any, with `step`.
    fn step(self, step: &str) -> Result<T>;
}

impl<T> StepExt<T> for Result<T> {
    fn step(self, step: &str) -> Result<T> {
        self.map_err(|e| e.in_step(step))
    }
}
