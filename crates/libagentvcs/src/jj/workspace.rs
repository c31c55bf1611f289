use std::{path::Path, sync::Mutex};

use chrono::Utc;
use tracing::{debug, warn};

use super::JjBackend;
use crate::{
    error::{Result, VcsError},
    exec::ExecContext,
    vcs::{CommitOptions, PullOptions, PushOptions, Vcs, Workspace, WorkspaceOptions},
};

/// Template printing a change id.
const CHANGE_ID_TEMPLATE: &str = r#"change_id ++ "\n""#;

/// Template printing whether a change is empty.
const EMPTY_TEMPLATE: &str = r#"if(empty, "true", "false") ++ "\n""#;

/// Puts the working copy back on the change it started on when dropped.
///
/// If that change no longer exists (jj abandons an empty, undescribed working
/// copy once it is left), a fresh change is started on its parent instead.
struct WorkingCopyGuard<'a> {
    /// Backend the working copy belongs to.
    backend: &'a JjBackend,
    /// Context for the restoring commands.
    ctx: &'a ExecContext,
    /// Change id of the original working copy.
    original: String,
    /// Commit id of the original working copy's parent.
    parent: String,
    /// Set once restoration ran.
    restored: bool,
}

impl<'a> WorkingCopyGuard<'a> {
    /// Record the current working-copy change.
    fn enter(backend: &'a JjBackend, ctx: &'a ExecContext) -> Result<Self> {
        let original = backend.change_id(ctx, "@")?;
        let parent = backend.log_one(ctx, "@-", super::COMMIT_ID_TEMPLATE)?;
        debug!(change = %original, "saved working-copy change");
        Ok(Self {
            backend,
            ctx,
            original,
            parent,
            restored: false,
        })
    }

    /// Restore now and report the outcome.
    fn finish(mut self) -> Result<()> {
        self.restore()
    }

    /// Move the working copy back; runs at most once.
    fn restore(&mut self) -> Result<()> {
        if self.restored {
            return Ok(());
        }
        self.restored = true;
        match self.backend.jj(self.ctx, &["edit", &self.original]) {
            Ok(_) => Ok(()),
            Err(e) => {
                warn!(
                    change = %self.original,
                    error = %e,
                    "original change is gone, starting a new one on its parent"
                );
                self.backend.jj(self.ctx, &["new", &self.parent])?;
                Ok(())
            }
        }
    }
}

impl Drop for WorkingCopyGuard<'_> {
    fn drop(&mut self) {
        if let Err(e) = self.restore() {
            warn!(change = %self.original, error = %e, "failed to restore working copy");
        }
    }
}

/// Description for a fresh workspace change.
fn sync_message(name: &str) -> String {
    format!("{name} sync {}", Utc::now().format("%Y-%m-%dT%H:%M:%SZ"))
}

/// A dedicated change plus bookmark; shares the repository's working directory.
#[derive(Debug)]
pub struct JjWorkspace {
    /// Repository handle.
    backend: JjBackend,
    /// Workspace name, used in change descriptions.
    name: String,
    /// Bookmark bound to the workspace change.
    reference: String,
    /// Change id of the workspace change; the bookmark always points at it.
    change: Mutex<String>,
    /// Set once [`Workspace::cleanup`] ran.
    removed: bool,
}

impl JjWorkspace {
    /// Start a sync change on `reference` (or the working copy when the
    /// bookmark is missing) and bind the bookmark to it.
    pub(crate) fn create(
        backend: JjBackend,
        ctx: &ExecContext,
        opts: &WorkspaceOptions,
    ) -> Result<Self> {
        if opts.name.trim().is_empty() || opts.reference.trim().is_empty() {
            return Err(VcsError::InvalidArgument(
                "workspace needs a name and a reference".to_string(),
            ));
        }
        if opts.path.is_some() || opts.sparse {
            debug!("jj workspaces use the repository root; path and sparse options ignored");
        }

        let base = if backend.bookmark_exists(ctx, &opts.reference)? {
            opts.reference.clone()
        } else {
            "@".to_string()
        };
        let message = sync_message(&opts.name);

        let guard = WorkingCopyGuard::enter(&backend, ctx)?;
        backend.jj(ctx, &["new", &super::revision(&base), "-m", &message])?;
        let change = backend.change_id(ctx, "@")?;

        if let Err(e) = backend.set_bookmark(ctx, &opts.reference, "@") {
            if let Err(abandon) = backend.jj(ctx, &["abandon", &change]) {
                warn!(change = %change, error = %abandon, "rollback of workspace change failed");
            }
            return Err(e);
        }
        guard.finish()?;

        debug!(name = %opts.name, bookmark = %opts.reference, change = %change, "created jj workspace");
        Ok(Self {
            backend,
            name: opts.name.clone(),
            reference: opts.reference.clone(),
            change: Mutex::new(change),
            removed: false,
        })
    }

    /// Current workspace change id.
    fn change(&self) -> String {
        self.change.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    /// Fail unless the workspace is still usable.
    fn require_live(&self) -> Result<()> {
        if self.removed {
            return Err(VcsError::WorkspaceNotFound {
                name: self.name.clone(),
            });
        }
        Ok(())
    }

    /// Run `f` with the working copy on the workspace change.
    fn with_change<T>(
        &self,
        ctx: &ExecContext,
        f: impl FnOnce(&JjBackend) -> Result<T>,
    ) -> Result<T> {
        self.require_live()?;
        let guard = WorkingCopyGuard::enter(&self.backend, ctx)?;
        self.backend.jj(ctx, &["edit", &self.change()])?;
        let value = f(&self.backend)?;
        guard.finish()?;
        Ok(value)
    }
}

impl Workspace for JjWorkspace {
    fn path(&self) -> &Path {
        self.backend.repo_root()
    }

    fn reference(&self) -> &str {
        &self.reference
    }

    fn is_healthy(&self, ctx: &ExecContext) -> Result<()> {
        self.require_live()?;
        let missing = || VcsError::WorkspaceNotFound {
            name: self.name.clone(),
        };
        let change = self.backend.log_one(ctx, &self.change(), CHANGE_ID_TEMPLATE);
        if !matches!(change, Ok(ref id) if !id.is_empty()) {
            return Err(missing());
        }
        if !self.backend.bookmark_exists(ctx, &self.reference)? {
            return Err(missing());
        }
        Ok(())
    }

    fn has_changes(&self, ctx: &ExecContext) -> Result<bool> {
        self.with_change(ctx, |backend| backend.has_changes(ctx, &[]))
    }

    fn commit(&self, ctx: &ExecContext, opts: &CommitOptions) -> Result<()> {
        let sealed = self.with_change(ctx, |backend| {
            if !opts.allow_empty && !backend.has_changes(ctx, &[])? {
                debug!(bookmark = %self.reference, "nothing to commit in workspace");
                return Ok(None);
            }
            backend.commit(
                ctx,
                &CommitOptions {
                    paths: Vec::new(),
                    create_new: false,
                    ..opts.clone()
                },
            )?;
            if !opts.create_new {
                return Ok(None);
            }
            // The bookmark follows the workspace onto its next change.
            backend.jj(ctx, &["new", "-m", &sync_message(&self.name)])?;
            backend.set_bookmark(ctx, &self.reference, "@")?;
            Ok(Some(backend.change_id(ctx, "@")?))
        })?;
        if let Some(successor) = sealed {
            *self.change.lock().unwrap_or_else(|e| e.into_inner()) = successor;
        }
        Ok(())
    }

    fn pull(&self, ctx: &ExecContext, opts: &PullOptions) -> Result<()> {
        self.require_live()?;
        let opts = PullOptions {
            reference: Some(opts.reference.clone().unwrap_or_else(|| self.reference.clone())),
            ..opts.clone()
        };
        self.backend.pull(ctx, &opts)
    }

    fn push(&self, ctx: &ExecContext, opts: &PushOptions) -> Result<()> {
        self.require_live()?;
        let opts = PushOptions {
            reference: Some(opts.reference.clone().unwrap_or_else(|| self.reference.clone())),
            ..opts.clone()
        };
        self.backend.push(ctx, &opts)
    }

    fn cleanup(&mut self, ctx: &ExecContext) -> Result<()> {
        if self.removed {
            return Ok(());
        }
        let change = self.change();
        match self.backend.log_one(ctx, &change, EMPTY_TEMPLATE) {
            Ok(empty) if empty == "true" => {
                self.backend.jj(ctx, &["abandon", &change])?;
            }
            Ok(_) => debug!(change = %change, "keeping non-empty workspace change"),
            Err(e) => debug!(change = %change, error = %e, "workspace change already gone"),
        }
        // Abandoning may already have removed the bookmark.
        if let Err(e) = self.backend.jj(ctx, &["bookmark", "delete", &self.reference]) {
            warn!(bookmark = %self.reference, error = %e, "failed to delete workspace bookmark");
        }
        self.removed = true;
        Ok(())
    }
}
