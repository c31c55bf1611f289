use std::{
    fs,
    path::{Path, PathBuf},
};

use tracing::{debug, warn};

use super::GitBackend;
use crate::{
    error::{Result, VcsError},
    exec::ExecContext,
    vcs::{CommitOptions, PullOptions, PushOptions, Vcs, Workspace, WorkspaceOptions},
};

/// A linked worktree checked out on one branch.
///
/// Commits made here land on the branch without touching the main working
/// directory.
#[derive(Debug)]
pub struct GitWorkspace {
    /// Handle on the repository that owns the worktree.
    owner: GitBackend,
    /// Handle opened inside the worktree itself.
    checkout: GitBackend,
    /// Workspace name.
    name: String,
    /// Worktree directory.
    path: PathBuf,
    /// Branch checked out in the worktree.
    reference: String,
    /// Set once [`Workspace::cleanup`] succeeded.
    removed: bool,
}

impl GitWorkspace {
    /// Create the worktree, or reuse a healthy one already on `reference`.
    pub(crate) fn create(
        owner: GitBackend,
        ctx: &ExecContext,
        opts: &WorkspaceOptions,
    ) -> Result<Self> {
        if opts.name.trim().is_empty() || opts.reference.trim().is_empty() {
            return Err(VcsError::InvalidArgument(
                "workspace needs a name and a reference".to_string(),
            ));
        }
        let path = opts
            .path
            .clone()
            .unwrap_or_else(|| owner.worktree_path(&opts.name));

        if path.exists() {
            if !is_linked_worktree(&owner, ctx, &path)? {
                return Err(VcsError::WorkspaceExists {
                    name: format!("{} (not a worktree)", path.display()),
                });
            }
            match checkout_branch(&owner, ctx, &path) {
                Ok(branch) if branch == opts.reference => {
                    debug!(path = %path.display(), "reusing healthy worktree");
                    let checkout = GitBackend::open_with(&path, ctx)?;
                    return Ok(Self::assemble(owner, checkout, opts, path));
                }
                Ok(branch) => {
                    return Err(VcsError::WorkspaceExists {
                        name: format!("{} (on '{branch}')", path.display()),
                    });
                }
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "replacing unhealthy worktree");
                    owner.remove_worktree(ctx, &path)?;
                }
            }
        } else {
            // Drop registrations whose directories vanished.
            owner.git(ctx, &["worktree", "prune"])?;
        }

        let created_ref = !owner.branch_exists(ctx, &opts.reference)?;
        if created_ref {
            owner.create_ref(ctx, &opts.reference, "")?;
        }

        match Self::add_worktree(&owner, ctx, opts, &path) {
            Ok(checkout) => Ok(Self::assemble(owner, checkout, opts, path)),
            Err(e) => {
                if path.exists()
                    && let Err(cleanup) = owner.remove_worktree(ctx, &path)
                {
                    warn!(path = %path.display(), error = %cleanup, "rollback of worktree failed");
                }
                if created_ref && let Err(rollback) = owner.delete_ref(ctx, &opts.reference) {
                    warn!(reference = %opts.reference, error = %rollback, "rollback of branch failed");
                }
                Err(e)
            }
        }
    }

    /// Build the value once the worktree is in place.
    fn assemble(
        owner: GitBackend,
        checkout: GitBackend,
        opts: &WorkspaceOptions,
        path: PathBuf,
    ) -> Self {
        Self {
            owner,
            checkout,
            name: opts.name.clone(),
            path,
            reference: opts.reference.clone(),
            removed: false,
        }
    }

    /// Add the worktree, applying sparse patterns before the first checkout.
    fn add_worktree(
        owner: &GitBackend,
        ctx: &ExecContext,
        opts: &WorkspaceOptions,
        path: &Path,
    ) -> Result<GitBackend> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let rendered = path.to_string_lossy();

        if opts.sparse {
            owner.git(
                ctx,
                &["worktree", "add", "--no-checkout", &rendered, &opts.reference],
            )?;
            owner.git_in(path, ctx, &["sparse-checkout", "init", "--no-cone"])?;
            let mut args = vec!["sparse-checkout", "set", "--no-cone"];
            args.extend(opts.sparse_paths.iter().map(String::as_str));
            owner.git_in(path, ctx, &args)?;
            owner.git_in(path, ctx, &["read-tree", "-mu", "HEAD"])?;
        } else {
            owner.git(ctx, &["worktree", "add", &rendered, &opts.reference])?;
        }

        debug!(path = %path.display(), reference = %opts.reference, sparse = opts.sparse, "created worktree");
        GitBackend::open_with(path, ctx)
    }
}

/// Whether `path` is a linked worktree of `owner` or sits in the managed
/// worktree directory. Anything else belongs to the user and is never removed.
fn is_linked_worktree(owner: &GitBackend, ctx: &ExecContext, path: &Path) -> Result<bool> {
    let canonical = |p: &Path| fs::canonicalize(p).unwrap_or_else(|_| p.to_path_buf());
    let target = canonical(path);
    if target.starts_with(canonical(&owner.worktree_root())) {
        return Ok(true);
    }
    let main = canonical(owner.repo_root());
    Ok(owner
        .list_workspaces(ctx)?
        .into_iter()
        .filter_map(|w| w.path)
        .map(|p| canonical(&p))
        .any(|p| p == target && p != main))
}

/// Branch checked out at `path`, failing unless it is a worktree root.
fn checkout_branch(owner: &GitBackend, ctx: &ExecContext, path: &Path) -> Result<String> {
    let not_found = || VcsError::WorkspaceNotFound {
        name: path.display().to_string(),
    };
    let top = owner.git_raw_at(path, ctx, &["rev-parse", "--show-toplevel"])?;
    if !top.success() {
        return Err(not_found());
    }
    let top = PathBuf::from(top.stdout_text().trim());
    let same = match (fs::canonicalize(&top), fs::canonicalize(path)) {
        (Ok(a), Ok(b)) => a == b,
        _ => top == path,
    };
    if !same {
        return Err(not_found());
    }
    let branch = owner.git_raw_at(path, ctx, &["symbolic-ref", "--short", "-q", "HEAD"])?;
    Ok(branch.stdout_text().trim().to_string())
}

impl Workspace for GitWorkspace {
    fn path(&self) -> &Path {
        &self.path
    }

    fn reference(&self) -> &str {
        &self.reference
    }

    fn is_healthy(&self, ctx: &ExecContext) -> Result<()> {
        if self.removed || !self.path.exists() {
            return Err(VcsError::WorkspaceNotFound {
                name: self.name.clone(),
            });
        }
        checkout_branch(&self.owner, ctx, &self.path).map(|_| ())
    }

    fn has_changes(&self, ctx: &ExecContext) -> Result<bool> {
        self.is_healthy(ctx)?;
        self.checkout.has_changes(ctx, &[])
    }

    fn commit(&self, ctx: &ExecContext, opts: &CommitOptions) -> Result<()> {
        self.is_healthy(ctx)?;
        if !opts.allow_empty && !self.checkout.has_changes(ctx, &opts.paths)? {
            debug!(workspace = %self.name, "nothing to commit");
            return Ok(());
        }
        if opts.paths.is_empty() {
            self.checkout.add(ctx, &[])?;
        }
        self.checkout.commit(ctx, opts)
    }

    fn pull(&self, ctx: &ExecContext, opts: &PullOptions) -> Result<()> {
        self.is_healthy(ctx)?;
        let opts = PullOptions {
            reference: opts.reference.clone().or_else(|| Some(self.reference.clone())),
            ..opts.clone()
        };
        self.checkout.pull(ctx, &opts)
    }

    fn push(&self, ctx: &ExecContext, opts: &PushOptions) -> Result<()> {
        self.is_healthy(ctx)?;
        let opts = PushOptions {
            reference: opts.reference.clone().or_else(|| Some(self.reference.clone())),
            ..opts.clone()
        };
        self.checkout.push(ctx, &opts)
    }

    fn cleanup(&mut self, ctx: &ExecContext) -> Result<()> {
        if self.removed {
            return Ok(());
        }
        self.owner.remove_worktree(ctx, &self.path)?;
        self.removed = true;
        debug!(workspace = %self.name, "removed worktree");
        Ok(())
    }
}
