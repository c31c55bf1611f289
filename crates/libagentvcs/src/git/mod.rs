//! Git backend: a snapshot tool with a staging area, worktrees for isolation
//! and the reflog standing in for an operation journal.

mod workspace;

use std::{
    collections::{HashMap, HashSet},
    fs,
    path::{Path, PathBuf},
    process,
    sync::LazyLock,
};

use chrono::{DateTime, FixedOffset};
use tracing::{debug, warn};

pub use self::workspace::GitWorkspace;
use crate::{
    detect::{GIT_BINARY, find_binary},
    error::{ErrorKind, Result, VcsError},
    exec::{self, CommandOutput, ExecContext, Patterns, Tool},
    vcs::{
        BackendTag, CommitOptions, Divergence, FileStatus, OperationRecord, PullOptions,
        PushOptions, Ref, Remote, StatusCode, Vcs, Workspace, WorkspaceInfo, WorkspaceOptions,
    },
};

/// Directory under the common git dir holding managed worktrees.
pub const WORKTREE_DIR: &str = "beads-worktrees";

/// Files and directories inside the git dir that mark an operation in progress.
const IN_PROGRESS_MARKERS: &[&str] = &[
    "rebase-merge",
    "rebase-apply",
    "MERGE_HEAD",
    "CHERRY_PICK_HEAD",
    "REVERT_HEAD",
];

/// Two-letter porcelain codes for unmerged paths.
const UNMERGED_CODES: &[&str] = &["DD", "AU", "UD", "UA", "DU", "AA", "UU"];

/// Field separator used in custom `--format` strings.
const FIELD_SEP: char = '\u{1f}';

/// Git's messages mapped onto the error taxonomy.
static PATTERNS: LazyLock<Patterns> = LazyLock::new(|| {
    Patterns::new(&[
        (r"(?i)not a git repository", ErrorKind::NotInVcs),
        (
            r"(?i)\[rejected\]|\[remote rejected\]|non-fast-forward|fetch first|stale info",
            ErrorKind::PushRejected,
        ),
        (
            r"(?i)divergent branches|not possible to fast-forward|need to specify how to reconcile",
            ErrorKind::MergeRequired,
        ),
        (
            r"CONFLICT \(|(?i)could not apply|you have unmerged paths|fix conflicts",
            ErrorKind::Conflicts,
        ),
        (
            r"(?i)would be overwritten|your local changes|cannot .* you have unstaged changes",
            ErrorKind::DirtyWorkspace,
        ),
        (
            r"(?i)no such remote|does not appear to be a git repository",
            ErrorKind::NoRemote,
        ),
        (r"(?i)a branch named '.+' already exists", ErrorKind::RefExists),
        (
            r"(?i)already checked out at|is already used by worktree|already exists",
            ErrorKind::WorkspaceExists,
        ),
        (r"(?i)is not a working tree", ErrorKind::WorkspaceNotFound),
        (
            r"(?i)unknown revision|bad revision|not a valid object name|invalid reference|not a valid ref|couldn't find remote ref|branch '.+' not found",
            ErrorKind::RefNotFound,
        ),
    ])
});

/// A handle on one Git repository (or linked worktree).
#[derive(Debug, Clone)]
pub struct GitBackend {
    /// The git executable plus fixed environment.
    tool: Tool,
    /// Top level of the worktree the handle was opened in; commands run here.
    work_dir: PathBuf,
    /// Main repository root: the parent of the common dir.
    repo_root: PathBuf,
    /// Per-worktree git dir.
    git_dir: PathBuf,
    /// Git dir shared by every worktree.
    common_dir: PathBuf,
}

impl GitBackend {
    /// Open the repository containing `path`.
    pub fn open(path: &Path) -> Result<Self> {
        Self::open_with(path, &ExecContext::default())
    }

    /// Open with an explicit context for the discovery query.
    pub fn open_with(path: &Path, ctx: &ExecContext) -> Result<Self> {
        let program = find_binary(GIT_BINARY).unwrap_or_else(|| PathBuf::from(GIT_BINARY));
        let tool = Tool::new(program)
            .env("GIT_TERMINAL_PROMPT", "0")
            .env("LC_ALL", "C");

        let args = ["rev-parse", "--git-dir", "--git-common-dir", "--show-toplevel"];
        let output = tool.run_checked(path, &args, ctx, |p, a, o| {
            PATTERNS.classify(path, p, a, o)
        })?;
        let text = output.stdout_text();
        let lines = exec::parse_lines(&text);
        let [git_dir, common_dir, top_level] = lines[..] else {
            return Err(VcsError::Parse {
                program: tool.display_name(),
                message: format!("expected three lines from rev-parse, got {:?}", text.trim()),
            });
        };

        // rev-parse reports the dirs relative to the directory it ran in.
        let resolve = |p: &str| {
            let joined = path.join(p);
            fs::canonicalize(&joined).unwrap_or(joined)
        };
        let git_dir = resolve(git_dir);
        let common_dir = resolve(common_dir);
        let work_dir = resolve(top_level);
        let repo_root = common_dir
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_else(|| work_dir.clone());

        debug!(
            root = %repo_root.display(),
            work_dir = %work_dir.display(),
            worktree = git_dir != common_dir,
            "opened git repository"
        );
        Ok(Self {
            tool,
            work_dir,
            repo_root,
            git_dir,
            common_dir,
        })
    }

    /// Top level of the worktree this handle operates on.
    pub fn work_dir(&self) -> &Path {
        &self.work_dir
    }

    /// Git dir shared by every worktree.
    pub fn common_dir(&self) -> &Path {
        &self.common_dir
    }

    /// Whether the handle was opened inside a linked worktree.
    pub fn is_worktree(&self) -> bool {
        self.git_dir != self.common_dir
    }

    /// Run git in the work dir and require success.
    fn git(&self, ctx: &ExecContext, args: &[&str]) -> Result<CommandOutput> {
        self.git_in(&self.work_dir, ctx, args)
    }

    /// Run git in `dir` (possibly another worktree) and require success.
    pub(crate) fn git_in(
        &self,
        dir: &Path,
        ctx: &ExecContext,
        args: &[&str],
    ) -> Result<CommandOutput> {
        self.tool
            .run_checked(dir, args, ctx, |p, a, o| PATTERNS.classify(dir, p, a, o))
    }

    /// Run git in the work dir and return stdout.
    fn git_text(&self, ctx: &ExecContext, args: &[&str]) -> Result<String> {
        Ok(self.git(ctx, args)?.stdout_text())
    }

    /// Run git without interpreting the exit code.
    fn git_raw(&self, ctx: &ExecContext, args: &[&str]) -> Result<CommandOutput> {
        self.tool.run(&self.work_dir, args, ctx)
    }

    /// Whether a local branch exists.
    fn branch_exists(&self, ctx: &ExecContext, name: &str) -> Result<bool> {
        let full = format!("refs/heads/{name}");
        Ok(self
            .git_raw(ctx, &["rev-parse", "--verify", "--quiet", &full])?
            .success())
    }

    /// Fail with `RefNotFound` unless the local branch exists.
    fn require_branch(&self, ctx: &ExecContext, name: &str) -> Result<()> {
        if self.branch_exists(ctx, name)? {
            Ok(())
        } else {
            Err(VcsError::RefNotFound {
                name: name.to_string(),
            })
        }
    }

    /// Remote to use for `requested`, or `None` in local-only mode.
    fn pick_remote(&self, ctx: &ExecContext, requested: Option<&str>) -> Result<Option<String>> {
        let remotes = self.remotes(ctx)?;
        let chosen = match requested.filter(|r| !r.is_empty()) {
            Some(name) => remotes.iter().find(|r| r.name == name),
            None => remotes
                .iter()
                .find(|r| r.name == "origin")
                .or_else(|| remotes.first()),
        };
        if chosen.is_none() {
            debug!(requested = ?requested, "no matching remote, local-only mode");
        }
        Ok(chosen.map(|r| r.name.clone()))
    }

    /// Location for a managed worktree called `name`.
    pub(crate) fn worktree_path(&self, name: &str) -> PathBuf {
        self.worktree_root().join(name)
    }

    /// Directory holding the worktrees this crate creates.
    pub(crate) fn worktree_root(&self) -> PathBuf {
        self.common_dir.join(WORKTREE_DIR)
    }

    /// Run `args` in another worktree without interpreting the exit code.
    pub(crate) fn git_raw_at(
        &self,
        dir: &Path,
        ctx: &ExecContext,
        args: &[&str],
    ) -> Result<CommandOutput> {
        self.tool.run(dir, args, ctx)
    }

    /// Work out how to reverse the newest reflog entry across all refs.
    fn undo_step(&self, ctx: &ExecContext) -> Result<Option<UndoStep>> {
        let Some(newest) = self.operation_log(ctx, 1)?.into_iter().next() else {
            return Ok(None);
        };
        let Some((reference, _)) = newest.id.rsplit_once("@{") else {
            return Ok(None);
        };
        let current = self.current_ref(ctx)?;
        let checked_out = reference == "HEAD"
            || (!current.is_empty() && reference == format!("refs/heads/{current}"));
        let previous = match self.commit_hash(ctx, &format!("{reference}@{{1}}")) {
            Ok(hash) => Some(hash),
            Err(e) if e.is(ErrorKind::RefNotFound) => None,
            Err(e) => return Err(e),
        };
        // Removing a freshly created ref is only safe when nothing has it checked out.
        if previous.is_none() && (checked_out || !reference.starts_with("refs/")) {
            return Ok(None);
        }
        Ok(Some(UndoStep {
            reference: reference.to_string(),
            previous,
            checked_out,
        }))
    }

    /// Remove a worktree, falling back to deleting it and pruning.
    pub(crate) fn remove_worktree(&self, ctx: &ExecContext, path: &Path) -> Result<()> {
        let rendered = path.to_string_lossy();
        let removed = self.git_raw(ctx, &["worktree", "remove", "--force", &rendered])?;
        if !removed.success() {
            debug!(
                path = %path.display(),
                stderr = %removed.stderr_text(),
                "worktree remove failed, deleting directory"
            );
            if path.exists() {
                fs::remove_dir_all(path)?;
            }
        }
        self.git(ctx, &["worktree", "prune"])?;
        Ok(())
    }

    /// Rebase `name` onto `onto` in a scratch worktree and return the new head.
    fn rebase_in_scratch(&self, ctx: &ExecContext, name: &str, onto: &str) -> Result<String> {
        let scratch_name = format!("rebase-{}-{}", name.replace('/', "-"), process::id());
        let scratch = self.worktree_path(&scratch_name);
        if scratch.exists() {
            self.remove_worktree(ctx, &scratch)?;
        }
        if let Some(parent) = scratch.parent() {
            fs::create_dir_all(parent)?;
        }
        let rendered = scratch.to_string_lossy();
        self.git(ctx, &["worktree", "add", "--detach", &rendered, name])?;

        let result = match self.git_in(&scratch, ctx, &["rebase", onto]) {
            Ok(_) => self
                .git_in(&scratch, ctx, &["rev-parse", "HEAD"])
                .map(|o| o.stdout_text().trim().to_string()),
            Err(e) => {
                if let Err(abort) = self.git_raw_at(&scratch, ctx, &["rebase", "--abort"]) {
                    warn!(error = %abort, "rebase --abort failed");
                }
                Err(match e {
                    e if e.is(ErrorKind::Conflicts) => e,
                    other => VcsError::Conflicts {
                        message: format!("rebasing {name} onto {onto} failed: {other}"),
                    },
                })
            }
        };

        if let Err(e) = self.remove_worktree(ctx, &scratch) {
            warn!(path = %scratch.display(), error = %e, "failed to remove rebase worktree");
        }
        result
    }

    /// Parse `git status --porcelain -z` output.
    fn parse_status(text: &str) -> Vec<FileStatus> {
        let mut entries = Vec::new();
        let mut fields = text.split('\0').filter(|f| !f.is_empty());
        while let Some(field) = fields.next() {
            let Some((xy, path)) = field.split_at_checked(2) else {
                continue;
            };
            let path = path.strip_prefix(' ').unwrap_or(path);
            let mut chars = xy.chars();
            let (x, y) = (chars.next().unwrap_or(' '), chars.next().unwrap_or(' '));
            if matches!(x, 'R' | 'C') {
                // The original path follows in its own field.
                fields.next();
            }
            let (staged, working) = if UNMERGED_CODES.contains(&xy) {
                (StatusCode::Unmerged, StatusCode::Unmerged)
            } else {
                (status_code(x), status_code(y))
            };
            entries.push(FileStatus {
                path: PathBuf::from(path),
                working,
                staged,
            });
        }
        entries
    }

    /// Raw porcelain status, optionally limited to paths.
    fn porcelain(&self, ctx: &ExecContext, paths: &[PathBuf]) -> Result<String> {
        let paths = exec::path_args(paths)?;
        let mut args = vec!["status", "--porcelain", "-z"];
        if !paths.is_empty() {
            args.push("--");
            args.extend(paths.iter().map(String::as_str));
        }
        self.git_text(ctx, &args)
    }
}

/// Map one porcelain status letter.
fn status_code(c: char) -> StatusCode {
    match c {
        'M' | 'T' => StatusCode::Modified,
        'A' => StatusCode::Added,
        'D' => StatusCode::Deleted,
        'R' => StatusCode::Renamed,
        'C' => StatusCode::Copied,
        'U' => StatusCode::Unmerged,
        '?' => StatusCode::Untracked,
        '!' => StatusCode::Ignored,
        _ => StatusCode::Unmodified,
    }
}

/// Reject names git would read as options.
fn validate_ref_name(name: &str) -> Result<()> {
    if name.trim().is_empty() || name.starts_with('-') {
        return Err(VcsError::InvalidArgument(format!(
            "invalid reference name: {name:?}"
        )));
    }
    Ok(())
}

/// The reversal of one reflog entry.
struct UndoStep {
    /// Full ref name, or `HEAD`.
    reference: String,
    /// Where the ref pointed before the entry; `None` when the entry created it.
    previous: Option<String>,
    /// Whether the ref is what the working tree has checked out.
    checked_out: bool,
}

/// `HEAD` when `reference` is empty.
fn or_head(reference: &str) -> &str {
    if reference.is_empty() { "HEAD" } else { reference }
}

/// Parse `reflog show --all --date=unix` lines of
/// `selector, subject, identity` into records, newest first.
fn parse_reflog(text: &str) -> Vec<OperationRecord> {
    let mut seen: HashMap<String, usize> = HashMap::new();
    let mut records: Vec<(i64, OperationRecord)> = Vec::new();
    for line in exec::parse_lines(text) {
        let mut fields = line.split(FIELD_SEP);
        let (Some(selector), Some(subject), Some(user)) =
            (fields.next(), fields.next(), fields.next())
        else {
            continue;
        };
        let Some((reference, stamp)) = selector
            .strip_suffix('}')
            .and_then(|s| s.rsplit_once("@{"))
        else {
            continue;
        };
        let Ok(seconds) = stamp.parse::<i64>() else {
            continue;
        };
        // Entries for one ref arrive newest first, so the count is the index.
        let index = seen.entry(reference.to_string()).or_default();
        let id = format!("{reference}@{{{index}}}");
        *index += 1;

        let timestamp: Option<DateTime<FixedOffset>> =
            DateTime::from_timestamp(seconds, 0).map(|t| t.fixed_offset());
        records.push((
            seconds,
            OperationRecord {
                id,
                timestamp,
                description: subject.to_string(),
                user: user.to_string(),
                args: vec![reference.to_string()],
            },
        ));
    }
    records.sort_by(|a, b| b.0.cmp(&a.0));
    records.into_iter().map(|(_, r)| r).collect()
}

impl Vcs for GitBackend {
    fn name(&self) -> BackendTag {
        BackendTag::Git
    }

    fn version(&self, ctx: &ExecContext) -> Result<String> {
        let text = self.git_text(ctx, &["--version"])?;
        let text = text.trim();
        Ok(text.strip_prefix("git version ").unwrap_or(text).to_string())
    }

    fn repo_root(&self) -> &Path {
        &self.repo_root
    }

    fn meta_dir(&self) -> &Path {
        &self.git_dir
    }

    fn is_in_vcs(&self, ctx: &ExecContext) -> bool {
        self.git_raw(ctx, &["rev-parse", "--is-inside-work-tree"])
            .is_ok_and(|o| o.success() && o.stdout_text().trim() == "true")
    }

    fn current_ref(&self, ctx: &ExecContext) -> Result<String> {
        let args = ["symbolic-ref", "--short", "-q", "HEAD"];
        let output = self.git_raw(ctx, &args)?;
        match output.code {
            Some(0) => Ok(output.stdout_text().trim().to_string()),
            // Exit 1 with -q means HEAD is detached.
            Some(1) => Ok(String::new()),
            _ => Err(PATTERNS.classify(&self.work_dir, "git", &args, &output)),
        }
    }

    fn ref_exists(&self, ctx: &ExecContext, name: &str) -> Result<bool> {
        validate_ref_name(name)?;
        if self.branch_exists(ctx, name)? {
            return Ok(true);
        }
        let remote = format!("refs/remotes/{name}");
        Ok(self
            .git_raw(ctx, &["rev-parse", "--verify", "--quiet", &remote])?
            .success())
    }

    fn create_ref(&self, ctx: &ExecContext, name: &str, base: &str) -> Result<()> {
        validate_ref_name(name)?;
        if self.branch_exists(ctx, name)? {
            return Err(VcsError::RefExists {
                name: name.to_string(),
            });
        }
        self.git(ctx, &["branch", name, or_head(base)])?;
        Ok(())
    }

    fn delete_ref(&self, ctx: &ExecContext, name: &str) -> Result<()> {
        validate_ref_name(name)?;
        self.require_branch(ctx, name)?;
        self.git(ctx, &["branch", "-D", name])?;
        Ok(())
    }

    fn move_ref(&self, ctx: &ExecContext, name: &str, target: &str) -> Result<()> {
        validate_ref_name(name)?;
        self.require_branch(ctx, name)?;
        let hash = self.commit_hash(ctx, target)?;
        if self.current_ref(ctx)? == name {
            // Keeps the index and working tree in step with the branch.
            self.git(ctx, &["reset", "--keep", &hash])?;
        } else {
            self.git(ctx, &["branch", "-f", name, &hash])?;
        }
        Ok(())
    }

    fn list_refs(&self, ctx: &ExecContext) -> Result<Vec<Ref>> {
        let text = self.git_text(
            ctx,
            &[
                "for-each-ref",
                "--format=%(refname)%09%(objectname)",
                "refs/heads",
                "refs/remotes",
            ],
        )?;
        let mut refs = Vec::new();
        for line in exec::parse_lines(&text) {
            let Some((full, hash)) = line.split_once('\t') else {
                continue;
            };
            if let Some(name) = full.strip_prefix("refs/heads/") {
                refs.push(Ref {
                    name: name.to_string(),
                    hash: hash.to_string(),
                    remote: None,
                    is_remote: false,
                });
            } else if let Some((remote, name)) = full
                .strip_prefix("refs/remotes/")
                .and_then(|short| short.split_once('/'))
                && name != "HEAD"
            {
                refs.push(Ref {
                    name: name.to_string(),
                    hash: hash.to_string(),
                    remote: Some(remote.to_string()),
                    is_remote: true,
                });
            }
        }
        Ok(refs)
    }

    fn has_changes(&self, ctx: &ExecContext, paths: &[PathBuf]) -> Result<bool> {
        Ok(!self.porcelain(ctx, paths)?.trim_matches('\0').is_empty())
    }

    fn has_unmerged_paths(&self, ctx: &ExecContext) -> Result<bool> {
        Ok(!self.conflicted_files(ctx)?.is_empty())
    }

    fn is_in_rebase_or_merge(&self, _ctx: &ExecContext) -> Result<bool> {
        Ok(IN_PROGRESS_MARKERS
            .iter()
            .any(|marker| self.git_dir.join(marker).exists()))
    }

    fn has_remote(&self, ctx: &ExecContext) -> Result<bool> {
        Ok(!self.remotes(ctx)?.is_empty())
    }

    fn remotes(&self, ctx: &ExecContext) -> Result<Vec<Remote>> {
        let text = self.git_text(ctx, &["remote", "-v"])?;
        let mut seen = HashSet::new();
        let mut remotes = Vec::new();
        for line in exec::parse_lines(&text) {
            let mut parts = line.split_whitespace();
            let (Some(name), Some(url)) = (parts.next(), parts.next()) else {
                continue;
            };
            if seen.insert(name.to_string()) {
                remotes.push(Remote {
                    name: name.to_string(),
                    url: url.to_string(),
                });
            }
        }
        Ok(remotes)
    }

    fn add(&self, ctx: &ExecContext, paths: &[PathBuf]) -> Result<()> {
        let paths = exec::path_args(paths)?;
        let mut args = vec!["add"];
        if paths.is_empty() {
            args.push("-A");
        } else {
            args.push("--");
            args.extend(paths.iter().map(String::as_str));
        }
        self.git(ctx, &args)?;
        Ok(())
    }

    fn status(&self, ctx: &ExecContext, paths: &[PathBuf]) -> Result<Vec<FileStatus>> {
        Ok(Self::parse_status(&self.porcelain(ctx, paths)?))
    }

    fn commit(&self, ctx: &ExecContext, opts: &CommitOptions) -> Result<()> {
        if opts.message.trim().is_empty() {
            return Err(VcsError::InvalidArgument(
                "commit message is required".to_string(),
            ));
        }
        let paths = exec::path_args(&opts.paths)?;
        if !paths.is_empty() {
            // Untracked paths must be known to git before a pathspec commit.
            self.add(ctx, &opts.paths)?;
        }

        let author = opts.author.as_ref().map(|a| format!("--author={a}"));
        let mut args = vec!["commit", "-m", opts.message.as_str()];
        if let Some(author) = &author {
            args.push(author);
        }
        if opts.no_gpg_sign {
            args.push("--no-gpg-sign");
        }
        if opts.no_verify {
            args.push("--no-verify");
        }
        if opts.allow_empty {
            args.push("--allow-empty");
        }
        if !paths.is_empty() {
            args.push("--");
            args.extend(paths.iter().map(String::as_str));
        }
        self.git(ctx, &args)?;
        Ok(())
    }

    fn commit_hash(&self, ctx: &ExecContext, reference: &str) -> Result<String> {
        let reference = or_head(reference);
        if reference.starts_with('-') {
            return Err(VcsError::InvalidArgument(format!(
                "invalid reference: {reference}"
            )));
        }
        let spec = format!("{reference}^{{commit}}");
        let output = self.git_raw(ctx, &["rev-parse", "--verify", "--quiet", &spec])?;
        if !output.success() {
            return Err(VcsError::RefNotFound {
                name: reference.to_string(),
            });
        }
        Ok(output.stdout_text().trim().to_string())
    }

    fn start_change(&self, ctx: &ExecContext, base: &str, message: &str) -> Result<String> {
        let parent = self.commit_hash(ctx, base)?;
        let tree = format!("{parent}^{{tree}}");
        let hash = self.git_text(ctx, &["commit-tree", &tree, "-p", &parent, "-m", message])?;
        Ok(hash.trim().to_string())
    }

    fn rebase_ref(&self, ctx: &ExecContext, name: &str, onto: &str) -> Result<()> {
        validate_ref_name(name)?;
        self.require_branch(ctx, name)?;
        let onto_hash = self.commit_hash(ctx, onto)?;

        let ancestry = self.git_raw(ctx, &["merge-base", "--is-ancestor", &onto_hash, name])?;
        match ancestry.code {
            Some(0) => {
                debug!(name, onto, "already based on target");
                return Ok(());
            }
            Some(1) => {}
            _ => {
                return Err(PATTERNS.classify(
                    &self.work_dir,
                    "git",
                    &["merge-base", "--is-ancestor", &onto_hash, name],
                    &ancestry,
                ));
            }
        }

        let new_head = self.rebase_in_scratch(ctx, name, &onto_hash)?;
        self.move_ref(ctx, name, &new_head)
    }

    fn fetch(&self, ctx: &ExecContext, remote: &str, reference: &str) -> Result<()> {
        let Some(remote) = self.pick_remote(ctx, Some(remote))? else {
            return Ok(());
        };
        let mut args = vec!["fetch", remote.as_str()];
        if !reference.is_empty() {
            args.push(reference);
        }
        self.git(ctx, &args)?;
        Ok(())
    }

    fn pull(&self, ctx: &ExecContext, opts: &PullOptions) -> Result<()> {
        let Some(remote) = self.pick_remote(ctx, opts.remote.as_deref())? else {
            return Ok(());
        };
        let mode = if opts.rebase { "--rebase" } else { "--no-rebase" };
        let mut args = vec!["pull", mode, remote.as_str()];
        if let Some(reference) = opts.reference.as_deref().filter(|r| !r.is_empty()) {
            args.push(reference);
        }
        self.git(ctx, &args)?;
        Ok(())
    }

    fn push(&self, ctx: &ExecContext, opts: &PushOptions) -> Result<()> {
        let Some(remote) = self.pick_remote(ctx, opts.remote.as_deref())? else {
            return Ok(());
        };
        let reference = match opts.reference.as_deref().filter(|r| !r.is_empty()) {
            Some(reference) => reference.to_string(),
            None => self.current_ref(ctx)?,
        };
        if reference.is_empty() {
            return Err(VcsError::Detached(
                "push needs a branch; HEAD is detached".to_string(),
            ));
        }
        let mut args = vec!["push"];
        if opts.force {
            args.push("--force-with-lease");
        }
        if opts.set_upstream {
            args.push("--set-upstream");
        }
        args.push(&remote);
        args.push(&reference);
        self.git(ctx, &args)?;
        Ok(())
    }

    fn divergence(&self, ctx: &ExecContext, local: &str, remote: &str) -> Result<Divergence> {
        let range = format!("{}...{}", or_head(local), or_head(remote));
        let text = self.git_text(ctx, &["rev-list", "--left-right", "--count", &range])?;
        let mut counts = text.split_whitespace().map(str::parse::<usize>);
        match (counts.next(), counts.next()) {
            (Some(Ok(local_ahead)), Some(Ok(remote_ahead))) => {
                Ok(Divergence::from_counts(local_ahead, remote_ahead))
            }
            _ => Err(VcsError::Parse {
                program: "git".to_string(),
                message: format!("unexpected rev-list count output: {:?}", text.trim()),
            }),
        }
    }

    fn extract_file(&self, ctx: &ExecContext, reference: &str, path: &Path) -> Result<Vec<u8>> {
        let path = exec::sanitize_path(path)?;
        let object = format!("{}:{}", or_head(reference), path.to_string_lossy());
        Ok(self.git(ctx, &["show", &object])?.stdout)
    }

    fn create_workspace(
        &self,
        ctx: &ExecContext,
        opts: &WorkspaceOptions,
    ) -> Result<Box<dyn Workspace>> {
        Ok(Box::new(GitWorkspace::create(self.clone(), ctx, opts)?))
    }

    fn list_workspaces(&self, ctx: &ExecContext) -> Result<Vec<WorkspaceInfo>> {
        let text = self.git_text(ctx, &["worktree", "list", "--porcelain"])?;
        let mut workspaces = Vec::new();
        let mut current: Option<WorkspaceInfo> = None;
        for line in text.lines() {
            if let Some(path) = line.strip_prefix("worktree ") {
                workspaces.extend(current.take());
                let path = PathBuf::from(path);
                current = Some(WorkspaceInfo {
                    name: path
                        .file_name()
                        .map(|n| n.to_string_lossy().into_owned())
                        .unwrap_or_default(),
                    path: Some(path),
                    reference: None,
                });
            } else if let Some(branch) = line.strip_prefix("branch ")
                && let Some(info) = current.as_mut()
            {
                info.reference = Some(
                    branch
                        .strip_prefix("refs/heads/")
                        .unwrap_or(branch)
                        .to_string(),
                );
            }
        }
        workspaces.extend(current);
        Ok(workspaces)
    }

    fn has_conflicts(&self, ctx: &ExecContext) -> Result<bool> {
        Ok(self
            .status(ctx, &[])?
            .iter()
            .any(|s| s.working == StatusCode::Unmerged))
    }

    fn conflicted_files(&self, ctx: &ExecContext) -> Result<Vec<PathBuf>> {
        let text = self.git_text(ctx, &["diff", "--name-only", "--diff-filter=U"])?;
        Ok(exec::parse_lines(&text)
            .into_iter()
            .map(PathBuf::from)
            .collect())
    }

    fn can_undo(&self, ctx: &ExecContext) -> Result<bool> {
        Ok(self.undo_step(ctx)?.is_some())
    }

    fn undo(&self, ctx: &ExecContext) -> Result<()> {
        let Some(step) = self.undo_step(ctx)? else {
            return Err(VcsError::Aborted("nothing to undo".to_string()));
        };
        if step.checked_out && self.has_changes(ctx, &[])? {
            return Err(VcsError::NotSupported {
                backend: BackendTag::Git,
                operation: format!("undoing {} over uncommitted changes", step.reference),
            });
        }
        debug!(reference = %step.reference, previous = ?step.previous, "undoing reflog entry");
        match (&step.previous, step.checked_out) {
            (Some(previous), true) => {
                self.git(ctx, &["reset", "--hard", previous])?;
            }
            (Some(previous), false) => {
                self.git(
                    ctx,
                    &["update-ref", "-m", "undo", &step.reference, previous],
                )?;
            }
            (None, _) => {
                self.git(ctx, &["update-ref", "-d", &step.reference])?;
            }
        }
        Ok(())
    }

    fn operation_log(&self, ctx: &ExecContext, limit: usize) -> Result<Vec<OperationRecord>> {
        let output = self.git_raw(
            ctx,
            &[
                "reflog",
                "show",
                "--all",
                "--date=unix",
                "--format=%gD%x1f%gs%x1f%gn",
            ],
        )?;
        if !output.success() {
            // A repository without commits has no reflog yet.
            debug!(stderr = %output.stderr_text(), "reflog unavailable");
            return Ok(Vec::new());
        }
        let mut records = parse_reflog(&output.stdout_text());
        records.truncate(limit);
        Ok(records)
    }

    fn ref_at_operation(
        &self,
        ctx: &ExecContext,
        operation: &str,
        name: &str,
    ) -> Result<String> {
        // Reflog ids already name their ref; bare indexes apply to `name`.
        let selector = match operation.rsplit_once("@{") {
            Some((reference, _)) => {
                let local = reference.strip_prefix("refs/heads/").unwrap_or(reference);
                if local != name {
                    return Err(VcsError::RefNotFound {
                        name: format!("{name} at {operation}"),
                    });
                }
                operation.to_string()
            }
            None => format!("refs/heads/{name}@{{{operation}}}"),
        };
        self.commit_hash(ctx, &selector)
    }

    fn exec(&self, ctx: &ExecContext, args: &[&str]) -> Result<Vec<u8>> {
        Ok(self.git(ctx, args)?.stdout)
    }
}

#[cfg(test)]
mod tests {
    use std::{fs, process::Command, thread, time::Duration};

    use anyhow::Result;
    use tempfile::TempDir;

    use super::*;

    /// Run git directly for fixture setup.
    fn git(dir: &Path, args: &[&str]) -> Result<String> {
        let output = Command::new("git").current_dir(dir).args(args).output()?;
        anyhow::ensure!(
            output.status.success(),
            "git {} failed: {}",
            args.join(" "),
            String::from_utf8_lossy(&output.stderr)
        );
        Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
    }

    /// A repository on `main` with one commit.
    fn setup_repo() -> Result<(TempDir, PathBuf)> {
        let tmp = TempDir::new()?;
        let root = fs::canonicalize(tmp.path())?;
        git(&root, &["init", "-q", "-b", "main"])?;
        git(&root, &["config", "user.email", "test@example.com"])?;
        git(&root, &["config", "user.name", "Test User"])?;
        git(&root, &["config", "commit.gpgsign", "false"])?;
        fs::write(root.join("README.md"), "# test\n")?;
        git(&root, &["add", "README.md"])?;
        git(&root, &["commit", "-q", "-m", "Initial commit"])?;
        Ok((tmp, root))
    }

    #[test]
    fn test_open_reports_roots() -> Result<()> {
        let (_tmp, root) = setup_repo()?;
        fs::create_dir_all(root.join("src/nested"))?;
        let vcs = GitBackend::open(&root.join("src/nested"))?;
        assert_eq!(vcs.name(), BackendTag::Git);
        assert_eq!(vcs.repo_root(), root);
        assert_eq!(vcs.meta_dir(), root.join(".git"));
        assert!(!vcs.is_worktree());
        let ctx = ExecContext::default();
        assert!(vcs.is_in_vcs(&ctx));
        assert!(!vcs.version(&ctx)?.starts_with("git version"));
        Ok(())
    }

    #[test]
    fn test_open_outside_repository_fails() -> Result<()> {
        let tmp = TempDir::new()?;
        // Only meaningful when no ancestor of the temp dir is a repository.
        if let Err(err) = GitBackend::open(tmp.path()) {
            assert!(err.is_fatal(), "{err}");
        }
        Ok(())
    }

    #[test]
    fn test_ref_round_trip() -> Result<()> {
        let (_tmp, root) = setup_repo()?;
        let vcs = GitBackend::open(&root)?;
        let ctx = ExecContext::default();

        assert_eq!(vcs.current_ref(&ctx)?, "main");
        vcs.create_ref(&ctx, "feature", "")?;
        assert!(vcs.ref_exists(&ctx, "feature")?);
        assert_eq!(vcs.commit_hash(&ctx, "feature")?, vcs.commit_hash(&ctx, "HEAD")?);

        let err = vcs.create_ref(&ctx, "feature", "main").unwrap_err();
        assert!(err.is(ErrorKind::RefExists), "{err}");

        vcs.delete_ref(&ctx, "feature")?;
        assert!(!vcs.ref_exists(&ctx, "feature")?);
        let err = vcs.delete_ref(&ctx, "feature").unwrap_err();
        assert!(err.is(ErrorKind::RefNotFound), "{err}");

        let err = vcs.create_ref(&ctx, "other", "no-such-base").unwrap_err();
        assert!(err.is(ErrorKind::RefNotFound), "{err}");
        Ok(())
    }

    #[test]
    fn test_move_ref_current_and_other() -> Result<()> {
        let (_tmp, root) = setup_repo()?;
        let vcs = GitBackend::open(&root)?;
        let ctx = ExecContext::default();
        let first = vcs.commit_hash(&ctx, "main")?;

        fs::write(root.join("a.txt"), "a")?;
        vcs.add(&ctx, &[])?;
        vcs.commit(&ctx, &CommitOptions::message("second"))?;
        let second = vcs.commit_hash(&ctx, "HEAD")?;

        vcs.create_ref(&ctx, "side", &first)?;
        vcs.move_ref(&ctx, "side", "main")?;
        assert_eq!(vcs.commit_hash(&ctx, "side")?, second);

        vcs.move_ref(&ctx, "main", &first)?;
        assert_eq!(vcs.commit_hash(&ctx, "main")?, first);
        assert!(!root.join("a.txt").exists());

        let err = vcs.move_ref(&ctx, "missing", "main").unwrap_err();
        assert!(err.is(ErrorKind::RefNotFound), "{err}");
        Ok(())
    }

    #[test]
    fn test_status_and_commit() -> Result<()> {
        let (_tmp, root) = setup_repo()?;
        let vcs = GitBackend::open(&root)?;
        let ctx = ExecContext::default();
        assert!(!vcs.has_changes(&ctx, &[])?);

        fs::write(root.join("README.md"), "# changed\n")?;
        fs::write(root.join("new file.txt"), "new")?;
        let status = vcs.status(&ctx, &[])?;
        let readme = status
            .iter()
            .find(|s| s.path == Path::new("README.md"))
            .ok_or_else(|| anyhow::anyhow!("README.md missing from {status:?}"))?;
        assert_eq!(readme.working, StatusCode::Modified);
        assert_eq!(readme.staged, StatusCode::Unmodified);
        let new_file = status
            .iter()
            .find(|s| s.path == Path::new("new file.txt"))
            .ok_or_else(|| anyhow::anyhow!("new file missing from {status:?}"))?;
        assert_eq!(new_file.working, StatusCode::Untracked);

        vcs.add(&ctx, &[PathBuf::from("new file.txt")])?;
        let staged = vcs.status(&ctx, &[PathBuf::from("new file.txt")])?;
        assert_eq!(staged.len(), 1);
        assert_eq!(staged[0].staged, StatusCode::Added);

        vcs.add(&ctx, &[])?;
        vcs.commit(&ctx, &CommitOptions::message("update"))?;
        assert!(!vcs.has_changes(&ctx, &[])?);

        let err = vcs.commit(&ctx, &CommitOptions::message("  ")).unwrap_err();
        assert!(matches!(err, VcsError::InvalidArgument(_)));
        Ok(())
    }

    #[test]
    fn test_commit_limited_to_paths() -> Result<()> {
        let (_tmp, root) = setup_repo()?;
        let vcs = GitBackend::open(&root)?;
        let ctx = ExecContext::default();
        fs::write(root.join("keep.txt"), "keep")?;
        fs::write(root.join("take.txt"), "take")?;

        let opts = CommitOptions {
            paths: vec![PathBuf::from("take.txt")],
            ..CommitOptions::message("only take")
        };
        vcs.commit(&ctx, &opts)?;
        assert!(!vcs.has_changes(&ctx, &[PathBuf::from("take.txt")])?);
        assert!(vcs.has_changes(&ctx, &[PathBuf::from("keep.txt")])?);
        Ok(())
    }

    #[test]
    fn test_start_change_leaves_worktree_alone() -> Result<()> {
        let (_tmp, root) = setup_repo()?;
        let vcs = GitBackend::open(&root)?;
        let ctx = ExecContext::default();
        let base = vcs.commit_hash(&ctx, "main")?;

        let change = vcs.start_change(&ctx, "main", "Agent work")?;
        assert_ne!(change, base);
        assert_eq!(git(&root, &["rev-parse", &format!("{change}^")])?, base);
        assert_eq!(git(&root, &["log", "-1", "--format=%s", &change])?, "Agent work");
        assert_eq!(vcs.commit_hash(&ctx, "HEAD")?, base);
        Ok(())
    }

    #[test]
    fn test_rebase_ref_onto_moved_target() -> Result<()> {
        let (_tmp, root) = setup_repo()?;
        let vcs = GitBackend::open(&root)?;
        let ctx = ExecContext::default();

        git(&root, &["checkout", "-q", "-b", "topic"])?;
        fs::write(root.join("topic.txt"), "topic")?;
        git(&root, &["add", "."])?;
        git(&root, &["commit", "-q", "-m", "topic work"])?;
        git(&root, &["checkout", "-q", "main"])?;
        fs::write(root.join("main.txt"), "main")?;
        git(&root, &["add", "."])?;
        git(&root, &["commit", "-q", "-m", "main work"])?;

        let main = vcs.commit_hash(&ctx, "main")?;
        vcs.rebase_ref(&ctx, "topic", "main")?;
        assert_eq!(git(&root, &["rev-parse", "topic^"])?, main);

        // Already based on main: nothing to do.
        let topic = vcs.commit_hash(&ctx, "topic")?;
        vcs.rebase_ref(&ctx, "topic", "main")?;
        assert_eq!(vcs.commit_hash(&ctx, "topic")?, topic);

        let leftover = root.join(".git").join(WORKTREE_DIR);
        let entries = fs::read_dir(&leftover).map(|d| d.count()).unwrap_or(0);
        assert_eq!(entries, 0);
        Ok(())
    }

    #[test]
    fn test_rebase_ref_conflict_is_reported() -> Result<()> {
        let (_tmp, root) = setup_repo()?;
        let vcs = GitBackend::open(&root)?;
        let ctx = ExecContext::default();

        git(&root, &["checkout", "-q", "-b", "topic"])?;
        fs::write(root.join("README.md"), "topic side\n")?;
        git(&root, &["commit", "-q", "-am", "topic edit"])?;
        git(&root, &["checkout", "-q", "main"])?;
        fs::write(root.join("README.md"), "main side\n")?;
        git(&root, &["commit", "-q", "-am", "main edit"])?;

        let before = vcs.commit_hash(&ctx, "topic")?;
        let err = vcs.rebase_ref(&ctx, "topic", "main").unwrap_err();
        assert!(err.is(ErrorKind::Conflicts), "{err}");
        assert!(err.requires_user_action());
        assert_eq!(vcs.commit_hash(&ctx, "topic")?, before);
        Ok(())
    }

    #[test]
    fn test_conflicts_detected() -> Result<()> {
        let (_tmp, root) = setup_repo()?;
        let vcs = GitBackend::open(&root)?;
        let ctx = ExecContext::default();

        git(&root, &["checkout", "-q", "-b", "topic"])?;
        fs::write(root.join("README.md"), "topic side\n")?;
        git(&root, &["commit", "-q", "-am", "topic edit"])?;
        git(&root, &["checkout", "-q", "main"])?;
        fs::write(root.join("README.md"), "main side\n")?;
        git(&root, &["commit", "-q", "-am", "main edit"])?;
        assert!(!vcs.has_conflicts(&ctx)?);
        assert!(!vcs.is_in_rebase_or_merge(&ctx)?);

        let merge = Command::new("git")
            .current_dir(&root)
            .args(["merge", "-q", "topic"])
            .output()?;
        assert!(!merge.status.success());

        assert!(vcs.has_conflicts(&ctx)?);
        assert!(vcs.has_unmerged_paths(&ctx)?);
        assert!(vcs.is_in_rebase_or_merge(&ctx)?);
        assert_eq!(vcs.conflicted_files(&ctx)?, vec![PathBuf::from("README.md")]);
        let status = vcs.status(&ctx, &[])?;
        assert_eq!(status[0].working, StatusCode::Unmerged);
        Ok(())
    }

    #[test]
    fn test_remote_operations() -> Result<()> {
        let (_tmp, root) = setup_repo()?;
        let vcs = GitBackend::open(&root)?;
        let ctx = ExecContext::default();

        // Local-only mode: every remote operation is a silent success.
        assert!(!vcs.has_remote(&ctx)?);
        vcs.fetch(&ctx, "origin", "main")?;
        vcs.pull(&ctx, &PullOptions::default())?;
        vcs.push(&ctx, &PushOptions::default())?;

        let remote_dir = TempDir::new()?;
        git(remote_dir.path(), &["init", "-q", "--bare", "-b", "main"])?;
        let url = remote_dir.path().to_string_lossy().into_owned();
        git(&root, &["remote", "add", "origin", &url])?;
        assert_eq!(
            vcs.remotes(&ctx)?,
            vec![Remote {
                name: "origin".into(),
                url: url.clone(),
            }]
        );

        vcs.push(&ctx, &PushOptions {
            set_upstream: true,
            ..PushOptions::default()
        })?;
        vcs.fetch(&ctx, "origin", "")?;
        let refs = vcs.list_refs(&ctx)?;
        assert!(refs.iter().any(|r| r.is_remote
            && r.name == "main"
            && r.remote.as_deref() == Some("origin")));
        assert!(refs.iter().any(|r| !r.is_remote && r.name == "main"));
        assert!(vcs.ref_exists(&ctx, "origin/main")?);

        // Rewrite local history so the remote rejects a plain push.
        fs::write(root.join("README.md"), "rewritten\n")?;
        git(&root, &["commit", "-q", "-a", "--amend", "-m", "rewritten"])?;
        let divergence = vcs.divergence(&ctx, "main", "origin/main")?;
        assert_eq!(divergence.local_ahead, 1);
        assert_eq!(divergence.remote_ahead, 1);
        assert!(divergence.is_diverged);

        let err = vcs.push(&ctx, &PushOptions::default()).unwrap_err();
        assert!(err.is(ErrorKind::PushRejected), "{err}");
        assert!(err.is_retryable());

        vcs.push(&ctx, &PushOptions {
            force: true,
            ..PushOptions::default()
        })?;
        Ok(())
    }

    #[test]
    fn test_extract_file() -> Result<()> {
        let (_tmp, root) = setup_repo()?;
        let vcs = GitBackend::open(&root)?;
        let ctx = ExecContext::default();
        fs::write(root.join("README.md"), "dirty\n")?;
        assert_eq!(vcs.extract_file(&ctx, "main", Path::new("README.md"))?, b"# test\n");
        assert_eq!(vcs.extract_file(&ctx, "", Path::new("./README.md"))?, b"# test\n");
        assert!(vcs.extract_file(&ctx, "main", Path::new("../x")).is_err());
        Ok(())
    }

    /// Reflog timestamps have one-second resolution; keep entries ordered.
    fn next_second() {
        thread::sleep(Duration::from_millis(1100));
    }

    #[test]
    fn test_undo_and_operation_log() -> Result<()> {
        let (_tmp, root) = setup_repo()?;
        let vcs = GitBackend::open(&root)?;
        let ctx = ExecContext::default();
        let first = vcs.commit_hash(&ctx, "HEAD")?;

        next_second();
        fs::write(root.join("b.txt"), "b")?;
        vcs.add(&ctx, &[])?;
        vcs.commit(&ctx, &CommitOptions::message("second"))?;
        next_second();
        vcs.create_ref(&ctx, "agent-7", "")?;

        let log = vcs.operation_log(&ctx, 10)?;
        assert!(!log.is_empty());
        assert!(log.len() <= 10);
        assert!(log.iter().any(|r| r.mentions("agent-7")));
        assert!(log.iter().all(|r| r.timestamp.is_some()));
        let entry = log
            .iter()
            .find(|r| r.mentions("agent-7"))
            .ok_or_else(|| anyhow::anyhow!("no agent entry"))?;
        assert_eq!(
            vcs.ref_at_operation(&ctx, &entry.id, "agent-7")?,
            vcs.commit_hash(&ctx, "agent-7")?
        );
        let err = vcs
            .ref_at_operation(&ctx, &entry.id, "agent-70")
            .unwrap_err();
        assert!(err.is(ErrorKind::RefNotFound), "{err}");
        assert_eq!(vcs.operation_log(&ctx, 1)?.len(), 1);

        // The newest entry is the branch creation, so undo removes it and
        // leaves HEAD alone.
        assert!(vcs.can_undo(&ctx)?);
        vcs.undo(&ctx)?;
        assert!(!vcs.ref_exists(&ctx, "agent-7")?);
        assert_ne!(vcs.commit_hash(&ctx, "HEAD")?, first);

        next_second();
        vcs.undo(&ctx)?;
        assert_eq!(vcs.commit_hash(&ctx, "HEAD")?, first);
        Ok(())
    }

    #[test]
    fn test_undo_branch_move_keeps_uncommitted_work() -> Result<()> {
        let (_tmp, root) = setup_repo()?;
        let vcs = GitBackend::open(&root)?;
        let ctx = ExecContext::default();
        let first = vcs.commit_hash(&ctx, "HEAD")?;
        vcs.create_ref(&ctx, "side", "")?;

        next_second();
        fs::write(root.join("b.txt"), "b")?;
        vcs.add(&ctx, &[])?;
        vcs.commit(&ctx, &CommitOptions::message("second"))?;
        let second = vcs.commit_hash(&ctx, "HEAD")?;

        next_second();
        vcs.move_ref(&ctx, "side", "main")?;
        fs::write(root.join("README.md"), "uncommitted\n")?;

        vcs.undo(&ctx)?;
        assert_eq!(vcs.commit_hash(&ctx, "side")?, first);
        assert_eq!(vcs.commit_hash(&ctx, "HEAD")?, second);
        assert_eq!(fs::read_to_string(root.join("README.md"))?, "uncommitted\n");

        // Rewinding the checked-out branch would discard the edit.
        next_second();
        fs::write(root.join("c.txt"), "c")?;
        vcs.add(&ctx, &[PathBuf::from("c.txt")])?;
        git(&root, &["commit", "-q", "-m", "third", "--", "c.txt"])?;
        let err = vcs.undo(&ctx).unwrap_err();
        assert!(err.is(ErrorKind::NotSupported), "{err}");
        assert_eq!(fs::read_to_string(root.join("README.md"))?, "uncommitted\n");
        Ok(())
    }

    #[test]
    fn test_parse_status_renames_and_unmerged() {
        let text = "R  new.rs\0old.rs\0UU both.txt\0?? extra\0 M mod.rs\0";
        let status = GitBackend::parse_status(text);
        assert_eq!(status.len(), 4);
        assert_eq!(status[0].path, PathBuf::from("new.rs"));
        assert_eq!(status[0].staged, StatusCode::Renamed);
        assert_eq!(status[1].working, StatusCode::Unmerged);
        assert_eq!(status[2].working, StatusCode::Untracked);
        assert_eq!(status[3].working, StatusCode::Modified);
        assert_eq!(status[3].staged, StatusCode::Unmodified);
    }

    #[test]
    fn test_parse_reflog_indexes_per_ref() {
        let text = "HEAD@{200}\u{1f}commit: b\u{1f}Me\n\
                    HEAD@{100}\u{1f}commit (initial): a\u{1f}Me\n\
                    refs/heads/x@{150}\u{1f}branch: Created from HEAD\u{1f}Me\n";
        let log = parse_reflog(text);
        let ids: Vec<_> = log.iter().map(|r| r.id.as_str()).collect();
        assert_eq!(ids, vec!["HEAD@{0}", "refs/heads/x@{0}", "HEAD@{1}"]);
        assert_eq!(log[1].args, vec!["refs/heads/x".to_string()]);
    }

    #[test]
    fn test_list_workspaces_includes_main() -> Result<()> {
        let (_tmp, root) = setup_repo()?;
        let vcs = GitBackend::open(&root)?;
        let workspaces = vcs.list_workspaces(&ExecContext::default())?;
        assert_eq!(workspaces.len(), 1);
        assert_eq!(workspaces[0].reference.as_deref(), Some("main"));
        Ok(())
    }

    #[test]
    fn test_exec_escape_hatch() -> Result<()> {
        let (_tmp, root) = setup_repo()?;
        let vcs = GitBackend::open(&root)?;
        let out = vcs.exec(&ExecContext::default(), &["rev-parse", "--abbrev-ref", "HEAD"])?;
        assert_eq!(String::from_utf8_lossy(&out).trim(), "main");
        Ok(())
    }
}
