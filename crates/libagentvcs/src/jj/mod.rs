//! Jujutsu backend: the working copy is a commit, conflicts are first class,
//! bookmarks are optional and every mutation is journaled.

mod workspace;

use std::{
    path::{Path, PathBuf},
    sync::LazyLock,
};

use chrono::DateTime;
use tracing::{debug, warn};

pub use self::workspace::JjWorkspace;
use crate::{
    detect::{self, JJ_BINARY, JJ_MARKER, find_binary},
    error::{ErrorKind, Result, VcsError},
    exec::{self, CommandOutput, ExecContext, Patterns, Tool},
    vcs::{
        BackendTag, CommitOptions, Divergence, FileStatus, OperationRecord, PullOptions,
        PushOptions, Ref, Remote, StatusCode, Vcs, Workspace, WorkspaceInfo, WorkspaceOptions,
    },
};

/// Remote name jj uses for the colocated Git repository's own refs.
const GIT_PSEUDO_REMOTE: &str = "git";

/// Node glyphs jj draws for commits in graph output.
const NODE_GLYPHS: &[char] = &['@', '○', '◆', '×', '◉', '●', '◌', 'o', 'x', '*'];

/// Characters that only draw graph edges.
const EDGE_CHARS: &[char] = &[' ', '│', '├', '┤', '─', '╮', '╯', '╭', '╰', '|', '/', '\\'];

/// Template printing one commit id per line.
const COMMIT_ID_TEMPLATE: &str = r#"commit_id ++ "\n""#;

/// Template for the operation journal; tab-separated, tags last.
const OP_LOG_TEMPLATE: &str = concat!(
    r#"id.short() ++ "\t" ++ time.start().format("%Y-%m-%dT%H:%M:%S%:z") ++ "\t" ++ "#,
    r#"description.first_line() ++ "\t" ++ user ++ "\t" ++ tags.lines().join("\t") ++ "\n""#,
);

/// jj's messages mapped onto the error taxonomy.
static PATTERNS: LazyLock<Patterns> = LazyLock::new(|| {
    Patterns::new(&[
        (r"(?i)there is no jj repo|no jj repo in", ErrorKind::NotInVcs),
        (
            r"(?i)rejected|stale info|unexpectedly moved on the remote|refusing to push|failed to push some",
            ErrorKind::PushRejected,
        ),
        (
            r"(?i)no git remote named|no such remote|remote .* doesn't exist",
            ErrorKind::NoRemote,
        ),
        (r"(?i)workspace .*already exists", ErrorKind::WorkspaceExists),
        (
            r"(?i)no such workspace|workspace .*(not found|doesn't exist)",
            ErrorKind::WorkspaceNotFound,
        ),
        (r"(?i)bookmark .*already exists", ErrorKind::RefExists),
        (
            r"(?i)no such bookmark|no bookmarks? (named|found)|revision .* doesn't exist|doesn't exist",
            ErrorKind::RefNotFound,
        ),
        (r"(?i)unresolved conflicts|conflicted", ErrorKind::Conflicts),
    ])
});

/// A handle on one Jujutsu workspace root.
#[derive(Debug, Clone)]
pub struct JjBackend {
    /// The jj executable with fixed global flags.
    tool: Tool,
    /// Directory holding `.jj`; commands run here.
    repo_root: PathBuf,
    /// The `.jj` directory.
    meta_dir: PathBuf,
}

impl JjBackend {
    /// Resolve the repository containing `path`. Does not run jj; a missing
    /// binary surfaces on the first command.
    pub fn open(path: &Path) -> Result<Self> {
        let detection = detect::detect(path)?;
        if !detection.has_jj {
            return Err(VcsError::NotInVcs {
                path: path.to_path_buf(),
            });
        }
        let program = find_binary(JJ_BINARY).unwrap_or_else(|| PathBuf::from(JJ_BINARY));
        let tool = Tool::new(program)
            .leading_arg("--no-pager")
            .leading_arg("--color=never");
        debug!(root = %detection.repo_root.display(), "opened jj repository");
        Ok(Self {
            tool,
            meta_dir: detection.repo_root.join(JJ_MARKER),
            repo_root: detection.repo_root,
        })
    }

    /// Run jj at the root and require success.
    pub(crate) fn jj(&self, ctx: &ExecContext, args: &[&str]) -> Result<CommandOutput> {
        let root = &self.repo_root;
        self.tool
            .run_checked(root, args, ctx, |p, a, o| PATTERNS.classify(root, p, a, o))
    }

    /// Run jj and return stdout.
    pub(crate) fn jj_text(&self, ctx: &ExecContext, args: &[&str]) -> Result<String> {
        Ok(self.jj(ctx, args)?.stdout_text())
    }

    /// Run jj without interpreting the exit code.
    fn jj_raw(&self, ctx: &ExecContext, args: &[&str]) -> Result<CommandOutput> {
        self.tool.run(&self.repo_root, args, ctx)
    }

    /// First line printed by `template` for a single revision.
    pub(crate) fn log_one(&self, ctx: &ExecContext, rev: &str, template: &str) -> Result<String> {
        let rev = revision(rev);
        let text = self.jj_text(
            ctx,
            &["log", "-r", &rev, "--no-graph", "--limit", "1", "-T", template],
        )?;
        Ok(text.lines().next().unwrap_or_default().trim().to_string())
    }

    /// Change id of a revision.
    pub(crate) fn change_id(&self, ctx: &ExecContext, rev: &str) -> Result<String> {
        self.log_one(ctx, rev, r#"change_id ++ "\n""#)
    }

    /// Whether a local bookmark exists.
    pub(crate) fn bookmark_exists(&self, ctx: &ExecContext, name: &str) -> Result<bool> {
        Ok(self
            .list_refs(ctx)?
            .iter()
            .any(|r| !r.is_remote && r.name == name))
    }

    /// Fail with `RefNotFound` unless the local bookmark exists.
    fn require_bookmark(&self, ctx: &ExecContext, name: &str) -> Result<()> {
        if self.bookmark_exists(ctx, name)? {
            Ok(())
        } else {
            Err(VcsError::RefNotFound {
                name: name.to_string(),
            })
        }
    }

    /// Point a bookmark at `rev`, creating it when missing.
    pub(crate) fn set_bookmark(&self, ctx: &ExecContext, name: &str, rev: &str) -> Result<()> {
        let rev = revision(rev);
        if self.bookmark_exists(ctx, name)? {
            self.jj(
                ctx,
                &["bookmark", "move", name, "--to", &rev, "--allow-backwards"],
            )?;
        } else {
            self.jj(ctx, &["bookmark", "create", name, "-r", &rev])?;
        }
        Ok(())
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

    /// Commits in `to` that are not in `from`, counted from graph rows.
    fn count_between(&self, ctx: &ExecContext, from: &str, to: &str) -> Result<usize> {
        let range = format!("{}..{}", revision(from), revision(to));
        let text = self.jj_text(ctx, &["log", "-r", &range, "-T", COMMIT_ID_TEMPLATE])?;
        Ok(count_graph_nodes(&text))
    }

    /// Working-copy diff summary, optionally limited to paths.
    fn diff_summary(&self, ctx: &ExecContext, rev: &str, paths: &[PathBuf]) -> Result<String> {
        let rev = revision(rev);
        let filesets = prefix_filesets(paths)?;
        let mut args = vec!["diff", "--summary", "-r", rev.as_str()];
        args.extend(filesets.iter().map(String::as_str));
        self.jj_text(ctx, &args)
    }
}

/// Revision expression for a reference name.
///
/// Empty and `HEAD` mean the working-copy commit. Plain names are quoted so
/// names like `archive/agent-1` are read as symbols, never as operators.
pub(crate) fn revision(reference: &str) -> String {
    let reference = reference.trim();
    if reference.is_empty() || reference == "HEAD" {
        return "@".to_string();
    }
    let plain = reference
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | '/' | '.'));
    if plain {
        quote(reference)
    } else {
        reference.to_string()
    }
}

/// jj string literal.
fn quote(text: &str) -> String {
    format!("\"{}\"", text.replace('\\', "\\\\").replace('"', "\\\""))
}

/// Sanitized paths as root-relative prefix filesets.
fn prefix_filesets(paths: &[PathBuf]) -> Result<Vec<String>> {
    Ok(exec::path_args(paths)?
        .into_iter()
        .map(|p| format!("root:{}", quote(&p)))
        .collect())
}

/// Count commit rows in `jj log` graph output.
fn count_graph_nodes(text: &str) -> usize {
    text.lines()
        .filter_map(|line| line.chars().find(|c| !EDGE_CHARS.contains(c)))
        .filter(|c| NODE_GLYPHS.contains(c))
        .count()
}

/// Destination path of a summary entry, expanding `dir/{old => new}`.
fn summary_path(raw: &str) -> PathBuf {
    if let (Some(open), Some(close)) = (raw.find('{'), raw.rfind('}'))
        && open < close
        && let Some((_, new)) = raw[open + 1..close].split_once(" => ")
    {
        let joined = format!("{}{}{}", &raw[..open], new, &raw[close + 1..]);
        return PathBuf::from(joined.replace("//", "/"));
    }
    if let Some((_, new)) = raw.split_once(" => ") {
        return PathBuf::from(new);
    }
    PathBuf::from(raw)
}

/// Parse `jj diff --summary` lines.
fn parse_summary(text: &str) -> Vec<FileStatus> {
    exec::parse_lines(text)
        .into_iter()
        .filter_map(|line| {
            let (code, path) = line.split_once(' ')?;
            let working = match code {
                "M" => StatusCode::Modified,
                "A" => StatusCode::Added,
                "D" => StatusCode::Deleted,
                "R" => StatusCode::Renamed,
                "C" => StatusCode::Copied,
                _ => return None,
            };
            Some(FileStatus {
                path: summary_path(path.trim()),
                working,
                staged: StatusCode::Unmodified,
            })
        })
        .collect()
}

/// Parse op log rows rendered with [`OP_LOG_TEMPLATE`].
fn parse_op_log(text: &str) -> Vec<OperationRecord> {
    text.lines()
        .filter(|line| !line.trim().is_empty())
        .filter_map(|line| {
            let mut fields = line.split('\t');
            let id = fields.next()?.trim().to_string();
            let timestamp = DateTime::parse_from_rfc3339(fields.next()?.trim()).ok();
            let description = fields.next().unwrap_or_default().to_string();
            let user = fields.next().unwrap_or_default().to_string();
            let args = fields
                .find_map(|tag| tag.strip_prefix("args: "))
                .map(|a| a.split_whitespace().map(unquote).collect())
                .unwrap_or_default();
            Some(OperationRecord {
                id,
                timestamp,
                description,
                user,
                args,
            })
        })
        .collect()
}

/// Strip one layer of shell quoting from a recorded argument.
fn unquote(arg: &str) -> String {
    arg.trim_matches(|c| c == '\'' || c == '"').to_string()
}

/// Reject names jj would read as options.
fn validate_ref_name(name: &str) -> Result<()> {
    if name.trim().is_empty() || name.starts_with('-') {
        return Err(VcsError::InvalidArgument(format!(
            "invalid bookmark name: {name:?}"
        )));
    }
    Ok(())
}

impl Vcs for JjBackend {
    fn name(&self) -> BackendTag {
        BackendTag::Jj
    }

    fn version(&self, ctx: &ExecContext) -> Result<String> {
        let text = self.jj_text(ctx, &["--version"])?;
        let text = text.trim();
        Ok(text.strip_prefix("jj ").unwrap_or(text).to_string())
    }

    fn repo_root(&self) -> &Path {
        &self.repo_root
    }

    fn meta_dir(&self) -> &Path {
        &self.meta_dir
    }

    fn is_in_vcs(&self, ctx: &ExecContext) -> bool {
        self.jj_raw(ctx, &["root"]).is_ok_and(|o| o.success())
    }

    fn current_ref(&self, ctx: &ExecContext) -> Result<String> {
        let names = self.log_one(
            ctx,
            "@",
            r#"local_bookmarks.map(|b| b.name()).join(" ") ++ "\n""#,
        )?;
        Ok(names
            .split_whitespace()
            .next()
            .map(|n| n.trim_end_matches('*').to_string())
            .unwrap_or_default())
    }

    fn ref_exists(&self, ctx: &ExecContext, name: &str) -> Result<bool> {
        validate_ref_name(name)?;
        Ok(self.list_refs(ctx)?.iter().any(|r| match &r.remote {
            None => r.name == name,
            Some(remote) => format!("{}@{remote}", r.name) == name,
        }))
    }

    fn create_ref(&self, ctx: &ExecContext, name: &str, base: &str) -> Result<()> {
        validate_ref_name(name)?;
        if self.bookmark_exists(ctx, name)? {
            return Err(VcsError::RefExists {
                name: name.to_string(),
            });
        }
        // Resolving first turns a missing base into RefNotFound.
        let target = self.commit_hash(ctx, base)?;
        self.jj(ctx, &["bookmark", "create", name, "-r", &target])?;
        Ok(())
    }

    fn delete_ref(&self, ctx: &ExecContext, name: &str) -> Result<()> {
        validate_ref_name(name)?;
        self.require_bookmark(ctx, name)?;
        self.jj(ctx, &["bookmark", "delete", name])?;
        Ok(())
    }

    fn move_ref(&self, ctx: &ExecContext, name: &str, target: &str) -> Result<()> {
        validate_ref_name(name)?;
        self.require_bookmark(ctx, name)?;
        let target = self.commit_hash(ctx, target)?;
        self.jj(
            ctx,
            &["bookmark", "move", name, "--to", &target, "--allow-backwards"],
        )?;
        Ok(())
    }

    fn list_refs(&self, ctx: &ExecContext) -> Result<Vec<Ref>> {
        let template = r#"name ++ "\t" ++ remote ++ "\t" ++ if(normal_target, normal_target.commit_id(), "") ++ "\n""#;
        let text = self.jj_text(ctx, &["bookmark", "list", "--all-remotes", "-T", template])?;
        let mut refs = Vec::new();
        for line in exec::parse_lines(&text) {
            let mut fields = line.split('\t');
            let (Some(name), Some(remote), Some(hash)) = (fields.next(), fields.next(), fields.next())
            else {
                continue;
            };
            // Deleted or conflicted bookmarks have no single target.
            if hash.is_empty() || remote == GIT_PSEUDO_REMOTE {
                continue;
            }
            let remote = (!remote.is_empty()).then(|| remote.to_string());
            refs.push(Ref {
                name: name.to_string(),
                hash: hash.to_string(),
                is_remote: remote.is_some(),
                remote,
            });
        }
        Ok(refs)
    }

    fn has_changes(&self, ctx: &ExecContext, paths: &[PathBuf]) -> Result<bool> {
        Ok(!self.diff_summary(ctx, "@", paths)?.trim().is_empty())
    }

    fn has_unmerged_paths(&self, ctx: &ExecContext) -> Result<bool> {
        self.has_conflicts(ctx)
    }

    fn is_in_rebase_or_merge(&self, _ctx: &ExecContext) -> Result<bool> {
        // Conflicts are recorded in commits; nothing is ever in progress.
        Ok(false)
    }

    fn has_remote(&self, ctx: &ExecContext) -> Result<bool> {
        Ok(!self.remotes(ctx)?.is_empty())
    }

    fn remotes(&self, ctx: &ExecContext) -> Result<Vec<Remote>> {
        let text = self.jj_text(ctx, &["git", "remote", "list"])?;
        Ok(exec::parse_lines(&text)
            .into_iter()
            .filter_map(|line| {
                let (name, url) = line.split_once(' ')?;
                Some(Remote {
                    name: name.to_string(),
                    url: url.trim().to_string(),
                })
            })
            .collect())
    }

    fn add(&self, _ctx: &ExecContext, paths: &[PathBuf]) -> Result<()> {
        // No staging area; still reject paths that would be unsafe elsewhere.
        exec::path_args(paths)?;
        Ok(())
    }

    fn status(&self, ctx: &ExecContext, paths: &[PathBuf]) -> Result<Vec<FileStatus>> {
        Ok(parse_summary(&self.diff_summary(ctx, "@", paths)?))
    }

    fn commit(&self, ctx: &ExecContext, opts: &CommitOptions) -> Result<()> {
        if opts.message.trim().is_empty() {
            return Err(VcsError::InvalidArgument(
                "commit message is required".to_string(),
            ));
        }
        if opts.no_gpg_sign || opts.no_verify {
            debug!("signing and hook options do not apply to jj");
        }

        if opts.paths.is_empty() {
            let mut args = vec!["describe", "-m", opts.message.as_str()];
            if let Some(author) = &opts.author {
                args.extend(["--author", author.as_str()]);
            }
            self.jj(ctx, &args)?;
            if opts.create_new {
                self.jj(ctx, &["new"])?;
            }
            return Ok(());
        }

        // Seals only the listed paths; the rest stays in the new working copy.
        let filesets = prefix_filesets(&opts.paths)?;
        let mut args = vec!["commit", "-m", opts.message.as_str()];
        args.extend(filesets.iter().map(String::as_str));
        self.jj(ctx, &args)?;
        if let Some(author) = &opts.author {
            self.jj(ctx, &["describe", "@-", "--no-edit", "--author", author])?;
        }
        Ok(())
    }

    fn commit_hash(&self, ctx: &ExecContext, reference: &str) -> Result<String> {
        let hash = self.log_one(ctx, reference, COMMIT_ID_TEMPLATE)?;
        if hash.is_empty() {
            return Err(VcsError::RefNotFound {
                name: reference.to_string(),
            });
        }
        Ok(hash)
    }

    fn start_change(&self, ctx: &ExecContext, base: &str, message: &str) -> Result<String> {
        let base = revision(base);
        self.jj(ctx, &["new", &base, "-m", message])?;
        self.commit_hash(ctx, "@")
    }

    fn rebase_ref(&self, ctx: &ExecContext, name: &str, onto: &str) -> Result<()> {
        validate_ref_name(name)?;
        self.require_bookmark(ctx, name)?;
        let onto = self.commit_hash(ctx, onto)?;
        self.jj(ctx, &["rebase", "-b", &revision(name), "-d", &onto])?;
        let conflicted = self.log_one(
            ctx,
            name,
            r#"if(conflict, "true", "false") ++ "\n""#,
        )?;
        if conflicted == "true" {
            warn!(bookmark = name, "rebase recorded conflicts");
        }
        Ok(())
    }

    fn fetch(&self, ctx: &ExecContext, remote: &str, reference: &str) -> Result<()> {
        let Some(remote) = self.pick_remote(ctx, Some(remote))? else {
            return Ok(());
        };
        let mut args = vec!["git", "fetch", "--remote", remote.as_str()];
        if !reference.is_empty() {
            args.extend(["--branch", reference]);
        }
        self.jj(ctx, &args)?;
        Ok(())
    }

    fn pull(&self, ctx: &ExecContext, opts: &PullOptions) -> Result<()> {
        if opts.rebase {
            debug!("jj pull never rebases; fetching only");
        }
        self.fetch(
            ctx,
            opts.remote.as_deref().unwrap_or_default(),
            opts.reference.as_deref().unwrap_or_default(),
        )
    }

    fn push(&self, ctx: &ExecContext, opts: &PushOptions) -> Result<()> {
        if opts.force {
            return Err(VcsError::NotSupported {
                backend: BackendTag::Jj,
                operation: "force push".to_string(),
            });
        }
        let Some(remote) = self.pick_remote(ctx, opts.remote.as_deref())? else {
            return Ok(());
        };
        let reference = match opts.reference.as_deref().filter(|r| !r.is_empty()) {
            Some(reference) => reference.to_string(),
            None => self.current_ref(ctx)?,
        };
        if reference.is_empty() {
            return Err(VcsError::Detached(
                "push needs a bookmark on the working-copy change".to_string(),
            ));
        }
        let mut args = vec!["git", "push", "--remote", remote.as_str(), "--bookmark"];
        args.push(&reference);
        if opts.set_upstream {
            args.push("--allow-new");
        }
        self.jj(ctx, &args)?;
        Ok(())
    }

    fn divergence(&self, ctx: &ExecContext, local: &str, remote: &str) -> Result<Divergence> {
        let local_ahead = self.count_between(ctx, remote, local)?;
        let remote_ahead = self.count_between(ctx, local, remote)?;
        Ok(Divergence::from_counts(local_ahead, remote_ahead))
    }

    fn extract_file(&self, ctx: &ExecContext, reference: &str, path: &Path) -> Result<Vec<u8>> {
        let path = exec::sanitize_path(path)?;
        let fileset = format!("root-file:{}", quote(&path.to_string_lossy()));
        let rev = revision(reference);
        Ok(self.jj(ctx, &["file", "show", "-r", &rev, &fileset])?.stdout)
    }

    fn create_workspace(
        &self,
        ctx: &ExecContext,
        opts: &WorkspaceOptions,
    ) -> Result<Box<dyn Workspace>> {
        Ok(Box::new(JjWorkspace::create(self.clone(), ctx, opts)?))
    }

    fn list_workspaces(&self, ctx: &ExecContext) -> Result<Vec<WorkspaceInfo>> {
        let text = self.jj_text(ctx, &["workspace", "list"])?;
        Ok(exec::parse_lines(&text)
            .into_iter()
            .filter_map(|line| {
                let (name, rest) = line.split_once(':')?;
                let name = name.trim().to_string();
                Some(WorkspaceInfo {
                    path: (name == "default").then(|| self.repo_root.clone()),
                    reference: rest.split_whitespace().next().map(ToString::to_string),
                    name,
                })
            })
            .collect())
    }

    fn has_conflicts(&self, ctx: &ExecContext) -> Result<bool> {
        Ok(!self.conflicted_files(ctx)?.is_empty())
    }

    fn conflicted_files(&self, ctx: &ExecContext) -> Result<Vec<PathBuf>> {
        let args = ["resolve", "--list"];
        let output = self.jj_raw(ctx, &args)?;
        if !output.success() {
            if output.stderr_text().contains("No conflicts") {
                return Ok(Vec::new());
            }
            return Err(PATTERNS.classify(&self.repo_root, "jj", &args, &output));
        }
        Ok(exec::parse_lines(&output.stdout_text())
            .into_iter()
            .filter_map(|line| line.split("  ").next())
            .map(|path| PathBuf::from(path.trim()))
            .collect())
    }

    fn can_undo(&self, ctx: &ExecContext) -> Result<bool> {
        // The root operation cannot be undone.
        Ok(self.operation_log(ctx, 2)?.len() >= 2)
    }

    fn undo(&self, ctx: &ExecContext) -> Result<()> {
        self.jj(ctx, &["undo"])?;
        Ok(())
    }

    fn operation_log(&self, ctx: &ExecContext, limit: usize) -> Result<Vec<OperationRecord>> {
        let limit = limit.to_string();
        let text = self.jj_text(
            ctx,
            &["op", "log", "--no-graph", "--limit", &limit, "-T", OP_LOG_TEMPLATE],
        )?;
        Ok(parse_op_log(&text))
    }

    fn ref_at_operation(
        &self,
        ctx: &ExecContext,
        operation: &str,
        name: &str,
    ) -> Result<String> {
        let rev = format!("bookmarks(exact:{})", quote(name));
        let text = self.jj_text(
            ctx,
            &[
                "log",
                "--at-op",
                operation,
                "-r",
                &rev,
                "--no-graph",
                "--limit",
                "1",
                "-T",
                COMMIT_ID_TEMPLATE,
            ],
        )?;
        let hash = text.trim();
        if hash.is_empty() {
            return Err(VcsError::RefNotFound {
                name: format!("{name} at operation {operation}"),
            });
        }
        Ok(hash.to_string())
    }

    fn exec(&self, ctx: &ExecContext, args: &[&str]) -> Result<Vec<u8>> {
        Ok(self.jj(ctx, args)?.stdout)
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use std::{fs, process::Command};

    use anyhow::Result;
    use tempfile::TempDir;

    use super::*;

    /// Whether jj can be run; tests needing it return early otherwise.
    pub(crate) fn jj_available() -> bool {
        let found = find_binary(JJ_BINARY).is_some();
        if !found {
            eprintln!("jj not installed, skipping");
        }
        found
    }

    /// Run jj directly for fixture setup.
    pub(crate) fn jj(dir: &Path, args: &[&str]) -> Result<String> {
        let output = Command::new(JJ_BINARY)
            .current_dir(dir)
            .args(["--no-pager", "--color=never"])
            .args(args)
            .output()?;
        anyhow::ensure!(
            output.status.success(),
            "jj {} failed: {}",
            args.join(" "),
            String::from_utf8_lossy(&output.stderr)
        );
        Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
    }

    /// A jj repository with one described commit holding `README.md`.
    pub(crate) fn setup_repo() -> Result<(TempDir, PathBuf)> {
        let tmp = TempDir::new()?;
        let root = fs::canonicalize(tmp.path())?;
        jj(&root, &["git", "init"])?;
        jj(&root, &["config", "set", "--repo", "user.name", "Test User"])?;
        jj(&root, &["config", "set", "--repo", "user.email", "test@example.com"])?;
        fs::write(root.join("README.md"), "# test\n")?;
        jj(&root, &["commit", "-m", "Initial commit"])?;
        jj(&root, &["bookmark", "create", "main", "-r", "@-"])?;
        Ok((tmp, root))
    }

    #[test]
    fn test_revision_quoting() {
        assert_eq!(revision(""), "@");
        assert_eq!(revision("HEAD"), "@");
        assert_eq!(revision("archive/agent-1"), "\"archive/agent-1\"");
        assert_eq!(revision("main@origin"), "main@origin");
        assert_eq!(revision("@-"), "@-");
        assert_eq!(quote(r#"a"b\c"#), r#""a\"b\\c""#);
    }

    #[test]
    fn test_count_graph_nodes() {
        let text = "@  0123abcd\n│ ○  4567ef01\n├─╯\n◆  89abcdef\n~\n";
        assert_eq!(count_graph_nodes(text), 3);
        assert_eq!(count_graph_nodes(""), 0);
    }

    #[test]
    fn test_parse_summary() {
        let status = parse_summary("M src/lib.rs\nA new.txt\nD gone.txt\nR src/{old.rs => new.rs}\n");
        assert_eq!(status.len(), 4);
        assert_eq!(status[0].working, StatusCode::Modified);
        assert_eq!(status[1].working, StatusCode::Added);
        assert_eq!(status[2].working, StatusCode::Deleted);
        assert_eq!(status[3].path, PathBuf::from("src/new.rs"));
        assert!(status.iter().all(|s| s.staged == StatusCode::Unmodified));
    }

    #[test]
    fn test_parse_op_log() {
        let text = "abc123\t2025-01-02T03:04:05+00:00\tcreate bookmark agent-47 pointing to commit 1234\tme@host\targs: jj bookmark create agent-47 -r 1234\n\
                    def456\t2025-01-02T03:00:00+00:00\tadd workspace 'default'\tme@host\n";
        let log = parse_op_log(text);
        assert_eq!(log.len(), 2);
        assert_eq!(log[0].id, "abc123");
        assert!(log[0].timestamp.is_some());
        assert!(log[0].args.contains(&"agent-47".to_string()));
        assert!(log[0].mentions("agent-47"));
        assert!(log[1].args.is_empty());
        assert!(!log[1].mentions("agent-47"));
    }

    #[test]
    fn test_open_does_not_need_binary() -> Result<()> {
        let tmp = TempDir::new()?;
        let root = fs::canonicalize(tmp.path())?;
        fs::create_dir_all(root.join(".jj"))?;
        fs::create_dir_all(root.join("nested"))?;
        let vcs = JjBackend::open(&root.join("nested"))?;
        assert_eq!(vcs.name(), BackendTag::Jj);
        assert_eq!(vcs.repo_root(), root);
        assert_eq!(vcs.meta_dir(), root.join(".jj"));
        Ok(())
    }

    #[test]
    fn test_ref_round_trip() -> Result<()> {
        if !jj_available() {
            return Ok(());
        }
        let (_tmp, root) = setup_repo()?;
        let vcs = JjBackend::open(&root)?;
        let ctx = ExecContext::default();
        assert!(vcs.is_in_vcs(&ctx));
        assert!(!vcs.version(&ctx)?.starts_with("jj "));

        vcs.create_ref(&ctx, "feature", "main")?;
        assert!(vcs.ref_exists(&ctx, "feature")?);
        assert_eq!(vcs.commit_hash(&ctx, "feature")?, vcs.commit_hash(&ctx, "main")?);
        let err = vcs.create_ref(&ctx, "feature", "main").unwrap_err();
        assert!(err.is(ErrorKind::RefExists), "{err}");

        vcs.move_ref(&ctx, "feature", "@")?;
        assert_eq!(vcs.commit_hash(&ctx, "feature")?, vcs.commit_hash(&ctx, "HEAD")?);
        vcs.move_ref(&ctx, "feature", "main")?;

        vcs.create_ref(&ctx, "archive/agent-1", "feature")?;
        assert!(vcs.ref_exists(&ctx, "archive/agent-1")?);

        vcs.delete_ref(&ctx, "feature")?;
        assert!(!vcs.ref_exists(&ctx, "feature")?);
        let err = vcs.delete_ref(&ctx, "feature").unwrap_err();
        assert!(err.is(ErrorKind::RefNotFound), "{err}");
        let err = vcs.create_ref(&ctx, "x", "no-such-rev").unwrap_err();
        assert!(err.is(ErrorKind::RefNotFound), "{err}");
        Ok(())
    }

    #[test]
    fn test_status_and_commit() -> Result<()> {
        if !jj_available() {
            return Ok(());
        }
        let (_tmp, root) = setup_repo()?;
        let vcs = JjBackend::open(&root)?;
        let ctx = ExecContext::default();
        assert!(!vcs.has_changes(&ctx, &[])?);
        assert!(!vcs.is_in_rebase_or_merge(&ctx)?);

        fs::write(root.join("README.md"), "# changed\n")?;
        fs::write(root.join("notes.txt"), "notes\n")?;
        vcs.add(&ctx, &[PathBuf::from("notes.txt")])?;
        let status = vcs.status(&ctx, &[])?;
        assert_eq!(status.len(), 2);
        assert!(status.iter().all(|s| s.staged == StatusCode::Unmodified));
        assert!(vcs.has_changes(&ctx, &[PathBuf::from("notes.txt")])?);

        let opts = CommitOptions {
            create_new: true,
            ..CommitOptions::message("edit files")
        };
        vcs.commit(&ctx, &opts)?;
        assert!(!vcs.has_changes(&ctx, &[])?);
        assert_eq!(jj(&root, &["log", "-r", "@-", "--no-graph", "-T", "description"])?, "edit files");
        Ok(())
    }

    #[test]
    fn test_commit_limited_to_paths() -> Result<()> {
        if !jj_available() {
            return Ok(());
        }
        let (_tmp, root) = setup_repo()?;
        let vcs = JjBackend::open(&root)?;
        let ctx = ExecContext::default();
        fs::write(root.join("keep.txt"), "keep")?;
        fs::write(root.join("take.txt"), "take")?;
        let opts = CommitOptions {
            paths: vec![PathBuf::from("take.txt")],
            ..CommitOptions::message("only take")
        };
        vcs.commit(&ctx, &opts)?;
        assert!(vcs.has_changes(&ctx, &[PathBuf::from("keep.txt")])?);
        assert!(!vcs.has_changes(&ctx, &[PathBuf::from("take.txt")])?);
        Ok(())
    }

    #[test]
    fn test_start_change_and_current_ref() -> Result<()> {
        if !jj_available() {
            return Ok(());
        }
        let (_tmp, root) = setup_repo()?;
        let vcs = JjBackend::open(&root)?;
        let ctx = ExecContext::default();
        let base = vcs.commit_hash(&ctx, "main")?;

        let change = vcs.start_change(&ctx, "main", "Agent work")?;
        assert_eq!(change, vcs.commit_hash(&ctx, "@")?);
        assert_eq!(vcs.commit_hash(&ctx, "@-")?, base);
        assert_eq!(vcs.current_ref(&ctx)?, "");

        vcs.create_ref(&ctx, "agent-1", &change)?;
        assert_eq!(vcs.current_ref(&ctx)?, "agent-1");
        Ok(())
    }

    #[test]
    fn test_rebase_ref() -> Result<()> {
        if !jj_available() {
            return Ok(());
        }
        let (_tmp, root) = setup_repo()?;
        let vcs = JjBackend::open(&root)?;
        let ctx = ExecContext::default();

        vcs.start_change(&ctx, "main", "topic")?;
        fs::write(root.join("topic.txt"), "topic")?;
        // The write is snapshotted on the next command, so bookmark `@`.
        vcs.create_ref(&ctx, "topic", "@")?;
        vcs.start_change(&ctx, "main", "main work")?;
        fs::write(root.join("main.txt"), "main")?;
        jj(&root, &["bookmark", "move", "main", "--to", "@"])?;

        vcs.rebase_ref(&ctx, "topic", "main")?;
        let parent = jj(&root, &["log", "-r", "topic-", "--no-graph", "-T", "commit_id"])?;
        assert_eq!(parent, vcs.commit_hash(&ctx, "main")?);
        Ok(())
    }

    #[test]
    fn test_remote_operations_without_remote() -> Result<()> {
        if !jj_available() {
            return Ok(());
        }
        let (_tmp, root) = setup_repo()?;
        let vcs = JjBackend::open(&root)?;
        let ctx = ExecContext::default();
        assert!(!vcs.has_remote(&ctx)?);
        vcs.fetch(&ctx, "", "")?;
        vcs.pull(&ctx, &PullOptions::default())?;
        vcs.push(&ctx, &PushOptions {
            reference: Some("main".into()),
            ..PushOptions::default()
        })?;

        let err = vcs
            .push(&ctx, &PushOptions {
                force: true,
                ..PushOptions::default()
            })
            .unwrap_err();
        assert!(err.is(ErrorKind::NotSupported), "{err}");
        Ok(())
    }

    #[test]
    fn test_divergence_and_extract() -> Result<()> {
        if !jj_available() {
            return Ok(());
        }
        let (_tmp, root) = setup_repo()?;
        let vcs = JjBackend::open(&root)?;
        let ctx = ExecContext::default();

        let side = vcs.start_change(&ctx, "main", "side")?;
        vcs.create_ref(&ctx, "side", &side)?;
        let d = vcs.divergence(&ctx, "side", "main")?;
        assert_eq!((d.local_ahead, d.remote_ahead), (1, 0));
        assert!(!d.is_diverged);

        fs::write(root.join("README.md"), "dirty\n")?;
        assert_eq!(vcs.extract_file(&ctx, "main", Path::new("README.md"))?, b"# test\n");
        Ok(())
    }

    #[test]
    fn test_conflicts_are_first_class() -> Result<()> {
        if !jj_available() {
            return Ok(());
        }
        let (_tmp, root) = setup_repo()?;
        let vcs = JjBackend::open(&root)?;
        let ctx = ExecContext::default();
        assert!(!vcs.has_conflicts(&ctx)?);

        vcs.start_change(&ctx, "main", "left")?;
        fs::write(root.join("README.md"), "left\n")?;
        vcs.create_ref(&ctx, "left", "@")?;
        vcs.start_change(&ctx, "main", "right")?;
        fs::write(root.join("README.md"), "right\n")?;
        vcs.create_ref(&ctx, "right", "@")?;
        jj(&root, &["new", "left", "right", "-m", "merge"])?;

        assert!(vcs.has_conflicts(&ctx)?);
        assert!(vcs.has_unmerged_paths(&ctx)?);
        assert_eq!(vcs.conflicted_files(&ctx)?, vec![PathBuf::from("README.md")]);
        assert!(!vcs.is_in_rebase_or_merge(&ctx)?);
        Ok(())
    }

    #[test]
    fn test_operation_log_undo_and_time_travel() -> Result<()> {
        if !jj_available() {
            return Ok(());
        }
        let (_tmp, root) = setup_repo()?;
        let vcs = JjBackend::open(&root)?;
        let ctx = ExecContext::default();

        vcs.create_ref(&ctx, "agent-7", "main")?;
        let hash = vcs.commit_hash(&ctx, "agent-7")?;
        let log = vcs.operation_log(&ctx, 5)?;
        assert!(log.len() <= 5);
        let entry = log
            .iter()
            .find(|r| r.mentions("agent-7"))
            .ok_or_else(|| anyhow::anyhow!("no op mentions agent-7: {log:?}"))?;
        assert!(entry.timestamp.is_some());

        vcs.delete_ref(&ctx, "agent-7")?;
        assert_eq!(vcs.ref_at_operation(&ctx, &entry.id, "agent-7")?, hash);

        assert!(vcs.can_undo(&ctx)?);
        vcs.undo(&ctx)?;
        assert!(vcs.ref_exists(&ctx, "agent-7")?);
        Ok(())
    }
}
