use std::{
    collections::HashMap,
    io::{self, Read},
    path::{Component, Path, PathBuf},
    process::{Child, Command, Stdio},
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
    thread::{self, JoinHandle},
    time::{Duration, Instant},
};

use regex::Regex;
use tracing::{debug, info, warn};
use wait_timeout::ChildExt;

use crate::error::{ErrorKind, Result, VcsError};

/// Timeout applied when the caller does not supply one.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// How often a waiting call checks for cancellation.
const POLL_INTERVAL: Duration = Duration::from_millis(50);

/// Raises command traces from `debug` to `info`.
static COMMAND_TRACING: AtomicBool = AtomicBool::new(false);

/// Enable or disable operation tracing for every subprocess call.
pub fn set_command_tracing(enabled: bool) {
    COMMAND_TRACING.store(enabled, Ordering::Relaxed);
}

/// Whether operation tracing is on.
pub fn command_tracing() -> bool {
    COMMAND_TRACING.load(Ordering::Relaxed)
}

/// Shared flag that aborts a running subprocess when set.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    /// A fresh, uncancelled token.
    pub fn new() -> Self {
        Self::default()
    }

    /// Request cancellation. Visible to every clone.
    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    /// Whether cancellation was requested.
    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Deadline and cancellation for one call.
#[derive(Debug, Clone)]
pub struct ExecContext {
    /// Upper bound on each subprocess.
    pub timeout: Duration,
    /// Optional cancellation token.
    pub cancel: Option<CancelToken>,
}

impl Default for ExecContext {
    fn default() -> Self {
        Self {
            timeout: DEFAULT_TIMEOUT,
            cancel: None,
        }
    }
}

impl ExecContext {
    /// Context with a custom timeout.
    pub fn with_timeout(timeout: Duration) -> Self {
        Self {
            timeout,
            cancel: None,
        }
    }

    /// Attach a cancellation token.
    pub fn cancellable(mut self, token: CancelToken) -> Self {
        self.cancel = Some(token);
        self
    }

    /// Whether the attached token, if any, has fired.
    pub fn is_cancelled(&self) -> bool {
        self.cancel.as_ref().is_some_and(CancelToken::is_cancelled)
    }
}

/// Captured result of a finished subprocess.
#[derive(Debug, Clone)]
pub struct CommandOutput {
    /// Exit code; `None` if killed by a signal.
    pub code: Option<i32>,
    /// Raw stdout.
    pub stdout: Vec<u8>,
    /// Raw stderr.
    pub stderr: Vec<u8>,
}

impl CommandOutput {
    /// Whether the process exited with status zero.
    pub fn success(&self) -> bool {
        self.code == Some(0)
    }

    /// Stdout decoded lossily.
    pub fn stdout_text(&self) -> String {
        String::from_utf8_lossy(&self.stdout).into_owned()
    }

    /// Stderr decoded lossily and trimmed.
    pub fn stderr_text(&self) -> String {
        String::from_utf8_lossy(&self.stderr).trim().to_string()
    }
}

/// A command-line tool invoked with fixed leading arguments and environment.
#[derive(Debug, Clone)]
pub struct Tool {
    /// Executable to run.
    program: PathBuf,
    /// Arguments placed before every call's own arguments.
    leading_args: Vec<String>,
    /// Extra environment variables.
    envs: Vec<(String, String)>,
}

impl Tool {
    /// Wrap an executable path.
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            leading_args: Vec::new(),
            envs: Vec::new(),
        }
    }

    /// Add an argument passed on every invocation.
    pub fn leading_arg(mut self, arg: &str) -> Self {
        self.leading_args.push(arg.to_string());
        self
    }

    /// Add an environment variable set on every invocation.
    pub fn env(mut self, key: &str, value: &str) -> Self {
        self.envs.push((key.to_string(), value.to_string()));
        self
    }

    /// Executable path.
    pub fn program(&self) -> &Path {
        &self.program
    }

    /// Short program name for messages.
    pub fn display_name(&self) -> String {
        self.program
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| self.program.display().to_string())
    }

    /// Run with `args` in `dir`. Non-zero exits are returned, not raised.
    pub fn run(&self, dir: &Path, args: &[&str], ctx: &ExecContext) -> Result<CommandOutput> {
        let mut cmd = Command::new(&self.program);
        cmd.current_dir(dir)
            .args(&self.leading_args)
            .args(args)
            .envs(self.envs.iter().map(|(k, v)| (k.as_str(), v.as_str())));
        let rendered = format!("{} {}", self.display_name(), args.join(" "));
        run_command(cmd, &rendered, dir, ctx)
    }

    /// Run and require success; failures are passed to `classify`.
    pub fn run_checked(
        &self,
        dir: &Path,
        args: &[&str],
        ctx: &ExecContext,
        classify: impl FnOnce(&str, &[&str], &CommandOutput) -> VcsError,
    ) -> Result<CommandOutput> {
        let output = self.run(dir, args, ctx)?;
        if output.success() {
            Ok(output)
        } else {
            Err(classify(&self.display_name(), args, &output))
        }
    }
}

/// Build the catch-all error for a failed command.
///
/// Some tools report failures on stdout; that is used when stderr is empty.
pub fn command_error(program: &str, args: &[&str], output: &CommandOutput) -> VcsError {
    VcsError::Command {
        program: program.to_string(),
        args: args.iter().map(ToString::to_string).collect(),
        code: output.code,
        stderr: failure_text(output),
    }
}

/// Stderr, or trimmed stdout when stderr is empty.
fn failure_text(output: &CommandOutput) -> String {
    let stderr = output.stderr_text();
    if stderr.is_empty() {
        output.stdout_text().trim().to_string()
    } else {
        stderr
    }
}

/// Ordered table of output patterns mapped to error kinds.
///
/// Tool messages change between releases, so each backend keeps its whole
/// table in one place. The first matching pattern wins; output that matches
/// nothing becomes [`VcsError::Command`] with the full stderr.
pub struct Patterns(Vec<(Regex, ErrorKind)>);

impl Patterns {
    /// Compile a table. Invalid patterns are logged and skipped.
    pub fn new(table: &[(&str, ErrorKind)]) -> Self {
        let compiled = table
            .iter()
            .filter_map(|(pattern, kind)| match Regex::new(pattern) {
                Ok(re) => Some((re, *kind)),
                Err(e) => {
                    warn!(pattern, error = %e, "skipping invalid error pattern");
                    None
                }
            })
            .collect();
        Self(compiled)
    }

    /// Kind of the first pattern matching `text`.
    pub fn kind_of(&self, text: &str) -> Option<ErrorKind> {
        self.0
            .iter()
            .find(|(re, _)| re.is_match(text))
            .map(|(_, kind)| *kind)
    }

    /// Translate a failed command run in `dir` into the error taxonomy.
    pub fn classify(
        &self,
        dir: &Path,
        program: &str,
        args: &[&str],
        output: &CommandOutput,
    ) -> VcsError {
        let text = format!("{}\n{}", output.stderr_text(), output.stdout_text());
        let Some(kind) = self.kind_of(&text) else {
            return command_error(program, args, output);
        };
        let message = failure_text(output);
        let name = quoted_name(&message).unwrap_or_else(|| message.clone());
        match kind {
            ErrorKind::NotInVcs => VcsError::NotInVcs {
                path: dir.to_path_buf(),
            },
            ErrorKind::DirtyWorkspace => VcsError::DirtyWorkspace {
                path: dir.to_path_buf(),
            },
            ErrorKind::NoRemote => VcsError::NoRemote {
                remote: quoted_name(&message),
            },
            ErrorKind::RefExists => VcsError::RefExists { name },
            ErrorKind::RefNotFound => VcsError::RefNotFound { name },
            ErrorKind::WorkspaceExists => VcsError::WorkspaceExists { name },
            ErrorKind::WorkspaceNotFound => VcsError::WorkspaceNotFound { name },
            ErrorKind::Conflicts => VcsError::Conflicts { message },
            ErrorKind::PushRejected => VcsError::PushRejected { message },
            ErrorKind::MergeRequired => VcsError::MergeRequired { message },
            ErrorKind::Detached => VcsError::Detached(message),
            ErrorKind::Aborted => VcsError::Aborted(message),
            ErrorKind::VcsUnavailable => VcsError::Unavailable {
                tool: program.to_string(),
                reason: message,
            },
            ErrorKind::Timeout | ErrorKind::NotSupported => command_error(program, args, output),
        }
    }
}

/// First name quoted with `'`, `"` or a backtick in `text`.
pub fn quoted_name(text: &str) -> Option<String> {
    let (start, quote) = text
        .char_indices()
        .find(|(_, c)| matches!(c, '\'' | '"' | '`'))?;
    let rest = &text[start + quote.len_utf8()..];
    let end = rest.find(quote)?;
    let name = &rest[..end];
    (!name.is_empty()).then(|| name.to_string())
}

/// Spawn `cmd`, drain its output, and enforce the context's deadline.
fn run_command(
    mut cmd: Command,
    rendered: &str,
    dir: &Path,
    ctx: &ExecContext,
) -> Result<CommandOutput> {
    cmd.stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped());

    if ctx.is_cancelled() {
        return Err(timeout_error(rendered, ctx));
    }
    if !dir.is_dir() {
        return Err(VcsError::Io(io::Error::new(
            io::ErrorKind::NotFound,
            format!("working directory does not exist: {}", dir.display()),
        )));
    }

    let started = Instant::now();
    let mut child = cmd.spawn().map_err(|e| VcsError::Unavailable {
        tool: rendered.split(' ').next().unwrap_or_default().to_string(),
        reason: format!("failed to spawn: {e}"),
    })?;

    let stdout = child.stdout.take().map(spawn_reader);
    let stderr = child.stderr.take().map(spawn_reader);

    let finished = wait_with_deadline(&mut child, ctx, started)?;

    let stdout = join_reader(stdout);
    let stderr = join_reader(stderr);
    let elapsed_ms = started.elapsed().as_millis();

    let Some(code) = finished else {
        warn!(command = rendered, elapsed_ms, "command timed out or was cancelled, killed");
        return Err(timeout_error(rendered, ctx));
    };

    if command_tracing() {
        info!(command = rendered, dir = %dir.display(), ?code, elapsed_ms, "vcs command");
    } else {
        debug!(command = rendered, dir = %dir.display(), ?code, elapsed_ms, "vcs command");
    }

    Ok(CommandOutput {
        code,
        stdout,
        stderr,
    })
}

/// Wait in short slices. Returns `None` when the child had to be killed.
fn wait_with_deadline(
    child: &mut Child,
    ctx: &ExecContext,
    started: Instant,
) -> Result<Option<Option<i32>>> {
    let deadline = started + ctx.timeout;
    loop {
        let now = Instant::now();
        let slice = POLL_INTERVAL.min(deadline.saturating_duration_since(now));
        if let Some(status) = child.wait_timeout(slice)? {
            return Ok(Some(status.code()));
        }
        if ctx.is_cancelled() || Instant::now() >= deadline {
            // The child may have exited between the wait and the kill.
            if let Err(e) = child.kill() {
                debug!(error = %e, "kill after deadline failed");
            }
            child.wait()?;
            return Ok(None);
        }
    }
}

/// Read a pipe to the end on a background thread.
fn spawn_reader<R: Read + Send + 'static>(mut pipe: R) -> JoinHandle<Vec<u8>> {
    thread::spawn(move || {
        let mut buf = Vec::new();
        if let Err(e) = pipe.read_to_end(&mut buf) {
            debug!(error = %e, "reading child output failed");
        }
        buf
    })
}

/// Collect a reader thread's bytes; a panicked reader yields nothing.
fn join_reader(handle: Option<JoinHandle<Vec<u8>>>) -> Vec<u8> {
    handle
        .and_then(|h| h.join().ok())
        .unwrap_or_default()
}

/// Build the timeout error for `rendered`.
fn timeout_error(rendered: &str, ctx: &ExecContext) -> VcsError {
    VcsError::Timeout {
        command: rendered.to_string(),
        timeout: ctx.timeout,
    }
}

/// Trimmed, non-empty lines of `text`.
pub fn parse_lines(text: &str) -> Vec<&str> {
    text.lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .collect()
}

/// Split each line on the first `sep` into a map. Later keys win.
pub fn parse_key_values(text: &str, sep: char) -> HashMap<String, String> {
    parse_lines(text)
        .into_iter()
        .filter_map(|line| line.split_once(sep))
        .map(|(k, v)| (k.trim().to_string(), v.trim().to_string()))
        .collect()
}

/// Validate a caller-supplied path before handing it to a tool.
///
/// Rejects empty paths, NUL bytes, a leading `-` (which a tool would read as an
/// option), and relative paths that climb above their starting directory.
/// Returns the path with `.` components removed and `..` folded.
pub fn sanitize_path(path: &Path) -> Result<PathBuf> {
    let raw = path.to_string_lossy();
    if raw.is_empty() {
        return Err(VcsError::InvalidArgument("empty path".to_string()));
    }
    if raw.contains('\0') {
        return Err(VcsError::InvalidArgument(format!(
            "path contains NUL byte: {raw:?}"
        )));
    }
    if raw.starts_with('-') {
        return Err(VcsError::InvalidArgument(format!(
            "path may not start with '-': {raw}"
        )));
    }

    let mut normalized = PathBuf::new();
    let mut depth = 0usize;
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                if depth == 0 {
                    if path.is_absolute() {
                        continue;
                    }
                    return Err(VcsError::InvalidArgument(format!(
                        "path escapes its root: {raw}"
                    )));
                }
                normalized.pop();
                depth -= 1;
            }
            Component::Normal(part) => {
                normalized.push(part);
                depth += 1;
            }
            other => normalized.push(other.as_os_str()),
        }
    }

    if normalized.as_os_str().is_empty() {
        return Ok(PathBuf::from("."));
    }
    Ok(normalized)
}

/// Sanitize every path and render them as tool arguments.
pub fn path_args(paths: &[PathBuf]) -> Result<Vec<String>> {
    paths
        .iter()
        .map(|p| sanitize_path(p).map(|p| p.to_string_lossy().into_owned()))
        .collect()
}
