use std::{
    fs,
    path::{Path, PathBuf},
    process::{Command, Output},
    sync::Arc,
};

use anyhow::{Context, Result, ensure};
use libagentvcs::{BackendTag, ExecContext, Factory, Vcs, detect::Availability, registry::Registry};
use tempfile::TempDir;

/// Run a git command inside `repo_path`, ensuring it succeeds.
pub fn git(repo_path: &Path, args: &[&str]) -> Result<Output> {
    let output = Command::new("git")
        .current_dir(repo_path)
        .args(args)
        .output()
        .with_context(|| format!("failed to run git {}", args.join(" ")))?;

    ensure!(
        output.status.success(),
        "git command failed: git {}\nstdout: {}\nstderr: {}",
        args.join(" "),
        String::from_utf8_lossy(&output.stdout),
        String::from_utf8_lossy(&output.stderr)
    );

    Ok(output)
}

/// Initialise a repository on `main` with a README commit.
pub fn init_repository(repo_path: &Path) -> Result<()> {
    fs::create_dir_all(repo_path)?;
    git(repo_path, &["init", "-b", "main"])?;
    git(repo_path, &["config", "user.email", "test@example.com"])?;
    git(repo_path, &["config", "user.name", "Test User"])?;

    fs::write(repo_path.join("README.md"), "# Test Project")?;
    git(repo_path, &["add", "README.md"])?;
    git(repo_path, &["commit", "-m", "Initial commit"])?;
    Ok(())
}

/// Create a temporary repository; the returned path is canonical.
pub fn create_repo(repo_name: &str) -> Result<(TempDir, PathBuf)> {
    let temp_dir = TempDir::new()?;
    let repo_path = fs::canonicalize(temp_dir.path())?.join(repo_name);
    init_repository(&repo_path)?;
    Ok((temp_dir, repo_path))
}

/// A Git handle for `repo_path` from a factory with its own registry.
pub fn git_handle(repo_path: &Path) -> Result<Arc<dyn Vcs>> {
    let registry = Arc::new(Registry::new());
    libagentvcs::register_builtin_backends(&registry);
    let handle = Factory::default()
        .with_registry(registry)
        .with_availability(Availability { git: true, jj: false })
        .with_preferred(BackendTag::Git)
        .create(repo_path)?;
    ensure!(handle.name() == BackendTag::Git, "expected a git handle");
    Ok(handle)
}

/// Whether a `jj` binary can be run.
pub fn jj_available() -> bool {
    Command::new("jj")
        .arg("--version")
        .output()
        .is_ok_and(|o| o.status.success())
}

/// Run a jj command inside `repo_path`, ensuring it succeeds.
pub fn jj(repo_path: &Path, args: &[&str]) -> Result<Output> {
    let output = Command::new("jj")
        .current_dir(repo_path)
        .args(["--no-pager", "--color=never"])
        .args(args)
        .output()
        .with_context(|| format!("failed to run jj {}", args.join(" ")))?;

    ensure!(
        output.status.success(),
        "jj command failed: jj {}\nstdout: {}\nstderr: {}",
        args.join(" "),
        String::from_utf8_lossy(&output.stdout),
        String::from_utf8_lossy(&output.stderr)
    );

    Ok(output)
}

/// Colocate jj with the git repository at `repo_path` and return a jj handle.
pub fn jj_handle(repo_path: &Path) -> Result<Arc<dyn Vcs>> {
    jj(repo_path, &["git", "init", "--colocate"])?;
    jj(repo_path, &["config", "set", "--repo", "user.name", "Test User"])?;
    jj(repo_path, &["config", "set", "--repo", "user.email", "test@example.com"])?;

    let registry = Arc::new(Registry::new());
    libagentvcs::register_builtin_backends(&registry);
    let handle = Factory::default()
        .with_registry(registry)
        .with_availability(Availability { git: true, jj: true })
        .with_preferred(BackendTag::Jj)
        .create(repo_path)?;
    ensure!(handle.name() == BackendTag::Jj, "expected a jj handle");
    Ok(handle)
}

/// Run `test` against a fresh repository for each backend.
///
/// The jj pass is skipped when the binary is missing.
pub fn for_each_backend(
    repo_name: &str,
    test: impl Fn(&Path, &dyn Vcs) -> Result<()>,
) -> Result<()> {
    let (_git_tmp, repo) = create_repo(repo_name)?;
    let vcs = git_handle(&repo)?;
    test(&repo, vcs.as_ref()).context("git backend")?;

    if !jj_available() {
        eprintln!("jj not available; skipping jj pass of {repo_name}");
        return Ok(());
    }
    let (_jj_tmp, repo) = create_repo(repo_name)?;
    let vcs = jj_handle(&repo)?;
    test(&repo, vcs.as_ref()).context("jj backend")?;
    Ok(())
}

/// First line of the description of `rev`.
pub fn description(vcs: &dyn Vcs, rev: &str) -> Result<String> {
    let ctx = ExecContext::default();
    let output = match vcs.name() {
        BackendTag::Jj => vcs.exec(
            &ctx,
            &["log", "-r", rev, "--no-graph", "-T", "description.first_line()"],
        )?,
        _ => vcs.exec(&ctx, &["log", "-1", "--format=%s", rev])?,
    };
    Ok(String::from_utf8_lossy(&output).trim().to_string())
}
