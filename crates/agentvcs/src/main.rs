#![deny(missing_docs)]
#![deny(rustdoc::missing_crate_level_docs)]
//! Command-line interface for agent bookmarks and repository inspection via
//! the libagentvcs crate.

use std::{
    env,
    io::{self, IsTerminal, Write},
    path::{Path, PathBuf},
    process,
    sync::Arc,
    time::Duration,
};

use anyhow::{Context, Result};
use clap::{ArgGroup, Parser, Subcommand};
use libagentvcs::{
    AgentManager, Config, ExecContext, Factory, Vcs, VcsError,
    agent::{CompleteOptions, DEFAULT_TARGET, HandoffOptions, RecoverOptions, SpawnOptions},
    detect,
};
use tracing::debug;
use tracing_subscriber::EnvFilter;

mod output;

use crate::output::{Output, Quiet, Terminal};

/// Journal entries shown by `oplog` when no limit is given.
const DEFAULT_OPLOG_LIMIT: usize = 20;

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
#[command(group(
    ArgGroup::new("color_mode")
        .args(["color", "no_color"])
))]
/// Top-level CLI options for agentvcs.
struct Cli {
    /// Repository directory (defaults to the current directory)
    #[arg(long, global = true, value_name = "DIR")]
    repo: Option<PathBuf>,

    /// Enable colored output
    #[arg(long, global = true)]
    color: bool,

    /// Disable colored output
    #[arg(long = "no-color", global = true)]
    no_color: bool,

    /// Suppress all output
    #[arg(long, global = true)]
    quiet: bool,

    /// Timeout for each VCS command, in seconds
    #[arg(long, global = true, value_name = "SECS")]
    timeout: Option<u64>,

    #[command(subcommand)]
    /// The primary command to execute.
    command: Commands,
}

#[derive(Subcommand)]
/// CLI subcommands supported by agentvcs.
enum Commands {
    /// Show the detected repository and backend
    Info,

    /// Manage agent bookmarks
    Agent {
        #[command(subcommand)]
        /// Agent operation to run.
        command: AgentCommand,
    },

    /// Show the operation journal (reflog on Git)
    Oplog {
        /// Number of entries to show
        #[arg(long, default_value_t = DEFAULT_OPLOG_LIMIT)]
        limit: usize,
    },

    /// Inspect workspaces
    Workspace {
        #[command(subcommand)]
        /// Workspace operation to run.
        command: WorkspaceCommand,
    },
}

#[derive(Subcommand)]
/// Agent lifecycle operations.
enum AgentCommand {
    /// Start a new agent from a base reference
    Spawn {
        /// Agent id; `agent-` is prepended when missing
        id: String,

        /// Base reference
        #[arg(long, default_value = DEFAULT_TARGET)]
        base: String,

        /// Description of the agent's first change
        #[arg(long)]
        description: Option<String>,
    },

    /// Continue one agent's work under another
    Handoff {
        /// Agent handing off
        from: String,

        /// Agent taking over
        to: String,

        /// Why the handoff happens
        #[arg(long)]
        reason: String,

        /// Archive the old agent afterwards
        #[arg(long)]
        archive: bool,
    },

    /// Land an agent's work on a target reference
    Complete {
        /// Agent to complete
        id: String,

        /// Target reference
        #[arg(long, default_value = DEFAULT_TARGET)]
        target: String,

        /// Delete the agent reference afterwards
        #[arg(long, conflicts_with = "archive")]
        delete: bool,

        /// Archive the agent reference afterwards
        #[arg(long)]
        archive: bool,
    },

    /// Move an agent under the archive prefix
    Archive {
        /// Agent to archive
        id: String,
    },

    /// List live and archived agents
    #[command(alias = "ls")]
    List,

    /// Show one agent's state
    Status {
        /// Agent to inspect
        id: String,
    },

    /// Find an agent in the operation journal
    Recover {
        /// Agent to look for
        id: String,

        /// Anchor on this operation instead of the latest match
        #[arg(long, value_name = "OP")]
        op: Option<String>,

        /// Journal entries to scan
        #[arg(long)]
        limit: Option<usize>,

        /// Recreate the agent's reference under this name
        #[arg(long, value_name = "NAME")]
        restore_as: Option<String>,
    },
}

#[derive(Subcommand)]
/// Workspace operations.
enum WorkspaceCommand {
    /// List workspaces known to the backend
    #[command(alias = "ls")]
    List,
}

/// Convert an output write failure into an error.
fn emit(result: io::Result<()>) -> Result<()> {
    result.context("failed to write output")
}

/// Abbreviate a commit id for display.
fn short(hash: &str) -> &str {
    hash.get(..12).unwrap_or(hash)
}

/// Install the stderr log subscriber.
fn init_tracing(config: &Config) {
    let default = if config.trace {
        "libagentvcs=info"
    } else {
        "warn"
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    if let Err(e) = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .with_target(false)
        .try_init()
    {
        eprintln!("Failed to initialise logging: {e}");
    }
}

/// Print what was detected around `repo` and which backend handles it.
fn info_command(
    factory: &Factory,
    repo: &Path,
    ctx: &ExecContext,
    output: &dyn Output,
) -> Result<()> {
    let detection = detect::detect(repo)?;
    let vcs = factory.create(repo)?;

    emit(output.item("detected", detection.tag.as_str()))?;
    emit(output.item("backend", vcs.name().as_str()))?;
    emit(output.item("root", &vcs.repo_root().display().to_string()))?;
    emit(output.item("meta", &vcs.meta_dir().display().to_string()))?;
    if detection.is_worktree {
        emit(output.item(
            "main repository",
            &detection.main_repo_root.display().to_string(),
        ))?;
    }
    match vcs.version(ctx) {
        Ok(version) => emit(output.item("version", &version))?,
        Err(e) => emit(output.warn(&format!("version unavailable: {e}")))?,
    }
    let current = vcs.current_ref(ctx)?;
    let current = if current.is_empty() {
        "(none)"
    } else {
        current.as_str()
    };
    emit(output.item("current", current))?;
    Ok(())
}

/// Dispatch an agent subcommand.
fn agent_command(
    vcs: &dyn Vcs,
    ctx: ExecContext,
    command: AgentCommand,
    output: &dyn Output,
) -> Result<()> {
    let manager = AgentManager::new(vcs).with_context(ctx);
    match command {
        AgentCommand::Spawn {
            id,
            base,
            description,
        } => {
            let agent = manager.spawn(&SpawnOptions {
                agent_id: id,
                base_branch: Some(base),
                description,
            })?;
            emit(output.success(&format!(
                "Spawned {} from {}",
                agent.id, agent.based_on
            )))?;
        }
        AgentCommand::Handoff {
            from,
            to,
            reason,
            archive,
        } => {
            let agent = manager.handoff(&HandoffOptions {
                from,
                to,
                reason,
                archive_old: archive,
            })?;
            emit(output.success(&format!(
                "Handed off {} to {}",
                agent.based_on, agent.id
            )))?;
        }
        AgentCommand::Complete {
            id,
            target,
            delete,
            archive,
        } => {
            let head = manager.complete(&CompleteOptions {
                agent_id: id.clone(),
                target: Some(target.clone()),
                delete,
                archive,
            })?;
            emit(output.success(&format!(
                "Completed {} into {target} at {}",
                libagentvcs::normalize_agent_id(&id),
                short(&head)
            )))?;
        }
        AgentCommand::Archive { id } => {
            let archive = manager.archive(&id)?;
            emit(output.success(&format!("Archived as {archive}")))?;
        }
        AgentCommand::List => {
            let agents = manager.list()?;
            if agents.is_empty() {
                emit(output.message("No agents found."))?;
            }
            for agent in agents {
                let state = if agent.archived { " (archived)" } else { "" };
                emit(output.item(&agent.id, &format!("{}{state}", short(&agent.commit))))?;
            }
        }
        AgentCommand::Status { id } => {
            let status = manager.status(&id)?;
            emit(output.item("agent", &status.id))?;
            if !status.exists {
                emit(output.warn("does not exist"))?;
                return Ok(());
            }
            if let Some(commit) = &status.commit {
                emit(output.item("commit", short(commit)))?;
            }
            emit(output.item("current", &status.is_current.to_string()))?;
            if status.has_changes {
                emit(output.warn("uncommitted changes"))?;
            }
        }
        AgentCommand::Recover {
            id,
            op,
            limit,
            restore_as,
        } => {
            let recovery = manager.recover(&RecoverOptions {
                agent_id: id,
                operation: op,
                limit,
                restore_as,
            })?;
            emit(output.item("operation", &recovery.operation.id))?;
            if !recovery.operation.description.is_empty() {
                emit(output.item("description", &recovery.operation.description))?;
            }
            if let Some(restored) = recovery.restored {
                emit(output.success(&format!(
                    "Restored {} as {restored}",
                    recovery.agent_id
                )))?;
            }
        }
    }
    Ok(())
}

/// Print the most recent journal entries.
fn oplog_command(
    vcs: &dyn Vcs,
    ctx: &ExecContext,
    limit: usize,
    output: &dyn Output,
) -> Result<()> {
    let records = vcs.operation_log(ctx, limit)?;
    if records.is_empty() {
        emit(output.message("No operations recorded."))?;
    }
    for record in records {
        let when = record
            .timestamp
            .map(|t| t.format("%Y-%m-%d %H:%M:%S").to_string())
            .unwrap_or_default();
        emit(output.message(&format!(
            "{} {when} {}",
            record.id, record.description
        )))?;
    }
    Ok(())
}

/// Print the workspaces the backend knows about.
fn workspace_list_command(vcs: &dyn Vcs, ctx: &ExecContext, output: &dyn Output) -> Result<()> {
    for workspace in vcs.list_workspaces(ctx)? {
        let location = workspace
            .path
            .map(|p| p.display().to_string())
            .unwrap_or_default();
        let reference = workspace.reference.unwrap_or_default();
        emit(output.item(&workspace.name, format!("{location} {reference}").trim()))?;
    }
    Ok(())
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = Config::from_env();
    init_tracing(&config);

    let color = if cli.color {
        true
    } else if cli.no_color {
        false
    } else {
        io::stdout().is_terminal()
    };

    let output: Arc<dyn Output> = if cli.quiet {
        Arc::new(Quiet)
    } else {
        Arc::new(Terminal::new(color))
    };

    if let Err(e) = run(cli, &config, output.as_ref()) {
        // Reset any existing colors only if color was enabled and stdout is a TTY
        if color && io::stdout().is_terminal() {
            print!("\x1b[0m");
            if let Err(flush_err) = io::stdout().flush() {
                eprintln!("Failed to flush stdout while resetting colors: {flush_err}");
            }
        }
        if let Err(display_err) = output.fail(&format!("{e:#}")) {
            eprintln!("Failed to report error via output handler: {display_err:#}");
        }
        let exit_code = e.downcast_ref::<VcsError>().map_or(1, VcsError::exit_code);
        process::exit(exit_code);
    }
    Ok(())
}

/// Resolve the repository and run the selected command.
fn run(cli: Cli, config: &Config, output: &dyn Output) -> Result<()> {
    let repo = match cli.repo {
        Some(repo) => repo,
        None => env::current_dir().context("failed to read the current directory")?,
    };
    let ctx = cli
        .timeout
        .map(|secs| ExecContext::with_timeout(Duration::from_secs(secs)))
        .unwrap_or_default();
    let factory = Factory::from_config(config);
    debug!(repo = %repo.display(), timeout = ?ctx.timeout, "resolved repository");

    if let Commands::Info = cli.command {
        return info_command(&factory, &repo, &ctx, output);
    }

    let vcs = factory.create(&repo)?;
    match cli.command {
        Commands::Info => Ok(()),
        Commands::Agent { command } => agent_command(vcs.as_ref(), ctx, command, output),
        Commands::Oplog { limit } => oplog_command(vcs.as_ref(), &ctx, limit, output),
        Commands::Workspace {
            command: WorkspaceCommand::List,
        } => workspace_list_command(vcs.as_ref(), &ctx, output),
    }
}
