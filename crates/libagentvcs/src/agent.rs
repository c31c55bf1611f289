//! Agent bookmarks: one live reference per agent, spawned from a base,
//! handed off, completed into a target and archived.

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::{
    error::{ErrorKind, Result, StepExt, VcsError},
    exec::ExecContext,
    vcs::{OperationRecord, Vcs},
};

/// Prefix every live agent reference carries.
pub const AGENT_PREFIX: &str = "agent-";
/// Prefix of archived agent references.
pub const ARCHIVE_PREFIX: &str = "archive/";
/// Default base and completion target.
pub const DEFAULT_TARGET: &str = "main";
/// Conventional integration branch for agents that should not land on main.
pub const STAGING_TARGET: &str = "staging";
/// Reference used by sync workspaces.
pub const DEFAULT_SYNC_REF: &str = "beads-sync";
/// Journal entries scanned by [`AgentManager::recover`] by default.
pub const DEFAULT_RECOVER_LIMIT: usize = 100;

/// Canonical reference name for an agent id.
///
/// Ids that already carry the agent or archive prefix are returned unchanged;
/// anything else gets the agent prefix. Normalizing twice is a no-op.
pub fn normalize_agent_id(id: &str) -> String {
    let id = id.trim();
    if id.starts_with(AGENT_PREFIX) || id.starts_with(ARCHIVE_PREFIX) {
        id.to_string()
    } else {
        format!("{AGENT_PREFIX}{id}")
    }
}

/// Archive reference name for an agent.
pub fn archive_name(id: &str) -> String {
    format!("{ARCHIVE_PREFIX}{}", normalize_agent_id(id))
}

/// Normalize and reject empty ids.
fn require_id(id: &str) -> Result<String> {
    if id.trim().is_empty() {
        return Err(VcsError::InvalidArgument("agent id is required".to_string()));
    }
    Ok(normalize_agent_id(id))
}

/// Use `value` unless it is empty.
fn or_default(value: Option<&str>, default: &str) -> String {
    value
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .unwrap_or(default)
        .to_string()
}

/// A live agent reference.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Agent {
    /// Normalized agent id.
    pub id: String,
    /// Reference holding the agent's work; always equal to `id`.
    pub bookmark: String,
    /// Reference the agent was started from.
    pub based_on: String,
    /// When the reference was created.
    pub created_at: DateTime<Utc>,
}

/// Options for [`AgentManager::spawn`].
#[derive(Debug, Clone, Default)]
pub struct SpawnOptions {
    /// Agent id; normalized before use.
    pub agent_id: String,
    /// Base reference; [`DEFAULT_TARGET`] when unset.
    pub base_branch: Option<String>,
    /// Description of the agent's first change.
    pub description: Option<String>,
}

/// Options for [`AgentManager::handoff`].
#[derive(Debug, Clone, Default)]
pub struct HandoffOptions {
    /// Agent handing off.
    pub from: String,
    /// Agent taking over.
    pub to: String,
    /// Why the handoff happened.
    pub reason: String,
    /// Archive and delete `from` afterwards.
    pub archive_old: bool,
}

/// Options for [`AgentManager::complete`].
#[derive(Debug, Clone, Default)]
pub struct CompleteOptions {
    /// Agent to complete.
    pub agent_id: String,
    /// Reference that receives the work; [`DEFAULT_TARGET`] when unset.
    pub target: Option<String>,
    /// Delete the agent reference afterwards.
    pub delete: bool,
    /// Archive the agent reference afterwards; wins over `delete`.
    pub archive: bool,
}

/// Options for [`AgentManager::recover`].
#[derive(Debug, Clone, Default)]
pub struct RecoverOptions {
    /// Agent to look for.
    pub agent_id: String,
    /// Journal entry to anchor on instead of the most recent match.
    pub operation: Option<String>,
    /// Journal entries to scan; [`DEFAULT_RECOVER_LIMIT`] when unset.
    pub limit: Option<usize>,
    /// Recreate the agent's reference under this name.
    pub restore_as: Option<String>,
}

/// One agent reference as listed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AgentInfo {
    /// Reference name, including any archive prefix.
    pub id: String,
    /// Reference name; equal to `id`.
    pub bookmark: String,
    /// Commit the reference points at.
    pub commit: String,
    /// Whether this is an archived reference.
    pub archived: bool,
}

/// Point-in-time view of one agent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AgentStatus {
    /// Normalized agent id.
    pub id: String,
    /// Whether the reference exists.
    pub exists: bool,
    /// Commit the reference points at, when it exists.
    pub commit: Option<String>,
    /// Whether the working copy is on the agent's reference.
    pub is_current: bool,
    /// Uncommitted changes; only inspected when `is_current`.
    pub has_changes: bool,
}

/// Result of [`AgentManager::recover`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Recovery {
    /// Normalized agent id.
    pub agent_id: String,
    /// Journal entry used as the anchor.
    pub operation: OperationRecord,
    /// Reference recreated from the anchor, if one was requested.
    pub restored: Option<String>,
}

/// Runs agent lifecycle operations against one repository handle.
pub struct AgentManager<'a> {
    /// Repository handle.
    vcs: &'a dyn Vcs,
    /// Deadline and cancellation for every step.
    ctx: ExecContext,
}

impl<'a> AgentManager<'a> {
    /// Manager using the default timeout.
    pub fn new(vcs: &'a dyn Vcs) -> Self {
        Self {
            vcs,
            ctx: ExecContext::default(),
        }
    }

    /// Use `ctx` for every step.
    pub fn with_context(mut self, ctx: ExecContext) -> Self {
        self.ctx = ctx;
        self
    }

    /// Fail with `RefNotFound` unless `name` exists.
    fn require_ref(&self, name: &str) -> Result<()> {
        if self.vcs.ref_exists(&self.ctx, name)? {
            Ok(())
        } else {
            Err(VcsError::RefNotFound {
                name: name.to_string(),
            })
        }
    }

    /// Fail with `RefExists` if `name` exists.
    fn require_absent(&self, name: &str) -> Result<()> {
        if self.vcs.ref_exists(&self.ctx, name)? {
            Err(VcsError::RefExists {
                name: name.to_string(),
            })
        } else {
            Ok(())
        }
    }

    /// Start a new change on the base and point the agent reference at it.
    pub fn spawn(&self, opts: &SpawnOptions) -> Result<Agent> {
        let id = require_id(&opts.agent_id)?;
        let base = or_default(opts.base_branch.as_deref(), DEFAULT_TARGET);
        self.require_absent(&id).step("check agent")?;
        self.require_ref(&base).step("check base")?;

        let message = opts
            .description
            .as_deref()
            .map(str::trim)
            .filter(|d| !d.is_empty())
            .map_or_else(|| format!("Agent {id} started from {base}"), ToString::to_string);
        let head = self
            .vcs
            .start_change(&self.ctx, &base, &message)
            .step("start change")?;
        self.vcs
            .create_ref(&self.ctx, &id, &head)
            .step("create agent reference")?;

        info!(agent = %id, base = %base, head = %head, "spawned agent");
        Ok(Agent {
            bookmark: id.clone(),
            id,
            based_on: base,
            created_at: Utc::now(),
        })
    }

    /// Continue `from`'s work under a new agent.
    pub fn handoff(&self, opts: &HandoffOptions) -> Result<Agent> {
        let from = require_id(&opts.from)?;
        let to = require_id(&opts.to)?;
        self.require_ref(&from).step("check source agent")?;
        self.require_absent(&to).step("check target agent")?;

        let message = format!("Handoff from {from}: {}", opts.reason);
        let head = self
            .vcs
            .start_change(&self.ctx, &from, &message)
            .step("start handoff change")?;
        self.vcs
            .create_ref(&self.ctx, &to, &head)
            .step("create agent reference")?;
        if opts.archive_old {
            self.archive(&from).step("archive source agent")?;
        }

        info!(from = %from, to = %to, archived = opts.archive_old, "handed off agent");
        Ok(Agent {
            bookmark: to.clone(),
            id: to,
            based_on: from,
            created_at: Utc::now(),
        })
    }

    /// Land the agent's work on the target and clean up its reference.
    ///
    /// Returns the commit the target now points at.
    pub fn complete(&self, opts: &CompleteOptions) -> Result<String> {
        let id = require_id(&opts.agent_id)?;
        let target = or_default(opts.target.as_deref(), DEFAULT_TARGET);
        self.require_ref(&id).step("check agent")?;
        self.require_ref(&target).step("check target")?;

        self.vcs
            .rebase_ref(&self.ctx, &id, &target)
            .step("rebase onto target")?;
        let head = self.vcs.commit_hash(&self.ctx, &id).step("resolve agent head")?;
        self.vcs
            .move_ref(&self.ctx, &target, &head)
            .step("move target")?;

        if opts.archive {
            self.archive(&id).step("archive agent")?;
        } else if opts.delete {
            self.vcs
                .delete_ref(&self.ctx, &id)
                .step("delete agent reference")?;
        }

        info!(agent = %id, target = %target, head = %head, "completed agent");
        Ok(head)
    }

    /// Move the agent's reference under the archive prefix.
    ///
    /// Returns the archive reference name. If deleting the original fails, the
    /// archive reference is removed again on a best-effort basis.
    pub fn archive(&self, agent_id: &str) -> Result<String> {
        let id = require_id(agent_id)?;
        if id.starts_with(ARCHIVE_PREFIX) {
            return Err(VcsError::InvalidArgument(format!("{id} is already archived")));
        }
        let archive = archive_name(&id);
        self.require_ref(&id).step("check agent")?;
        self.require_absent(&archive).step("check archive")?;

        let head = self.vcs.commit_hash(&self.ctx, &id).step("resolve agent head")?;
        self.vcs
            .create_ref(&self.ctx, &archive, &head)
            .step("create archive reference")?;
        if let Err(e) = self.vcs.delete_ref(&self.ctx, &id) {
            if let Err(rollback) = self.vcs.delete_ref(&self.ctx, &archive) {
                warn!(archive = %archive, error = %rollback, "failed to roll back archive reference");
            }
            return Err(e.in_step("delete agent reference"));
        }

        info!(agent = %id, archive = %archive, "archived agent");
        Ok(archive)
    }

    /// Live and archived agent references, sorted by name.
    pub fn list(&self) -> Result<Vec<AgentInfo>> {
        let archived_prefix = format!("{ARCHIVE_PREFIX}{AGENT_PREFIX}");
        let mut agents: Vec<AgentInfo> = self
            .vcs
            .list_refs(&self.ctx)
            .step("list references")?
            .into_iter()
            .filter(|r| !r.is_remote)
            .filter_map(|r| {
                let archived = r.name.starts_with(&archived_prefix);
                (archived || r.name.starts_with(AGENT_PREFIX)).then(|| AgentInfo {
                    id: r.name.clone(),
                    bookmark: r.name,
                    commit: r.hash,
                    archived,
                })
            })
            .collect();
        agents.sort_by(|a, b| a.id.cmp(&b.id));
        agents.dedup_by(|a, b| a.id == b.id);
        Ok(agents)
    }

    /// Existence, head and dirty state of one agent.
    pub fn status(&self, agent_id: &str) -> Result<AgentStatus> {
        let id = require_id(agent_id)?;
        let exists = self.vcs.ref_exists(&self.ctx, &id).step("check agent")?;
        let commit = if exists {
            Some(self.vcs.commit_hash(&self.ctx, &id).step("resolve agent head")?)
        } else {
            None
        };
        let is_current = exists && self.vcs.current_ref(&self.ctx).step("current reference")? == id;
        // Dirty state is only meaningful for the checked-out reference.
        let has_changes = is_current
            && self
                .vcs
                .has_changes(&self.ctx, &[])
                .step("check working copy")?;
        Ok(AgentStatus {
            id,
            exists,
            commit,
            is_current,
            has_changes,
        })
    }

    /// Find the journal entry for an agent and optionally restore its
    /// reference from it.
    ///
    /// Jujutsu keeps every bookmark in its operation log, so a deleted agent
    /// can be restored from the view before the deletion. Git reads branch
    /// reflogs instead, and deleting a branch removes its reflog with it:
    /// there recovery only sees agents whose branch still exists. Asking git
    /// for a deleted agent fails with [`ErrorKind::RefNotFound`], or with
    /// [`ErrorKind::NotSupported`] when only the `HEAD` reflog still names it.
    pub fn recover(&self, opts: &RecoverOptions) -> Result<Recovery> {
        let id = require_id(&opts.agent_id)?;
        let limit = opts
            .limit
            .filter(|l| *l > 0)
            .unwrap_or(DEFAULT_RECOVER_LIMIT);
        let log = self
            .vcs
            .operation_log(&self.ctx, limit)
            .step("read operation log")?;
        let matches: Vec<&OperationRecord> = log.iter().filter(|r| r.mentions(&id)).collect();
        debug!(agent = %id, scanned = log.len(), matches = matches.len(), "searched operation log");

        let candidates: Vec<OperationRecord> = match opts.operation.as_deref() {
            Some(op) => vec![
                log.iter()
                    .find(|r| r.id == op || r.id.starts_with(op))
                    .cloned()
                    .unwrap_or_else(|| OperationRecord {
                        id: op.to_string(),
                        timestamp: None,
                        description: String::new(),
                        user: String::new(),
                        args: Vec::new(),
                    }),
            ],
            None => matches.into_iter().cloned().collect(),
        };
        let Some(anchor) = candidates.first().cloned() else {
            return Err(VcsError::RefNotFound {
                name: format!("{id} in the last {limit} operations"),
            });
        };

        let Some(name) = opts.restore_as.as_deref().filter(|n| !n.trim().is_empty()) else {
            return Ok(Recovery {
                agent_id: id,
                operation: anchor,
                restored: None,
            });
        };
        self.require_absent(name).step("check restore target")?;

        // Newer matches may record the deletion itself; walk back until one
        // still knows where the reference pointed.
        for candidate in &candidates {
            match self.vcs.ref_at_operation(&self.ctx, &candidate.id, &id) {
                Ok(hash) => {
                    self.vcs
                        .create_ref(&self.ctx, name, &hash)
                        .step("restore reference")?;
                    info!(agent = %id, operation = %candidate.id, restored = name, "recovered agent");
                    return Ok(Recovery {
                        agent_id: id,
                        operation: candidate.clone(),
                        restored: Some(name.to_string()),
                    });
                }
                Err(e) if e.is(ErrorKind::RefNotFound) => {
                    debug!(operation = %candidate.id, "reference unknown at operation");
                }
                Err(e) => return Err(e.in_step("resolve reference at operation")),
            }
        }
        Err(VcsError::NotSupported {
            backend: self.vcs.name(),
            operation: format!("restoring {id} from operation {}", anchor.id),
        })
    }
}
