use std::env;

use serde::Deserialize;
use tracing::warn;

use crate::vcs::BackendTag;

/// Names one backend; wins over defaults for colocated repositories.
pub const ENV_BACKEND: &str = "AGENTVCS_BACKEND";
/// Gate for callers switching to the abstraction.
pub const ENV_ENABLED: &str = "AGENTVCS_ENABLED";
/// Opt in or out of the change backend.
pub const ENV_JJ: &str = "AGENTVCS_JJ";
/// Same effect as `AGENTVCS_BACKEND=jj`.
pub const ENV_PREFER_JJ: &str = "AGENTVCS_PREFER_JJ";
/// Turns on operation tracing.
pub const ENV_LOG: &str = "AGENTVCS_LOG";

/// Process-wide options recognised by the VCS layer.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Explicit backend preference.
    pub preferred_backend: Option<BackendTag>,
    /// Whether callers should route through the abstraction.
    pub abstraction_enabled: bool,
    /// Whether the change backend may be used at all.
    pub jj_enabled: bool,
    /// Prefer the change backend for colocated repositories.
    pub prefer_jj: bool,
    /// Trace every subprocess call.
    pub trace: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            preferred_backend: None,
            abstraction_enabled: false,
            jj_enabled: true,
            prefer_jj: false,
            trace: false,
        }
    }
}

impl Config {
    /// Read the configuration from the process environment.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Build the configuration from an arbitrary key lookup.
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();
        let flag = |key: &str, default: bool| {
            lookup(key)
                .and_then(|value| {
                    let parsed = parse_bool(&value);
                    if parsed.is_none() {
                        warn!(key, value, "ignoring unrecognised boolean");
                    }
                    parsed
                })
                .unwrap_or(default)
        };

        let preferred_backend = lookup(ENV_BACKEND)
            .filter(|v| !v.trim().is_empty())
            .and_then(|value| match value.parse::<BackendTag>() {
                Ok(BackendTag::Colocated) | Err(_) => {
                    warn!(key = ENV_BACKEND, value, "ignoring unknown backend preference");
                    None
                }
                Ok(tag) => Some(tag),
            });

        Self {
            preferred_backend,
            abstraction_enabled: flag(ENV_ENABLED, defaults.abstraction_enabled),
            jj_enabled: flag(ENV_JJ, defaults.jj_enabled),
            prefer_jj: flag(ENV_PREFER_JJ, defaults.prefer_jj),
            trace: flag(ENV_LOG, defaults.trace),
        }
    }

    /// Backend to use when both markers are present.
    ///
    /// An explicit preference wins, then the prefer-jj flag; the default is the
    /// change backend for its undo and conflict model. A disabled change
    /// backend always yields Git.
    pub fn preference(&self) -> BackendTag {
        let preferred = self
            .preferred_backend
            .or(self.prefer_jj.then_some(BackendTag::Jj))
            .unwrap_or(BackendTag::Jj);
        if preferred == BackendTag::Jj && !self.jj_enabled {
            BackendTag::Git
        } else {
            preferred
        }
    }
}

/// Parse the boolean spellings accepted in the environment.
pub fn parse_bool(value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "yes" | "on" | "true" | "t" | "y" => Some(true),
        "0" | "no" | "off" | "false" | "f" | "n" => Some(false),
        _ => None,
    }
}
