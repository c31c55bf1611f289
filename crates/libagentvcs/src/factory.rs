use std::{
    collections::HashMap,
    path::Path,
    sync::{Arc, LazyLock, Mutex, RwLock},
};

use tracing::debug;

use crate::{
    config::Config,
    detect::{self, Availability, DetectionResult},
    error::Result,
    exec,
    registry::{Registry, register_builtin_backends},
    vcs::{BackendTag, Vcs},
};

/// Handles keyed by the exact path string they were requested for.
static CACHE: LazyLock<RwLock<HashMap<String, Arc<dyn Vcs>>>> =
    LazyLock::new(|| RwLock::new(HashMap::new()));

/// Global switch that overrides every factory's cache setting.
static CACHE_SUPPRESSED: Mutex<bool> = Mutex::new(false);

/// Drop every cached handle.
pub fn reset_cache() {
    CACHE.write().unwrap_or_else(|e| e.into_inner()).clear();
}

/// Suppress (or re-allow) caching for all factories.
pub fn set_cache_suppressed(suppressed: bool) {
    *CACHE_SUPPRESSED.lock().unwrap_or_else(|e| e.into_inner()) = suppressed;
}

/// Whether caching is globally suppressed.
pub fn cache_suppressed() -> bool {
    *CACHE_SUPPRESSED.lock().unwrap_or_else(|e| e.into_inner())
}

/// Number of cached handles.
pub fn cache_len() -> usize {
    CACHE.read().unwrap_or_else(|e| e.into_inner()).len()
}

/// Hands out a VCS handle for a filesystem path.
///
/// The cache key is the path string as given, not a canonical path, so two
/// spellings of one repository yield two handles.
pub struct Factory {
    /// Backend chosen for colocated repositories when available.
    preferred: BackendTag,
    /// Backend used when neither colocated choice is usable.
    fallback: BackendTag,
    /// Whether this factory reads and writes the global cache.
    cache_enabled: bool,
    /// Whether the change backend may be chosen.
    jj_enabled: bool,
    /// Constructor table.
    registry: Arc<Registry>,
    /// Register the built-in backends before the first lookup.
    register_builtins: bool,
    /// Availability override; scanned per call when `None`.
    availability: Option<Availability>,
}

impl Default for Factory {
    fn default() -> Self {
        Self::from_config(&Config::default())
    }
}

impl Factory {
    /// Factory configured from the process environment.
    pub fn new() -> Self {
        Self::from_config(&Config::from_env())
    }

    /// Factory configured from `config`.
    pub fn from_config(config: &Config) -> Self {
        if config.trace {
            exec::set_command_tracing(true);
        }
        Self {
            preferred: config.preference(),
            fallback: BackendTag::Git,
            cache_enabled: false,
            jj_enabled: config.jj_enabled,
            registry: Registry::global(),
            register_builtins: true,
            availability: None,
        }
    }

    /// Set the colocated preference.
    pub fn with_preferred(mut self, tag: BackendTag) -> Self {
        self.preferred = tag;
        self
    }

    /// Set the last-resort backend.
    pub fn with_fallback(mut self, tag: BackendTag) -> Self {
        self.fallback = tag;
        self
    }

    /// Opt in to (or out of) the global handle cache.
    pub fn with_cache(mut self, enabled: bool) -> Self {
        self.cache_enabled = enabled;
        self
    }

    /// Use a specific registry; built-ins are not registered automatically.
    pub fn with_registry(mut self, registry: Arc<Registry>) -> Self {
        self.registry = registry;
        self.register_builtins = false;
        self
    }

    /// Skip probing and assume this availability.
    pub fn with_availability(mut self, availability: Availability) -> Self {
        self.availability = Some(availability);
        self
    }

    /// Preferred backend for colocated repositories.
    pub fn preferred(&self) -> BackendTag {
        self.preferred
    }

    /// Whether this call may use the cache.
    fn caching(&self) -> bool {
        self.cache_enabled && !cache_suppressed()
    }

    /// Handle for the repository containing `path`.
    pub fn create(&self, path: &Path) -> Result<Arc<dyn Vcs>> {
        let key = path.to_string_lossy().into_owned();
        if self.caching()
            && let Some(handle) = CACHE
                .read()
                .unwrap_or_else(|e| e.into_inner())
                .get(&key)
                .cloned()
        {
            debug!(path = %key, backend = %handle.name(), "vcs cache hit");
            return Ok(handle);
        }

        if self.register_builtins {
            register_builtin_backends(&self.registry);
        }

        let mut availability = self.availability.unwrap_or_else(Availability::scan);
        if !self.jj_enabled {
            availability = availability.without_jj();
        }

        let detection = detect::detect_with_availability(path, &availability)?;
        let tag = self.choose(&detection, &availability);
        let constructor = self.registry.require(tag)?;
        let handle = constructor(path)?;
        debug!(path = %key, detected = %detection.tag, chosen = %tag, "created vcs handle");

        if self.caching() {
            CACHE
                .write()
                .unwrap_or_else(|e| e.into_inner())
                .insert(key, Arc::clone(&handle));
        }
        Ok(handle)
    }

    /// Pick the implementation tag for a detection result.
    fn choose(&self, detection: &DetectionResult, availability: &Availability) -> BackendTag {
        if detection.tag != BackendTag::Colocated {
            return detection.tag;
        }
        let usable =
            |tag: BackendTag| availability.has(tag) && self.registry.is_registered(tag);
        if usable(self.preferred) {
            return self.preferred;
        }
        if let Some(other) = self.preferred.other()
            && usable(other)
        {
            return other;
        }
        self.fallback
    }
}

#[cfg(test)]
mod tests {
    use std::{fs, path::PathBuf, process::Command};

    use tempfile::TempDir;

    use super::*;
    use crate::error::VcsError;

    /// Availability with both binaries assumed present.
    const BOTH: Availability = Availability { git: true, jj: true };

    /// A Git repository with an additional `.jj` marker.
    fn colocated_repo() -> (TempDir, PathBuf) {
        let tmp = TempDir::new().unwrap();
        let root = fs::canonicalize(tmp.path()).unwrap();
        let status = Command::new("git")
            .args(["init", "-q", "-b", "main"])
            .current_dir(&root)
            .status()
            .unwrap();
        assert!(status.success());
        fs::create_dir_all(root.join(".jj")).unwrap();
        (tmp, root)
    }

    /// A registry holding the built-in backends.
    fn builtin_registry() -> Arc<Registry> {
        let registry = Arc::new(Registry::new());
        register_builtin_backends(&registry);
        registry
    }

    #[test]
    fn colocated_follows_preference() {
        let (_tmp, root) = colocated_repo();

        let jj = Factory::default()
            .with_registry(builtin_registry())
            .with_availability(BOTH)
            .with_preferred(BackendTag::Jj)
            .create(&root)
            .unwrap();
        assert_eq!(jj.name(), BackendTag::Jj);

        let git = Factory::default()
            .with_registry(builtin_registry())
            .with_availability(BOTH)
            .with_preferred(BackendTag::Git)
            .create(&root)
            .unwrap();
        assert_eq!(git.name(), BackendTag::Git);
    }

    #[test]
    fn config_preference_applies() {
        let (_tmp, root) = colocated_repo();
        let config = Config {
            preferred_backend: Some(BackendTag::Git),
            ..Config::default()
        };
        let handle = Factory::from_config(&config)
            .with_registry(builtin_registry())
            .with_availability(BOTH)
            .create(&root)
            .unwrap();
        assert_eq!(handle.name(), BackendTag::Git);
    }

    #[test]
    fn unavailable_preference_uses_other_backend() {
        let (_tmp, root) = colocated_repo();
        let handle = Factory::default()
            .with_registry(builtin_registry())
            .with_availability(Availability { git: true, jj: false })
            .with_preferred(BackendTag::Jj)
            .create(&root)
            .unwrap();
        assert_eq!(handle.name(), BackendTag::Git);
    }

    #[test]
    fn unregistered_preference_uses_other_backend() {
        let (_tmp, root) = colocated_repo();
        let registry = Arc::new(Registry::new());
        registry
            .register(BackendTag::Git, |p| Ok(Arc::new(crate::git::GitBackend::open(p)?)))
            .unwrap();
        let handle = Factory::default()
            .with_registry(registry)
            .with_availability(BOTH)
            .with_preferred(BackendTag::Jj)
            .create(&root)
            .unwrap();
        assert_eq!(handle.name(), BackendTag::Git);
    }

    #[test]
    fn disabled_jj_is_never_chosen() {
        let (_tmp, root) = colocated_repo();
        let config = Config {
            jj_enabled: false,
            ..Config::default()
        };
        let handle = Factory::from_config(&config)
            .with_registry(builtin_registry())
            .with_availability(BOTH)
            .with_preferred(BackendTag::Jj)
            .create(&root)
            .unwrap();
        assert_eq!(handle.name(), BackendTag::Git);
    }

    #[test]
    fn empty_registry_error_enumerates_tags() {
        let (_tmp, root) = colocated_repo();
        let err = Factory::default()
            .with_registry(Arc::new(Registry::new()))
            .with_availability(BOTH)
            .create(&root)
            .err()
            .unwrap();
        assert!(matches!(err, VcsError::UnknownBackend { .. }), "{err}");
        assert!(err.to_string().contains("available: none"));
    }

    #[test]
    fn cache_is_keyed_by_path_string() {
        let (_tmp, root) = colocated_repo();
        let factory = Factory::default()
            .with_registry(builtin_registry())
            .with_availability(BOTH)
            .with_preferred(BackendTag::Git)
            .with_cache(true);

        let first = factory.create(&root).unwrap();
        let second = factory.create(&root).unwrap();
        if !cache_suppressed() {
            assert!(Arc::ptr_eq(&first, &second));
        }

        // A different spelling of the same directory is a different key.
        let aliased = root.join(".");
        let third = factory.create(&aliased).unwrap();
        assert!(!Arc::ptr_eq(&first, &third));
    }

    #[test]
    fn uncached_factory_builds_fresh_handles() {
        let (_tmp, root) = colocated_repo();
        let factory = Factory::default()
            .with_registry(builtin_registry())
            .with_availability(BOTH)
            .with_preferred(BackendTag::Git);
        let first = factory.create(&root).unwrap();
        let second = factory.create(&root).unwrap();
        assert!(!Arc::ptr_eq(&first, &second));
    }
}
