use std::{
    collections::HashMap,
    path::Path,
    sync::{Arc, LazyLock, RwLock, RwLockReadGuard, RwLockWriteGuard},
};

use tracing::debug;

use crate::{
    error::{Result, VcsError},
    git::GitBackend,
    jj::JjBackend,
    vcs::{BackendTag, Vcs},
};

/// Builds a handle for the repository containing a path.
pub type Constructor = fn(&Path) -> Result<Arc<dyn Vcs>>;

/// Process-wide registry used by factories that are not given their own.
static GLOBAL: LazyLock<Arc<Registry>> = LazyLock::new(|| Arc::new(Registry::new()));

/// Thread-safe table from backend tag to constructor.
///
/// Rust has no module-initialisation side effects, so backends are registered
/// explicitly, normally through [`register_builtin_backends`].
#[derive(Default)]
pub struct Registry {
    /// Registered constructors.
    table: RwLock<HashMap<BackendTag, Constructor>>,
}

impl Registry {
    /// An empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// The shared process-wide registry.
    pub fn global() -> Arc<Self> {
        Arc::clone(&GLOBAL)
    }

    /// Register a constructor. Registering a tag twice is an error, as is
    /// registering `Colocated`, which is resolved by the factory.
    pub fn register(&self, tag: BackendTag, constructor: Constructor) -> Result<()> {
        if tag == BackendTag::Colocated {
            return Err(VcsError::InvalidArgument(
                "colocated is not a concrete backend".to_string(),
            ));
        }
        let mut table = self.write();
        if table.contains_key(&tag) {
            return Err(VcsError::DuplicateBackend(tag));
        }
        table.insert(tag, constructor);
        debug!(%tag, "registered backend");
        Ok(())
    }

    /// Whether a constructor is registered for `tag`.
    pub fn is_registered(&self, tag: BackendTag) -> bool {
        self.read().contains_key(&tag)
    }

    /// Constructor for `tag`, if registered.
    pub fn constructor(&self, tag: BackendTag) -> Option<Constructor> {
        self.read().get(&tag).copied()
    }

    /// Constructor for `tag`, or an error listing what is registered.
    pub fn require(&self, tag: BackendTag) -> Result<Constructor> {
        self.constructor(tag)
            .ok_or_else(|| VcsError::UnknownBackend {
                tag,
                available: self.registered_types(),
            })
    }

    /// Registered tags in stable order.
    pub fn registered_types(&self) -> Vec<BackendTag> {
        let mut tags: Vec<_> = self.read().keys().copied().collect();
        tags.sort();
        tags
    }

    /// Remove every registration. Intended for test isolation.
    pub fn unregister_all(&self) {
        self.write().clear();
    }

    /// Read lock; a poisoned lock still holds a consistent table.
    fn read(&self) -> RwLockReadGuard<'_, HashMap<BackendTag, Constructor>> {
        self.table.read().unwrap_or_else(|e| e.into_inner())
    }

    /// Write lock; see [`Registry::read`].
    fn write(&self) -> RwLockWriteGuard<'_, HashMap<BackendTag, Constructor>> {
        self.table.write().unwrap_or_else(|e| e.into_inner())
    }
}

/// Constructor for the Git backend.
fn open_git(path: &Path) -> Result<Arc<dyn Vcs>> {
    Ok(Arc::new(GitBackend::open(path)?))
}

/// Constructor for the Jujutsu backend.
fn open_jj(path: &Path) -> Result<Arc<dyn Vcs>> {
    Ok(Arc::new(JjBackend::open(path)?))
}

/// Register the built-in backends, skipping any already present.
pub fn register_builtin_backends(registry: &Registry) {
    let builtins: [(BackendTag, Constructor); 2] =
        [(BackendTag::Git, open_git), (BackendTag::Jj, open_jj)];
    for (tag, constructor) in builtins {
        // Another thread may win the race; either registration is equivalent.
        if !registry.is_registered(tag)
            && let Err(e) = registry.register(tag, constructor)
        {
            debug!(%tag, error = %e, "builtin already registered");
        }
    }
}
