//! Modules exported by the daemon and the registry that resolves them.
//!
//! A module is a named directory tree with a writability flag and, for
//! restricted modules, a challenge-response gate. The registry hands the
//! handshake an owned snapshot per lookup so a module handle stays valid for
//! the whole session even if the registry is later reconfigured.

use std::collections::HashMap;
use std::path::{Component, Path, PathBuf};

use crate::auth;

/// Errors surfaced by module lookup, definition, and path resolution.
#[derive(Clone, Debug, Eq, PartialEq, thiserror::Error)]
pub enum ModuleError {
    /// No module is exported under the requested name.
    #[error("unknown module {name:?}")]
    NotFound {
        /// The name the peer requested.
        name: String,
    },
    /// The module exists but cannot currently be served.
    #[error("module {name:?} is unavailable: {reason}")]
    Unavailable {
        /// The module name.
        name: String,
        /// Why the module cannot be served.
        reason: String,
    },
    /// Module names must be nonempty; an empty request means listing mode.
    #[error("module name must not be empty")]
    EmptyName,
    /// A module root must be an absolute path to act as a jail.
    #[error("module root {root:?} is not absolute")]
    RelativeRoot {
        /// The offending root path.
        root: PathBuf,
    },
    /// A peer-supplied path would resolve outside the module root.
    #[error("path {name:?} is outside module {module:?}")]
    OutsideModule {
        /// The module whose root was escaped.
        module: String,
        /// The peer-supplied name.
        name: String,
    },
}

/// A named, rooted directory tree exported by the daemon.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Module {
    name: String,
    comment: String,
    restricted_path: PathBuf,
    writable: bool,
}

impl Module {
    /// Defines a module rooted at `restricted_path`.
    ///
    /// The name must be nonempty and the root absolute; the root acts as the
    /// jail for every path the peer later supplies.
    pub fn new(
        name: impl Into<String>,
        comment: impl Into<String>,
        restricted_path: impl Into<PathBuf>,
        writable: bool,
    ) -> Result<Self, ModuleError> {
        let name = name.into();
        if name.is_empty() {
            return Err(ModuleError::EmptyName);
        }
        let restricted_path = restricted_path.into();
        if !restricted_path.is_absolute() {
            return Err(ModuleError::RelativeRoot {
                root: restricted_path,
            });
        }
        Ok(Self {
            name,
            comment: comment.into(),
            restricted_path,
            writable,
        })
    }

    /// Returns the module name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns the module comment shown in listings (may be empty).
    #[must_use]
    pub fn comment(&self) -> &str {
        &self.comment
    }

    /// Returns the absolute root the module is jailed to.
    #[must_use]
    pub fn restricted_path(&self) -> &Path {
        &self.restricted_path
    }

    /// Reports whether peers may write into this module.
    #[must_use]
    pub const fn is_writable(&self) -> bool {
        self.writable
    }

    /// Resolves a peer-supplied relative name against the module root.
    ///
    /// The name is normalized lexically: `.` components are dropped and `..`
    /// pops a previously pushed component. Absolute names and any `..` that
    /// would climb past the root fail with [`ModuleError::OutsideModule`].
    /// When the target already exists its canonical form must also stay under
    /// the canonical root, so a symlink planted inside the module cannot lead
    /// outside it.
    pub fn resolve(&self, name: &str) -> Result<PathBuf, ModuleError> {
        let outside = || ModuleError::OutsideModule {
            module: self.name.clone(),
            name: name.to_owned(),
        };

        let supplied = Path::new(name);
        if supplied.is_absolute() {
            return Err(outside());
        }

        let mut resolved = self.restricted_path.clone();
        let mut depth = 0usize;
        for component in supplied.components() {
            match component {
                Component::CurDir => {}
                Component::Normal(part) => {
                    resolved.push(part);
                    depth += 1;
                }
                Component::ParentDir => {
                    if depth == 0 {
                        return Err(outside());
                    }
                    resolved.pop();
                    depth -= 1;
                }
                Component::RootDir | Component::Prefix(_) => return Err(outside()),
            }
        }

        // Lexical containment holds by construction; an existing target must
        // additionally not lead outside the root via symlinks.
        if let (Ok(canonical), Ok(canonical_root)) =
            (resolved.canonicalize(), self.restricted_path.canonicalize())
        {
            if !canonical.starts_with(&canonical_root) {
                return Err(outside());
            }
        }

        Ok(resolved)
    }
}

/// A module whose access requires challenge-response authentication.
///
/// The secret store never leaves this type: callers obtain only the expected
/// response for a given user and challenge, and convert to the open
/// [`Module`] handle after a successful verification.
#[derive(Clone, Debug)]
pub struct RestrictedModule {
    module: Module,
    secrets: HashMap<String, String>,
}

impl RestrictedModule {
    /// Wraps a module with a user-to-secret table.
    #[must_use]
    pub fn new(module: Module, secrets: impl IntoIterator<Item = (String, String)>) -> Self {
        Self {
            module,
            secrets: secrets.into_iter().collect(),
        }
    }

    /// Returns the module name.
    #[must_use]
    pub fn name(&self) -> &str {
        self.module.name()
    }

    /// Computes the response expected from `user` for `challenge`.
    ///
    /// Returns `None` for unknown users. The secret itself is never exposed;
    /// only the derived digest leaves this type.
    #[must_use]
    pub fn authenticate(&self, user: &str, challenge: &str) -> Option<String> {
        self.secrets
            .get(user)
            .map(|secret| auth::compute_response(secret, challenge))
    }

    /// Converts into the open module handle after a successful unlock.
    #[must_use]
    pub fn into_module(self) -> Module {
        self.module
    }
}

/// One entry of the module registry: directly usable, or gated by auth.
#[derive(Clone, Debug)]
pub enum ModuleEntry {
    /// A module any connected peer may select.
    Open(Module),
    /// A module that must be unlocked via challenge-response first.
    Restricted(RestrictedModule),
}

impl ModuleEntry {
    /// Returns the entry's module name.
    #[must_use]
    pub fn name(&self) -> &str {
        match self {
            Self::Open(module) => module.name(),
            Self::Restricted(restricted) => restricted.name(),
        }
    }

    /// Returns the listing-facing view of the entry.
    #[must_use]
    pub fn as_module(&self) -> &Module {
        match self {
            Self::Open(module) => module,
            Self::Restricted(restricted) => &restricted.module,
        }
    }
}

/// Source of module definitions consumed by the handshake.
///
/// Implementations may be shared across connections; the handle returned by
/// [`get`](Self::get) is an owned snapshot that outlives the lookup.
pub trait ModuleProvider {
    /// Looks up a module by name.
    fn get(&self, name: &str) -> Result<ModuleEntry, ModuleError>;

    /// Returns all modules for listing mode, in listing order.
    fn list(&self) -> Vec<Module>;
}

/// In-memory [`ModuleProvider`] with insertion-ordered listing.
#[derive(Clone, Debug, Default)]
pub struct ModuleRegistry {
    entries: Vec<ModuleEntry>,
}

impl ModuleRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds an entry to the registry, replacing any entry of the same name.
    pub fn add(&mut self, entry: ModuleEntry) {
        self.entries.retain(|existing| existing.name() != entry.name());
        self.entries.push(entry);
    }
}

impl ModuleProvider for ModuleRegistry {
    fn get(&self, name: &str) -> Result<ModuleEntry, ModuleError> {
        self.entries
            .iter()
            .find(|entry| entry.name() == name)
            .cloned()
            .ok_or_else(|| ModuleError::NotFound {
                name: name.to_owned(),
            })
    }

    fn list(&self) -> Vec<Module> {
        self.entries
            .iter()
            .map(|entry| entry.as_module().clone())
            .collect()
    }
}
