use std::fmt;
use std::path::{Path, PathBuf};

use tempfile::TempDir;

/// Reserved group alias used when a list block does not name a group.
///
/// The policy walk yields this group last; every other alias keeps its
/// insertion order.
pub const DEFAULT_ALIAS: &str = "DEFAULT";

/// Tri-state for `agent.proxy-relay`.
///
/// `Auto` is resolved lazily at query time to "the https-relay domain list
/// is non-empty" — both are set during parsing and their relative order in
/// the file is not guaranteed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ProxyRelay {
    On,
    Off,
    #[default]
    Auto,
}

impl ProxyRelay {
    /// Resolve the tri-state against the https-relay domain list.
    pub fn resolve(self, has_https_relay_domains: bool) -> bool {
        match self {
            ProxyRelay::On => true,
            ProxyRelay::Off => false,
            ProxyRelay::Auto => has_https_relay_domains,
        }
    }
}

/// `agent.auto-sign` settings: a CA cert-key pair used by the certificate
/// auto-signer, plus the working directory where signed pairs are kept.
#[derive(Debug)]
pub struct AutoSign {
    pub cert: PathBuf,
    pub key: PathBuf,
    pub work_dir: WorkDir,
}

/// Auto-sign working directory: either supplied in the config, or an
/// ephemeral directory scoped to the process lifetime.
pub enum WorkDir {
    Provided(PathBuf),
    Ephemeral(TempDir),
}

impl WorkDir {
    pub fn path(&self) -> &Path {
        match self {
            WorkDir::Provided(p) => p,
            WorkDir::Ephemeral(t) => t.path(),
        }
    }
}

impl fmt::Debug for WorkDir {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WorkDir::Provided(p) => f.debug_tuple("Provided").field(p).finish(),
            WorkDir::Ephemeral(t) => f.debug_tuple("Ephemeral").field(&t.path()).finish(),
        }
    }
}
