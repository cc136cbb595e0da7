//! Process-wide workspace configuration and version state.
//!
//! Both maps are written rarely (initialization, configuration changes,
//! capability probes) and read by every lint pass. Configuration is kept as
//! an immutable [`Snapshot`] behind an `Arc` that writers swap wholesale, so
//! a reader either sees the old set of workspaces or the new one, never a
//! mix. Readers receive deep copies of [`WorkspaceConfig`].

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, PoisonError, RwLock};

use tracing::{debug, warn};

use crate::config::{GlobalSettings, InitializationOptions, WorkspaceConfig};
use crate::error::ConfigError;
use crate::lint::VersionRecord;
use crate::lsp::types::normalize_path;

/// Registered workspaces at one point in time.
#[derive(Debug, Default)]
pub struct Snapshot {
    /// Global settings the workspaces were built from.
    pub global: GlobalSettings,
    /// Workspaces in registration order.
    pub workspaces: Vec<WorkspaceConfig>,
}

impl Snapshot {
    fn find(&self, root: &Path) -> Option<&WorkspaceConfig> {
        self.workspaces.iter().find(|ws| ws.root == root)
    }
}

/// Shared registry of workspace configs and version records.
#[derive(Debug)]
pub struct RegistryState {
    host_interpreter: Vec<String>,
    snapshot: RwLock<Arc<Snapshot>>,
    versions: RwLock<HashMap<PathBuf, VersionRecord>>,
}

impl RegistryState {
    /// Creates an empty registry. `host_interpreter` is the interpreter the
    /// server itself uses and the default for workspaces that set none.
    pub fn new(host_interpreter: Vec<String>) -> Self {
        Self {
            host_interpreter,
            snapshot: RwLock::new(Arc::new(Snapshot::default())),
            versions: RwLock::new(HashMap::new()),
        }
    }

    fn current(&self) -> Arc<Snapshot> {
        Arc::clone(&self.snapshot.read().unwrap_or_else(PoisonError::into_inner))
    }

    /// Replaces every registered workspace.
    ///
    /// With no workspace entries, `fallback_root` is registered with global
    /// defaults. Entries that cannot be used are skipped and reported.
    pub fn replace(&self, options: &InitializationOptions, fallback_root: &Path) -> Vec<ConfigError> {
        let global = options.global_settings.clone();
        let mut errors = Vec::new();
        let mut workspaces: Vec<WorkspaceConfig> = Vec::new();

        if options.settings.is_empty() {
            workspaces.push(WorkspaceConfig::from_defaults(
                normalize_path(fallback_root),
                &global,
                &self.host_interpreter,
            ));
        }

        for entry in &options.settings {
            match WorkspaceConfig::from_settings(entry, &global, &self.host_interpreter) {
                Ok(config) => {
                    // Later entries for the same root win, keeping the first position.
                    if let Some(existing) = workspaces.iter_mut().find(|ws| ws.root == config.root) {
                        *existing = config;
                    } else {
                        workspaces.push(config);
                    }
                }
                Err(e) => {
                    warn!(workspace = %entry.workspace, error = %e, "skipping workspace settings");
                    errors.push(e);
                }
            }
        }

        let next = Arc::new(Snapshot { global, workspaces });
        *self.snapshot.write().unwrap_or_else(PoisonError::into_inner) = next;
        errors
    }

    /// Copies of all registered workspaces, in registration order.
    pub fn workspaces(&self) -> Vec<WorkspaceConfig> {
        self.current().workspaces.clone()
    }

    /// Resolves the configuration that applies to `document`.
    ///
    /// The document's directory and its ancestors are checked against the
    /// registered roots, nearest first. Without a document, the first
    /// registered workspace applies.
    pub fn resolve(&self, document: Option<&Path>) -> WorkspaceConfig {
        let Some(document) = document else {
            return self.resolve_default();
        };
        let document = normalize_path(document);
        self.resolve_directory(document.parent().unwrap_or(&document))
    }

    /// Resolves the configuration for a directory and its ancestors.
    ///
    /// Without a match, the first registered workspace applies; if none is
    /// registered, an unregistered config is synthesized from global defaults
    /// for `directory` itself.
    pub fn resolve_directory(&self, directory: &Path) -> WorkspaceConfig {
        let snapshot = self.current();
        let directory = normalize_path(directory);

        for ancestor in directory.ancestors() {
            if let Some(config) = snapshot.find(ancestor) {
                return config.clone();
            }
        }

        if let Some(first) = snapshot.workspaces.first() {
            debug!(
                directory = %directory.display(),
                workspace = %first.root.display(),
                "no enclosing workspace, using first registered"
            );
            return first.clone();
        }

        WorkspaceConfig::from_defaults(directory, &snapshot.global, &self.host_interpreter)
    }

    /// The first registered workspace, or defaults for the current directory.
    pub fn resolve_default(&self) -> WorkspaceConfig {
        let snapshot = self.current();
        snapshot.workspaces.first().cloned().unwrap_or_else(|| {
            let cwd = std::env::current_dir().unwrap_or_default();
            WorkspaceConfig::from_defaults(normalize_path(&cwd), &snapshot.global, &self.host_interpreter)
        })
    }

    /// Stores (overwrites) the version record for a workspace.
    pub fn record_version(&self, root: &Path, record: VersionRecord) {
        self.versions
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(root.to_path_buf(), record);
    }

    /// Forgets the version record for a workspace.
    pub fn clear_version(&self, root: &Path) {
        self.versions
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(root);
    }

    /// The version record for a workspace, if a probe succeeded.
    pub fn version_for(&self, root: &Path) -> Option<VersionRecord> {
        self.versions
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(root)
            .copied()
    }
}
