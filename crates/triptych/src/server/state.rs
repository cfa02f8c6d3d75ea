//! Shared server state and configuration.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use dashmap::DashMap;
use parking_lot::RwLock;
use serde::Deserialize;

use crate::document::DocumentRegistry;
use crate::host::{CompletionPolicy, PluginHost};
use crate::oracle::{OracleScope, TypeOracle};
use crate::plugins::{DirectivePlugin, MarkupPlugin, StylePlugin, TypescriptPlugin};
use crate::resolve::VirtualFs;
use crate::snapshot::{ScopedSnapshots, SnapshotEventKind, SnapshotRegistry};

/// Marker file for a build-configuration directory; each one gets its own
/// oracle scope.
pub const CONFIG_FILE: &str = "triptych.config.json";

/// Read from `initialization_options`; everything has a default.
#[derive(Debug, Clone, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ServerConfig {
    /// Quiet period after an edit before a diagnostics pass runs.
    pub diagnostics_debounce_ms: u64,
    /// Minimum interval between two completed diagnostics passes.
    pub diagnostics_throttle_ms: u64,
    pub completion: CompletionPolicy,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            diagnostics_debounce_ms: 300,
            diagnostics_throttle_ms: 700,
            completion: CompletionPolicy::default(),
        }
    }
}

/// Everything the request handlers share.
pub struct ServerState {
    pub documents: DocumentRegistry,
    pub snapshots: Arc<SnapshotRegistry>,
    pub resolver: Arc<VirtualFs>,
    pub host: PluginHost,
    pub config: RwLock<ServerConfig>,
    /// Coarse counter the oracle keys its program state on; bumped once per
    /// content-changing snapshot replacement.
    pub project_version: Arc<AtomicU64>,
    /// Client capability negotiated at initialize: rich definition links
    /// versus flat locations.
    pub definition_links: AtomicBool,
    oracle: Arc<dyn TypeOracle>,
    scopes: DashMap<PathBuf, Arc<OracleScope>>,
    workspace_root: RwLock<Option<PathBuf>>,
}

impl ServerState {
    /// Build the state and wire the snapshot events: every content change
    /// bumps the project version, and a path gaining its first snapshot
    /// purges resolution misses it could satisfy.
    pub fn new(oracle: Arc<dyn TypeOracle>) -> Self {
        let snapshots = Arc::new(SnapshotRegistry::new());
        let resolver = Arc::new(VirtualFs::new(snapshots.clone()));
        let project_version = Arc::new(AtomicU64::new(0));
        {
            let resolver = resolver.clone();
            let project_version = project_version.clone();
            snapshots.on_change(move |event| {
                project_version.fetch_add(1, Ordering::SeqCst);
                if event.kind == SnapshotEventKind::Created {
                    resolver.purge_unresolved(&event.path);
                }
            });
        }

        let mut host = PluginHost::new();
        host.register(Arc::new(MarkupPlugin::new()));
        host.register(Arc::new(StylePlugin::new()));
        host.register(Arc::new(DirectivePlugin::new()));
        host.register(Arc::new(TypescriptPlugin::new()));

        Self {
            documents: DocumentRegistry::new(),
            snapshots,
            resolver,
            host,
            config: RwLock::new(ServerConfig::default()),
            project_version,
            definition_links: AtomicBool::new(false),
            oracle,
            scopes: DashMap::new(),
            workspace_root: RwLock::new(None),
        }
    }

    pub fn set_workspace_root(&self, root: PathBuf) {
        *self.workspace_root.write() = Some(root);
    }

    pub fn workspace_root(&self) -> Option<PathBuf> {
        self.workspace_root.read().clone()
    }

    /// The oracle scope responsible for `path`: nearest ancestor directory
    /// holding a config file, else the workspace root, else the file's own
    /// directory. Scopes are created lazily and live for the session.
    pub fn scope_for(&self, path: &Path) -> Arc<OracleScope> {
        let config_dir = self.config_dir_for(path);
        if let Some(scope) = self.scopes.get(&config_dir) {
            return scope.clone();
        }
        let scope = Arc::new(OracleScope::new(
            config_dir.clone(),
            self.oracle.clone(),
            ScopedSnapshots::new(self.snapshots.clone()),
            self.resolver.clone(),
            self.project_version.clone(),
        ));
        self.scopes.insert(config_dir, scope.clone());
        scope
    }

    fn config_dir_for(&self, path: &Path) -> PathBuf {
        let root = self.workspace_root.read().clone();
        let mut dir = path.parent();
        while let Some(current) = dir {
            if current.join(CONFIG_FILE).is_file() {
                return current.to_path_buf();
            }
            if root.as_deref() == Some(current) {
                break;
            }
            dir = current.parent();
        }
        root.or_else(|| path.parent().map(Path::to_path_buf))
            .unwrap_or_else(|| PathBuf::from("/"))
    }

    pub fn scope_count(&self) -> usize {
        self.scopes.len()
    }
}
