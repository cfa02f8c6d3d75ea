//! Versioned virtual representations of real files.
//!
//! Two layers: [`SnapshotRegistry`] holds one entry per real file path for
//! the whole process, and [`ScopedSnapshots`] gives each oracle scope a
//! local cache that refreshes whenever the global version moves. Readers
//! keep whatever `Arc` they already hold; replacing an entry never
//! invalidates a snapshot mid-request, it only makes it stale.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use dashmap::DashMap;
use parking_lot::RwLock;
use tower_lsp::lsp_types::Url;

use triptych_atlas::{DocumentMapper, IdentityMapper, TextSpan, TraceMapper};
use triptych_calque::{transpile, ScanIrregularity, ScriptKind, Transpilation, TranspileOptions};

use crate::document::Document;

/// Resolve a document URI to the real filesystem path snapshots are keyed by.
pub fn uri_to_path(uri: &Url) -> PathBuf {
    uri.to_file_path()
        .unwrap_or_else(|_| PathBuf::from(uri.path()))
}

/// The virtual representation of one real file at one version.
pub struct DocumentSnapshot {
    pub version: i32,
    pub file_path: PathBuf,
    pub script_kind: ScriptKind,
    /// What the oracle reads: the TSX projection for `.tri` files, the raw
    /// content for plain script files.
    pub text: Arc<str>,
    pub mapper: Arc<dyn DocumentMapper>,
    pub virtualized: bool,
    /// Scanner irregularities from the projection, surfaced downstream as
    /// document-level diagnostics.
    pub irregularities: Vec<ScanIrregularity>,
}

impl DocumentSnapshot {
    /// Build from an open document. Triptych documents are projected to
    /// TSX; anything else passes through under an identity mapping.
    pub fn from_document(document: &Document) -> Self {
        let path = uri_to_path(&document.uri);
        let text = document.text();
        if document.language_id == "triptych" {
            Self::project(path, text, document.version)
        } else {
            Self::passthrough(path, text, document.version)
        }
    }

    /// Build from on-disk content, versioned from zero.
    pub fn from_disk(path: &Path) -> std::io::Result<Self> {
        let content: Arc<str> = Arc::from(std::fs::read_to_string(path)?);
        let snapshot = if path.extension().and_then(|e| e.to_str()) == Some("tri") {
            Self::project(path.to_path_buf(), content, 0)
        } else {
            Self::passthrough(path.to_path_buf(), content, 0)
        };
        Ok(snapshot)
    }

    fn project(file_path: PathBuf, source: Arc<str>, version: i32) -> Self {
        let Transpilation {
            code,
            trace,
            script_kind,
            irregularities,
        } = transpile(&source, &TranspileOptions::default());
        let text: Arc<str> = Arc::from(code);
        let mapper = TraceMapper::new(trace, source, text.clone());
        Self {
            version,
            file_path,
            script_kind,
            text,
            mapper: Arc::new(mapper),
            virtualized: true,
            irregularities,
        }
    }

    fn passthrough(file_path: PathBuf, text: Arc<str>, version: i32) -> Self {
        let script_kind = match file_path.extension().and_then(|e| e.to_str()) {
            Some("js") | Some("jsx") => ScriptKind::Js,
            _ => ScriptKind::Ts,
        };
        Self {
            version,
            file_path,
            script_kind,
            text,
            mapper: Arc::new(IdentityMapper),
            virtualized: false,
            irregularities: Vec::new(),
        }
    }
}

impl std::fmt::Debug for DocumentSnapshot {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DocumentSnapshot")
            .field("version", &self.version)
            .field("file_path", &self.file_path)
            .field("script_kind", &self.script_kind)
            .field("virtualized", &self.virtualized)
            .field("text_len", &self.text.len())
            .finish()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SnapshotEventKind {
    Created,
    Updated,
    Removed,
}

#[derive(Debug, Clone)]
pub struct SnapshotEvent {
    pub path: PathBuf,
    pub kind: SnapshotEventKind,
}

/// One incremental splice against a plain (non-virtualized) snapshot.
#[derive(Debug, Clone)]
pub struct SnapshotEdit {
    pub span: TextSpan,
    pub text: String,
}

type Listener = Box<dyn Fn(&SnapshotEvent) + Send + Sync>;

/// Process-wide snapshot store, one entry per canonical real file path.
pub struct SnapshotRegistry {
    snapshots: DashMap<PathBuf, Arc<DocumentSnapshot>>,
    listeners: RwLock<Vec<Listener>>,
}

impl Default for SnapshotRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl SnapshotRegistry {
    pub fn new() -> Self {
        Self {
            snapshots: DashMap::new(),
            listeners: RwLock::new(Vec::new()),
        }
    }

    /// Register a change listener. Listeners run synchronously after the map
    /// assignment, in registration order.
    pub fn on_change(&self, listener: impl Fn(&SnapshotEvent) + Send + Sync + 'static) {
        self.listeners.write().push(Box::new(listener));
    }

    fn emit(&self, path: PathBuf, kind: SnapshotEventKind) {
        let event = SnapshotEvent { path, kind };
        for listener in self.listeners.read().iter() {
            listener(&event);
        }
    }

    /// Store a snapshot. A `set` whose version equals the stored version is
    /// a no-op: no replacement, no event.
    pub fn set(&self, snapshot: DocumentSnapshot) {
        let path = snapshot.file_path.clone();
        let existing = self.snapshots.get(&path).map(|entry| entry.version);
        if existing == Some(snapshot.version) {
            return;
        }
        self.snapshots.insert(path.clone(), Arc::new(snapshot));
        let kind = match existing {
            None => SnapshotEventKind::Created,
            Some(_) => SnapshotEventKind::Updated,
        };
        self.emit(path, kind);
    }

    pub fn get(&self, path: &Path) -> Option<Arc<DocumentSnapshot>> {
        self.snapshots.get(path).map(|entry| entry.clone())
    }

    pub fn delete(&self, path: &Path) {
        if self.snapshots.remove(path).is_some() {
            self.emit(path.to_path_buf(), SnapshotEventKind::Removed);
        }
    }

    /// Rebuild the snapshot for an open document.
    pub fn update_from_document(&self, document: &Document) {
        self.set(DocumentSnapshot::from_document(document));
    }

    /// Apply incremental splices to a plain file's snapshot. Returns `false`
    /// when there is no snapshot or the file is virtualized; `.tri` files
    /// always rebuild wholesale because partial edits cannot be re-projected
    /// safely.
    pub fn update_from_changes(&self, path: &Path, edits: &[SnapshotEdit], version: i32) -> bool {
        let Some(current) = self.get(path) else {
            return false;
        };
        if current.virtualized {
            return false;
        }
        let mut text = current.text.to_string();
        for edit in edits {
            let (start, end) = (edit.span.start as usize, edit.span.end as usize);
            if start > end || end > text.len() {
                return false;
            }
            text.replace_range(start..end, &edit.text);
        }
        self.set(DocumentSnapshot::passthrough(
            path.to_path_buf(),
            Arc::from(text),
            version,
        ));
        true
    }

    pub fn paths(&self) -> Vec<PathBuf> {
        self.snapshots.iter().map(|r| r.key().clone()).collect()
    }

    pub fn len(&self) -> usize {
        self.snapshots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.snapshots.is_empty()
    }
}

/// Per-oracle-scope view over the global registry.
pub struct ScopedSnapshots {
    global: Arc<SnapshotRegistry>,
    local: DashMap<PathBuf, Arc<DocumentSnapshot>>,
}

impl ScopedSnapshots {
    pub fn new(global: Arc<SnapshotRegistry>) -> Self {
        Self {
            global,
            local: DashMap::new(),
        }
    }

    /// Fetch through the local cache. A cached entry is reused only while
    /// its version matches the global entry.
    pub fn get(&self, path: &Path) -> Option<Arc<DocumentSnapshot>> {
        let Some(global) = self.global.get(path) else {
            self.local.remove(path);
            return None;
        };
        let cached = self.local.get(path).map(|entry| entry.clone());
        if let Some(local) = cached {
            if local.version == global.version {
                return Some(local);
            }
        }
        self.local.insert(path.to_path_buf(), global.clone());
        Some(global)
    }

    /// Drop the local entry; the global layer is untouched.
    pub fn delete(&self, path: &Path) {
        self.local.remove(path);
    }

    pub fn cached_len(&self) -> usize {
        self.local.len()
    }
}
