//! Module resolution over a filesystem the oracle can trust.
//!
//! The oracle never sees a `.tri` file: every lookup that lands on one is
//! answered through the Snapshot Manager under the synthetic `<real>.tsx`
//! (or `.jsx`) name. Resolution outcomes, including misses, are cached per
//! `(containing file, specifier)` and misses are purged when a file that
//! could satisfy them appears.

use std::path::{Component, Path, PathBuf};
use std::sync::Arc;

use dashmap::DashMap;
use walkdir::WalkDir;

use triptych_calque::ScriptKind;

use crate::snapshot::{DocumentSnapshot, SnapshotRegistry};

const PROBE_EXTENSIONS: [&str; 5] = ["ts", "tsx", "d.ts", "js", "jsx"];

/// Synthetic path of the projection for a real file.
pub fn virtual_path(real: &Path, kind: ScriptKind) -> PathBuf {
    append_extension(real, kind.virtual_extension())
}

/// Recover the real path behind a synthetic one. Paths that are not a
/// `.tri` projection come back `None`.
pub fn strip_virtual_suffix(path: &Path) -> Option<PathBuf> {
    let ext = path.extension()?.to_str()?;
    if ext != "tsx" && ext != "jsx" {
        return None;
    }
    let stem = path.file_stem()?.to_str()?;
    if !stem.ends_with(".tri") {
        return None;
    }
    Some(path.with_file_name(stem))
}

pub fn is_virtual_path(path: &Path) -> bool {
    strip_virtual_suffix(path).is_some()
}

fn append_extension(path: &Path, ext: &str) -> PathBuf {
    let mut os = path.as_os_str().to_os_string();
    os.push(".");
    os.push(ext);
    PathBuf::from(os)
}

/// Lexical normalization; keeps snapshot keys stable across `./` joins.
fn normalize(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                if !out.pop() {
                    out.push("..");
                }
            }
            other => out.push(other.as_os_str()),
        }
    }
    out
}

fn is_path_specifier(specifier: &str) -> bool {
    specifier.starts_with("./")
        || specifier.starts_with("../")
        || Path::new(specifier).is_absolute()
}

fn specifier_stem(specifier: &str) -> Option<&str> {
    Path::new(specifier).file_stem().and_then(|s| s.to_str())
}

/// Outcome of resolving one specifier from one containing file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Resolution {
    Resolved(ResolvedModule),
    /// Cached miss; revisited when a matching file appears.
    Unresolved,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedModule {
    /// Path the oracle should open; synthetic for `.tri` sources.
    pub path: PathBuf,
    /// Extension driving the oracle's grammar choice.
    pub extension: String,
    pub virtualized: bool,
}

/// Filesystem-shaped interface the oracle consumes.
pub trait OracleFs: Send + Sync {
    fn file_exists(&self, path: &Path) -> bool;
    fn read_file(&self, path: &Path) -> Option<String>;
    fn read_directory(&self, dir: &Path) -> Vec<PathBuf>;
    fn resolve_module_names(&self, specifiers: &[String], containing: &Path) -> Vec<Resolution>;
}

/// The production [`OracleFs`]: snapshots first, real disk second.
pub struct VirtualFs {
    snapshots: Arc<SnapshotRegistry>,
    cache: DashMap<(PathBuf, String), Resolution>,
}

impl VirtualFs {
    pub fn new(snapshots: Arc<SnapshotRegistry>) -> Self {
        Self {
            snapshots,
            cache: DashMap::new(),
        }
    }

    /// Drop cached misses that the appearance of `new_path` could turn into
    /// hits: exactly those whose specifier basename (sans extension) equals
    /// the new file's stem.
    pub fn purge_unresolved(&self, new_path: &Path) {
        let real = strip_virtual_suffix(new_path).unwrap_or_else(|| new_path.to_path_buf());
        let Some(stem) = real.file_stem().and_then(|s| s.to_str()).map(str::to_string) else {
            return;
        };
        self.cache.retain(|(_, specifier), resolution| {
            if !matches!(resolution, Resolution::Unresolved) {
                return true;
            }
            specifier_stem(specifier) != Some(stem.as_str())
        });
    }

    pub fn cached_len(&self) -> usize {
        self.cache.len()
    }

    /// Snapshot for a real path, materialized from disk on first use.
    fn snapshot_of(&self, real: &Path) -> Option<Arc<DocumentSnapshot>> {
        if let Some(snapshot) = self.snapshots.get(real) {
            return Some(snapshot);
        }
        let snapshot = DocumentSnapshot::from_disk(real).ok()?;
        self.snapshots.set(snapshot);
        self.snapshots.get(real)
    }

    fn plain_exists(&self, path: &Path) -> bool {
        self.snapshots.get(path).is_some() || path.is_file()
    }

    /// Script kind of a `.tri` file, or `None` if it exists nowhere.
    fn tri_kind(&self, path: &Path) -> Option<ScriptKind> {
        if path.extension().and_then(|e| e.to_str()) != Some("tri") {
            return None;
        }
        if self.snapshots.get(path).is_none() && !path.is_file() {
            return None;
        }
        self.snapshot_of(path).map(|s| s.script_kind)
    }

    fn resolve_one(&self, specifier: &str, containing: &Path) -> Resolution {
        let key = (containing.to_path_buf(), specifier.to_string());
        if let Some(hit) = self.cache.get(&key) {
            return hit.clone();
        }
        let resolution = self.resolve_uncached(specifier, containing);
        self.cache.insert(key, resolution.clone());
        resolution
    }

    fn resolve_uncached(&self, specifier: &str, containing: &Path) -> Resolution {
        // Bare specifiers (node_modules and friends) are the oracle's own
        // business; this shim only answers for paths it can virtualize
        if !is_path_specifier(specifier) {
            return Resolution::Unresolved;
        }
        let base = strip_virtual_suffix(containing).unwrap_or_else(|| containing.to_path_buf());
        let dir = base
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_else(|| PathBuf::from("."));
        let candidate = normalize(&dir.join(specifier));

        // A specifier that already names a file with its extension
        if let Some(ext) = candidate.extension().and_then(|e| e.to_str()) {
            match ext {
                "ts" | "tsx" | "js" | "jsx" if self.plain_exists(&candidate) => {
                    return resolved_plain(candidate);
                }
                "tri" => {
                    if let Some(kind) = self.tri_kind(&candidate) {
                        return resolved_virtual(&candidate, kind);
                    }
                }
                _ => {}
            }
        }

        for ext in PROBE_EXTENSIONS {
            let probe = append_extension(&candidate, ext);
            if self.plain_exists(&probe) {
                return resolved_plain(probe);
            }
        }
        let tri = append_extension(&candidate, "tri");
        if let Some(kind) = self.tri_kind(&tri) {
            return resolved_virtual(&tri, kind);
        }

        for ext in PROBE_EXTENSIONS {
            let probe = candidate.join(format!("index.{ext}"));
            if self.plain_exists(&probe) {
                return resolved_plain(probe);
            }
        }
        let tri_index = candidate.join("index.tri");
        if let Some(kind) = self.tri_kind(&tri_index) {
            return resolved_virtual(&tri_index, kind);
        }

        Resolution::Unresolved
    }
}

fn resolved_plain(path: PathBuf) -> Resolution {
    let extension = path
        .extension()
        .and_then(|e| e.to_str())
        .unwrap_or("")
        .to_string();
    Resolution::Resolved(ResolvedModule {
        path,
        extension,
        virtualized: false,
    })
}

fn resolved_virtual(real: &Path, kind: ScriptKind) -> Resolution {
    Resolution::Resolved(ResolvedModule {
        path: virtual_path(real, kind),
        extension: kind.virtual_extension().to_string(),
        virtualized: true,
    })
}

impl OracleFs for VirtualFs {
    fn file_exists(&self, path: &Path) -> bool {
        match strip_virtual_suffix(path) {
            Some(real) => self.snapshots.get(&real).is_some() || real.is_file(),
            None => self.plain_exists(path),
        }
    }

    fn read_file(&self, path: &Path) -> Option<String> {
        match strip_virtual_suffix(path) {
            Some(real) => self.snapshot_of(&real).map(|s| s.text.to_string()),
            None => {
                if let Some(snapshot) = self.snapshots.get(path) {
                    if !snapshot.virtualized {
                        return Some(snapshot.text.to_string());
                    }
                }
                std::fs::read_to_string(path).ok()
            }
        }
    }

    /// Shallow listing with `.tri` entries reported under synthetic names,
    /// so the oracle only ever sees files it can parse.
    fn read_directory(&self, dir: &Path) -> Vec<PathBuf> {
        let mut entries = Vec::new();
        for entry in WalkDir::new(dir)
            .min_depth(1)
            .max_depth(1)
            .into_iter()
            .flatten()
        {
            let path = entry.into_path();
            if path.extension().and_then(|e| e.to_str()) == Some("tri") {
                let kind = self
                    .snapshots
                    .get(&path)
                    .map(|s| s.script_kind)
                    .unwrap_or_default();
                entries.push(virtual_path(&path, kind));
            } else {
                entries.push(path);
            }
        }
        entries.sort();
        entries
    }

    fn resolve_module_names(&self, specifiers: &[String], containing: &Path) -> Vec<Resolution> {
        specifiers
            .iter()
            .map(|specifier| self.resolve_one(specifier, containing))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn plain(path: &str, text: &str, version: i32) -> DocumentSnapshot {
        let doc = crate::document::Document::new(
            tower_lsp::lsp_types::Url::from_file_path(path).unwrap(),
            text.to_string(),
            version,
            "typescript".to_string(),
        );
        DocumentSnapshot::from_document(&doc)
    }

    fn tri(path: &str, text: &str, version: i32) -> DocumentSnapshot {
        let doc = crate::document::Document::new(
            tower_lsp::lsp_types::Url::from_file_path(path).unwrap(),
            text.to_string(),
            version,
            "triptych".to_string(),
        );
        DocumentSnapshot::from_document(&doc)
    }

    #[test]
    fn test_virtual_path_round_trip() {
        for (path, kind) in [
            ("/app/widget.tri", ScriptKind::Ts),
            ("/app/widget.tri", ScriptKind::Js),
            ("/deep/ly/nested/x.y.tri", ScriptKind::Ts),
        ] {
            let real = PathBuf::from(path);
            assert_eq!(strip_virtual_suffix(&virtual_path(&real, kind)), Some(real));
        }
    }

    #[test]
    fn test_strip_rejects_ordinary_paths() {
        assert_eq!(strip_virtual_suffix(Path::new("/a/b.tsx")), None);
        assert_eq!(strip_virtual_suffix(Path::new("/a/b.ts")), None);
        assert_eq!(strip_virtual_suffix(Path::new("/a/b.tri")), None);
        assert_eq!(
            strip_virtual_suffix(Path::new("/a/b.tri.tsx")),
            Some(PathBuf::from("/a/b.tri"))
        );
    }

    #[test]
    fn test_virtual_file_answers_from_snapshots() {
        let snapshots = Arc::new(SnapshotRegistry::new());
        let fs = VirtualFs::new(snapshots.clone());
        snapshots.set(tri("/app/widget.tri", "<script>let a = 1;</script>\n", 1));

        let synthetic = Path::new("/app/widget.tri.tsx");
        assert!(fs.file_exists(synthetic));
        let text = fs.read_file(synthetic).unwrap();
        assert!(text.contains("let a = 1;"));
        assert!(text.contains("declare function css"));
    }

    #[test]
    fn test_read_file_prefers_open_snapshot() {
        let snapshots = Arc::new(SnapshotRegistry::new());
        let fs = VirtualFs::new(snapshots.clone());
        snapshots.set(plain("/app/util.ts", "unsaved buffer", 4));

        assert_eq!(
            fs.read_file(Path::new("/app/util.ts")),
            Some("unsaved buffer".to_string())
        );
    }

    #[test]
    fn test_resolve_through_snapshots() {
        let snapshots = Arc::new(SnapshotRegistry::new());
        let fs = VirtualFs::new(snapshots.clone());
        snapshots.set(tri("/app/widget.tri", "<p>x</p>\n", 1));
        snapshots.set(plain("/app/util.ts", "export {};", 1));

        let results = fs.resolve_module_names(
            &["./widget".to_string(), "./util".to_string()],
            Path::new("/app/main.tri.tsx"),
        );

        assert_eq!(
            results[0],
            Resolution::Resolved(ResolvedModule {
                path: PathBuf::from("/app/widget.tri.tsx"),
                extension: "tsx".to_string(),
                virtualized: true,
            })
        );
        assert_eq!(
            results[1],
            Resolution::Resolved(ResolvedModule {
                path: PathBuf::from("/app/util.ts"),
                extension: "ts".to_string(),
                virtualized: false,
            })
        );
    }

    #[test]
    fn test_bare_specifier_is_unresolved() {
        let fs = VirtualFs::new(Arc::new(SnapshotRegistry::new()));
        let results =
            fs.resolve_module_names(&["tokio".to_string()], Path::new("/app/main.ts"));
        assert_eq!(results, vec![Resolution::Unresolved]);
    }

    #[test]
    fn test_misses_are_cached_and_purged() {
        let snapshots = Arc::new(SnapshotRegistry::new());
        let fs = VirtualFs::new(snapshots.clone());

        let miss = fs.resolve_module_names(
            &["./widget".to_string()],
            Path::new("/app/main.tri.tsx"),
        );
        assert_eq!(miss, vec![Resolution::Unresolved]);
        assert_eq!(fs.cached_len(), 1);

        // The file appears; purging by its stem lets resolution retry
        snapshots.set(tri("/app/widget.tri", "<p>x</p>\n", 1));
        fs.purge_unresolved(Path::new("/app/widget.tri"));

        let hit = fs.resolve_module_names(
            &["./widget".to_string()],
            Path::new("/app/main.tri.tsx"),
        );
        assert!(matches!(&hit[0], Resolution::Resolved(m) if m.virtualized));
    }

    #[test]
    fn test_purge_leaves_unrelated_misses() {
        let fs = VirtualFs::new(Arc::new(SnapshotRegistry::new()));
        fs.resolve_module_names(&["./widget".to_string()], Path::new("/app/a.ts"));
        fs.resolve_module_names(&["./other".to_string()], Path::new("/app/a.ts"));
        assert_eq!(fs.cached_len(), 2);

        fs.purge_unresolved(Path::new("/app/widget.tri"));
        assert_eq!(fs.cached_len(), 1);
    }

    #[test]
    fn test_resolution_probes_disk() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("helper.ts"), "export const h = 1;").unwrap();
        std::fs::write(dir.path().join("part.tri"), "<p>hi</p>\n").unwrap();

        let fs = VirtualFs::new(Arc::new(SnapshotRegistry::new()));
        let containing = dir.path().join("main.tri.tsx");
        let results = fs.resolve_module_names(
            &["./helper".to_string(), "./part".to_string()],
            &containing,
        );

        assert!(matches!(&results[0], Resolution::Resolved(m) if !m.virtualized));
        match &results[1] {
            Resolution::Resolved(m) => {
                assert!(m.virtualized);
                assert_eq!(m.extension, "tsx");
                assert_eq!(m.path, dir.path().join("part.tri.tsx"));
            }
            other => panic!("expected virtual resolution, got {other:?}"),
        }
    }

    #[test]
    fn test_read_directory_reports_synthetic_names() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("a.tri"), "<p>a</p>\n").unwrap();
        std::fs::write(dir.path().join("b.ts"), "export {};").unwrap();

        let fs = VirtualFs::new(Arc::new(SnapshotRegistry::new()));
        let entries = fs.read_directory(dir.path());

        assert_eq!(
            entries,
            vec![dir.path().join("a.tri.tsx"), dir.path().join("b.ts")]
        );
    }

    #[test]
    fn test_read_virtual_file_materializes_from_disk() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("part.tri"), "<script>let q = 2;</script>\n").unwrap();

        let snapshots = Arc::new(SnapshotRegistry::new());
        let fs = VirtualFs::new(snapshots.clone());
        let text = fs.read_file(&dir.path().join("part.tri.tsx")).unwrap();

        assert!(text.contains("let q = 2;"));
        // Materialized into the registry for subsequent reads
        assert!(snapshots.get(&dir.path().join("part.tri")).is_some());
    }
}
