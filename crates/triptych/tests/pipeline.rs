//! End-to-end flows across the document store, snapshot layer, module
//! resolver and plugin host, driven through shared server state with a
//! stubbed oracle.

use std::path::PathBuf;
use std::sync::atomic::Ordering;
use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tower_lsp::lsp_types::Url;

use triptych::host::{CompletionPolicy, PluginContext};
use triptych::oracle::{
    OracleCompletion, OracleCompletionKind, OracleDiagnostic, OracleSeverity, StubOracle,
};
use triptych::resolve::{OracleFs, Resolution};
use triptych::server::ServerState;
use triptych_atlas::TextSpan;
use triptych_calque::scan;

const SOURCE: &str = "<script>let count = 1;\ncount;</script>\n<p>{count}</p>\n";

struct Fixture {
    state: ServerState,
    oracle: Arc<StubOracle>,
    uri: Url,
    path: PathBuf,
}

fn open(path: &str, text: &str) -> Fixture {
    let oracle = Arc::new(StubOracle::new());
    let state = ServerState::new(oracle.clone());
    let path = PathBuf::from(path);
    let uri = Url::from_file_path(&path).unwrap();
    state
        .documents
        .open(uri.clone(), text.to_string(), 1, "triptych".to_string());
    let doc = state.documents.get(&uri).unwrap();
    state.snapshots.update_from_document(&doc);
    drop(doc);
    Fixture {
        state,
        oracle,
        uri,
        path,
    }
}

#[tokio::test]
async fn test_open_produces_virtualized_snapshot() {
    let fx = open("/app/widget.tri", SOURCE);

    let snapshot = fx.state.snapshots.get(&fx.path).unwrap();
    assert!(snapshot.virtualized);
    assert_eq!(snapshot.version, 1);
    assert_eq!(fx.state.project_version.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_completions_demote_oracle_below_template_items() {
    let fx = open("/app/widget.tri", SOURCE);
    fx.oracle.stage_completions(vec![OracleCompletion::new(
        "count",
        OracleCompletionKind::Variable,
    )]);

    // Cursor on "count" inside the script block
    let snapshot = fx.state.snapshots.get(&fx.path).unwrap();
    let inventory = scan(SOURCE);
    let token = CancellationToken::new();
    let scope = fx.state.scope_for(&fx.path);
    let ctx = PluginContext {
        uri: &fx.uri,
        path: &fx.path,
        text: SOURCE,
        offset: 14,
        inventory: &inventory,
        snapshot: Some(&snapshot),
        scope: &scope,
        token: &token,
    };

    let items = fx
        .state
        .host
        .completions(&ctx, &CompletionPolicy::default())
        .await;
    let staged = items.iter().find(|i| i.label == "count").unwrap();
    assert_eq!(staged.sort_text.as_deref(), Some("zz-count"));
}

#[tokio::test]
async fn test_completions_in_attribute_area_drop_the_oracle() {
    let text = "<p>x</p>\n<Widget ";
    let fx = open("/app/widget.tri", text);
    fx.oracle.stage_completions(vec![OracleCompletion::new(
        "shadowed",
        OracleCompletionKind::Property,
    )]);

    let snapshot = fx.state.snapshots.get(&fx.path).unwrap();
    let inventory = scan(text);
    let token = CancellationToken::new();
    let scope = fx.state.scope_for(&fx.path);
    let ctx = PluginContext {
        uri: &fx.uri,
        path: &fx.path,
        text,
        offset: text.len() as u32,
        inventory: &inventory,
        snapshot: Some(&snapshot),
        scope: &scope,
        token: &token,
    };

    let items = fx
        .state
        .host
        .completions(&ctx, &CompletionPolicy::default())
        .await;
    assert!(items.iter().any(|i| i.label.starts_with("on:")));
    assert!(!items.iter().any(|i| i.label == "shadowed"));
}

#[tokio::test]
async fn test_diagnostics_map_back_into_the_script_block() {
    let fx = open("/app/widget.tri", SOURCE);
    fx.oracle.stage_diagnostics(vec![OracleDiagnostic {
        span: TextSpan::new(12, 17),
        message: "unused variable".to_string(),
        severity: OracleSeverity::Warning,
        code: Some("6133".to_string()),
    }]);

    let snapshot = fx.state.snapshots.get(&fx.path).unwrap();
    let inventory = scan(SOURCE);
    let token = CancellationToken::new();
    let scope = fx.state.scope_for(&fx.path);
    let ctx = PluginContext {
        uri: &fx.uri,
        path: &fx.path,
        text: SOURCE,
        offset: 0,
        inventory: &inventory,
        snapshot: Some(&snapshot),
        scope: &scope,
        token: &token,
    };

    let diagnostics = fx.state.host.diagnostics(&ctx).await;
    let mapped = diagnostics
        .iter()
        .find(|d| d.message == "unused variable")
        .unwrap();
    assert_eq!(mapped.range.start.line, 0);
    assert_eq!(mapped.range.start.character, 12);
    assert_eq!(mapped.range.end.character, 17);
    // The oracle saw the synthetic path, never the real one
    assert!(fx
        .oracle
        .calls()
        .iter()
        .all(|call| call.contains("widget.tri.tsx")));
}

#[tokio::test]
async fn test_close_during_inflight_request_defers_deletion() {
    let fx = open("/app/widget.tri", SOURCE);

    assert!(fx.state.documents.lock(&fx.uri));
    fx.state.documents.close(&fx.uri);

    // Still readable while the request holds its lock
    assert!(fx.state.documents.get(&fx.uri).is_some());

    fx.state.documents.release(&fx.uri);
    assert!(fx.state.documents.get(&fx.uri).is_none());
}

#[tokio::test]
async fn test_resolution_miss_heals_when_the_import_target_opens() {
    let fx = open("/app/main.tri", SOURCE);
    let containing = PathBuf::from("/app/main.tri.tsx");

    let miss = fx
        .state
        .resolver
        .resolve_module_names(&["./widget".to_string()], &containing);
    assert_eq!(miss, vec![Resolution::Unresolved]);

    let widget_uri = Url::from_file_path("/app/widget.tri").unwrap();
    fx.state.documents.open(
        widget_uri.clone(),
        "<p>w</p>\n".to_string(),
        1,
        "triptych".to_string(),
    );
    let doc = fx.state.documents.get(&widget_uri).unwrap();
    fx.state.snapshots.update_from_document(&doc);
    drop(doc);

    let hit = fx
        .state
        .resolver
        .resolve_module_names(&["./widget".to_string()], &containing);
    assert!(matches!(&hit[0], Resolution::Resolved(m) if m.virtualized));
}

#[tokio::test]
async fn test_scoped_snapshots_track_the_global_layer() {
    let fx = open("/app/widget.tri", SOURCE);
    let scope = fx.state.scope_for(&fx.path);

    let first = scope.snapshots.get(&fx.path).unwrap();
    let again = scope.snapshots.get(&fx.path).unwrap();
    assert!(Arc::ptr_eq(&first, &again));

    // A new version invalidates the scoped copy
    let changed = "<script>let count = 2;\ncount;</script>\n";
    fx.state.documents.open(
        fx.uri.clone(),
        changed.to_string(),
        2,
        "triptych".to_string(),
    );
    let doc = fx.state.documents.get(&fx.uri).unwrap();
    fx.state.snapshots.update_from_document(&doc);
    drop(doc);

    let fresh = scope.snapshots.get(&fx.path).unwrap();
    assert_eq!(fresh.version, 2);
    assert!(!Arc::ptr_eq(&first, &fresh));
}
