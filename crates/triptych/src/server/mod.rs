//! The LSP surface: thin tower-lsp handlers over the plugin host.
//!
//! Handlers translate LSP params into a [`PluginContext`], dispatch through
//! the host, and translate results back. Documents are read-locked for the
//! duration of any request that can reach the oracle, so a close arriving
//! mid-request defers deletion until the request lets go.

mod capabilities;
mod diagnostics;
mod state;

pub use capabilities::*;
pub use diagnostics::*;
pub use state::*;

use std::path::PathBuf;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tower_lsp::jsonrpc::Result;
use tower_lsp::lsp_types::*;
use tower_lsp::{Client, LanguageServer};

use triptych_atlas::position::position_to_offset_str;
use triptych_calque::scan;

use crate::document::DocumentRegistry;
use crate::host::PluginContext;
use crate::oracle::{StubOracle, TypeOracle};
use crate::snapshot::{uri_to_path, DocumentSnapshot};

/// The triptych language server.
pub struct TriptychServer {
    client: Client,
    state: Arc<ServerState>,
    diagnostics: Arc<DiagnosticsScheduler>,
}

/// Read lock over one document for the duration of a request.
struct DocumentLock<'a> {
    documents: &'a DocumentRegistry,
    uri: Url,
}

impl Drop for DocumentLock<'_> {
    fn drop(&mut self) {
        self.documents.release(&self.uri);
    }
}

/// Everything a position/document request needs, gathered up front.
struct Request<'a> {
    _lock: DocumentLock<'a>,
    text: Arc<str>,
    path: PathBuf,
    snapshot: Option<Arc<DocumentSnapshot>>,
    scope: Arc<crate::oracle::OracleScope>,
}

impl TriptychServer {
    /// Server with no oracle backend wired; the stub answers everything
    /// neutrally, leaving the non-oracle plugins fully functional.
    pub fn new(client: Client) -> Self {
        Self::with_oracle(client, Arc::new(StubOracle::new()))
    }

    pub fn with_oracle(client: Client, oracle: Arc<dyn TypeOracle>) -> Self {
        Self {
            client,
            state: Arc::new(ServerState::new(oracle)),
            diagnostics: Arc::new(DiagnosticsScheduler::new()),
        }
    }

    pub fn state(&self) -> &ServerState {
        &self.state
    }

    fn request(&self, uri: &Url) -> Option<Request<'_>> {
        if !self.state.documents.lock(uri) {
            return None;
        }
        let lock = DocumentLock {
            documents: &self.state.documents,
            uri: uri.clone(),
        };
        let text = self.state.documents.get(uri)?.text();
        let path = uri_to_path(uri);
        let snapshot = self.state.snapshots.get(&path);
        let scope = self.state.scope_for(&path);
        Some(Request {
            _lock: lock,
            text,
            path,
            snapshot,
            scope,
        })
    }

    /// Sync the snapshot layer with an open document's current content.
    fn refresh_snapshot(&self, uri: &Url) {
        if let Some(doc) = self.state.documents.get(uri) {
            self.state.snapshots.update_from_document(&doc);
        }
    }

    fn schedule_diagnostics(&self, uri: Url) {
        let (debounce, throttle) = {
            let config = self.state.config.read();
            (
                Duration::from_millis(config.diagnostics_debounce_ms),
                Duration::from_millis(config.diagnostics_throttle_ms),
            )
        };
        let state = self.state.clone();
        let client = self.client.clone();
        self.diagnostics
            .schedule(uri.clone(), debounce, throttle, move |token| async move {
                let Some((version, items)) = compute_diagnostics(&state, &uri, &token).await
                else {
                    return;
                };
                if token.is_cancelled() {
                    return;
                }
                // The document moved on while the pass ran: publish nothing,
                // the newer pass will cover it
                let current = state.documents.get(&uri).map(|doc| doc.version);
                if current != Some(version) {
                    return;
                }
                client.publish_diagnostics(uri, items, Some(version)).await;
            });
    }
}

/// One full diagnostics pass over an open document.
async fn compute_diagnostics(
    state: &ServerState,
    uri: &Url,
    token: &CancellationToken,
) -> Option<(i32, Vec<Diagnostic>)> {
    if !state.documents.lock(uri) {
        return None;
    }
    let result = async {
        let (text, version) = {
            let doc = state.documents.get(uri)?;
            (doc.text(), doc.version)
        };
        let path = uri_to_path(uri);
        let inventory = scan(&text);
        let snapshot = state.snapshots.get(&path);
        let scope = state.scope_for(&path);
        let ctx = PluginContext {
            uri,
            path: &path,
            text: &text,
            offset: 0,
            inventory: &inventory,
            snapshot: snapshot.as_ref(),
            scope: &scope,
            token,
        };
        Some((version, state.host.diagnostics(&ctx).await))
    }
    .await;
    state.documents.release(uri);
    result
}

#[tower_lsp::async_trait]
impl LanguageServer for TriptychServer {
    async fn initialize(&self, params: InitializeParams) -> Result<InitializeResult> {
        #[allow(deprecated)]
        if let Some(root) = params.root_uri.as_ref().and_then(|u| u.to_file_path().ok()) {
            self.state.set_workspace_root(root);
        }

        let link_support = params
            .capabilities
            .text_document
            .as_ref()
            .and_then(|t| t.definition.as_ref())
            .and_then(|d| d.link_support)
            .unwrap_or(false);
        self.state
            .definition_links
            .store(link_support, Ordering::SeqCst);

        if let Some(options) = params.initialization_options {
            match serde_json::from_value::<ServerConfig>(options) {
                Ok(config) => *self.state.config.write() = config,
                Err(error) => {
                    tracing::warn!(%error, "invalid initialization options, using defaults")
                }
            }
        }

        Ok(InitializeResult {
            capabilities: server_capabilities(),
            server_info: Some(ServerInfo {
                name: "triptych-ls".to_string(),
                version: Some(env!("CARGO_PKG_VERSION").to_string()),
            }),
        })
    }

    async fn initialized(&self, _params: InitializedParams) {
        tracing::info!(
            plugins = ?self.state.host.plugin_names(),
            "triptych language server initialized"
        );
    }

    async fn shutdown(&self) -> Result<()> {
        Ok(())
    }

    async fn did_open(&self, params: DidOpenTextDocumentParams) {
        let uri = params.text_document.uri;
        self.state.documents.open(
            uri.clone(),
            params.text_document.text,
            params.text_document.version,
            params.text_document.language_id,
        );
        self.refresh_snapshot(&uri);
        self.schedule_diagnostics(uri);
    }

    async fn did_change(&self, params: DidChangeTextDocumentParams) {
        let uri = params.text_document.uri;
        let version = params.text_document.version;
        if self
            .state
            .documents
            .update(&uri, &params.content_changes, version)
            .is_none()
        {
            tracing::warn!(%uri, "change for unknown document");
            return;
        }
        self.refresh_snapshot(&uri);
        self.schedule_diagnostics(uri);
    }

    async fn did_save(&self, params: DidSaveTextDocumentParams) {
        self.schedule_diagnostics(params.text_document.uri);
    }

    async fn did_close(&self, params: DidCloseTextDocumentParams) {
        let uri = params.text_document.uri;
        self.diagnostics.cancel(&uri);
        self.state.documents.close(&uri);
        self.state.snapshots.delete(&uri_to_path(&uri));
        self.client
            .publish_diagnostics(uri, Vec::new(), None)
            .await;
    }

    async fn did_change_watched_files(&self, params: DidChangeWatchedFilesParams) {
        for event in &params.changes {
            let path = uri_to_path(&event.uri);
            match event.typ {
                FileChangeType::CREATED => self.state.resolver.purge_unresolved(&path),
                FileChangeType::DELETED => self.state.snapshots.delete(&path),
                _ => {}
            }
        }
        self.state.host.notify_watched_files(&params.changes).await;
    }

    async fn hover(&self, params: HoverParams) -> Result<Option<Hover>> {
        let uri = &params.text_document_position_params.text_document.uri;
        let position = params.text_document_position_params.position;
        let Some(request) = self.request(uri) else {
            return Ok(None);
        };
        let offset =
            position_to_offset_str(&request.text, position.line, position.character) as u32;
        let inventory = scan(&request.text);
        let token = CancellationToken::new();
        let ctx = PluginContext {
            uri,
            path: &request.path,
            text: &request.text,
            offset,
            inventory: &inventory,
            snapshot: request.snapshot.as_ref(),
            scope: &request.scope,
            token: &token,
        };
        Ok(self.state.host.hover(&ctx).await)
    }

    async fn completion(&self, params: CompletionParams) -> Result<Option<CompletionResponse>> {
        let uri = &params.text_document_position.text_document.uri;
        let position = params.text_document_position.position;
        let Some(request) = self.request(uri) else {
            return Ok(None);
        };
        let offset =
            position_to_offset_str(&request.text, position.line, position.character) as u32;
        let inventory = scan(&request.text);
        let token = CancellationToken::new();
        let ctx = PluginContext {
            uri,
            path: &request.path,
            text: &request.text,
            offset,
            inventory: &inventory,
            snapshot: request.snapshot.as_ref(),
            scope: &request.scope,
            token: &token,
        };
        let policy = self.state.config.read().completion.clone();
        let items = self.state.host.completions(&ctx, &policy).await;
        if items.is_empty() {
            Ok(None)
        } else {
            Ok(Some(CompletionResponse::Array(items)))
        }
    }

    async fn goto_definition(
        &self,
        params: GotoDefinitionParams,
    ) -> Result<Option<GotoDefinitionResponse>> {
        let uri = &params.text_document_position_params.text_document.uri;
        let position = params.text_document_position_params.position;
        let Some(request) = self.request(uri) else {
            return Ok(None);
        };
        let offset =
            position_to_offset_str(&request.text, position.line, position.character) as u32;
        let inventory = scan(&request.text);
        let token = CancellationToken::new();
        let ctx = PluginContext {
            uri,
            path: &request.path,
            text: &request.text,
            offset,
            inventory: &inventory,
            snapshot: request.snapshot.as_ref(),
            scope: &request.scope,
            token: &token,
        };
        let Some(links) = self.state.host.definition(&ctx).await else {
            return Ok(None);
        };
        // Honor the link-support capability negotiated at initialize
        if self.state.definition_links.load(Ordering::SeqCst) {
            Ok(Some(GotoDefinitionResponse::Link(links)))
        } else {
            let locations = links
                .into_iter()
                .map(|link| Location {
                    uri: link.target_uri,
                    range: link.target_selection_range,
                })
                .collect();
            Ok(Some(GotoDefinitionResponse::Array(locations)))
        }
    }

    async fn references(&self, params: ReferenceParams) -> Result<Option<Vec<Location>>> {
        let uri = &params.text_document_position.text_document.uri;
        let position = params.text_document_position.position;
        let Some(request) = self.request(uri) else {
            return Ok(None);
        };
        let offset =
            position_to_offset_str(&request.text, position.line, position.character) as u32;
        let inventory = scan(&request.text);
        let token = CancellationToken::new();
        let ctx = PluginContext {
            uri,
            path: &request.path,
            text: &request.text,
            offset,
            inventory: &inventory,
            snapshot: request.snapshot.as_ref(),
            scope: &request.scope,
            token: &token,
        };
        Ok(self.state.host.references(&ctx).await)
    }

    async fn folding_range(&self, params: FoldingRangeParams) -> Result<Option<Vec<FoldingRange>>> {
        let uri = &params.text_document.uri;
        let Some(request) = self.request(uri) else {
            return Ok(None);
        };
        let inventory = scan(&request.text);
        let token = CancellationToken::new();
        let ctx = PluginContext {
            uri,
            path: &request.path,
            text: &request.text,
            offset: 0,
            inventory: &inventory,
            snapshot: request.snapshot.as_ref(),
            scope: &request.scope,
            token: &token,
        };
        Ok(Some(self.state.host.folding_ranges(&ctx).await))
    }

    async fn document_color(&self, params: DocumentColorParams) -> Result<Vec<ColorInformation>> {
        let uri = &params.text_document.uri;
        let Some(request) = self.request(uri) else {
            return Ok(Vec::new());
        };
        let inventory = scan(&request.text);
        let token = CancellationToken::new();
        let ctx = PluginContext {
            uri,
            path: &request.path,
            text: &request.text,
            offset: 0,
            inventory: &inventory,
            snapshot: request.snapshot.as_ref(),
            scope: &request.scope,
            token: &token,
        };
        Ok(self.state.host.document_colors(&ctx).await)
    }

    async fn color_presentation(
        &self,
        _params: ColorPresentationParams,
    ) -> Result<Vec<ColorPresentation>> {
        Ok(Vec::new())
    }

    async fn document_symbol(
        &self,
        params: DocumentSymbolParams,
    ) -> Result<Option<DocumentSymbolResponse>> {
        let uri = &params.text_document.uri;
        let Some(request) = self.request(uri) else {
            return Ok(None);
        };
        let inventory = scan(&request.text);
        let token = CancellationToken::new();
        let ctx = PluginContext {
            uri,
            path: &request.path,
            text: &request.text,
            offset: 0,
            inventory: &inventory,
            snapshot: request.snapshot.as_ref(),
            scope: &request.scope,
            token: &token,
        };
        let symbols = self.state.host.document_symbols(&ctx).await;
        if symbols.is_empty() {
            Ok(None)
        } else {
            Ok(Some(DocumentSymbolResponse::Nested(symbols)))
        }
    }

    async fn prepare_rename(
        &self,
        params: TextDocumentPositionParams,
    ) -> Result<Option<PrepareRenameResponse>> {
        let uri = &params.text_document.uri;
        let position = params.position;
        let Some(request) = self.request(uri) else {
            return Ok(None);
        };
        let offset =
            position_to_offset_str(&request.text, position.line, position.character) as u32;
        let inventory = scan(&request.text);
        let token = CancellationToken::new();
        let ctx = PluginContext {
            uri,
            path: &request.path,
            text: &request.text,
            offset,
            inventory: &inventory,
            snapshot: request.snapshot.as_ref(),
            scope: &request.scope,
            token: &token,
        };
        Ok(self
            .state
            .host
            .prepare_rename(&ctx)
            .await
            .map(PrepareRenameResponse::Range))
    }

    async fn rename(&self, params: RenameParams) -> Result<Option<WorkspaceEdit>> {
        let uri = &params.text_document_position.text_document.uri;
        let position = params.text_document_position.position;
        let Some(request) = self.request(uri) else {
            return Ok(None);
        };
        let offset =
            position_to_offset_str(&request.text, position.line, position.character) as u32;
        let inventory = scan(&request.text);
        let token = CancellationToken::new();
        let ctx = PluginContext {
            uri,
            path: &request.path,
            text: &request.text,
            offset,
            inventory: &inventory,
            snapshot: request.snapshot.as_ref(),
            scope: &request.scope,
            token: &token,
        };
        Ok(self.state.host.rename(&ctx, &params.new_name).await)
    }

    async fn signature_help(&self, params: SignatureHelpParams) -> Result<Option<SignatureHelp>> {
        let uri = &params.text_document_position_params.text_document.uri;
        let position = params.text_document_position_params.position;
        let Some(request) = self.request(uri) else {
            return Ok(None);
        };
        let offset =
            position_to_offset_str(&request.text, position.line, position.character) as u32;
        let inventory = scan(&request.text);
        let token = CancellationToken::new();
        let ctx = PluginContext {
            uri,
            path: &request.path,
            text: &request.text,
            offset,
            inventory: &inventory,
            snapshot: request.snapshot.as_ref(),
            scope: &request.scope,
            token: &token,
        };
        Ok(self.state.host.signature_help(&ctx).await)
    }
}
