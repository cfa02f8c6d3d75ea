//! The seam between this server and the external type-checking oracle.
//!
//! The oracle is a black box that reads synthetic text through
//! [`OracleFs`](crate::resolve::OracleFs) and answers offset-keyed questions
//! about it. This module defines only the boundary: the async trait, the
//! plain-data result types spanned in generated byte offsets, and the
//! per-build-configuration scope bundling an oracle with its snapshot view.

use std::path::{Path, PathBuf};
use std::sync::atomic::AtomicU64;
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;

use triptych_atlas::TextSpan;

use crate::resolve::VirtualFs;
use crate::snapshot::ScopedSnapshots;

pub type OracleResult<T> = Result<T, OracleError>;

#[derive(Debug, Clone, thiserror::Error)]
pub enum OracleError {
    /// The backend is missing or not running.
    #[error("oracle unavailable: {0}")]
    Unavailable(String),
    /// The backend answered with an error.
    #[error("oracle request failed: {0}")]
    Request(String),
}

/// Severity scale mirroring the LSP numeric severities.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OracleSeverity {
    Error,
    Warning,
    Information,
    Hint,
}

#[derive(Debug, Clone)]
pub struct OracleDiagnostic {
    pub span: TextSpan,
    pub message: String,
    pub severity: OracleSeverity,
    pub code: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OracleCompletionKind {
    Variable,
    Function,
    Method,
    Property,
    Field,
    Class,
    Interface,
    Module,
    Keyword,
    Constant,
}

#[derive(Debug, Clone)]
pub struct OracleCompletion {
    pub label: String,
    pub kind: OracleCompletionKind,
    pub detail: Option<String>,
    /// Text to insert if different from the label.
    pub insert_text: Option<String>,
    pub sort_text: Option<String>,
}

impl OracleCompletion {
    pub fn new(label: impl Into<String>, kind: OracleCompletionKind) -> Self {
        Self {
            label: label.into(),
            kind,
            detail: None,
            insert_text: None,
            sort_text: None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct OracleHover {
    pub span: TextSpan,
    /// Markdown body.
    pub contents: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OracleLocation {
    /// Synthetic path for virtualized files.
    pub path: PathBuf,
    pub span: TextSpan,
}

#[derive(Debug, Clone)]
pub struct OracleTextEdit {
    pub path: PathBuf,
    pub span: TextSpan,
    pub new_text: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OracleSymbolKind {
    Function,
    Variable,
    Constant,
    Class,
    Interface,
    Property,
}

#[derive(Debug, Clone)]
pub struct OracleSymbol {
    pub name: String,
    pub kind: OracleSymbolKind,
    pub span: TextSpan,
    pub selection_span: TextSpan,
    pub children: Vec<OracleSymbol>,
}

#[derive(Debug, Clone)]
pub struct OracleSignature {
    pub label: String,
    pub parameters: Vec<String>,
    pub documentation: Option<String>,
}

#[derive(Debug, Clone)]
pub struct OracleSignatureHelp {
    pub signatures: Vec<OracleSignature>,
    pub active_signature: u32,
    pub active_parameter: u32,
}

/// Offset-keyed questions against synthetic text.
///
/// A fired `token` asks the implementation to answer neutrally (`Ok` with an
/// empty or `None` payload), never to error.
#[async_trait]
pub trait TypeOracle: Send + Sync {
    async fn diagnostics(
        &self,
        path: &Path,
        token: &CancellationToken,
    ) -> OracleResult<Vec<OracleDiagnostic>>;

    async fn completions(
        &self,
        path: &Path,
        offset: u32,
        token: &CancellationToken,
    ) -> OracleResult<Vec<OracleCompletion>>;

    async fn hover(
        &self,
        path: &Path,
        offset: u32,
        token: &CancellationToken,
    ) -> OracleResult<Option<OracleHover>>;

    async fn definitions(
        &self,
        path: &Path,
        offset: u32,
        token: &CancellationToken,
    ) -> OracleResult<Vec<OracleLocation>>;

    async fn references(
        &self,
        path: &Path,
        offset: u32,
        token: &CancellationToken,
    ) -> OracleResult<Vec<OracleLocation>>;

    async fn rename_edits(
        &self,
        path: &Path,
        offset: u32,
        new_name: &str,
        token: &CancellationToken,
    ) -> OracleResult<Vec<OracleTextEdit>>;

    async fn document_symbols(
        &self,
        path: &Path,
        token: &CancellationToken,
    ) -> OracleResult<Vec<OracleSymbol>>;

    async fn signature_help(
        &self,
        path: &Path,
        offset: u32,
        token: &CancellationToken,
    ) -> OracleResult<Option<OracleSignatureHelp>>;
}

/// One oracle instance per build-configuration directory, bundled with its
/// snapshot view and the shared infrastructure it reads through.
pub struct OracleScope {
    pub config_dir: PathBuf,
    pub oracle: Arc<dyn TypeOracle>,
    pub snapshots: ScopedSnapshots,
    pub resolver: Arc<VirtualFs>,
    pub project_version: Arc<AtomicU64>,
}

impl OracleScope {
    pub fn new(
        config_dir: PathBuf,
        oracle: Arc<dyn TypeOracle>,
        snapshots: ScopedSnapshots,
        resolver: Arc<VirtualFs>,
        project_version: Arc<AtomicU64>,
    ) -> Self {
        Self {
            config_dir,
            oracle,
            snapshots,
            resolver,
            project_version,
        }
    }
}

/// Canned oracle: records the calls it receives and replays staged answers.
///
/// Doubles as the default oracle when no backend is wired, in which case it
/// simply answers everything neutrally.
#[derive(Default)]
pub struct StubOracle {
    calls: Mutex<Vec<String>>,
    diagnostics: Mutex<Vec<OracleDiagnostic>>,
    completions: Mutex<Vec<OracleCompletion>>,
    hover: Mutex<Option<OracleHover>>,
    definitions: Mutex<Vec<OracleLocation>>,
    references: Mutex<Vec<OracleLocation>>,
    rename_edits: Mutex<Vec<OracleTextEdit>>,
    symbols: Mutex<Vec<OracleSymbol>>,
    signature: Mutex<Option<OracleSignatureHelp>>,
    failure: Mutex<Option<OracleError>>,
}

impl StubOracle {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn stage_diagnostics(&self, items: Vec<OracleDiagnostic>) {
        *self.diagnostics.lock() = items;
    }

    pub fn stage_completions(&self, items: Vec<OracleCompletion>) {
        *self.completions.lock() = items;
    }

    pub fn stage_hover(&self, hover: OracleHover) {
        *self.hover.lock() = Some(hover);
    }

    pub fn stage_definitions(&self, items: Vec<OracleLocation>) {
        *self.definitions.lock() = items;
    }

    pub fn stage_references(&self, items: Vec<OracleLocation>) {
        *self.references.lock() = items;
    }

    pub fn stage_rename_edits(&self, items: Vec<OracleTextEdit>) {
        *self.rename_edits.lock() = items;
    }

    pub fn stage_symbols(&self, items: Vec<OracleSymbol>) {
        *self.symbols.lock() = items;
    }

    pub fn stage_signature(&self, help: OracleSignatureHelp) {
        *self.signature.lock() = Some(help);
    }

    /// Make every subsequent call fail with `error`.
    pub fn fail_with(&self, error: OracleError) {
        *self.failure.lock() = Some(error);
    }

    /// Calls received so far, oldest first.
    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().clone()
    }

    fn record(&self, call: String) -> OracleResult<()> {
        if let Some(error) = self.failure.lock().clone() {
            return Err(error);
        }
        self.calls.lock().push(call);
        Ok(())
    }
}

#[async_trait]
impl TypeOracle for StubOracle {
    async fn diagnostics(
        &self,
        path: &Path,
        token: &CancellationToken,
    ) -> OracleResult<Vec<OracleDiagnostic>> {
        if token.is_cancelled() {
            return Ok(Vec::new());
        }
        self.record(format!("diagnostics {}", path.display()))?;
        Ok(self.diagnostics.lock().clone())
    }

    async fn completions(
        &self,
        path: &Path,
        offset: u32,
        token: &CancellationToken,
    ) -> OracleResult<Vec<OracleCompletion>> {
        if token.is_cancelled() {
            return Ok(Vec::new());
        }
        self.record(format!("completions {}:{offset}", path.display()))?;
        Ok(self.completions.lock().clone())
    }

    async fn hover(
        &self,
        path: &Path,
        offset: u32,
        token: &CancellationToken,
    ) -> OracleResult<Option<OracleHover>> {
        if token.is_cancelled() {
            return Ok(None);
        }
        self.record(format!("hover {}:{offset}", path.display()))?;
        Ok(self.hover.lock().clone())
    }

    async fn definitions(
        &self,
        path: &Path,
        offset: u32,
        token: &CancellationToken,
    ) -> OracleResult<Vec<OracleLocation>> {
        if token.is_cancelled() {
            return Ok(Vec::new());
        }
        self.record(format!("definitions {}:{offset}", path.display()))?;
        Ok(self.definitions.lock().clone())
    }

    async fn references(
        &self,
        path: &Path,
        offset: u32,
        token: &CancellationToken,
    ) -> OracleResult<Vec<OracleLocation>> {
        if token.is_cancelled() {
            return Ok(Vec::new());
        }
        self.record(format!("references {}:{offset}", path.display()))?;
        Ok(self.references.lock().clone())
    }

    async fn rename_edits(
        &self,
        path: &Path,
        offset: u32,
        new_name: &str,
        token: &CancellationToken,
    ) -> OracleResult<Vec<OracleTextEdit>> {
        if token.is_cancelled() {
            return Ok(Vec::new());
        }
        self.record(format!("rename {}:{offset} -> {new_name}", path.display()))?;
        Ok(self.rename_edits.lock().clone())
    }

    async fn document_symbols(
        &self,
        path: &Path,
        token: &CancellationToken,
    ) -> OracleResult<Vec<OracleSymbol>> {
        if token.is_cancelled() {
            return Ok(Vec::new());
        }
        self.record(format!("symbols {}", path.display()))?;
        Ok(self.symbols.lock().clone())
    }

    async fn signature_help(
        &self,
        path: &Path,
        offset: u32,
        token: &CancellationToken,
    ) -> OracleResult<Option<OracleSignatureHelp>> {
        if token.is_cancelled() {
            return Ok(None);
        }
        self.record(format!("signature {}:{offset}", path.display()))?;
        Ok(self.signature.lock().clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_stub_replays_staged_answers() {
        let stub = StubOracle::new();
        stub.stage_hover(OracleHover {
            span: TextSpan::new(4, 9),
            contents: "const n: number".to_string(),
        });

        let token = CancellationToken::new();
        let hover = stub
            .hover(Path::new("/a/widget.tri.tsx"), 6, &token)
            .await
            .unwrap()
            .unwrap();

        assert_eq!(hover.span, TextSpan::new(4, 9));
        assert_eq!(stub.calls(), vec!["hover /a/widget.tri.tsx:6"]);
    }

    #[tokio::test]
    async fn test_cancellation_answers_neutrally() {
        let stub = StubOracle::new();
        stub.stage_diagnostics(vec![OracleDiagnostic {
            span: TextSpan::new(0, 1),
            message: "staged".to_string(),
            severity: OracleSeverity::Error,
            code: None,
        }]);

        let token = CancellationToken::new();
        token.cancel();
        let diagnostics = stub
            .diagnostics(Path::new("/a.tsx"), &token)
            .await
            .unwrap();

        assert!(diagnostics.is_empty());
        assert!(stub.calls().is_empty());
    }

    #[tokio::test]
    async fn test_failure_mode_is_an_error_value() {
        let stub = StubOracle::new();
        stub.fail_with(OracleError::Unavailable("no backend".to_string()));

        let token = CancellationToken::new();
        let result = stub.completions(Path::new("/a.tsx"), 0, &token).await;

        assert!(matches!(result, Err(OracleError::Unavailable(_))));
    }
}
