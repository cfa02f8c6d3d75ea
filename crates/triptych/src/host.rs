//! The request multiplexer between the LSP surface and feature plugins.
//!
//! Plugins declare an explicit [`CapabilitySet`]; dispatch consults the set
//! and never probes beyond it. Three dispatch modes exist: first-non-null
//! for single-answer requests, collect for aggregating requests, and
//! fire-and-forget for notifications. Every plugin invocation passes through
//! one error boundary that logs failures and substitutes the mode's neutral
//! value, so one misbehaving plugin never aborts a request.

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use serde::Deserialize;
use tokio_util::sync::CancellationToken;
use tower_lsp::lsp_types::{
    ColorInformation, CompletionItem, Diagnostic, DocumentSymbol, FileEvent, FoldingRange, Hover,
    Location, LocationLink, Range, SignatureHelp, Url, WorkspaceEdit,
};

use triptych_calque::BlockInventory;

use crate::oracle::{OracleError, OracleScope};
use crate::snapshot::DocumentSnapshot;

pub const MARKUP_PLUGIN: &str = "markup";
pub const STYLE_PLUGIN: &str = "style";
pub const DIRECTIVE_PLUGIN: &str = "directive";
pub const TYPESCRIPT_PLUGIN: &str = "typescript";

bitflags::bitflags! {
    /// What a plugin answers.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct CapabilitySet: u16 {
        const HOVER          = 1 << 0;
        const COMPLETIONS    = 1 << 1;
        const DIAGNOSTICS    = 1 << 2;
        const DEFINITIONS    = 1 << 3;
        const FOLDING        = 1 << 4;
        const COLORS         = 1 << 5;
        const SYMBOLS        = 1 << 6;
        const RENAME         = 1 << 7;
        const SIGNATURE_HELP = 1 << 8;
        const FILE_EVENTS    = 1 << 9;
    }
}

#[derive(Debug, thiserror::Error)]
pub enum PluginError {
    #[error("{0}")]
    Failed(String),
    #[error(transparent)]
    Oracle(#[from] OracleError),
}

pub type PluginResult<T> = Result<T, PluginError>;

/// Everything a plugin may read while answering one request.
pub struct PluginContext<'a> {
    pub uri: &'a Url,
    pub path: &'a Path,
    /// Original document text.
    pub text: &'a str,
    /// Byte offset of the request position in `text`; zero for
    /// whole-document requests.
    pub offset: u32,
    pub inventory: &'a BlockInventory<'a>,
    /// This document's snapshot, when one exists.
    pub snapshot: Option<&'a Arc<DocumentSnapshot>>,
    pub scope: &'a OracleScope,
    pub token: &'a CancellationToken,
}

/// A feature provider. Default method bodies answer neutrally, so a plugin
/// implements only what its capability set claims.
#[async_trait]
pub trait Plugin: Send + Sync {
    /// Stable tag used for precedence decisions and logging.
    fn name(&self) -> &'static str;

    fn capabilities(&self) -> CapabilitySet;

    async fn hover(&self, _ctx: &PluginContext<'_>) -> PluginResult<Option<Hover>> {
        Ok(None)
    }

    async fn completions(&self, _ctx: &PluginContext<'_>) -> PluginResult<Vec<CompletionItem>> {
        Ok(Vec::new())
    }

    async fn diagnostics(&self, _ctx: &PluginContext<'_>) -> PluginResult<Vec<Diagnostic>> {
        Ok(Vec::new())
    }

    async fn definition(
        &self,
        _ctx: &PluginContext<'_>,
    ) -> PluginResult<Option<Vec<LocationLink>>> {
        Ok(None)
    }

    async fn references(&self, _ctx: &PluginContext<'_>) -> PluginResult<Option<Vec<Location>>> {
        Ok(None)
    }

    async fn folding_ranges(&self, _ctx: &PluginContext<'_>) -> PluginResult<Vec<FoldingRange>> {
        Ok(Vec::new())
    }

    async fn document_colors(
        &self,
        _ctx: &PluginContext<'_>,
    ) -> PluginResult<Vec<ColorInformation>> {
        Ok(Vec::new())
    }

    async fn document_symbols(
        &self,
        _ctx: &PluginContext<'_>,
    ) -> PluginResult<Vec<DocumentSymbol>> {
        Ok(Vec::new())
    }

    async fn prepare_rename(&self, _ctx: &PluginContext<'_>) -> PluginResult<Option<Range>> {
        Ok(None)
    }

    async fn rename(
        &self,
        _ctx: &PluginContext<'_>,
        _new_name: &str,
    ) -> PluginResult<Option<WorkspaceEdit>> {
        Ok(None)
    }

    async fn signature_help(
        &self,
        _ctx: &PluginContext<'_>,
    ) -> PluginResult<Option<SignatureHelp>> {
        Ok(None)
    }

    async fn on_watched_files(&self, _events: &[FileEvent]) -> PluginResult<()> {
        Ok(())
    }
}

/// Completion merge policy, read from initialization options.
#[derive(Debug, Clone, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct CompletionPolicy {
    /// Suppress markup tag lists inside tag-opening contexts.
    pub suppress_markup_in_tag: bool,
    /// Drop oracle results entirely when the directive plugin already
    /// answered in a tag-opening context.
    pub drop_oracle_on_directive_hit: bool,
    /// Sort-text prefix pushing oracle items below template completions.
    pub oracle_demotion_prefix: String,
}

impl Default for CompletionPolicy {
    fn default() -> Self {
        Self {
            suppress_markup_in_tag: true,
            drop_oracle_on_directive_hit: true,
            oracle_demotion_prefix: "zz-".to_string(),
        }
    }
}

/// Whether `offset` sits in a component/tag-opening position: right of a
/// `<` with nothing but tag-name bytes in between.
pub fn tag_opening_context(text: &str, offset: u32) -> bool {
    let bytes = &text.as_bytes()[..(offset as usize).min(text.len())];
    for i in (0..bytes.len()).rev() {
        match bytes[i] {
            b'<' => {
                return bytes[i + 1..]
                    .iter()
                    .all(|&b| b.is_ascii_alphanumeric() || matches!(b, b'-' | b'_' | b'.'));
            }
            b'>' => return false,
            _ => {}
        }
    }
    false
}

/// Whether `offset` sits anywhere inside an unclosed opening tag, attribute
/// area included. This is the context the completion merge keys on: between
/// `<` and `>` the oracle knows the component's props, so markup tag lists
/// are noise there.
pub fn inside_open_tag(text: &str, offset: u32) -> bool {
    let bytes = &text.as_bytes()[..(offset as usize).min(text.len())];
    for i in (0..bytes.len()).rev() {
        match bytes[i] {
            b'<' => return bytes.get(i + 1) != Some(&b'/'),
            b'>' => return false,
            _ => {}
        }
    }
    false
}

/// Merge per-plugin completion batches under `policy`. Batches arrive in
/// registration order and stay in that order; only the oracle's sort text
/// is rewritten.
pub fn merge_completions(
    policy: &CompletionPolicy,
    in_tag_context: bool,
    batches: Vec<(&str, Vec<CompletionItem>)>,
) -> Vec<CompletionItem> {
    let directive_answered = batches
        .iter()
        .any(|(name, items)| *name == DIRECTIVE_PLUGIN && !items.is_empty());
    let drop_oracle =
        policy.drop_oracle_on_directive_hit && in_tag_context && directive_answered;
    let suppress_markup = policy.suppress_markup_in_tag && in_tag_context;

    let mut merged = Vec::new();
    for (name, items) in batches {
        match name {
            MARKUP_PLUGIN if suppress_markup => {}
            TYPESCRIPT_PLUGIN => {
                if drop_oracle {
                    continue;
                }
                for mut item in items {
                    let base = item.sort_text.take().unwrap_or_else(|| item.label.clone());
                    item.sort_text = Some(format!("{}{base}", policy.oracle_demotion_prefix));
                    merged.push(item);
                }
            }
            _ => merged.extend(items),
        }
    }
    merged
}

fn warn_plugin(name: &str, operation: &str, error: &PluginError) {
    tracing::warn!(plugin = name, operation, %error, "plugin failed, substituting neutral value");
}

/// Registered plugins plus the dispatch logic over them.
#[derive(Default)]
pub struct PluginHost {
    plugins: Vec<Arc<dyn Plugin>>,
}

impl PluginHost {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registration order is precedence order; plugins are never removed.
    pub fn register(&mut self, plugin: Arc<dyn Plugin>) {
        self.plugins.push(plugin);
    }

    pub fn plugin_names(&self) -> Vec<&'static str> {
        self.plugins.iter().map(|p| p.name()).collect()
    }

    fn capable(&self, capability: CapabilitySet) -> impl Iterator<Item = &Arc<dyn Plugin>> {
        self.plugins
            .iter()
            .filter(move |p| p.capabilities().contains(capability))
    }

    pub async fn hover(&self, ctx: &PluginContext<'_>) -> Option<Hover> {
        for plugin in self.capable(CapabilitySet::HOVER) {
            match plugin.hover(ctx).await {
                Ok(Some(hover)) => return Some(hover),
                Ok(None) => {}
                Err(error) => warn_plugin(plugin.name(), "hover", &error),
            }
        }
        None
    }

    pub async fn definition(&self, ctx: &PluginContext<'_>) -> Option<Vec<LocationLink>> {
        for plugin in self.capable(CapabilitySet::DEFINITIONS) {
            match plugin.definition(ctx).await {
                Ok(Some(links)) => return Some(links),
                Ok(None) => {}
                Err(error) => warn_plugin(plugin.name(), "definition", &error),
            }
        }
        None
    }

    pub async fn references(&self, ctx: &PluginContext<'_>) -> Option<Vec<Location>> {
        for plugin in self.capable(CapabilitySet::DEFINITIONS) {
            match plugin.references(ctx).await {
                Ok(Some(locations)) => return Some(locations),
                Ok(None) => {}
                Err(error) => warn_plugin(plugin.name(), "references", &error),
            }
        }
        None
    }

    pub async fn prepare_rename(&self, ctx: &PluginContext<'_>) -> Option<Range> {
        for plugin in self.capable(CapabilitySet::RENAME) {
            match plugin.prepare_rename(ctx).await {
                Ok(Some(range)) => return Some(range),
                Ok(None) => {}
                Err(error) => warn_plugin(plugin.name(), "prepare-rename", &error),
            }
        }
        None
    }

    pub async fn rename(&self, ctx: &PluginContext<'_>, new_name: &str) -> Option<WorkspaceEdit> {
        for plugin in self.capable(CapabilitySet::RENAME) {
            match plugin.rename(ctx, new_name).await {
                Ok(Some(edit)) => return Some(edit),
                Ok(None) => {}
                Err(error) => warn_plugin(plugin.name(), "rename", &error),
            }
        }
        None
    }

    pub async fn signature_help(&self, ctx: &PluginContext<'_>) -> Option<SignatureHelp> {
        for plugin in self.capable(CapabilitySet::SIGNATURE_HELP) {
            match plugin.signature_help(ctx).await {
                Ok(Some(help)) => return Some(help),
                Ok(None) => {}
                Err(error) => warn_plugin(plugin.name(), "signature-help", &error),
            }
        }
        None
    }

    pub async fn diagnostics(&self, ctx: &PluginContext<'_>) -> Vec<Diagnostic> {
        let mut out = Vec::new();
        for plugin in self.capable(CapabilitySet::DIAGNOSTICS) {
            match plugin.diagnostics(ctx).await {
                Ok(items) => out.extend(items),
                Err(error) => warn_plugin(plugin.name(), "diagnostics", &error),
            }
        }
        out
    }

    pub async fn folding_ranges(&self, ctx: &PluginContext<'_>) -> Vec<FoldingRange> {
        let mut out = Vec::new();
        for plugin in self.capable(CapabilitySet::FOLDING) {
            match plugin.folding_ranges(ctx).await {
                Ok(items) => out.extend(items),
                Err(error) => warn_plugin(plugin.name(), "folding", &error),
            }
        }
        out
    }

    pub async fn document_colors(&self, ctx: &PluginContext<'_>) -> Vec<ColorInformation> {
        let mut out = Vec::new();
        for plugin in self.capable(CapabilitySet::COLORS) {
            match plugin.document_colors(ctx).await {
                Ok(items) => out.extend(items),
                Err(error) => warn_plugin(plugin.name(), "colors", &error),
            }
        }
        out
    }

    pub async fn document_symbols(&self, ctx: &PluginContext<'_>) -> Vec<DocumentSymbol> {
        let mut out = Vec::new();
        for plugin in self.capable(CapabilitySet::SYMBOLS) {
            match plugin.document_symbols(ctx).await {
                Ok(items) => out.extend(items),
                Err(error) => warn_plugin(plugin.name(), "symbols", &error),
            }
        }
        out
    }

    /// Gather from all capable plugins concurrently, then merge under the
    /// policy. A failing plugin contributes an empty batch.
    pub async fn completions(
        &self,
        ctx: &PluginContext<'_>,
        policy: &CompletionPolicy,
    ) -> Vec<CompletionItem> {
        let in_tag_context = inside_open_tag(ctx.text, ctx.offset);
        let plugins: Vec<_> = self.capable(CapabilitySet::COMPLETIONS).collect();
        let pending = plugins
            .iter()
            .map(|plugin| async move { (plugin.name(), plugin.completions(ctx).await) });
        let results = futures::future::join_all(pending).await;

        let mut batches = Vec::with_capacity(results.len());
        for (name, result) in results {
            match result {
                Ok(items) => batches.push((name, items)),
                Err(error) => {
                    warn_plugin(name, "completions", &error);
                    batches.push((name, Vec::new()));
                }
            }
        }
        merge_completions(policy, in_tag_context, batches)
    }

    /// Fire-and-forget delivery; errors are logged and dropped.
    pub async fn notify_watched_files(&self, events: &[FileEvent]) {
        for plugin in self.capable(CapabilitySet::FILE_EVENTS) {
            if let Err(error) = plugin.on_watched_files(events).await {
                warn_plugin(plugin.name(), "watched-files", &error);
            }
        }
    }
}
