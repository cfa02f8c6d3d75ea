//! The oracle-backed plugin.
//!
//! Every request goes original → generated through the document's snapshot
//! mapper, out to the oracle against the synthetic path, and every returned
//! span comes back generated → original. Results whose span fails to map are
//! dropped, never guessed at.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use tower_lsp::lsp_types::{
    CompletionItem, CompletionItemKind, Diagnostic, DiagnosticSeverity, DocumentChanges,
    DocumentSymbol, Hover, HoverContents, Location, LocationLink, MarkupContent, MarkupKind,
    NumberOrString, ParameterInformation, ParameterLabel, Range, SignatureHelp,
    SignatureInformation, SymbolKind, TextEdit, Url, WorkspaceEdit,
};

use triptych_atlas::position::{offset_to_position_str, position_to_offset_str};
use triptych_atlas::TextSpan;

use crate::host::{CapabilitySet, Plugin, PluginContext, PluginError, PluginResult, TYPESCRIPT_PLUGIN};
use crate::oracle::{
    OracleCompletionKind, OracleScope, OracleSeverity, OracleSymbol, OracleSymbolKind,
};
use crate::resolve::{strip_virtual_suffix, virtual_path};
use crate::snapshot::DocumentSnapshot;

pub struct TypescriptPlugin;

impl TypescriptPlugin {
    pub fn new() -> Self {
        Self
    }
}

impl Default for TypescriptPlugin {
    fn default() -> Self {
        Self::new()
    }
}

/// What one oracle request needs: the snapshot, the path the oracle knows
/// the file by, and the request offset translated into the generated text.
struct OracleTarget {
    snapshot: Arc<DocumentSnapshot>,
    oracle_path: PathBuf,
    generated_offset: u32,
}

fn target(ctx: &PluginContext<'_>) -> Option<OracleTarget> {
    let snapshot = ctx
        .snapshot
        .cloned()
        .or_else(|| ctx.scope.snapshots.get(ctx.path))?;
    let oracle_path = if snapshot.virtualized {
        virtual_path(&snapshot.file_path, snapshot.script_kind)
    } else {
        snapshot.file_path.clone()
    };
    let original = offset_to_position_str(ctx.text, ctx.offset as usize)?;
    let generated = snapshot.mapper.generated_position(original)?;
    let generated_offset =
        position_to_offset_str(&snapshot.text, generated.line, generated.character) as u32;
    Some(OracleTarget {
        snapshot,
        oracle_path,
        generated_offset,
    })
}

/// A generated-text span as an original-document range.
fn original_range(snapshot: &DocumentSnapshot, span: TextSpan) -> Option<Range> {
    let start = offset_to_position_str(&snapshot.text, span.start as usize)?;
    let end = offset_to_position_str(&snapshot.text, span.end as usize)?;
    snapshot.mapper.original_range(Range { start, end })
}

/// Map an oracle-reported location (possibly in another file, possibly
/// synthetic) back to a real uri and original range.
fn original_location(scope: &OracleScope, path: &Path, span: TextSpan) -> Option<Location> {
    match strip_virtual_suffix(path) {
        Some(real) => {
            let snapshot = scope.snapshots.get(&real)?;
            let range = original_range(&snapshot, span)?;
            Some(Location {
                uri: Url::from_file_path(&real).ok()?,
                range,
            })
        }
        None => {
            let text = match scope.snapshots.get(path) {
                Some(snapshot) => snapshot.text.to_string(),
                None => std::fs::read_to_string(path).ok()?,
            };
            let start = offset_to_position_str(&text, span.start as usize)?;
            let end = offset_to_position_str(&text, span.end as usize)?;
            Some(Location {
                uri: Url::from_file_path(path).ok()?,
                range: Range { start, end },
            })
        }
    }
}

fn severity(severity: OracleSeverity) -> DiagnosticSeverity {
    match severity {
        OracleSeverity::Error => DiagnosticSeverity::ERROR,
        OracleSeverity::Warning => DiagnosticSeverity::WARNING,
        OracleSeverity::Information => DiagnosticSeverity::INFORMATION,
        OracleSeverity::Hint => DiagnosticSeverity::HINT,
    }
}

fn completion_kind(kind: OracleCompletionKind) -> CompletionItemKind {
    match kind {
        OracleCompletionKind::Variable => CompletionItemKind::VARIABLE,
        OracleCompletionKind::Function => CompletionItemKind::FUNCTION,
        OracleCompletionKind::Method => CompletionItemKind::METHOD,
        OracleCompletionKind::Property => CompletionItemKind::PROPERTY,
        OracleCompletionKind::Field => CompletionItemKind::FIELD,
        OracleCompletionKind::Class => CompletionItemKind::CLASS,
        OracleCompletionKind::Interface => CompletionItemKind::INTERFACE,
        OracleCompletionKind::Module => CompletionItemKind::MODULE,
        OracleCompletionKind::Keyword => CompletionItemKind::KEYWORD,
        OracleCompletionKind::Constant => CompletionItemKind::CONSTANT,
    }
}

fn symbol_kind(kind: OracleSymbolKind) -> SymbolKind {
    match kind {
        OracleSymbolKind::Function => SymbolKind::FUNCTION,
        OracleSymbolKind::Variable => SymbolKind::VARIABLE,
        OracleSymbolKind::Constant => SymbolKind::CONSTANT,
        OracleSymbolKind::Class => SymbolKind::CLASS,
        OracleSymbolKind::Interface => SymbolKind::INTERFACE,
        OracleSymbolKind::Property => SymbolKind::PROPERTY,
    }
}

#[allow(deprecated)]
fn symbol(snapshot: &DocumentSnapshot, source: &OracleSymbol) -> Option<DocumentSymbol> {
    let range = original_range(snapshot, source.span)?;
    let selection_range = original_range(snapshot, source.selection_span)?;
    let children: Vec<DocumentSymbol> = source
        .children
        .iter()
        .filter_map(|child| symbol(snapshot, child))
        .collect();
    Some(DocumentSymbol {
        name: source.name.clone(),
        detail: None,
        kind: symbol_kind(source.kind),
        tags: None,
        deprecated: None,
        range,
        selection_range,
        children: (!children.is_empty()).then_some(children),
    })
}

/// Range of the identifier-like word around `offset` in `text`.
fn word_range_at(text: &str, offset: u32) -> Option<Range> {
    let at = (offset as usize).min(text.len());
    let is_word = |b: u8| b.is_ascii_alphanumeric() || b == b'_' || b == b'$';
    let bytes = text.as_bytes();
    let start = bytes[..at]
        .iter()
        .rposition(|&b| !is_word(b))
        .map(|i| i + 1)
        .unwrap_or(0);
    let end = bytes[at..]
        .iter()
        .position(|&b| !is_word(b))
        .map(|i| at + i)
        .unwrap_or(text.len());
    if start == end {
        return None;
    }
    Some(Range {
        start: offset_to_position_str(text, start)?,
        end: offset_to_position_str(text, end)?,
    })
}

#[async_trait]
impl Plugin for TypescriptPlugin {
    fn name(&self) -> &'static str {
        TYPESCRIPT_PLUGIN
    }

    fn capabilities(&self) -> CapabilitySet {
        CapabilitySet::HOVER
            | CapabilitySet::COMPLETIONS
            | CapabilitySet::DIAGNOSTICS
            | CapabilitySet::DEFINITIONS
            | CapabilitySet::SYMBOLS
            | CapabilitySet::RENAME
            | CapabilitySet::SIGNATURE_HELP
    }

    async fn hover(&self, ctx: &PluginContext<'_>) -> PluginResult<Option<Hover>> {
        let Some(target) = target(ctx) else {
            return Ok(None);
        };
        let hover = ctx
            .scope
            .oracle
            .hover(&target.oracle_path, target.generated_offset, ctx.token)
            .await?;
        Ok(hover.and_then(|h| {
            let range = original_range(&target.snapshot, h.span)?;
            Some(Hover {
                contents: HoverContents::Markup(MarkupContent {
                    kind: MarkupKind::Markdown,
                    value: h.contents,
                }),
                range: Some(range),
            })
        }))
    }

    async fn completions(&self, ctx: &PluginContext<'_>) -> PluginResult<Vec<CompletionItem>> {
        let Some(target) = target(ctx) else {
            return Ok(Vec::new());
        };
        let items = ctx
            .scope
            .oracle
            .completions(&target.oracle_path, target.generated_offset, ctx.token)
            .await?;
        Ok(items
            .into_iter()
            .map(|item| CompletionItem {
                label: item.label,
                kind: Some(completion_kind(item.kind)),
                detail: item.detail,
                insert_text: item.insert_text,
                sort_text: item.sort_text,
                ..Default::default()
            })
            .collect())
    }

    async fn diagnostics(&self, ctx: &PluginContext<'_>) -> PluginResult<Vec<Diagnostic>> {
        let Some(snapshot) = ctx
            .snapshot
            .cloned()
            .or_else(|| ctx.scope.snapshots.get(ctx.path))
        else {
            return Ok(Vec::new());
        };
        let oracle_path = if snapshot.virtualized {
            virtual_path(&snapshot.file_path, snapshot.script_kind)
        } else {
            snapshot.file_path.clone()
        };
        let items = ctx.scope.oracle.diagnostics(&oracle_path, ctx.token).await?;
        Ok(items
            .into_iter()
            .filter_map(|d| {
                // Spans in synthetic boilerplate have no original counterpart
                let range = original_range(&snapshot, d.span)?;
                Some(Diagnostic {
                    range,
                    severity: Some(severity(d.severity)),
                    code: d.code.map(NumberOrString::String),
                    source: Some("triptych/ts".to_string()),
                    message: d.message,
                    ..Default::default()
                })
            })
            .collect())
    }

    async fn definition(
        &self,
        ctx: &PluginContext<'_>,
    ) -> PluginResult<Option<Vec<LocationLink>>> {
        let Some(target) = target(ctx) else {
            return Ok(None);
        };
        let locations = ctx
            .scope
            .oracle
            .definitions(&target.oracle_path, target.generated_offset, ctx.token)
            .await?;
        let origin = word_range_at(ctx.text, ctx.offset);
        let links: Vec<LocationLink> = locations
            .into_iter()
            .filter_map(|loc| {
                let location = original_location(ctx.scope, &loc.path, loc.span)?;
                Some(LocationLink {
                    origin_selection_range: origin,
                    target_uri: location.uri,
                    target_range: location.range,
                    target_selection_range: location.range,
                })
            })
            .collect();
        Ok((!links.is_empty()).then_some(links))
    }

    async fn references(&self, ctx: &PluginContext<'_>) -> PluginResult<Option<Vec<Location>>> {
        let Some(target) = target(ctx) else {
            return Ok(None);
        };
        let locations = ctx
            .scope
            .oracle
            .references(&target.oracle_path, target.generated_offset, ctx.token)
            .await?;
        let mapped: Vec<Location> = locations
            .into_iter()
            .filter_map(|loc| original_location(ctx.scope, &loc.path, loc.span))
            .collect();
        Ok((!mapped.is_empty()).then_some(mapped))
    }

    async fn document_symbols(
        &self,
        ctx: &PluginContext<'_>,
    ) -> PluginResult<Vec<DocumentSymbol>> {
        let Some(snapshot) = ctx
            .snapshot
            .cloned()
            .or_else(|| ctx.scope.snapshots.get(ctx.path))
        else {
            return Ok(Vec::new());
        };
        let oracle_path = if snapshot.virtualized {
            virtual_path(&snapshot.file_path, snapshot.script_kind)
        } else {
            snapshot.file_path.clone()
        };
        let symbols = ctx
            .scope
            .oracle
            .document_symbols(&oracle_path, ctx.token)
            .await?;
        Ok(symbols
            .iter()
            .filter_map(|s| symbol(&snapshot, s))
            .collect())
    }

    async fn prepare_rename(&self, ctx: &PluginContext<'_>) -> PluginResult<Option<Range>> {
        // Renameable iff the position reaches the oracle's coordinate space
        if target(ctx).is_none() {
            return Ok(None);
        }
        Ok(word_range_at(ctx.text, ctx.offset))
    }

    async fn rename(
        &self,
        ctx: &PluginContext<'_>,
        new_name: &str,
    ) -> PluginResult<Option<WorkspaceEdit>> {
        let Some(target) = target(ctx) else {
            return Ok(None);
        };
        let edits = ctx
            .scope
            .oracle
            .rename_edits(
                &target.oracle_path,
                target.generated_offset,
                new_name,
                ctx.token,
            )
            .await?;
        if edits.is_empty() {
            return Ok(None);
        }
        let mut changes: HashMap<Url, Vec<TextEdit>> = HashMap::new();
        for edit in edits {
            let Some(location) = original_location(ctx.scope, &edit.path, edit.span) else {
                // One unmappable edit poisons the whole rename; applying the
                // rest would corrupt the workspace
                return Err(PluginError::Failed(format!(
                    "rename edit in {} does not map back to source",
                    edit.path.display()
                )));
            };
            changes.entry(location.uri).or_default().push(TextEdit {
                range: location.range,
                new_text: edit.new_text,
            });
        }
        Ok(Some(WorkspaceEdit {
            changes: Some(changes),
            document_changes: None::<DocumentChanges>,
            change_annotations: None,
        }))
    }

    async fn signature_help(
        &self,
        ctx: &PluginContext<'_>,
    ) -> PluginResult<Option<SignatureHelp>> {
        let Some(target) = target(ctx) else {
            return Ok(None);
        };
        let help = ctx
            .scope
            .oracle
            .signature_help(&target.oracle_path, target.generated_offset, ctx.token)
            .await?;
        Ok(help.map(|h| SignatureHelp {
            signatures: h
                .signatures
                .into_iter()
                .map(|s| SignatureInformation {
                    label: s.label,
                    documentation: s.documentation.map(|d| {
                        tower_lsp::lsp_types::Documentation::MarkupContent(MarkupContent {
                            kind: MarkupKind::Markdown,
                            value: d,
                        })
                    }),
                    parameters: Some(
                        s.parameters
                            .into_iter()
                            .map(|p| ParameterInformation {
                                label: ParameterLabel::Simple(p),
                                documentation: None,
                            })
                            .collect(),
                    ),
                    active_parameter: None,
                })
                .collect(),
            active_signature: Some(h.active_signature),
            active_parameter: Some(h.active_parameter),
        }))
    }
}
