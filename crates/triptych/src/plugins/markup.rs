//! Markup-region features: block structure folding and symbols, block
//! snippets, tag completions, and scanner irregularity diagnostics.

use async_trait::async_trait;
use tower_lsp::lsp_types::{
    CompletionItem, CompletionItemKind, Diagnostic, DiagnosticSeverity, Documentation,
    DocumentSymbol, FoldingRange, FoldingRangeKind, Hover, HoverContents, InsertTextFormat,
    MarkupContent, MarkupKind, Position, Range, SymbolKind,
};

use triptych_atlas::position::{offset_to_position_str, span_to_range};
use triptych_atlas::TextSpan;
use triptych_calque::{BlockKind, ScanIrregularity, TagInformation};

use crate::host::{
    tag_opening_context, CapabilitySet, Plugin, PluginContext, PluginResult, MARKUP_PLUGIN,
};

const COMMON_TAGS: &[&str] = &[
    "div", "span", "p", "a", "ul", "ol", "li", "h1", "h2", "h3", "button", "input", "img",
    "form", "label", "section", "article", "header", "footer", "main", "nav", "table",
];

pub struct MarkupPlugin;

impl MarkupPlugin {
    pub fn new() -> Self {
        Self
    }

    fn block_fold(text: &str, container: TextSpan, kind: FoldingRangeKind) -> Option<FoldingRange> {
        let range = span_to_range(text, container)?;
        if range.end.line <= range.start.line {
            return None;
        }
        Some(FoldingRange {
            start_line: range.start.line,
            end_line: range.end.line,
            kind: Some(kind),
            ..Default::default()
        })
    }

    #[allow(deprecated)]
    fn block_symbol(
        text: &str,
        name: &str,
        kind: SymbolKind,
        detail: Option<String>,
        container: TextSpan,
    ) -> Option<DocumentSymbol> {
        let range = span_to_range(text, container)?;
        let selection_end = Position {
            line: range.start.line,
            character: range.start.character + name.len() as u32 + 1,
        };
        Some(DocumentSymbol {
            name: name.to_string(),
            detail,
            kind,
            tags: None,
            deprecated: None,
            range,
            selection_range: Range {
                start: range.start,
                end: selection_end,
            },
            children: None,
        })
    }

    fn tag_completions() -> Vec<CompletionItem> {
        COMMON_TAGS
            .iter()
            .map(|tag| CompletionItem {
                label: tag.to_string(),
                kind: Some(CompletionItemKind::PROPERTY),
                detail: Some("HTML element".to_string()),
                ..Default::default()
            })
            .collect()
    }

    fn block_snippets(ctx: &PluginContext<'_>) -> Vec<CompletionItem> {
        let mut items = vec![
            snippet_item(
                "script",
                "Add a script block",
                "<script>\n\t$0\n</script>",
                "**`<script>`**\n\nModule-scope script for this document. Use `lang=\"js\"` for plain JavaScript.",
            ),
            snippet_item(
                "style",
                "Add a style block",
                "<style>\n\t$0\n</style>",
                "**`<style>`**\n\nStyles scoped to this document.",
            ),
        ];
        if ctx.inventory.frontmatter.is_none() && ctx.offset == 0 {
            items.push(snippet_item(
                "frontmatter",
                "Add a frontmatter fence",
                "---\n$0\n---",
                "**Frontmatter**\n\nMetadata fenced by `---` lines at the top of the document.",
            ));
        }
        items
    }

    fn block_hover(text: &str, tag: &TagInformation, name: &str, body: &str) -> Option<Hover> {
        let range = span_to_range(text, tag.container)?;
        Some(Hover {
            contents: HoverContents::Markup(MarkupContent {
                kind: MarkupKind::Markdown,
                value: format!("**`<{name}>`**\n\n{body}"),
            }),
            range: Some(range),
        })
    }

    /// Offset sits on the element's tags rather than inside its content.
    fn on_tag_of(tag: &TagInformation, offset: u32) -> bool {
        tag.container.contains(offset) && !(offset >= tag.start && offset < tag.end)
    }
}

impl Default for MarkupPlugin {
    fn default() -> Self {
        Self::new()
    }
}

fn snippet_item(label: &str, detail: &str, snippet: &str, docs: &str) -> CompletionItem {
    CompletionItem {
        label: label.to_string(),
        kind: Some(CompletionItemKind::SNIPPET),
        detail: Some(detail.to_string()),
        insert_text: Some(snippet.to_string()),
        insert_text_format: Some(InsertTextFormat::SNIPPET),
        documentation: Some(Documentation::MarkupContent(MarkupContent {
            kind: MarkupKind::Markdown,
            value: docs.to_string(),
        })),
        ..Default::default()
    }
}

fn irregularity_range(text: &str, at: u32) -> Range {
    let start = offset_to_position_str(text, at as usize).unwrap_or(Position {
        line: 0,
        character: 0,
    });
    let line_rest = text[(at as usize).min(text.len())..]
        .find('\n')
        .unwrap_or(text.len() - (at as usize).min(text.len()));
    let end = offset_to_position_str(text, at as usize + line_rest).unwrap_or(start);
    Range { start, end }
}

#[async_trait]
impl Plugin for MarkupPlugin {
    fn name(&self) -> &'static str {
        MARKUP_PLUGIN
    }

    fn capabilities(&self) -> CapabilitySet {
        CapabilitySet::HOVER
            | CapabilitySet::COMPLETIONS
            | CapabilitySet::DIAGNOSTICS
            | CapabilitySet::FOLDING
            | CapabilitySet::SYMBOLS
    }

    async fn hover(&self, ctx: &PluginContext<'_>) -> PluginResult<Option<Hover>> {
        for script in &ctx.inventory.scripts {
            if Self::on_tag_of(script, ctx.offset) {
                return Ok(Self::block_hover(
                    ctx.text,
                    script,
                    "script",
                    "Module-scope script block. Its content is type-checked together with the markup expressions.",
                ));
            }
        }
        for style in &ctx.inventory.styles {
            if Self::on_tag_of(style, ctx.offset) {
                return Ok(Self::block_hover(
                    ctx.text,
                    style,
                    "style",
                    "Style block scoped to this document.",
                ));
            }
        }
        if let Some(frontmatter) = &ctx.inventory.frontmatter {
            if Self::on_tag_of(frontmatter, ctx.offset) {
                let range = span_to_range(ctx.text, frontmatter.container);
                return Ok(Some(Hover {
                    contents: HoverContents::Markup(MarkupContent {
                        kind: MarkupKind::Markdown,
                        value: "**Frontmatter**\n\nDocument metadata fenced by `---` lines."
                            .to_string(),
                    }),
                    range,
                }));
            }
        }
        Ok(None)
    }

    async fn completions(&self, ctx: &PluginContext<'_>) -> PluginResult<Vec<CompletionItem>> {
        if ctx.inventory.block_at(ctx.offset) != BlockKind::Markup {
            return Ok(Vec::new());
        }
        if tag_opening_context(ctx.text, ctx.offset) {
            return Ok(Self::tag_completions());
        }
        Ok(Self::block_snippets(ctx))
    }

    async fn diagnostics(&self, ctx: &PluginContext<'_>) -> PluginResult<Vec<Diagnostic>> {
        let items = ctx
            .inventory
            .irregularities
            .iter()
            .map(|irregularity| {
                let at = match irregularity {
                    ScanIrregularity::UnterminatedBlock { at, .. } => *at,
                    ScanIrregularity::UnterminatedFrontmatter { at } => *at,
                };
                Diagnostic {
                    range: irregularity_range(ctx.text, at),
                    severity: Some(DiagnosticSeverity::ERROR),
                    source: Some("triptych".to_string()),
                    message: irregularity.to_string(),
                    ..Default::default()
                }
            })
            .collect();
        Ok(items)
    }

    async fn folding_ranges(&self, ctx: &PluginContext<'_>) -> PluginResult<Vec<FoldingRange>> {
        let mut ranges = Vec::new();
        if let Some(frontmatter) = &ctx.inventory.frontmatter {
            ranges.extend(Self::block_fold(
                ctx.text,
                frontmatter.container,
                FoldingRangeKind::Comment,
            ));
        }
        for script in &ctx.inventory.scripts {
            ranges.extend(Self::block_fold(
                ctx.text,
                script.container,
                FoldingRangeKind::Region,
            ));
        }
        for style in &ctx.inventory.styles {
            ranges.extend(Self::block_fold(
                ctx.text,
                style.container,
                FoldingRangeKind::Region,
            ));
        }
        Ok(ranges)
    }

    async fn document_symbols(
        &self,
        ctx: &PluginContext<'_>,
    ) -> PluginResult<Vec<DocumentSymbol>> {
        let mut symbols = Vec::new();
        if let Some(frontmatter) = &ctx.inventory.frontmatter {
            symbols.extend(Self::block_symbol(
                ctx.text,
                "frontmatter",
                SymbolKind::OBJECT,
                None,
                frontmatter.container,
            ));
        }
        for script in &ctx.inventory.scripts {
            symbols.extend(Self::block_symbol(
                ctx.text,
                "script",
                SymbolKind::MODULE,
                script.lang().map(|l| l.to_string()),
                script.container,
            ));
        }
        for style in &ctx.inventory.styles {
            symbols.extend(Self::block_symbol(
                ctx.text,
                "style",
                SymbolKind::MODULE,
                style.lang().map(|l| l.to_string()),
                style.container,
            ));
        }
        Ok(symbols)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;
    use std::sync::atomic::AtomicU64;
    use std::sync::Arc;
    use tokio_util::sync::CancellationToken;
    use tower_lsp::lsp_types::Url;
    use triptych_calque::scan;

    use crate::oracle::{OracleScope, StubOracle};
    use crate::resolve::VirtualFs;
    use crate::snapshot::{ScopedSnapshots, SnapshotRegistry};

    fn test_scope() -> OracleScope {
        let snapshots = Arc::new(SnapshotRegistry::new());
        OracleScope::new(
            PathBuf::from("/ws"),
            Arc::new(StubOracle::new()),
            ScopedSnapshots::new(snapshots.clone()),
            Arc::new(VirtualFs::new(snapshots)),
            Arc::new(AtomicU64::new(0)),
        )
    }

    async fn run<F, T>(text: &str, offset: u32, call: F) -> T
    where
        F: for<'a> FnOnce(
            &'a MarkupPlugin,
            &'a PluginContext<'a>,
        )
            -> std::pin::Pin<Box<dyn std::future::Future<Output = T> + 'a>>,
    {
        let plugin = MarkupPlugin::new();
        let uri = Url::parse("file:///t.tri").unwrap();
        let path = PathBuf::from("/t.tri");
        let inventory = scan(text);
        let scope = test_scope();
        let token = CancellationToken::new();
        let ctx = PluginContext {
            uri: &uri,
            path: &path,
            text,
            offset,
            inventory: &inventory,
            snapshot: None,
            scope: &scope,
            token: &token,
        };
        call(&plugin, &ctx).await
    }

    #[tokio::test]
    async fn test_folding_covers_blocks_and_frontmatter() {
        let text = "---\ntitle: x\n---\n<script>\nlet a = 1;\n</script>\n<p>hi</p>\n";
        let ranges = run(text, 0, |p, ctx| Box::pin(p.folding_ranges(ctx)))
            .await
            .unwrap();

        assert_eq!(ranges.len(), 2);
        assert_eq!(ranges[0].kind, Some(FoldingRangeKind::Comment));
        assert_eq!((ranges[0].start_line, ranges[0].end_line), (0, 2));
        assert_eq!(ranges[1].kind, Some(FoldingRangeKind::Region));
        assert_eq!((ranges[1].start_line, ranges[1].end_line), (3, 5));
    }

    #[tokio::test]
    async fn test_symbols_name_each_region() {
        let text = "---\nt: 1\n---\n<script>let a = 1;</script>\n<style>p { }</style>\n";
        let symbols = run(text, 0, |p, ctx| Box::pin(p.document_symbols(ctx)))
            .await
            .unwrap();

        let names: Vec<_> = symbols.iter().map(|s| s.name.as_str()).collect();
        assert_eq!(names, vec!["frontmatter", "script", "style"]);
    }

    #[tokio::test]
    async fn test_tag_completions_in_opening_context() {
        let text = "<p>hello</p>\n<di";
        let items = run(text, text.len() as u32, |p, ctx| {
            Box::pin(p.completions(ctx))
        })
        .await
        .unwrap();

        assert!(items.iter().any(|i| i.label == "div"));
        assert!(items.iter().all(|i| i.insert_text_format.is_none()));
    }

    #[tokio::test]
    async fn test_snippets_outside_tags() {
        let text = "<p>hello</p>\n";
        let items = run(text, 13, |p, ctx| Box::pin(p.completions(ctx)))
            .await
            .unwrap();

        let labels: Vec<_> = items.iter().map(|i| i.label.as_str()).collect();
        assert!(labels.contains(&"script"));
        assert!(labels.contains(&"style"));
    }

    #[tokio::test]
    async fn test_no_completions_inside_script_content() {
        let text = "<script>let a = 1;</script>\n";
        let items = run(text, 12, |p, ctx| Box::pin(p.completions(ctx)))
            .await
            .unwrap();
        assert!(items.is_empty());
    }

    #[tokio::test]
    async fn test_hover_on_script_tag_only() {
        let text = "<script>let a = 1;</script>\n";
        let on_tag = run(text, 2, |p, ctx| Box::pin(p.hover(ctx))).await.unwrap();
        assert!(on_tag.is_some());

        let in_content = run(text, 12, |p, ctx| Box::pin(p.hover(ctx)))
            .await
            .unwrap();
        assert!(in_content.is_none());
    }

    #[tokio::test]
    async fn test_unterminated_block_becomes_diagnostic() {
        let text = "<style>\np { color: red }\n";
        let diagnostics = run(text, 0, |p, ctx| Box::pin(p.diagnostics(ctx)))
            .await
            .unwrap();

        assert_eq!(diagnostics.len(), 1);
        assert!(diagnostics[0].message.contains("never closed"));
        assert_eq!(diagnostics[0].severity, Some(DiagnosticSeverity::ERROR));
        assert_eq!(diagnostics[0].range.start.line, 0);
    }
}
