//! Template-directive completions for the markup regions.
//!
//! Two families: brace directives (`{#if ...}`, `{:else}`, `{/if}`, `{@html
//! ...}`) offered right after an opening brace, and attribute directives
//! (`on:`, `bind:` ...) offered in the attribute area of an open tag.

use async_trait::async_trait;
use tower_lsp::lsp_types::{
    CompletionItem, CompletionItemKind, Documentation, InsertTextFormat, MarkupContent,
    MarkupKind,
};

use triptych_calque::BlockKind;

use crate::host::{CapabilitySet, Plugin, PluginContext, PluginResult, DIRECTIVE_PLUGIN};

const BRACE_DIRECTIVES: &[(&str, &str, &str)] = &[
    ("#if", "#if ${1:condition}}\n\t$0\n{/if", "Render a branch when the condition holds."),
    ("#each", "#each ${1:items} as ${2:item}}\n\t$0\n{/each", "Iterate over a list."),
    (
        "#await",
        "#await ${1:promise}}\n\t$0\n{/await",
        "Branch on a promise's pending/resolved/rejected states.",
    ),
    (":else", ":else}", "Alternative branch of an `{#if}` or `{#each}` block."),
    (":else if", ":else if ${1:condition}}", "Chained conditional branch."),
    (":then", ":then ${1:value}}", "Resolved branch of an `{#await}` block."),
    (":catch", ":catch ${1:error}}", "Rejected branch of an `{#await}` block."),
    ("/if", "/if}", "Close an `{#if}` block."),
    ("/each", "/each}", "Close an `{#each}` block."),
    ("/await", "/await}", "Close an `{#await}` block."),
    ("@html", "@html ${1:expression}}", "Insert raw HTML from an expression."),
    ("@const", "@const ${1:name} = ${2:expression}}", "Bind a local constant."),
];

const ATTRIBUTE_DIRECTIVES: &[(&str, &str)] = &[
    ("on:", "Attach an event listener, e.g. `on:click={handler}`."),
    ("bind:", "Two-way binding to a property, e.g. `bind:value={name}`."),
    ("class:", "Toggle a class from an expression, e.g. `class:active={isActive}`."),
    ("style:", "Set an inline style from an expression."),
    ("use:", "Attach an action to the element."),
];

/// Whether `offset` sits right after an opening brace, optionally with a
/// partial directive head already typed. A partial without a directive
/// marker is a plain `{expr}` group, not a directive.
fn brace_directive_context(text: &str, offset: u32) -> bool {
    let bytes = &text.as_bytes()[..(offset as usize).min(text.len())];
    for i in (0..bytes.len()).rev() {
        match bytes[i] {
            b'{' => {
                let partial = &bytes[i + 1..];
                let Some((&head, rest)) = partial.split_first() else {
                    return true;
                };
                return matches!(head, b'#' | b':' | b'/' | b'@')
                    && rest.iter().all(u8::is_ascii_alphanumeric);
            }
            b'}' | b'\n' => return false,
            _ => {}
        }
    }
    false
}

/// Whether `offset` sits in the attribute area of an open tag: after the tag
/// name and at least one whitespace byte, before the closing `>`.
fn attribute_area_context(text: &str, offset: u32) -> bool {
    let bytes = &text.as_bytes()[..(offset as usize).min(text.len())];
    let mut seen_whitespace = false;
    for i in (0..bytes.len()).rev() {
        match bytes[i] {
            b'<' => {
                // A closing tag has no attribute area
                return seen_whitespace && bytes.get(i + 1) != Some(&b'/');
            }
            b'>' => return false,
            b if b.is_ascii_whitespace() => seen_whitespace = true,
            _ => {}
        }
    }
    false
}

pub struct DirectivePlugin;

impl DirectivePlugin {
    pub fn new() -> Self {
        Self
    }

    fn brace_items() -> Vec<CompletionItem> {
        BRACE_DIRECTIVES
            .iter()
            .map(|(label, snippet, docs)| CompletionItem {
                label: label.to_string(),
                kind: Some(CompletionItemKind::KEYWORD),
                detail: Some("template directive".to_string()),
                insert_text: Some(snippet.to_string()),
                insert_text_format: Some(InsertTextFormat::SNIPPET),
                documentation: Some(Documentation::MarkupContent(MarkupContent {
                    kind: MarkupKind::Markdown,
                    value: docs.to_string(),
                })),
                ..Default::default()
            })
            .collect()
    }

    fn attribute_items() -> Vec<CompletionItem> {
        ATTRIBUTE_DIRECTIVES
            .iter()
            .map(|(label, docs)| CompletionItem {
                label: label.to_string(),
                kind: Some(CompletionItemKind::KEYWORD),
                detail: Some("attribute directive".to_string()),
                documentation: Some(Documentation::MarkupContent(MarkupContent {
                    kind: MarkupKind::Markdown,
                    value: docs.to_string(),
                })),
                ..Default::default()
            })
            .collect()
    }
}

impl Default for DirectivePlugin {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Plugin for DirectivePlugin {
    fn name(&self) -> &'static str {
        DIRECTIVE_PLUGIN
    }

    fn capabilities(&self) -> CapabilitySet {
        CapabilitySet::COMPLETIONS
    }

    async fn completions(&self, ctx: &PluginContext<'_>) -> PluginResult<Vec<CompletionItem>> {
        if ctx.inventory.block_at(ctx.offset) != BlockKind::Markup {
            return Ok(Vec::new());
        }
        if brace_directive_context(ctx.text, ctx.offset) {
            return Ok(Self::brace_items());
        }
        if attribute_area_context(ctx.text, ctx.offset) {
            return Ok(Self::attribute_items());
        }
        Ok(Vec::new())
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

    async fn complete(text: &str, offset: u32) -> Vec<CompletionItem> {
        let plugin = DirectivePlugin::new();
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
        plugin.completions(&ctx).await.unwrap()
    }

    #[test]
    fn test_brace_directive_context_detection() {
        assert!(brace_directive_context("<p>{", 4));
        assert!(brace_directive_context("<p>{#i", 6));
        assert!(brace_directive_context("<p>{:el", 7));
        assert!(!brace_directive_context("<p>{count ", 10));
        assert!(!brace_directive_context("<p>text", 7));
        assert!(!brace_directive_context("{x} ", 4));
    }

    #[test]
    fn test_attribute_area_context_detection() {
        assert!(attribute_area_context("<button ", 8));
        assert!(attribute_area_context("<button on:cl", 13));
        assert!(attribute_area_context("<Widget a=\"1\" ", 14));
        assert!(!attribute_area_context("<button", 7));
        assert!(!attribute_area_context("<button>cl", 10));
        assert!(!attribute_area_context("</button ", 9));
        assert!(!attribute_area_context("plain text", 6));
    }

    #[tokio::test]
    async fn test_brace_directives_offered_after_brace() {
        let items = complete("<p>{#", 5).await;
        let labels: Vec<_> = items.iter().map(|i| i.label.as_str()).collect();
        assert!(labels.contains(&"#if"));
        assert!(labels.contains(&"/each"));
        assert!(labels.contains(&"@html"));
    }

    #[tokio::test]
    async fn test_attribute_directives_in_open_tag() {
        let items = complete("<button on", 10).await;
        let labels: Vec<_> = items.iter().map(|i| i.label.as_str()).collect();
        assert_eq!(labels, vec!["on:", "bind:", "class:", "style:", "use:"]);
    }

    #[tokio::test]
    async fn test_silent_outside_markup() {
        let text = "<script>let a = {};</script>\n";
        let items = complete(text, 17).await;
        assert!(items.is_empty());
    }

    #[tokio::test]
    async fn test_silent_in_plain_expression() {
        let items = complete("<p>{count", 9).await;
        assert!(items.is_empty());
    }
}
