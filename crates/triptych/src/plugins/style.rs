//! Style-region features: color decorators, rule folding, and a small CSS
//! property completion table.

use async_trait::async_trait;
use tower_lsp::lsp_types::{
    Color, ColorInformation, CompletionItem, CompletionItemKind, FoldingRange, FoldingRangeKind,
    Range,
};

use triptych_atlas::position::{offset_to_position_str, span_to_range};
use triptych_atlas::TextSpan;
use triptych_calque::{BlockKind, TagInformation};

use crate::host::{CapabilitySet, Plugin, PluginContext, PluginResult, STYLE_PLUGIN};

const CSS_PROPERTIES: &[&str] = &[
    "align-items",
    "background",
    "background-color",
    "border",
    "border-radius",
    "color",
    "cursor",
    "display",
    "flex",
    "flex-direction",
    "font-family",
    "font-size",
    "font-weight",
    "gap",
    "height",
    "justify-content",
    "line-height",
    "margin",
    "opacity",
    "overflow",
    "padding",
    "position",
    "text-align",
    "transform",
    "transition",
    "width",
    "z-index",
];

pub struct StylePlugin;

impl StylePlugin {
    pub fn new() -> Self {
        Self
    }

    fn property_completions() -> Vec<CompletionItem> {
        CSS_PROPERTIES
            .iter()
            .map(|property| CompletionItem {
                label: property.to_string(),
                kind: Some(CompletionItemKind::PROPERTY),
                insert_text: Some(format!("{property}: ")),
                detail: Some("CSS property".to_string()),
                ..Default::default()
            })
            .collect()
    }

    /// Colors written inside one style block's content.
    fn block_colors(text: &str, style: &TagInformation<'_>) -> Vec<ColorInformation> {
        let content = style.content_str(text);
        let mut colors = Vec::new();
        let bytes = content.as_bytes();
        let mut i = 0usize;
        while i < bytes.len() {
            match bytes[i] {
                b'#' => {
                    if let Some((color, len)) = parse_hex_color(&content[i..]) {
                        colors.extend(color_at(text, style.start + i as u32, len as u32, color));
                        i += len;
                        continue;
                    }
                    i += 1;
                }
                b'r' => {
                    if let Some((color, len)) = parse_rgb_color(&content[i..]) {
                        colors.extend(color_at(text, style.start + i as u32, len as u32, color));
                        i += len;
                        continue;
                    }
                    i += 1;
                }
                _ => i += 1,
            }
        }
        colors
    }

    /// Fold every multi-line brace pair inside one style block.
    fn block_rule_folds(text: &str, style: &TagInformation<'_>) -> Vec<FoldingRange> {
        let content = style.content_str(text);
        let mut stack = Vec::new();
        let mut folds = Vec::new();
        for (i, byte) in content.bytes().enumerate() {
            match byte {
                b'{' => stack.push(style.start as usize + i),
                b'}' => {
                    if let Some(open) = stack.pop() {
                        let close = style.start as usize + i;
                        if let Some(range) =
                            span_to_range(text, TextSpan::new(open as u32, close as u32))
                        {
                            if range.end.line > range.start.line {
                                folds.push(FoldingRange {
                                    start_line: range.start.line,
                                    end_line: range.end.line,
                                    kind: Some(FoldingRangeKind::Region),
                                    ..Default::default()
                                });
                            }
                        }
                    }
                }
                _ => {}
            }
        }
        folds.sort_by_key(|f| f.start_line);
        folds
    }
}

impl Default for StylePlugin {
    fn default() -> Self {
        Self::new()
    }
}

fn color_at(text: &str, start: u32, len: u32, color: Color) -> Option<ColorInformation> {
    let range = Range {
        start: offset_to_position_str(text, start as usize)?,
        end: offset_to_position_str(text, (start + len) as usize)?,
    };
    Some(ColorInformation { range, color })
}

/// `#rgb` or `#rrggbb` at the start of `rest`. Longer hex runs (e.g. 8-digit
/// hashes) are not colors here.
fn parse_hex_color(rest: &str) -> Option<(Color, usize)> {
    let hex: &str = rest
        .get(1..)
        .map(|r| &r[..r.bytes().take_while(u8::is_ascii_hexdigit).count()])?;
    let (r, g, b) = match hex.len() {
        3 => (
            duplicate_nibble(&hex[0..1])?,
            duplicate_nibble(&hex[1..2])?,
            duplicate_nibble(&hex[2..3])?,
        ),
        6 => (
            u8::from_str_radix(&hex[0..2], 16).ok()?,
            u8::from_str_radix(&hex[2..4], 16).ok()?,
            u8::from_str_radix(&hex[4..6], 16).ok()?,
        ),
        _ => return None,
    };
    Some((
        Color {
            red: r as f32 / 255.0,
            green: g as f32 / 255.0,
            blue: b as f32 / 255.0,
            alpha: 1.0,
        },
        1 + hex.len(),
    ))
}

fn duplicate_nibble(digit: &str) -> Option<u8> {
    let n = u8::from_str_radix(digit, 16).ok()?;
    Some(n * 16 + n)
}

/// `rgb(r, g, b)` with decimal components at the start of `rest`.
fn parse_rgb_color(rest: &str) -> Option<(Color, usize)> {
    let args = rest.strip_prefix("rgb(")?;
    let close = args.find(')')?;
    let mut components = args[..close].split(',').map(str::trim);
    let r: u8 = components.next()?.parse().ok()?;
    let g: u8 = components.next()?.parse().ok()?;
    let b: u8 = components.next()?.parse().ok()?;
    if components.next().is_some() {
        return None;
    }
    Some((
        Color {
            red: r as f32 / 255.0,
            green: g as f32 / 255.0,
            blue: b as f32 / 255.0,
            alpha: 1.0,
        },
        4 + close + 1,
    ))
}

#[async_trait]
impl Plugin for StylePlugin {
    fn name(&self) -> &'static str {
        STYLE_PLUGIN
    }

    fn capabilities(&self) -> CapabilitySet {
        CapabilitySet::COMPLETIONS | CapabilitySet::FOLDING | CapabilitySet::COLORS
    }

    async fn completions(&self, ctx: &PluginContext<'_>) -> PluginResult<Vec<CompletionItem>> {
        if ctx.inventory.block_at(ctx.offset) != BlockKind::Style {
            return Ok(Vec::new());
        }
        let Some(style) = ctx.inventory.style_at(ctx.offset) else {
            return Ok(Vec::new());
        };
        // Only inside the content, never on the tags themselves
        if !style.content_span().contains(ctx.offset) && ctx.offset != style.end {
            return Ok(Vec::new());
        }
        Ok(Self::property_completions())
    }

    async fn folding_ranges(&self, ctx: &PluginContext<'_>) -> PluginResult<Vec<FoldingRange>> {
        let mut folds = Vec::new();
        for style in &ctx.inventory.styles {
            folds.extend(Self::block_rule_folds(ctx.text, style));
        }
        Ok(folds)
    }

    async fn document_colors(
        &self,
        ctx: &PluginContext<'_>,
    ) -> PluginResult<Vec<ColorInformation>> {
        let mut colors = Vec::new();
        for style in &ctx.inventory.styles {
            colors.extend(Self::block_colors(ctx.text, style));
        }
        Ok(colors)
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
            &'a StylePlugin,
            &'a PluginContext<'a>,
        )
            -> std::pin::Pin<Box<dyn std::future::Future<Output = T> + 'a>>,
    {
        let plugin = StylePlugin::new();
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

    #[test]
    fn test_parse_hex_colors() {
        let (white, len) = parse_hex_color("#fff;").unwrap();
        assert_eq!(len, 4);
        assert_eq!((white.red, white.green, white.blue), (1.0, 1.0, 1.0));

        let (red, len) = parse_hex_color("#ff0000 ").unwrap();
        assert_eq!(len, 7);
        assert_eq!((red.red, red.green, red.blue), (1.0, 0.0, 0.0));

        assert!(parse_hex_color("#ff00").is_none());
        assert!(parse_hex_color("#gg0").is_none());
    }

    #[test]
    fn test_parse_rgb_color() {
        let (c, len) = parse_rgb_color("rgb(255, 0, 128) x").unwrap();
        assert_eq!(len, 16);
        assert_eq!(c.red, 1.0);
        assert_eq!(c.blue, 128.0 / 255.0);

        assert!(parse_rgb_color("rgb(1, 2)").is_none());
        assert!(parse_rgb_color("rgb(300, 0, 0)").is_none());
    }

    #[tokio::test]
    async fn test_colors_found_only_in_style_blocks() {
        let text = "<p>#fff</p>\n<style>\np { color: #ff0000; background: rgb(0, 0, 255) }\n</style>\n";
        let colors = run(text, 0, |p, ctx| Box::pin(p.document_colors(ctx)))
            .await
            .unwrap();

        assert_eq!(colors.len(), 2);
        assert_eq!(colors[0].color.red, 1.0);
        assert_eq!(colors[1].color.blue, 1.0);
        // Both sit on the style content line
        assert!(colors.iter().all(|c| c.range.start.line == 2));
    }

    #[tokio::test]
    async fn test_rule_folding_spans_braces() {
        let text = "<style>\np {\n  color: red;\n}\n</style>\n";
        let folds = run(text, 0, |p, ctx| Box::pin(p.folding_ranges(ctx)))
            .await
            .unwrap();

        assert_eq!(folds.len(), 1);
        assert_eq!((folds[0].start_line, folds[0].end_line), (1, 3));
    }

    #[tokio::test]
    async fn test_property_completions_inside_style_content() {
        let text = "<style>\np { col }\n</style>\n";
        let items = run(text, 12, |p, ctx| Box::pin(p.completions(ctx)))
            .await
            .unwrap();
        assert!(items.iter().any(|i| i.label == "color"));

        // Nothing in markup
        let markup = "<p>x</p>\n";
        let items = run(markup, 4, |p, ctx| Box::pin(p.completions(ctx)))
            .await
            .unwrap();
        assert!(items.is_empty());
    }
}
