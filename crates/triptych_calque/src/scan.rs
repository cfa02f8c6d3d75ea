//! Top-level block scanner for triptych documents.
//!
//! Zero-copy design with byte-level operations. The scanner finds the
//! frontmatter fence and every top-level `<script>`/`<style>` element,
//! leaving the gaps between them as markup. It never fails: malformed input
//! degrades to best-effort regions plus a recorded irregularity.

use std::borrow::Cow;

use lsp_types::Position;
use memchr::{memchr, memmem};
use rustc_hash::FxHashMap;
use triptych_atlas::position::offset_to_position_str;
use triptych_atlas::TextSpan;

// Static closing tags for fast comparison
const CLOSING_SCRIPT: &[u8] = b"</script>";
const CLOSING_STYLE: &[u8] = b"</style>";

// Tag name bytes for fast comparison
const TAG_SCRIPT: &[u8] = b"script";
const TAG_STYLE: &[u8] = b"style";

/// HTML elements that never carry children.
pub static VOID_ELEMENTS: phf::Set<&'static str> = phf::phf_set! {
    "area", "base", "br", "col", "embed", "hr", "img", "input", "link",
    "meta", "param", "source", "track", "wbr",
};

/// One extracted region: a script block, style block, or the frontmatter.
///
/// `start`/`end` bound the content; `container` bounds the whole element
/// including its tags (for frontmatter, the fences are the first and last
/// three bytes of the container).
#[derive(Debug, Clone)]
pub struct TagInformation<'a> {
    pub start: u32,
    pub end: u32,
    pub start_pos: Position,
    pub end_pos: Position,
    pub attributes: FxHashMap<Cow<'a, str>, Cow<'a, str>>,
    pub container: TextSpan,
}

impl<'a> TagInformation<'a> {
    pub fn content_span(&self) -> TextSpan {
        TextSpan::new(self.start, self.end)
    }

    pub fn content_str<'s>(&self, source: &'s str) -> &'s str {
        &source[self.start as usize..self.end as usize]
    }

    pub fn lang(&self) -> Option<&str> {
        self.attributes.get("lang").map(|v| v.as_ref())
    }
}

/// Script language of a block or document, from the `lang` attribute.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum ScriptKind {
    #[default]
    Ts,
    Js,
}

impl ScriptKind {
    pub fn from_lang(lang: Option<&str>) -> Self {
        match lang {
            Some("js") | Some("javascript") => ScriptKind::Js,
            _ => ScriptKind::Ts,
        }
    }

    /// Extension of the generated projection for this kind.
    pub fn virtual_extension(&self) -> &'static str {
        match self {
            ScriptKind::Ts => "tsx",
            ScriptKind::Js => "jsx",
        }
    }
}

/// Region kind at a given offset.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockKind {
    Frontmatter,
    Script,
    Style,
    Markup,
}

/// Something the scanner had to paper over. Scanning still succeeds; these
/// surface as document-level diagnostics downstream.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ScanIrregularity {
    #[error("<{tag}> block at offset {at} is never closed")]
    UnterminatedBlock { tag: String, at: u32 },
    #[error("frontmatter fence at offset {at} is never closed")]
    UnterminatedFrontmatter { at: u32 },
}

/// All top-level regions of a document.
#[derive(Debug, Clone, Default)]
pub struct BlockInventory<'a> {
    pub frontmatter: Option<TagInformation<'a>>,
    pub scripts: Vec<TagInformation<'a>>,
    pub styles: Vec<TagInformation<'a>>,
    pub irregularities: Vec<ScanIrregularity>,
    source_len: u32,
}

impl<'a> BlockInventory<'a> {
    /// Byte spans not covered by any block: the markup of the document.
    pub fn markup_segments(&self) -> Vec<TextSpan> {
        let mut containers: Vec<TextSpan> = self
            .frontmatter
            .iter()
            .chain(self.scripts.iter())
            .chain(self.styles.iter())
            .map(|t| t.container)
            .collect();
        containers.sort_by_key(|s| s.start);

        let mut segments = Vec::new();
        let mut cursor = 0u32;
        for c in containers {
            if c.start > cursor {
                segments.push(TextSpan::new(cursor, c.start));
            }
            cursor = cursor.max(c.end);
        }
        if cursor < self.source_len {
            segments.push(TextSpan::new(cursor, self.source_len));
        }
        segments
    }

    /// Region kind containing the offset. Everything outside a block is markup.
    pub fn block_at(&self, offset: u32) -> BlockKind {
        if let Some(fm) = &self.frontmatter {
            if fm.container.contains(offset) {
                return BlockKind::Frontmatter;
            }
        }
        if self.scripts.iter().any(|s| s.container.contains(offset)) {
            return BlockKind::Script;
        }
        if self.styles.iter().any(|s| s.container.contains(offset)) {
            return BlockKind::Style;
        }
        BlockKind::Markup
    }

    pub fn script_at(&self, offset: u32) -> Option<&TagInformation<'a>> {
        self.scripts.iter().find(|s| s.container.contains(offset))
    }

    pub fn style_at(&self, offset: u32) -> Option<&TagInformation<'a>> {
        self.styles.iter().find(|s| s.container.contains(offset))
    }

    /// Script kind of the whole document: `Js` only when every script block
    /// says so, `Ts` otherwise (and for scriptless documents).
    pub fn script_kind(&self) -> ScriptKind {
        if self.scripts.is_empty() {
            return ScriptKind::Ts;
        }
        let all_js = self
            .scripts
            .iter()
            .all(|s| ScriptKind::from_lang(s.lang()) == ScriptKind::Js);
        if all_js {
            ScriptKind::Js
        } else {
            ScriptKind::Ts
        }
    }

    pub fn source_len(&self) -> u32 {
        self.source_len
    }
}

/// Scan a document into its top-level regions.
pub fn scan(source: &str) -> BlockInventory<'_> {
    let bytes = source.as_bytes();
    let len = bytes.len();
    let mut inv = BlockInventory {
        source_len: len as u32,
        ..Default::default()
    };

    let mut pos = 0usize;
    if let Some((fm, next)) = scan_frontmatter(source, bytes, &mut inv.irregularities) {
        inv.frontmatter = Some(fm);
        pos = next;
    }

    // Depth of open markup elements; script/style only count as blocks at
    // the top level, deeper ones are ordinary markup.
    let mut depth = 0usize;

    while pos < len {
        let Some(lt) = memchr(b'<', &bytes[pos..]) else {
            break;
        };
        pos += lt;

        if bytes[pos..].starts_with(b"<!--") {
            pos = match memmem::find(&bytes[pos + 4..], b"-->") {
                Some(i) => pos + 4 + i + 3,
                None => len,
            };
            continue;
        }

        if bytes.get(pos + 1) == Some(&b'/') {
            depth = depth.saturating_sub(1);
            pos = match memchr(b'>', &bytes[pos..]) {
                Some(i) => pos + i + 1,
                None => len,
            };
            continue;
        }

        if depth == 0 && tag_opens(bytes, pos, TAG_SCRIPT) {
            let (tag, next) =
                scan_block(source, bytes, pos, TAG_SCRIPT, CLOSING_SCRIPT, &mut inv.irregularities);
            inv.scripts.push(tag);
            pos = next;
            continue;
        }

        if depth == 0 && tag_opens(bytes, pos, TAG_STYLE) {
            let (tag, next) =
                scan_block(source, bytes, pos, TAG_STYLE, CLOSING_STYLE, &mut inv.irregularities);
            inv.styles.push(tag);
            pos = next;
            continue;
        }

        let name = tag_name_at(source, bytes, pos);
        if name.is_empty() {
            // '<' that opens nothing, e.g. a comparison in an expression
            pos += 1;
            continue;
        }
        let (self_closing, next) = skip_tag(bytes, pos);
        if !self_closing && !is_void_element(name) {
            depth += 1;
        }
        pos = next;
    }

    inv
}

/// Check for a `---` fence on the first non-blank line.
fn scan_frontmatter<'a>(
    source: &'a str,
    bytes: &[u8],
    irregularities: &mut Vec<ScanIrregularity>,
) -> Option<(TagInformation<'a>, usize)> {
    let len = bytes.len();
    let mut open = 0usize;
    while open < len && matches!(bytes[open], b' ' | b'\t' | b'\r' | b'\n') {
        open += 1;
    }
    if !is_fence(bytes, open) {
        return None;
    }

    let content_start = match memchr(b'\n', &bytes[open..]) {
        Some(i) => open + i + 1,
        None => len,
    };

    let mut line_start = content_start;
    while line_start < len {
        if is_fence(bytes, line_start) {
            let content_end = line_start;
            let container_end = line_start + 3;
            let tag = TagInformation {
                start: content_start as u32,
                end: content_end as u32,
                start_pos: position_at(source, content_start),
                end_pos: position_at(source, content_end),
                attributes: FxHashMap::default(),
                container: TextSpan::new(open as u32, container_end as u32),
            };
            return Some((tag, container_end));
        }
        line_start = match memchr(b'\n', &bytes[line_start..]) {
            Some(i) => line_start + i + 1,
            None => len,
        };
    }

    irregularities.push(ScanIrregularity::UnterminatedFrontmatter { at: open as u32 });
    let tag = TagInformation {
        start: content_start as u32,
        end: len as u32,
        start_pos: position_at(source, content_start),
        end_pos: position_at(source, len),
        attributes: FxHashMap::default(),
        container: TextSpan::new(open as u32, len as u32),
    };
    Some((tag, len))
}

/// A fence line is exactly `---`, optionally ended by `\r\n`.
fn is_fence(bytes: &[u8], pos: usize) -> bool {
    if !bytes[pos..].starts_with(b"---") {
        return false;
    }
    match bytes.get(pos + 3) {
        None | Some(&b'\n') => true,
        Some(&b'\r') => bytes.get(pos + 4).map_or(true, |&b| b == b'\n'),
        _ => false,
    }
}

/// Parse one `<script>`/`<style>` block starting at `start` (the `<`).
/// Returns the region and the offset to resume scanning at.
fn scan_block<'a>(
    source: &'a str,
    bytes: &[u8],
    start: usize,
    tag: &[u8],
    closing: &[u8],
    irregularities: &mut Vec<ScanIrregularity>,
) -> (TagInformation<'a>, usize) {
    let len = bytes.len();
    let mut pos = start + 1 + tag.len();

    // Parse attributes with zero-copy
    let mut attrs: FxHashMap<Cow<'a, str>, Cow<'a, str>> = FxHashMap::default();
    let mut self_closing = false;

    while pos < len && bytes[pos] != b'>' {
        while pos < len && is_whitespace_fast(bytes[pos]) {
            pos += 1;
        }
        if pos >= len || bytes[pos] == b'>' {
            break;
        }
        if bytes[pos] == b'/' {
            self_closing = bytes.get(pos + 1) == Some(&b'>');
            pos += 1;
            continue;
        }

        // Attribute name
        let attr_start = pos;
        while pos < len {
            let c = bytes[pos];
            if c == b'='
                || c == b' '
                || c == b'>'
                || c == b'/'
                || c == b'\t'
                || c == b'\n'
                || c == b'\r'
            {
                break;
            }
            pos += 1;
        }
        if pos == attr_start {
            pos += 1;
            continue;
        }
        let attr_name: Cow<'a, str> = Cow::Borrowed(&source[attr_start..pos]);

        while pos < len && (bytes[pos] == b' ' || bytes[pos] == b'\t') {
            pos += 1;
        }

        let attr_value: Cow<'a, str> = if pos < len && bytes[pos] == b'=' {
            pos += 1;
            while pos < len && (bytes[pos] == b' ' || bytes[pos] == b'\t') {
                pos += 1;
            }
            if pos < len && (bytes[pos] == b'"' || bytes[pos] == b'\'') {
                let quote = bytes[pos];
                pos += 1;
                let value_start = pos;
                match memchr(quote, &bytes[pos..]) {
                    Some(q) => {
                        pos += q;
                        let value = Cow::Borrowed(&source[value_start..pos]);
                        pos += 1;
                        value
                    }
                    None => {
                        let value = Cow::Borrowed(&source[value_start..len]);
                        pos = len;
                        value
                    }
                }
            } else {
                let value_start = pos;
                while pos < len {
                    let c = bytes[pos];
                    if c == b' ' || c == b'>' || c == b'/' || c == b'\t' || c == b'\n' {
                        break;
                    }
                    pos += 1;
                }
                Cow::Borrowed(&source[value_start..pos])
            }
        } else {
            // Boolean attribute
            Cow::Borrowed("")
        };

        if !attr_name.is_empty() {
            attrs.insert(attr_name, attr_value);
        }
    }

    if self_closing {
        let end = (pos + 1).min(len);
        let tag = TagInformation {
            start: end as u32,
            end: end as u32,
            start_pos: position_at(source, end),
            end_pos: position_at(source, end),
            attributes: attrs,
            container: TextSpan::new(start as u32, end as u32),
        };
        return (tag, end);
    }

    if pos >= len || bytes[pos] != b'>' {
        // Opening tag never closed
        irregularities.push(ScanIrregularity::UnterminatedBlock {
            tag: String::from_utf8_lossy(tag).into_owned(),
            at: start as u32,
        });
        let info = TagInformation {
            start: len as u32,
            end: len as u32,
            start_pos: position_at(source, len),
            end_pos: position_at(source, len),
            attributes: attrs,
            container: TextSpan::new(start as u32, len as u32),
        };
        return (info, len);
    }
    pos += 1;
    let content_start = pos;

    // Fast path using memchr to hop between '<' candidates
    while pos < len {
        match memchr(b'<', &bytes[pos..]) {
            Some(lt) => {
                pos += lt;
                if starts_with_bytes(&bytes[pos..], closing) {
                    let content_end = pos;
                    let end = pos + closing.len();
                    let info = TagInformation {
                        start: content_start as u32,
                        end: content_end as u32,
                        start_pos: position_at(source, content_start),
                        end_pos: position_at(source, content_end),
                        attributes: attrs,
                        container: TextSpan::new(start as u32, end as u32),
                    };
                    return (info, end);
                }
                pos += 1;
            }
            None => break,
        }
    }

    // Unterminated: content runs to end of file
    irregularities.push(ScanIrregularity::UnterminatedBlock {
        tag: String::from_utf8_lossy(tag).into_owned(),
        at: start as u32,
    });
    let info = TagInformation {
        start: content_start as u32,
        end: len as u32,
        start_pos: position_at(source, content_start),
        end_pos: position_at(source, len),
        attributes: attrs,
        container: TextSpan::new(start as u32, len as u32),
    };
    (info, len)
}

/// Whether `<` at `pos` opens the named element (name followed by a
/// non-name byte).
fn tag_opens(bytes: &[u8], pos: usize, name: &[u8]) -> bool {
    let start = pos + 1;
    if start + name.len() > bytes.len() {
        return false;
    }
    if !bytes[start..start + name.len()].eq_ignore_ascii_case(name) {
        return false;
    }
    match bytes.get(start + name.len()) {
        None => true,
        Some(&c) => !is_tag_name_char_fast(c),
    }
}

/// Tag name right after the `<` at `pos`; empty when `<` opens nothing.
pub(crate) fn tag_name_at<'a>(source: &'a str, bytes: &[u8], pos: usize) -> &'a str {
    let start = pos + 1;
    let mut end = start;
    while end < bytes.len() && is_tag_name_char_fast(bytes[end]) {
        end += 1;
    }
    &source[start..end]
}

/// Skip past an ordinary markup tag, honoring quoted attribute values.
/// Returns whether it was self-closing and the offset past the `>`.
pub(crate) fn skip_tag(bytes: &[u8], start: usize) -> (bool, usize) {
    let len = bytes.len();
    let mut pos = start + 1;
    let mut quote: Option<u8> = None;
    while pos < len {
        let b = bytes[pos];
        match quote {
            Some(q) => {
                if b == q {
                    quote = None;
                }
            }
            None => match b {
                b'"' | b'\'' => quote = Some(b),
                b'>' => {
                    let self_closing = pos > start + 1 && bytes[pos - 1] == b'/';
                    return (self_closing, pos + 1);
                }
                _ => {}
            },
        }
        pos += 1;
    }
    (false, len)
}

pub(crate) fn is_void_element(name: &str) -> bool {
    name.len() <= 6 && VOID_ELEMENTS.contains(name.to_ascii_lowercase().as_str())
}

/// Fast byte slice prefix check
#[inline(always)]
pub(crate) fn starts_with_bytes(haystack: &[u8], needle: &[u8]) -> bool {
    haystack.len() >= needle.len() && haystack[..needle.len()].eq_ignore_ascii_case(needle)
}

/// Fast tag name character check
#[inline(always)]
pub(crate) fn is_tag_name_char_fast(b: u8) -> bool {
    matches!(b, b'a'..=b'z' | b'A'..=b'Z' | b'0'..=b'9' | b'-' | b'_')
}

/// Fast whitespace check
#[inline(always)]
pub(crate) fn is_whitespace_fast(b: u8) -> bool {
    matches!(b, b' ' | b'\t' | b'\n' | b'\r')
}

fn position_at(source: &str, offset: usize) -> Position {
    offset_to_position_str(source, offset).unwrap_or_default()
}
