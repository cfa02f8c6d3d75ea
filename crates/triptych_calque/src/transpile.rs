//! Textual projection of a triptych document into TSX.
//!
//! The transform never fails: every block is rewritten in place with
//! length-preserving overwrites or pure insertions, so the generated text
//! keeps the original's line structure, and a [`TraceTable`] records every
//! run of original bytes that survives into the projection.
//!
//! Region rules:
//! - frontmatter becomes a block comment (`---` fences turn into `/*-` and
//!   `-*/`), falling back to `//`-prefixed lines when the body would break
//!   the comment;
//! - script tags are blanked to spaces and their content rides along
//!   verbatim at module scope;
//! - style blocks become `css` tagged template literals with backticks and
//!   `${` defused inside the content;
//! - markup is wrapped in fragments (`;<>` ... `</>;`) with just enough
//!   fixups to parse as JSX: void elements get self-closed, invalid
//!   attribute name bytes become `_`, HTML comments become JSX comments,
//!   and template directives are hidden in comments while plain `{expr}`
//!   groups stay live for the checker.

use memchr::{memchr, memmem};
use triptych_atlas::{TextSpan, TraceTable};

use crate::scan::{
    is_tag_name_char_fast, is_void_element, scan, tag_name_at, ScanIrregularity, ScriptKind,
    TagInformation,
};

/// Module trailer appended after all original content.
const BOILERPLATE: &str = "\n;\ndeclare function css(strings: TemplateStringsArray, ...values: unknown[]): void;\nexport {};\n";

#[derive(Debug, Clone)]
pub struct TranspileOptions {
    /// Append the module trailer (`css` declaration and `export {}`).
    pub boilerplate: bool,
}

impl Default for TranspileOptions {
    fn default() -> Self {
        Self { boilerplate: true }
    }
}

/// Result of projecting a document.
#[derive(Debug, Clone)]
pub struct Transpilation {
    pub code: String,
    pub trace: TraceTable,
    pub script_kind: ScriptKind,
    pub irregularities: Vec<ScanIrregularity>,
}

/// Project a triptych document into TSX.
pub fn transpile(source: &str, options: &TranspileOptions) -> Transpilation {
    let inventory = scan(source);
    let script_kind = inventory.script_kind();
    let mut em = Emitter::new(source);

    enum Region<'i, 'a> {
        Frontmatter(&'i TagInformation<'a>),
        Script(&'i TagInformation<'a>),
        Style(&'i TagInformation<'a>),
        Markup(TextSpan),
    }

    let mut regions: Vec<(u32, Region)> = Vec::new();
    if let Some(fm) = &inventory.frontmatter {
        regions.push((fm.container.start, Region::Frontmatter(fm)));
    }
    for script in &inventory.scripts {
        regions.push((script.container.start, Region::Script(script)));
    }
    for style in &inventory.styles {
        regions.push((style.container.start, Region::Style(style)));
    }
    for span in inventory.markup_segments() {
        regions.push((span.start, Region::Markup(span)));
    }
    regions.sort_by_key(|(start, _)| *start);

    for (_, region) in regions {
        match region {
            Region::Frontmatter(tag) => emit_frontmatter(&mut em, tag),
            Region::Script(tag) => emit_script(&mut em, tag),
            Region::Style(tag) => emit_style(&mut em, tag),
            Region::Markup(span) => emit_markup(&mut em, span),
        }
    }

    if options.boilerplate {
        em.synthetic(BOILERPLATE);
    }

    let (code, trace) = em.finish();
    Transpilation {
        code,
        trace,
        script_kind,
        irregularities: inventory.irregularities,
    }
}

/// Builds the generated text while recording preserved runs, coalescing
/// adjacent ones into single trace entries.
struct Emitter<'a> {
    source: &'a str,
    out: String,
    trace: TraceTable,
    pending: Option<(usize, usize, usize)>,
}

impl<'a> Emitter<'a> {
    fn new(source: &'a str) -> Self {
        Self {
            source,
            out: String::with_capacity(source.len() + BOILERPLATE.len()),
            trace: TraceTable::new(),
            pending: None,
        }
    }

    /// Copy `source[start..end]` through and trace it.
    fn preserved(&mut self, start: usize, end: usize) {
        if start >= end {
            return;
        }
        let generated = self.out.len();
        self.out.push_str(&self.source[start..end]);
        self.push_run(start, generated, end - start);
    }

    /// Emit text that has no original counterpart.
    fn synthetic(&mut self, text: &str) {
        self.out.push_str(text);
    }

    /// Overwrite `source[start..end]` with spaces, keeping newline bytes in
    /// place, and splicing `prefix`/`suffix` into the ends.
    fn overwrite(&mut self, start: usize, end: usize, prefix: &str, suffix: &str) {
        debug_assert!(end - start >= prefix.len() + suffix.len());
        let mut replacement: Vec<u8> = self.source.as_bytes()[start..end]
            .iter()
            .map(|&b| match b {
                b'\n' => b'\n',
                b'\r' => b'\r',
                _ => b' ',
            })
            .collect();
        replacement[..prefix.len()].copy_from_slice(prefix.as_bytes());
        let at = replacement.len() - suffix.len();
        replacement[at..].copy_from_slice(suffix.as_bytes());
        self.out.push_str(&String::from_utf8_lossy(&replacement));
    }

    fn blank(&mut self, start: usize, end: usize) {
        if start < end {
            self.overwrite(start, end, "", "");
        }
    }

    fn push_run(&mut self, original: usize, generated: usize, len: usize) {
        if let Some((orig, gen, run_len)) = self.pending {
            if orig + run_len == original && gen + run_len == generated {
                self.pending = Some((orig, gen, run_len + len));
                return;
            }
            self.trace.push_run(orig as u32, gen as u32, run_len as u32);
        }
        self.pending = Some((original, generated, len));
    }

    fn finish(mut self) -> (String, TraceTable) {
        if let Some((orig, gen, len)) = self.pending.take() {
            self.trace.push_run(orig as u32, gen as u32, len as u32);
        }
        (self.out, self.trace)
    }
}

fn emit_frontmatter(em: &mut Emitter, tag: &TagInformation) {
    let src = em.source;
    let c_start = tag.container.start as usize;
    let c_end = tag.container.end as usize;
    let start = tag.start as usize;
    let end = tag.end as usize;

    let terminated = c_end > end;
    let body = &src[start..end];
    if terminated && !body.contains("*/") {
        em.synthetic("/*-");
        em.synthetic(&src[c_start + 3..start]);
        em.synthetic(body);
        em.synthetic("-*/");
    } else {
        // Comment out line by line; handles both unterminated fences and
        // bodies that would close a block comment early
        for line in src[c_start..c_end].split_inclusive('\n') {
            em.synthetic("//");
            em.synthetic(line);
        }
    }
}

fn emit_script(em: &mut Emitter, tag: &TagInformation) {
    em.blank(tag.container.start as usize, tag.start as usize);
    em.preserved(tag.start as usize, tag.end as usize);
    em.blank(tag.end as usize, tag.container.end as usize);
}

fn emit_style(em: &mut Emitter, tag: &TagInformation) {
    let len = em.source.len();
    let c_start = tag.container.start as usize;
    let c_end = tag.container.end as usize;
    let start = tag.start as usize;
    let end = tag.end as usize;

    if start == end && end == len && c_end == len {
        // Open tag ran off the end of the file; nothing to wrap
        em.blank(c_start, c_end);
        return;
    }

    em.overwrite(c_start, start, ";css", "`");
    emit_style_content(em, start, end);
    if end < c_end {
        em.overwrite(end, c_end, "`;", "");
    } else {
        // Unterminated block: close the template so the projection parses
        em.synthetic("`;");
    }
}

/// Style content rides along verbatim except for bytes that would terminate
/// or interpolate the template literal.
fn emit_style_content(em: &mut Emitter, start: usize, end: usize) {
    let bytes = em.source.as_bytes();
    let mut run = start;
    let mut pos = start;
    while pos < end {
        let b = bytes[pos];
        if b == b'`' || (b == b'$' && bytes.get(pos + 1) == Some(&b'{')) {
            em.preserved(run, pos);
            em.synthetic(" ");
            pos += 1;
            run = pos;
        } else {
            pos += 1;
        }
    }
    em.preserved(run, end);
}

fn emit_markup(em: &mut Emitter, span: TextSpan) {
    let src = em.source;
    let start = span.start as usize;
    let end = span.end as usize;
    let text = &src[start..end];

    let trimmed_start = start + (text.len() - text.trim_start().len());
    let trimmed_end = start + text.trim_end().len();
    if trimmed_start >= trimmed_end {
        em.preserved(start, end);
        return;
    }

    em.preserved(start, trimmed_start);
    em.synthetic(";<>");
    walk_markup(em, trimmed_start, trimmed_end);
    em.synthetic("</>;");
    em.preserved(trimmed_end, end);
}

fn walk_markup(em: &mut Emitter, start: usize, end: usize) {
    let bytes = em.source.as_bytes();
    let mut plain = start;
    let mut pos = start;
    while pos < end {
        match bytes[pos] {
            b'<' => {
                if bytes[pos..end].starts_with(b"<!--") {
                    em.preserved(plain, pos);
                    pos = emit_comment(em, pos, end);
                    plain = pos;
                } else if pos + 1 < end
                    && (is_tag_name_char_fast(bytes[pos + 1]) || bytes[pos + 1] == b'/')
                {
                    em.preserved(plain, pos);
                    pos = emit_tag(em, pos, end);
                    plain = pos;
                } else {
                    // A '<' that opens nothing cannot appear in JSX text
                    em.preserved(plain, pos);
                    em.synthetic(" ");
                    pos += 1;
                    plain = pos;
                }
            }
            b'{' => {
                em.preserved(plain, pos);
                pos = emit_brace_group(em, pos, end);
                plain = pos;
            }
            b'}' => {
                em.preserved(plain, pos);
                em.synthetic(" ");
                pos += 1;
                plain = pos;
            }
            _ => pos += 1,
        }
    }
    em.preserved(plain, end);
}

/// `<!--` .. `-->` becomes `{/*-` .. `*/}`, same byte lengths. The body is
/// emitted untraced so a `*/` inside can be defused.
fn emit_comment(em: &mut Emitter, start: usize, end: usize) -> usize {
    let src = em.source;
    let bytes = src.as_bytes();

    em.synthetic("{/*-");
    let body_start = start + 4;
    let (body_end, next) = match memmem::find(&bytes[body_start..end], b"-->") {
        Some(i) => (body_start + i, body_start + i + 3),
        None => (end, end),
    };
    let body = &src[body_start..body_end];
    if body.contains("*/") {
        em.synthetic(&body.replace("*/", "* "));
    } else {
        em.synthetic(body);
    }
    em.synthetic("*/}");
    next
}

fn emit_tag(em: &mut Emitter, start: usize, end: usize) -> usize {
    let src = em.source;
    let bytes = src.as_bytes();

    if bytes.get(start + 1) == Some(&b'/') {
        let close = match memchr(b'>', &bytes[start..end]) {
            Some(i) => start + i + 1,
            None => end,
        };
        em.preserved(start, close);
        return close;
    }

    let name = tag_name_at(src, bytes, start);
    let name_end = start + 1 + name.len();
    em.preserved(start, name_end);

    let mut run = name_end;
    let mut pos = name_end;
    let mut in_name = false;
    loop {
        if pos >= end {
            em.preserved(run, end);
            return end;
        }
        match bytes[pos] {
            b'>' => {
                let self_closing = pos > name_end && bytes[pos - 1] == b'/';
                if !self_closing && is_void_element(name) {
                    em.preserved(run, pos);
                    em.synthetic("/");
                    run = pos;
                }
                em.preserved(run, pos + 1);
                return pos + 1;
            }
            quote @ (b'"' | b'\'') => {
                pos = match memchr(quote, &bytes[pos + 1..end]) {
                    Some(i) => pos + 1 + i + 1,
                    None => end,
                };
                in_name = false;
            }
            b'{' => {
                // Braced attribute value or spread: carried through balanced
                let mut depth = 0usize;
                while pos < end {
                    match bytes[pos] {
                        b'{' => depth += 1,
                        b'}' => {
                            depth -= 1;
                            if depth == 0 {
                                pos += 1;
                                break;
                            }
                        }
                        _ => {}
                    }
                    pos += 1;
                }
                in_name = false;
            }
            b'=' | b'/' => {
                in_name = false;
                pos += 1;
            }
            b' ' | b'\t' | b'\n' | b'\r' => {
                in_name = true;
                pos += 1;
            }
            b => {
                if in_name && !is_attr_name_char(b) {
                    em.preserved(run, pos);
                    em.synthetic("_");
                    pos += 1;
                    run = pos;
                } else {
                    pos += 1;
                }
            }
        }
    }
}

/// `{#...}` / `{:...}` / `{/...}` / `{@...}` groups are template directives
/// and get hidden in a JSX comment; anything else is an expression and stays
/// live. Returns the offset to resume at.
fn emit_brace_group(em: &mut Emitter, start: usize, end: usize) -> usize {
    let bytes = em.source.as_bytes();

    let mut depth = 0usize;
    let mut pos = start;
    let mut close = None;
    while pos < end {
        match bytes[pos] {
            b'{' => depth += 1,
            b'}' => {
                depth -= 1;
                if depth == 0 {
                    close = Some(pos);
                    break;
                }
            }
            _ => {}
        }
        pos += 1;
    }
    let Some(close) = close else {
        em.synthetic(" ");
        return start + 1;
    };

    let mut first = start + 1;
    while first < close && (bytes[first] == b' ' || bytes[first] == b'\t') {
        first += 1;
    }
    let directive = first < close && matches!(bytes[first], b'#' | b':' | b'/' | b'@');
    if !directive {
        em.preserved(start, close + 1);
        return close + 1;
    }

    em.preserved(start, start + 1);
    em.synthetic("/*");
    let body = &em.source[start + 1..close];
    if body.contains("*/") {
        em.blank(start + 1, close);
    } else {
        em.preserved(start + 1, close);
    }
    em.synthetic("*/");
    em.preserved(close, close + 1);
    close + 1
}

#[inline(always)]
fn is_attr_name_char(b: u8) -> bool {
    matches!(b, b'a'..=b'z' | b'A'..=b'Z' | b'0'..=b'9' | b'-' | b'_' | b'$')
}

#[cfg(test)]
mod tests {
    use super::*;

    fn plain() -> TranspileOptions {
        TranspileOptions { boilerplate: false }
    }

    #[test]
    fn test_preserves_newline_count() {
        let source = "---\ntitle: x\n---\n<h1>{title}</h1>\n<script>\nconst n = 1;\n</script>\n<style>\nh1 { color: red }\n</style>\n";
        let result = transpile(source, &plain());
        assert_eq!(
            result.code.matches('\n').count(),
            source.matches('\n').count()
        );
    }

    #[test]
    fn test_script_content_verbatim() {
        let source = "---\na: 1\n---\n<script>const n: number = 1;</script>\n";
        let result = transpile(source, &plain());
        // Frontmatter rewrite and tag blanking are length preserving, so the
        // script content sits at its original offsets
        let offset = source.find("const n").unwrap();
        assert_eq!(&result.code[offset..offset + 20], "const n: number = 1;");
        assert_eq!(result.trace.to_generated(offset as u32), Some(offset as u32));
    }

    #[test]
    fn test_script_tags_blanked() {
        let source = "<script>let a;</script>";
        let result = transpile(source, &plain());
        assert_eq!(result.code, "        let a;         ");
    }

    #[test]
    fn test_frontmatter_fences() {
        let source = "---\ntitle: hi\n---\n";
        let result = transpile(source, &plain());
        assert_eq!(result.code, "/*-\ntitle: hi\n-*/\n");
        // Frontmatter never maps
        let inside = source.find("title").unwrap() as u32;
        assert_eq!(result.trace.to_generated(inside), None);
    }

    #[test]
    fn test_frontmatter_comment_breaker_falls_back() {
        let source = "---\nweird: \"*/\"\n---\nrest";
        let result = transpile(source, &plain());
        assert!(result.code.starts_with("//---\n//weird: \"*/\"\n//---"));
        assert_eq!(result.code.matches('\n').count(), source.matches('\n').count());
    }

    #[test]
    fn test_style_becomes_tagged_template() {
        let source = "<style>h1 { color: red }</style>";
        let result = transpile(source, &plain());
        assert_eq!(result.code, ";css  `h1 { color: red }`;      ");
        assert_eq!(result.code.len(), source.len());
    }

    #[test]
    fn test_style_backtick_defused() {
        let source = "<style>a::before { content: \"`${\" }</style>";
        let result = transpile(source, &plain());
        assert!(!result.code[5..result.code.rfind("`;").unwrap()].contains("${"));
        assert_eq!(result.code.len(), source.len());
    }

    #[test]
    fn test_unterminated_style_still_closes() {
        let source = "<style>h1 {}";
        let result = transpile(source, &plain());
        assert!(result.code.ends_with("`;"));
        assert_eq!(result.irregularities.len(), 1);
    }

    #[test]
    fn test_markup_fragment_wrap() {
        let source = "  <div>hi</div>  ";
        let result = transpile(source, &plain());
        assert_eq!(result.code, "  ;<><div>hi</div></>;  ");
    }

    #[test]
    fn test_void_element_self_closed() {
        let source = "<p>a<br>b</p>";
        let result = transpile(source, &plain());
        assert_eq!(result.code, ";<><p>a<br/>b</p></>;");
    }

    #[test]
    fn test_attr_names_sanitized() {
        let source = "<button on:click={handler} @key=\"x\">go</button>";
        let result = transpile(source, &plain());
        assert!(result.code.contains("on_click={handler}"));
        assert!(result.code.contains("_key=\"x\""));
    }

    #[test]
    fn test_expression_stays_live() {
        let source = "<p>{count + 1}</p>";
        let result = transpile(source, &plain());
        assert!(result.code.contains("{count + 1}"));
        let offset = source.find("count").unwrap() as u32;
        let generated = result.trace.to_generated(offset).unwrap();
        assert_eq!(&result.code[generated as usize..generated as usize + 5], "count");
        assert_eq!(result.trace.to_original(generated), Some(offset));
    }

    #[test]
    fn test_directive_hidden_in_comment() {
        let source = "<div>{#if user}{user.name}{/if}</div>";
        let result = transpile(source, &plain());
        assert!(result.code.contains("{/*#if user*/}"));
        assert!(result.code.contains("{user.name}"));
        assert!(result.code.contains("{/*/if*/}"));
    }

    #[test]
    fn test_html_comment_becomes_jsx_comment() {
        let source = "<div><!-- note --></div>";
        let result = transpile(source, &plain());
        assert_eq!(result.code, ";<><div>{/*- note */}</div></>;");
    }

    #[test]
    fn test_stray_braces_neutralized() {
        let source = "<p>a } b { c</p>";
        let result = transpile(source, &plain());
        assert_eq!(result.code, ";<><p>a   b   c</p></>;");
    }

    #[test]
    fn test_boilerplate_after_content() {
        let source = "<script>let a;</script>";
        let result = transpile(source, &TranspileOptions::default());
        assert!(result.code.ends_with("export {};\n"));
        assert!(result.code.contains("declare function css"));
        // Trailer offsets never map back
        let tail = (source.len() + 1) as u32;
        assert_eq!(result.trace.to_original(tail), None);
    }

    #[test]
    fn test_script_kind_carried() {
        let result = transpile("<script lang=\"js\">x</script>", &plain());
        assert_eq!(result.script_kind, ScriptKind::Js);
    }

    #[test]
    fn test_round_trip_through_markup() {
        let source = "<h1>{title}</h1>\n<script>let n = 2;</script>\n";
        let result = transpile(source, &plain());
        for offset in [1u32, 5, 9, 13, 25, 33] {
            if let Some(generated) = result.trace.to_generated(offset) {
                assert_eq!(result.trace.to_original(generated), Some(offset));
            }
        }
    }
}
