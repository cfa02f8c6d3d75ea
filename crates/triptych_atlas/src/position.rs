//! Conversion between byte offsets and LSP positions (0-based line/character).

use lsp_types::{Position, Range};
use ropey::Rope;

use crate::span::TextSpan;

/// Convert a byte offset to an LSP Position.
pub fn offset_to_position(rope: &Rope, offset: usize) -> Option<Position> {
    if offset > rope.len_bytes() {
        return None;
    }

    let char_idx = rope.try_byte_to_char(offset).ok()?;
    let line = rope.char_to_line(char_idx);
    let line_start_char = rope.line_to_char(line);
    let character = char_idx - line_start_char;

    Some(Position {
        line: line as u32,
        character: character as u32,
    })
}

/// Convert an LSP Position to a byte offset.
pub fn position_to_offset(rope: &Rope, position: Position) -> Option<usize> {
    let line = position.line as usize;
    let character = position.character as usize;

    if line >= rope.len_lines() {
        return None;
    }

    let line_start_char = rope.line_to_char(line);
    let line_len = rope.line(line).len_chars();

    // Clamp character to line length
    let char_in_line = character.min(line_len);
    let char_idx = line_start_char + char_in_line;

    rope.try_char_to_byte(char_idx).ok()
}

/// String flavor of [`offset_to_position`] for callers without a rope.
/// Returns `None` when the offset is out of range or not a char boundary.
pub fn offset_to_position_str(content: &str, offset: usize) -> Option<Position> {
    let prefix = content.get(..offset)?;
    let line = prefix.bytes().filter(|&b| b == b'\n').count() as u32;
    let line_start = prefix.rfind('\n').map(|i| i + 1).unwrap_or(0);
    let character = prefix[line_start..].chars().count() as u32;
    Some(Position { line, character })
}

/// Convert LSP position to a byte offset in a string, clamping to line and
/// document ends the way editors expect.
#[inline]
pub fn position_to_offset_str(content: &str, line: u32, character: u32) -> usize {
    let mut line_start = 0usize;
    for _ in 0..line {
        match content[line_start..].find('\n') {
            Some(i) => line_start += i + 1,
            None => return content.len(),
        }
    }

    let mut count = 0u32;
    for (j, c) in content[line_start..].char_indices() {
        if c == '\n' || count == character {
            return line_start + j;
        }
        count += 1;
    }
    content.len()
}

/// Create an LSP Range from start and end positions.
pub fn make_range(start_line: u32, start_char: u32, end_line: u32, end_char: u32) -> Range {
    Range {
        start: Position {
            line: start_line,
            character: start_char,
        },
        end: Position {
            line: end_line,
            character: end_char,
        },
    }
}

/// Convert a byte span to an LSP Range against the given text.
pub fn span_to_range(content: &str, span: TextSpan) -> Option<Range> {
    let start = offset_to_position_str(content, span.start as usize)?;
    let end = offset_to_position_str(content, span.end as usize)?;
    Some(Range { start, end })
}

/// Convert an LSP Range to a byte span against the given text.
pub fn range_to_span(content: &str, range: Range) -> TextSpan {
    let start = position_to_offset_str(content, range.start.line, range.start.character);
    let end = position_to_offset_str(content, range.end.line, range.end.character);
    TextSpan::new(start as u32, end as u32)
}

/// Get the range of a line (0-based line number).
pub fn line_range(rope: &Rope, line: usize) -> Option<Range> {
    if line >= rope.len_lines() {
        return None;
    }

    let line_text = rope.line(line);
    let line_len = line_text.len_chars();

    Some(Range {
        start: Position {
            line: line as u32,
            character: 0,
        },
        end: Position {
            line: line as u32,
            character: line_len as u32,
        },
    })
}
