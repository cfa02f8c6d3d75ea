//! The `DocumentMapper` seam between original documents and whatever text
//! gets derived from them.
//!
//! Offset methods are strict: the offset must land inside a mapped run.
//! Position methods are cursor-tolerant: a position sitting on the exclusive
//! end boundary of a run maps to the matching boundary on the other side,
//! which is what interactive requests at end-of-content need.
//! `None` always means "no counterpart"; consumers drop unmapped results
//! instead of guessing.

use std::sync::Arc;

use lsp_types::{Position, Range};

use crate::position::{offset_to_position_str, position_to_offset_str};
use crate::span::TextSpan;
use crate::trace::TraceTable;

pub trait DocumentMapper: Send + Sync {
    /// Map a byte offset in the generated text back to the original.
    fn original_offset(&self, generated: u32) -> Option<u32>;

    /// Map a byte offset in the original text into the generated text.
    fn generated_offset(&self, original: u32) -> Option<u32>;

    /// Map a position in the generated text back to the original.
    fn original_position(&self, generated: Position) -> Option<Position>;

    /// Map a position in the original text into the generated text.
    fn generated_position(&self, original: Position) -> Option<Position>;

    /// Whether an original position has a generated counterpart at all.
    fn is_in_generated(&self, original: Position) -> bool {
        self.generated_position(original).is_some()
    }

    fn original_span(&self, generated: TextSpan) -> Option<TextSpan> {
        if generated.is_empty() {
            return Some(TextSpan::empty(self.original_offset(generated.start)?));
        }
        let start = self.original_offset(generated.start)?;
        let end = self.original_offset(generated.end - 1)? + 1;
        Some(TextSpan::new(start, end))
    }

    fn generated_span(&self, original: TextSpan) -> Option<TextSpan> {
        if original.is_empty() {
            return Some(TextSpan::empty(self.generated_offset(original.start)?));
        }
        let start = self.generated_offset(original.start)?;
        let end = self.generated_offset(original.end - 1)? + 1;
        Some(TextSpan::new(start, end))
    }

    fn original_range(&self, generated: Range) -> Option<Range> {
        let start = self.original_position(generated.start)?;
        let end = self.original_position(generated.end)?;
        Some(Range { start, end })
    }

    fn generated_range(&self, original: Range) -> Option<Range> {
        let start = self.generated_position(original.start)?;
        let end = self.generated_position(original.end)?;
        Some(Range { start, end })
    }
}

/// Mapper for derived text that equals the original byte for byte.
#[derive(Debug, Default, Clone, Copy)]
pub struct IdentityMapper;

impl DocumentMapper for IdentityMapper {
    fn original_offset(&self, generated: u32) -> Option<u32> {
        Some(generated)
    }

    fn generated_offset(&self, original: u32) -> Option<u32> {
        Some(original)
    }

    fn original_position(&self, generated: Position) -> Option<Position> {
        Some(generated)
    }

    fn generated_position(&self, original: Position) -> Option<Position> {
        Some(original)
    }
}

/// Maps between a region of a parent document and that region extracted as a
/// standalone fragment (fragment line 0 starts at `start` in the parent).
#[derive(Debug, Clone)]
pub struct FragmentMapper {
    span: TextSpan,
    start: Position,
    end: Position,
}

impl FragmentMapper {
    pub fn new(span: TextSpan, start: Position, end: Position) -> Self {
        Self { span, start, end }
    }
}

impl DocumentMapper for FragmentMapper {
    fn original_offset(&self, generated: u32) -> Option<u32> {
        let offset = self.span.start + generated;
        (offset <= self.span.end).then_some(offset)
    }

    fn generated_offset(&self, original: u32) -> Option<u32> {
        (original >= self.span.start && original <= self.span.end)
            .then(|| original - self.span.start)
    }

    fn original_position(&self, generated: Position) -> Option<Position> {
        let mapped = if generated.line == 0 {
            Position {
                line: self.start.line,
                character: self.start.character + generated.character,
            }
        } else {
            Position {
                line: self.start.line + generated.line,
                character: generated.character,
            }
        };
        let in_bounds = (mapped.line, mapped.character) <= (self.end.line, self.end.character);
        in_bounds.then_some(mapped)
    }

    fn generated_position(&self, original: Position) -> Option<Position> {
        if (original.line, original.character) < (self.start.line, self.start.character)
            || (original.line, original.character) > (self.end.line, self.end.character)
        {
            return None;
        }
        if original.line == self.start.line {
            Some(Position {
                line: 0,
                character: original.character - self.start.character,
            })
        } else {
            Some(Position {
                line: original.line - self.start.line,
                character: original.character,
            })
        }
    }
}

/// Maps through the [`TraceTable`] a transpile emitted. `lead_lines` is the
/// number of synthetic lines prepended to the generated text before the first
/// traced byte (zero when the transform only appends).
pub struct TraceMapper {
    trace: TraceTable,
    original_text: Arc<str>,
    generated_text: Arc<str>,
    lead_lines: u32,
}

impl TraceMapper {
    pub fn new(trace: TraceTable, original_text: Arc<str>, generated_text: Arc<str>) -> Self {
        Self {
            trace,
            original_text,
            generated_text,
            lead_lines: 0,
        }
    }

    pub fn with_lead_lines(mut self, lead_lines: u32) -> Self {
        self.lead_lines = lead_lines;
        self
    }

    pub fn trace(&self) -> &TraceTable {
        &self.trace
    }
}

impl DocumentMapper for TraceMapper {
    fn original_offset(&self, generated: u32) -> Option<u32> {
        self.trace.to_original(generated)
    }

    fn generated_offset(&self, original: u32) -> Option<u32> {
        self.trace.to_generated(original)
    }

    fn original_position(&self, generated: Position) -> Option<Position> {
        let line = generated.line.checked_sub(self.lead_lines)?;
        let offset = position_to_offset_str(&self.generated_text, line, generated.character);
        let original = self.trace.to_original_cursor(offset as u32)?;
        offset_to_position_str(&self.original_text, original as usize)
    }

    fn generated_position(&self, original: Position) -> Option<Position> {
        let offset =
            position_to_offset_str(&self.original_text, original.line, original.character);
        let generated = self.trace.to_generated_cursor(offset as u32)?;
        let mut position = offset_to_position_str(&self.generated_text, generated as usize)?;
        position.line += self.lead_lines;
        Some(position)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_identity() {
        let m = IdentityMapper;
        let p = Position {
            line: 3,
            character: 7,
        };
        assert_eq!(m.original_position(p), Some(p));
        assert_eq!(m.generated_position(p), Some(p));
        assert_eq!(m.generated_offset(42), Some(42));
        assert!(m.is_in_generated(p));
    }

    #[test]
    fn test_fragment_first_line_columns_shift() {
        // Parent:  "abc<frag>xy\nz</frag>" with fragment content "xy\nz"
        let m = FragmentMapper::new(
            TextSpan::new(9, 13),
            Position {
                line: 0,
                character: 9,
            },
            Position {
                line: 1,
                character: 1,
            },
        );

        // First fragment line shifts by the start column
        assert_eq!(
            m.generated_position(Position {
                line: 0,
                character: 10
            }),
            Some(Position {
                line: 0,
                character: 1
            })
        );
        // Later lines keep their column
        assert_eq!(
            m.generated_position(Position {
                line: 1,
                character: 1
            }),
            Some(Position {
                line: 1,
                character: 1
            })
        );
        // Outside the fragment
        assert_eq!(
            m.generated_position(Position {
                line: 0,
                character: 3
            }),
            None
        );
        assert_eq!(
            m.generated_position(Position {
                line: 2,
                character: 0
            }),
            None
        );
    }

    #[test]
    fn test_fragment_round_trip() {
        let m = FragmentMapper::new(
            TextSpan::new(9, 13),
            Position {
                line: 0,
                character: 9,
            },
            Position {
                line: 1,
                character: 1,
            },
        );
        for p in [
            Position {
                line: 0,
                character: 9,
            },
            Position {
                line: 0,
                character: 11,
            },
            Position {
                line: 1,
                character: 0,
            },
        ] {
            let fragment = m.generated_position(p).unwrap();
            assert_eq!(m.original_position(fragment), Some(p));
        }
    }

    fn trace_mapper() -> TraceMapper {
        // original:  "AA\nkeep\nBB"   generated: "xx\nkeep\nyyyy"
        // only "keep\n" is preserved (offsets 3..8 in both texts)
        let mut trace = TraceTable::new();
        trace.push_identity(3, 8);
        TraceMapper::new(trace, Arc::from("AA\nkeep\nBB"), Arc::from("xx\nkeep\nyyyy"))
    }

    #[test]
    fn test_trace_mapper_positions() {
        let m = trace_mapper();
        let inside = Position {
            line: 1,
            character: 2,
        };
        assert_eq!(m.generated_position(inside), Some(inside));
        assert_eq!(m.original_position(inside), Some(inside));

        // Unmapped region
        assert_eq!(
            m.generated_position(Position {
                line: 0,
                character: 1
            }),
            None
        );
        assert_eq!(
            m.original_position(Position {
                line: 2,
                character: 2
            }),
            None
        );
    }

    #[test]
    fn test_trace_mapper_round_trip() {
        let m = trace_mapper();
        for character in 0..=4u32 {
            let p = Position { line: 1, character };
            let generated = m.generated_position(p).unwrap();
            assert_eq!(m.original_position(generated), Some(p));
        }
    }

    #[test]
    fn test_trace_mapper_lead_lines() {
        // Same shape, but two synthetic lines prepended to the generated text
        let mut trace = TraceTable::new();
        trace.push_run(3, 3, 5);
        let m = TraceMapper::new(
            trace,
            Arc::from("AA\nkeep\nBB"),
            Arc::from("xx\nkeep\nyyyy"),
        )
        .with_lead_lines(2);

        let original = Position {
            line: 1,
            character: 2,
        };
        let generated = m.generated_position(original).unwrap();
        assert_eq!(
            generated,
            Position {
                line: 3,
                character: 2
            }
        );
        assert_eq!(m.original_position(generated), Some(original));
        // Positions inside the synthetic lead never map back
        assert_eq!(
            m.original_position(Position {
                line: 1,
                character: 0
            }),
            None
        );
    }

    #[test]
    fn test_trace_mapper_spans() {
        let m = trace_mapper();
        assert_eq!(
            m.generated_span(TextSpan::new(3, 8)),
            Some(TextSpan::new(3, 8))
        );
        assert_eq!(m.generated_span(TextSpan::new(0, 4)), None);
        assert_eq!(
            m.original_span(TextSpan::new(4, 7)),
            Some(TextSpan::new(4, 7))
        );
    }
}
