//! Offset trace table linking original text to its generated projection.
//!
//! A text transform that carries runs of the original through to its output
//! records one [`TraceEntry`] per preserved run. The table answers offset
//! lookups in both directions; offsets that fall into transformed-away gaps
//! have no counterpart and return `None`.

use crate::span::TextSpan;

/// One contiguous run of text carried from the original document into the
/// generated one.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TraceEntry {
    pub original: TextSpan,
    pub generated: TextSpan,
}

impl TraceEntry {
    pub fn new(original: TextSpan, generated: TextSpan) -> Self {
        Self {
            original,
            generated,
        }
    }

    /// A run that sits at the same offsets in both texts.
    pub fn identity(span: TextSpan) -> Self {
        Self {
            original: span,
            generated: span,
        }
    }

    /// Map an original offset into the generated run.
    pub fn to_generated(&self, offset: u32) -> Option<u32> {
        if self.original.contains(offset) {
            let relative = offset - self.original.start;
            // Clamp to the generated run
            Some(self.generated.start + relative.min(self.generated.len().saturating_sub(1)))
        } else {
            None
        }
    }

    /// Map a generated offset into the original run.
    pub fn to_original(&self, offset: u32) -> Option<u32> {
        if self.generated.contains(offset) {
            let relative = offset - self.generated.start;
            Some(self.original.start + relative.min(self.original.len().saturating_sub(1)))
        } else {
            None
        }
    }
}

/// Ordered table of preserved runs.
///
/// Runs are emitted left to right by the transform, so entries are monotone
/// in both coordinates and both directions binary search.
#[derive(Debug, Clone, Default)]
pub struct TraceTable {
    entries: Vec<TraceEntry>,
}

impl TraceTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_entries(mut entries: Vec<TraceEntry>) -> Self {
        entries.sort_by_key(|e| e.original.start);
        Self { entries }
    }

    /// Append a run. Entries must arrive in original-text order.
    pub fn push(&mut self, entry: TraceEntry) {
        debug_assert!(
            self.entries
                .last()
                .map_or(true, |last| last.original.end <= entry.original.start
                    && last.generated.end <= entry.generated.start),
            "trace entries must be monotone in both coordinates"
        );
        if entry.original.is_empty() {
            return;
        }
        self.entries.push(entry);
    }

    /// Append a run occupying the same offsets in both texts.
    pub fn push_identity(&mut self, start: u32, end: u32) {
        self.push(TraceEntry::identity(TextSpan::new(start, end)));
    }

    /// Append a run of `len` bytes starting at different offsets.
    pub fn push_run(&mut self, original_start: u32, generated_start: u32, len: u32) {
        self.push(TraceEntry::new(
            TextSpan::new(original_start, original_start + len),
            TextSpan::new(generated_start, generated_start + len),
        ));
    }

    pub fn entries(&self) -> &[TraceEntry] {
        &self.entries
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Map an original offset to its generated counterpart.
    pub fn to_generated(&self, offset: u32) -> Option<u32> {
        let idx = self
            .entries
            .binary_search_by(|e| {
                if e.original.end <= offset {
                    std::cmp::Ordering::Less
                } else if e.original.start > offset {
                    std::cmp::Ordering::Greater
                } else {
                    std::cmp::Ordering::Equal
                }
            })
            .ok()?;
        self.entries.get(idx)?.to_generated(offset)
    }

    /// Map a generated offset back to the original.
    pub fn to_original(&self, offset: u32) -> Option<u32> {
        let idx = self
            .entries
            .binary_search_by(|e| {
                if e.generated.end <= offset {
                    std::cmp::Ordering::Less
                } else if e.generated.start > offset {
                    std::cmp::Ordering::Greater
                } else {
                    std::cmp::Ordering::Equal
                }
            })
            .ok()?;
        self.entries.get(idx)?.to_original(offset)
    }

    /// Like [`to_generated`](Self::to_generated), but also accepts the
    /// exclusive end boundary of a run. Cursor positions sit one past the
    /// last byte they follow, so interactive requests need this.
    pub fn to_generated_cursor(&self, offset: u32) -> Option<u32> {
        if let Some(generated) = self.to_generated(offset) {
            return Some(generated);
        }
        let entry = self.entry_with_original_end(offset)?;
        Some(entry.generated.end)
    }

    /// End-boundary tolerant variant of [`to_original`](Self::to_original).
    pub fn to_original_cursor(&self, offset: u32) -> Option<u32> {
        if let Some(original) = self.to_original(offset) {
            return Some(original);
        }
        let entry = self.entry_with_generated_end(offset)?;
        Some(entry.original.end)
    }

    /// Map an original span into the generated text. Both endpoints must
    /// land in preserved runs.
    pub fn span_to_generated(&self, span: TextSpan) -> Option<TextSpan> {
        if span.is_empty() {
            return Some(TextSpan::empty(self.to_generated_cursor(span.start)?));
        }
        let start = self.to_generated(span.start)?;
        let end = self.to_generated(span.end - 1)? + 1;
        Some(TextSpan::new(start, end))
    }

    /// Map a generated span back to the original text.
    pub fn span_to_original(&self, span: TextSpan) -> Option<TextSpan> {
        if span.is_empty() {
            return Some(TextSpan::empty(self.to_original_cursor(span.start)?));
        }
        let start = self.to_original(span.start)?;
        let end = self.to_original(span.end - 1)? + 1;
        Some(TextSpan::new(start, end))
    }

    fn entry_with_original_end(&self, offset: u32) -> Option<&TraceEntry> {
        let idx = self
            .entries
            .binary_search_by(|e| {
                if e.original.end < offset {
                    std::cmp::Ordering::Less
                } else if e.original.start > offset {
                    std::cmp::Ordering::Greater
                } else {
                    std::cmp::Ordering::Equal
                }
            })
            .ok()?;
        let entry = self.entries.get(idx)?;
        (entry.original.end == offset).then_some(entry)
    }

    fn entry_with_generated_end(&self, offset: u32) -> Option<&TraceEntry> {
        let idx = self
            .entries
            .binary_search_by(|e| {
                if e.generated.end < offset {
                    std::cmp::Ordering::Less
                } else if e.generated.start > offset {
                    std::cmp::Ordering::Greater
                } else {
                    std::cmp::Ordering::Equal
                }
            })
            .ok()?;
        let entry = self.entries.get(idx)?;
        (entry.generated.end == offset).then_some(entry)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn table() -> TraceTable {
        let mut t = TraceTable::new();
        t.push_run(10, 100, 10);
        t.push_run(30, 200, 10);
        t
    }

    #[test]
    fn test_entry_to_generated() {
        let entry = TraceEntry::new(TextSpan::new(10, 20), TextSpan::new(100, 110));
        assert_eq!(entry.to_generated(10), Some(100));
        assert_eq!(entry.to_generated(15), Some(105));
        assert_eq!(entry.to_generated(19), Some(109));
        assert_eq!(entry.to_generated(9), None);
        assert_eq!(entry.to_generated(20), None);
    }

    #[test]
    fn test_entry_to_original() {
        let entry = TraceEntry::new(TextSpan::new(10, 20), TextSpan::new(100, 110));
        assert_eq!(entry.to_original(100), Some(10));
        assert_eq!(entry.to_original(105), Some(15));
        assert_eq!(entry.to_original(110), None);
    }

    #[test]
    fn test_table_lookup() {
        let t = table();
        assert_eq!(t.to_generated(15), Some(105));
        assert_eq!(t.to_generated(35), Some(205));
        assert_eq!(t.to_generated(25), None);
        assert_eq!(t.to_original(105), Some(15));
        assert_eq!(t.to_original(205), Some(35));
        assert_eq!(t.to_original(150), None);
    }

    #[test]
    fn test_cursor_tolerates_run_end() {
        let t = table();
        assert_eq!(t.to_generated(20), None);
        assert_eq!(t.to_generated_cursor(20), Some(110));
        assert_eq!(t.to_original(110), None);
        assert_eq!(t.to_original_cursor(110), Some(20));
        // Offsets in gaps still fail
        assert_eq!(t.to_generated_cursor(25), None);
    }

    #[test]
    fn test_span_mapping() {
        let t = table();
        assert_eq!(
            t.span_to_generated(TextSpan::new(12, 18)),
            Some(TextSpan::new(102, 108))
        );
        // Span reaching a run's end maps its exclusive bound
        assert_eq!(
            t.span_to_generated(TextSpan::new(10, 20)),
            Some(TextSpan::new(100, 110))
        );
        // Endpoints anchor a span even across a transformed gap
        assert_eq!(
            t.span_to_generated(TextSpan::new(15, 35)),
            Some(TextSpan::new(105, 205))
        );
        // A span ending inside a gap has no counterpart
        assert_eq!(t.span_to_generated(TextSpan::new(15, 25)), None);
        assert_eq!(
            t.span_to_original(TextSpan::new(200, 210)),
            Some(TextSpan::new(30, 40))
        );
    }

    #[test]
    fn test_empty_span_maps_at_cursor() {
        let t = table();
        assert_eq!(
            t.span_to_generated(TextSpan::empty(20)),
            Some(TextSpan::empty(110))
        );
        assert_eq!(t.span_to_generated(TextSpan::empty(25)), None);
    }

    #[test]
    fn test_round_trip_identity() {
        let t = table();
        for offset in [10u32, 14, 19, 30, 39] {
            let generated = t.to_generated(offset).unwrap();
            assert_eq!(t.to_original(generated), Some(offset));
        }
        for offset in [100u32, 109, 200, 209] {
            let original = t.to_original(offset).unwrap();
            assert_eq!(t.to_generated(original), Some(offset));
        }
    }
}
