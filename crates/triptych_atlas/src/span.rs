//! Half-open byte spans over UTF-8 text.

/// A byte range `[start, end)` in document text.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct TextSpan {
    pub start: u32,
    pub end: u32,
}

impl TextSpan {
    pub fn new(start: u32, end: u32) -> Self {
        Self { start, end }
    }

    /// Zero-length span at the given offset.
    pub fn empty(at: u32) -> Self {
        Self { start: at, end: at }
    }

    pub fn len(&self) -> u32 {
        self.end.saturating_sub(self.start)
    }

    pub fn is_empty(&self) -> bool {
        self.end <= self.start
    }

    /// Check if the span contains the byte offset (start inclusive, end exclusive).
    pub fn contains(&self, offset: u32) -> bool {
        offset >= self.start && offset < self.end
    }

    /// Check if `other` lies entirely within this span.
    pub fn contains_span(&self, other: TextSpan) -> bool {
        other.start >= self.start && other.end <= self.end
    }

    /// Check if the spans share at least one byte.
    pub fn overlaps(&self, other: TextSpan) -> bool {
        self.start < other.end && other.start < self.end
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_contains() {
        let span = TextSpan::new(10, 20);
        assert!(!span.contains(9));
        assert!(span.contains(10));
        assert!(span.contains(15));
        assert!(span.contains(19));
        assert!(!span.contains(20));
    }

    #[test]
    fn test_empty() {
        let span = TextSpan::empty(5);
        assert!(span.is_empty());
        assert_eq!(span.len(), 0);
        assert!(!span.contains(5));
    }

    #[test]
    fn test_contains_span() {
        let outer = TextSpan::new(0, 100);
        assert!(outer.contains_span(TextSpan::new(0, 100)));
        assert!(outer.contains_span(TextSpan::new(10, 20)));
        assert!(!outer.contains_span(TextSpan::new(90, 101)));
    }

    #[test]
    fn test_overlaps() {
        let span = TextSpan::new(10, 20);
        assert!(span.overlaps(TextSpan::new(15, 25)));
        assert!(span.overlaps(TextSpan::new(0, 11)));
        assert!(!span.overlaps(TextSpan::new(20, 30)));
        assert!(!span.overlaps(TextSpan::new(0, 10)));
    }
}
