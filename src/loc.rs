//! Source location bookkeeping shared by every pass.
//!
//! The parser hands back `Span`s (byte offsets into the source text); every
//! diagnostic and every `Binding::declared_at` wants a `{line, column}` pair
//! instead. `LineIndex` builds the offset table once per translation unit.

use oxc_span::Span;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SourceLocation {
    pub line: u32,
    pub column: u32,
}

pub struct LineIndex {
    /// Byte offset of the start of each line.
    line_starts: Vec<u32>,
}

impl LineIndex {
    pub fn new(source: &str) -> Self {
        let mut line_starts = vec![0u32];
        for (i, b) in source.bytes().enumerate() {
            if b == b'\n' {
                line_starts.push((i + 1) as u32);
            }
        }
        Self { line_starts }
    }

    pub fn locate(&self, offset: u32) -> SourceLocation {
        let line = match self.line_starts.binary_search(&offset) {
            Ok(idx) => idx,
            Err(idx) => idx.saturating_sub(1),
        };
        let line_start = self.line_starts[line];
        SourceLocation {
            line: line as u32 + 1,
            column: offset.saturating_sub(line_start) + 1,
        }
    }

    pub fn locate_span(&self, span: Span) -> SourceLocation {
        self.locate(span.start)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn locates_first_line() {
        let idx = LineIndex::new("abc\ndef\n");
        assert_eq!(idx.locate(0), SourceLocation { line: 1, column: 1 });
        assert_eq!(idx.locate(2), SourceLocation { line: 1, column: 3 });
    }

    #[test]
    fn locates_later_lines() {
        let idx = LineIndex::new("abc\ndef\nghi");
        assert_eq!(idx.locate(4), SourceLocation { line: 2, column: 1 });
        assert_eq!(idx.locate(9), SourceLocation { line: 3, column: 2 });
    }
}
