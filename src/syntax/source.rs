use crate::kernel::tree::{Position, NOWHERE};

/// One loaded source, its text and line starts for position resolution.
struct SourceFile {
    name: String,
    text: String,
    start: Position,
    line_starts: Vec<usize>,
}

/// The flat positions map shared across files: every tree position is a
/// byte offset into the concatenation of everything loaded so far.
#[derive(Default)]
pub struct SourceMap {
    files: Vec<SourceFile>,
    next: Position,
}

/// A resolved position: file, 1-based line and column, and the line text.
pub struct ResolvedPosition {
    pub file: String,
    pub line: usize,
    pub column: usize,
    pub line_text: String,
}

impl SourceMap {
    pub fn new() -> SourceMap {
        SourceMap::default()
    }

    /// Register a source; returns the base offset its positions start at.
    pub fn open(&mut self, name: &str, text: &str) -> Position {
        let mut line_starts = vec![0];
        for (offset, c) in text.char_indices() {
            if c == '\n' {
                line_starts.push(offset + 1);
            }
        }
        let start = self.next;
        self.next += text.len() + 1;
        self.files.push(SourceFile {
            name: name.to_string(),
            text: text.to_string(),
            start,
            line_starts,
        });
        start
    }

    pub fn text(&self, base: Position) -> Option<&str> {
        self.files
            .iter()
            .find(|file| file.start == base)
            .map(|file| file.text.as_str())
    }

    /// File, line and column for a flat position.
    pub fn resolve(&self, position: Position) -> Option<ResolvedPosition> {
        if position == NOWHERE {
            return None;
        }
        let file = self
            .files
            .iter()
            .rev()
            .find(|file| position >= file.start && position <= file.start + file.text.len())?;
        let offset = position - file.start;
        let line_index = match file.line_starts.binary_search(&offset) {
            Ok(index) => index,
            Err(index) => index.saturating_sub(1),
        };
        let line_start = file.line_starts[line_index];
        let line_end = file
            .line_starts
            .get(line_index + 1)
            .map(|next| next.saturating_sub(1))
            .unwrap_or(file.text.len());
        Some(ResolvedPosition {
            file: file.name.clone(),
            line: line_index + 1,
            column: offset - line_start + 1,
            line_text: file.text[line_start..line_end].to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_positions_are_flat_across_files() {
        let mut sources = SourceMap::new();
        let first = sources.open("one.ab", "alpha\nbeta\n");
        let second = sources.open("two.ab", "gamma");
        assert_eq!(first, 0);
        assert!(second > first);

        let resolved = sources.resolve(first + 6).unwrap();
        assert_eq!(resolved.file, "one.ab");
        assert_eq!(resolved.line, 2);
        assert_eq!(resolved.column, 1);
        assert_eq!(resolved.line_text, "beta");

        let resolved = sources.resolve(second + 2).unwrap();
        assert_eq!(resolved.file, "two.ab");
        assert_eq!(resolved.line, 1);
        assert_eq!(resolved.column, 3);
    }

    #[test]
    fn test_nowhere_does_not_resolve() {
        let sources = SourceMap::new();
        assert!(sources.resolve(NOWHERE).is_none());
    }
}
