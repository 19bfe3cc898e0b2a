//! Indentation-aware text building for the IR printer.

use std::fmt;

/// Builds nested text one line at a time; each new line is prefixed with
/// the indent string repeated once per nesting level.
#[derive(Debug)]
pub struct CodeFormatter {
    output: String,
    depth: usize,
    indent_str: String,
    pending_indent: bool,
}

impl CodeFormatter {
    /// Create a new formatter with the given indent string.
    pub fn new(indent_str: &str) -> Self {
        Self {
            output: String::new(),
            depth: 0,
            indent_str: indent_str.to_string(),
            pending_indent: true,
        }
    }

    /// Create a formatter with default settings (2 spaces).
    pub fn default_indent() -> Self {
        Self::new("  ")
    }

    pub fn indent(&mut self) {
        self.depth += 1;
    }

    pub fn dedent(&mut self) {
        self.depth = self.depth.saturating_sub(1);
    }

    /// Append text; a line break moves the next write to a fresh, indented line.
    pub fn write(&mut self, s: &str) {
        let mut lines = s.split('\n').peekable();
        while let Some(line) = lines.next() {
            if !line.is_empty() {
                if self.pending_indent {
                    self.output.push_str(&self.indent_str.repeat(self.depth));
                    self.pending_indent = false;
                }
                self.output.push_str(line);
            }
            if lines.peek().is_some() {
                self.output.push('\n');
                self.pending_indent = true;
            }
        }
    }

    pub fn writeln(&mut self, s: &str) {
        self.write(s);
        self.write("\n");
    }

    /// Open a single-block region: `{`, then the block label at the
    /// current level; the body goes one level deeper.
    pub fn begin_region(&mut self, label: &str) {
        self.writeln("{");
        self.writeln(label);
        self.indent();
    }

    /// Close a region, leaving the line open after the `}`.
    pub fn end_region(&mut self) {
        self.dedent();
        self.write("}");
    }

    /// Get the formatted output.
    pub fn finish(self) -> String {
        self.output
    }
}

impl fmt::Write for CodeFormatter {
    fn write_str(&mut self, s: &str) -> fmt::Result {
        self.write(s);
        Ok(())
    }
}

/// Join displayable items with a separator.
pub fn format_list<T: fmt::Display>(items: &[T], sep: &str) -> String {
    let mut out = String::new();
    for (i, item) in items.iter().enumerate() {
        if i > 0 {
            out.push_str(sep);
        }
        out.push_str(&item.to_string());
    }
    out
}
