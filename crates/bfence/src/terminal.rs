//! Styled terminal output for CLI commands.

use std::fmt::Write as _;
use std::path::Path;

use console::style;

/// Print a success message to stderr.
pub fn success(message: &str) {
    eprintln!("{} {}", style("✓").green().bold(), message);
}

/// Print an error message to stderr.
pub fn error(message: &str) {
    eprintln!("{} {}", style("✗").red().bold(), message);
}

/// Print a warning message to stderr.
pub fn warning(message: &str) {
    eprintln!("{} {}", style("!").yellow().bold(), message);
}

/// Print a path output (like "-> /path/to/file").
pub fn path_output(path: &Path) {
    eprintln!("  {} {}", style("→").dim(), style(path.display()).dim());
}

// ============================================================================
// Table output
// ============================================================================

/// Column alignment.
#[derive(Clone, Copy, Default)]
pub enum Alignment {
    #[default]
    Left,
    Right,
}

/// Markdown table builder.
pub struct Table {
    headers: Vec<String>,
    rows: Vec<Vec<String>>,
    alignments: Vec<Alignment>,
}

impl Table {
    /// Create a table; every column is left-aligned until told otherwise.
    pub fn new(headers: &[&str]) -> Self {
        Self {
            headers: headers.iter().map(ToString::to_string).collect(),
            rows: Vec::new(),
            alignments: vec![Alignment::Left; headers.len()],
        }
    }

    /// Set column alignments.
    pub fn with_alignments(mut self, alignments: Vec<Alignment>) -> Self {
        self.alignments = alignments;
        self
    }

    pub fn add_row(&mut self, row: Vec<String>) {
        self.rows.push(row);
    }

    fn widths(&self) -> Vec<usize> {
        let mut widths: Vec<usize> = self.headers.iter().map(String::len).collect();
        for row in &self.rows {
            for (width, cell) in widths.iter_mut().zip(row) {
                *width = (*width).max(cell.len());
            }
        }
        widths
    }

    fn alignment(&self, column: usize) -> Alignment {
        self.alignments.get(column).copied().unwrap_or_default()
    }

    /// Render as a markdown table.
    pub fn render(&self) -> String {
        if self.headers.is_empty() {
            return String::new();
        }
        let widths = self.widths();
        let mut out = String::new();

        out.push('|');
        for (header, &w) in self.headers.iter().zip(&widths) {
            let _ = write!(out, " {header:<w$} |");
        }
        out.push_str("\n|");
        for (column, &w) in widths.iter().enumerate() {
            let dashes = "-".repeat(w + 1);
            match self.alignment(column) {
                Alignment::Left => {
                    let _ = write!(out, ":{dashes}|");
                }
                Alignment::Right => {
                    let _ = write!(out, "{dashes}:|");
                }
            }
        }
        out.push('\n');

        for row in &self.rows {
            out.push('|');
            for (column, (cell, &w)) in row.iter().zip(&widths).enumerate() {
                match self.alignment(column) {
                    Alignment::Left => {
                        let _ = write!(out, " {cell:<w$} |");
                    }
                    Alignment::Right => {
                        let _ = write!(out, " {cell:>w$} |");
                    }
                }
            }
            out.push('\n');
        }
        out
    }

    /// Print the table to stdout.
    pub fn print(&self) {
        print!("{}", self.render());
    }
}
