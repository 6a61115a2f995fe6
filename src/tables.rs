//! Table structure detection on linearized text
//!
//! PDF text extraction loses the grid, so tables arrive either as rows with
//! several whitespace-separated values or as one cell per line. This pass
//! groups runs of such lines into `[TABLE_START]` … `[TABLE_END]` blocks.
//!
//! The detector is a two-state accumulator (`Idle`, `Buffering`) driven by
//! the named predicates below, each of which is public and tested on its own.

use once_cell::sync::Lazy;
use regex::Regex;

/// Options for table detection
#[derive(Debug, Clone, Default)]
pub struct TableOptions {
    /// Validate the buffer left at end of input with the same rule as
    /// mid-stream flushes. Off by default: the end-of-input flush then only
    /// accepts buffers passing [`looks_like_table_sequence`].
    pub lenient_final_flush: bool,
    /// Emit buffered multi-column rows as `[TABLE_ROW: …]` rather than
    /// `[TABLE_CELL: …]`
    pub row_markers: bool,
}

const MAX_CELL_CHARS: usize = 25;
const MAX_IDENTIFIER_CHARS: usize = 15;
const MAX_SHORT_CELL_CHARS: usize = 10;
const MIN_SEQUENCE_LINES: usize = 6;
const MIN_NUMERIC_LINES: usize = 3;

static NUMERIC_TOKEN_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"^[\d,.]+$").unwrap());

static NUMERIC_CELL_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^[+\-−±]?(?:\d[\d,.]*|\.\d+)(?:±\d[\d,.]*)?%?$").unwrap()
});

static SECTION_HEADER_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"^\d+(?:\.\d+)+\s+\S").unwrap());

static LIST_ITEM_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^(?:[•●○◦▪■*\-–]\s|\(\d+\)|（\d+）|\d+[.)]\s|\d+、|[a-zA-Z][.)]\s)").unwrap()
});

static IDENTIFIER_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[A-Za-z](?:[A-Za-z0-9_\-.+/]*[A-Za-z0-9+])?$").unwrap());

const SENTENCE_END: [char; 10] = ['。', '．', '.', '！', '!', '？', '?', '；', ';', '…'];

/// Markers from earlier passes; such lines never join a table
const MARKER_PREFIXES: [&str; 3] = ["[FORMULA:", "[FIGURE:", "[TABLE_"];

/// A row with three or more columns, at least one of them a plain number
pub fn is_multi_column_row(line: &str) -> bool {
    let parts: Vec<&str> = line.split_whitespace().collect();
    parts.len() >= 3 && parts.iter().any(|p| NUMERIC_TOKEN_RE.is_match(p))
}

/// A number or percentage on its own, e.g. `12,345`, `-0.5`, `93.2%`
pub fn is_numeric_line(line: &str) -> bool {
    NUMERIC_CELL_RE.is_match(line.trim())
}

/// Numbered section headers like `4.2 实验结果` or chapter lines starting with `第`
pub fn is_section_header(line: &str) -> bool {
    let trimmed = line.trim();
    trimmed.starts_with('第') || SECTION_HEADER_RE.is_match(trimmed)
}

/// Bulleted or numbered list items
pub fn is_list_item(line: &str) -> bool {
    LIST_ITEM_RE.is_match(line.trim_start())
}

/// A line that could be a single table cell
pub fn is_candidate_cell(line: &str) -> bool {
    let trimmed = line.trim();
    let len = trimmed.chars().count();

    if len == 0 || len > MAX_CELL_CHARS {
        return false;
    }
    if is_section_header(trimmed) || is_list_item(trimmed) {
        return false;
    }

    if is_numeric_line(trimmed) {
        return true;
    }
    if len <= MAX_IDENTIFIER_CHARS && IDENTIFIER_RE.is_match(trimmed) {
        return true;
    }
    len <= MAX_SHORT_CELL_CHARS && !trimmed.ends_with(SENTENCE_END)
}

fn is_marker_line(line: &str) -> bool {
    let trimmed = line.trim_start();
    MARKER_PREFIXES.iter().any(|p| trimmed.starts_with(p))
}

fn buffers_as_cell(line: &str) -> bool {
    !is_marker_line(line) && is_candidate_cell(line)
}

/// Enough lines, a solid block of numbers, and some labels among them
pub fn looks_like_table_sequence(lines: &[&str]) -> bool {
    if lines.len() < MIN_SEQUENCE_LINES {
        return false;
    }
    let numeric = lines.iter().filter(|l| is_numeric_line(l)).count();
    numeric >= MIN_NUMERIC_LINES && numeric < lines.len()
}

/// Acceptance rule for a buffer flushed by a non-table line
pub fn is_valid_table_buffer(lines: &[&str]) -> bool {
    lines.len() >= 2
        && (looks_like_table_sequence(lines) || lines.iter().any(|l| is_numeric_line(l)))
}

/// Acceptance rule for the buffer left at end of input
fn is_valid_final_buffer(lines: &[&str], options: &TableOptions) -> bool {
    if options.lenient_final_flush {
        is_valid_table_buffer(lines)
    } else {
        lines.len() >= 2 && looks_like_table_sequence(lines)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum DetectorState {
    Idle,
    Buffering,
}

struct TableAccumulator<'a> {
    options: &'a TableOptions,
    state: DetectorState,
    buffer: Vec<&'a str>,
    out: Vec<String>,
}

impl<'a> TableAccumulator<'a> {
    fn new(options: &'a TableOptions) -> Self {
        Self {
            options,
            state: DetectorState::Idle,
            buffer: Vec::new(),
            out: Vec::new(),
        }
    }

    fn should_buffer(&self, line: &str, next: Option<&str>) -> bool {
        if is_marker_line(line) {
            return false;
        }
        if is_multi_column_row(line) {
            return true;
        }
        if !buffers_as_cell(line) {
            return false;
        }
        self.state == DetectorState::Buffering
            || !self.buffer.is_empty()
            || next.is_some_and(buffers_as_cell)
    }

    fn feed(&mut self, line: &'a str, next: Option<&str>) {
        if self.should_buffer(line, next) {
            self.state = DetectorState::Buffering;
            self.buffer.push(line);
        } else {
            if self.buffer.len() >= 2 && is_valid_table_buffer(&self.buffer) {
                self.emit_table();
            } else {
                self.emit_plain();
            }
            self.out.push(line.to_string());
            self.state = DetectorState::Idle;
        }
    }

    fn finish(mut self) -> Vec<String> {
        if is_valid_final_buffer(&self.buffer, self.options) {
            self.emit_table();
        } else {
            self.emit_plain();
        }
        self.out
    }

    fn emit_table(&mut self) {
        log::debug!("table block with {} lines", self.buffer.len());
        self.out.push("[TABLE_START]".to_string());
        for line in self.buffer.drain(..) {
            let trimmed = line.trim();
            if self.options.row_markers && is_multi_column_row(trimmed) {
                self.out.push(format!("[TABLE_ROW: {}]", trimmed));
            } else {
                self.out.push(format!("[TABLE_CELL: {}]", trimmed));
            }
        }
        self.out.push("[TABLE_END]".to_string());
    }

    /// Rejected buffers come back trimmed, like accepted cells
    fn emit_plain(&mut self) {
        self.out
            .extend(self.buffer.drain(..).map(|line| line.trim().to_string()));
    }
}

/// Wrap runs of table-like lines in table markers
pub fn detect_table_structure(text: &str, options: &TableOptions) -> String {
    let lines: Vec<&str> = text.split('\n').collect();
    let mut acc = TableAccumulator::new(options);

    for (i, &line) in lines.iter().enumerate() {
        acc.feed(line, lines.get(i + 1).copied());
    }

    acc.finish().join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn detect(text: &str) -> String {
        detect_table_structure(text, &TableOptions::default())
    }

    #[test]
    fn test_multi_column_row() {
        assert!(is_multi_column_row("ResNet-50 76.1 25.6"));
        assert!(is_multi_column_row("a b 1,000"));
        assert!(!is_multi_column_row("76.1 25.6"));
        assert!(!is_multi_column_row("three plain words"));
    }

    #[test]
    fn test_numeric_line() {
        assert!(is_numeric_line("42"));
        assert!(is_numeric_line(" 1,234.5 "));
        assert!(is_numeric_line("93.2%"));
        assert!(is_numeric_line("-0.5"));
        assert!(is_numeric_line("76.3±0.2"));
        assert!(!is_numeric_line("..."));
        assert!(!is_numeric_line("v2"));
    }

    #[test]
    fn test_candidate_cell() {
        assert!(is_candidate_cell("12.5"));
        assert!(is_candidate_cell("CIFAR-10"));
        assert!(is_candidate_cell("准确率"));
        assert!(is_candidate_cell("Top-1 Acc"));
        assert!(!is_candidate_cell(""));
        assert!(!is_candidate_cell("完成。"));
        assert!(!is_candidate_cell("Done."));
        assert!(!is_candidate_cell("4.2 实验结果"));
        assert!(!is_candidate_cell("第三章"));
        assert!(!is_candidate_cell("1. First"));
        assert!(!is_candidate_cell("• item"));
        assert!(!is_candidate_cell("This line is far too long to be a cell"));
    }

    #[test]
    fn test_section_header_does_not_start_table() {
        let text = "4.2 实验结果\n3.5\n本节介绍实验的设置与主要结果，并进行分析。";
        assert_eq!(detect(text), text);
    }

    #[test]
    fn test_six_cells_become_one_table() {
        let text = "Dataset\nCIFAR-10\nMNIST\n10\n20\n30\nThe table above lists the datasets used.";
        let out = detect(text);
        let lines: Vec<&str> = out.split('\n').collect();
        assert_eq!(
            lines,
            vec![
                "[TABLE_START]",
                "[TABLE_CELL: Dataset]",
                "[TABLE_CELL: CIFAR-10]",
                "[TABLE_CELL: MNIST]",
                "[TABLE_CELL: 10]",
                "[TABLE_CELL: 20]",
                "[TABLE_CELL: 30]",
                "[TABLE_END]",
                "The table above lists the datasets used.",
            ]
        );
    }

    #[test]
    fn test_single_numeric_line_not_a_table() {
        let text = "42\nThis paragraph is ordinary prose and continues.";
        assert_eq!(detect(text), text);
    }

    #[test]
    fn test_multi_column_rows_with_numeric_cell() {
        let text = "Results follow.\nModel A 76.1 25.6\nModel B 78.3 44.5\n0.5\n\nDone.";
        assert_eq!(
            detect(text),
            "Results follow.\n[TABLE_START]\n[TABLE_CELL: Model A 76.1 25.6]\n[TABLE_CELL: Model B 78.3 44.5]\n[TABLE_CELL: 0.5]\n[TABLE_END]\n\nDone."
        );
    }

    #[test]
    fn test_rows_without_numeric_line_rejected() {
        let text = "Model A 76.1 25.6\nModel B 78.3 44.5\n\nDone.";
        assert_eq!(detect(text), text);
    }

    #[test]
    fn test_rejected_rows_are_trimmed() {
        let text = "  Model A 76.1 25.6  \n  Model B 78.3 44.5\n\nDone.";
        assert_eq!(detect(text), "Model A 76.1 25.6\nModel B 78.3 44.5\n\nDone.");

        // Lines that never buffered keep their spacing
        let prose = "  indented prose that is long enough  \nDone.";
        assert_eq!(detect(prose), prose);
    }

    #[test]
    fn test_row_markers() {
        let options = TableOptions {
            row_markers: true,
            ..Default::default()
        };
        let out = detect_table_structure("Model A 76.1 25.6\nModel B 78.3 44.5\n0.5\n", &options);
        assert!(out.contains("[TABLE_ROW: Model A 76.1 25.6]"));
        assert!(out.contains("[TABLE_ROW: Model B 78.3 44.5]"));
        assert!(out.contains("[TABLE_CELL: 0.5]"));
    }

    #[test]
    fn test_unvalidated_buffer_passes_through() {
        // Two short labels without any number are not a table
        let text = "Alpha\nBeta\nA closing sentence that is long enough.";
        assert_eq!(detect(text), text);
    }

    #[test]
    fn test_final_flush_is_stricter_by_default() {
        let text = "Name\n12";
        assert_eq!(detect(text), text);

        let lenient = TableOptions {
            lenient_final_flush: true,
            ..Default::default()
        };
        assert_eq!(
            detect_table_structure(text, &lenient),
            "[TABLE_START]\n[TABLE_CELL: Name]\n[TABLE_CELL: 12]\n[TABLE_END]"
        );
    }

    #[test]
    fn test_final_flush_accepts_table_sequence() {
        let text = "Method\nOurs\nBase\n1.0\n2.0\n3.0";
        let out = detect(text);
        assert!(out.starts_with("[TABLE_START]"));
        assert!(out.ends_with("[TABLE_END]"));
        assert_eq!(out.matches("[TABLE_CELL:").count(), 6);
    }

    #[test]
    fn test_markers_never_nest() {
        let text = "[FORMULA: 𝑥 = 1 + 2 :END_FORMULA]\n[FIGURE:pdfimg1]\n10\n20\nprose line that is long enough here";
        let out = detect(text);
        assert!(out.starts_with("[FORMULA: 𝑥 = 1 + 2 :END_FORMULA]\n[FIGURE:pdfimg1]\n[TABLE_START]"));
        assert!(!out.contains("[TABLE_CELL: [FORMULA:"));
        assert!(!out.contains("[TABLE_CELL: [FIGURE:"));
    }

    #[test]
    fn test_trailing_newline_preserved() {
        let text = "Hello World\n";
        assert_eq!(detect(text), text);
    }
}
