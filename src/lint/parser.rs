//! Parser for gaplint's textual diagnostics.
//!
//! gaplint writes one message per line to stderr. The position part of the
//! line grew over the tool's history (line only, then columns, then ranges),
//! so each line is tried against [`GRAMMARS`] from most to least specific.
//! Lines that match no grammar (banners, summaries, blank lines) are skipped.

use std::collections::HashMap;
use std::sync::LazyLock;

use lsp_types::{Diagnostic, DiagnosticSeverity, NumberOrString, Position, Range};
use regex::{Captures, Regex};

use super::severity::severity;

/// Suffix shared by every grammar: `message [W046/unused-func-args]`.
const MESSAGE_AND_CODE: &str =
    r": (?P<message>[^\[\r\n]*) \[(?P<code>(?P<symbol>\w)\d+)/(?P<category>[^\]\r\n]*)\]";

/// Position prefixes, most specific first.
const POSITION_FORMS: &[&str] = &[
    r"^.*:(?P<line>\d+)-(?P<end_line>\d+):(?P<column>\d+)-(?P<end_column>\d+)",
    r"^.*:(?P<line>\d+):(?P<column>\d+)-(?P<end_column>\d+)",
    r"^.*:(?P<line>\d+):(?P<column>\d+)",
    r"^.*:(?P<line>\d+)-(?P<end_line>\d+)",
    r"^.*:(?P<line>\d+)",
];

/// Compiled grammars in priority order.
///
/// New output formats are supported by adding a position form above.
pub static GRAMMARS: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    POSITION_FORMS
        .iter()
        .filter_map(|form| Regex::new(&format!("{form}{MESSAGE_AND_CODE}")).ok())
        .collect()
});

/// Tool positions are 1-based.
const LINE_OFFSET: u32 = 1;
const COLUMN_OFFSET: u32 = 1;

/// One parsed linter message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LintDiagnostic {
    /// 0-based range.
    pub range: Range,
    /// Message text without the code annotation.
    pub message: String,
    /// Symbol plus digits, e.g. `W009`.
    pub code: String,
    /// Free-text rule category, e.g. `not-enough-space-before-comment`.
    pub category: String,
    /// Single-letter message class, e.g. `W`.
    pub symbol: String,
    /// Resolved severity.
    pub severity: DiagnosticSeverity,
    /// Tool identifier.
    pub source: String,
}

impl LintDiagnostic {
    /// The `code/category` form shown to the user.
    pub fn qualified_code(&self) -> String {
        format!("{}/{}", self.code, self.category)
    }

    /// Converts into the protocol representation.
    pub fn into_lsp(self) -> Diagnostic {
        Diagnostic {
            range: self.range,
            severity: Some(self.severity),
            code: Some(NumberOrString::String(self.qualified_code())),
            source: Some(self.source),
            message: self.message,
            ..Default::default()
        }
    }
}

/// Parses raw tool output into diagnostics, in input order.
///
/// `source` is stamped on every diagnostic; `overrides` feeds severity
/// resolution.
pub fn parse(content: &str, overrides: &HashMap<String, String>, source: &str) -> Vec<LintDiagnostic> {
    content
        .lines()
        .filter_map(|raw_line| parse_line(raw_line, overrides, source))
        .collect()
}

fn parse_line(raw_line: &str, overrides: &HashMap<String, String>, source: &str) -> Option<LintDiagnostic> {
    let line = strip_quotes(raw_line);
    let captures = GRAMMARS.iter().find_map(|grammar| grammar.captures(line))?;

    let start_line = position(&captures, "line").unwrap_or(LINE_OFFSET);
    let start_line = start_line.saturating_sub(LINE_OFFSET);
    let start_column = position(&captures, "column")
        .unwrap_or(COLUMN_OFFSET)
        .saturating_sub(COLUMN_OFFSET);

    let end_line = position(&captures, "end_line")
        .map_or(start_line, |end| end.saturating_sub(LINE_OFFSET))
        .max(start_line);
    let end_column = match position(&captures, "end_column") {
        Some(end) => end.saturating_sub(COLUMN_OFFSET),
        // Rest of the raw line; only an approximation of the real extent.
        None => u32::try_from(line.chars().count())
            .unwrap_or(u32::MAX)
            .saturating_sub(COLUMN_OFFSET),
    };
    let end_column = if end_line == start_line {
        end_column.max(start_column)
    } else {
        end_column
    };

    let symbol = captures.name("symbol")?.as_str();
    let code = captures.name("code")?.as_str();
    let category = captures.name("category")?.as_str();
    let message = captures.name("message")?.as_str().trim_end();

    Some(LintDiagnostic {
        range: Range {
            start: Position {
                line: start_line,
                character: start_column,
            },
            end: Position {
                line: end_line,
                character: end_column,
            },
        },
        message: message.to_string(),
        code: code.to_string(),
        category: category.to_string(),
        symbol: symbol.to_string(),
        severity: severity(symbol, code, category, overrides),
        source: source.to_string(),
    })
}

/// Strips one layer of single quotes wrapping the whole line.
fn strip_quotes(line: &str) -> &str {
    if line.len() >= 2 && line.starts_with('\'') && line.ends_with('\'') {
        &line[1..line.len() - 1]
    } else {
        line
    }
}

/// A numeric capture; malformed or oversized values count as absent.
fn position(captures: &Captures<'_>, name: &str) -> Option<u32> {
    captures.name(name)?.as_str().parse().ok()
}
