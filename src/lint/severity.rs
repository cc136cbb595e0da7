//! Severity resolution for parsed linter messages.

use std::collections::HashMap;

use lsp_types::DiagnosticSeverity;

/// Built-in symbol classes and the override key each one falls back to.
const SYMBOL_DEFAULTS: &[(&str, &str)] = &[("M", "error"), ("W", "warning")];

/// Label used when nothing else matches.
const FALLBACK_LABEL: &str = "Warning";

/// Resolves the severity of one message.
///
/// Lookup order, first hit wins: exact `code` (e.g. `W009`), `category`
/// (e.g. `not-enough-space-before-comment`), `symbol` (e.g. `W`), then the
/// override keyed by the symbol's built-in class (`error`/`warning`), then
/// `Warning`. A label that names no severity also resolves to `Warning`.
pub fn severity(
    symbol: &str,
    code: &str,
    category: &str,
    overrides: &HashMap<String, String>,
) -> DiagnosticSeverity {
    let lookup = |key: &str| {
        overrides
            .get(key)
            .map(String::as_str)
            .filter(|label| !label.is_empty())
    };

    let label = lookup(code)
        .or_else(|| lookup(category))
        .or_else(|| lookup(symbol))
        .or_else(|| {
            SYMBOL_DEFAULTS
                .iter()
                .find(|(class, _)| *class == symbol)
                .and_then(|(_, key)| lookup(key))
        })
        .unwrap_or(FALLBACK_LABEL);

    parse_label(label).unwrap_or(DiagnosticSeverity::WARNING)
}

/// Maps a severity label onto the protocol enum, ignoring ASCII case.
pub fn parse_label(label: &str) -> Option<DiagnosticSeverity> {
    match label.to_ascii_lowercase().as_str() {
        "error" => Some(DiagnosticSeverity::ERROR),
        "warning" => Some(DiagnosticSeverity::WARNING),
        "information" => Some(DiagnosticSeverity::INFORMATION),
        "hint" => Some(DiagnosticSeverity::HINT),
        _ => None,
    }
}
