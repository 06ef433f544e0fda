mod error;
mod grammar;

pub use error::ParseError;

use winnow::error::{ContextError, ErrMode};
use winnow::stream::{LocatingSlice, Stateful, Stream};

use crate::types::{Diagnostic, DiagnosticCode, Document, Span};

const SOURCE: &str = "parser";

/// Parse rule text into a [`Document`].
///
/// Never fails: syntax problems become `CODE_PARSER` diagnostics on the
/// returned document, which keeps every rule recognised before the first
/// syntax error.
#[must_use]
pub fn parse(source: &str) -> Document {
    let recovered = grammar::Recovered::default();
    let mut input = Stateful {
        input: LocatingSlice::new(source),
        state: &recovered,
    };
    let mut doc = Document::new(source);
    let result = grammar::document(&mut input, &mut doc);

    for (message, span) in recovered.problems.take() {
        let range = doc.range(span);
        doc.push_diagnostic(Diagnostic::error(message, range, SOURCE).with_code(DiagnosticCode::Parser));
    }
    if let Err(err) = result {
        let offset = source.len() - input.eof_offset();
        let found = source[offset..].chars().next();
        let end = offset + found.map_or(0, char::len_utf8);
        let range = doc.range(Span::new(offset, end));
        doc.push_diagnostic(
            Diagnostic::error(describe(&err, found), range, SOURCE).with_code(DiagnosticCode::Parser),
        );
    }

    tracing::debug!(
        rules = doc.rules.len(),
        mappings = doc.mappings.len(),
        diagnostics = doc.diagnostics.len(),
        "parsed rule document"
    );
    doc
}

/// Parse rule text, failing on the first syntax problem.
///
/// # Errors
///
/// Returns [`ParseError`] if the input is not valid rule syntax.
pub fn parse_strict(source: &str) -> Result<Document, ParseError> {
    let doc = parse(source);
    match doc
        .diagnostics
        .iter()
        .find(|d| d.code == Some(DiagnosticCode::Parser))
    {
        Some(d) => Err(ParseError::new(d.message.clone(), d.range)),
        None => Ok(doc),
    }
}

fn describe(err: &ErrMode<ContextError>, found: Option<char>) -> String {
    let found = found.map_or_else(|| "end of input".to_owned(), |c| format!("'{c}'"));
    let detail = match err {
        ErrMode::Backtrack(e) | ErrMode::Cut(e) => e.to_string().replace('\n', ", "),
        ErrMode::Incomplete(_) => String::new(),
    };
    if detail.is_empty() {
        format!("Syntax error: unexpected {found}")
    } else {
        format!("Syntax error: {detail} (found {found})")
    }
}
