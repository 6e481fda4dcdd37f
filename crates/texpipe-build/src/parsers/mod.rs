//! Per-tool output scanners.
//!
//! Each parser is a pure function from a tool's captured console output to the
//! diagnostics it contains plus hints about follow-up runs. They are heuristic
//! by nature: anything they do not recognise is ignored, never an error.

pub mod bibtex;
pub mod biber;
pub mod dvips;
pub mod ghostscript;
pub mod latex;
pub mod makeindex;

use crate::diagnostics::ParseErrorMessage;

/// What a tool's output says beyond plain diagnostics.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RerunHints {
    /// LaTeX wants another pass to settle references.
    pub cross_references: bool,
    /// Citations are unresolved or the bibliography file is missing.
    pub bibliography: bool,
    /// The document uses biblatex with the Biber backend.
    pub biber: bool,
    /// The index file is missing.
    pub index: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ParseOutcome {
    pub diagnostics: Vec<ParseErrorMessage>,
    pub rerun: RerunHints,
}

impl ParseOutcome {
    pub fn has_errors(&self) -> bool {
        self.diagnostics.iter().any(ParseErrorMessage::is_error)
    }

    pub fn error_count(&self) -> usize {
        self.diagnostics.iter().filter(|d| d.is_error()).count()
    }

    pub(crate) fn push(&mut self, diagnostic: ParseErrorMessage) {
        self.diagnostics.push(diagnostic);
    }
}

pub type OutputParser = fn(&str) -> ParseOutcome;

/// Leading decimal digits of `text`.
pub(crate) fn leading_number(text: &str) -> Option<u32> {
    let digits: String = text.chars().take_while(|c| c.is_ascii_digit()).collect();
    digits.parse().ok()
}
