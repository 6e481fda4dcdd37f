use super::{leading_number, ParseOutcome};
use crate::diagnostics::ParseErrorMessage;
use once_cell::sync::Lazy;
use regex::Regex;

/// `line N of file X`, after the dashes BibTeX puts in front of it.
static LOCATION: Lazy<Regex> = Lazy::new(|| Regex::new(r"^line (\d+) of file (.+)$").unwrap());
static WARNING_LINE: Lazy<Regex> = Lazy::new(|| Regex::new(r"--line (\d+) of file (.+)$").unwrap());

/// Scans BibTeX console output.
///
/// BibTeX follows an error message with `---line N of file X`, either on the
/// same line or on the next one, so a message without a location is held
/// until the next line shows whether one follows.
pub fn parse_bibtex(output: &str) -> ParseOutcome {
    let mut outcome = ParseOutcome::default();
    let mut pending: Option<String> = None;

    for line in output.lines() {
        if let Some((number, file)) = line.strip_prefix('-').and_then(location) {
            match pending.take() {
                Some(message) => outcome.push(
                    ParseErrorMessage::error(message)
                        .at_line(number)
                        .in_file(file),
                ),
                // A location on its own belongs to the warning above it.
                None => {
                    if let Some(last) = outcome.diagnostics.last_mut() {
                        if last.line == 0 {
                            last.line = number;
                            last.file = Some(file);
                        }
                    }
                }
            }
            continue;
        }
        if let Some(previous) = pending.take() {
            outcome.push(ParseErrorMessage::error(previous));
        }

        if let Some(rest) = line.strip_prefix("Warning--") {
            let mut diagnostic = ParseErrorMessage::warning(rest.trim());
            if let Some(caps) = WARNING_LINE.captures(rest) {
                diagnostic = diagnostic
                    .at_line(leading_number(&caps[1]).unwrap_or(0))
                    .in_file(caps[2].trim().to_string());
            }
            outcome.push(diagnostic);
        } else if is_error_head(line) {
            match line.split_once("---") {
                Some((message, rest)) => {
                    let mut diagnostic = ParseErrorMessage::error(message.trim());
                    // `---while reading file x` carries no line number.
                    if let Some((number, file)) = location(rest) {
                        diagnostic = diagnostic.at_line(number).in_file(file);
                    }
                    outcome.push(diagnostic);
                }
                None => pending = Some(line.trim().to_string()),
            }
        }
    }
    if let Some(previous) = pending {
        outcome.push(ParseErrorMessage::error(previous));
    }
    outcome
}

fn location(text: &str) -> Option<(u32, String)> {
    let caps = LOCATION.captures(text.trim_start_matches('-'))?;
    Some((leading_number(&caps[1])?, caps[2].trim().to_string()))
}

/// Lines that open a BibTeX error message.
fn is_error_head(line: &str) -> bool {
    line.starts_with("I was expecting")
        || line.starts_with("I couldn't open")
        || line.starts_with("I found no")
        || line.starts_with("Illegal, another \\bib")
        || line.starts_with("You're missing")
        || line.starts_with("Repeated entry")
        || line.ends_with("---this can't happen")
}
