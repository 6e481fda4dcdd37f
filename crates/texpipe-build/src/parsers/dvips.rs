use super::ParseOutcome;
use crate::diagnostics::ParseErrorMessage;

/// Scans dvips console output: `dvips: !` lines are fatal, missing fonts and
/// figures are warnings.
pub fn parse_dvips(output: &str) -> ParseOutcome {
    let mut outcome = ParseOutcome::default();
    for line in output.lines().map(str::trim) {
        if let Some(message) = line.strip_prefix("dvips: !") {
            outcome.push(ParseErrorMessage::error(message.trim()));
        } else if line.starts_with("dvips:")
            && (line.contains("not found") || line.contains("Couldn't find"))
        {
            let message = line.trim_start_matches("dvips:").trim();
            outcome.push(ParseErrorMessage::warning(message));
        }
    }
    outcome
}
