use super::ParseOutcome;
use crate::diagnostics::ParseErrorMessage;
use once_cell::sync::Lazy;
use regex::Regex;

/// `FATAL - ...`, `ERROR - ...`, `WARN - ...` (optionally after a timestamp).
static LEVEL: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^(?:\[\d+\]\s+\S+\s+)?(FATAL|ERROR|WARN|INFO)\s+-\s+(.*)$").unwrap());
static LINE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\bline (\d+)").unwrap());
static DATASOURCE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"BibTeX subsystem: (\S+?), line (\d+)").unwrap());

/// Scans Biber console output.
pub fn parse_biber(output: &str) -> ParseOutcome {
    let mut outcome = ParseOutcome::default();
    for line in output.lines() {
        let Some(caps) = LEVEL.captures(line.trim()) else {
            continue;
        };
        let message = caps[2].trim();
        let mut diagnostic = match &caps[1] {
            "FATAL" | "ERROR" => ParseErrorMessage::error(message),
            "WARN" => ParseErrorMessage::warning(message),
            _ => continue,
        };
        if let Some(source) = DATASOURCE.captures(message) {
            diagnostic = diagnostic
                .in_file(source[1].to_string())
                .at_line(source[2].parse().unwrap_or(0));
        } else if let Some(number) = LINE.captures(message) {
            diagnostic = diagnostic.at_line(number[1].parse().unwrap_or(0));
        }
        outcome.push(diagnostic);
    }
    outcome
}
