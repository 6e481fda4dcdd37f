use super::ParseOutcome;
use crate::diagnostics::ParseErrorMessage;
use once_cell::sync::Lazy;
use regex::Regex;

/// `!! Input index error (file = main.idx, line = 12):`
static INPUT_ERROR: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^!! Input index error \(file = (.+?), line = (\d+)\):").unwrap()
});
/// `## Warning (input = main.idx, line = 3; output = main.ind, line = 9):`
static WARNING: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^## Warning \(input = (.+?), line = (\d+);").unwrap());

/// Scans makeindex console output. Both error and warning headers are
/// followed by an indented description line.
pub fn parse_makeindex(output: &str) -> ParseOutcome {
    let mut outcome = ParseOutcome::default();
    let lines: Vec<&str> = output.lines().collect();

    for (i, line) in lines.iter().enumerate() {
        let description = || {
            lines
                .get(i + 1)
                .map(|next| next.trim().trim_start_matches("--").trim().to_string())
                .filter(|next| !next.is_empty())
        };

        if let Some(caps) = INPUT_ERROR.captures(line) {
            let message = description().unwrap_or_else(|| "Input index error".to_string());
            outcome.push(
                ParseErrorMessage::error(message)
                    .in_file(caps[1].to_string())
                    .at_line(caps[2].parse().unwrap_or(0)),
            );
        } else if let Some(caps) = WARNING.captures(line) {
            let message = description().unwrap_or_else(|| "Index warning".to_string());
            outcome.push(
                ParseErrorMessage::warning(message)
                    .in_file(caps[1].to_string())
                    .at_line(caps[2].parse().unwrap_or(0)),
            );
        } else if line.trim_end().ends_with("not found.") {
            outcome.push(ParseErrorMessage::error(line.trim()));
        }
    }
    outcome
}
