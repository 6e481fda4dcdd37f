use super::ParseOutcome;
use crate::diagnostics::ParseErrorMessage;

/// Scans output of the Ghostscript wrappers (`ps2pdf`, `dvipdf`).
pub fn parse_ghostscript(output: &str) -> ParseOutcome {
    let mut outcome = ParseOutcome::default();
    for line in output.lines().map(str::trim) {
        // The wrappers prefix the fatal line with the product banner.
        if line.starts_with("Error:")
            || line.starts_with("Unrecoverable error")
            || line.contains(": Unrecoverable error")
        {
            outcome.push(ParseErrorMessage::error(line));
        } else if let Some(message) = line.strip_prefix("**** Warning:") {
            outcome.push(ParseErrorMessage::warning(message.trim()));
        } else if let Some(message) = line.strip_prefix("**** Error:") {
            outcome.push(ParseErrorMessage::error(message.trim()));
        }
    }
    outcome
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_postscript_error() {
        let log = "Error: /undefined in foo\n\
                   Operand stack:\n\
                   Unrecoverable error, exit code 1\n";
        let outcome = parse_ghostscript(log);
        assert_eq!(outcome.error_count(), 2);
        assert_eq!(outcome.diagnostics[0].message, "Error: /undefined in foo");
    }

    #[test]
    fn test_repair_warning() {
        let outcome = parse_ghostscript("   **** Warning: File has a corrupted %%EOF marker.\n");
        assert_eq!(outcome.diagnostics.len(), 1);
        assert!(!outcome.has_errors());
    }
}
