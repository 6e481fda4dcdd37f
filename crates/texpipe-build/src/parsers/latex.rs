use super::{leading_number, ParseOutcome};
use crate::diagnostics::ParseErrorMessage;
use once_cell::sync::Lazy;
use regex::Regex;

/// `file:line: message`, as printed with `-file-line-error`.
static FILE_LINE_ERROR: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^(.*?\.[A-Za-z]+):(\d+): (.+)$").unwrap());
static INPUT_LINE: Lazy<Regex> = Lazy::new(|| Regex::new(r"on input line (\d+)").unwrap());
static BOX_LINES: Lazy<Regex> = Lazy::new(|| Regex::new(r"at lines? (\d+)").unwrap());
static PACKAGE_WARNING: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^(?:Package|Class) (\S+) Warning:").unwrap());

/// How far after an error line to look for its `l.<n>` source reference.
const LINE_REF_WINDOW: usize = 12;

/// Scans latex/pdflatex/xelatex/lualatex console output.
pub fn parse_latex(output: &str) -> ParseOutcome {
    let mut outcome = ParseOutcome::default();
    let mut files: Vec<String> = Vec::new();
    let lines: Vec<&str> = output.lines().collect();

    let mut i = 0;
    while i < lines.len() {
        let line = lines[i];
        detect_rerun_hints(line, &mut outcome);

        if let Some(message) = line.strip_prefix('!') {
            let mut diagnostic = ParseErrorMessage::error(message.trim());
            if let Some(file) = current_file(&files) {
                diagnostic = diagnostic.in_file(file.clone());
            }
            if let Some((number, column)) = find_line_ref(&lines[i + 1..]) {
                diagnostic = diagnostic.at_line(number).at_column(column, 0);
            }
            outcome.push(diagnostic);
            i += 1;
            continue;
        }

        if let Some(caps) = FILE_LINE_ERROR.captures(line) {
            let number = caps[2].parse().unwrap_or(0);
            let mut diagnostic = ParseErrorMessage::error(caps[3].trim())
                .in_file(caps[1].to_string())
                .at_line(number);
            if let Some((_, column)) = find_line_ref(&lines[i + 1..]) {
                diagnostic = diagnostic.at_column(column, 0);
            }
            outcome.push(diagnostic);
            i += 1;
            continue;
        }

        if line.starts_with("LaTeX Warning:") || PACKAGE_WARNING.is_match(line) {
            let (message, consumed) = join_warning(&lines[i..]);
            let mut diagnostic = ParseErrorMessage::warning(message.clone());
            if let Some(file) = current_file(&files) {
                diagnostic = diagnostic.in_file(file.clone());
            }
            if let Some(caps) = INPUT_LINE.captures(&message) {
                diagnostic = diagnostic.at_line(caps[1].parse().unwrap_or(0));
            }
            if message.contains("Citation") && message.contains("undefined") {
                outcome.rerun.bibliography = true;
            }
            outcome.push(diagnostic);
            i += consumed;
            continue;
        }

        if line.starts_with("Overfull \\") || line.starts_with("Underfull \\") {
            let mut diagnostic = ParseErrorMessage::warning(line.trim());
            if let Some(file) = current_file(&files) {
                diagnostic = diagnostic.in_file(file.clone());
            }
            if let Some(caps) = BOX_LINES.captures(line) {
                diagnostic = diagnostic.at_line(caps[1].parse().unwrap_or(0));
            }
            outcome.push(diagnostic);
            i += 1;
            continue;
        }

        if !line.starts_with("l.") {
            track_files(line, &mut files);
        }
        i += 1;
    }

    outcome
}

fn detect_rerun_hints(line: &str, outcome: &mut ParseOutcome) {
    let hints = &mut outcome.rerun;
    if line.contains("Rerun to get")
        || line.contains("Label(s) may have changed")
        || line.contains("has changed. Rerun")
    {
        hints.cross_references = true;
    }
    if line.contains("Please (re)run Biber") || line.contains("Please rerun Biber") {
        hints.bibliography = true;
        hints.biber = true;
    }
    if line.contains("Please (re)run BibTeX") || line.contains("There were undefined citations") {
        hints.bibliography = true;
    }
    if let Some(rest) = line.strip_prefix("No file ") {
        if rest.ends_with(".bbl.") {
            hints.bibliography = true;
        } else if rest.ends_with(".ind.") {
            hints.index = true;
        }
    }
}

/// Finds the `l.<n> <excerpt>` line following an error. The column is where
/// TeX stopped reading, i.e. the length of the excerpt.
fn find_line_ref(following: &[&str]) -> Option<(u32, u32)> {
    for line in following.iter().take(LINE_REF_WINDOW) {
        if line.starts_with('!') {
            return None;
        }
        if let Some(rest) = line.strip_prefix("l.") {
            let number = leading_number(rest)?;
            let digits = rest.chars().take_while(char::is_ascii_digit).count();
            let excerpt = rest[digits..].strip_prefix(' ').unwrap_or(&rest[digits..]);
            return Some((number, excerpt.chars().count() as u32));
        }
    }
    None
}

/// Joins a warning with its continuation lines. Package warnings continue on
/// lines starting with `(<package>)`, LaTeX warnings until the first line that
/// ends in a period or is blank.
fn join_warning(lines: &[&str]) -> (String, usize) {
    let first = lines[0].trim();
    let mut message = first.to_string();
    let mut consumed = 1;

    if let Some(caps) = PACKAGE_WARNING.captures(first) {
        let marker = format!("({})", &caps[1]);
        while let Some(next) = lines.get(consumed) {
            let Some(rest) = next.trim_start().strip_prefix(marker.as_str()) else {
                break;
            };
            message.push(' ');
            message.push_str(rest.trim());
            consumed += 1;
        }
    } else {
        while !message.ends_with('.') {
            match lines.get(consumed) {
                Some(next) if !next.trim().is_empty() && !next.starts_with('!') => {
                    message.push(' ');
                    message.push_str(next.trim());
                    consumed += 1;
                }
                _ => break,
            }
        }
    }
    (message, consumed)
}

/// Follows the `(file` / `)` nesting TeX prints as it opens and closes inputs.
fn track_files(line: &str, files: &mut Vec<String>) {
    let mut chars = line.char_indices().peekable();
    while let Some((idx, c)) = chars.next() {
        match c {
            '(' => {
                let rest = &line[idx + 1..];
                let end = rest
                    .find(|c: char| c == ')' || c == '(' || c.is_whitespace())
                    .unwrap_or(rest.len());
                let path = &rest[..end];
                if is_likely_path(path) {
                    files.push(path.to_string());
                    // Skip the path so a `(` or `)` inside it is not re-read.
                    while chars.peek().is_some_and(|(next, _)| *next <= idx + end) {
                        chars.next();
                    }
                } else {
                    // Plain parenthesised text; its `)` must not close a file.
                    files.push(String::new());
                }
            }
            ')' => {
                files.pop();
            }
            _ => {}
        }
    }
}

/// Innermost open file, skipping plain parenthesised groups.
fn current_file(files: &[String]) -> Option<&String> {
    files.iter().rev().find(|f| !f.is_empty())
}

fn is_likely_path(path: &str) -> bool {
    if path.is_empty() || matches!(path, "Info" | "preloaded" | "TeX") {
        return false;
    }
    path.starts_with('/')
        || path.starts_with('\\')
        || path.starts_with('.')
        || path.contains('/')
        || (path.contains('.') && !path.ends_with('.'))
}
