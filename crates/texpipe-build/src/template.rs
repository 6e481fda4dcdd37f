//! Argument template expansion.
//!
//! A template is a shell-like argument string with placeholders:
//! `%input`/`%output` (file names relative to the working directory),
//! `%fullinput`/`%fulloutput` (absolute paths), `%basename` and `%style`.

use crate::error::BuildError;

#[derive(Debug, Clone, Default)]
pub struct TemplateValues {
    pub input: String,
    pub output: String,
    pub full_input: String,
    pub full_output: String,
    pub basename: String,
    /// Index style; when absent, a `-s %style` pair is removed from the template.
    pub style: Option<String>,
}

pub fn expand(template: &str, values: &TemplateValues) -> Result<Vec<String>, BuildError> {
    let tokens = shlex::split(template).ok_or_else(|| {
        BuildError::Configuration(format!("unbalanced quotes in arguments `{}`", template))
    })?;

    let mut args = Vec::with_capacity(tokens.len());
    let mut iter = tokens.into_iter().peekable();
    while let Some(token) = iter.next() {
        if values.style.is_none() && token == "-s" && iter.peek().map(String::as_str) == Some("%style") {
            iter.next();
            continue;
        }
        let expanded = substitute(&token, values);
        if !expanded.is_empty() {
            args.push(expanded);
        }
    }
    Ok(args)
}

/// Replaces placeholders in one left-to-right pass; substituted text is
/// never scanned again.
fn substitute(token: &str, values: &TemplateValues) -> String {
    // Longer placeholders first so `%fullinput` is not read as `%full` + `input`.
    let placeholders: [(&str, &str); 6] = [
        ("%fullinput", values.full_input.as_str()),
        ("%fulloutput", values.full_output.as_str()),
        ("%basename", values.basename.as_str()),
        ("%input", values.input.as_str()),
        ("%output", values.output.as_str()),
        ("%style", values.style.as_deref().unwrap_or("")),
    ];

    let mut expanded = String::with_capacity(token.len());
    let mut rest = token;
    while let Some(at) = rest.find('%') {
        expanded.push_str(&rest[..at]);
        let tail = &rest[at..];
        match placeholders.iter().find(|(name, _)| tail.starts_with(name)) {
            Some((name, value)) => {
                expanded.push_str(value);
                rest = &tail[name.len()..];
            }
            None => {
                expanded.push('%');
                rest = &tail[1..];
            }
        }
    }
    expanded.push_str(rest);
    expanded
}
