use log::{error, info, warn};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Severity {
    Error,
    Warning,
    Information,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Severity::Error => "error",
            Severity::Warning => "warning",
            Severity::Information => "info",
        };
        f.write_str(name)
    }
}

/// A problem a tool reported about the document.
///
/// `line` and `column` are 1-based; 0 means the tool gave no position.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParseErrorMessage {
    pub line: u32,
    pub column: u32,
    pub length: u32,
    pub message: String,
    pub severity: Severity,
    /// Source file the tool attributed the message to, when it named one.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub file: Option<String>,
}

impl ParseErrorMessage {
    pub fn new(severity: Severity, message: impl Into<String>) -> Self {
        Self {
            line: 0,
            column: 0,
            length: 0,
            message: message.into(),
            severity,
            file: None,
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self::new(Severity::Error, message)
    }

    pub fn warning(message: impl Into<String>) -> Self {
        Self::new(Severity::Warning, message)
    }

    pub fn at_line(mut self, line: u32) -> Self {
        self.line = line;
        self
    }

    pub fn at_column(mut self, column: u32, length: u32) -> Self {
        self.column = column;
        self.length = length;
        self
    }

    pub fn in_file(mut self, file: impl Into<String>) -> Self {
        self.file = Some(file.into());
        self
    }

    pub fn is_error(&self) -> bool {
        self.severity == Severity::Error
    }
}

/// Receives diagnostics for a resource, e.g. an editor's marker store.
pub trait DiagnosticSink: Send + Sync {
    /// Removes everything previously reported for `resource`.
    fn clear(&self, resource: &Path);

    fn report(&self, resource: &Path, diagnostic: ParseErrorMessage);
}

/// Keeps every reported diagnostic in memory.
#[derive(Debug, Default)]
pub struct CollectingSink {
    entries: Mutex<Vec<(PathBuf, ParseErrorMessage)>>,
}

impl CollectingSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn diagnostics(&self) -> Vec<ParseErrorMessage> {
        self.entries
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .iter()
            .map(|(_, d)| d.clone())
            .collect()
    }

    pub fn error_count(&self) -> usize {
        self.diagnostics().iter().filter(|d| d.is_error()).count()
    }
}

impl DiagnosticSink for CollectingSink {
    fn clear(&self, resource: &Path) {
        self.entries
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .retain(|(path, _)| path != resource);
    }

    fn report(&self, resource: &Path, diagnostic: ParseErrorMessage) {
        self.entries
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push((resource.to_path_buf(), diagnostic));
    }
}

/// Forwards diagnostics to the `log` facade.
#[derive(Debug, Default)]
pub struct LogSink;

impl DiagnosticSink for LogSink {
    fn clear(&self, _resource: &Path) {}

    fn report(&self, resource: &Path, d: ParseErrorMessage) {
        let file = d
            .file
            .clone()
            .unwrap_or_else(|| resource.display().to_string());
        match d.severity {
            Severity::Error => error!("{}:{}:{}: {}", file, d.line, d.column, d.message),
            Severity::Warning => warn!("{}:{}:{}: {}", file, d.line, d.column, d.message),
            Severity::Information => info!("{}:{}:{}: {}", file, d.line, d.column, d.message),
        }
    }
}
