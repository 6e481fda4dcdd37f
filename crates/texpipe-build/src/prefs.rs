//! Key-value preferences: tool paths, argument templates and build switches.
//!
//! Values live in two layers. Project overrides shadow global values, so a
//! project can pin its own `pdflatex` while everything else follows the user's
//! defaults.

use crate::error::BuildError;
use serde_json::Value;
use std::collections::HashMap;
use std::path::Path;

/// Well-known preference keys.
pub mod keys {
    pub const MAKEINDEX_STYLE: &str = "makeindex.style";
    pub const BIBLIOGRAPHY_TOOL: &str = "bibliography.tool";
    pub const MAX_LATEX_RUNS: &str = "build.max_latex_runs";

    pub fn runner_path(runner: &str) -> String {
        format!("runner.{}.path", runner)
    }

    pub fn runner_args(runner: &str) -> String {
        format!("runner.{}.args", runner)
    }

    pub fn preferred_builder(format: &str) -> String {
        format!("builder.{}", format)
    }
}

pub trait Preferences: Send + Sync {
    fn get(&self, key: &str) -> Option<String>;

    /// Non-empty value of `key`.
    fn get_non_empty(&self, key: &str) -> Option<String> {
        self.get(key).filter(|v| !v.trim().is_empty())
    }

    fn get_u32(&self, key: &str, default: u32) -> u32 {
        self.get(key)
            .and_then(|v| v.trim().parse().ok())
            .unwrap_or(default)
    }
}

#[derive(Debug, Clone, Default)]
pub struct PreferenceStore {
    global: HashMap<String, String>,
    project: HashMap<String, String>,
}

impl PreferenceStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.global.insert(key.into(), value.into());
    }

    pub fn set_project(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.project.insert(key.into(), value.into());
    }

    pub fn load_global(&mut self, path: &Path) -> Result<(), BuildError> {
        let values = read_json_map(path)?;
        self.global.extend(values);
        Ok(())
    }

    /// Loads project overrides from `path`; a missing file is not an error.
    pub fn load_project(&mut self, path: &Path) -> Result<(), BuildError> {
        if !path.exists() {
            return Ok(());
        }
        let values = read_json_map(path)?;
        self.project.extend(values);
        Ok(())
    }
}

impl Preferences for PreferenceStore {
    fn get(&self, key: &str) -> Option<String> {
        self.project
            .get(key)
            .or_else(|| self.global.get(key))
            .cloned()
    }
}

fn read_json_map(path: &Path) -> Result<HashMap<String, String>, BuildError> {
    let content = std::fs::read_to_string(path)?;
    parse_json_map(&content)
        .map_err(|e| BuildError::Configuration(format!("{}: {}", path.display(), e)))
}

/// Parses a flat JSON object. Numbers and booleans are accepted and kept in
/// their textual form; nested values are rejected.
pub fn parse_json_map(content: &str) -> Result<HashMap<String, String>, String> {
    let value: Value = serde_json::from_str(content).map_err(|e| e.to_string())?;
    let Value::Object(object) = value else {
        return Err("preferences must be a JSON object".to_string());
    };
    let mut map = HashMap::new();
    for (key, value) in object {
        let text = match value {
            Value::String(s) => s,
            Value::Number(n) => n.to_string(),
            Value::Bool(b) => b.to_string(),
            Value::Null => continue,
            _ => return Err(format!("preference `{}` must be a scalar", key)),
        };
        map.insert(key, text);
    }
    Ok(map)
}
