//! Runner and builder descriptors and the catalogue they are loaded from.
//!
//! The catalogue is data: two JSON documents list every program runner and
//! every builder, with their formats and the implementation that executes
//! them. A malformed entry is logged and left out; the rest of the catalogue
//! still loads.

use crate::error::BuildError;
use log::warn;
use serde::Deserialize;
use serde_json::Value;
use std::collections::HashSet;

const BUNDLED_RUNNERS: &str = include_str!("../catalog/runners.json");
const BUNDLED_BUILDERS: &str = include_str!("../catalog/builders.json");

/// Configuration of one external program.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunnerDescription {
    pub id: String,
    pub label: String,
    pub input_format: String,
    pub output_format: String,
    /// Key into the runner implementation table.
    pub implementation: String,
    /// Executable base name for the current platform.
    pub executable: String,
    /// Default argument template.
    pub arguments: String,
}

/// Configuration of one builder.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuilderDescription {
    pub id: String,
    pub label: String,
    pub input_format: String,
    pub output_format: String,
    /// Key into the builder implementation table.
    pub implementation: String,
    /// Id of the runner this builder drives itself.
    pub runner: String,
}

#[derive(Debug, Deserialize)]
struct RunnerEntry {
    id: Option<String>,
    label: Option<String>,
    input: Option<String>,
    output: Option<String>,
    implementation: Option<String>,
    executable: Option<String>,
    windows_executable: Option<String>,
    #[serde(default)]
    arguments: Option<String>,
}

#[derive(Debug, Deserialize)]
struct BuilderEntry {
    id: Option<String>,
    label: Option<String>,
    input: Option<String>,
    output: Option<String>,
    implementation: Option<String>,
    runner: Option<String>,
}

fn required(field: Option<String>, name: &str, entry: &str) -> Result<String, String> {
    match field {
        Some(value) if !value.trim().is_empty() => Ok(value),
        _ => Err(format!("{}: missing `{}`", entry, name)),
    }
}

impl RunnerEntry {
    fn into_description(self, windows: bool) -> Result<RunnerDescription, String> {
        let id = required(self.id, "id", "runner entry")?;
        let executable = match (windows, self.windows_executable) {
            (true, Some(alt)) if !alt.trim().is_empty() => alt,
            _ => required(self.executable, "executable", &id)?,
        };
        Ok(RunnerDescription {
            label: self.label.unwrap_or_else(|| id.clone()),
            input_format: required(self.input, "input", &id)?,
            output_format: required(self.output, "output", &id)?,
            implementation: required(self.implementation, "implementation", &id)?,
            executable,
            arguments: self.arguments.unwrap_or_else(|| "%input".to_string()),
            id,
        })
    }
}

impl BuilderEntry {
    fn into_description(self) -> Result<BuilderDescription, String> {
        let id = required(self.id, "id", "builder entry")?;
        Ok(BuilderDescription {
            label: self.label.unwrap_or_else(|| id.clone()),
            input_format: required(self.input, "input", &id)?,
            output_format: required(self.output, "output", &id)?,
            implementation: required(self.implementation, "implementation", &id)?,
            runner: required(self.runner, "runner", &id)?,
            id,
        })
    }
}

/// Every runner and builder description, in catalogue order.
#[derive(Debug, Clone, Default)]
pub struct Catalog {
    runners: Vec<RunnerDescription>,
    builders: Vec<BuilderDescription>,
}

impl Catalog {
    /// The catalogue compiled into this crate.
    pub fn bundled() -> Result<Self, BuildError> {
        Self::from_json(BUNDLED_RUNNERS, BUNDLED_BUILDERS)
    }

    /// Parses both documents, resolving platform executable overrides for the
    /// platform this binary runs on.
    pub fn from_json(runners: &str, builders: &str) -> Result<Self, BuildError> {
        Self::from_json_for(runners, builders, cfg!(windows))
    }

    fn from_json_for(runners: &str, builders: &str, windows: bool) -> Result<Self, BuildError> {
        let mut catalog = Catalog::default();

        let mut seen = HashSet::new();
        for value in entries(runners, "runners")? {
            match serde_json::from_value::<RunnerEntry>(value)
                .map_err(|e| e.to_string())
                .and_then(|entry| entry.into_description(windows))
            {
                Ok(desc) if seen.insert(desc.id.clone()) => catalog.runners.push(desc),
                Ok(desc) => warn!("Skipping duplicate runner `{}`", desc.id),
                Err(e) => warn!("Skipping runner descriptor: {}", e),
            }
        }

        let mut seen = HashSet::new();
        for value in entries(builders, "builders")? {
            match serde_json::from_value::<BuilderEntry>(value)
                .map_err(|e| e.to_string())
                .and_then(BuilderEntry::into_description)
            {
                Ok(desc) if seen.insert(desc.id.clone()) => catalog.builders.push(desc),
                Ok(desc) => warn!("Skipping duplicate builder `{}`", desc.id),
                Err(e) => warn!("Skipping builder descriptor: {}", e),
            }
        }

        Ok(catalog)
    }

    pub fn runners(&self) -> &[RunnerDescription] {
        &self.runners
    }

    pub fn builders(&self) -> &[BuilderDescription] {
        &self.builders
    }

    pub fn runner(&self, id: &str) -> Option<&RunnerDescription> {
        self.runners.iter().find(|r| r.id == id)
    }

    pub fn builder(&self, id: &str) -> Option<&BuilderDescription> {
        self.builders.iter().find(|b| b.id == id)
    }

    pub(crate) fn into_parts(self) -> (Vec<RunnerDescription>, Vec<BuilderDescription>) {
        (self.runners, self.builders)
    }
}

/// The array under `key` in a catalogue document.
fn entries(document: &str, key: &str) -> Result<Vec<Value>, BuildError> {
    let value: Value = serde_json::from_str(document)
        .map_err(|e| BuildError::Configuration(format!("{} catalogue: {}", key, e)))?;
    match value {
        Value::Object(mut object) => match object.remove(key) {
            Some(Value::Array(items)) => Ok(items),
            _ => Err(BuildError::Configuration(format!(
                "{} catalogue: expected a `{}` array",
                key, key
            ))),
        },
        _ => Err(BuildError::Configuration(format!(
            "{} catalogue: expected an object",
            key
        ))),
    }
}
