//! Program runners: one external tool, its argument template and its output
//! parser.

use crate::context::Toolbox;
use crate::descriptor::RunnerDescription;
use crate::diagnostics::DiagnosticSink;
use crate::error::BuildError;
use crate::exec::ToolCommand;
use crate::parsers::{OutputParser, ParseOutcome};
use crate::prefs::keys;
use crate::resource::Resource;
use crate::template::{self, TemplateValues};
use async_trait::async_trait;
use log::{debug, info};
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tokio_util::sync::CancellationToken;

/// Result of one successful tool invocation.
#[derive(Debug, Clone)]
pub struct RunReport {
    /// The file the tool was expected to produce.
    pub output: PathBuf,
    pub outcome: ParseOutcome,
    pub exit_code: Option<i32>,
}

#[async_trait]
pub trait ProgramRunner: Send + Sync {
    fn description(&self) -> &RunnerDescription;

    fn id(&self) -> &str {
        &self.description().id
    }

    /// Executable base name from the catalogue.
    fn program_name(&self) -> &str {
        &self.description().executable
    }

    fn input_format(&self) -> &str {
        &self.description().input_format
    }

    fn output_format(&self) -> &str {
        &self.description().output_format
    }

    /// Resolves the executable, honouring `runner.<id>.path`.
    fn locate(&self, tools: &Toolbox) -> Option<PathBuf> {
        let configured = tools.prefs.get_non_empty(&keys::runner_path(self.id()));
        tools
            .executor
            .locate(self.program_name(), configured.as_deref().map(Path::new))
    }

    /// The error reported when the executable does not resolve.
    fn not_found(&self, tools: &Toolbox) -> BuildError {
        BuildError::ToolNotFound {
            runner: self.id().to_string(),
            program: tools
                .prefs
                .get_non_empty(&keys::runner_path(self.id()))
                .unwrap_or_else(|| self.program_name().to_string()),
        }
    }

    /// Whether the configured executable currently resolves. Checked anew on
    /// every call since preferences may have changed.
    fn is_valid(&self, tools: &Toolbox) -> bool {
        self.locate(tools).is_some()
    }

    /// Runs the tool on `resource` in the resource's directory.
    ///
    /// Fails with [`BuildError::ToolNotFound`] before anything is spawned when
    /// the executable does not resolve, and with [`BuildError::ToolExecution`]
    /// when the tool exits unsuccessfully or its output reports errors.
    async fn run(
        &self,
        resource: &Resource,
        tools: &Toolbox,
        cancel: &CancellationToken,
    ) -> Result<RunReport, BuildError>;

    /// Terminates the running process, if any.
    fn stop(&self);

    /// Scans `output`, reporting every diagnostic to `sink` against `resource`.
    fn parse_errors(
        &self,
        resource: &Resource,
        output: &str,
        sink: &dyn DiagnosticSink,
    ) -> ParseOutcome;
}

/// A runner driving an ordinary command-line tool.
pub struct ExternalRunner {
    desc: RunnerDescription,
    parser: OutputParser,
    /// Exit codes besides 0 that still count as success.
    tolerated: Vec<i32>,
    active: Mutex<Option<CancellationToken>>,
}

impl ExternalRunner {
    pub fn new(desc: RunnerDescription, parser: OutputParser) -> Self {
        Self {
            desc,
            parser,
            tolerated: Vec::new(),
            active: Mutex::new(None),
        }
    }

    pub fn tolerating(mut self, exit_codes: &[i32]) -> Self {
        self.tolerated.extend_from_slice(exit_codes);
        self
    }

    fn command(
        &self,
        resource: &Resource,
        tools: &Toolbox,
        program: PathBuf,
    ) -> Result<ToolCommand, BuildError> {
        let input = resource.sibling(self.input_format());
        let output = resource.sibling(self.output_format());
        let values = TemplateValues {
            input: file_name(&input),
            output: file_name(&output),
            full_input: input.display().to_string(),
            full_output: output.display().to_string(),
            basename: resource.base_name(),
            style: tools.prefs.get_non_empty(keys::MAKEINDEX_STYLE),
        };
        let template = tools
            .prefs
            .get_non_empty(&keys::runner_args(self.id()))
            .unwrap_or_else(|| self.desc.arguments.clone());

        Ok(ToolCommand {
            program,
            args: template::expand(&template, &values)?,
            working_dir: resource.directory().to_path_buf(),
            input,
            output,
        })
    }

    fn set_active(&self, token: Option<CancellationToken>) {
        *self
            .active
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner()) = token;
    }

    fn succeeded(&self, exit_code: Option<i32>) -> bool {
        match exit_code {
            Some(0) => true,
            Some(code) => self.tolerated.contains(&code),
            None => false,
        }
    }
}

#[async_trait]
impl ProgramRunner for ExternalRunner {
    fn description(&self) -> &RunnerDescription {
        &self.desc
    }

    async fn run(
        &self,
        resource: &Resource,
        tools: &Toolbox,
        cancel: &CancellationToken,
    ) -> Result<RunReport, BuildError> {
        let program = self.locate(tools).ok_or_else(|| self.not_found(tools))?;
        let command = self.command(resource, tools, program)?;
        info!("Running {} on {}", self.id(), resource.path().display());

        let token = cancel.child_token();
        self.set_active(Some(token.clone()));
        let result = tools.executor.execute(&command, &token).await;
        self.set_active(None);
        let output = result?;

        let outcome = self.parse_errors(resource, &output.text, tools.sink.as_ref());
        debug!(
            "{} exited with {:?}, {} diagnostic(s)",
            self.id(),
            output.exit_code,
            outcome.diagnostics.len()
        );
        if !self.succeeded(output.exit_code) || outcome.has_errors() {
            return Err(BuildError::ToolExecution {
                runner: self.id().to_string(),
                exit_code: output.exit_code,
                errors: outcome.error_count(),
            });
        }
        Ok(RunReport {
            output: command.output,
            outcome,
            exit_code: output.exit_code,
        })
    }

    fn stop(&self) {
        if let Some(token) = self
            .active
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .as_ref()
        {
            token.cancel();
        }
    }

    fn parse_errors(
        &self,
        resource: &Resource,
        output: &str,
        sink: &dyn DiagnosticSink,
    ) -> ParseOutcome {
        let outcome = (self.parser)(output);
        for diagnostic in &outcome.diagnostics {
            sink.report(resource.path(), diagnostic.clone());
        }
        outcome
    }
}

fn file_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default()
}
