//! Builders: state machines that run a pipeline of program runners.
//!
//! A builder goes `Idle -> Building -> Idle`, or to `Stopped` when a stop
//! request lands mid-cycle. [`Builder::build`] brackets the pipeline with the
//! file cache: restore before the first stage, save after the last one, on
//! success and failure alike.
//!
//! Each stage consults the cache for the files it depends on and is skipped
//! when none changed since that same stage last succeeded and its output is
//! still on disk.

mod chain;
mod tex;

pub use chain::ChainBuilder;
pub use tex::TexBuilder;

use crate::context::{BuildContext, Toolbox};
use crate::descriptor::BuilderDescription;
use crate::error::BuildError;
use crate::progress::{NullProgress, ProgressMonitor};
use crate::resource::Resource;
use crate::runner::{ProgramRunner, RunReport};
use async_trait::async_trait;
use log::{info, warn};
use std::path::PathBuf;
use std::sync::Arc;
use texpipe_cache::FileCache;
use tokio_util::sync::CancellationToken;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BuildState {
    Idle,
    Building,
    Stopped,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StageStatus {
    Ran,
    Skipped,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StageRecord {
    pub runner: String,
    pub status: StageStatus,
    /// Diagnostics the run reported; errors would have failed the stage.
    pub warnings: usize,
}

/// What a build cycle did, stage by stage.
#[derive(Debug, Clone, Default)]
pub struct BuildReport {
    pub sequence: String,
    pub stages: Vec<StageRecord>,
    pub output: Option<PathBuf>,
}

impl BuildReport {
    pub fn new(sequence: impl Into<String>) -> Self {
        Self {
            sequence: sequence.into(),
            ..Self::default()
        }
    }

    /// Runners that actually ran, in order.
    pub fn ran(&self) -> Vec<&str> {
        self.with_status(StageStatus::Ran)
    }

    pub fn skipped(&self) -> Vec<&str> {
        self.with_status(StageStatus::Skipped)
    }

    fn with_status(&self, status: StageStatus) -> Vec<&str> {
        self.stages
            .iter()
            .filter(|s| s.status == status)
            .map(|s| s.runner.as_str())
            .collect()
    }

    pub(crate) fn record(&mut self, runner: &str, status: StageStatus, warnings: usize) {
        self.stages.push(StageRecord {
            runner: runner.to_string(),
            status,
            warnings,
        });
    }
}

/// State shared by every builder implementation.
pub struct BuilderCore {
    description: BuilderDescription,
    state: BuildState,
    cancel: CancellationToken,
    progress: Arc<dyn ProgressMonitor>,
}

impl BuilderCore {
    pub fn new(description: BuilderDescription) -> Self {
        Self {
            description,
            state: BuildState::Idle,
            cancel: CancellationToken::new(),
            progress: Arc::new(NullProgress),
        }
    }

    pub fn description(&self) -> &BuilderDescription {
        &self.description
    }

    pub fn state(&self) -> BuildState {
        self.state
    }

    pub fn progress(&self) -> &Arc<dyn ProgressMonitor> {
        &self.progress
    }

    pub fn set_progress(&mut self, progress: Arc<dyn ProgressMonitor>) {
        self.progress = progress;
    }

    pub fn cancel_token(&self) -> &CancellationToken {
        &self.cancel
    }

    /// `Err(Cancelled)` once a stop was requested through the token or the
    /// progress monitor.
    pub fn check_cancelled(&self) -> Result<(), BuildError> {
        if self.cancel.is_cancelled() || self.progress.is_canceled() {
            return Err(BuildError::Cancelled);
        }
        Ok(())
    }

    fn reset(&mut self, progress: Arc<dyn ProgressMonitor>) {
        self.state = BuildState::Idle;
        self.cancel = CancellationToken::new();
        self.progress = progress;
    }

    fn attach(&mut self, parent: &CancellationToken) {
        self.cancel = parent.child_token();
    }
}

#[async_trait]
pub trait Builder: Send + Sync {
    fn core(&self) -> &BuilderCore;

    fn core_mut(&mut self) -> &mut BuilderCore;

    fn description(&self) -> &BuilderDescription {
        self.core().description()
    }

    fn id(&self) -> &str {
        &self.core().description().id
    }

    fn state(&self) -> BuildState {
        self.core().state()
    }

    /// Drops the resolved runner and sub-builder references.
    fn release(&mut self);

    /// Prepares for a fresh cycle. Safe to call repeatedly, also after an
    /// aborted cycle.
    fn reset(&mut self, progress: Arc<dyn ProgressMonitor>) {
        self.release();
        self.core_mut().reset(progress);
    }

    /// Makes this builder stop whenever `parent` is cancelled.
    fn attach(&mut self, parent: &CancellationToken) {
        self.core_mut().attach(parent);
    }

    /// Resolves the runners and sub-builders this builder needs. Runs again
    /// on every call since tool paths may have changed.
    fn validate(&mut self, tools: &Toolbox) -> Result<(), BuildError>;

    fn is_valid(&mut self, tools: &Toolbox) -> bool {
        self.validate(tools).is_ok()
    }

    /// The resolved chain, e.g. `latex+dvips+ps2pdf`.
    fn sequence(&self) -> String;

    fn total_work(&self) -> u32;

    fn cancel_token(&self) -> CancellationToken {
        self.core().cancel_token().clone()
    }

    /// Requests a cooperative stop: no further stage starts and the running
    /// tool is asked to terminate.
    fn stop_build(&self) {
        self.core().cancel_token().cancel();
        self.stop_runners();
    }

    fn stop_runners(&self);

    /// Runs a complete cycle for `resource`.
    async fn build(
        &mut self,
        resource: &Resource,
        ctx: &mut BuildContext<'_>,
    ) -> Result<BuildReport, BuildError> {
        self.validate(ctx.tools)?;
        self.core_mut().state = BuildState::Building;
        let progress = self.core().progress().clone();
        progress.begin(
            &format!("Building {}", resource.path().display()),
            self.total_work(),
        );

        if ctx.force {
            if let Err(e) = ctx.cache.clear() {
                warn!("Cannot clear file cache: {}", e);
            }
        }
        if let Err(e) = ctx.cache.restore() {
            warn!("Ignoring unreadable file cache: {}", e);
        }
        ctx.tools.sink.clear(resource.path());

        let mut report = BuildReport::new(self.sequence());
        let result = self.build_resource(resource, ctx, &mut report).await;
        let saved = ctx.cache.save();
        progress.done();

        self.core_mut().state = match &result {
            Err(e) if e.is_cancelled() => BuildState::Stopped,
            _ => BuildState::Idle,
        };
        match (result, saved) {
            (Ok(()), Ok(())) => {
                report.output = Some(resource.sibling(&self.description().output_format));
                Ok(report)
            }
            (Ok(()), Err(e)) => Err(e.into()),
            (Err(e), saved) => {
                if let Err(save_error) = saved {
                    warn!("Cannot save file cache: {}", save_error);
                }
                if e.is_cancelled() {
                    info!("Build of {} cancelled", resource.path().display());
                }
                Err(e)
            }
        }
    }

    /// Runs the pipeline stages in order, stopping at the first failure.
    async fn build_resource(
        &mut self,
        resource: &Resource,
        ctx: &mut BuildContext<'_>,
        report: &mut BuildReport,
    ) -> Result<(), BuildError>;
}

/// Which files a stage's skip decision looks at.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum StageInputs {
    /// Every TeX source in the project.
    ProjectSources,
    /// Only the file in the runner's input format.
    InputFile,
}

pub(crate) struct Stage {
    /// Identifies the stage's record in the cache, e.g. `latex:main.tex`.
    pub key: String,
    pub deps: Vec<String>,
    pub changed: Vec<String>,
    /// `None` when the stage was skipped.
    pub run: Option<RunReport>,
}

pub(crate) fn stage_dependencies(
    resource: &Resource,
    runner: &dyn ProgramRunner,
    inputs: StageInputs,
) -> Vec<String> {
    match inputs {
        StageInputs::ProjectSources => resource.project().source_files(),
        StageInputs::InputFile => resource
            .key_of(&resource.sibling(runner.input_format()))
            .into_iter()
            .collect(),
    }
}

/// Merges every dependency into the current cycle and returns the ones that
/// changed. Nothing short-circuits, so `tracked` ends up complete.
pub(crate) fn merge_dependencies(cache: &mut FileCache, deps: &[String]) -> Vec<String> {
    let mut changed = Vec::new();
    for key in deps {
        let Some(stamp) = cache.stamp_of(key) else {
            cache.forget(key);
            changed.push(key.clone());
            continue;
        };
        match cache.merge_tracked_file(key, stamp) {
            Ok(change) if change.is_changed() => changed.push(key.clone()),
            Ok(_) => {}
            Err(e) => {
                warn!("{}; treating {} as changed", e, key);
                changed.push(key.clone());
            }
        }
    }
    changed
}

/// Cache record name of `runner` working on `resource`.
pub(crate) fn stage_key(runner_id: &str, resource: &Resource) -> String {
    let document = resource
        .key_of(resource.path())
        .unwrap_or_else(|| resource.base_name());
    format!("{}:{}", runner_id, document)
}

/// Merges `deps` and returns what changed since the last successful run of
/// `stage`, or `None` if it never completed.
pub(crate) fn stage_changes(
    cache: &mut FileCache,
    stage: &str,
    deps: &[String],
) -> Option<Vec<String>> {
    let mut changed = merge_dependencies(cache, deps);
    let since_last_run = cache.stage_changes(stage, deps)?;
    for key in since_last_run {
        if !changed.contains(&key) {
            changed.push(key);
        }
    }
    Some(changed)
}

pub(crate) fn forget_all(cache: &mut FileCache, deps: &[String]) {
    for key in deps {
        cache.forget(key);
    }
}

/// Runs `runner` unless its dependencies are unchanged since its last
/// successful run and its output exists. A failed run drops the stage record
/// and the dependency records so the next cycle retries.
pub(crate) async fn run_stage(
    runner: &dyn ProgramRunner,
    resource: &Resource,
    ctx: &mut BuildContext<'_>,
    core: &BuilderCore,
    inputs: StageInputs,
    report: &mut BuildReport,
) -> Result<Stage, BuildError> {
    let key = stage_key(runner.id(), resource);
    let deps = stage_dependencies(resource, runner, inputs);
    let changes = stage_changes(ctx.cache, &key, &deps);
    let output = resource.sibling(runner.output_format());

    if changes.as_ref().is_some_and(Vec::is_empty) && output.exists() && !ctx.force {
        info!("{} is up to date, skipping {}", output.display(), runner.id());
        report.record(runner.id(), StageStatus::Skipped, 0);
        core.progress().worked(1);
        return Ok(Stage {
            key,
            deps,
            changed: Vec::new(),
            run: None,
        });
    }
    let changed = changes.unwrap_or_else(|| deps.clone());

    core.progress().sub_task(&format!("{} {}", runner.id(), resource.base_name()));
    match runner.run(resource, ctx.tools, core.cancel_token()).await {
        Ok(run) => {
            ctx.cache.record_stage(&key, &deps);
            report.record(runner.id(), StageStatus::Ran, run.outcome.diagnostics.len());
            core.progress().worked(1);
            Ok(Stage {
                key,
                deps,
                changed,
                run: Some(run),
            })
        }
        Err(e) => {
            ctx.cache.forget_stage(&key);
            forget_all(ctx.cache, &deps);
            Err(e)
        }
    }
}
