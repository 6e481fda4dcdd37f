use super::{
    forget_all, run_stage, stage_changes, stage_key, BuildReport, Builder, BuilderCore,
    StageInputs, StageStatus,
};
use crate::context::{BuildContext, Toolbox};
use crate::descriptor::BuilderDescription;
use crate::error::BuildError;
use crate::parsers::RerunHints;
use crate::prefs::keys;
use crate::resource::Resource;
use crate::runner::{ProgramRunner, RunReport};
use async_trait::async_trait;
use log::{debug, info, warn};
use std::sync::Arc;

pub const DEFAULT_MAX_LATEX_RUNS: u32 = 3;

const INDEX_RUNNERS: &[&str] = &["makeindex", "makeindex-nomencl"];

/// Runs a latex-family program, then the bibliography and index tools its
/// output calls for, then latex again until cross references settle.
pub struct TexBuilder {
    core: BuilderCore,
    latex: Option<Arc<dyn ProgramRunner>>,
}

impl TexBuilder {
    pub fn new(description: BuilderDescription) -> Self {
        Self {
            core: BuilderCore::new(description),
            latex: None,
        }
    }

    async fn follow_up(
        &self,
        latex: &dyn ProgramRunner,
        resource: &Resource,
        ctx: &mut BuildContext<'_>,
        report: &mut BuildReport,
        changed: &[String],
        first: RunReport,
    ) -> Result<(), BuildError> {
        let max_runs = ctx
            .tools
            .prefs
            .get_u32(keys::MAX_LATEX_RUNS, DEFAULT_MAX_LATEX_RUNS)
            .max(1);
        let mut runs = 1;
        let mut hints: RerunHints = first.outcome.rerun;
        let mut needs_latex = false;

        if hints.bibliography || changed.iter().any(|key| key.ends_with(".bib")) {
            let tool = bibliography_tool(ctx.tools, hints.biber);
            needs_latex |= self.run_auxiliary(tool, resource, ctx, report).await?;
        }

        for id in INDEX_RUNNERS {
            if let Some((stage, deps)) = self.outdated_index(id, resource, ctx) {
                if self.run_auxiliary(id, resource, ctx, report).await? {
                    ctx.cache.record_stage(&stage, &deps);
                    needs_latex = true;
                }
            }
        }

        while (needs_latex || hints.cross_references) && runs < max_runs {
            self.core.check_cancelled()?;
            self.core
                .progress()
                .sub_task(&format!("{} {} (pass {})", latex.id(), resource.base_name(), runs + 1));
            let run = latex
                .run(resource, ctx.tools, self.core.cancel_token())
                .await?;
            report.record(latex.id(), StageStatus::Ran, run.outcome.diagnostics.len());
            runs += 1;
            hints = run.outcome.rerun;
            needs_latex = false;
        }
        if hints.cross_references {
            warn!(
                "Cross references in {} still unsettled after {} runs",
                resource.path().display(),
                runs
            );
        }
        Ok(())
    }

    /// Runs an auxiliary tool if it is installed and its input exists.
    /// Returns whether it ran.
    async fn run_auxiliary(
        &self,
        id: &str,
        resource: &Resource,
        ctx: &mut BuildContext<'_>,
        report: &mut BuildReport,
    ) -> Result<bool, BuildError> {
        let runner = match ctx.tools.registry.create_runner(id) {
            Ok(runner) => runner,
            Err(e) => {
                warn!("Skipping {}: {}", id, e);
                return Ok(false);
            }
        };
        if !runner.is_valid(ctx.tools) {
            warn!("{} is not installed, skipping it", runner.program_name());
            return Ok(false);
        }
        let input = resource.sibling(runner.input_format());
        if !input.exists() {
            debug!("No {}, skipping {}", input.display(), id);
            return Ok(false);
        }

        self.core.check_cancelled()?;
        self.core
            .progress()
            .sub_task(&format!("{} {}", id, resource.base_name()));
        let run = runner
            .run(resource, ctx.tools, self.core.cancel_token())
            .await?;
        report.record(id, StageStatus::Ran, run.outcome.diagnostics.len());
        Ok(true)
    }

    /// An index needs rebuilding when its raw entries differ from what the
    /// index tool last sorted, or the sorted index is missing. Returns the
    /// stage record to write once the tool has run.
    fn outdated_index(
        &self,
        id: &str,
        resource: &Resource,
        ctx: &mut BuildContext<'_>,
    ) -> Option<(String, Vec<String>)> {
        let desc = ctx.tools.registry.runner_description(id)?;
        let input = resource.sibling(&desc.input_format);
        if !input.exists() {
            return None;
        }
        let deps = vec![resource.key_of(&input)?];
        let output = resource.sibling(&desc.output_format);
        let stage = stage_key(id, resource);
        let changed = stage_changes(ctx.cache, &stage, &deps).map_or(true, |c| !c.is_empty());
        (changed || ctx.force || !output.exists()).then_some((stage, deps))
    }
}

fn bibliography_tool(tools: &Toolbox, asked_for_biber: bool) -> &'static str {
    let configured = tools.prefs.get_non_empty(keys::BIBLIOGRAPHY_TOOL);
    if asked_for_biber || configured.as_deref() == Some("biber") {
        "biber"
    } else {
        "bibtex"
    }
}

#[async_trait]
impl Builder for TexBuilder {
    fn core(&self) -> &BuilderCore {
        &self.core
    }

    fn core_mut(&mut self) -> &mut BuilderCore {
        &mut self.core
    }

    fn release(&mut self) {
        self.latex = None;
    }

    fn validate(&mut self, tools: &Toolbox) -> Result<(), BuildError> {
        let runner = tools
            .registry
            .create_runner(&self.core.description().runner)?;
        if !runner.is_valid(tools) {
            self.latex = None;
            return Err(runner.not_found(tools));
        }
        self.latex = Some(runner);
        Ok(())
    }

    fn sequence(&self) -> String {
        self.core.description().runner.clone()
    }

    fn total_work(&self) -> u32 {
        1
    }

    fn stop_runners(&self) {
        if let Some(latex) = &self.latex {
            latex.stop();
        }
    }

    async fn build_resource(
        &mut self,
        resource: &Resource,
        ctx: &mut BuildContext<'_>,
        report: &mut BuildReport,
    ) -> Result<(), BuildError> {
        let latex = self.latex.clone().ok_or_else(|| {
            BuildError::Configuration(format!("builder `{}` used before validation", self.id()))
        })?;
        self.core.check_cancelled()?;

        let stage = run_stage(
            latex.as_ref(),
            resource,
            ctx,
            &self.core,
            StageInputs::ProjectSources,
            report,
        )
        .await?;
        let Some(first) = stage.run else {
            return Ok(());
        };

        let result = self
            .follow_up(latex.as_ref(), resource, ctx, report, &stage.changed, first)
            .await;
        if result.is_err() {
            ctx.cache.forget_stage(&stage.key);
            forget_all(ctx.cache, &stage.deps);
        } else {
            info!("{} built with {}", resource.path().display(), latex.id());
        }
        result
    }
}
