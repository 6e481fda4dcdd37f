use super::{run_stage, BuildReport, Builder, BuilderCore, StageInputs};
use crate::context::{BuildContext, Toolbox};
use crate::descriptor::BuilderDescription;
use crate::error::BuildError;
use crate::resource::Resource;
use crate::runner::ProgramRunner;
use async_trait::async_trait;
use std::sync::Arc;

/// Produces its runner's input with a sub-builder, then runs the runner on it.
///
/// The sub-builder is whichever valid builder produces the runner's input
/// format, so `ps2pdf` on top resolves to `latex+dvips+ps2pdf`.
pub struct ChainBuilder {
    core: BuilderCore,
    runner: Option<Arc<dyn ProgramRunner>>,
    sub: Option<Box<dyn Builder>>,
}

impl ChainBuilder {
    pub fn new(description: BuilderDescription) -> Self {
        Self {
            core: BuilderCore::new(description),
            runner: None,
            sub: None,
        }
    }

    fn unvalidated(&self) -> BuildError {
        BuildError::Configuration(format!("builder `{}` used before validation", self.id()))
    }
}

#[async_trait]
impl Builder for ChainBuilder {
    fn core(&self) -> &BuilderCore {
        &self.core
    }

    fn core_mut(&mut self) -> &mut BuilderCore {
        &mut self.core
    }

    fn release(&mut self) {
        self.runner = None;
        self.sub = None;
    }

    fn validate(&mut self, tools: &Toolbox) -> Result<(), BuildError> {
        self.release();
        let runner = tools
            .registry
            .create_runner(&self.core.description().runner)?;
        if !runner.is_valid(tools) {
            return Err(runner.not_found(tools));
        }
        let sub = tools
            .registry
            .resolve(runner.input_format(), None, tools)?;
        self.runner = Some(runner);
        self.sub = Some(sub);
        Ok(())
    }

    fn sequence(&self) -> String {
        let head = self
            .sub
            .as_ref()
            .map(|sub| sub.sequence())
            .unwrap_or_else(|| "?".to_string());
        format!("{}+{}", head, self.core.description().runner)
    }

    fn total_work(&self) -> u32 {
        self.sub.as_ref().map_or(1, |sub| sub.total_work()) + 1
    }

    fn stop_runners(&self) {
        if let Some(sub) = &self.sub {
            sub.stop_runners();
        }
        if let Some(runner) = &self.runner {
            runner.stop();
        }
    }

    async fn build_resource(
        &mut self,
        resource: &Resource,
        ctx: &mut BuildContext<'_>,
        report: &mut BuildReport,
    ) -> Result<(), BuildError> {
        let runner = self.runner.clone().ok_or_else(|| self.unvalidated())?;
        let progress = self.core.progress().clone();
        let cancel = self.core.cancel_token().clone();

        if self.sub.is_none() {
            return Err(self.unvalidated());
        }
        if let Some(sub) = self.sub.as_mut() {
            sub.core_mut().set_progress(progress);
            sub.attach(&cancel);
            // A failed sub-builder ends the chain here.
            sub.build_resource(resource, ctx, report).await?;
        }

        self.core.check_cancelled()?;
        run_stage(
            runner.as_ref(),
            resource,
            ctx,
            &self.core,
            StageInputs::InputFile,
            report,
        )
        .await?;
        Ok(())
    }
}
