//! Build cycles for one project, run in the foreground or on a worker task.

use crate::builder::{BuildReport, Builder};
use crate::context::{BuildContext, Toolbox};
use crate::error::BuildError;
use crate::progress::{NullProgress, ProgressMonitor};
use crate::resource::{Project, Resource};
use log::debug;
use std::sync::Arc;
use texpipe_cache::FileCache;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

#[derive(Debug, Clone)]
pub struct BuildRequest {
    pub resource: Resource,
    /// Requested output format, e.g. `pdf`.
    pub format: String,
    /// Builder id to use instead of resolving one by format.
    pub builder: Option<String>,
    pub force: bool,
}

impl BuildRequest {
    pub fn new(resource: Resource, format: impl Into<String>) -> Self {
        Self {
            resource,
            format: format.into(),
            builder: None,
            force: false,
        }
    }

    pub fn with_builder(mut self, id: impl Into<String>) -> Self {
        self.builder = Some(id.into());
        self
    }

    pub fn forced(mut self, force: bool) -> Self {
        self.force = force;
        self
    }
}

/// Owns a project's file cache and runs its build cycles.
///
/// The cache sits behind an async mutex, so two cycles for the same project
/// never interleave; the second waits for the first.
#[derive(Clone)]
pub struct BuildSession {
    tools: Toolbox,
    cache: Arc<Mutex<FileCache>>,
    progress: Arc<dyn ProgressMonitor>,
}

impl BuildSession {
    /// A session persisting its cache under the project root.
    pub fn new(tools: Toolbox, project: &Project) -> Self {
        Self::with_cache(tools, FileCache::new(project.root()))
    }

    pub fn with_cache(tools: Toolbox, cache: FileCache) -> Self {
        Self {
            tools,
            cache: Arc::new(Mutex::new(cache)),
            progress: Arc::new(NullProgress),
        }
    }

    pub fn with_progress(mut self, progress: Arc<dyn ProgressMonitor>) -> Self {
        self.progress = progress;
        self
    }

    pub fn tools(&self) -> &Toolbox {
        &self.tools
    }

    /// Resolves and validates the builder for `format`, or checks the
    /// explicitly named one.
    pub fn prepare(&self, format: &str, builder: Option<&str>) -> Result<Box<dyn Builder>, BuildError> {
        let registry = &self.tools.registry;
        let Some(id) = builder else {
            return registry.resolve(format, None, &self.tools);
        };
        let mut builder = registry.create_builder(id)?;
        if builder.description().output_format != format {
            return Err(BuildError::Configuration(format!(
                "builder `{}` produces `{}`, not `{}`",
                id,
                builder.description().output_format,
                format
            )));
        }
        builder.validate(&self.tools)?;
        Ok(builder)
    }

    /// The chain a request for `format` would run, e.g. `latex+dvips+ps2pdf`.
    pub fn sequence(&self, format: &str, builder: Option<&str>) -> Result<String, BuildError> {
        Ok(self.prepare(format, builder)?.sequence())
    }

    /// Runs one build cycle until it finishes, fails, or `cancel` fires.
    pub async fn execute(
        &self,
        request: &BuildRequest,
        cancel: CancellationToken,
    ) -> Result<BuildReport, BuildError> {
        let mut builder = self.prepare(&request.format, request.builder.as_deref())?;
        builder.reset(self.progress.clone());
        builder.attach(&cancel);

        let mut cache = self.cache.lock().await;
        if cache.root() != request.resource.project().root() {
            return Err(BuildError::Configuration(format!(
                "{} is not part of the project at {}",
                request.resource.path().display(),
                cache.root().display()
            )));
        }
        let resource = &request.resource;
        if resource.key_of(resource.path()).is_none() {
            return Err(BuildError::Configuration(format!(
                "{} lies outside the project at {}",
                resource.path().display(),
                resource.project().root().display()
            )));
        }
        debug!(
            "Building {} with `{}`",
            request.resource.path().display(),
            builder.id()
        );
        let mut ctx = BuildContext::new(&self.tools, &mut cache, request.force);
        builder.build(&request.resource, &mut ctx).await
    }

    /// Starts a cycle on a worker task.
    pub fn spawn(&self, request: BuildRequest) -> BuildJob {
        let cancel = CancellationToken::new();
        let session = self.clone();
        let token = cancel.clone();
        let handle = tokio::spawn(async move { session.execute(&request, token).await });
        BuildJob { cancel, handle }
    }
}

/// A build cycle running in the background.
pub struct BuildJob {
    cancel: CancellationToken,
    handle: JoinHandle<Result<BuildReport, BuildError>>,
}

impl BuildJob {
    /// Requests a cooperative stop; [`BuildJob::wait`] then yields
    /// [`BuildError::Cancelled`] unless the cycle already finished.
    pub fn stop(&self) {
        self.cancel.cancel();
    }

    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }

    pub async fn wait(self) -> Result<BuildReport, BuildError> {
        self.handle.await?
    }
}
