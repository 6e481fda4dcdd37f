//! # texpipe build
//!
//! Incremental build orchestration for LaTeX documents.
//!
//! A [`Registry`] loads the runner and builder catalogues and resolves a
//! chain of builders for a requested output format: `pdf` may become
//! `pdflatex`, or `latex+dvips+ps2pdf` when that is what the preferences ask
//! for. A [`BuildSession`] runs that chain for one project, consulting the
//! project's [`FileCache`](texpipe_cache::FileCache) before each stage so work
//! whose inputs did not change is skipped.
//!
//! ```no_run
//! use std::sync::Arc;
//! use texpipe_build::{BuildRequest, BuildSession, PreferenceStore, Registry, Resource, Toolbox};
//!
//! # async fn run() -> Result<(), texpipe_build::BuildError> {
//! let resource = Resource::standalone("thesis/main.tex".as_ref())?;
//! let tools = Toolbox::new(Arc::new(Registry::standard()?), Arc::new(PreferenceStore::new()));
//! let session = BuildSession::new(tools, resource.project());
//!
//! let job = session.spawn(BuildRequest::new(resource, "pdf"));
//! let report = job.wait().await?;
//! println!("ran {}", report.sequence);
//! # Ok(())
//! # }
//! ```

pub mod builder;
pub mod context;
pub mod descriptor;
pub mod diagnostics;
pub mod error;
pub mod exec;
pub mod parsers;
pub mod prefs;
pub mod progress;
pub mod registry;
pub mod resource;
pub mod runner;
pub mod session;
pub mod template;

pub use builder::{BuildReport, BuildState, Builder, StageRecord, StageStatus};
pub use context::{BuildContext, Toolbox};
pub use descriptor::{BuilderDescription, Catalog, RunnerDescription};
pub use diagnostics::{CollectingSink, DiagnosticSink, LogSink, ParseErrorMessage, Severity};
pub use error::BuildError;
pub use exec::{CommandExecutor, ProcessExecutor, ToolCommand, ToolOutput};
pub use prefs::{PreferenceStore, Preferences};
pub use progress::{LogProgress, NullProgress, ProgressMonitor};
pub use registry::Registry;
pub use resource::{Project, Resource};
pub use runner::{ExternalRunner, ProgramRunner, RunReport};
pub use session::{BuildJob, BuildRequest, BuildSession};
