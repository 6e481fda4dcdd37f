use crate::diagnostics::{DiagnosticSink, LogSink};
use crate::exec::{CommandExecutor, ProcessExecutor};
use crate::prefs::Preferences;
use crate::registry::Registry;
use std::sync::Arc;
use texpipe_cache::FileCache;

/// The collaborators every builder and runner works with.
#[derive(Clone)]
pub struct Toolbox {
    pub registry: Arc<Registry>,
    pub prefs: Arc<dyn Preferences>,
    pub executor: Arc<dyn CommandExecutor>,
    pub sink: Arc<dyn DiagnosticSink>,
}

impl Toolbox {
    /// Real processes, diagnostics to the log.
    pub fn new(registry: Arc<Registry>, prefs: Arc<dyn Preferences>) -> Self {
        Self {
            registry,
            prefs,
            executor: Arc::new(ProcessExecutor),
            sink: Arc::new(LogSink),
        }
    }

    pub fn with_executor(mut self, executor: Arc<dyn CommandExecutor>) -> Self {
        self.executor = executor;
        self
    }

    pub fn with_sink(mut self, sink: Arc<dyn DiagnosticSink>) -> Self {
        self.sink = sink;
        self
    }
}

/// Per-cycle state handed down the builder chain.
pub struct BuildContext<'a> {
    pub tools: &'a Toolbox,
    pub cache: &'a mut FileCache,
    /// Run every stage regardless of what the cache says.
    pub force: bool,
}

impl<'a> BuildContext<'a> {
    pub fn new(tools: &'a Toolbox, cache: &'a mut FileCache, force: bool) -> Self {
        Self { tools, cache, force }
    }
}
