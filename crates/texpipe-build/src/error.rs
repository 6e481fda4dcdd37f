use texpipe_cache::CacheError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum BuildError {
    /// The configured executable does not resolve. Raised before any process
    /// is spawned and before the cache is touched.
    #[error("{runner}: program `{program}` not found")]
    ToolNotFound { runner: String, program: String },

    /// The tool exited unsuccessfully or reported errors in its output.
    #[error("{runner} failed ({})", describe_failure(.exit_code, .errors))]
    ToolExecution {
        runner: String,
        exit_code: Option<i32>,
        errors: usize,
    },

    #[error(transparent)]
    CacheIo(#[from] CacheError),

    /// A malformed descriptor, preference or argument template.
    #[error("configuration error: {0}")]
    Configuration(String),

    #[error("no builder produces `{format}`")]
    NoBuilder { format: String },

    #[error("build cancelled")]
    Cancelled,

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("build worker failed: {0}")]
    Worker(#[from] tokio::task::JoinError),
}

impl BuildError {
    pub fn is_cancelled(&self) -> bool {
        matches!(self, BuildError::Cancelled)
    }
}

fn describe_failure(exit_code: &Option<i32>, errors: &usize) -> String {
    match (*exit_code, *errors) {
        (Some(code), 0) => format!("exit code {}", code),
        (Some(code), n) => format!("exit code {}, {} error(s)", code, n),
        (None, 0) => "terminated by signal".to_string(),
        (None, n) => format!("terminated by signal, {} error(s)", n),
    }
}
