//! Locating and launching external programs.
//!
//! Everything that touches the operating system's process table goes through
//! [`CommandExecutor`], so builders can be exercised with a scripted executor.

use crate::error::BuildError;
use async_trait::async_trait;
use log::debug;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::Command;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

/// One fully expanded tool invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToolCommand {
    pub program: PathBuf,
    pub args: Vec<String>,
    pub working_dir: PathBuf,
    /// File the tool reads, for bookkeeping only.
    pub input: PathBuf,
    /// File the tool is expected to produce, for bookkeeping only.
    pub output: PathBuf,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToolOutput {
    /// `None` when the process was terminated by a signal.
    pub exit_code: Option<i32>,
    /// Interleaved stdout and stderr, decoded lossily.
    pub text: String,
}

impl ToolOutput {
    pub fn success(&self) -> bool {
        self.exit_code == Some(0)
    }
}

#[async_trait]
pub trait CommandExecutor: Send + Sync + std::fmt::Debug {
    /// Resolves `program` to an executable, honouring an explicitly
    /// configured path. A configured path that does not resolve is not
    /// replaced by a search.
    fn locate(&self, program: &str, configured: Option<&Path>) -> Option<PathBuf> {
        locate_executable(program, configured)
    }

    /// Runs `command` to completion, or kills it once `cancel` fires.
    async fn execute(
        &self,
        command: &ToolCommand,
        cancel: &CancellationToken,
    ) -> Result<ToolOutput, BuildError>;
}

pub fn locate_executable(program: &str, configured: Option<&Path>) -> Option<PathBuf> {
    match configured {
        Some(path) if path.components().count() > 1 || path.is_absolute() => {
            is_executable(path).then(|| path.to_path_buf())
        }
        Some(name) => which::which(name).ok(),
        None => which::which(program).ok(),
    }
}

pub fn is_executable(path: &Path) -> bool {
    let Ok(metadata) = std::fs::metadata(path) else {
        return false;
    };
    if !metadata.is_file() {
        return false;
    }
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        metadata.permissions().mode() & 0o111 != 0
    }
    #[cfg(not(unix))]
    {
        true
    }
}

/// Launches real processes with `tokio::process`.
#[derive(Debug, Default)]
pub struct ProcessExecutor;

#[async_trait]
impl CommandExecutor for ProcessExecutor {
    async fn execute(
        &self,
        command: &ToolCommand,
        cancel: &CancellationToken,
    ) -> Result<ToolOutput, BuildError> {
        debug!(
            "Running {:?} {:?} in {:?}",
            command.program, command.args, command.working_dir
        );
        let mut child = Command::new(&command.program)
            .args(&command.args)
            .current_dir(&command.working_dir)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| match e.kind() {
                std::io::ErrorKind::NotFound => BuildError::ToolNotFound {
                    runner: command.program.display().to_string(),
                    program: command.program.display().to_string(),
                },
                _ => BuildError::Io(e),
            })?;

        let (tx, mut rx) = mpsc::unbounded_channel::<String>();
        if let Some(stdout) = child.stdout.take() {
            tokio::spawn(pump_lines(stdout, tx.clone()));
        }
        if let Some(stderr) = child.stderr.take() {
            tokio::spawn(pump_lines(stderr, tx.clone()));
        }
        drop(tx);
        let collector = tokio::spawn(async move {
            let mut text = String::new();
            while let Some(line) = rx.recv().await {
                text.push_str(&line);
            }
            text
        });

        let status = tokio::select! {
            status = child.wait() => status?,
            _ = cancel.cancelled() => {
                debug!("Killing {:?}", command.program);
                let _ = child.kill().await;
                collector.abort();
                return Err(BuildError::Cancelled);
            }
        };

        // Both pipes close once the process has exited, which ends the collector.
        let text = collector.await.unwrap_or_default();
        Ok(ToolOutput {
            exit_code: status.code(),
            text,
        })
    }
}

/// Forwards `reader` line by line, keeping line endings. Tool output is not
/// guaranteed to be UTF-8 (TeX writes the input encoding verbatim).
async fn pump_lines<R: AsyncRead + Unpin>(reader: R, tx: mpsc::UnboundedSender<String>) {
    let mut reader = BufReader::new(reader);
    let mut buffer = Vec::new();
    loop {
        buffer.clear();
        match reader.read_until(b'\n', &mut buffer).await {
            Ok(0) | Err(_) => break,
            Ok(_) => {
                if tx.send(String::from_utf8_lossy(&buffer).into_owned()).is_err() {
                    break;
                }
            }
        }
    }
}


#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_configured_path_must_be_executable() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("latex");
        assert_eq!(locate_executable("latex", Some(&missing)), None);

        std::fs::write(&missing, "#!/bin/sh\n").unwrap();
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            assert_eq!(locate_executable("latex", Some(&missing)), None);
            std::fs::set_permissions(&missing, std::fs::Permissions::from_mode(0o755)).unwrap();
        }
        assert_eq!(locate_executable("latex", Some(&missing)), Some(missing.clone()));
    }

    #[test]
    fn test_directory_is_not_executable() {
        let dir = tempfile::tempdir().unwrap();
        assert!(!is_executable(dir.path()));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_process_output_is_combined() {
        let dir = tempfile::tempdir().unwrap();
        let command = ToolCommand {
            program: PathBuf::from("/bin/sh"),
            args: vec!["-c".into(), "echo to-out; echo to-err 1>&2; exit 3".into()],
            working_dir: dir.path().to_path_buf(),
            input: PathBuf::new(),
            output: PathBuf::new(),
        };
        let output = ProcessExecutor
            .execute(&command, &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(output.exit_code, Some(3));
        assert!(!output.success());
        assert!(output.text.contains("to-out\n"));
        assert!(output.text.contains("to-err\n"));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_cancel_kills_process() {
        let dir = tempfile::tempdir().unwrap();
        let command = ToolCommand {
            program: PathBuf::from("/bin/sh"),
            args: vec!["-c".into(), "sleep 30".into()],
            working_dir: dir.path().to_path_buf(),
            input: PathBuf::new(),
            output: PathBuf::new(),
        };
        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(std::time::Duration::from_millis(100)).await;
            trigger.cancel();
        });

        let started = std::time::Instant::now();
        let result = ProcessExecutor.execute(&command, &cancel).await;
        assert!(matches!(result, Err(BuildError::Cancelled)));
        assert!(started.elapsed() < std::time::Duration::from_secs(10));
    }

    #[tokio::test]
    async fn test_spawn_failure_is_tool_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let command = ToolCommand {
            program: dir.path().join("no-such-tool"),
            args: vec![],
            working_dir: dir.path().to_path_buf(),
            input: PathBuf::new(),
            output: PathBuf::new(),
        };
        let result = ProcessExecutor
            .execute(&command, &CancellationToken::new())
            .await;
        assert!(matches!(result, Err(BuildError::ToolNotFound { .. })));
    }
}
