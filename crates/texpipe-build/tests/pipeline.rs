//! End-to-end build cycles against a scripted tool executor.

use async_trait::async_trait;
use std::collections::{HashMap, VecDeque};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, UNIX_EPOCH};
use texpipe_build::prefs::keys;
use texpipe_build::{
    BuildError, BuildRequest, BuildSession, CollectingSink, CommandExecutor, PreferenceStore,
    Project, Registry, Resource, ToolCommand, ToolOutput, Toolbox,
};
use texpipe_cache::{CACHE_DIR, CACHE_FILE};
use tokio_util::sync::CancellationToken;

/// Pretends the listed programs exist. Each call is recorded, writes the
/// expected output file derived from the input's content and gives it a
/// fresh modification time.
#[derive(Debug, Default)]
struct ScriptedExecutor {
    installed: Vec<String>,
    hanging: Vec<String>,
    calls: Mutex<Vec<String>>,
    responses: Mutex<HashMap<String, VecDeque<(i32, String)>>>,
    cancel_after: Mutex<Option<(String, CancellationToken)>>,
    clock: AtomicU64,
}

impl ScriptedExecutor {
    fn new(installed: &[&str]) -> Self {
        Self {
            installed: installed.iter().map(|p| p.to_string()).collect(),
            ..Self::default()
        }
    }

    fn respond(&self, program: &str, exit_code: i32, text: &str) {
        self.responses
            .lock()
            .unwrap()
            .entry(program.to_string())
            .or_default()
            .push_back((exit_code, text.to_string()));
    }

    /// Cancels `token` as soon as `program` has finished.
    fn cancel_after(&self, program: &str, token: CancellationToken) {
        *self.cancel_after.lock().unwrap() = Some((program.to_string(), token));
    }

    fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    fn clear_calls(&self) {
        self.calls.lock().unwrap().clear();
    }
}

#[async_trait]
impl CommandExecutor for ScriptedExecutor {
    fn locate(&self, program: &str, _configured: Option<&Path>) -> Option<PathBuf> {
        self.installed
            .iter()
            .any(|p| p == program)
            .then(|| PathBuf::from(program))
    }

    async fn execute(
        &self,
        command: &ToolCommand,
        cancel: &CancellationToken,
    ) -> Result<ToolOutput, BuildError> {
        let program = command.program.display().to_string();
        self.calls.lock().unwrap().push(program.clone());
        if self.hanging.contains(&program) {
            cancel.cancelled().await;
            return Err(BuildError::Cancelled);
        }

        let source = fs::read_to_string(&command.input).unwrap_or_default();
        fs::write(&command.output, format!("{} <- {}", program, source))?;
        let tick = self.clock.fetch_add(1, Ordering::SeqCst);
        set_mtime(&command.output, 2_000_000 + tick);

        if let Some((trigger, token)) = self.cancel_after.lock().unwrap().as_ref() {
            if *trigger == program {
                token.cancel();
            }
        }
        let (exit_code, text) = self
            .responses
            .lock()
            .unwrap()
            .get_mut(&program)
            .and_then(VecDeque::pop_front)
            .unwrap_or((0, String::new()));
        Ok(ToolOutput {
            exit_code: Some(exit_code),
            text,
        })
    }
}

fn set_mtime(path: &Path, secs: u64) {
    let file = fs::File::options().write(true).open(path).unwrap();
    file.set_modified(UNIX_EPOCH + Duration::from_secs(secs)).unwrap();
}

struct Workspace {
    dir: tempfile::TempDir,
    executor: Arc<ScriptedExecutor>,
    session: BuildSession,
    resource: Resource,
}

impl Workspace {
    fn new(executor: ScriptedExecutor, prefs: PreferenceStore) -> Self {
        let dir = tempfile::tempdir().unwrap();
        let main = dir.path().join("main.tex");
        fs::write(&main, "\\documentclass{article}\\begin{document}Hi\\end{document}").unwrap();
        set_mtime(&main, 1_000_100);

        let executor = Arc::new(executor);
        let tools = Toolbox::new(Arc::new(Registry::standard().unwrap()), Arc::new(prefs))
            .with_executor(executor.clone())
            .with_sink(Arc::new(CollectingSink::new()));
        let resource = Resource::new(Arc::new(Project::new(dir.path())), "main.tex");
        let session = BuildSession::new(tools, resource.project());
        Self {
            dir,
            executor,
            session,
            resource,
        }
    }

    fn path(&self, name: &str) -> PathBuf {
        self.dir.path().join(name)
    }

    fn request(&self, format: &str, builder: &str) -> BuildRequest {
        BuildRequest::new(self.resource.clone(), format).with_builder(builder)
    }

    /// A fresh session over the same project, as after a restart.
    fn reopen(&mut self) {
        let tools = self.session.tools().clone();
        self.session = BuildSession::new(tools, self.resource.project());
    }
}

const CHAIN_TOOLS: &[&str] = &["latex", "dvips", "ps2pdf"];

#[tokio::test]
async fn test_three_stage_chain_runs_in_order() {
    let ws = Workspace::new(ScriptedExecutor::new(CHAIN_TOOLS), PreferenceStore::new());
    let report = ws
        .session
        .execute(&ws.request("pdf", "ps-pdf"), CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(ws.executor.calls(), vec!["latex", "dvips", "ps2pdf"]);
    assert_eq!(report.ran(), vec!["latex", "dvips", "ps2pdf"]);
    assert_eq!(report.sequence, "latex+dvips+ps2pdf");
    assert_eq!(report.output, Some(ws.path("main.pdf")));
    assert!(ws.path("main.pdf").exists());
    assert!(ws.path(CACHE_DIR).join(CACHE_FILE).exists());
}

#[tokio::test]
async fn test_unchanged_project_skips_every_stage() {
    let mut ws = Workspace::new(ScriptedExecutor::new(CHAIN_TOOLS), PreferenceStore::new());
    let request = ws.request("pdf", "ps-pdf");
    ws.session
        .execute(&request, CancellationToken::new())
        .await
        .unwrap();
    ws.executor.clear_calls();

    let report = ws
        .session
        .execute(&request, CancellationToken::new())
        .await
        .unwrap();
    assert!(ws.executor.calls().is_empty());
    assert_eq!(report.skipped(), vec!["latex", "dvips", "ps2pdf"]);

    // The persisted cache carries the same knowledge into a new session.
    ws.reopen();
    let report = ws
        .session
        .execute(&request, CancellationToken::new())
        .await
        .unwrap();
    assert!(ws.executor.calls().is_empty());
    assert_eq!(report.skipped().len(), 3);
}

#[tokio::test]
async fn test_touch_without_content_change_is_skipped() {
    let ws = Workspace::new(ScriptedExecutor::new(CHAIN_TOOLS), PreferenceStore::new());
    let request = ws.request("pdf", "ps-pdf");
    ws.session
        .execute(&request, CancellationToken::new())
        .await
        .unwrap();
    ws.executor.clear_calls();

    set_mtime(&ws.path("main.tex"), 1_000_105);
    ws.session
        .execute(&request, CancellationToken::new())
        .await
        .unwrap();
    assert!(ws.executor.calls().is_empty());
}

#[tokio::test]
async fn test_changed_content_reruns_downstream_stages() {
    let ws = Workspace::new(ScriptedExecutor::new(CHAIN_TOOLS), PreferenceStore::new());
    let request = ws.request("pdf", "ps-pdf");
    ws.session
        .execute(&request, CancellationToken::new())
        .await
        .unwrap();
    ws.executor.clear_calls();

    fs::write(ws.path("main.tex"), "\\documentclass{article}\\begin{document}Bye\\end{document}")
        .unwrap();
    set_mtime(&ws.path("main.tex"), 1_000_200);
    ws.session
        .execute(&request, CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(ws.executor.calls(), vec!["latex", "dvips", "ps2pdf"]);
    let pdf = fs::read_to_string(ws.path("main.pdf")).unwrap();
    assert!(pdf.contains("Bye"));
}

#[tokio::test]
async fn test_stop_during_first_stage_prevents_the_rest() {
    let ws = Workspace::new(ScriptedExecutor::new(CHAIN_TOOLS), PreferenceStore::new());
    let request = ws.request("pdf", "ps-pdf");
    let cancel = CancellationToken::new();
    ws.executor.cancel_after("latex", cancel.clone());

    let err = ws.session.execute(&request, cancel).await.unwrap_err();
    assert!(err.is_cancelled());
    assert_eq!(ws.executor.calls(), vec!["latex"]);
    assert!(ws.path("main.dvi").exists());
    assert!(!ws.path("main.ps").exists());

    // The finished latex stage is remembered; the next cycle picks up after it.
    ws.executor.clear_calls();
    *ws.executor.cancel_after.lock().unwrap() = None;
    let report = ws
        .session
        .execute(&request, CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(ws.executor.calls(), vec!["dvips", "ps2pdf"]);
    assert_eq!(report.skipped(), vec!["latex"]);
}

#[tokio::test]
async fn test_spawned_job_stops_hanging_tool() {
    let mut executor = ScriptedExecutor::new(CHAIN_TOOLS);
    executor.hanging.push("latex".into());
    let ws = Workspace::new(executor, PreferenceStore::new());

    let job = ws.session.spawn(ws.request("pdf", "ps-pdf"));
    tokio::time::sleep(Duration::from_millis(50)).await;
    job.stop();
    let err = tokio::time::timeout(Duration::from_secs(5), job.wait())
        .await
        .unwrap()
        .unwrap_err();
    assert!(err.is_cancelled());
    assert_eq!(ws.executor.calls(), vec!["latex"]);
}

#[tokio::test]
async fn test_missing_tool_touches_nothing() {
    let ws = Workspace::new(ScriptedExecutor::new(&["latex", "ps2pdf"]), PreferenceStore::new());
    let err = ws
        .session
        .execute(&ws.request("pdf", "ps-pdf"), CancellationToken::new())
        .await
        .unwrap_err();

    assert!(matches!(err, BuildError::ToolNotFound { ref runner, .. } if runner == "dvips"));
    assert!(ws.executor.calls().is_empty());
    assert!(!ws.path(CACHE_DIR).exists());
}

#[tokio::test]
async fn test_forced_build_runs_everything() {
    let ws = Workspace::new(ScriptedExecutor::new(CHAIN_TOOLS), PreferenceStore::new());
    let request = ws.request("pdf", "ps-pdf");
    ws.session
        .execute(&request, CancellationToken::new())
        .await
        .unwrap();
    ws.executor.clear_calls();

    ws.session
        .execute(&request.clone().forced(true), CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(ws.executor.calls(), vec!["latex", "dvips", "ps2pdf"]);
}

#[tokio::test]
async fn test_bibliography_and_cross_reference_passes() {
    let ws = Workspace::new(
        ScriptedExecutor::new(&["latex", "bibtex"]),
        PreferenceStore::new(),
    );
    fs::write(ws.path("main.aux"), "\\citation{knuth84}\\bibdata{refs}").unwrap();
    ws.executor.respond(
        "latex",
        0,
        "LaTeX Warning: Citation `knuth84' on page 1 undefined on input line 5.\n",
    );
    ws.executor.respond(
        "latex",
        0,
        "LaTeX Warning: Label(s) may have changed. Rerun to get cross-references right.\n",
    );

    let report = ws
        .session
        .execute(&ws.request("dvi", "latex-dvi"), CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(ws.executor.calls(), vec!["latex", "bibtex", "latex", "latex"]);
    assert_eq!(report.ran().len(), 4);
}

#[tokio::test]
async fn test_changed_bib_file_reruns_bibliography() {
    let ws = Workspace::new(
        ScriptedExecutor::new(&["latex", "bibtex"]),
        PreferenceStore::new(),
    );
    fs::write(ws.path("main.aux"), "\\bibdata{refs}").unwrap();
    fs::write(ws.path("refs.bib"), "@book{knuth84, title={The TeXbook}}").unwrap();
    set_mtime(&ws.path("refs.bib"), 1_000_100);
    let request = ws.request("dvi", "latex-dvi");
    ws.session
        .execute(&request, CancellationToken::new())
        .await
        .unwrap();
    ws.executor.clear_calls();

    fs::write(ws.path("refs.bib"), "@book{knuth84, title={The TeXbook}, year=1984}").unwrap();
    set_mtime(&ws.path("refs.bib"), 1_000_300);
    ws.session
        .execute(&request, CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(ws.executor.calls(), vec!["latex", "bibtex", "latex"]);
}

#[tokio::test]
async fn test_biber_preference() {
    let mut prefs = PreferenceStore::new();
    prefs.set(keys::BIBLIOGRAPHY_TOOL, "biber");
    let ws = Workspace::new(ScriptedExecutor::new(&["pdflatex", "biber"]), prefs);
    fs::write(ws.path("main.bcf"), "<bcf/>").unwrap();
    ws.executor.respond("pdflatex", 0, "No file main.bbl.\n");

    ws.session
        .execute(&ws.request("pdf", "pdflatex-pdf"), CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(ws.executor.calls(), vec!["pdflatex", "biber", "pdflatex"]);
}

#[tokio::test]
async fn test_sequence_resolution_by_format() {
    let mut prefs = PreferenceStore::new();
    prefs.set(keys::preferred_builder("pdf"), "dvi-pdf");
    let ws = Workspace::new(
        ScriptedExecutor::new(&["latex", "dvipdf", "pdflatex"]),
        prefs,
    );
    assert_eq!(ws.session.sequence("pdf", None).unwrap(), "latex+dvipdf");
    assert_eq!(
        ws.session.sequence("pdf", Some("pdflatex-pdf")).unwrap(),
        "pdflatex"
    );
    assert!(matches!(
        ws.session.sequence("ps", Some("pdflatex-pdf")),
        Err(BuildError::Configuration(_))
    ));
}

#[tokio::test]
async fn test_switching_builders_does_not_hide_changes() {
    let ws = Workspace::new(
        ScriptedExecutor::new(&["latex", "pdflatex"]),
        PreferenceStore::new(),
    );
    let dvi = ws.request("dvi", "latex-dvi");
    let pdf = ws.request("pdf", "pdflatex-pdf");
    ws.session.execute(&dvi, CancellationToken::new()).await.unwrap();

    fs::write(ws.path("main.tex"), "\\documentclass{article}\\begin{document}Bye\\end{document}")
        .unwrap();
    set_mtime(&ws.path("main.tex"), 1_000_200);
    ws.session.execute(&pdf, CancellationToken::new()).await.unwrap();
    ws.executor.clear_calls();

    // pdflatex already consumed the new main.tex; latex has not.
    let report = ws.session.execute(&dvi, CancellationToken::new()).await.unwrap();
    assert_eq!(ws.executor.calls(), vec!["latex"]);
    assert_eq!(report.ran(), vec!["latex"]);
    assert!(fs::read_to_string(ws.path("main.dvi")).unwrap().contains("Bye"));

    ws.executor.clear_calls();
    let report = ws.session.execute(&pdf, CancellationToken::new()).await.unwrap();
    assert!(ws.executor.calls().is_empty());
    assert_eq!(report.skipped(), vec!["pdflatex"]);
}

#[tokio::test]
async fn test_deleted_source_reruns_latex() {
    let ws = Workspace::new(ScriptedExecutor::new(&["latex"]), PreferenceStore::new());
    fs::write(ws.path("chap.tex"), "\\section{Intro}").unwrap();
    set_mtime(&ws.path("chap.tex"), 1_000_100);
    let request = ws.request("dvi", "latex-dvi");
    ws.session
        .execute(&request, CancellationToken::new())
        .await
        .unwrap();
    ws.executor.clear_calls();

    fs::remove_file(ws.path("chap.tex")).unwrap();
    ws.session
        .execute(&request, CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(ws.executor.calls(), vec!["latex"]);

    ws.executor.clear_calls();
    ws.session
        .execute(&request, CancellationToken::new())
        .await
        .unwrap();
    assert!(ws.executor.calls().is_empty());
}

#[tokio::test]
async fn test_resource_outside_project_is_rejected() {
    let ws = Workspace::new(ScriptedExecutor::new(&["latex"]), PreferenceStore::new());
    let elsewhere = tempfile::tempdir().unwrap();
    let stray = elsewhere.path().join("main.tex");
    fs::write(&stray, "\\documentclass{article}").unwrap();
    let resource = Resource::new(ws.resource.project().clone(), &stray);

    let err = ws
        .session
        .execute(
            &BuildRequest::new(resource, "dvi").with_builder("latex-dvi"),
            CancellationToken::new(),
        )
        .await
        .unwrap_err();
    assert!(matches!(err, BuildError::Configuration(_)));
    assert!(ws.executor.calls().is_empty());
}

#[tokio::test]
async fn test_index_is_not_resorted_after_a_skipped_cycle() {
    let ws = Workspace::new(
        ScriptedExecutor::new(&["pdflatex", "makeindex"]),
        PreferenceStore::new(),
    );
    fs::write(ws.path("main.idx"), "\\indexentry{alpha}{1}").unwrap();
    set_mtime(&ws.path("main.idx"), 1_000_100);
    let request = ws.request("pdf", "pdflatex-pdf");
    ws.session
        .execute(&request, CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(ws.executor.calls(), vec!["pdflatex", "makeindex", "pdflatex"]);

    ws.executor.clear_calls();
    ws.session
        .execute(&request, CancellationToken::new())
        .await
        .unwrap();
    assert!(ws.executor.calls().is_empty());

    fs::write(ws.path("main.tex"), "\\documentclass{article}\\begin{document}Bye\\end{document}")
        .unwrap();
    set_mtime(&ws.path("main.tex"), 1_000_200);
    ws.session
        .execute(&request, CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(ws.executor.calls(), vec!["pdflatex"]);
}
