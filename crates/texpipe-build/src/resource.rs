use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use walkdir::WalkDir;

/// Extensions of files that feed a TeX run.
pub const TEX_SOURCE_EXTENSIONS: &[&str] = &[
    "tex", "ltx", "sty", "cls", "bib", "bst", "bbx", "cbx", "dtx", "ins", "ist", "def", "cfg",
    "clo",
];

/// A directory tree that documents are built in.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Project {
    root: PathBuf,
    name: String,
}

impl Project {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        let root = root.into();
        let name = root
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| root.display().to_string());
        Self { root, name }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Project-relative, `/`-separated paths of every TeX source file,
    /// sorted. Hidden files and directories are not visited.
    pub fn source_files(&self) -> Vec<String> {
        let mut files: Vec<String> = WalkDir::new(&self.root)
            .into_iter()
            .filter_entry(|entry| entry.depth() == 0 || !is_hidden(entry.file_name()))
            .filter_map(|entry| entry.ok())
            .filter(|entry| entry.file_type().is_file())
            .filter(|entry| {
                entry
                    .path()
                    .extension()
                    .and_then(|ext| ext.to_str())
                    .is_some_and(|ext| TEX_SOURCE_EXTENSIONS.contains(&ext))
            })
            .filter_map(|entry| relative_key(&self.root, entry.path()))
            .collect();
        files.sort();
        files
    }
}

fn is_hidden(name: &std::ffi::OsStr) -> bool {
    name.to_string_lossy().starts_with('.')
}

fn relative_key(root: &Path, path: &Path) -> Option<String> {
    let relative = path.strip_prefix(root).ok()?;
    let parts: Vec<String> = relative
        .components()
        .map(|c| c.as_os_str().to_string_lossy().into_owned())
        .collect();
    if parts.is_empty() {
        None
    } else {
        Some(parts.join("/"))
    }
}

/// A document inside a project, the thing a build is requested for.
#[derive(Debug, Clone)]
pub struct Resource {
    project: Arc<Project>,
    path: PathBuf,
}

impl Resource {
    /// `path` may be absolute or relative to the project root.
    pub fn new(project: Arc<Project>, path: impl AsRef<Path>) -> Self {
        let path = path.as_ref();
        let path = if path.is_absolute() {
            path.to_path_buf()
        } else {
            project.root().join(path)
        };
        Self { project, path }
    }

    /// A resource whose project is the directory containing it.
    pub fn standalone(path: &Path) -> io::Result<Self> {
        let path = std::fs::canonicalize(path)?;
        let root = path
            .parent()
            .map(Path::to_path_buf)
            .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidInput, "file has no parent"))?;
        Ok(Self {
            project: Arc::new(Project::new(root)),
            path,
        })
    }

    pub fn project(&self) -> &Arc<Project> {
        &self.project
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn exists(&self) -> bool {
        self.path.is_file()
    }

    pub fn read(&self) -> io::Result<Vec<u8>> {
        std::fs::read(&self.path)
    }

    /// Directory the tools run in.
    pub fn directory(&self) -> &Path {
        self.path.parent().unwrap_or_else(|| self.project.root())
    }

    /// File name without extension, e.g. `main` for `main.tex`.
    pub fn base_name(&self) -> String {
        self.path
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_default()
    }

    /// The file holding this document in `format`: the resource itself when
    /// the format is its own extension, otherwise `<dir>/<base>.<format>`.
    pub fn sibling(&self, format: &str) -> PathBuf {
        if self.path.extension().and_then(|e| e.to_str()) == Some(format) {
            return self.path.clone();
        }
        self.directory().join(format!("{}.{}", self.base_name(), format))
    }

    /// Project-relative key of `path`, as used by the file cache.
    pub fn key_of(&self, path: &Path) -> Option<String> {
        relative_key(self.project.root(), path)
    }
}
