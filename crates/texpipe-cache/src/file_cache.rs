use crate::error::CacheError;
use crate::hash::ContentHash;
use crate::info::ProjectFileInfo;
use crate::store::{CacheReader, CacheWriter, StageRecords};
use log::{debug, warn};
use std::collections::HashMap;
use std::fs::{self, File};
use std::io;
use std::path::{Component, Path, PathBuf};
use std::time::UNIX_EPOCH;

/// Hidden directory inside the project that holds derived build state.
pub const CACHE_DIR: &str = ".texpipe";
/// Name of the persisted cache document inside [`CACHE_DIR`].
pub const CACHE_FILE: &str = "filecache.json";

/// Outcome of checking one file against the cache.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileChange {
    Changed,
    Unchanged,
}

impl FileChange {
    pub fn is_changed(self) -> bool {
        self == FileChange::Changed
    }
}

/// Change-detection state for one project.
///
/// `initial` is what the previous cycle (or the persisted store) knew;
/// `tracked` is being rebuilt by the current cycle. [`restore`](Self::restore)
/// opens a cycle, the merge/update calls fill `tracked`, and
/// [`save`](Self::save) persists it.
///
/// Separately, each build stage keeps a record of the input hashes it
/// consumed on its last successful run. Those records outlive cycles, so a
/// stage is compared against its own last run rather than against whatever
/// stage happened to look at a file most recently.
///
/// A cache is owned by exactly one build at a time; it does no locking.
#[derive(Debug)]
pub struct FileCache {
    root: PathBuf,
    store: Option<PathBuf>,
    initial: HashMap<String, ProjectFileInfo>,
    tracked: HashMap<String, ProjectFileInfo>,
    stages: StageRecords,
    loaded: bool,
}

impl FileCache {
    /// A cache persisted under `<root>/.texpipe/filecache.json`.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        let root = root.into();
        let store = root.join(CACHE_DIR).join(CACHE_FILE);
        Self {
            root,
            store: Some(store),
            initial: HashMap::new(),
            tracked: HashMap::new(),
            stages: StageRecords::new(),
            loaded: false,
        }
    }

    /// A cache that lives only as long as this value.
    pub fn in_memory(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            store: None,
            initial: HashMap::new(),
            tracked: HashMap::new(),
            stages: StageRecords::new(),
            loaded: false,
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn store_path(&self) -> Option<&Path> {
        self.store.as_deref()
    }

    /// Opens a new cycle.
    ///
    /// The first call loads `initial` from the persisted store; later calls
    /// carry the previous cycle's `tracked` over. `tracked` is always left empty.
    /// A store that cannot be read is reported after the cache has been reset
    /// to empty, so the cycle can still proceed as a full rebuild.
    pub fn restore(&mut self) -> Result<(), CacheError> {
        let previous = std::mem::take(&mut self.tracked);
        if self.loaded {
            self.initial = previous;
            return Ok(());
        }
        self.loaded = true;
        self.initial.clear();
        self.stages.clear();

        let Some(store) = self.store.as_ref() else {
            return Ok(());
        };
        let file = match File::open(store) {
            Ok(file) => file,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(()),
            Err(e) => return Err(CacheError::io(store, e)),
        };
        match CacheReader::new(file).read() {
            Ok(contents) => {
                debug!(
                    "Loaded {} cached file records and {} stage records from {:?}",
                    contents.files.len(),
                    contents.stages.len(),
                    store
                );
                self.initial = contents.files;
                self.stages = contents.stages;
                Ok(())
            }
            Err(source) => Err(CacheError::Format {
                path: store.clone(),
                source,
            }),
        }
    }

    /// Moves `path` from the previous cycle's knowledge into the current one
    /// and reports whether its content changed.
    ///
    /// A path never seen before is hashed and recorded as changed. A path
    /// already merged in this cycle is re-checked against its tracked record.
    pub fn merge_tracked_file(&mut self, path: &str, stamp: i64) -> Result<FileChange, CacheError> {
        if let Some(info) = self.initial.remove(path) {
            self.tracked.insert(path.to_string(), info);
            return self.update_tracked_file(path, stamp);
        }
        if self.tracked.contains_key(path) {
            return self.update_tracked_file(path, stamp);
        }
        self.track_new(path, stamp)
    }

    /// Re-checks a tracked file.
    ///
    /// An equal stamp short-circuits to unchanged. Otherwise the content is
    /// hashed and only a different digest counts as a change; a stamp bump
    /// over identical bytes just refreshes the stamp. If hashing fails the
    /// record is left as it was, so the file is examined again next time.
    pub fn update_tracked_file(&mut self, path: &str, stamp: i64) -> Result<FileChange, CacheError> {
        let absolute = self.absolute(path);
        let Some(info) = self.tracked.get_mut(path) else {
            return self.track_new(path, stamp);
        };
        if info.stamp() == Some(stamp) {
            return Ok(FileChange::Unchanged);
        }

        let hash = ContentHash::of_file(&absolute).map_err(|e| CacheError::io(&absolute, e))?;
        let change = if info.hash() == Some(&hash) {
            FileChange::Unchanged
        } else {
            info.set_hash(hash);
            FileChange::Changed
        };
        info.set_stamp(stamp);
        Ok(change)
    }

    fn track_new(&mut self, path: &str, stamp: i64) -> Result<FileChange, CacheError> {
        let absolute = self.absolute(path);
        let hash = ContentHash::of_file(&absolute).map_err(|e| CacheError::io(&absolute, e))?;
        self.tracked.insert(
            path.to_string(),
            ProjectFileInfo::with_state(path, Some(stamp), Some(hash)),
        );
        Ok(FileChange::Changed)
    }

    /// Drops everything known about `path`, so the next check reports it as new.
    pub fn forget(&mut self, path: &str) {
        self.initial.remove(path);
        self.tracked.remove(path);
    }

    /// Writes `tracked` to the persisted store.
    ///
    /// The document goes to a sibling temporary file first and is renamed into
    /// place, so an interrupted save never leaves a truncated cache behind.
    pub fn save(&self) -> Result<(), CacheError> {
        let Some(store) = self.store.as_ref() else {
            return Ok(());
        };
        if let Some(parent) = store.parent() {
            fs::create_dir_all(parent).map_err(|e| CacheError::io(parent, e))?;
        }
        let staging = store.with_extension("json.tmp");
        let file = File::create(&staging).map_err(|e| CacheError::io(&staging, e))?;
        CacheWriter::new(file)
            .write(self.tracked.values(), &self.stages)
            .map_err(|e| CacheError::io(&staging, e))?;
        fs::rename(&staging, store).map_err(|e| CacheError::io(store, e))?;
        debug!("Saved {} file records to {:?}", self.tracked.len(), store);
        Ok(())
    }

    /// Forgets everything, including the persisted store, forcing the next
    /// cycle to treat every file as new.
    pub fn clear(&mut self) -> Result<(), CacheError> {
        self.initial.clear();
        self.tracked.clear();
        self.stages.clear();
        self.loaded = true;
        if let Some(store) = self.store.as_ref() {
            match fs::remove_file(store) {
                Ok(()) => {}
                Err(e) if e.kind() == io::ErrorKind::NotFound => {}
                Err(e) => return Err(CacheError::io(store, e)),
            }
        }
        Ok(())
    }

    /// Inputs of `stage` that differ from what its last successful run
    /// consumed, or `None` if the stage never completed.
    ///
    /// Call after the inputs were merged into this cycle. An input without a
    /// tracked hash counts as changed; so does an input the stage consumed
    /// last time that is no longer among `inputs`.
    pub fn stage_changes(&self, stage: &str, inputs: &[String]) -> Option<Vec<String>> {
        let record = self.stages.get(stage)?;
        let mut changed: Vec<String> = inputs
            .iter()
            .filter(|key| {
                let current = self.tracked.get(key.as_str()).and_then(|info| info.hash());
                current.is_none() || current != record.get(key.as_str())
            })
            .cloned()
            .collect();
        changed.extend(record.keys().filter(|key| !inputs.contains(key)).cloned());
        Some(changed)
    }

    /// Remembers the tracked hashes of `inputs` as what `stage` consumed.
    pub fn record_stage(&mut self, stage: &str, inputs: &[String]) {
        let hashes = inputs
            .iter()
            .filter_map(|key| {
                let hash = self.tracked.get(key)?.hash()?;
                Some((key.clone(), hash.clone()))
            })
            .collect();
        self.stages.insert(stage.to_string(), hashes);
    }

    pub fn forget_stage(&mut self, stage: &str) {
        self.stages.remove(stage);
    }

    /// Removes the persisted store of the project at `root` without loading it.
    pub fn clear_store(root: &Path) -> Result<bool, CacheError> {
        let store = root.join(CACHE_DIR).join(CACHE_FILE);
        match fs::remove_file(&store) {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(CacheError::io(store, e)),
        }
    }

    pub fn initial(&self) -> impl Iterator<Item = &ProjectFileInfo> {
        self.initial.values()
    }

    pub fn tracked(&self) -> impl Iterator<Item = &ProjectFileInfo> {
        self.tracked.values()
    }

    pub fn tracked_info(&self, path: &str) -> Option<&ProjectFileInfo> {
        self.tracked.get(path)
    }

    pub fn absolute(&self, path: &str) -> PathBuf {
        self.root.join(path)
    }

    /// Project-relative key for `path`, `/`-separated, or `None` when the path
    /// lies outside the project root.
    pub fn key_for(&self, path: &Path) -> Option<String> {
        let relative = if path.is_absolute() {
            path.strip_prefix(&self.root).ok()?
        } else {
            path
        };
        let mut parts = Vec::new();
        for component in relative.components() {
            match component {
                Component::Normal(part) => parts.push(part.to_string_lossy().into_owned()),
                Component::CurDir => {}
                _ => return None,
            }
        }
        if parts.is_empty() {
            None
        } else {
            Some(parts.join("/"))
        }
    }

    /// The cheap change indicator for `path`: its modification time in
    /// milliseconds since the epoch.
    pub fn modification_stamp(path: &Path) -> io::Result<i64> {
        let modified = fs::metadata(path)?.modified()?;
        let stamp = match modified.duration_since(UNIX_EPOCH) {
            Ok(after) => after.as_millis() as i64,
            Err(before) => -(before.duration().as_millis() as i64),
        };
        Ok(stamp)
    }

    /// Stamp of a project file, warning about and swallowing failures.
    pub fn stamp_of(&self, path: &str) -> Option<i64> {
        match Self::modification_stamp(&self.absolute(path)) {
            Ok(stamp) => Some(stamp),
            Err(e) if e.kind() == io::ErrorKind::NotFound => None,
            Err(e) => {
                warn!("Cannot stat {}: {}", path, e);
                None
            }
        }
    }
}
