//! On-disk representation of a file-info map.
//!
//! The document is a JSON object holding a format version and a flat list of
//! `file` entries, each carrying its path and, when known, its stamp and hex hash:
//!
//! ```json
//! { "version": "1", "files": [ { "path": "main.tex", "stamp": 100, "hash": "ab12" } ] }
//! ```
//!
//! An optional `stages` object maps a stage id to the input hashes that stage
//! consumed on its last successful run:
//!
//! ```json
//! { "stages": { "latex:main.tex": { "main.tex": "ab12", "refs.bib": "cd34" } } }
//! ```

use crate::hash::ContentHash;
use crate::info::ProjectFileInfo;
use log::warn;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::io::{BufReader, BufWriter, Read, Write};

/// Format version written into every cache document.
pub const CACHE_VERSION: &str = "1";

/// Input hashes per stage id, keyed by project-relative path.
pub type StageRecords = BTreeMap<String, BTreeMap<String, ContentHash>>;

#[derive(Debug, Serialize, Deserialize)]
struct CacheDocument {
    version: String,
    #[serde(default)]
    files: Vec<ProjectFileInfo>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    stages: StageRecords,
}

/// Everything a cache document holds.
#[derive(Debug, Default)]
pub struct CacheContents {
    pub files: HashMap<String, ProjectFileInfo>,
    pub stages: StageRecords,
}

/// Streams a cache document into a path-keyed map.
pub struct CacheReader<R: Read> {
    inner: BufReader<R>,
}

impl<R: Read> CacheReader<R> {
    pub fn new(reader: R) -> Self {
        Self {
            inner: BufReader::new(reader),
        }
    }

    /// Reads the whole document.
    ///
    /// A document written under another format version yields an empty map
    /// rather than an error, so an upgrade costs one full rebuild.
    pub fn read_map(self) -> serde_json::Result<HashMap<String, ProjectFileInfo>> {
        Ok(self.read()?.files)
    }

    /// Reads file records and stage records.
    pub fn read(self) -> serde_json::Result<CacheContents> {
        let document: CacheDocument = serde_json::from_reader(self.inner)?;
        if document.version != CACHE_VERSION {
            warn!(
                "Ignoring file cache written with format version {}",
                document.version
            );
            return Ok(CacheContents::default());
        }
        // Later duplicates win.
        let files = document
            .files
            .into_iter()
            .map(|info| (info.path().to_string(), info))
            .collect();
        Ok(CacheContents {
            files,
            stages: document.stages,
        })
    }
}

/// Streams a path-keyed map out as a cache document.
pub struct CacheWriter<W: Write> {
    inner: BufWriter<W>,
}

impl<W: Write> CacheWriter<W> {
    pub fn new(writer: W) -> Self {
        Self {
            inner: BufWriter::new(writer),
        }
    }

    /// Writes `entries` sorted by path so repeated saves of the same state
    /// produce identical bytes.
    pub fn write_map<'a>(
        self,
        entries: impl IntoIterator<Item = &'a ProjectFileInfo>,
    ) -> std::io::Result<()> {
        self.write(entries, &StageRecords::new())
    }

    /// Writes file records followed by stage records.
    pub fn write<'a>(
        mut self,
        entries: impl IntoIterator<Item = &'a ProjectFileInfo>,
        stages: &StageRecords,
    ) -> std::io::Result<()> {
        let mut files: Vec<ProjectFileInfo> = entries.into_iter().cloned().collect();
        files.sort_by(|a, b| a.path().cmp(b.path()));
        let document = CacheDocument {
            version: CACHE_VERSION.to_string(),
            files,
            stages: stages.clone(),
        };
        serde_json::to_writer_pretty(&mut self.inner, &document)?;
        self.inner.write_all(b"\n")?;
        self.inner.flush()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hash::ContentHash;

    #[test]
    fn test_write_then_read() {
        let entries = vec![
            ProjectFileInfo::with_state("sub/b.tex", Some(7), None),
            ProjectFileInfo::with_state(
                "main.tex",
                Some(100),
                Some(ContentHash::from_bytes(vec![0xde, 0xad])),
            ),
        ];
        let mut bytes = Vec::new();
        CacheWriter::new(&mut bytes).write_map(&entries).unwrap();

        let text = String::from_utf8(bytes.clone()).unwrap();
        assert!(text.find("main.tex").unwrap() < text.find("sub/b.tex").unwrap());
        assert!(text.contains("\"dead\""));

        let map = CacheReader::new(&bytes[..]).read_map().unwrap();
        assert_eq!(map.len(), 2);
        let main = &map["main.tex"];
        assert_eq!(main.stamp(), Some(100));
        assert_eq!(main.hash().unwrap().as_bytes(), &[0xde, 0xad]);
        assert!(map["sub/b.tex"].hash().is_none());
    }

    #[test]
    fn test_stage_records_round_trip() {
        let mut stages = StageRecords::new();
        stages
            .entry("latex:main.tex".to_string())
            .or_default()
            .insert("main.tex".to_string(), ContentHash::from_bytes(vec![0xab, 0x12]));
        let entries = vec![ProjectFileInfo::with_state("main.tex", Some(1), None)];
        let mut bytes = Vec::new();
        CacheWriter::new(&mut bytes).write(&entries, &stages).unwrap();

        let contents = CacheReader::new(&bytes[..]).read().unwrap();
        assert_eq!(contents.files.len(), 1);
        assert_eq!(contents.stages, stages);

        // Documents without stages still read.
        let doc = r#"{"version":"1","files":[]}"#;
        assert!(CacheReader::new(doc.as_bytes()).read().unwrap().stages.is_empty());
    }

    #[test]
    fn test_foreign_version_is_empty() {
        let doc = r#"{"version":"0","files":[{"path":"a.tex","stamp":1}]}"#;
        let map = CacheReader::new(doc.as_bytes()).read_map().unwrap();
        assert!(map.is_empty());
    }

    #[test]
    fn test_garbage_is_an_error() {
        assert!(CacheReader::new(&b"<files/>"[..]).read_map().is_err());
    }
}
