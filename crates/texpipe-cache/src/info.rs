use crate::hash::ContentHash;
use serde::{Deserialize, Serialize};
use std::hash::{Hash, Hasher};

/// What the cache knows about one project file.
///
/// Identity is the project-relative path: two records for the same path are
/// equal whatever their stamp or hash, and records for different paths never are.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProjectFileInfo {
    path: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    stamp: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    hash: Option<ContentHash>,
}

impl ProjectFileInfo {
    pub fn new(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            stamp: None,
            hash: None,
        }
    }

    pub fn with_state(path: impl Into<String>, stamp: Option<i64>, hash: Option<ContentHash>) -> Self {
        Self {
            path: path.into(),
            stamp,
            hash,
        }
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn stamp(&self) -> Option<i64> {
        self.stamp
    }

    pub fn hash(&self) -> Option<&ContentHash> {
        self.hash.as_ref()
    }

    pub fn set_stamp(&mut self, stamp: i64) {
        self.stamp = Some(stamp);
    }

    pub fn set_hash(&mut self, hash: ContentHash) {
        self.hash = Some(hash);
    }
}

impl PartialEq for ProjectFileInfo {
    fn eq(&self, other: &Self) -> bool {
        self.path == other.path
    }
}

impl Eq for ProjectFileInfo {}

impl Hash for ProjectFileInfo {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.path.hash(state);
    }
}
