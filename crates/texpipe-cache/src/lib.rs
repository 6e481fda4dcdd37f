//! # texpipe cache
//!
//! Content-based change detection for incremental TeX builds.
//!
//! A [`FileCache`] remembers, per project file, a cheap modification stamp and a
//! SHA-256 digest of the file's bytes. Checking a file first compares stamps and
//! only hashes when they differ, so a tool that merely touches a file does not
//! force the stages that read it to run again.
//!
//! ```no_run
//! use texpipe_cache::FileCache;
//!
//! let mut cache = FileCache::new("/work/thesis");
//! cache.restore()?;
//! let stamp = cache.stamp_of("main.tex").unwrap_or_default();
//! if cache.merge_tracked_file("main.tex", stamp)?.is_changed() {
//!     println!("main.tex needs a rebuild");
//! }
//! cache.save()?;
//! # Ok::<(), texpipe_cache::CacheError>(())
//! ```

pub mod error;
pub mod file_cache;
pub mod hash;
pub mod info;
pub mod store;

pub use error::CacheError;
pub use file_cache::{FileCache, FileChange, CACHE_DIR, CACHE_FILE};
pub use hash::ContentHash;
pub use info::ProjectFileInfo;
pub use store::{CacheContents, CacheReader, CacheWriter, StageRecords, CACHE_VERSION};
