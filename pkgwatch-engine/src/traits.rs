//! The call surface the slave consumes.

use std::path::{Path, PathBuf};

use crate::types::{FetchOutcome, FetchProgress, PackageState};

/// Observer for cache (re)open progress.
pub trait OpProgress {
    /// A labelled progress tick. `major_change` marks a new phase of
    /// the operation.
    fn update(&mut self, op: &str, percent: f32, major_change: bool);
    /// The operation finished (successfully or not).
    fn done(&mut self);
}

/// Observer for a fetch batch. Cancellation is *polled*: the engine
/// asks on every progress tick, which is the only granularity at
/// which an in-flight fetch can stop.
pub trait FetchObserver {
    fn tick(&mut self, progress: &FetchProgress);
    fn cancelled(&mut self) -> bool;
    /// The batch stopped; no more ticks will follow.
    fn done(&mut self);
}

/// The package-cache engine.
///
/// Error model: operations return a success flag (or an outcome) and
/// push human-readable details onto an internal queue, which the
/// caller drains with [`CacheEngine::pending_errors`] and aggregates
/// into a single fatal reply. This mirrors the error stack of the
/// engine the slave was built against.
pub trait CacheEngine: Send + 'static {
    /// Open (or reopen — callers `close` first) a cache snapshot from
    /// the on-disk lists.
    fn open(&mut self, progress: &mut dyn OpProgress) -> bool;
    fn close(&mut self);

    /// Snapshot of every package the cache knows about.
    fn packages(&self) -> Vec<PackageState>;

    /// Read the configured package sources.
    fn read_sources(&mut self) -> bool;

    /// Take the advisory lock on the list directory. Also guards
    /// against concurrent runs of the external package tooling.
    fn lock_lists(&mut self) -> bool;
    fn unlock_lists(&mut self);

    /// Fetch every index file for the configured sources.
    fn fetch_indexes(&mut self, observer: &mut dyn FetchObserver) -> FetchOutcome;

    /// Remove cached index files no longer referenced by any source
    /// (the list directory and its `partial/`).
    fn clean_indexes(&mut self) -> bool;

    /// Delete cached archives for packages the cache no longer
    /// references.
    fn clean_archives(&mut self) -> bool;

    /// Mark a package for installation, optionally pulling in its
    /// dependencies (the engine's own resolution contract).
    fn mark_install(&mut self, name: &str, with_deps: bool);

    /// Names currently marked for installation.
    fn marked_packages(&self) -> Vec<String>;

    /// Whether the candidate archive for `name` already sits in `dir`,
    /// by the engine's own archive-naming convention.
    fn archive_file_present(&self, name: &str, dir: &Path) -> bool;

    /// Fetch candidate archives for the named packages.
    fn fetch_archives(&mut self, names: &[String], observer: &mut dyn FetchObserver)
        -> FetchOutcome;

    fn list_dir(&self) -> PathBuf;
    fn set_list_dir(&mut self, dir: &Path);
    fn archive_dir(&self) -> PathBuf;
    fn set_archive_dir(&mut self, dir: &Path);
    /// Directory holding the tooling configuration (watched for
    /// source-list edits).
    fn config_dir(&self) -> PathBuf;
    /// The installed-package status file (watched for install/remove
    /// activity).
    fn status_file(&self) -> PathBuf;

    /// Drain the queued error messages, oldest first.
    fn pending_errors(&mut self) -> Vec<String>;
    fn has_errors(&self) -> bool;
}
