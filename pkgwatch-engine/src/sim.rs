//! A scripted in-memory engine.
//!
//! Behaves like the real thing at the trait boundary — progress ticks,
//! the drainable error queue, polled cancellation — but every outcome
//! is chosen up front by the test (or by a `--engine sim` run).
//! Handles are cheap clones sharing one state, so a test can keep one
//! and inspect what the slave did to the other.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use crate::traits::{CacheEngine, FetchObserver, OpProgress};
use crate::types::{FetchOutcome, FetchProgress, PackageState};

#[derive(Debug)]
struct Inner {
    packages: Vec<PackageState>,
    list_dir: PathBuf,
    archive_dir: PathBuf,
    config_dir: PathBuf,
    status_file: PathBuf,

    fail_open: bool,
    fail_sources: bool,
    fail_lock: bool,
    fail_fetch: bool,
    fetch_ticks: u64,
    fetch_total_bytes: u64,

    errors: Vec<String>,
    opened: bool,
    open_count: u32,
    locked: bool,
    marked: Vec<(String, bool)>,
    fetched_archives: Vec<String>,
    present_archives: HashSet<String>,
    clean_index_calls: u32,
    clean_archive_calls: u32,
}

#[derive(Debug, Clone)]
pub struct SimEngine {
    inner: Arc<Mutex<Inner>>,
}

impl Default for SimEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl SimEngine {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Mutex::new(Inner {
                packages: Vec::new(),
                list_dir: PathBuf::from("/var/lib/apt/lists"),
                archive_dir: PathBuf::from("/var/cache/apt/archives"),
                config_dir: PathBuf::from("/etc/apt"),
                status_file: PathBuf::from("/var/lib/dpkg/status"),
                fail_open: false,
                fail_sources: false,
                fail_lock: false,
                fail_fetch: false,
                fetch_ticks: 4,
                fetch_total_bytes: 1 << 20,
                errors: Vec::new(),
                opened: false,
                open_count: 0,
                locked: false,
                marked: Vec::new(),
                fetched_archives: Vec::new(),
                present_archives: HashSet::new(),
                clean_index_calls: 0,
                clean_archive_calls: 0,
            })),
        }
    }

    // -- scripting ---------------------------------------------------------

    pub fn with_packages(self, packages: Vec<PackageState>) -> Self {
        self.inner.lock().unwrap().packages = packages;
        self
    }

    pub fn with_dirs(self, list_dir: &Path, archive_dir: &Path) -> Self {
        {
            let mut inner = self.inner.lock().unwrap();
            inner.list_dir = list_dir.to_path_buf();
            inner.archive_dir = archive_dir.to_path_buf();
        }
        self
    }

    pub fn with_config_dir(self, dir: &Path) -> Self {
        self.inner.lock().unwrap().config_dir = dir.to_path_buf();
        self
    }

    pub fn with_status_file(self, file: &Path) -> Self {
        self.inner.lock().unwrap().status_file = file.to_path_buf();
        self
    }

    pub fn with_fetch_script(self, ticks: u64, total_bytes: u64) -> Self {
        {
            let mut inner = self.inner.lock().unwrap();
            inner.fetch_ticks = ticks;
            inner.fetch_total_bytes = total_bytes;
        }
        self
    }

    pub fn failing_open(self) -> Self {
        self.inner.lock().unwrap().fail_open = true;
        self
    }

    pub fn failing_sources(self) -> Self {
        self.inner.lock().unwrap().fail_sources = true;
        self
    }

    pub fn failing_lock(self) -> Self {
        self.inner.lock().unwrap().fail_lock = true;
        self
    }

    pub fn failing_fetch(self) -> Self {
        self.inner.lock().unwrap().fail_fetch = true;
        self
    }

    /// Pretend `name`'s candidate archive is already cached everywhere.
    pub fn archive_already_present(self, name: &str) -> Self {
        self.inner.lock().unwrap().present_archives.insert(name.to_string());
        self
    }

    pub fn push_error(&self, msg: impl Into<String>) {
        self.inner.lock().unwrap().errors.push(msg.into());
    }

    // -- inspection --------------------------------------------------------

    pub fn open_count(&self) -> u32 {
        self.inner.lock().unwrap().open_count
    }

    pub fn is_open(&self) -> bool {
        self.inner.lock().unwrap().opened
    }

    pub fn is_locked(&self) -> bool {
        self.inner.lock().unwrap().locked
    }

    pub fn marked(&self) -> Vec<(String, bool)> {
        self.inner.lock().unwrap().marked.clone()
    }

    pub fn fetched_archives(&self) -> Vec<String> {
        self.inner.lock().unwrap().fetched_archives.clone()
    }

    pub fn clean_index_calls(&self) -> u32 {
        self.inner.lock().unwrap().clean_index_calls
    }

    pub fn clean_archive_calls(&self) -> u32 {
        self.inner.lock().unwrap().clean_archive_calls
    }

    fn run_fetch(&self, observer: &mut dyn FetchObserver, items: u64) -> FetchOutcome {
        let (ticks, total_bytes, fail) = {
            let inner = self.inner.lock().unwrap();
            (inner.fetch_ticks, inner.fetch_total_bytes, inner.fail_fetch)
        };

        for tick in 0..ticks {
            if observer.cancelled() {
                observer.done();
                return FetchOutcome::Cancelled;
            }
            observer.tick(&FetchProgress {
                current_bytes: total_bytes * tick / ticks.max(1),
                total_bytes,
                current_items: items * tick / ticks.max(1),
                total_items: items,
                bytes_per_sec: 64 * 1024,
            });
        }
        observer.done();

        if fail {
            self.inner
                .lock()
                .unwrap()
                .errors
                .push("Failed to fetch: connection timed out".to_string());
            FetchOutcome::Failed
        } else {
            FetchOutcome::Done
        }
    }
}

impl CacheEngine for SimEngine {
    fn open(&mut self, progress: &mut dyn OpProgress) -> bool {
        let fail = self.inner.lock().unwrap().fail_open;
        progress.update("Reading package lists", 50.0, true);
        if fail {
            self.push_error("The package lists or status file could not be parsed or opened.");
            progress.done();
            return false;
        }
        progress.update("Building dependency tree", 100.0, true);
        progress.done();

        let mut inner = self.inner.lock().unwrap();
        inner.opened = true;
        inner.open_count += 1;
        true
    }

    fn close(&mut self) {
        self.inner.lock().unwrap().opened = false;
    }

    fn packages(&self) -> Vec<PackageState> {
        self.inner.lock().unwrap().packages.clone()
    }

    fn read_sources(&mut self) -> bool {
        if self.inner.lock().unwrap().fail_sources {
            self.push_error("The list of sources could not be read.");
            return false;
        }
        true
    }

    fn lock_lists(&mut self) -> bool {
        let fail = self.inner.lock().unwrap().fail_lock;
        if fail {
            self.push_error("Unable to lock the list directory");
            return false;
        }
        self.inner.lock().unwrap().locked = true;
        true
    }

    fn unlock_lists(&mut self) {
        self.inner.lock().unwrap().locked = false;
    }

    fn fetch_indexes(&mut self, observer: &mut dyn FetchObserver) -> FetchOutcome {
        let items = self.inner.lock().unwrap().packages.len().max(1) as u64;
        self.run_fetch(observer, items)
    }

    fn clean_indexes(&mut self) -> bool {
        self.inner.lock().unwrap().clean_index_calls += 1;
        true
    }

    fn clean_archives(&mut self) -> bool {
        self.inner.lock().unwrap().clean_archive_calls += 1;
        true
    }

    fn mark_install(&mut self, name: &str, with_deps: bool) {
        let mut inner = self.inner.lock().unwrap();
        if inner.packages.iter().any(|p| p.name == name) {
            inner.marked.push((name.to_string(), with_deps));
        }
    }

    fn marked_packages(&self) -> Vec<String> {
        let inner = self.inner.lock().unwrap();
        let mut names = Vec::new();
        for (name, _) in &inner.marked {
            if !names.contains(name) {
                names.push(name.clone());
            }
        }
        names
    }

    fn archive_file_present(&self, name: &str, dir: &Path) -> bool {
        let inner = self.inner.lock().unwrap();
        if inner.present_archives.contains(name) {
            return true;
        }
        let Some(pkg) = inner.packages.iter().find(|p| p.name == name) else {
            return false;
        };
        if pkg.candidate.is_none() {
            // No candidate means nothing to download.
            return true;
        }
        match &pkg.archive_file {
            Some(file) => dir.join(file).exists(),
            None => false,
        }
    }

    fn fetch_archives(
        &mut self,
        names: &[String],
        observer: &mut dyn FetchObserver,
    ) -> FetchOutcome {
        let outcome = self.run_fetch(observer, names.len() as u64);
        if outcome == FetchOutcome::Done {
            let mut inner = self.inner.lock().unwrap();
            inner.fetched_archives.extend(names.iter().cloned());
        }
        outcome
    }

    fn list_dir(&self) -> PathBuf {
        self.inner.lock().unwrap().list_dir.clone()
    }

    fn set_list_dir(&mut self, dir: &Path) {
        self.inner.lock().unwrap().list_dir = dir.to_path_buf();
    }

    fn archive_dir(&self) -> PathBuf {
        self.inner.lock().unwrap().archive_dir.clone()
    }

    fn set_archive_dir(&mut self, dir: &Path) {
        self.inner.lock().unwrap().archive_dir = dir.to_path_buf();
    }

    fn config_dir(&self) -> PathBuf {
        self.inner.lock().unwrap().config_dir.clone()
    }

    fn status_file(&self) -> PathBuf {
        self.inner.lock().unwrap().status_file.clone()
    }

    fn pending_errors(&mut self) -> Vec<String> {
        std::mem::take(&mut self.inner.lock().unwrap().errors)
    }

    fn has_errors(&self) -> bool {
        !self.inner.lock().unwrap().errors.is_empty()
    }
}
