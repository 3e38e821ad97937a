//! Data crossing the engine boundary.

/// One enumerated package, as the engine sees it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PackageState {
    pub name: String,
    /// Currently installed version, if any.
    pub installed: Option<String>,
    /// Version the engine would install on upgrade.
    pub candidate: Option<String>,
    /// Whether the engine considers the candidate an upgrade.
    pub upgradable: bool,
    /// Repository sites the candidate version is available from.
    pub origins: Vec<String>,
    /// The engine's file name for the candidate's cached archive.
    pub archive_file: Option<String>,
}

impl PackageState {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            installed: None,
            candidate: None,
            upgradable: false,
            origins: Vec::new(),
            archive_file: None,
        }
    }

    pub fn installed(mut self, version: impl Into<String>) -> Self {
        self.installed = Some(version.into());
        self
    }

    pub fn candidate(mut self, version: impl Into<String>) -> Self {
        self.candidate = Some(version.into());
        self
    }

    pub fn upgradable(mut self) -> Self {
        self.upgradable = true;
        self
    }

    pub fn origin(mut self, site: impl Into<String>) -> Self {
        self.origins.push(site.into());
        self
    }

    pub fn archive_file(mut self, file: impl Into<String>) -> Self {
        self.archive_file = Some(file.into());
        self
    }
}

/// One progress tick of a fetch batch.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FetchProgress {
    pub current_bytes: u64,
    pub total_bytes: u64,
    pub current_items: u64,
    pub total_items: u64,
    /// Current transfer rate; zero when unknown.
    pub bytes_per_sec: u64,
}

/// How a fetch batch ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FetchOutcome {
    Done,
    Failed,
    /// The observer's cancellation poll returned true.
    Cancelled,
}
