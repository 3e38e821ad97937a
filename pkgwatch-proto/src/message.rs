//! Message kinds and payloads.
//!
//! The numbering is part of the on-wire contract: commands occupy
//! 0–6, string-carrying auth/progress replies 64–69, and the
//! remaining replies 128–140.

/// Protocol version exchanged before any other traffic.
pub const PROTOCOL_VERSION: u32 = 1;

/// Ceiling for any length-prefixed string on the wire. Enforced in the
/// decoder, uniformly, so no call site can forget it. Generous enough
/// for a multi-line engine error dump.
pub const MAX_STRING_LEN: usize = 64 * 1024;

/// Tighter ceiling for credential replies on the helper channel.
/// Anything larger than this is a protocol violation, not a password.
pub const MAX_CREDENTIAL_LEN: usize = 1000;

// ---------------------------------------------------------------------------
// Kind bytes
// ---------------------------------------------------------------------------

pub mod kind {
    pub const CMD_UPDATE: u8 = 0;
    pub const CMD_RELOAD: u8 = 1;
    pub const CMD_START_SESSION: u8 = 2;
    pub const CMD_AUTH_REPLY: u8 = 3;
    pub const CMD_AUTH_CANCEL: u8 = 4;
    pub const CMD_DOWNLOAD: u8 = 5;
    pub const CMD_ABORT_DOWNLOAD: u8 = 6;

    pub const REPLY_AUTH_PROMPT_NOECHO: u8 = 64;
    pub const REPLY_AUTH_PROMPT_ECHO: u8 = 65;
    pub const REPLY_AUTH_ERRORMSG: u8 = 66;
    pub const REPLY_AUTH_INFO: u8 = 67;
    pub const REPLY_PROGRESS_UPDATE: u8 = 68;
    pub const REPLY_PROGRESS_DONE: u8 = 69;

    pub const REPLY_AUTH_FAIL: u8 = 128;
    pub const REPLY_AUTH_OK: u8 = 129;
    pub const REPLY_INIT_OK_NO_UPGRADES: u8 = 130;
    pub const REPLY_INIT_OK_UPGRADES: u8 = 131;
    pub const REPLY_INIT_OK_SECURITY_UPGRADES: u8 = 132;
    pub const REPLY_INIT_FAILED: u8 = 133;
    pub const REPLY_COMPLETE_NO_UPGRADES: u8 = 134;
    pub const REPLY_COMPLETE_UPGRADES: u8 = 135;
    pub const REPLY_COMPLETE_SECURITY_UPGRADES: u8 = 136;
    pub const REPLY_FATAL_ERROR: u8 = 137;
    pub const REPLY_REQUEST_RELOAD: u8 = 138;
    pub const REPLY_DOWNLOAD_COMPLETE: u8 = 139;
    pub const REPLY_AUTH_FINISHED: u8 = 140;
}

// ---------------------------------------------------------------------------
// Commands (client → slave)
// ---------------------------------------------------------------------------

/// A command sent by the client to the slave.
#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    /// Fetch fresh package indices and reopen the cache.
    Update,
    /// Reopen the cache from on-disk state without fetching.
    Reload,
    /// Start a privileged session: fork the auth helper for `command`.
    StartSession { in_terminal: bool, command: String },
    /// One credential answer, relayed verbatim to the helper.
    AuthReply(String),
    /// Tear down any live helper link.
    AuthCancel,
    /// Fetch candidate archives; `all_upgrades` false means
    /// security-origin upgrades only.
    Download { all_upgrades: bool },
    /// Cooperative cancellation of an in-flight fetch. Only valid
    /// while an update or download is running.
    AbortDownload,
}

impl Command {
    pub fn kind(&self) -> u8 {
        match self {
            Command::Update => kind::CMD_UPDATE,
            Command::Reload => kind::CMD_RELOAD,
            Command::StartSession { .. } => kind::CMD_START_SESSION,
            Command::AuthReply(_) => kind::CMD_AUTH_REPLY,
            Command::AuthCancel => kind::CMD_AUTH_CANCEL,
            Command::Download { .. } => kind::CMD_DOWNLOAD,
            Command::AbortDownload => kind::CMD_ABORT_DOWNLOAD,
        }
    }
}

// ---------------------------------------------------------------------------
// Replies (slave → client, helper → slave subset)
// ---------------------------------------------------------------------------

/// A reply sent by the slave to the client. The auth helper emits the
/// `Auth*` subset on its own stdout; the slave relays them unchanged.
#[derive(Debug, Clone, PartialEq)]
pub enum Reply {
    /// Credential prompt whose answer must not be echoed.
    AuthPromptNoEcho(String),
    /// Credential prompt whose answer may be echoed.
    AuthPromptEcho(String),
    /// Error text from the credential authority; no answer expected.
    AuthError(String),
    /// Informational text from the credential authority.
    AuthInfo(String),
    /// Progress tick for a fetch or cache-open phase.
    ProgressUpdate {
        op: String,
        percent: f32,
        major_change: bool,
    },
    /// The progress-reporting phase finished.
    ProgressDone,
    /// The credential exchange (or helper session) failed.
    AuthFail(String),
    /// The credential exchange succeeded.
    AuthOk,
    InitOkNoUpgrades,
    InitOkUpgrades,
    InitOkSecurityUpgrades,
    /// Startup failed; payload aggregates the engine's errors.
    InitFailed(String),
    CompleteNoUpgrades,
    CompleteUpgrades,
    CompleteSecurityUpgrades,
    /// The current command failed; the slave survives.
    FatalError(String),
    /// The debounce window elapsed: the client should issue a reload
    /// if one is appropriate.
    RequestReload,
    /// The download batch finished (errors, if any, were already
    /// reported via `FatalError`).
    DownloadComplete,
    /// The helper's privileged command has run; the session is over.
    AuthFinished,
}

impl Reply {
    pub fn kind(&self) -> u8 {
        match self {
            Reply::AuthPromptNoEcho(_) => kind::REPLY_AUTH_PROMPT_NOECHO,
            Reply::AuthPromptEcho(_) => kind::REPLY_AUTH_PROMPT_ECHO,
            Reply::AuthError(_) => kind::REPLY_AUTH_ERRORMSG,
            Reply::AuthInfo(_) => kind::REPLY_AUTH_INFO,
            Reply::ProgressUpdate { .. } => kind::REPLY_PROGRESS_UPDATE,
            Reply::ProgressDone => kind::REPLY_PROGRESS_DONE,
            Reply::AuthFail(_) => kind::REPLY_AUTH_FAIL,
            Reply::AuthOk => kind::REPLY_AUTH_OK,
            Reply::InitOkNoUpgrades => kind::REPLY_INIT_OK_NO_UPGRADES,
            Reply::InitOkUpgrades => kind::REPLY_INIT_OK_UPGRADES,
            Reply::InitOkSecurityUpgrades => kind::REPLY_INIT_OK_SECURITY_UPGRADES,
            Reply::InitFailed(_) => kind::REPLY_INIT_FAILED,
            Reply::CompleteNoUpgrades => kind::REPLY_COMPLETE_NO_UPGRADES,
            Reply::CompleteUpgrades => kind::REPLY_COMPLETE_UPGRADES,
            Reply::CompleteSecurityUpgrades => kind::REPLY_COMPLETE_SECURITY_UPGRADES,
            Reply::FatalError(_) => kind::REPLY_FATAL_ERROR,
            Reply::RequestReload => kind::REPLY_REQUEST_RELOAD,
            Reply::DownloadComplete => kind::REPLY_DOWNLOAD_COMPLETE,
            Reply::AuthFinished => kind::REPLY_AUTH_FINISHED,
        }
    }
}
