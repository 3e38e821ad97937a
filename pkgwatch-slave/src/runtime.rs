use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::Instant;

use pkgwatch_engine::{
    classify_upgrades, CacheEngine, FetchOutcome, UpgradeStatus,
};
use pkgwatch_proto::{aio, wire, Command, ProtoError, Reply, PROTOCOL_VERSION};

use crate::error::{io_err, SlaveError};
use crate::helper::{activate, ActiveHelper, HelperEvent, HelperSpawner};
use crate::paths::{dir_writable, private_archive_dir, private_list_dir, private_root, RELOAD_DELAY};
use crate::progress::{ChannelFetchObserver, ChannelOpProgress, ProgressBand};
use crate::watcher::{watch_cache_paths, CacheWatcher};

/// Session-level knobs. The defaults match a production run; tests
/// shorten the reload delay and point `home` at a scratch directory.
#[derive(Debug, Clone)]
pub struct SlaveOptions {
    pub home: Option<PathBuf>,
    pub security_origin: String,
    pub reload_delay: Duration,
}

impl Default for SlaveOptions {
    fn default() -> Self {
        Self {
            home: dirs::home_dir(),
            security_origin: pkgwatch_engine::config::DEFAULT_SECURITY_ORIGIN.to_string(),
            reload_delay: RELOAD_DELAY,
        }
    }
}

struct SessionCtx<E> {
    engine: Arc<Mutex<E>>,
    sys_list_dir: PathBuf,
    sys_archive_dir: PathBuf,
    security_origin: String,
    home: Option<PathBuf>,
}

type CommandRx = mpsc::UnboundedReceiver<Result<Command, ProtoError>>;

/// Run one slave session over the given streams until the client goes
/// away or a protocol violation forces an exit.
pub async fn run_session<R, W, E, S>(
    mut input: R,
    mut output: W,
    engine: E,
    mut spawner: S,
    options: SlaveOptions,
) -> Result<(), SlaveError>
where
    R: AsyncRead + Send + Unpin + 'static,
    W: AsyncWrite + Unpin,
    E: CacheEngine,
    S: HelperSpawner,
{
    // Version handshake before any other traffic.
    output
        .write_all(&PROTOCOL_VERSION.to_le_bytes())
        .await
        .map_err(|e| io_err("protocol stream", e))?;
    output
        .flush()
        .await
        .map_err(|e| io_err("protocol stream", e))?;
    let peer = aio::read_version(&mut input).await?;
    if let Err(err) = wire::check_peer_version(peer) {
        write_reply(
            &mut output,
            &Reply::FatalError(
                "Can't start the monitor: it speaks too new a version of the protocol.".into(),
            ),
        )
        .await?;
        return Err(err.into());
    }

    // Setuid handling: a setuid-root slave sheds its inherited
    // environment; any other real/effective mismatch is a
    // misconfiguration we refuse to run under.
    let (uid, euid) = real_effective_ids();
    if uid != 0 && euid == 0 {
        sanitize_environment();
    } else if uid != euid {
        write_reply(
            &mut output,
            &Reply::AuthFail(
                "The setuid bit of the slave is set, but not to root; refusing to continue."
                    .into(),
            ),
        )
        .await?;
        return Err(SlaveError::Session(
            "mismatched real and effective user ids".into(),
        ));
    } else {
        // No privilege boundary to cross for this session.
        write_reply(&mut output, &Reply::AuthOk).await?;
        if let Some(home) = &options.home {
            let root = private_root(home);
            if let Err(err) = std::fs::create_dir_all(&root) {
                tracing::warn!(dir = %root.display(), error = %err, "could not create the private directory");
            }
        }
    }

    let sys_list_dir = engine.list_dir();
    let sys_archive_dir = engine.archive_dir();
    let ctx = SessionCtx {
        engine: Arc::new(Mutex::new(engine)),
        sys_list_dir,
        sys_archive_dir,
        security_origin: options.security_origin.clone(),
        home: options.home.clone(),
    };

    // Resolve the list and archive directories, falling back to a
    // per-user mirror when the system ones are not writable.
    if let Err(text) = resolve_cache_dirs(&ctx) {
        write_reply(&mut output, &Reply::InitFailed(text)).await?;
        return Ok(());
    }

    // First cache open; its progress is the client's startup feedback.
    let opened = open_engine(&mut output, &ctx, ProgressBand::FULL).await?;
    if !opened {
        let text = drain_errors(&ctx, "The package cache could not be opened.");
        write_reply(&mut output, &Reply::InitFailed(text)).await?;
        return Ok(());
    }
    let status = classify(&ctx).await?;
    write_reply(&mut output, &init_reply(status)).await?;

    // Watch the cache paths. A watcher failure only disables the
    // automatic reload request.
    let (watch_tx, mut watch_rx) = mpsc::unbounded_channel::<()>();
    let _watcher: Option<CacheWatcher> = {
        match watch_cache_paths(&cache_watch_paths(&ctx), watch_tx.clone()) {
            Ok(watcher) => Some(watcher),
            Err(err) => {
                tracing::warn!(error = %err, "file watching unavailable; reload requests disabled");
                None
            }
        }
    };

    // One reader task per source, fanned into the select loop.
    let (cmd_tx, mut cmd_rx) = mpsc::unbounded_channel();
    tokio::spawn(async move {
        loop {
            match aio::read_command(&mut input).await {
                Ok(Some(cmd)) => {
                    if cmd_tx.send(Ok(cmd)).is_err() {
                        break;
                    }
                }
                Ok(None) => break,
                Err(err) => {
                    let _ = cmd_tx.send(Err(err));
                    break;
                }
            }
        }
    });

    let (helper_tx, mut helper_rx) = mpsc::unbounded_channel::<(u64, HelperEvent)>();
    let mut helper: Option<ActiveHelper> = None;
    let mut helper_gen: u64 = 0;
    let mut pending_reload: Option<Instant> = None;

    loop {
        tokio::select! {
            cmd = cmd_rx.recv() => {
                let Some(cmd) = cmd else { break };
                let cmd = match cmd {
                    Ok(cmd) => cmd,
                    Err(err) => {
                        write_reply(&mut output, &Reply::FatalError(format!("Garbled command: {err}"))).await?;
                        return Err(err.into());
                    }
                };
                tracing::debug!(kind = cmd.kind(), "command received");
                match cmd {
                    Command::Update => {
                        pending_reload = None;
                        do_update(&mut output, &mut cmd_rx, &ctx).await?;
                    }
                    Command::Reload => {
                        pending_reload = None;
                        do_reload(&mut output, &ctx).await?;
                    }
                    Command::StartSession { in_terminal, command } => {
                        if helper.is_some() {
                            tracing::debug!("helper session already active; start request ignored");
                        } else {
                            match spawner.spawn(in_terminal, &command) {
                                Ok(link) => {
                                    helper_gen += 1;
                                    helper = Some(activate(link, helper_gen, helper_tx.clone()));
                                }
                                Err(err) => {
                                    write_reply(
                                        &mut output,
                                        &Reply::AuthFail(format!(
                                            "Could not run the authentication helper: {err}"
                                        )),
                                    )
                                    .await?;
                                }
                            }
                        }
                    }
                    Command::AuthReply(answer) => {
                        match helper.as_mut() {
                            Some(active) => {
                                if let Err(err) = active.send_credential(&answer).await {
                                    tracing::warn!(error = %err, "could not forward the credential reply");
                                }
                            }
                            None => tracing::debug!("credential reply with no helper session; dropped"),
                        }
                    }
                    Command::AuthCancel => {
                        if let Some(active) = helper.take() {
                            active.shutdown();
                        }
                    }
                    Command::Download { all_upgrades } => {
                        do_download(&mut output, &mut cmd_rx, &ctx, all_upgrades).await?;
                    }
                    Command::AbortDownload => {
                        tracing::debug!("abort with no download in flight; ignored");
                    }
                }
            }

            event = watch_rx.recv() => {
                if event.is_some() {
                    pending_reload = Some(Instant::now() + options.reload_delay);
                }
            }

            event = helper_rx.recv() => {
                let Some((gen, event)) = event else { continue };
                if helper.as_ref().map(|h| h.gen) != Some(gen) {
                    continue; // stale event from a torn-down helper
                }
                match event {
                    HelperEvent::Reply(reply) => {
                        let finished = reply == Reply::AuthFinished;
                        write_reply(&mut output, &reply).await?;
                        if finished {
                            if let Some(active) = helper.take() {
                                active.shutdown();
                            }
                        }
                    }
                    HelperEvent::Garbled(err) => {
                        write_reply(
                            &mut output,
                            &Reply::AuthFail(format!(
                                "Garbled reply from the authentication helper: {err}"
                            )),
                        )
                        .await?;
                        if let Some(active) = helper.take() {
                            active.shutdown();
                        }
                    }
                    HelperEvent::Eof => {
                        if let Some(active) = helper.take() {
                            active.shutdown();
                        }
                    }
                }
            }

            _ = sleep_until_opt(pending_reload) => {
                write_reply(&mut output, &Reply::RequestReload).await?;
                pending_reload = None;
            }
        }
    }

    if let Some(active) = helper.take() {
        active.shutdown();
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Command handlers
// ---------------------------------------------------------------------------

/// Fetch fresh indexes, rebuild the cache, clean up, classify.
async fn do_update<W, E>(
    out: &mut W,
    cmd_rx: &mut CommandRx,
    ctx: &SessionCtx<E>,
) -> Result<(), SlaveError>
where
    W: AsyncWrite + Unpin,
    E: CacheEngine,
{
    if let Err(text) = resolve_cache_dirs(ctx) {
        return write_reply(out, &Reply::FatalError(text)).await;
    }
    refresh_private_lists(ctx).await?;

    let prepared = {
        let engine = ctx.engine.clone();
        tokio::task::spawn_blocking(move || {
            let mut eng = lock_engine(&engine);
            eng.read_sources() && eng.lock_lists()
        })
        .await
        .map_err(join_failure)?
    };
    if !prepared {
        unlock_lists(ctx).await?;
        let text = drain_errors(ctx, "Couldn't prepare the package lists.");
        return write_reply(out, &Reply::FatalError(text)).await;
    }

    // Fetch runs in the lower half of the progress bar; the rebuild
    // takes the upper half.
    let abort = Arc::new(AtomicBool::new(false));
    let (tx, rx) = mpsc::unbounded_channel();
    let handle = {
        let engine = ctx.engine.clone();
        let abort = abort.clone();
        tokio::task::spawn_blocking(move || {
            let mut observer = ChannelFetchObserver::new(tx, abort, ProgressBand::FETCH, false);
            lock_engine(&engine).fetch_indexes(&mut observer)
        })
    };
    let outcome = forward_fetch(out, cmd_rx, handle, rx, &abort).await?;
    if outcome == FetchOutcome::Failed {
        unlock_lists(ctx).await?;
        let text = drain_errors(ctx, "Couldn't download the package index files.");
        return write_reply(out, &Reply::FatalError(text)).await;
    }

    // A failed rebuild aborts here; stale indexes are left for the
    // next successful update to clean.
    let opened = reopen_engine(out, ctx).await?;
    if !opened {
        unlock_lists(ctx).await?;
        let text = drain_errors(ctx, "The package cache could not be rebuilt.");
        return write_reply(out, &Reply::FatalError(text)).await;
    }

    {
        let engine = ctx.engine.clone();
        tokio::task::spawn_blocking(move || {
            let mut eng = lock_engine(&engine);
            eng.clean_indexes();
            if eng.archive_dir() != eng.list_dir() {
                eng.clean_archives();
            }
            eng.unlock_lists();
        })
        .await
        .map_err(join_failure)?;
    }

    let status = classify(ctx).await?;
    write_reply(out, &complete_reply(status)).await
}

/// Rebuild the cache from on-disk state without fetching.
async fn do_reload<W, E>(out: &mut W, ctx: &SessionCtx<E>) -> Result<(), SlaveError>
where
    W: AsyncWrite + Unpin,
    E: CacheEngine,
{
    if let Err(text) = resolve_cache_dirs(ctx) {
        return write_reply(out, &Reply::FatalError(text)).await;
    }
    refresh_private_lists(ctx).await?;

    let opened = reopen_engine(out, ctx).await?;
    if !opened {
        let text = drain_errors(ctx, "The package cache could not be rebuilt.");
        return write_reply(out, &Reply::FatalError(text)).await;
    }

    let status = classify(ctx).await?;
    write_reply(out, &complete_reply(status)).await
}

/// Fetch the candidate archives of upgradable packages.
/// `DownloadComplete` goes out even when some fetches failed.
async fn do_download<W, E>(
    out: &mut W,
    cmd_rx: &mut CommandRx,
    ctx: &SessionCtx<E>,
    all_upgrades: bool,
) -> Result<(), SlaveError>
where
    W: AsyncWrite + Unpin,
    E: CacheEngine,
{
    if let Err(text) = resolve_cache_dirs(ctx) {
        write_reply(out, &Reply::FatalError(text)).await?;
        return write_reply(out, &Reply::DownloadComplete).await;
    }
    let locked = {
        let engine = ctx.engine.clone();
        tokio::task::spawn_blocking(move || lock_engine(&engine).lock_lists())
            .await
            .map_err(join_failure)?
    };
    if !locked {
        let text = drain_errors(ctx, "Couldn't lock the list directory.");
        write_reply(out, &Reply::FatalError(text)).await?;
        return write_reply(out, &Reply::DownloadComplete).await;
    }

    // Mark matching upgrades and keep only the archives we don't
    // already have in the system cache.
    let names: Vec<String> = {
        let engine = ctx.engine.clone();
        let origin = ctx.security_origin.clone();
        let sys_archive_dir = ctx.sys_archive_dir.clone();
        tokio::task::spawn_blocking(move || {
            let mut eng = lock_engine(&engine);
            let wanted: Vec<String> = eng
                .packages()
                .iter()
                .filter(|pkg| pkg.installed.is_some() && pkg.upgradable)
                .filter(|pkg| all_upgrades || pkg.origins.iter().any(|o| o == &origin))
                .map(|pkg| pkg.name.clone())
                .collect();
            // First without dependencies, then again pulling them in.
            for name in &wanted {
                eng.mark_install(name, false);
            }
            for name in &wanted {
                eng.mark_install(name, true);
            }
            eng.marked_packages()
                .into_iter()
                .filter(|name| !eng.archive_file_present(name, &sys_archive_dir))
                .collect()
        })
        .await
        .map_err(join_failure)?
    };

    let mut failed = false;
    if names.is_empty() {
        write_reply(out, &Reply::ProgressDone).await?;
    } else {
        let abort = Arc::new(AtomicBool::new(false));
        let (tx, rx) = mpsc::unbounded_channel();
        let handle = {
            let engine = ctx.engine.clone();
            let abort = abort.clone();
            tokio::task::spawn_blocking(move || {
                let mut observer =
                    ChannelFetchObserver::new(tx, abort, ProgressBand::FULL, true);
                lock_engine(&engine).fetch_archives(&names, &mut observer)
            })
        };
        failed = forward_fetch(out, cmd_rx, handle, rx, &abort).await? == FetchOutcome::Failed;
    }

    unlock_lists(ctx).await?;

    if failed {
        let text = drain_errors(ctx, "Some archives could not be downloaded.");
        write_reply(out, &Reply::FatalError(text)).await?;
    }
    write_reply(out, &Reply::DownloadComplete).await
}

// ---------------------------------------------------------------------------
// Engine plumbing
// ---------------------------------------------------------------------------

/// Forward progress frames while a blocking fetch runs, polling the
/// command channel for an abort. Any other command mid-fetch is a
/// protocol violation that ends the session.
async fn forward_fetch<W: AsyncWrite + Unpin>(
    out: &mut W,
    cmd_rx: &mut CommandRx,
    mut handle: JoinHandle<FetchOutcome>,
    mut rx: mpsc::UnboundedReceiver<Reply>,
    abort: &AtomicBool,
) -> Result<FetchOutcome, SlaveError> {
    let mut client_gone = false;
    loop {
        tokio::select! {
            res = &mut handle => {
                let outcome = res.map_err(join_failure)?;
                while let Ok(reply) = rx.try_recv() {
                    write_reply(out, &reply).await?;
                }
                return Ok(outcome);
            }
            maybe = rx.recv() => {
                if let Some(reply) = maybe {
                    write_reply(out, &reply).await?;
                }
            }
            cmd = cmd_rx.recv(), if !client_gone => {
                match cmd {
                    Some(Ok(Command::AbortDownload)) => abort.store(true, Ordering::SeqCst),
                    Some(Ok(other)) => {
                        write_reply(
                            out,
                            &Reply::FatalError(format!(
                                "Unexpected command {} during a download.",
                                other.kind()
                            )),
                        )
                        .await?;
                        return Err(SlaveError::Session(
                            "command pipelined during a download".into(),
                        ));
                    }
                    Some(Err(err)) => {
                        write_reply(out, &Reply::FatalError(format!("Garbled command: {err}")))
                            .await?;
                        return Err(err.into());
                    }
                    // Client went away; cancel once and let the task
                    // wind down without re-polling the closed channel.
                    None => {
                        abort.store(true, Ordering::SeqCst);
                        client_gone = true;
                    }
                }
            }
        }
    }
}

/// Forward progress frames while a blocking engine call runs.
async fn forward_until_done<W: AsyncWrite + Unpin, T>(
    out: &mut W,
    mut handle: JoinHandle<T>,
    mut rx: mpsc::UnboundedReceiver<Reply>,
) -> Result<T, SlaveError> {
    loop {
        tokio::select! {
            res = &mut handle => {
                let value = res.map_err(join_failure)?;
                while let Ok(reply) = rx.try_recv() {
                    write_reply(out, &reply).await?;
                }
                return Ok(value);
            }
            maybe = rx.recv() => {
                if let Some(reply) = maybe {
                    write_reply(out, &reply).await?;
                }
            }
        }
    }
}

async fn open_engine<W, E>(
    out: &mut W,
    ctx: &SessionCtx<E>,
    band: ProgressBand,
) -> Result<bool, SlaveError>
where
    W: AsyncWrite + Unpin,
    E: CacheEngine,
{
    let (tx, rx) = mpsc::unbounded_channel();
    let handle = {
        let engine = ctx.engine.clone();
        tokio::task::spawn_blocking(move || {
            let mut progress = ChannelOpProgress::new(tx, band, true);
            lock_engine(&engine).open(&mut progress)
        })
    };
    forward_until_done(out, handle, rx).await
}

/// Close and open again, mapped onto the upper half of the bar.
async fn reopen_engine<W, E>(out: &mut W, ctx: &SessionCtx<E>) -> Result<bool, SlaveError>
where
    W: AsyncWrite + Unpin,
    E: CacheEngine,
{
    let (tx, rx) = mpsc::unbounded_channel();
    let handle = {
        let engine = ctx.engine.clone();
        tokio::task::spawn_blocking(move || {
            let mut progress = ChannelOpProgress::new(tx, ProgressBand::REOPEN, true);
            let mut eng = lock_engine(&engine);
            eng.close();
            eng.open(&mut progress)
        })
    };
    forward_until_done(out, handle, rx).await
}

/// Refresh a private list mirror from the system copy before using it.
async fn refresh_private_lists<E: CacheEngine>(ctx: &SessionCtx<E>) -> Result<(), SlaveError> {
    let list_dir = lock_engine(&ctx.engine).list_dir();
    if list_dir == ctx.sys_list_dir {
        return Ok(());
    }
    let src = ctx.sys_list_dir.clone();
    let copied = tokio::task::spawn_blocking(move || {
        pkgwatch_fileutil::copy_newer_recursive(&src, &list_dir)
    })
    .await
    .map_err(join_failure)?;
    if let Err(err) = copied {
        tracing::warn!(error = %err, "could not refresh the private list mirror");
    }
    Ok(())
}

async fn unlock_lists<E: CacheEngine>(ctx: &SessionCtx<E>) -> Result<(), SlaveError> {
    let engine = ctx.engine.clone();
    tokio::task::spawn_blocking(move || lock_engine(&engine).unlock_lists())
        .await
        .map_err(join_failure)
}

async fn classify<E: CacheEngine>(ctx: &SessionCtx<E>) -> Result<UpgradeStatus, SlaveError> {
    let engine = ctx.engine.clone();
    let origin = ctx.security_origin.clone();
    tokio::task::spawn_blocking(move || {
        let eng = lock_engine(&engine);
        classify_upgrades(&eng.packages(), &origin)
    })
    .await
    .map_err(join_failure)
}

/// Drain the engine's error queue into one multi-line report.
fn drain_errors<E: CacheEngine>(ctx: &SessionCtx<E>, context: &str) -> String {
    let errors = lock_engine(&ctx.engine).pending_errors();
    if errors.is_empty() {
        context.to_string()
    } else {
        format!("{context}\n{}", errors.join("\n"))
    }
}

fn lock_engine<E>(engine: &Mutex<E>) -> MutexGuard<'_, E> {
    engine.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

fn join_failure(err: tokio::task::JoinError) -> SlaveError {
    SlaveError::Session(format!("engine task join failure: {err}"))
}

// ---------------------------------------------------------------------------
// Small helpers
// ---------------------------------------------------------------------------

async fn write_reply<W: AsyncWrite + Unpin>(out: &mut W, reply: &Reply) -> Result<(), SlaveError> {
    out.write_all(&reply.encode())
        .await
        .map_err(|e| io_err("protocol stream", e))?;
    out.flush()
        .await
        .map_err(|e| io_err("protocol stream", e))
}

async fn sleep_until_opt(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}

fn init_reply(status: UpgradeStatus) -> Reply {
    match status {
        UpgradeStatus::NoUpgrades => Reply::InitOkNoUpgrades,
        UpgradeStatus::UpgradesPresent => Reply::InitOkUpgrades,
        UpgradeStatus::SecurityUpgradesPresent => Reply::InitOkSecurityUpgrades,
    }
}

fn complete_reply(status: UpgradeStatus) -> Reply {
    match status {
        UpgradeStatus::NoUpgrades => Reply::CompleteNoUpgrades,
        UpgradeStatus::UpgradesPresent => Reply::CompleteUpgrades,
        UpgradeStatus::SecurityUpgradesPresent => Reply::CompleteSecurityUpgrades,
    }
}

/// Re-point the engine at the system list and archive directories, or
/// at the per-user mirrors when those are not writable. Run before
/// every command that touches the cache; directory permissions can
/// change between commands.
fn resolve_cache_dirs<E: CacheEngine>(ctx: &SessionCtx<E>) -> Result<(), String> {
    let mut eng = lock_engine(&ctx.engine);
    if dir_writable(&ctx.sys_list_dir) {
        eng.set_list_dir(&ctx.sys_list_dir);
    } else {
        eng.set_list_dir(&private_dir(ctx.home.as_deref(), private_list_dir)?);
    }
    if dir_writable(&ctx.sys_archive_dir) {
        eng.set_archive_dir(&ctx.sys_archive_dir);
    } else {
        eng.set_archive_dir(&private_dir(ctx.home.as_deref(), private_archive_dir)?);
    }
    Ok(())
}

/// Paths whose changes should eventually prompt a reload. The list
/// watch stays on the system directory even when the engine reads a
/// private mirror; the system copy is where out-of-band apt activity
/// lands.
fn cache_watch_paths<E: CacheEngine>(ctx: &SessionCtx<E>) -> Vec<PathBuf> {
    let eng = lock_engine(&ctx.engine);
    vec![
        ctx.sys_list_dir.join("partial"),
        ctx.sys_list_dir.clone(),
        eng.config_dir(),
        eng.status_file(),
    ]
}

fn private_dir(
    home: Option<&std::path::Path>,
    select: fn(&std::path::Path) -> PathBuf,
) -> Result<PathBuf, String> {
    let Some(home) = home else {
        return Err(
            "The system cache directory is not writable and HOME is not set.".to_string(),
        );
    };
    let dir = select(home);
    std::fs::create_dir_all(dir.join("partial"))
        .map_err(|err| format!("Could not create {}: {err}", dir.display()))?;
    tracing::info!(dir = %dir.display(), "using a private cache directory");
    Ok(dir)
}

#[cfg(unix)]
fn real_effective_ids() -> (u32, u32) {
    unsafe { (libc::getuid(), libc::geteuid()) }
}

#[cfg(not(unix))]
fn real_effective_ids() -> (u32, u32) {
    (0, 0)
}

#[cfg(unix)]
fn sanitize_environment() {
    let keys: Vec<_> = std::env::vars_os().map(|(key, _)| key).collect();
    for key in keys {
        std::env::remove_var(key);
    }
    std::env::set_var("PATH", "/usr/sbin:/usr/bin:/sbin:/bin");
}

#[cfg(not(unix))]
fn sanitize_environment() {}

#[cfg(test)]
mod tests {
    use super::*;

    use std::path::Path;

    use pkgwatch_engine::sim::SimEngine;
    use tempfile::TempDir;

    fn ctx_with(
        engine: SimEngine,
        sys_list_dir: &Path,
        sys_archive_dir: &Path,
        home: Option<PathBuf>,
    ) -> SessionCtx<SimEngine> {
        SessionCtx {
            engine: Arc::new(Mutex::new(engine)),
            sys_list_dir: sys_list_dir.to_path_buf(),
            sys_archive_dir: sys_archive_dir.to_path_buf(),
            security_origin: "security.debian.org".into(),
            home,
        }
    }

    #[test]
    fn watch_paths_stay_on_the_system_list_dir() {
        let home = TempDir::new().expect("home");
        let sys = TempDir::new().expect("sys");
        let private = private_list_dir(home.path());
        let mut engine = SimEngine::new();
        engine.set_list_dir(&private);
        let ctx = ctx_with(
            engine,
            &sys.path().join("lists"),
            &sys.path().join("archives"),
            Some(home.path().to_path_buf()),
        );

        let paths = cache_watch_paths(&ctx);
        assert!(paths.contains(&sys.path().join("lists")));
        assert!(paths.contains(&sys.path().join("lists").join("partial")));
        assert!(
            !paths.iter().any(|p| p.starts_with(&private)),
            "the private mirror sees only the slave's own writes"
        );
    }

    #[test]
    fn commands_repoint_the_engine_at_writable_system_dirs() {
        let sys = TempDir::new().expect("sys");
        let lists = sys.path().join("lists");
        let archives = sys.path().join("archives");
        std::fs::create_dir_all(&lists).expect("lists");
        std::fs::create_dir_all(&archives).expect("archives");

        let engine = SimEngine::new();
        let mut handle = engine.clone();
        handle.set_list_dir(Path::new("/stale/lists"));
        handle.set_archive_dir(Path::new("/stale/archives"));

        let ctx = ctx_with(engine, &lists, &archives, None);
        resolve_cache_dirs(&ctx).expect("resolve");
        assert_eq!(handle.list_dir(), lists);
        assert_eq!(handle.archive_dir(), archives);
    }

    #[test]
    fn unwritable_system_dirs_fall_back_to_the_private_mirror() {
        let home = TempDir::new().expect("home");
        let sys = TempDir::new().expect("sys");
        let engine = SimEngine::new();
        let handle = engine.clone();
        let ctx = ctx_with(
            engine,
            &sys.path().join("missing/lists"),
            &sys.path().join("missing/archives"),
            Some(home.path().to_path_buf()),
        );

        resolve_cache_dirs(&ctx).expect("fallback");
        assert_eq!(handle.list_dir(), private_list_dir(home.path()));
        assert_eq!(handle.archive_dir(), private_archive_dir(home.path()));
        assert!(private_list_dir(home.path()).join("partial").is_dir());
    }

    #[test]
    fn fallback_without_home_is_an_error() {
        let sys = TempDir::new().expect("sys");
        let missing = sys.path().join("missing");
        let ctx = ctx_with(SimEngine::new(), &missing, &missing, None);
        let err = resolve_cache_dirs(&ctx).expect_err("no home to fall back to");
        assert!(err.contains("HOME"), "got: {err}");
    }

    #[tokio::test]
    async fn client_eof_mid_fetch_cancels_the_transfer() {
        let (cmd_tx, mut cmd_rx) = mpsc::unbounded_channel::<Result<Command, ProtoError>>();
        drop(cmd_tx);
        let (_progress_tx, progress_rx) = mpsc::unbounded_channel();

        let abort = Arc::new(AtomicBool::new(false));
        let handle = {
            let abort = abort.clone();
            tokio::task::spawn_blocking(move || {
                while !abort.load(Ordering::SeqCst) {
                    std::thread::sleep(Duration::from_millis(2));
                }
                FetchOutcome::Cancelled
            })
        };

        let mut out = Vec::new();
        let outcome = forward_fetch(&mut out, &mut cmd_rx, handle, progress_rx, &abort)
            .await
            .expect("forward");
        assert_eq!(outcome, FetchOutcome::Cancelled);
        assert!(out.is_empty(), "no frames for a vanished client");
    }

    #[test]
    fn status_maps_onto_distinct_init_and_complete_replies() {
        assert_eq!(init_reply(UpgradeStatus::NoUpgrades), Reply::InitOkNoUpgrades);
        assert_eq!(
            init_reply(UpgradeStatus::SecurityUpgradesPresent),
            Reply::InitOkSecurityUpgrades
        );
        assert_eq!(
            complete_reply(UpgradeStatus::UpgradesPresent),
            Reply::CompleteUpgrades
        );
        assert_eq!(
            complete_reply(UpgradeStatus::NoUpgrades),
            Reply::CompleteNoUpgrades
        );
    }

    #[tokio::test(start_paused = true, flavor = "current_thread")]
    async fn no_deadline_never_fires() {
        let outcome = tokio::time::timeout(
            Duration::from_secs(3600),
            sleep_until_opt(None),
        )
        .await;
        assert!(outcome.is_err(), "without a deadline the arm stays pending");
    }

    #[tokio::test(start_paused = true, flavor = "current_thread")]
    async fn deadline_fires_after_the_quiet_period() {
        let start = Instant::now();
        sleep_until_opt(Some(start + RELOAD_DELAY)).await;
        assert!(start.elapsed() >= RELOAD_DELAY);
    }
}
