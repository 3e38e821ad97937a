//! End-to-end session tests over in-memory duplex pipes: a scripted
//! engine below, a scripted helper beside, and a hand-rolled client
//! above.

use std::future::Future;
use std::path::PathBuf;
use std::pin::Pin;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tempfile::TempDir;
use tokio::io::{AsyncReadExt, AsyncWriteExt, DuplexStream, ReadHalf, WriteHalf};
use tokio::task::JoinHandle;

use pkgwatch_engine::sim::SimEngine;
use pkgwatch_engine::PackageState;
use pkgwatch_proto::{aio, Command, Reply, PROTOCOL_VERSION};
use pkgwatch_slave::{run_session, HelperLink, HelperSpawner, SlaveError, SlaveOptions};

const SECURITY_ORIGIN: &str = "security.debian.org";

// ---------------------------------------------------------------------------
// Harness
// ---------------------------------------------------------------------------

struct Fixture {
    engine: SimEngine,
    list_dir: PathBuf,
    _dirs: TempDir,
    home: TempDir,
}

fn fixture(packages: Vec<PackageState>) -> Fixture {
    let dirs = TempDir::new().expect("cache dirs");
    let home = TempDir::new().expect("home dir");
    let list_dir = dirs.path().join("lists");
    let archive_dir = dirs.path().join("archives");
    let config_dir = dirs.path().join("config");
    for dir in [&list_dir.join("partial"), &archive_dir, &config_dir] {
        std::fs::create_dir_all(dir).expect("create dir");
    }
    let engine = SimEngine::new()
        .with_packages(packages)
        .with_dirs(&list_dir, &archive_dir)
        .with_config_dir(&config_dir);
    Fixture {
        engine,
        list_dir,
        _dirs: dirs,
        home,
    }
}

struct TestClient {
    reader: ReadHalf<DuplexStream>,
    writer: WriteHalf<DuplexStream>,
    session: JoinHandle<Result<(), SlaveError>>,
}

impl TestClient {
    async fn send(&mut self, cmd: Command) {
        self.writer
            .write_all(&cmd.encode())
            .await
            .expect("send command");
    }

    async fn recv(&mut self) -> Reply {
        aio::read_reply(&mut self.reader)
            .await
            .expect("decode reply")
            .expect("reply stream open")
    }

    async fn recv_skipping_progress(&mut self) -> Reply {
        loop {
            match self.recv().await {
                Reply::ProgressUpdate { .. } | Reply::ProgressDone => continue,
                other => return other,
            }
        }
    }

    /// Reload is processed strictly after everything sent before it,
    /// so its completion orders assertions against fire-and-forget
    /// commands.
    async fn barrier(&mut self) {
        self.send(Command::Reload).await;
        loop {
            match self.recv_skipping_progress().await {
                Reply::CompleteNoUpgrades
                | Reply::CompleteUpgrades
                | Reply::CompleteSecurityUpgrades => break,
                other => panic!("unexpected reply while waiting for a reload: {other:?}"),
            }
        }
    }
}

async fn connect<S: HelperSpawner>(
    fixture: &Fixture,
    spawner: S,
    reload_delay: Duration,
) -> TestClient {
    let (client, server) = tokio::io::duplex(64 * 1024);
    let (server_read, server_write) = tokio::io::split(server);
    let options = SlaveOptions {
        home: Some(fixture.home.path().to_path_buf()),
        security_origin: SECURITY_ORIGIN.to_string(),
        reload_delay,
    };
    let session = tokio::spawn(run_session(
        server_read,
        server_write,
        fixture.engine.clone(),
        spawner,
        options,
    ));

    let (mut reader, mut writer) = tokio::io::split(client);
    writer
        .write_all(&PROTOCOL_VERSION.to_le_bytes())
        .await
        .expect("send version");
    let peer = aio::read_version(&mut reader).await.expect("peer version");
    assert_eq!(peer, PROTOCOL_VERSION);

    TestClient {
        reader,
        writer,
        session,
    }
}

/// Consume the fixed startup sequence and return the `InitOk*` /
/// `InitFailed` reply.
async fn expect_startup(client: &mut TestClient) -> Reply {
    assert_eq!(client.recv().await, Reply::AuthOk);
    client.recv_skipping_progress().await
}

fn security_upgrade() -> PackageState {
    PackageState::new("openssl")
        .installed("3.0.11-1")
        .candidate("3.0.13-1")
        .upgradable()
        .origin(SECURITY_ORIGIN)
        .archive_file("openssl_3.0.13-1_amd64.deb")
}

fn plain_upgrade() -> PackageState {
    PackageState::new("vim")
        .installed("2:9.0.1378-2")
        .candidate("2:9.1.0016-1")
        .upgradable()
        .origin("deb.debian.org")
        .archive_file("vim_9.1.0016-1_amd64.deb")
}

// ---------------------------------------------------------------------------
// Scripted helpers
// ---------------------------------------------------------------------------

type HelperScript =
    Arc<dyn Fn(DuplexStream, DuplexStream) -> Pin<Box<dyn Future<Output = ()> + Send>> + Send + Sync>;

#[derive(Clone)]
struct ScriptedSpawner {
    count: Arc<AtomicUsize>,
    script: HelperScript,
}

impl ScriptedSpawner {
    fn new(script: HelperScript) -> Self {
        Self {
            count: Arc::new(AtomicUsize::new(0)),
            script,
        }
    }

    fn spawned(&self) -> usize {
        self.count.load(Ordering::SeqCst)
    }
}

impl HelperSpawner for ScriptedSpawner {
    fn spawn(&mut self, _in_terminal: bool, _command: &str) -> std::io::Result<HelperLink> {
        self.count.fetch_add(1, Ordering::SeqCst);
        let (slave_stdin, helper_stdin) = tokio::io::duplex(4096);
        let (slave_stdout, helper_stdout) = tokio::io::duplex(4096);
        tokio::spawn((self.script)(helper_stdin, helper_stdout));
        Ok(HelperLink::from_streams(slave_stdin, slave_stdout))
    }
}

/// A helper that never says anything and never exits.
fn idle_script() -> HelperScript {
    Arc::new(|stdin, stdout| {
        Box::pin(async move {
            let _hold = (stdin, stdout);
            std::future::pending::<()>().await
        })
    })
}

/// One no-echo prompt, one recorded answer, then success.
fn password_script(seen: Arc<Mutex<Vec<String>>>) -> HelperScript {
    Arc::new(move |mut stdin, mut stdout| {
        let seen = seen.clone();
        Box::pin(async move {
            let prompt =
                Reply::AuthPromptNoEcho("Running \"apt-get upgrade\" as root.\nPassword: ".into());
            stdout.write_all(&prompt.encode()).await.expect("prompt");

            let mut len = [0u8; 4];
            stdin.read_exact(&mut len).await.expect("answer length");
            let mut body = vec![0u8; u32::from_le_bytes(len) as usize];
            stdin.read_exact(&mut body).await.expect("answer body");
            seen.lock()
                .unwrap()
                .push(String::from_utf8(body).expect("utf8 answer"));

            stdout
                .write_all(&Reply::AuthOk.encode())
                .await
                .expect("auth ok");
            stdout
                .write_all(&Reply::AuthFinished.encode())
                .await
                .expect("auth finished");
        })
    })
}

/// Emits a byte that is not any reply kind.
fn garbled_script() -> HelperScript {
    Arc::new(|stdin, mut stdout| {
        Box::pin(async move {
            stdout.write_all(&[7u8]).await.expect("garbage");
            let _hold = stdin;
            std::future::pending::<()>().await
        })
    })
}

// ---------------------------------------------------------------------------
// Startup
// ---------------------------------------------------------------------------

#[tokio::test]
async fn startup_classifies_the_initial_state() {
    let fixture = fixture(vec![security_upgrade(), plain_upgrade()]);
    let mut client = connect(&fixture, ScriptedSpawner::new(idle_script()), Duration::from_secs(60)).await;
    assert_eq!(expect_startup(&mut client).await, Reply::InitOkSecurityUpgrades);
}

#[tokio::test]
async fn startup_with_no_upgrades_reports_a_clean_state() {
    let fixture = fixture(vec![PackageState::new("coreutils").installed("9.4-3")]);
    let mut client = connect(&fixture, ScriptedSpawner::new(idle_script()), Duration::from_secs(60)).await;
    assert_eq!(expect_startup(&mut client).await, Reply::InitOkNoUpgrades);
}

#[tokio::test]
async fn failed_cache_open_reports_init_failed_and_exits() {
    let mut fixture = fixture(vec![]);
    fixture.engine = fixture.engine.clone().failing_open();
    let mut client = connect(&fixture, ScriptedSpawner::new(idle_script()), Duration::from_secs(60)).await;

    match expect_startup(&mut client).await {
        Reply::InitFailed(text) => assert!(text.contains("could not be"), "got: {text}"),
        other => panic!("expected InitFailed, got {other:?}"),
    }
    let outcome = client.session.await.expect("join session");
    assert!(outcome.is_ok(), "a failed open is a clean exit: {outcome:?}");
}

#[tokio::test]
async fn an_older_peer_is_refused_before_any_command() {
    let fixture = fixture(vec![]);
    let (client, server) = tokio::io::duplex(64 * 1024);
    let (server_read, server_write) = tokio::io::split(server);
    let session = tokio::spawn(run_session(
        server_read,
        server_write,
        fixture.engine.clone(),
        ScriptedSpawner::new(idle_script()),
        SlaveOptions {
            home: Some(fixture.home.path().to_path_buf()),
            security_origin: SECURITY_ORIGIN.to_string(),
            reload_delay: Duration::from_secs(60),
        },
    ));

    let (mut reader, mut writer) = tokio::io::split(client);
    writer
        .write_all(&0u32.to_le_bytes())
        .await
        .expect("send stale version");
    assert_eq!(
        aio::read_version(&mut reader).await.expect("peer version"),
        PROTOCOL_VERSION
    );
    match aio::read_reply(&mut reader)
        .await
        .expect("decode reply")
        .expect("reply stream open")
    {
        Reply::FatalError(text) => assert!(text.contains("too new"), "got: {text}"),
        other => panic!("expected FatalError, got {other:?}"),
    }
    let outcome = session.await.expect("join session");
    assert!(outcome.is_err(), "a version mismatch must end the session");
}

#[tokio::test]
async fn client_eof_ends_the_session_cleanly() {
    let fixture = fixture(vec![]);
    let mut client = connect(&fixture, ScriptedSpawner::new(idle_script()), Duration::from_secs(60)).await;
    expect_startup(&mut client).await;

    let TestClient {
        reader,
        writer,
        session,
    } = client;
    drop(reader);
    drop(writer);
    let outcome = session.await.expect("join session");
    assert!(outcome.is_ok(), "EOF is not an error: {outcome:?}");
}

#[tokio::test]
async fn garbled_command_is_fatal() {
    let fixture = fixture(vec![]);
    let mut client = connect(&fixture, ScriptedSpawner::new(idle_script()), Duration::from_secs(60)).await;
    expect_startup(&mut client).await;

    client.writer.write_all(&[200u8]).await.expect("garbage");
    match client.recv().await {
        Reply::FatalError(text) => assert!(text.contains("Garbled command"), "got: {text}"),
        other => panic!("expected FatalError, got {other:?}"),
    }
    let outcome = client.session.await.expect("join session");
    assert!(outcome.is_err(), "a garbled command must end the session");
}

// ---------------------------------------------------------------------------
// Update and download
// ---------------------------------------------------------------------------

#[tokio::test]
async fn update_walks_the_whole_progress_bar_then_classifies() {
    let fixture = fixture(vec![security_upgrade()]);
    let engine = fixture.engine.clone();
    let mut client = connect(&fixture, ScriptedSpawner::new(idle_script()), Duration::from_secs(60)).await;
    expect_startup(&mut client).await;

    client.send(Command::Update).await;

    let mut lower_half = false;
    let mut upper_half = false;
    loop {
        match client.recv().await {
            Reply::ProgressUpdate { percent, .. } => {
                assert!((0.0..=100.0).contains(&percent));
                if percent < 50.0 {
                    lower_half = true;
                }
                if percent > 50.0 {
                    upper_half = true;
                }
            }
            Reply::ProgressDone => {}
            Reply::CompleteSecurityUpgrades => break,
            other => panic!("unexpected reply during update: {other:?}"),
        }
    }
    assert!(lower_half, "fetch ticks must land in the lower half");
    assert!(upper_half, "rebuild ticks must land in the upper half");
    assert_eq!(engine.open_count(), 2, "startup open plus the update reopen");
    assert!(!engine.is_locked(), "the list lock must be released");
}

#[tokio::test]
async fn failed_reopen_aborts_before_cleanup() {
    let fixture = fixture(vec![security_upgrade()]);
    let engine = fixture.engine.clone();
    let mut client = connect(&fixture, ScriptedSpawner::new(idle_script()), Duration::from_secs(60)).await;
    expect_startup(&mut client).await;

    // The startup open succeeded; every open from here on fails.
    let _ = engine.clone().failing_open();
    client.send(Command::Update).await;

    match client.recv_skipping_progress().await {
        Reply::FatalError(text) => assert!(text.contains("rebuilt"), "got: {text}"),
        other => panic!("expected FatalError, got {other:?}"),
    }
    assert_eq!(
        engine.clean_index_calls(),
        0,
        "cleanup must not run after a failed rebuild"
    );
    assert_eq!(engine.clean_archive_calls(), 0);
    assert!(!engine.is_locked(), "the list lock must still be released");
}

#[tokio::test]
async fn failed_index_fetch_reports_the_engine_errors() {
    let mut fixture = fixture(vec![security_upgrade()]);
    fixture.engine = fixture.engine.clone().failing_fetch();
    let mut client = connect(&fixture, ScriptedSpawner::new(idle_script()), Duration::from_secs(60)).await;
    expect_startup(&mut client).await;

    client.send(Command::Update).await;
    match client.recv_skipping_progress().await {
        Reply::FatalError(text) => {
            assert!(text.contains("index"), "context line missing: {text}");
            assert!(text.contains("timed out"), "engine detail missing: {text}");
        }
        other => panic!("expected FatalError, got {other:?}"),
    }
}

#[tokio::test]
async fn download_fetches_only_the_missing_archives() {
    let mut fixture = fixture(vec![security_upgrade(), plain_upgrade()]);
    fixture.engine = fixture.engine.clone().archive_already_present("vim");
    let engine = fixture.engine.clone();
    let mut client = connect(&fixture, ScriptedSpawner::new(idle_script()), Duration::from_secs(60)).await;
    expect_startup(&mut client).await;

    client.send(Command::Download { all_upgrades: true }).await;
    loop {
        match client.recv_skipping_progress().await {
            Reply::DownloadComplete => break,
            other => panic!("unexpected reply during download: {other:?}"),
        }
    }
    assert_eq!(engine.fetched_archives(), vec!["openssl".to_string()]);
    assert!(!engine.is_locked());
}

#[tokio::test]
async fn security_only_download_skips_plain_upgrades() {
    let fixture = fixture(vec![security_upgrade(), plain_upgrade()]);
    let engine = fixture.engine.clone();
    let mut client = connect(&fixture, ScriptedSpawner::new(idle_script()), Duration::from_secs(60)).await;
    expect_startup(&mut client).await;

    client
        .send(Command::Download {
            all_upgrades: false,
        })
        .await;
    loop {
        match client.recv_skipping_progress().await {
            Reply::DownloadComplete => break,
            other => panic!("unexpected reply during download: {other:?}"),
        }
    }
    assert_eq!(engine.fetched_archives(), vec!["openssl".to_string()]);
}

#[tokio::test]
async fn failed_download_reports_errors_but_still_completes() {
    let mut fixture = fixture(vec![security_upgrade()]);
    fixture.engine = fixture.engine.clone().failing_fetch();
    let mut client = connect(&fixture, ScriptedSpawner::new(idle_script()), Duration::from_secs(60)).await;
    expect_startup(&mut client).await;

    client.send(Command::Download { all_upgrades: true }).await;
    let mut saw_fatal = false;
    loop {
        match client.recv_skipping_progress().await {
            Reply::FatalError(text) => {
                assert!(text.contains("timed out"), "engine detail missing: {text}");
                saw_fatal = true;
            }
            Reply::DownloadComplete => break,
            other => panic!("unexpected reply during download: {other:?}"),
        }
    }
    assert!(saw_fatal, "the failure must be reported before completion");
}

// ---------------------------------------------------------------------------
// Helper sessions
// ---------------------------------------------------------------------------

#[tokio::test]
async fn second_start_session_is_ignored_while_one_lives() {
    let fixture = fixture(vec![]);
    let spawner = ScriptedSpawner::new(idle_script());
    let handle = spawner.clone();
    let mut client = connect(&fixture, spawner, Duration::from_secs(60)).await;
    expect_startup(&mut client).await;

    for _ in 0..2 {
        client
            .send(Command::StartSession {
                in_terminal: false,
                command: "apt-get upgrade".into(),
            })
            .await;
    }
    client.barrier().await;
    assert_eq!(handle.spawned(), 1, "one helper at a time");

    client.send(Command::AuthCancel).await;
    client
        .send(Command::StartSession {
            in_terminal: false,
            command: "apt-get upgrade".into(),
        })
        .await;
    client.barrier().await;
    assert_eq!(handle.spawned(), 2, "cancel frees the slot");
}

#[tokio::test]
async fn credential_conversation_relays_both_ways() {
    let fixture = fixture(vec![]);
    let seen = Arc::new(Mutex::new(Vec::new()));
    let spawner = ScriptedSpawner::new(password_script(seen.clone()));
    let handle = spawner.clone();
    let mut client = connect(&fixture, spawner, Duration::from_secs(60)).await;
    expect_startup(&mut client).await;

    client
        .send(Command::StartSession {
            in_terminal: false,
            command: "apt-get upgrade".into(),
        })
        .await;
    match client.recv().await {
        Reply::AuthPromptNoEcho(text) => {
            assert!(text.contains("Running \"apt-get upgrade\" as root."));
            assert!(text.contains("Password:"));
        }
        other => panic!("expected the relayed prompt, got {other:?}"),
    }

    client.send(Command::AuthReply("hunter2".into())).await;
    assert_eq!(client.recv().await, Reply::AuthOk);
    assert_eq!(client.recv().await, Reply::AuthFinished);
    assert_eq!(*seen.lock().unwrap(), vec!["hunter2".to_string()]);

    // AuthFinished tore the link down, so a new session can start.
    client
        .send(Command::StartSession {
            in_terminal: false,
            command: "apt-get upgrade".into(),
        })
        .await;
    client.barrier().await;
    assert_eq!(handle.spawned(), 2);
}

#[tokio::test]
async fn garbled_helper_reply_fails_and_frees_the_link() {
    let fixture = fixture(vec![]);
    let spawner = ScriptedSpawner::new(garbled_script());
    let handle = spawner.clone();
    let mut client = connect(&fixture, spawner, Duration::from_secs(60)).await;
    expect_startup(&mut client).await;

    client
        .send(Command::StartSession {
            in_terminal: false,
            command: "apt-get upgrade".into(),
        })
        .await;
    match client.recv().await {
        Reply::AuthFail(text) => assert!(text.contains("Garbled reply"), "got: {text}"),
        other => panic!("expected AuthFail, got {other:?}"),
    }

    client
        .send(Command::StartSession {
            in_terminal: false,
            command: "apt-get upgrade".into(),
        })
        .await;
    client.barrier().await;
    assert_eq!(handle.spawned(), 2, "the dead link must not block a retry");
}

// ---------------------------------------------------------------------------
// Debounced reload requests
// ---------------------------------------------------------------------------

#[tokio::test]
async fn list_change_requests_exactly_one_reload() {
    let fixture = fixture(vec![]);
    let list_dir = fixture.list_dir.clone();
    let mut client = connect(
        &fixture,
        ScriptedSpawner::new(idle_script()),
        Duration::from_millis(200),
    )
    .await;
    expect_startup(&mut client).await;

    std::fs::write(list_dir.join("Packages"), b"changed").expect("touch list file");

    let reply = tokio::time::timeout(Duration::from_secs(10), client.recv())
        .await
        .expect("a reload request within the window");
    assert_eq!(reply, Reply::RequestReload);

    // The request fires once per burst of changes.
    let extra = tokio::time::timeout(Duration::from_millis(700), client.recv()).await;
    assert!(extra.is_err(), "got a second reply: {extra:?}");
}

#[tokio::test]
async fn a_reload_command_suppresses_the_pending_request() {
    let fixture = fixture(vec![]);
    let list_dir = fixture.list_dir.clone();
    let mut client = connect(
        &fixture,
        ScriptedSpawner::new(idle_script()),
        Duration::from_secs(2),
    )
    .await;
    expect_startup(&mut client).await;

    std::fs::write(list_dir.join("Packages"), b"changed").expect("touch list file");
    // Give the watcher time to deliver the burst, then reload inside
    // the quiet period.
    tokio::time::sleep(Duration::from_millis(500)).await;
    client.barrier().await;

    let extra = tokio::time::timeout(Duration::from_secs(3), client.recv()).await;
    assert!(
        extra.is_err(),
        "the reload must have cleared the pending request: {extra:?}"
    );
}
