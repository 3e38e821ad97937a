//! Auth helper supervision: spawning, the stdout reader task, and the
//! raw credential channel into the helper's stdin.

use std::io;
use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;

use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};
use tokio::process::{Child, Command as ProcessCommand};
use tokio::sync::mpsc::UnboundedSender;
use tokio::task::JoinHandle;

use pkgwatch_proto::{aio, ProtoError, Reply};

/// How the runtime obtains a helper subprocess. Production uses
/// [`ProcessSpawner`]; tests substitute scripted in-memory helpers.
pub trait HelperSpawner: Send + 'static {
    fn spawn(&mut self, in_terminal: bool, command: &str) -> io::Result<HelperLink>;
}

/// The pipe ends of a freshly spawned helper.
pub struct HelperLink {
    stdin: Box<dyn AsyncWrite + Send + Unpin>,
    stdout: Box<dyn AsyncRead + Send + Unpin>,
    child: Option<Child>,
}

impl HelperLink {
    /// Wrap a pair of raw streams; used by scripted helpers in tests.
    pub fn from_streams(
        stdin: impl AsyncWrite + Send + Unpin + 'static,
        stdout: impl AsyncRead + Send + Unpin + 'static,
    ) -> Self {
        Self {
            stdin: Box::new(stdin),
            stdout: Box::new(stdout),
            child: None,
        }
    }

    /// Take ownership of a spawned child's piped stdin/stdout.
    pub fn from_child(mut child: Child) -> io::Result<Self> {
        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| io::Error::new(io::ErrorKind::Other, "helper stdin was not piped"))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| io::Error::new(io::ErrorKind::Other, "helper stdout was not piped"))?;
        Ok(Self {
            stdin: Box::new(stdin),
            stdout: Box::new(stdout),
            child: Some(child),
        })
    }
}

/// What the helper reader task saw on the helper's stdout.
#[derive(Debug)]
pub enum HelperEvent {
    Reply(Reply),
    Garbled(ProtoError),
    Eof,
}

/// A live helper session: the write end of its stdin plus the reader
/// task draining its stdout. `gen` disambiguates events from an
/// already-torn-down predecessor.
pub(crate) struct ActiveHelper {
    stdin: Box<dyn AsyncWrite + Send + Unpin>,
    child: Option<Child>,
    reader: JoinHandle<()>,
    pub(crate) gen: u64,
}

impl ActiveHelper {
    /// Forward one credential answer as a bare length-prefixed string.
    pub(crate) async fn send_credential(&mut self, answer: &str) -> io::Result<()> {
        let mut buf = Vec::with_capacity(4 + answer.len());
        buf.extend_from_slice(&(answer.len() as u32).to_le_bytes());
        buf.extend_from_slice(answer.as_bytes());
        self.stdin.write_all(&buf).await?;
        self.stdin.flush().await
    }

    /// Close both pipes and reap the child without blocking the loop.
    pub(crate) fn shutdown(self) {
        drop(self.stdin);
        self.reader.abort();
        if let Some(mut child) = self.child {
            tokio::spawn(async move {
                tokio::select! {
                    _ = child.wait() => {}
                    _ = tokio::time::sleep(Duration::from_secs(5)) => {
                        let _ = child.start_kill();
                        let _ = child.wait().await;
                    }
                }
            });
        }
    }
}

/// Start the reader task for a fresh link.
pub(crate) fn activate(
    link: HelperLink,
    gen: u64,
    tx: UnboundedSender<(u64, HelperEvent)>,
) -> ActiveHelper {
    let HelperLink {
        stdin,
        mut stdout,
        child,
    } = link;

    let reader = tokio::spawn(async move {
        loop {
            match aio::read_reply(&mut stdout).await {
                Ok(Some(reply)) => {
                    if tx.send((gen, HelperEvent::Reply(reply))).is_err() {
                        break;
                    }
                }
                Ok(None) => {
                    let _ = tx.send((gen, HelperEvent::Eof));
                    break;
                }
                Err(err) => {
                    let _ = tx.send((gen, HelperEvent::Garbled(err)));
                    break;
                }
            }
        }
    });

    ActiveHelper {
        stdin,
        child,
        reader,
        gen,
    }
}

/// Launches the real `pkgwatch-auth-helper` binary, preferring the one
/// installed next to the current executable.
#[derive(Debug, Default)]
pub struct ProcessSpawner {
    /// Explicit helper path; overrides the sibling/`PATH` lookup.
    pub helper: Option<PathBuf>,
}

impl ProcessSpawner {
    pub fn new() -> Self {
        Self::default()
    }

    fn helper_path(&self) -> PathBuf {
        if let Some(path) = &self.helper {
            return path.clone();
        }
        std::env::current_exe()
            .ok()
            .and_then(|exe| exe.parent().map(|dir| dir.join("pkgwatch-auth-helper")))
            .filter(|path| path.exists())
            .unwrap_or_else(|| PathBuf::from("pkgwatch-auth-helper"))
    }
}

impl HelperSpawner for ProcessSpawner {
    fn spawn(&mut self, in_terminal: bool, command: &str) -> io::Result<HelperLink> {
        let mut cmd = ProcessCommand::new(self.helper_path());
        if in_terminal {
            cmd.arg("--terminal");
        }
        cmd.arg(command)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit());
        let child = cmd.spawn()?;
        HelperLink::from_child(child)
    }
}
