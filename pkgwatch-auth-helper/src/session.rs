//! The helper session: precondition checks, the credential exchange,
//! mirror relocation, and running the command as root.

use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};

use pkgwatch_proto::Reply;

use crate::authority::CredentialAuthority;
use crate::error::{io_err, HelperError};
use crate::relay::{negotiate, AuthDecision};

#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Shell command to run once the session is granted.
    pub command: String,
    /// Run the command inside an xterm instead of detached.
    pub in_terminal: bool,
    /// System list directory the private mirror is copied into.
    pub list_dir: PathBuf,
    /// System archive directory the private mirror is moved into.
    pub archive_dir: PathBuf,
    /// Invoking user's home, for locating the private mirrors.
    pub home: Option<PathBuf>,
}

/// Run one helper session over the given pipes. Returns the process
/// exit code; protocol frames and an `AuthFinished` trailer are the
/// only output on `output`.
pub fn run<R: Read, W: Write>(
    mut input: R,
    mut output: W,
    authority: &mut dyn CredentialAuthority,
    config: &SessionConfig,
) -> Result<i32, HelperError> {
    let (uid, euid) = real_effective_ids();
    if euid != 0 {
        send(&mut output, Reply::AuthFail("The helper is not installed setuid root.".into()))?;
        return Ok(1);
    }

    if uid != 0 {
        // Setuid invocation: the invoking user must prove themselves.
        match negotiate(authority, uid, &mut input, &mut output, &config.command) {
            AuthDecision::Granted => {}
            AuthDecision::Denied(reason) => {
                send(&mut output, Reply::AuthFail(reason))?;
                return Ok(1);
            }
            // The user closed the channel; nothing to report.
            AuthDecision::Cancelled => return Ok(0),
            AuthDecision::Violation(detail) => {
                send(
                    &mut output,
                    Reply::AuthFail(format!("Credential channel violation: {detail}")),
                )?;
                return Ok(1);
            }
        }
    }
    send(&mut output, Reply::AuthOk)?;

    become_group_root();
    if let Some(home) = &config.home {
        relocate_mirrors(home, &config.list_dir, &config.archive_dir);
    }

    let status = run_command(&config.command, config.in_terminal, uid);
    match status {
        Ok(status) => tracing::info!(code = ?status.code(), "command finished"),
        Err(err) => tracing::warn!(error = %err, "command could not be run"),
    }

    // The session is over either way; the client decides what a
    // failed command means.
    send(&mut output, Reply::AuthFinished)?;
    Ok(0)
}

fn send<W: Write>(output: &mut W, reply: Reply) -> Result<(), HelperError> {
    reply.write_to(output).map_err(|e| io_err("protocol stream", e))
}

/// Best-effort relocation of the user's private cache mirrors: lists
/// are left behind as a copy, archives are consumed.
pub fn relocate_mirrors(home: &Path, list_dir: &Path, archive_dir: &Path) {
    let lists = home.join(".pkgwatch").join("lists");
    if lists.is_dir() {
        match pkgwatch_fileutil::copy_recursive(&lists, list_dir) {
            Ok(()) => tracing::info!(from = %lists.display(), "copied the private list mirror"),
            Err(err) => tracing::warn!(error = %err, "could not copy the private list mirror"),
        }
    }

    let archives = home.join(".pkgwatch").join("archives");
    if archives.is_dir() {
        match pkgwatch_fileutil::move_recursive(&archives, archive_dir) {
            Ok(()) => {
                tracing::info!(from = %archives.display(), "moved the private archive mirror")
            }
            Err(err) => tracing::warn!(error = %err, "could not move the private archive mirror"),
        }
    }
}

fn run_command(command: &str, in_terminal: bool, invoking_uid: u32) -> std::io::Result<std::process::ExitStatus> {
    let mut cmd = if in_terminal {
        let mut cmd = Command::new("xterm");
        cmd.arg("-e").arg("sh").arg("-c").arg(command);
        cmd
    } else {
        let mut cmd = Command::new("sh");
        cmd.arg("-c").arg(command);
        cmd
    };

    // The protocol pipes stay with the helper; the command gets none
    // of them.
    cmd.stdin(Stdio::null()).stdout(Stdio::null()).stderr(Stdio::inherit());

    become_fully_root(&mut cmd, invoking_uid);
    cmd.status()
}

/// A setuid child keeps the real uid; the command must run with all
/// three ids set to root or tools like apt refuse to work.
#[cfg(unix)]
fn become_fully_root(cmd: &mut Command, invoking_uid: u32) {
    use std::os::unix::process::CommandExt;

    if invoking_uid == 0 {
        return;
    }
    unsafe {
        cmd.pre_exec(|| {
            if libc::setresgid(0, 0, 0) != 0 {
                return Err(std::io::Error::last_os_error());
            }
            if libc::setresuid(0, 0, 0) != 0 {
                return Err(std::io::Error::last_os_error());
            }
            Ok(())
        });
    }
}

#[cfg(not(unix))]
fn become_fully_root(_cmd: &mut Command, _invoking_uid: u32) {}

#[cfg(unix)]
fn become_group_root() {
    // Best-effort; list files written with the user's gid still work.
    if unsafe { libc::setegid(0) } != 0 {
        tracing::debug!("could not switch to group root");
    }
}

#[cfg(not(unix))]
fn become_group_root() {}

#[cfg(unix)]
fn real_effective_ids() -> (u32, u32) {
    unsafe { (libc::getuid(), libc::geteuid()) }
}

#[cfg(not(unix))]
fn real_effective_ids() -> (u32, u32) {
    (0, 0)
}
