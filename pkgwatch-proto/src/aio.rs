//! Async read side of the codec (feature `async`).
//!
//! The slave's reader tasks pull frames off its stdin and off the
//! helper's stdout with these; writing stays on the buffered encode +
//! `write_all` path, which needs no async mirror.

use tokio::io::{AsyncRead, AsyncReadExt};

use crate::error::ProtoError;
use crate::message::{kind, Command, Reply, MAX_STRING_LEN};

/// Read the peer's claimed protocol version.
pub async fn read_version<R: AsyncRead + Unpin>(r: &mut R) -> Result<u32, ProtoError> {
    let mut buf = [0u8; 4];
    read_full(r, &mut buf).await?;
    Ok(u32::from_le_bytes(buf))
}

/// Decode one command; `Ok(None)` on clean EOF between frames.
pub async fn read_command<R: AsyncRead + Unpin>(r: &mut R) -> Result<Option<Command>, ProtoError> {
    let Some(kind_byte) = read_kind(r).await? else {
        return Ok(None);
    };
    let cmd = match kind_byte {
        kind::CMD_UPDATE => Command::Update,
        kind::CMD_RELOAD => Command::Reload,
        kind::CMD_START_SESSION => {
            let in_terminal = read_bool(r).await?;
            let command = read_string_field(r).await?;
            Command::StartSession {
                in_terminal,
                command,
            }
        }
        kind::CMD_AUTH_REPLY => Command::AuthReply(read_string_field(r).await?),
        kind::CMD_AUTH_CANCEL => Command::AuthCancel,
        kind::CMD_DOWNLOAD => Command::Download {
            all_upgrades: read_bool(r).await?,
        },
        kind::CMD_ABORT_DOWNLOAD => Command::AbortDownload,
        other => return Err(ProtoError::UnknownCommand(other)),
    };
    Ok(Some(cmd))
}

/// Decode one reply; `Ok(None)` on clean EOF between frames.
pub async fn read_reply<R: AsyncRead + Unpin>(r: &mut R) -> Result<Option<Reply>, ProtoError> {
    let Some(kind_byte) = read_kind(r).await? else {
        return Ok(None);
    };
    let reply = match kind_byte {
        kind::REPLY_AUTH_PROMPT_NOECHO => Reply::AuthPromptNoEcho(read_string_field(r).await?),
        kind::REPLY_AUTH_PROMPT_ECHO => Reply::AuthPromptEcho(read_string_field(r).await?),
        kind::REPLY_AUTH_ERRORMSG => Reply::AuthError(read_string_field(r).await?),
        kind::REPLY_AUTH_INFO => Reply::AuthInfo(read_string_field(r).await?),
        kind::REPLY_PROGRESS_UPDATE => {
            let op = read_string_field(r).await?;
            let mut pct = [0u8; 4];
            read_full(r, &mut pct).await?;
            let major_change = read_bool(r).await?;
            Reply::ProgressUpdate {
                op,
                percent: f32::from_le_bytes(pct),
                major_change,
            }
        }
        kind::REPLY_PROGRESS_DONE => Reply::ProgressDone,
        kind::REPLY_AUTH_FAIL => Reply::AuthFail(read_string_field(r).await?),
        kind::REPLY_AUTH_OK => Reply::AuthOk,
        kind::REPLY_INIT_OK_NO_UPGRADES => Reply::InitOkNoUpgrades,
        kind::REPLY_INIT_OK_UPGRADES => Reply::InitOkUpgrades,
        kind::REPLY_INIT_OK_SECURITY_UPGRADES => Reply::InitOkSecurityUpgrades,
        kind::REPLY_INIT_FAILED => Reply::InitFailed(read_string_field(r).await?),
        kind::REPLY_COMPLETE_NO_UPGRADES => Reply::CompleteNoUpgrades,
        kind::REPLY_COMPLETE_UPGRADES => Reply::CompleteUpgrades,
        kind::REPLY_COMPLETE_SECURITY_UPGRADES => Reply::CompleteSecurityUpgrades,
        kind::REPLY_FATAL_ERROR => Reply::FatalError(read_string_field(r).await?),
        kind::REPLY_REQUEST_RELOAD => Reply::RequestReload,
        kind::REPLY_DOWNLOAD_COMPLETE => Reply::DownloadComplete,
        kind::REPLY_AUTH_FINISHED => Reply::AuthFinished,
        other => return Err(ProtoError::UnknownReply(other)),
    };
    Ok(Some(reply))
}

async fn read_kind<R: AsyncRead + Unpin>(r: &mut R) -> Result<Option<u8>, ProtoError> {
    let mut b = [0u8; 1];
    match r.read(&mut b).await {
        Ok(0) => Ok(None),
        Ok(_) => Ok(Some(b[0])),
        Err(e) => Err(ProtoError::Io(e)),
    }
}

async fn read_full<R: AsyncRead + Unpin>(r: &mut R, buf: &mut [u8]) -> Result<(), ProtoError> {
    r.read_exact(buf).await.map_err(|e| {
        if e.kind() == std::io::ErrorKind::UnexpectedEof {
            ProtoError::Truncated
        } else {
            ProtoError::Io(e)
        }
    })?;
    Ok(())
}

async fn read_bool<R: AsyncRead + Unpin>(r: &mut R) -> Result<bool, ProtoError> {
    let mut b = [0u8; 1];
    read_full(r, &mut b).await?;
    match b[0] {
        0 => Ok(false),
        1 => Ok(true),
        other => Err(ProtoError::BadBool(other)),
    }
}

async fn read_string_field<R: AsyncRead + Unpin>(r: &mut R) -> Result<String, ProtoError> {
    let mut lenbuf = [0u8; 4];
    read_full(r, &mut lenbuf).await?;
    let len = u32::from_le_bytes(lenbuf);
    if len as usize > MAX_STRING_LEN {
        return Err(ProtoError::OversizedString {
            len,
            max: MAX_STRING_LEN,
        });
    }
    let mut body = vec![0u8; len as usize];
    read_full(r, &mut body).await?;
    String::from_utf8(body).map_err(|_| ProtoError::InvalidUtf8)
}
