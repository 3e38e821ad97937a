//! Blocking codec: frame encoding, frame decoding, raw strings, and
//! the version handshake.
//!
//! Frames are encoded into a buffer and emitted with a single
//! `write_all`, so a short write on a blocking pipe is retried by the
//! standard library rather than silently dropped. Decoding treats a
//! clean end-of-stream *between* frames as "peer went away"
//! (`Ok(None)`) and end-of-stream *inside* a frame as
//! [`ProtoError::Truncated`].

use std::io::{self, Read, Write};

use crate::error::ProtoError;
use crate::message::{kind, Command, Reply, MAX_STRING_LEN, PROTOCOL_VERSION};

// ---------------------------------------------------------------------------
// Version handshake
// ---------------------------------------------------------------------------

/// Announce our protocol version to the peer.
pub fn write_version<W: Write>(w: &mut W) -> io::Result<()> {
    w.write_all(&PROTOCOL_VERSION.to_le_bytes())?;
    w.flush()
}

/// Read the peer's claimed protocol version.
pub fn read_version<R: Read>(r: &mut R) -> Result<u32, ProtoError> {
    let mut buf = [0u8; 4];
    r.read_exact(&mut buf).map_err(eof_is_truncated)?;
    Ok(u32::from_le_bytes(buf))
}

/// Refuse the session when we speak a newer protocol than the peer:
/// forward compatibility must be explicit, never silently degraded.
pub fn check_peer_version(peer: u32) -> Result<(), ProtoError> {
    if PROTOCOL_VERSION > peer {
        Err(ProtoError::PeerTooOld {
            local: PROTOCOL_VERSION,
            peer,
        })
    } else {
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Raw strings (slave → helper credential channel)
// ---------------------------------------------------------------------------

/// Write a bare length-prefixed string (no kind byte).
pub fn write_string<W: Write>(w: &mut W, s: &str) -> io::Result<()> {
    let mut buf = Vec::with_capacity(4 + s.len());
    push_string(&mut buf, s);
    w.write_all(&buf)?;
    w.flush()
}

/// Read a bare length-prefixed string, enforcing `max`. `Ok(None)`
/// means the peer closed the stream before a length arrived.
pub fn read_string<R: Read>(r: &mut R, max: usize) -> Result<Option<String>, ProtoError> {
    let mut lenbuf = [0u8; 4];
    match read_or_eof(r, &mut lenbuf)? {
        false => Ok(None),
        true => Ok(Some(read_string_body(r, u32::from_le_bytes(lenbuf), max)?)),
    }
}

// ---------------------------------------------------------------------------
// Commands
// ---------------------------------------------------------------------------

impl Command {
    /// Encode the whole frame into a buffer.
    pub fn encode(&self) -> Vec<u8> {
        let mut buf = vec![self.kind()];
        match self {
            Command::StartSession {
                in_terminal,
                command,
            } => {
                push_bool(&mut buf, *in_terminal);
                push_string(&mut buf, command);
            }
            Command::AuthReply(s) => push_string(&mut buf, s),
            Command::Download { all_upgrades } => push_bool(&mut buf, *all_upgrades),
            Command::Update
            | Command::Reload
            | Command::AuthCancel
            | Command::AbortDownload => {}
        }
        buf
    }

    pub fn write_to<W: Write>(&self, w: &mut W) -> io::Result<()> {
        w.write_all(&self.encode())?;
        w.flush()
    }

    /// Decode one command. `Ok(None)` means the stream ended cleanly
    /// between frames.
    pub fn read_from<R: Read>(r: &mut R) -> Result<Option<Command>, ProtoError> {
        let mut kind_byte = [0u8; 1];
        if !read_or_eof(r, &mut kind_byte)? {
            return Ok(None);
        }
        Ok(Some(Self::read_body(r, kind_byte[0])?))
    }

    fn read_body<R: Read>(r: &mut R, kind_byte: u8) -> Result<Command, ProtoError> {
        match kind_byte {
            kind::CMD_UPDATE => Ok(Command::Update),
            kind::CMD_RELOAD => Ok(Command::Reload),
            kind::CMD_START_SESSION => {
                let in_terminal = read_bool(r)?;
                let command = read_string_field(r)?;
                Ok(Command::StartSession {
                    in_terminal,
                    command,
                })
            }
            kind::CMD_AUTH_REPLY => Ok(Command::AuthReply(read_string_field(r)?)),
            kind::CMD_AUTH_CANCEL => Ok(Command::AuthCancel),
            kind::CMD_DOWNLOAD => {
                let all_upgrades = read_bool(r)?;
                Ok(Command::Download { all_upgrades })
            }
            kind::CMD_ABORT_DOWNLOAD => Ok(Command::AbortDownload),
            other => Err(ProtoError::UnknownCommand(other)),
        }
    }
}

// ---------------------------------------------------------------------------
// Replies
// ---------------------------------------------------------------------------

impl Reply {
    /// Encode the whole frame into a buffer.
    pub fn encode(&self) -> Vec<u8> {
        let mut buf = vec![self.kind()];
        match self {
            Reply::AuthPromptNoEcho(s)
            | Reply::AuthPromptEcho(s)
            | Reply::AuthError(s)
            | Reply::AuthInfo(s)
            | Reply::AuthFail(s)
            | Reply::InitFailed(s)
            | Reply::FatalError(s) => push_string(&mut buf, s),
            Reply::ProgressUpdate {
                op,
                percent,
                major_change,
            } => {
                push_string(&mut buf, op);
                buf.extend_from_slice(&percent.to_le_bytes());
                push_bool(&mut buf, *major_change);
            }
            _ => {}
        }
        buf
    }

    pub fn write_to<W: Write>(&self, w: &mut W) -> io::Result<()> {
        w.write_all(&self.encode())?;
        w.flush()
    }

    /// Decode one reply. `Ok(None)` means the stream ended cleanly
    /// between frames.
    pub fn read_from<R: Read>(r: &mut R) -> Result<Option<Reply>, ProtoError> {
        let mut kind_byte = [0u8; 1];
        if !read_or_eof(r, &mut kind_byte)? {
            return Ok(None);
        }
        Ok(Some(Self::read_body(r, kind_byte[0])?))
    }

    fn read_body<R: Read>(r: &mut R, kind_byte: u8) -> Result<Reply, ProtoError> {
        match kind_byte {
            kind::REPLY_AUTH_PROMPT_NOECHO => Ok(Reply::AuthPromptNoEcho(read_string_field(r)?)),
            kind::REPLY_AUTH_PROMPT_ECHO => Ok(Reply::AuthPromptEcho(read_string_field(r)?)),
            kind::REPLY_AUTH_ERRORMSG => Ok(Reply::AuthError(read_string_field(r)?)),
            kind::REPLY_AUTH_INFO => Ok(Reply::AuthInfo(read_string_field(r)?)),
            kind::REPLY_PROGRESS_UPDATE => {
                let op = read_string_field(r)?;
                let mut pct = [0u8; 4];
                r.read_exact(&mut pct).map_err(eof_is_truncated)?;
                let major_change = read_bool(r)?;
                Ok(Reply::ProgressUpdate {
                    op,
                    percent: f32::from_le_bytes(pct),
                    major_change,
                })
            }
            kind::REPLY_PROGRESS_DONE => Ok(Reply::ProgressDone),
            kind::REPLY_AUTH_FAIL => Ok(Reply::AuthFail(read_string_field(r)?)),
            kind::REPLY_AUTH_OK => Ok(Reply::AuthOk),
            kind::REPLY_INIT_OK_NO_UPGRADES => Ok(Reply::InitOkNoUpgrades),
            kind::REPLY_INIT_OK_UPGRADES => Ok(Reply::InitOkUpgrades),
            kind::REPLY_INIT_OK_SECURITY_UPGRADES => Ok(Reply::InitOkSecurityUpgrades),
            kind::REPLY_INIT_FAILED => Ok(Reply::InitFailed(read_string_field(r)?)),
            kind::REPLY_COMPLETE_NO_UPGRADES => Ok(Reply::CompleteNoUpgrades),
            kind::REPLY_COMPLETE_UPGRADES => Ok(Reply::CompleteUpgrades),
            kind::REPLY_COMPLETE_SECURITY_UPGRADES => Ok(Reply::CompleteSecurityUpgrades),
            kind::REPLY_FATAL_ERROR => Ok(Reply::FatalError(read_string_field(r)?)),
            kind::REPLY_REQUEST_RELOAD => Ok(Reply::RequestReload),
            kind::REPLY_DOWNLOAD_COMPLETE => Ok(Reply::DownloadComplete),
            kind::REPLY_AUTH_FINISHED => Ok(Reply::AuthFinished),
            other => Err(ProtoError::UnknownReply(other)),
        }
    }
}

// ---------------------------------------------------------------------------
// Field primitives
// ---------------------------------------------------------------------------

pub(crate) fn push_string(buf: &mut Vec<u8>, s: &str) {
    // Writers are in-process; an overlong payload is truncated at a
    // char boundary rather than handed to the peer as a protocol error.
    let s = truncate_at_boundary(s, MAX_STRING_LEN);
    buf.extend_from_slice(&(s.len() as u32).to_le_bytes());
    buf.extend_from_slice(s.as_bytes());
}

pub(crate) fn push_bool(buf: &mut Vec<u8>, b: bool) {
    buf.push(u8::from(b));
}

fn truncate_at_boundary(s: &str, max: usize) -> &str {
    if s.len() <= max {
        return s;
    }
    let mut end = max;
    while !s.is_char_boundary(end) {
        end -= 1;
    }
    &s[..end]
}

fn read_bool<R: Read>(r: &mut R) -> Result<bool, ProtoError> {
    let mut b = [0u8; 1];
    r.read_exact(&mut b).map_err(eof_is_truncated)?;
    match b[0] {
        0 => Ok(false),
        1 => Ok(true),
        other => Err(ProtoError::BadBool(other)),
    }
}

/// String field inside a frame: EOF anywhere here is a truncation.
fn read_string_field<R: Read>(r: &mut R) -> Result<String, ProtoError> {
    let mut lenbuf = [0u8; 4];
    r.read_exact(&mut lenbuf).map_err(eof_is_truncated)?;
    read_string_body(r, u32::from_le_bytes(lenbuf), MAX_STRING_LEN)
}

fn read_string_body<R: Read>(r: &mut R, len: u32, max: usize) -> Result<String, ProtoError> {
    if len as usize > max {
        return Err(ProtoError::OversizedString { len, max });
    }
    let mut body = vec![0u8; len as usize];
    r.read_exact(&mut body).map_err(eof_is_truncated)?;
    String::from_utf8(body).map_err(|_| ProtoError::InvalidUtf8)
}

/// Fill `buf` exactly, or report a clean EOF when the stream ends
/// before the first byte. EOF after the first byte is a truncation.
fn read_or_eof<R: Read>(r: &mut R, buf: &mut [u8]) -> Result<bool, ProtoError> {
    let mut filled = 0;
    while filled < buf.len() {
        match r.read(&mut buf[filled..]) {
            Ok(0) if filled == 0 => return Ok(false),
            Ok(0) => return Err(ProtoError::Truncated),
            Ok(n) => filled += n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(ProtoError::Io(e)),
        }
    }
    Ok(true)
}

fn eof_is_truncated(e: io::Error) -> ProtoError {
    if e.kind() == io::ErrorKind::UnexpectedEof {
        ProtoError::Truncated
    } else {
        ProtoError::Io(e)
    }
}
