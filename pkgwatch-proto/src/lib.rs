//! Wire protocol shared by the pkgwatch slave, the auth helper, and any
//! client driving them.
//!
//! Every pipe in the system speaks the same framing: a one-byte message
//! kind, optionally followed by a u32-LE length-prefixed string and a
//! handful of fixed-size fields. The slave↔helper credential channel
//! additionally carries bare length-prefixed strings with no kind byte.
//!
//! - [`message`] — [`Command`] / [`Reply`] kinds and payloads
//! - [`wire`] — blocking codec, raw strings, version handshake
//! - [`aio`] — async read side (feature `async`)
//! - [`error`] — [`ProtoError`]

pub mod error;
pub mod message;
pub mod wire;

#[cfg(feature = "async")]
pub mod aio;

pub use error::ProtoError;
pub use message::{Command, Reply, MAX_CREDENTIAL_LEN, MAX_STRING_LEN, PROTOCOL_VERSION};
