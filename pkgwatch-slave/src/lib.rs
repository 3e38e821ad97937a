//! The slave daemon: speaks the framed protocol on stdin/stdout,
//! drives the package-cache engine, supervises the auth helper, and
//! watches the on-disk cache for out-of-band changes.

pub mod error;
pub mod helper;
pub mod paths;
pub mod progress;
mod runtime;
mod watcher;

pub use error::SlaveError;
pub use helper::{HelperLink, HelperSpawner, ProcessSpawner};
pub use runtime::{run_session, SlaveOptions};
