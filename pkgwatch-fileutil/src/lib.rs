//! File relocation utilities: atomic single-file copy/move plus the
//! recursive variants the auth helper uses to shuttle private list and
//! archive mirrors into the system directories.
//!
//! `copy` stages through a uniquely named temp file in the
//! destination's directory and renames it into place, so a partially
//! written file is never visible at the destination path. The
//! recursive walkers abort on the first unrecoverable error; there is
//! no partial-tree rollback.

pub mod error;
mod relocate;

pub use error::FileError;
pub use relocate::{copy, copy_newer_recursive, copy_recursive, move_file, move_recursive};
