//! Copy/move primitives and recursive tree walkers.

use std::fs::{self, OpenOptions};
use std::io::{self, Read};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

use filetime::FileTime;

use crate::error::{io_err, FileError};

static TEMP_SEQ: AtomicU64 = AtomicU64::new(0);

// ---------------------------------------------------------------------------
// Single files
// ---------------------------------------------------------------------------

/// Copy `src` to `dst` through a uniquely named temp file in `dst`'s
/// directory, then rename into place. Preserves mode and mtime, then
/// sets ownership to the effective user/group. Symlinks are recreated
/// as links, never followed.
pub fn copy(src: &Path, dst: &Path) -> Result<(), FileError> {
    let meta = fs::symlink_metadata(src).map_err(|e| io_err(src, e))?;

    if meta.file_type().is_symlink() {
        return recreate_symlink(src, dst);
    }

    let reader = fs::File::open(src).map_err(|e| io_err(src, e))?;
    copy_regular(reader, &meta, dst)
}

/// Move `src` to `dst`: an in-place rename when possible, else
/// copy-then-unlink across filesystem boundaries.
pub fn move_file(src: &Path, dst: &Path) -> Result<(), FileError> {
    move_file_with(src, dst, |s, d| fs::rename(s, d))
}

/// `move_file` with an injectable rename, so tests can force the
/// cross-filesystem fallback.
pub(crate) fn move_file_with(
    src: &Path,
    dst: &Path,
    rename: impl Fn(&Path, &Path) -> io::Result<()>,
) -> Result<(), FileError> {
    if rename(src, dst).is_ok() {
        chown_to_effective(dst);
        return Ok(());
    }

    copy(src, dst)?;
    fs::remove_file(src).map_err(|e| io_err(src, e))
}

/// Stage `reader` into a temp file beside `dst`, then rename onto
/// `dst`. On any failure the temp file is removed and `dst` is left
/// exactly as it was.
pub(crate) fn copy_regular<R: Read>(
    mut reader: R,
    meta: &fs::Metadata,
    dst: &Path,
) -> Result<(), FileError> {
    let tmp = stage_temp(&mut reader, meta, dst)?;

    if let Err(e) = fs::rename(&tmp, dst) {
        let _ = fs::remove_file(&tmp);
        return Err(io_err(dst, e));
    }

    chown_to_effective(dst);
    Ok(())
}

fn stage_temp<R: Read>(
    reader: &mut R,
    meta: &fs::Metadata,
    dst: &Path,
) -> Result<PathBuf, FileError> {
    let (tmp, mut out) = open_temp(meta, dst)?;

    if let Err(e) = io::copy(reader, &mut out) {
        drop(out);
        let _ = fs::remove_file(&tmp);
        return Err(io_err(&tmp, e));
    }
    drop(out);

    // Keep the source's timestamps so copy_newer comparisons stay
    // meaningful after relocation. Failure here is not worth aborting
    // the copy for.
    let atime = FileTime::from_last_access_time(meta);
    let mtime = FileTime::from_last_modification_time(meta);
    let _ = filetime::set_file_times(&tmp, atime, mtime);

    Ok(tmp)
}

fn open_temp(meta: &fs::Metadata, dst: &Path) -> Result<(PathBuf, fs::File), FileError> {
    // A handful of attempts guards against a stale temp file from a
    // crashed earlier run with the same pid and sequence.
    for _ in 0..8 {
        let tmp = PathBuf::from(format!(
            "{}.pkgwatch.{}.{}",
            dst.display(),
            std::process::id(),
            TEMP_SEQ.fetch_add(1, Ordering::Relaxed)
        ));
        match open_exclusive(&tmp, meta) {
            Ok(file) => return Ok((tmp, file)),
            Err(e) if e.kind() == io::ErrorKind::AlreadyExists => continue,
            Err(e) => return Err(io_err(&tmp, e)),
        }
    }
    Err(io_err(
        dst,
        io::Error::new(io::ErrorKind::AlreadyExists, "can't find a free temp name"),
    ))
}

#[cfg(unix)]
fn open_exclusive(path: &Path, meta: &fs::Metadata) -> io::Result<fs::File> {
    use std::os::unix::fs::{MetadataExt, OpenOptionsExt};
    OpenOptions::new()
        .write(true)
        .create_new(true)
        .mode(meta.mode() & 0o7777)
        .open(path)
}

#[cfg(not(unix))]
fn open_exclusive(path: &Path, _meta: &fs::Metadata) -> io::Result<fs::File> {
    OpenOptions::new().write(true).create_new(true).open(path)
}

fn recreate_symlink(src: &Path, dst: &Path) -> Result<(), FileError> {
    let target = fs::read_link(src).map_err(|e| io_err(src, e))?;

    match fs::remove_file(dst) {
        Ok(()) => {}
        Err(e) if e.kind() == io::ErrorKind::NotFound => {}
        Err(e) => return Err(io_err(dst, e)),
    }

    symlink(&target, dst).map_err(|source| FileError::Symlink {
        src: src.to_path_buf(),
        dst: dst.to_path_buf(),
        source,
    })
}

#[cfg(unix)]
use std::os::unix::fs::symlink;

#[cfg(not(unix))]
fn symlink(_target: &Path, dst: &Path) -> io::Result<()> {
    Err(io::Error::new(
        io::ErrorKind::Unsupported,
        format!("symlinks unsupported at {}", dst.display()),
    ))
}

#[cfg(unix)]
fn chown_to_effective(path: &Path) {
    use std::os::unix::ffi::OsStrExt;
    // Best effort, as the original does: relocated files should belong
    // to whoever is running, not to whoever staged the mirror.
    if let Ok(cpath) = std::ffi::CString::new(path.as_os_str().as_bytes()) {
        unsafe {
            libc::chown(cpath.as_ptr(), libc::geteuid(), libc::getegid());
        }
    }
}

#[cfg(not(unix))]
fn chown_to_effective(_path: &Path) {}

// ---------------------------------------------------------------------------
// Trees
// ---------------------------------------------------------------------------

/// Copy a directory hierarchy, aborting on the first error.
pub fn copy_recursive(src: &Path, dst: &Path) -> Result<(), FileError> {
    walk(src, dst, &copy)
}

/// Copy a directory hierarchy, skipping files whose destination is
/// already newer than the source.
pub fn copy_newer_recursive(src: &Path, dst: &Path) -> Result<(), FileError> {
    walk(src, dst, &copy_if_newer)
}

/// Move a directory hierarchy. A whole-tree rename is attempted first;
/// on failure the tree is moved file-by-file and emptied source
/// directories are removed.
pub fn move_recursive(src: &Path, dst: &Path) -> Result<(), FileError> {
    let meta = fs::symlink_metadata(src).map_err(|e| io_err(src, e))?;
    if !meta.is_dir() {
        return move_file(src, dst);
    }

    if fs::rename(src, dst).is_ok() {
        chown_to_effective(dst);
        return Ok(());
    }

    ensure_dir(dst, &meta)?;
    for entry in fs::read_dir(src).map_err(|e| io_err(src, e))? {
        let entry = entry.map_err(|e| io_err(src, e))?;
        move_recursive(&entry.path(), &dst.join(entry.file_name()))?;
    }
    fs::remove_dir(src).map_err(|e| io_err(src, e))
}

fn walk(
    src: &Path,
    dst: &Path,
    file_op: &dyn Fn(&Path, &Path) -> Result<(), FileError>,
) -> Result<(), FileError> {
    let meta = fs::symlink_metadata(src).map_err(|e| io_err(src, e))?;
    if !meta.is_dir() {
        return file_op(src, dst);
    }

    ensure_dir(dst, &meta)?;
    for entry in fs::read_dir(src).map_err(|e| io_err(src, e))? {
        let entry = entry.map_err(|e| io_err(src, e))?;
        walk(&entry.path(), &dst.join(entry.file_name()), file_op)?;
    }
    Ok(())
}

fn ensure_dir(dst: &Path, src_meta: &fs::Metadata) -> Result<(), FileError> {
    match fs::create_dir(dst) {
        Ok(()) => {
            #[cfg(unix)]
            {
                use std::os::unix::fs::MetadataExt;
                let _ = fs::set_permissions(
                    dst,
                    std::os::unix::fs::PermissionsExt::from_mode(src_meta.mode() & 0o7777),
                );
            }
            #[cfg(not(unix))]
            let _ = src_meta;
            Ok(())
        }
        Err(e) if e.kind() == io::ErrorKind::AlreadyExists => Ok(()),
        Err(e) => Err(io_err(dst, e)),
    }
}

fn copy_if_newer(src: &Path, dst: &Path) -> Result<(), FileError> {
    let src_meta = fs::symlink_metadata(src).map_err(|e| io_err(src, e))?;

    match fs::symlink_metadata(dst) {
        Ok(dst_meta) => {
            let src_mtime = FileTime::from_last_modification_time(&src_meta);
            let dst_mtime = FileTime::from_last_modification_time(&dst_meta);
            if dst_mtime > src_mtime {
                tracing::debug!(src = %src.display(), "destination is newer, skipping");
                return Ok(());
            }
        }
        Err(e) if e.kind() == io::ErrorKind::NotFound => {}
        Err(e) => return Err(io_err(dst, e)),
    }

    copy(src, dst)
}
