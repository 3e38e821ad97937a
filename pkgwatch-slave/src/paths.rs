use std::path::{Path, PathBuf};
use std::time::Duration;

/// Quiet period after the last cache change before the slave asks the
/// client to reload.
pub const RELOAD_DELAY: Duration = Duration::from_secs(60);

pub fn private_root(home: &Path) -> PathBuf {
    home.join(".pkgwatch")
}

/// Per-user mirror of the system list directory, used when the real
/// one is not writable.
pub fn private_list_dir(home: &Path) -> PathBuf {
    private_root(home).join("lists")
}

/// Per-user staging area for downloaded archives.
pub fn private_archive_dir(home: &Path) -> PathBuf {
    private_root(home).join("archives")
}

/// True when the current effective user can create entries in `dir`.
#[cfg(unix)]
pub fn dir_writable(dir: &Path) -> bool {
    use std::ffi::CString;
    use std::os::unix::ffi::OsStrExt;

    let Ok(path) = CString::new(dir.as_os_str().as_bytes()) else {
        return false;
    };
    unsafe { libc::access(path.as_ptr(), libc::W_OK | libc::X_OK) == 0 }
}

#[cfg(not(unix))]
pub fn dir_writable(dir: &Path) -> bool {
    std::fs::metadata(dir)
        .map(|meta| !meta.permissions().readonly())
        .unwrap_or(false)
}
