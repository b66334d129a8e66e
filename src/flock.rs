use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

use crate::error::{Error, Result};

const LOCK_FILE: &str = ".lock";

/// Exclusive ownership of a database directory, held through an OS
/// advisory lock on its `.lock` file.
///
/// Advisory locks die with their process, so a crashed owner never wedges
/// the directory; the file itself stays behind and records the last
/// holder's pid. A directory owned by a live process surfaces as
/// `AlreadyOpen`. The lock releases when the `DirLock` drops.
pub struct DirLock {
    _file: File,
    path: PathBuf,
}

impl DirLock {
    /// Claims `dir` for this process, creating the lock file if needed.
    pub fn acquire(dir: &Path) -> Result<DirLock> {
        let path = dir.join(LOCK_FILE);
        let mut file = OpenOptions::new().create(true).write(true).open(&path)?;

        if !try_exclusive(&file)? {
            return Err(Error::AlreadyOpen);
        }

        // Ours now; stamp the file so a stale directory shows who held it
        // last. The stamp happens only after the lock is won, which keeps
        // a losing opener from clobbering the owner's pid.
        file.set_len(0)?;
        writeln!(file, "{}", std::process::id())?;
        file.flush()?;

        Ok(DirLock { _file: file, path })
    }

    /// The lock file backing this claim.
    pub fn path(&self) -> &Path {
        &self.path
    }
}

/// One non-blocking attempt at the exclusive lock. `Ok(false)` means a
/// live process holds it; an `Err` is a real fault on the lock file.
#[cfg(unix)]
fn try_exclusive(file: &File) -> Result<bool> {
    use std::os::unix::io::AsRawFd;

    if unsafe { libc::flock(file.as_raw_fd(), libc::LOCK_EX | libc::LOCK_NB) } == 0 {
        return Ok(true);
    }
    let err = std::io::Error::last_os_error();
    match err.kind() {
        std::io::ErrorKind::WouldBlock => Ok(false),
        _ => Err(err.into()),
    }
}

#[cfg(windows)]
fn try_exclusive(file: &File) -> Result<bool> {
    use std::os::windows::io::AsRawHandle;
    use winapi::um::fileapi::LockFileEx;
    use winapi::um::winnt::{LOCKFILE_EXCLUSIVE_LOCK, LOCKFILE_FAIL_IMMEDIATELY};

    const ERROR_LOCK_VIOLATION: i32 = 33;

    let won = unsafe {
        LockFileEx(
            file.as_raw_handle() as *mut _,
            LOCKFILE_EXCLUSIVE_LOCK | LOCKFILE_FAIL_IMMEDIATELY,
            0,
            !0,
            !0,
            std::ptr::null_mut(),
        )
    } != 0;
    if won {
        return Ok(true);
    }
    let err = std::io::Error::last_os_error();
    if err.raw_os_error() == Some(ERROR_LOCK_VIOLATION) {
        Ok(false)
    } else {
        Err(err.into())
    }
}

#[cfg(not(any(unix, windows)))]
fn try_exclusive(_file: &File) -> Result<bool> {
    Ok(true)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_acquire_stamps_pid() -> Result<()> {
        let dir = tempfile::tempdir().expect("tempdir");

        let lock = DirLock::acquire(dir.path())?;
        assert_eq!(lock.path(), dir.path().join(LOCK_FILE).as_path());

        let stamp = std::fs::read_to_string(lock.path())?;
        assert_eq!(stamp.trim(), std::process::id().to_string());
        Ok(())
    }

    #[test]
    fn test_contended_directory_is_already_open() -> Result<()> {
        let dir = tempfile::tempdir().expect("tempdir");

        let _held = DirLock::acquire(dir.path())?;
        match DirLock::acquire(dir.path()).err() {
            Some(Error::AlreadyOpen) => {}
            other => panic!("expected AlreadyOpen, got {other:?}"),
        }
        Ok(())
    }

    #[test]
    fn test_losing_acquire_keeps_owner_stamp() -> Result<()> {
        let dir = tempfile::tempdir().expect("tempdir");

        let lock = DirLock::acquire(dir.path())?;
        let _ = DirLock::acquire(dir.path());

        // The failed attempt must not have truncated the owner's stamp.
        let stamp = std::fs::read_to_string(lock.path())?;
        assert_eq!(stamp.trim(), std::process::id().to_string());
        Ok(())
    }

    #[test]
    fn test_reacquire_after_drop() -> Result<()> {
        let dir = tempfile::tempdir().expect("tempdir");

        {
            let _lock = DirLock::acquire(dir.path())?;
        }

        // The lock file survives, but the claim itself died with the handle.
        assert!(dir.path().join(LOCK_FILE).exists());
        DirLock::acquire(dir.path())?;
        Ok(())
    }
}
