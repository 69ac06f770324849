// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025-2026 tslock contributors
//
// POSIX primitives backing the table store: a MAP_SHARED file mapping,
// an flock(2) guard for the store's exclusive-access scope, and the
// kill(pid, 0) liveness probe.

use std::fs::File;
use std::io;
use std::os::unix::io::AsRawFd;
use std::ptr;

// ---------------------------------------------------------------------------
// PlatformMap: read/write shared mapping of a whole file
// ---------------------------------------------------------------------------

pub struct PlatformMap {
    mem: *mut u8,
    size: usize,
}

// Safety: the mapping is MAP_SHARED across processes; every mutable word in
// it is accessed through atomics.
unsafe impl Send for PlatformMap {}
unsafe impl Sync for PlatformMap {}

impl PlatformMap {
    /// Map the first `size` bytes of `file` read-write, shared.
    pub fn map(file: &File, size: usize) -> io::Result<Self> {
        if size == 0 {
            return Err(io::Error::new(io::ErrorKind::InvalidInput, "size is 0"));
        }
        let mem = unsafe {
            libc::mmap(
                ptr::null_mut(),
                size,
                libc::PROT_READ | libc::PROT_WRITE,
                libc::MAP_SHARED,
                file.as_raw_fd(),
                0,
            )
        };
        if mem == libc::MAP_FAILED {
            return Err(io::Error::last_os_error());
        }
        Ok(Self {
            mem: mem as *mut u8,
            size,
        })
    }

    pub fn as_ptr(&self) -> *const u8 {
        self.mem
    }

    pub fn as_mut_ptr(&self) -> *mut u8 {
        self.mem
    }

    pub fn len(&self) -> usize {
        self.size
    }

    /// Schedule write-back of dirty pages without blocking.
    pub fn flush_async(&self) -> io::Result<()> {
        let ret = unsafe { libc::msync(self.mem as *mut libc::c_void, self.size, libc::MS_ASYNC) };
        if ret != 0 {
            return Err(io::Error::last_os_error());
        }
        Ok(())
    }
}

impl Drop for PlatformMap {
    fn drop(&mut self) {
        if self.mem.is_null() {
            return;
        }
        unsafe { libc::munmap(self.mem as *mut libc::c_void, self.size) };
    }
}

// ---------------------------------------------------------------------------
// FileLock: flock(LOCK_EX) held until drop
// ---------------------------------------------------------------------------

/// Exclusive advisory lock on an open file description.
///
/// The kernel drops the lock when the owning process dies, so a crash inside
/// the exclusive scope never wedges the store.
pub struct FileLock<'a> {
    file: &'a File,
}

impl<'a> FileLock<'a> {
    pub fn exclusive(file: &'a File) -> io::Result<Self> {
        loop {
            let ret = unsafe { libc::flock(file.as_raw_fd(), libc::LOCK_EX) };
            if ret == 0 {
                return Ok(Self { file });
            }
            let err = io::Error::last_os_error();
            if err.raw_os_error() != Some(libc::EINTR) {
                return Err(err);
            }
        }
    }
}

impl<'a> Drop for FileLock<'a> {
    fn drop(&mut self) {
        unsafe { libc::flock(self.file.as_raw_fd(), libc::LOCK_UN) };
    }
}

// ---------------------------------------------------------------------------
// Processes
// ---------------------------------------------------------------------------

/// Whether `pid` names a running (or at least not yet reaped) process.
///
/// `EPERM` means the process exists but belongs to another user, so it
/// counts as alive. Ids that cannot be a `pid_t` are never alive.
pub fn is_pid_alive(pid: i64) -> bool {
    if pid <= 0 || pid > libc::pid_t::MAX as i64 {
        return false;
    }
    let ret = unsafe { libc::kill(pid as libc::pid_t, 0) };
    ret == 0 || io::Error::last_os_error().raw_os_error() != Some(libc::ESRCH)
}

pub fn current_pid() -> i64 {
    unsafe { libc::getpid() as i64 }
}
