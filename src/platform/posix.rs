// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025-2026 natyamatsya contributors
//
// POSIX implementation of the shared memory region and the named
// cross-process mutex.
//
// The mutex is a lock file in a well-known temporary directory, held with
// flock(). The kernel drops the lock when the holding process dies, so a
// crashed peer never leaves the region locked. flock locks are per open
// file description: each acquisition opens its own descriptor, which also
// serializes threads within one process.

use std::ffi::CString;
use std::io;
use std::path::PathBuf;
use std::ptr;
use std::sync::atomic::{AtomicI32, Ordering};
use std::time::{Duration, Instant};

/// Directory holding lock files for named mutexes.
fn lock_dir() -> PathBuf {
    std::env::temp_dir().join("mirrorbus")
}

// ---------------------------------------------------------------------------
// Shared memory name mangling
// ---------------------------------------------------------------------------

fn fnv1a_64(data: &[u8]) -> u64 {
    let mut hash: u64 = 0xcbf29ce484222325;
    for &b in data {
        hash ^= b as u64;
        hash = hash.wrapping_mul(0x100000001b3);
    }
    hash
}

/// Maximum POSIX shm name length. macOS caps names at PSHMNAMLEN (31);
/// elsewhere no truncation is applied.
#[cfg(target_os = "macos")]
const SHM_NAME_MAX: usize = 31;

#[cfg(not(target_os = "macos"))]
const SHM_NAME_MAX: usize = 0;

/// Produce a POSIX shm-safe name with a leading '/'. Names longer than the
/// platform limit are shortened to a prefix plus a 16-hex-digit FNV-1a hash
/// so they stay unique and somewhat recognizable in `ls /dev/shm`.
pub(crate) fn posix_shm_name(name: &str) -> String {
    let full = if name.starts_with('/') {
        name.to_string()
    } else {
        format!("/{name}")
    };

    if SHM_NAME_MAX == 0 || full.len() <= SHM_NAME_MAX {
        return full;
    }

    const HASH_SUFFIX_LEN: usize = 1 + 16;
    let prefix_len = SHM_NAME_MAX.saturating_sub(HASH_SUFFIX_LEN + 1);
    let hash = fnv1a_64(full.as_bytes());

    let body = &full[1..];
    let take = prefix_len.min(body.len());
    format!("/{}_{hash:016x}", &body[..take])
}

// ---------------------------------------------------------------------------
// PlatformShm
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShmMode {
    Create,
    Open,
    CreateOrOpen,
}

pub struct PlatformShm {
    mem: *mut u8,
    size: usize,
    did_create: bool,
}

// The region is cross-process shared by design; all mutation is coordinated
// by the stream mutex or by in-place atomics.
unsafe impl Send for PlatformShm {}
unsafe impl Sync for PlatformShm {}

impl PlatformShm {
    pub fn acquire(name: &str, size: usize, mode: ShmMode) -> io::Result<Self> {
        if name.is_empty() {
            return Err(io::Error::new(io::ErrorKind::InvalidInput, "name is empty"));
        }
        if size == 0 {
            return Err(io::Error::new(io::ErrorKind::InvalidInput, "size is 0"));
        }

        let posix_name = posix_shm_name(name);
        let c_name = CString::new(posix_name.as_bytes())
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidInput, e))?;

        let perms: libc::mode_t = 0o666;

        // Exclusive create first so ftruncate only runs on a region we own;
        // truncating an existing region would zero a live changelog.
        let (fd, did_create) = match mode {
            ShmMode::Create => {
                let f = unsafe {
                    libc::shm_open(
                        c_name.as_ptr(),
                        libc::O_RDWR | libc::O_CREAT | libc::O_EXCL,
                        perms as libc::c_uint,
                    )
                };
                if f == -1 {
                    return Err(io::Error::last_os_error());
                }
                (f, true)
            }
            ShmMode::Open => {
                let f =
                    unsafe { libc::shm_open(c_name.as_ptr(), libc::O_RDWR, perms as libc::c_uint) };
                if f == -1 {
                    return Err(io::Error::last_os_error());
                }
                (f, false)
            }
            ShmMode::CreateOrOpen => {
                let f = unsafe {
                    libc::shm_open(
                        c_name.as_ptr(),
                        libc::O_RDWR | libc::O_CREAT | libc::O_EXCL,
                        perms as libc::c_uint,
                    )
                };
                if f != -1 {
                    (f, true)
                } else {
                    let e = io::Error::last_os_error();
                    if e.raw_os_error() != Some(libc::EEXIST) {
                        return Err(e);
                    }
                    let f2 = unsafe {
                        libc::shm_open(c_name.as_ptr(), libc::O_RDWR, perms as libc::c_uint)
                    };
                    if f2 == -1 {
                        return Err(io::Error::last_os_error());
                    }
                    (f2, false)
                }
            }
        };

        unsafe { libc::fchmod(fd, perms) };

        if did_create {
            let ret = unsafe { libc::ftruncate(fd, size as libc::off_t) };
            if ret != 0 {
                let err = io::Error::last_os_error();
                unsafe {
                    libc::close(fd);
                    libc::shm_unlink(c_name.as_ptr());
                }
                return Err(err);
            }
        }

        let mem = unsafe {
            libc::mmap(
                ptr::null_mut(),
                size,
                libc::PROT_READ | libc::PROT_WRITE,
                libc::MAP_SHARED,
                fd,
                0,
            )
        };
        unsafe { libc::close(fd) };

        if mem == libc::MAP_FAILED {
            return Err(io::Error::last_os_error());
        }

        Ok(Self {
            mem: mem as *mut u8,
            size,
            did_create,
        })
    }

    pub fn as_mut_ptr(&self) -> *mut u8 {
        self.mem
    }

    pub fn size(&self) -> usize {
        self.size
    }

    /// True if this handle created the region rather than opening an
    /// existing one.
    pub fn did_create(&self) -> bool {
        self.did_create
    }

    /// Remove the named backing object. Existing mappings stay valid; the
    /// name becomes available for a fresh region.
    pub fn unlink_by_name(name: &str) {
        let posix_name = posix_shm_name(name);
        if let Ok(c_name) = CString::new(posix_name.as_bytes()) {
            unsafe { libc::shm_unlink(c_name.as_ptr()) };
        }
    }
}

impl Drop for PlatformShm {
    fn drop(&mut self) {
        if !self.mem.is_null() {
            unsafe { libc::munmap(self.mem as *mut libc::c_void, self.size) };
        }
        // The region stays linked on purpose: peers detect abandonment
        // through the header heartbeat, not through unlink.
    }
}

// ---------------------------------------------------------------------------
// PlatformMutex
// ---------------------------------------------------------------------------

pub struct PlatformMutex {
    lock_file_path: PathBuf,
    // descriptor currently holding the lock, or -1
    locked_fd: AtomicI32,
}

unsafe impl Send for PlatformMutex {}
unsafe impl Sync for PlatformMutex {}

impl PlatformMutex {
    pub fn open(name: &str) -> io::Result<Self> {
        let dir = lock_dir();
        std::fs::create_dir_all(&dir)?;
        let lock_file_path = dir.join(format!("{name}.lock"));

        // touch the lock file so later opens never race on creation
        let c_path = path_cstring(&lock_file_path)?;
        let fd = unsafe { libc::open(c_path.as_ptr(), libc::O_CREAT | libc::O_RDWR, 0o666) };
        if fd == -1 {
            return Err(io::Error::last_os_error());
        }
        unsafe { libc::close(fd) };

        Ok(Self {
            lock_file_path,
            locked_fd: AtomicI32::new(-1),
        })
    }

    fn try_lock(&self) -> io::Result<bool> {
        let c_path = path_cstring(&self.lock_file_path)?;
        let fd = unsafe { libc::open(c_path.as_ptr(), libc::O_RDWR) };
        if fd == -1 {
            return Err(io::Error::last_os_error());
        }

        let ret = unsafe { libc::flock(fd, libc::LOCK_EX | libc::LOCK_NB) };
        if ret == 0 {
            self.locked_fd.store(fd, Ordering::Release);
            return Ok(true);
        }

        let err = io::Error::last_os_error();
        unsafe { libc::close(fd) };
        if err.raw_os_error() == Some(libc::EWOULDBLOCK) {
            Ok(false)
        } else {
            Err(err)
        }
    }

    /// Acquire with a millisecond deadline, polling at 1 ms intervals.
    /// Returns false on timeout.
    pub fn lock_timeout(&self, timeout_ms: u64) -> io::Result<bool> {
        if self.try_lock()? {
            return Ok(true);
        }
        if timeout_ms == 0 {
            return Ok(false);
        }

        let deadline = Instant::now() + Duration::from_millis(timeout_ms);
        loop {
            std::thread::sleep(Duration::from_millis(1));
            if self.try_lock()? {
                return Ok(true);
            }
            if Instant::now() >= deadline {
                return Ok(false);
            }
        }
    }

    pub fn unlock(&self) -> io::Result<()> {
        let fd = self.locked_fd.swap(-1, Ordering::AcqRel);
        if fd == -1 {
            return Ok(());
        }
        let ret = unsafe { libc::flock(fd, libc::LOCK_UN) };
        let err = if ret != 0 {
            Some(io::Error::last_os_error())
        } else {
            None
        };
        unsafe { libc::close(fd) };
        match err {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    pub fn dispose(&self) {
        let _ = self.unlock();
    }
}

impl Drop for PlatformMutex {
    fn drop(&mut self) {
        self.dispose();
        // The lock file itself is left in place for other peers.
    }
}

fn path_cstring(path: &std::path::Path) -> io::Result<CString> {
    use std::os::unix::ffi::OsStrExt;
    CString::new(path.as_os_str().as_bytes())
        .map_err(|e| io::Error::new(io::ErrorKind::InvalidInput, e))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn shm_name_gets_leading_slash() {
        assert_eq!(posix_shm_name("foo"), "/foo");
        assert_eq!(posix_shm_name("/bar"), "/bar");
    }

    #[test]
    fn mutex_excludes_second_acquire() {
        let m = PlatformMutex::open("mirrorbus_test_posix_mutex").unwrap();
        assert!(m.lock_timeout(100).unwrap());

        // a second handle on the same name must time out while held
        let m2 = PlatformMutex::open("mirrorbus_test_posix_mutex").unwrap();
        assert!(!m2.lock_timeout(5).unwrap());

        m.unlock().unwrap();
        assert!(m2.lock_timeout(100).unwrap());
        m2.unlock().unwrap();
    }

    #[test]
    fn shm_create_then_open() {
        let name = "mirrorbus_test_posix_shm";
        PlatformShm::unlink_by_name(name);

        let a = PlatformShm::acquire(name, 256, ShmMode::CreateOrOpen).unwrap();
        assert!(a.did_create());
        unsafe { a.as_mut_ptr().write(0xAB) };

        let b = PlatformShm::acquire(name, 256, ShmMode::CreateOrOpen).unwrap();
        assert!(!b.did_create());
        assert_eq!(unsafe { b.as_mut_ptr().read() }, 0xAB);

        PlatformShm::unlink_by_name(name);
    }
}
