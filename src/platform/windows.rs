// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025-2026 natyamatsya contributors
//
// Windows implementation of the shared memory region (pagefile-backed file
// mapping) and the named cross-process mutex (kernel mutex). An abandoned
// kernel mutex is handed to the next waiter, so a crashed peer never leaves
// the region locked.

use std::io;
use std::ptr;

use windows_sys::Win32::Foundation::{
    CloseHandle, GetLastError, ERROR_ALREADY_EXISTS, FALSE, HANDLE, INVALID_HANDLE_VALUE,
    WAIT_ABANDONED, WAIT_OBJECT_0, WAIT_TIMEOUT,
};
use windows_sys::Win32::System::Memory::{
    CreateFileMappingW, MapViewOfFile, OpenFileMappingW, UnmapViewOfFile, FILE_MAP_ALL_ACCESS,
    PAGE_READWRITE,
};
use windows_sys::Win32::System::Threading::{CreateMutexW, ReleaseMutex, WaitForSingleObject};

fn to_wide(s: &str) -> Vec<u16> {
    s.encode_utf16().chain(std::iter::once(0)).collect()
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
    handle: HANDLE,
    mem: *mut u8,
    size: usize,
    did_create: bool,
}

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

        let wide_name = to_wide(name);

        // Open first: an existing mapping must never be re-created, since
        // CreateFileMapping on an existing name would succeed with
        // ERROR_ALREADY_EXISTS and alias whatever size it already has.
        let mut did_create = false;
        let mut handle =
            unsafe { OpenFileMappingW(FILE_MAP_ALL_ACCESS, FALSE, wide_name.as_ptr()) };

        if handle.is_null() {
            if mode == ShmMode::Open {
                return Err(io::Error::last_os_error());
            }
            handle = unsafe {
                CreateFileMappingW(
                    INVALID_HANDLE_VALUE,
                    ptr::null(),
                    PAGE_READWRITE,
                    0,
                    size as u32,
                    wide_name.as_ptr(),
                )
            };
            if !handle.is_null() && unsafe { GetLastError() } != ERROR_ALREADY_EXISTS {
                did_create = true;
            }
            // a racing creator may have beaten us; fall through with
            // did_create = false in that case
            if handle.is_null() {
                handle = unsafe { OpenFileMappingW(FILE_MAP_ALL_ACCESS, FALSE, wide_name.as_ptr()) };
            }
            if handle.is_null() {
                return Err(io::Error::last_os_error());
            }
        } else if mode == ShmMode::Create {
            unsafe { CloseHandle(handle) };
            return Err(io::Error::new(
                io::ErrorKind::AlreadyExists,
                "shared memory region already exists",
            ));
        }

        let mem = unsafe { MapViewOfFile(handle, FILE_MAP_ALL_ACCESS, 0, 0, size) };
        if mem.Value.is_null() {
            let e = io::Error::last_os_error();
            unsafe { CloseHandle(handle) };
            return Err(e);
        }

        Ok(Self {
            handle,
            mem: mem.Value as *mut u8,
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

    pub fn did_create(&self) -> bool {
        self.did_create
    }

    pub fn unlink_by_name(_name: &str) {
        // Pagefile-backed mappings vanish with their last handle; there is
        // no name to remove.
    }
}

impl Drop for PlatformShm {
    fn drop(&mut self) {
        if !self.mem.is_null() {
            unsafe {
                UnmapViewOfFile(windows_sys::Win32::System::Memory::MEMORY_MAPPED_VIEW_ADDRESS {
                    Value: self.mem as _,
                })
            };
        }
        if !self.handle.is_null() {
            unsafe { CloseHandle(self.handle) };
        }
    }
}

// ---------------------------------------------------------------------------
// PlatformMutex
// ---------------------------------------------------------------------------

pub struct PlatformMutex {
    handle: HANDLE,
}

unsafe impl Send for PlatformMutex {}
unsafe impl Sync for PlatformMutex {}

impl PlatformMutex {
    pub fn open(name: &str) -> io::Result<Self> {
        let full_name = format!("Global\\{name}Mutex");
        let wide_name = to_wide(&full_name);
        let handle = unsafe { CreateMutexW(ptr::null(), FALSE, wide_name.as_ptr()) };
        if handle.is_null() {
            return Err(io::Error::last_os_error());
        }
        Ok(Self { handle })
    }

    /// Acquire with a millisecond deadline. Returns false on timeout. An
    /// abandoned mutex (previous owner died while holding it) counts as
    /// acquired; the header write ordering keeps partially written events
    /// invisible to readers.
    pub fn lock_timeout(&self, timeout_ms: u64) -> io::Result<bool> {
        let code = unsafe { WaitForSingleObject(self.handle, timeout_ms as u32) };
        match code {
            WAIT_OBJECT_0 | WAIT_ABANDONED => Ok(true),
            WAIT_TIMEOUT => Ok(false),
            _ => Err(io::Error::last_os_error()),
        }
    }

    pub fn unlock(&self) -> io::Result<()> {
        if unsafe { ReleaseMutex(self.handle) } == 0 {
            return Err(io::Error::last_os_error());
        }
        Ok(())
    }

    pub fn dispose(&self) {}
}

impl Drop for PlatformMutex {
    fn drop(&mut self) {
        if !self.handle.is_null() {
            unsafe { CloseHandle(self.handle) };
        }
    }
}
