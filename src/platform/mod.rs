// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025-2026 natyamatsya contributors

#[cfg(unix)]
pub mod posix;

#[cfg(windows)]
pub mod windows;

// Re-export the platform-specific implementations under a uniform name.

#[cfg(unix)]
pub use posix::{PlatformMutex, PlatformShm, ShmMode};

#[cfg(windows)]
pub use windows::{PlatformMutex, PlatformShm, ShmMode};
