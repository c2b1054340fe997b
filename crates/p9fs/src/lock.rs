//! FS Lock (C1): the single point of serialization around the FAT32 volume.
//!
//! Plan 9's 9P handlers run against a shared mutable filesystem, so every
//! operation that touches the volume takes this lock first. A plain
//! `tokio::sync::Mutex` models the "scoped acquisition, guaranteed release"
//! contract spec.md 4.1 asks for: the guard is dropped (and the lock
//! released) at the end of the scope that acquired it, including on an
//! early `?` return. Acquisition is always bounded by
//! [`Config::fs_lock_timeout_ms`](crate::config::Config), surfacing as
//! [`Error::Io`] on expiry, matching spec.md's "timeout -> io error" rule.
//!
//! The volume itself is a [`fatfs::FileSystem`] over a `std::fs::File`
//! (grounded on `fatfs`'s own "std" adapter rather than the unsafe
//! `DiskCursor`-over-raw-block-device approach `ChenRuiwei-Phoenix`'s
//! `fatfs_shim.rs` uses for its no_std kernel — this server runs hosted, so
//! the std adapter is the idiomatic choice). A real MCU port would swap
//! this one type out for a `fatfs` storage impl over the SD card driver;
//! nothing above this module would need to change.

use std::time::Duration;

use fatfs::{FileSystem, FsOptions, StdIoWrapper};
use tokio::sync::{Mutex, MutexGuard};

use crate::error::{Error, Result};

pub type Volume = FileSystem<StdIoWrapper<std::fs::File>>;

pub struct FatLock {
    fs: Mutex<Volume>,
    timeout: Duration,
}

impl FatLock {
    pub fn open(file: std::fs::File, timeout: Duration) -> Result<FatLock> {
        let fs = FileSystem::new(file, FsOptions::new())?;
        Ok(FatLock {
            fs: Mutex::new(fs),
            timeout,
        })
    }

    /// Acquire the lock, bounded by the configured timeout.
    pub async fn lock(&self) -> Result<MutexGuard<'_, Volume>> {
        tokio::time::timeout(self.timeout, self.fs.lock())
            .await
            .map_err(|_| Error::Io(std::io::Error::new(std::io::ErrorKind::TimedOut, "fs lock timeout")))
    }

    /// Best-effort readiness probe, per spec.md 4.1's `is_ready` operation.
    pub fn is_ready(&self) -> bool {
        self.fs.try_lock().is_ok()
    }
}
