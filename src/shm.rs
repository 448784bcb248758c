//! Low-level POSIX shared memory operations

use crate::error::{ExchangeError, Result};
use crate::layout::{RawHeader, HEADER_SIZE};
use rustix::fd::OwnedFd;
use rustix::fs::{flock, fstat, ftruncate, FlockOperation};
use rustix::io::Errno;
use rustix::mm::{mmap, munmap, MapFlags, ProtFlags};
use rustix::shm::{shm_open, shm_unlink, Mode, ShmOFlags};
use std::ptr::NonNull;

/// Kernel object namespaces that have no POSIX counterpart
const NAMESPACE_PREFIXES: [&str; 2] = ["Global\\", "Local\\"];
const MAX_NAME_LEN: usize = 255;

/// Read/write for everyone, like the protocol's world-accessible objects
pub(crate) fn object_mode() -> Mode {
    Mode::RUSR | Mode::WUSR | Mode::RGRP | Mode::WGRP | Mode::ROTH | Mode::WOTH
}

/// Translate a protocol object name into a POSIX shared-memory name.
///
/// `Global\HWiNFO_SENS_SM2` becomes `/HWiNFO_SENS_SM2`.
pub fn object_name(name: &str) -> Result<String> {
    let bare = NAMESPACE_PREFIXES
        .iter()
        .find_map(|prefix| name.strip_prefix(prefix))
        .unwrap_or(name);

    let invalid = |reason| ExchangeError::InvalidName {
        name: name.to_string(),
        reason,
    };
    if bare.is_empty() {
        return Err(invalid("empty name"));
    }
    if bare.contains('/') || bare.contains('\0') {
        return Err(invalid("contains '/' or NUL"));
    }
    if bare.len() + 1 > MAX_NAME_LEN {
        return Err(invalid("longer than 255 bytes"));
    }
    Ok(format!("/{}", bare))
}

/// Handle to a mapped shared region
pub struct SharedRegion {
    fd: OwnedFd,
    addr: NonNull<u8>,
    size: usize,
    name: String,
    object_name: String,
    existed: bool,
    is_owner: bool,
}

// SAFETY: the mapping stays valid for the handle's lifetime; concurrent
// writers are serialized by the named mutex.
unsafe impl Send for SharedRegion {}
unsafe impl Sync for SharedRegion {}

impl SharedRegion {
    /// Create the region, or open it if it already exists.
    ///
    /// An existing region smaller than `size` is grown; a larger one is
    /// mapped whole. The contents of an existing region are left untouched.
    pub fn open_or_create(name: &str, size: usize) -> Result<Self> {
        let object_name = object_name(name)?;

        // Try to create exclusively first, fall back to open if exists
        let (fd, existed) = match shm_open(
            object_name.as_str(),
            ShmOFlags::CREATE | ShmOFlags::EXCL | ShmOFlags::RDWR,
            object_mode(),
        ) {
            Ok(fd) => (fd, false),
            Err(Errno::EXIST) => {
                let fd = shm_open(object_name.as_str(), ShmOFlags::RDWR, Mode::empty())
                    .map_err(|e| ExchangeError::allocation(name, e))?;
                (fd, true)
            }
            Err(e) => return Err(ExchangeError::allocation(name, e)),
        };

        let current = fstat(&fd)
            .map_err(|e| ExchangeError::allocation(name, e))?
            .st_size as usize;
        if current < size {
            ftruncate(&fd, size as u64).map_err(|e| ExchangeError::allocation(name, e))?;
        }
        let size = size.max(current);

        let addr = map(&fd, size, ProtFlags::READ | ProtFlags::WRITE)
            .map_err(|e| ExchangeError::allocation(name, e))?;

        Ok(Self {
            fd,
            addr,
            size,
            name: name.to_string(),
            object_name,
            existed,
            is_owner: false,
        })
    }

    /// Open an existing region for reading
    pub fn open_readonly(name: &str) -> Result<Self> {
        let object_name = object_name(name)?;

        let fd = shm_open(object_name.as_str(), ShmOFlags::RDONLY, Mode::empty()).map_err(|e| {
            if e == Errno::NOENT {
                ExchangeError::NotFound {
                    name: name.to_string(),
                }
            } else {
                ExchangeError::allocation(name, e)
            }
        })?;

        let size = fstat(&fd)
            .map_err(|e| ExchangeError::allocation(name, e))?
            .st_size as usize;
        if size < HEADER_SIZE {
            return Err(ExchangeError::invalid_format(
                name,
                format!("region is {} bytes, smaller than the header", size),
            ));
        }

        let addr = map(&fd, size, ProtFlags::READ).map_err(|e| ExchangeError::allocation(name, e))?;

        Ok(Self {
            fd,
            addr,
            size,
            name: name.to_string(),
            object_name,
            existed: true,
            is_owner: false,
        })
    }

    /// Read the header of an existing region without creating or mapping it.
    ///
    /// Returns `None` when no region exists or it is too small to hold a header.
    pub fn probe(name: &str) -> Result<Option<RawHeader>> {
        let object_name = object_name(name)?;

        let fd = match shm_open(object_name.as_str(), ShmOFlags::RDONLY, Mode::empty()) {
            Ok(fd) => fd,
            Err(Errno::NOENT) => return Ok(None),
            Err(e) => return Err(ExchangeError::allocation(name, e)),
        };

        let mut buf = [0u8; HEADER_SIZE];
        let read = rustix::io::pread(&fd, &mut buf, 0).map_err(|e| ExchangeError::allocation(name, e))?;
        if read < HEADER_SIZE {
            return Ok(None);
        }

        // SAFETY: RawHeader is packed plain data; every bit pattern is valid
        Ok(Some(unsafe { std::ptr::read_unaligned(buf.as_ptr().cast::<RawHeader>()) }))
    }

    /// Remove a region's name. Existing mappings stay valid.
    pub fn unlink(name: &str) -> Result<()> {
        let object_name = object_name(name)?;
        match shm_unlink(object_name.as_str()) {
            Ok(()) | Err(Errno::NOENT) => Ok(()),
            Err(e) => Err(ExchangeError::allocation(name, e)),
        }
    }

    /// Get raw pointer to shared memory
    #[inline(always)]
    pub fn as_ptr(&self) -> *mut u8 {
        self.addr.as_ptr()
    }

    /// Get size of the mapping
    #[inline(always)]
    pub fn size(&self) -> usize {
        self.size
    }

    /// Protocol name of the region
    #[inline(always)]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Whether the region existed before this handle opened it
    #[inline(always)]
    pub fn existed(&self) -> bool {
        self.existed
    }

    /// Check if this handle removes the region on drop
    #[inline(always)]
    pub fn is_owner(&self) -> bool {
        self.is_owner
    }

    /// Take ownership: the region's name is removed when this handle drops.
    pub fn set_owner(&mut self, owner: bool) {
        self.is_owner = owner;
    }

    /// Mark this handle as a live writer of the region.
    ///
    /// Writers hold a shared `flock` on the region for as long as they are
    /// mapped; the kernel drops it when the process exits.
    pub fn hold_shared(&self) -> Result<()> {
        flock(&self.fd, FlockOperation::NonBlockingLockShared)
            .map_err(|e| ExchangeError::allocation(&self.name, e))
    }

    /// Whether this handle is the region's only live writer.
    ///
    /// Upgrades this handle's lock to exclusive on success. On failure the
    /// shared lock may be lost, so only call this when letting go.
    pub fn is_last_writer(&self) -> Result<bool> {
        match flock(&self.fd, FlockOperation::NonBlockingLockExclusive) {
            Ok(()) => Ok(true),
            Err(Errno::WOULDBLOCK) => Ok(false),
            Err(e) => Err(ExchangeError::allocation(&self.name, e)),
        }
    }

    /// Whether the region's name has been removed since it was mapped
    pub fn is_unlinked(&self) -> bool {
        match fstat(&self.fd) {
            Ok(stat) => stat.st_nlink == 0,
            Err(_) => true,
        }
    }

    /// Copy the header out of the mapping
    pub fn read_header(&self) -> RawHeader {
        // SAFETY: every mapping is at least HEADER_SIZE bytes
        unsafe { std::ptr::read_unaligned(self.as_ptr().cast::<RawHeader>()) }
    }
}

fn map(fd: &OwnedFd, size: usize, prot: ProtFlags) -> rustix::io::Result<NonNull<u8>> {
    if size == 0 {
        return Err(Errno::INVAL);
    }
    // SAFETY: a fresh shared mapping of an fd we own; unmapped in Drop
    let addr = unsafe { mmap(std::ptr::null_mut(), size, prot, MapFlags::SHARED, fd, 0)? };
    NonNull::new(addr.cast::<u8>()).ok_or(Errno::INVAL)
}

impl Drop for SharedRegion {
    fn drop(&mut self) {
        // Unmap memory
        unsafe {
            let _ = munmap(self.addr.as_ptr().cast(), self.size);
        }

        // If owner, unlink the shared memory
        if self.is_owner {
            let _ = shm_unlink(self.object_name.as_str());
        }
    }
}
