// src/os/shm.rs

//! Anonymous shared-memory segments for window buffers.
//!
//! A segment is a temp file (or memfd) sized to the request and mapped
//! `MAP_SHARED` read/write, so another process mapping the same descriptor
//! sees every write. The temp file's directory entry is removed as soon as
//! the mapping attempt finishes; afterwards the open descriptor is the only
//! handle to the memory.
//!
//! Each step's resource is held by an owning guard, so an early return at any
//! step releases everything acquired before it.

use std::ffi::{CString, OsString};
use std::fmt;
use std::io;
use std::os::unix::ffi::OsStringExt;
use std::os::unix::io::{AsFd, AsRawFd, BorrowedFd, FromRawFd, OwnedFd, RawFd};
use std::path::PathBuf;
use std::ptr::NonNull;

use libc::c_void;
use log::{debug, error, trace, warn};

use crate::config::{ShmBackend, ShmConfig};
use crate::error::{AllocStep, DriverError, Result};

const TEMPLATE_SUFFIX: &str = "XXXXXX";
const MEMFD_NAME: &str = "wlshm-buffer";

// --- Mapping ---

/// A live `mmap` region. Unmapped on drop.
struct Mapping {
    ptr: NonNull<u8>,
    len: usize,
}

impl Mapping {
    fn new(fd: BorrowedFd<'_>, len: usize, prot: libc::c_int) -> io::Result<Self> {
        let ptr = unsafe {
            libc::mmap(
                std::ptr::null_mut(),
                len,
                prot,
                libc::MAP_SHARED,
                fd.as_raw_fd(),
                0,
            )
        };
        // MAP_FAILED, not null, is the failure sentinel.
        if ptr == libc::MAP_FAILED {
            return Err(io::Error::last_os_error());
        }
        let ptr = NonNull::new(ptr as *mut u8)
            .ok_or_else(|| io::Error::new(io::ErrorKind::Other, "mmap returned address 0"))?;
        Ok(Self { ptr, len })
    }
}

impl Drop for Mapping {
    fn drop(&mut self) {
        if unsafe { libc::munmap(self.ptr.as_ptr() as *mut c_void, self.len) } == -1 {
            warn!(
                "munmap of {} bytes at {:p} failed: {}",
                self.len,
                self.ptr,
                io::Error::last_os_error()
            );
        } else {
            trace!("Unmapped {} bytes at {:p}", self.len, self.ptr);
        }
    }
}

// --- Path guard ---

/// Removes the temp file's directory entry when dropped.
struct UnlinkGuard(PathBuf);

impl Drop for UnlinkGuard {
    fn drop(&mut self) {
        if let Err(e) = nix::unistd::unlink(self.0.as_path()) {
            warn!("Failed to unlink {}: {}", self.0.display(), e);
        } else {
            trace!("Unlinked {}", self.0.display());
        }
    }
}

// --- Allocation steps ---

fn create_temp_file(template: &str) -> io::Result<(OwnedFd, UnlinkGuard)> {
    if !template.ends_with(TEMPLATE_SUFFIX) {
        return Err(io::Error::new(
            io::ErrorKind::InvalidInput,
            format!("template {:?} must end in {}", template, TEMPLATE_SUFFIX),
        ));
    }
    let mut buf = CString::new(template)
        .map_err(|e| io::Error::new(io::ErrorKind::InvalidInput, e))?
        .into_bytes_with_nul();

    let fd = unsafe { libc::mkostemp(buf.as_mut_ptr() as *mut libc::c_char, libc::O_CLOEXEC) };
    if fd < 0 {
        return Err(io::Error::last_os_error());
    }
    let owned = unsafe { OwnedFd::from_raw_fd(fd) };

    buf.pop(); // trailing NUL
    let path = PathBuf::from(OsString::from_vec(buf));
    debug!("Created shm backing file {} (fd {})", path.display(), fd);
    Ok((owned, UnlinkGuard(path)))
}

fn create_memfd() -> io::Result<OwnedFd> {
    let name = CString::new(MEMFD_NAME).map_err(|e| io::Error::new(io::ErrorKind::InvalidInput, e))?;
    let fd = unsafe { libc::memfd_create(name.as_ptr(), libc::MFD_CLOEXEC) };
    if fd < 0 {
        return Err(io::Error::last_os_error());
    }
    debug!("Created memfd {} (fd {})", MEMFD_NAME, fd);
    Ok(unsafe { OwnedFd::from_raw_fd(fd) })
}

fn resize(fd: BorrowedFd<'_>, len: usize) -> io::Result<()> {
    let len = libc::off_t::try_from(len).map_err(|_| io::Error::from_raw_os_error(libc::EFBIG))?;
    if unsafe { libc::ftruncate(fd.as_raw_fd(), len) } < 0 {
        return Err(io::Error::last_os_error());
    }
    Ok(())
}

// --- ShmBuffer ---

/// An anonymous shared-memory segment mapped read/write into this process.
///
/// Field order matters: the mapping is released before the descriptor.
pub struct ShmBuffer {
    mapping: Mapping,
    fd: OwnedFd,
}

impl ShmBuffer {
    /// Creates, sizes and maps a segment of exactly `len` bytes.
    ///
    /// Each failing step is reported with its own [`AllocStep`]; the
    /// descriptor and temp path acquired by earlier steps are released
    /// before the error is returned.
    pub fn allocate(len: usize, config: &ShmConfig) -> Result<Self> {
        let (fd, _unlink) = match config.backend {
            ShmBackend::TempFile => {
                let (fd, guard) = create_temp_file(&config.template).map_err(|e| {
                    error!("open {} failed: {}", config.template, e);
                    DriverError::resource(AllocStep::Create, e)
                })?;
                (fd, Some(guard))
            }
            ShmBackend::Memfd => {
                let fd = create_memfd().map_err(|e| {
                    error!("memfd_create failed: {}", e);
                    DriverError::resource(AllocStep::Create, e)
                })?;
                (fd, None)
            }
        };

        resize(fd.as_fd(), len).map_err(|e| {
            error!("ftruncate to {} bytes failed: {}", len, e);
            DriverError::resource(AllocStep::Resize, e)
        })?;

        let mapping = Mapping::new(fd.as_fd(), len, libc::PROT_READ | libc::PROT_WRITE)
            .map_err(|e| {
                error!("mmap of {} bytes failed: {}", len, e);
                DriverError::resource(AllocStep::Map, e)
            })?;

        debug!(
            "Allocated shm buffer: fd {}, {} bytes at {:p}",
            fd.as_raw_fd(),
            len,
            mapping.ptr
        );
        Ok(Self { mapping, fd })
    }

    pub fn len(&self) -> usize {
        self.mapping.len
    }

    pub fn is_empty(&self) -> bool {
        self.mapping.len == 0
    }

    pub fn raw_fd(&self) -> RawFd {
        self.fd.as_raw_fd()
    }

    pub fn as_ptr(&self) -> *mut u8 {
        self.mapping.ptr.as_ptr()
    }

    pub fn as_slice(&self) -> &[u8] {
        unsafe { std::slice::from_raw_parts(self.mapping.ptr.as_ptr(), self.mapping.len) }
    }

    pub fn as_mut_slice(&mut self) -> &mut [u8] {
        unsafe { std::slice::from_raw_parts_mut(self.mapping.ptr.as_ptr(), self.mapping.len) }
    }
}

impl AsFd for ShmBuffer {
    fn as_fd(&self) -> BorrowedFd<'_> {
        self.fd.as_fd()
    }
}

impl fmt::Debug for ShmBuffer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ShmBuffer")
            .field("fd", &self.fd.as_raw_fd())
            .field("ptr", &self.mapping.ptr)
            .field("len", &self.mapping.len)
            .finish()
    }
}

// --- Read-only view ---

/// A read-only mapping of someone else's segment, as a compositor holds it.
/// Owns a duplicate of the descriptor.
pub struct ShmView {
    mapping: Mapping,
    fd: OwnedFd,
}

impl ShmView {
    pub fn map(fd: BorrowedFd<'_>, len: usize) -> io::Result<Self> {
        let fd = fd.try_clone_to_owned()?;
        let mapping = Mapping::new(fd.as_fd(), len, libc::PROT_READ)?;
        Ok(Self { mapping, fd })
    }

    pub fn raw_fd(&self) -> RawFd {
        self.fd.as_raw_fd()
    }

    pub fn as_slice(&self) -> &[u8] {
        unsafe { std::slice::from_raw_parts(self.mapping.ptr.as_ptr(), self.mapping.len) }
    }
}

impl fmt::Debug for ShmView {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ShmView")
            .field("fd", &self.fd.as_raw_fd())
            .field("len", &self.mapping.len)
            .finish()
    }
}
