// src/display/pixmap.rs

//! Host-side pixmaps whose storage the driver may redirect to shared memory.

use std::fmt;
use std::rc::Rc;

use crate::os::shm::ShmBuffer;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PixmapId(pub u32);

impl fmt::Display for PixmapId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Where a pixmap's pixels live.
pub enum PixmapStorage {
    /// Memory allocated and owned by the host.
    Host(Box<[u8]>),
    /// A shared buffer recorded in the pixmap buffer registry. The pixmap
    /// holds its own handle, so the mapping stays valid until the header is
    /// rewritten even if the registry lets go first.
    Shared(Rc<ShmBuffer>),
    /// No backing storage.
    Detached,
}

impl fmt::Debug for PixmapStorage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PixmapStorage::Host(data) => write!(f, "Host({} bytes)", data.len()),
            PixmapStorage::Shared(buffer) => write!(
                f,
                "Shared({} bytes at {:p}, fd {})",
                buffer.len(),
                buffer.as_ptr(),
                buffer.raw_fd()
            ),
            PixmapStorage::Detached => write!(f, "Detached"),
        }
    }
}

/// A drawable surface as the host server sees it: geometry plus a
/// storage header (stride and pixel pointer).
#[derive(Debug)]
pub struct Pixmap {
    pub id: PixmapId,
    pub width: u32,
    pub height: u32,
    pub bits_per_pixel: u32,
    /// Bytes per row.
    pub stride: usize,
    storage: PixmapStorage,
}

impl Pixmap {
    /// Creates a pixmap with zeroed host-owned storage.
    pub fn new(id: PixmapId, width: u32, height: u32, bits_per_pixel: u32) -> Self {
        let stride = width as usize * (bits_per_pixel as usize / 8);
        let data = vec![0u8; stride * height as usize].into_boxed_slice();
        Self {
            id,
            width,
            height,
            bits_per_pixel,
            stride,
            storage: PixmapStorage::Host(data),
        }
    }

    /// Packed size of the pixel data: width × height × bytes per pixel.
    pub fn byte_len(&self) -> usize {
        self.width as usize * self.height as usize * (self.bits_per_pixel as usize / 8)
    }

    pub fn storage(&self) -> &PixmapStorage {
        &self.storage
    }

    pub fn is_shared(&self) -> bool {
        matches!(self.storage, PixmapStorage::Shared(_))
    }

    pub fn pixels(&self) -> Option<&[u8]> {
        match &self.storage {
            PixmapStorage::Host(data) => Some(data),
            PixmapStorage::Shared(buffer) => Some(buffer.as_slice()),
            PixmapStorage::Detached => None,
        }
    }

    pub fn pixels_mut(&mut self) -> Option<&mut [u8]> {
        match &mut self.storage {
            PixmapStorage::Host(data) => Some(data),
            // SAFETY: the Rc keeps the mapping alive for the whole borrow;
            // `&mut self` makes this the only slice handed out by the pixmap.
            PixmapStorage::Shared(buffer) => Some(unsafe {
                std::slice::from_raw_parts_mut(buffer.as_ptr(), buffer.len())
            }),
            PixmapStorage::Detached => None,
        }
    }

    /// Rewrites the storage header and hands back the previous storage.
    /// Geometry and stride are left unchanged.
    pub(crate) fn modify_header(&mut self, storage: PixmapStorage) -> PixmapStorage {
        std::mem::replace(&mut self.storage, storage)
    }
}
