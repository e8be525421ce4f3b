// src/display/registry.rs

//! Side-table from pixmap identity to the shared buffer backing it.
//!
//! At most one buffer is associated with a pixmap. The registry and the
//! pixmap's storage header share each buffer; it is unmapped and closed once
//! both have let go.

use std::collections::HashMap;
use std::rc::Rc;

use log::{debug, warn};

use crate::display::pixmap::{Pixmap, PixmapId, PixmapStorage};
use crate::error::{DriverError, Result};
use crate::os::shm::ShmBuffer;

#[derive(Debug, Default)]
pub struct PixmapRegistry {
    buffers: HashMap<PixmapId, Rc<ShmBuffer>>,
}

impl PixmapRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records `buffer` as the backing of `pixmap` and points the pixmap's
    /// storage header at the mapped memory.
    ///
    /// Returns the pixmap's previous storage, which belongs to the host.
    /// Fails without touching the pixmap if it already has a buffer; the
    /// rejected buffer is released.
    pub fn attach(&mut self, pixmap: &mut Pixmap, buffer: ShmBuffer) -> Result<PixmapStorage> {
        if self.buffers.contains_key(&pixmap.id) {
            return Err(DriverError::AlreadyAttached(pixmap.id));
        }

        let buffer = Rc::new(buffer);
        let previous = pixmap.modify_header(PixmapStorage::Shared(Rc::clone(&buffer)));
        debug!(
            "Attached shm buffer (fd {}, {} bytes) to pixmap {}",
            buffer.raw_fd(),
            buffer.len(),
            pixmap.id
        );
        self.buffers.insert(pixmap.id, buffer);
        Ok(previous)
    }

    pub fn lookup(&self, id: PixmapId) -> Option<&ShmBuffer> {
        self.buffers.get(&id).map(Rc::as_ref)
    }

    /// Drops the pixmap's association: clears its storage header, then
    /// unmaps and closes the buffer. No-op when nothing is attached.
    pub fn detach(&mut self, pixmap: &mut Pixmap) -> bool {
        let Some(buffer) = self.buffers.remove(&pixmap.id) else {
            return false;
        };
        pixmap.modify_header(PixmapStorage::Detached);
        debug!(
            "Detached shm buffer (fd {}, {} bytes) from pixmap {}",
            buffer.raw_fd(),
            buffer.len(),
            pixmap.id
        );
        drop(buffer);
        true
    }

    /// Drops every remaining association. Used when the screen goes away
    /// while pixmaps still hold shared storage; a buffer stays mapped until
    /// its pixmap's header is rewritten or the pixmap is freed.
    pub fn release_all(&mut self) -> usize {
        let count = self.buffers.len();
        for (id, buffer) in self.buffers.drain() {
            warn!(
                "Releasing shm buffer (fd {}, {} bytes) still attached to pixmap {}",
                buffer.raw_fd(),
                buffer.len(),
                id
            );
            if Rc::strong_count(&buffer) > 1 {
                debug!("Pixmap {} keeps its buffer mapped until it is freed", id);
            }
        }
        count
    }

    pub fn ids(&self) -> Vec<PixmapId> {
        self.buffers.keys().copied().collect()
    }

    pub fn len(&self) -> usize {
        self.buffers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buffers.is_empty()
    }
}
