// src/display/drivers/headless.rs

//! Headless in-process screen session.
//!
//! Stands in for the compositor side: it maps each accepted window buffer
//! read-only through its own duplicate of the descriptor, and on every damage
//! post "presents" the buffers whose content changed since the last frame.

use std::cell::RefCell;
use std::collections::BTreeMap;
use std::os::unix::io::BorrowedFd;
use std::rc::Rc;

use anyhow::{anyhow, Context, Result};
use log::{debug, info, trace};

use crate::config::ScreenConfig;
use crate::display::pixmap::{Pixmap, PixmapId};
use crate::display::session::{ScreenSession, SessionFactory};
use crate::host::{ScreenContext, ScreenIndex};
use crate::os::shm::ShmView;

/// Failure knobs for exercising the driver's error paths.
#[derive(Debug, Default, Clone, Copy)]
pub struct HeadlessBehavior {
    pub fail_pre_init: bool,
    pub fail_init: bool,
    pub reject_buffers: bool,
    /// Refuse buffers once this many have been accepted.
    pub accept_limit: Option<usize>,
}

/// Everything the session observed, shared with whoever created it.
#[derive(Debug, Default)]
pub struct SessionStats {
    pub created: usize,
    pub destroyed: usize,
    pub pre_inits: usize,
    pub inits: usize,
    pub closes: usize,
    pub damage_posts: usize,
    pub frames_presented: usize,
    pub buffers_accepted: usize,
    pub buffers_released: usize,
    /// Checksum of each buffer's content as of the last presented frame.
    pub presented: BTreeMap<PixmapId, u64>,
}

pub type SessionProbe = Rc<RefCell<SessionStats>>;

fn checksum(bytes: &[u8]) -> u64 {
    // FNV-1a
    bytes.iter().fold(0xcbf2_9ce4_8422_2325u64, |hash, &b| {
        (hash ^ b as u64).wrapping_mul(0x0000_0100_0000_01b3)
    })
}

pub struct HeadlessSession {
    behavior: HeadlessBehavior,
    stats: SessionProbe,
    screen: Option<ScreenIndex>,
    buffers: BTreeMap<PixmapId, ShmView>,
}

impl HeadlessSession {
    pub fn new(behavior: HeadlessBehavior, stats: SessionProbe) -> Self {
        stats.borrow_mut().created += 1;
        Self {
            behavior,
            stats,
            screen: None,
            buffers: BTreeMap::new(),
        }
    }

    /// A factory for the driver plus a handle to observe the sessions it makes.
    pub fn factory(behavior: HeadlessBehavior) -> (SessionFactory, SessionProbe) {
        let stats = SessionProbe::default();
        let shared = Rc::clone(&stats);
        let factory: SessionFactory = Box::new(move || {
            Ok(Box::new(HeadlessSession::new(behavior, Rc::clone(&shared))) as Box<dyn ScreenSession>)
        });
        (factory, stats)
    }
}

impl ScreenSession for HeadlessSession {
    fn pre_init(&mut self, screen: &ScreenConfig) -> Result<()> {
        self.stats.borrow_mut().pre_inits += 1;
        if self.behavior.fail_pre_init {
            return Err(anyhow!("headless session configured to fail pre-init"));
        }
        debug!(
            "HeadlessSession: pre-init for {}x{} depth {}",
            screen.virtual_width, screen.virtual_height, screen.depth
        );
        Ok(())
    }

    fn init(&mut self, screen: &ScreenContext) -> Result<()> {
        self.stats.borrow_mut().inits += 1;
        if self.behavior.fail_init {
            return Err(anyhow!("headless session configured to fail init"));
        }
        info!(
            "HeadlessSession: attached to screen {} ({}x{})",
            screen.index, screen.width, screen.height
        );
        self.screen = Some(screen.index);
        Ok(())
    }

    fn post_damage(&mut self) {
        let mut stats = self.stats.borrow_mut();
        stats.damage_posts += 1;
        if self.screen.is_none() {
            return;
        }
        let mut changed = false;
        for (id, view) in &self.buffers {
            let sum = checksum(view.as_slice());
            if stats.presented.insert(*id, sum) != Some(sum) {
                changed = true;
            }
        }
        if changed {
            stats.frames_presented += 1;
            trace!("HeadlessSession: presented frame {}", stats.frames_presented);
        }
    }

    fn close(&mut self) {
        self.stats.borrow_mut().closes += 1;
        if let Some(screen) = self.screen.take() {
            debug!("HeadlessSession: detached from screen {}", screen);
        }
    }

    fn create_window_buffer_shm(&mut self, pixmap: &Pixmap, fd: BorrowedFd<'_>) -> Result<()> {
        if self.behavior.reject_buffers {
            return Err(anyhow!("headless session configured to reject buffers"));
        }
        let accepted = self.stats.borrow().buffers_accepted;
        if let Some(limit) = self.behavior.accept_limit.filter(|&limit| accepted >= limit) {
            return Err(anyhow!("headless session accepts at most {} buffers", limit));
        }
        let view = ShmView::map(fd, pixmap.byte_len())
            .with_context(|| format!("Failed to map buffer for pixmap {}", pixmap.id))?;
        debug!(
            "HeadlessSession: accepted {}x{} buffer for pixmap {} (fd {})",
            pixmap.width,
            pixmap.height,
            pixmap.id,
            view.raw_fd()
        );
        let mut stats = self.stats.borrow_mut();
        if self.buffers.insert(pixmap.id, view).is_some() {
            debug!("HeadlessSession: replaced buffer for pixmap {}", pixmap.id);
            stats.buffers_released += 1;
        }
        stats.buffers_accepted += 1;
        Ok(())
    }

    fn release_window_buffer(&mut self, pixmap: PixmapId) {
        if self.buffers.remove(&pixmap).is_some() {
            let mut stats = self.stats.borrow_mut();
            stats.buffers_released += 1;
            stats.presented.remove(&pixmap);
        }
    }
}

impl Drop for HeadlessSession {
    fn drop(&mut self) {
        self.buffers.clear();
        self.stats.borrow_mut().destroyed += 1;
        debug!("HeadlessSession destroyed");
    }
}
