// src/display/session.rs

//! Interface to the external screen session: the compositor-facing side that
//! actually presents frames. The driver owns one session per screen, forwards
//! the ready screen to it, hands it window buffers by descriptor, and pokes it
//! once per dispatch iteration to present accumulated damage.
//!
//! Dropping the boxed session destroys it; `close` only ends the screen's use
//! of it.

use std::os::unix::io::BorrowedFd;

use anyhow::Result;

use crate::config::ScreenConfig;
use crate::display::pixmap::{Pixmap, PixmapId};
use crate::host::ScreenContext;

pub trait ScreenSession {
    /// Validates the screen configuration before any screen exists.
    fn pre_init(&mut self, screen: &ScreenConfig) -> Result<()>;

    /// Attaches the session to a screen that finished initialising.
    fn init(&mut self, screen: &ScreenContext) -> Result<()>;

    /// Drawing has happened since the last call; consider presenting it.
    /// Must not block.
    fn post_damage(&mut self);

    /// Ends the session's use of the screen.
    fn close(&mut self);

    /// Accepts `fd` (a shared segment of `pixmap.byte_len()` bytes) as the
    /// backing of `pixmap`'s window, replacing any buffer it accepted for
    /// the same pixmap before. The descriptor is only borrowed; the session
    /// duplicates it if it needs to keep it.
    fn create_window_buffer_shm(&mut self, pixmap: &Pixmap, fd: BorrowedFd<'_>) -> Result<()>;

    /// The pixmap's shared buffer is about to be unmapped and closed.
    fn release_window_buffer(&mut self, _pixmap: PixmapId) {}
}

/// Creates a new session for a screen during pre-init.
pub type SessionFactory = Box<dyn Fn() -> Result<Box<dyn ScreenSession>>>;
