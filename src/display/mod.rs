// src/display/mod.rs
//! Per-screen driver state and the pieces it is built from.
//!
//! - WlshmDevice: screen lifecycle, framebuffer and the window-buffer hand-off
//! - PixmapRegistry: which pixmaps are backed by which shared buffers
//! - ScreenSession: the compositor-facing session a screen forwards to

pub mod damage;
pub mod drivers;
pub mod pixmap;
pub mod registry;
pub mod screen;
pub mod session;
pub mod teardown;

pub use damage::BlockWakeupHandler;
pub use pixmap::{Pixmap, PixmapId, PixmapStorage};
pub use registry::PixmapRegistry;
pub use screen::{FramebufferGeometry, ScreenState, WlshmDevice};
pub use session::{ScreenSession, SessionFactory};
pub use teardown::TeardownChain;
