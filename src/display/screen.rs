// src/display/screen.rs

//! Per-screen device state and its lifecycle.
//!
//! `WlshmDevice` owns the primary framebuffer the software rasterizer draws
//! into, the external screen session, and the registry of pixmaps whose
//! storage has been moved into shared memory.
//!
//! ## Lifecycle
//! 1. Created (empty) during pre-init, which also creates the session.
//! 2. `init_screen` - Uninitialized → Initialized: framebuffer, damage hook,
//!    session init.
//! 3. `create_window_buffer` / `destroy_pixmap` while running.
//! 4. `close_screen` - → Closed. Safe to repeat.
//! 5. `destroy_session` + drop at free-screen.

use std::collections::BTreeMap;
use std::os::unix::io::AsFd;

use log::{debug, error, info, warn};

use crate::config::ShmConfig;
use crate::display::pixmap::{Pixmap, PixmapStorage};
use crate::display::registry::PixmapRegistry;
use crate::display::session::ScreenSession;
use crate::display::teardown::TeardownChain;
use crate::error::{AllocStep, DriverError, Result};
use crate::host::{HostServices, ScreenContext, ScreenIndex};
use crate::os::shm::ShmBuffer;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScreenState {
    Uninitialized,
    Initialized,
    Closed,
}

/// Size and format of the primary framebuffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FramebufferGeometry {
    pub width: u32,
    pub height: u32,
    pub depth: u8,
    pub bits_per_pixel: u32,
    /// Pixels per row; equal to `width` for this driver.
    pub display_width: u32,
    pub x_dpi: u32,
    pub y_dpi: u32,
}

impl FramebufferGeometry {
    pub fn byte_len(&self) -> usize {
        self.display_width as usize * self.height as usize * (self.bits_per_pixel as usize / 8)
    }
}

fn allocate_framebuffer(len: usize) -> Result<Box<[u8]>> {
    let mut fb = Vec::new();
    fb.try_reserve_exact(len).map_err(|e| {
        error!("Failed to allocate {} byte framebuffer: {}", len, e);
        DriverError::resource(
            AllocStep::Framebuffer,
            std::io::Error::new(std::io::ErrorKind::OutOfMemory, e.to_string()),
        )
    })?;
    fb.resize(len, 0);
    Ok(fb.into_boxed_slice())
}

pub struct WlshmDevice {
    shm: ShmConfig,
    /// Processed copy of the device section's options.
    options: BTreeMap<String, String>,
    framebuffer: Option<Box<[u8]>>,
    session: Option<Box<dyn ScreenSession>>,
    registry: PixmapRegistry,
    /// Close hooks that were installed before ours.
    wrapped_close: TeardownChain,
    damage_registered: bool,
    state: ScreenState,
}

impl WlshmDevice {
    pub fn new(shm: ShmConfig) -> Self {
        Self {
            shm,
            options: BTreeMap::new(),
            framebuffer: None,
            session: None,
            registry: PixmapRegistry::new(),
            wrapped_close: TeardownChain::new(),
            damage_registered: false,
            state: ScreenState::Uninitialized,
        }
    }

    pub fn state(&self) -> ScreenState {
        self.state
    }

    pub fn framebuffer(&self) -> Option<&[u8]> {
        self.framebuffer.as_deref()
    }

    pub fn framebuffer_mut(&mut self) -> Option<&mut [u8]> {
        self.framebuffer.as_deref_mut()
    }

    pub fn has_session(&self) -> bool {
        self.session.is_some()
    }

    pub fn registry(&self) -> &PixmapRegistry {
        &self.registry
    }

    pub fn is_damage_registered(&self) -> bool {
        self.damage_registered
    }

    pub fn options(&self) -> &BTreeMap<String, String> {
        &self.options
    }

    pub(crate) fn set_options(&mut self, options: BTreeMap<String, String>) {
        self.options = options;
    }

    pub(crate) fn set_session(&mut self, session: Box<dyn ScreenSession>) {
        if self.session.replace(session).is_some() {
            warn!("Replacing an existing screen session");
        }
    }

    pub(crate) fn session_mut(&mut self) -> Option<&mut (dyn ScreenSession + 'static)> {
        self.session.as_deref_mut()
    }

    /// Uninitialized → Initialized. A screen that is already initialized
    /// is left alone and reported as success.
    pub fn init_screen(
        &mut self,
        geometry: FramebufferGeometry,
        screen: &mut ScreenContext,
        host: &mut dyn HostServices,
    ) -> Result<()> {
        if self.framebuffer.is_some() {
            debug!("Screen {} already initialized", screen.index);
            return Ok(());
        }

        let mut framebuffer = allocate_framebuffer(geometry.byte_len())?;
        if !host.fb_screen_init(screen, &mut framebuffer, &geometry) {
            error!("Framebuffer layer failed to initialize screen {}", screen.index);
            return Err(DriverError::configuration(
                "framebuffer layer rejected the screen geometry",
            ));
        }
        debug!(
            "Screen {}: {} byte framebuffer for {}x{} @ {} bpp",
            screen.index,
            framebuffer.len(),
            geometry.width,
            geometry.height,
            geometry.bits_per_pixel
        );
        self.framebuffer = Some(framebuffer);

        self.wrapped_close = screen.close_chain.take();

        if screen.generation == 1 {
            for (name, value) in &self.options {
                warn!("Option \"{}\" \"{}\" is not used", name, value);
            }
        }

        host.register_block_and_wakeup(screen.index);
        self.damage_registered = true;
        self.state = ScreenState::Initialized;

        if let Some(session) = self.session.as_mut() {
            session.init(screen).map_err(|e| {
                error!("Screen session init failed for screen {}: {:#}", screen.index, e);
                DriverError::session(format!("screen init: {:#}", e))
            })?;
        }
        info!("Screen {} initialized", screen.index);
        Ok(())
    }

    /// Tears the screen down. Repeating it, or running it on a screen that
    /// never initialized, does nothing more than the first call did.
    pub fn close_screen(&mut self, screen: ScreenIndex, host: &mut dyn HostServices) -> bool {
        if self.framebuffer.take().is_some() {
            debug!("Screen {}: freed framebuffer", screen);
        }

        if self.damage_registered {
            host.remove_block_and_wakeup(screen);
            self.damage_registered = false;
        }

        self.release_all_buffers();

        if self.state == ScreenState::Initialized {
            if let Some(session) = self.session.as_mut() {
                session.close();
            }
            info!("Screen {} closed", screen);
        }
        self.state = ScreenState::Closed;

        self.wrapped_close.run(screen)
    }

    /// Destroys the external session. Distinct from closing the screen;
    /// tolerates a session left over from a failed pre-init.
    pub fn destroy_session(&mut self) {
        self.release_all_buffers();
        if let Some(session) = self.session.take() {
            drop(session);
            debug!("Screen session destroyed");
        }
    }

    /// Moves `pixmap`'s storage into a fresh shared buffer and hands the
    /// buffer to the session.
    ///
    /// Nothing changes unless every step succeeds; a pixmap that already has
    /// a shared buffer keeps it on failure. On success the pixmap's previous
    /// storage is handed back to the caller, which owns it.
    pub fn create_window_buffer(&mut self, pixmap: &mut Pixmap) -> Result<PixmapStorage> {
        let session = self
            .session
            .as_mut()
            .ok_or_else(|| DriverError::session("no active screen session"))?;

        let mut buffer = ShmBuffer::allocate(pixmap.byte_len(), &self.shm)?;

        session
            .create_window_buffer_shm(pixmap, buffer.as_fd())
            .map_err(|e| {
                error!("Session refused shm buffer for pixmap {}: {:#}", pixmap.id, e);
                DriverError::session(format!("create_window_buffer_shm: {:#}", e))
            })?;

        if let Some(current) = pixmap.pixels() {
            let n = current.len().min(buffer.len());
            buffer.as_mut_slice()[..n].copy_from_slice(&current[..n]);
        }

        // The session already took the new buffer in place of the old one.
        if self.registry.detach(pixmap) {
            warn!("Pixmap {} already had a shared buffer; replaced it", pixmap.id);
        }
        self.registry.attach(pixmap, buffer)
    }

    /// Releases `pixmap`'s shared buffer, if it has one.
    pub fn destroy_pixmap(&mut self, pixmap: &mut Pixmap) {
        if self.registry.lookup(pixmap.id).is_none() {
            return;
        }
        if let Some(session) = self.session.as_mut() {
            session.release_window_buffer(pixmap.id);
        }
        self.registry.detach(pixmap);
    }

    fn release_all_buffers(&mut self) {
        if self.registry.is_empty() {
            return;
        }
        if let Some(session) = self.session.as_mut() {
            for id in self.registry.ids() {
                session.release_window_buffer(id);
            }
        }
        self.registry.release_all();
    }
}

impl Drop for WlshmDevice {
    fn drop(&mut self) {
        self.destroy_session();
    }
}

impl std::fmt::Debug for WlshmDevice {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WlshmDevice")
            .field("state", &self.state)
            .field("framebuffer", &self.framebuffer.as_ref().map(|fb| fb.len()))
            .field("session", &self.session.is_some())
            .field("registry", &self.registry.len())
            .field("wrapped_close", &self.wrapped_close)
            .field("damage_registered", &self.damage_registered)
            .finish()
    }
}
