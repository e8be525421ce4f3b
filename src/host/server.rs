// src/host/server.rs

//! A single-threaded stand-in for the host display server.
//!
//! It owns the screen records, the live screens and the pixmaps, keeps the
//! set of registered block/wakeup handlers, and drives a driver through the
//! host's fixed call order. Each `dispatch_once` is one scheduler iteration.

use std::cell::Cell;
use std::collections::{BTreeMap, BTreeSet};
use std::rc::Rc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use log::{debug, error, info, trace, warn};

use crate::config::Config;
use crate::display::damage::BlockWakeupHandler;
use crate::display::pixmap::{Pixmap, PixmapId};
use crate::display::screen::FramebufferGeometry;
use crate::driver::{ScreenDriver, WindowBufferProvider};
use crate::host::{HostServices, ProbeFlags, ScreenContext, ScreenIndex, ScrnInfo};

/// Host-side services the driver calls back into.
#[derive(Debug, Default)]
pub struct HostState {
    xwayland: bool,
    fail_fb_init: bool,
    handlers: BTreeSet<ScreenIndex>,
    handler_adds: usize,
    handler_removes: usize,
}

impl HostState {
    pub fn new(xwayland: bool) -> Self {
        Self {
            xwayland,
            ..Self::default()
        }
    }

    /// Makes the software rasterizer refuse every screen.
    pub fn with_failing_rasterizer(mut self) -> Self {
        self.fail_fb_init = true;
        self
    }

    pub fn registered_handlers(&self) -> &BTreeSet<ScreenIndex> {
        &self.handlers
    }

    pub fn handler_adds(&self) -> usize {
        self.handler_adds
    }

    pub fn handler_removes(&self) -> usize {
        self.handler_removes
    }
}

impl HostServices for HostState {
    fn xwayland_enabled(&self) -> bool {
        self.xwayland
    }

    fn register_block_and_wakeup(&mut self, screen: ScreenIndex) {
        self.handler_adds += 1;
        if !self.handlers.insert(screen) {
            warn!("Block/wakeup handlers for screen {} registered twice", screen);
        }
    }

    fn remove_block_and_wakeup(&mut self, screen: ScreenIndex) {
        self.handler_removes += 1;
        if !self.handlers.remove(&screen) {
            warn!("Removing block/wakeup handlers for screen {} that were never added", screen);
        }
    }

    fn fb_screen_init(
        &mut self,
        screen: &mut ScreenContext,
        framebuffer: &mut [u8],
        geometry: &FramebufferGeometry,
    ) -> bool {
        if self.fail_fb_init || framebuffer.len() < geometry.byte_len() {
            return false;
        }
        screen.width = geometry.width;
        screen.height = geometry.height;
        screen.depth = geometry.depth;
        screen.bits_per_pixel = geometry.bits_per_pixel;
        framebuffer.fill(0);
        true
    }
}

pub struct Server<D> {
    driver: D,
    host: HostState,
    config: Config,
    screens: Vec<ScrnInfo>,
    contexts: Vec<ScreenContext>,
    pixmaps: BTreeMap<PixmapId, (ScreenIndex, Pixmap)>,
    generation: u32,
    next_pixmap: u32,
    host_closes: Rc<Cell<usize>>,
}

impl<D> Server<D>
where
    D: ScreenDriver + WindowBufferProvider,
{
    pub fn new(driver: D, config: Config, host: HostState) -> Self {
        Self {
            driver,
            host,
            config,
            screens: Vec::new(),
            contexts: Vec::new(),
            pixmaps: BTreeMap::new(),
            generation: 0,
            next_pixmap: 1,
            host_closes: Rc::new(Cell::new(0)),
        }
    }

    pub fn driver(&self) -> &D {
        &self.driver
    }

    pub fn host(&self) -> &HostState {
        &self.host
    }

    /// How many times the host's own close behaviour has run.
    pub fn host_closes(&self) -> usize {
        self.host_closes.get()
    }

    pub fn screen(&self, index: ScreenIndex) -> Option<&ScrnInfo> {
        self.screens.get(index.0)
    }

    pub fn screen_count(&self) -> usize {
        self.screens.len()
    }

    /// Probe, pre-init and screen-init every matching device. Any failure
    /// unwinds the screens set up so far.
    pub fn start(&mut self) -> Result<()> {
        self.generation += 1;
        info!("Server generation {}", self.generation);

        let mut screens = self.driver.probe(&self.config, ProbeFlags::empty());
        if screens.is_empty() {
            bail!("No devices use the \"{}\" driver", self.driver.name());
        }

        for i in 0..screens.len() {
            if let Err(e) = self.driver.pre_init(&mut screens[i], ProbeFlags::empty(), &self.host) {
                error!("PreInit failed for screen {}: {}", screens[i].index, e);
                for scrn in screens.iter_mut() {
                    self.driver.free_screen(scrn);
                }
                return Err(anyhow::Error::new(e)).context("Screen pre-initialization failed");
            }
        }
        self.screens = screens;

        for i in 0..self.screens.len() {
            let index = self.screens[i].index;
            let mut context = ScreenContext::new(index, self.generation);
            let closes = Rc::clone(&self.host_closes);
            context.close_chain.push("host", move |screen| {
                debug!("Host close for screen {}", screen);
                closes.set(closes.get() + 1);
                true
            });
            self.contexts.push(context);

            let result =
                self.driver
                    .screen_init(&mut self.screens[i], &mut self.contexts[i], &mut self.host);
            if let Err(e) = result {
                error!("ScreenInit failed for screen {}: {}", index, e);
                self.shutdown();
                return Err(anyhow::Error::new(e)).context("Screen initialization failed");
            }
        }
        Ok(())
    }

    pub fn create_pixmap(&mut self, screen: ScreenIndex, width: u32, height: u32) -> Result<PixmapId> {
        let scrn = self
            .screens
            .get(screen.0)
            .with_context(|| format!("No screen {}", screen))?;
        let id = PixmapId(self.next_pixmap);
        self.next_pixmap += 1;
        self.pixmaps
            .insert(id, (screen, Pixmap::new(id, width, height, scrn.bits_per_pixel)));
        trace!("Created {}x{} pixmap {}", width, height, id);
        Ok(id)
    }

    pub fn pixmap(&self, id: PixmapId) -> Option<&Pixmap> {
        self.pixmaps.get(&id).map(|(_, pixmap)| pixmap)
    }

    pub fn pixmap_mut(&mut self, id: PixmapId) -> Option<&mut Pixmap> {
        self.pixmaps.get_mut(&id).map(|(_, pixmap)| pixmap)
    }

    /// The session asks for shared backing for `id`'s window.
    pub fn create_window_buffer(&mut self, id: PixmapId) -> Result<()> {
        let (screen, pixmap) = self
            .pixmaps
            .get_mut(&id)
            .with_context(|| format!("No pixmap {}", id))?;
        let scrn = self
            .screens
            .get_mut(screen.0)
            .with_context(|| format!("No screen {}", screen))?;
        let previous = self
            .driver
            .create_window_buffer(scrn, pixmap)
            .map_err(anyhow::Error::new)
            .with_context(|| format!("Failed to create window buffer for pixmap {}", id))?;
        // The host owns the storage it allocated; it is released here.
        drop(previous);
        Ok(())
    }

    pub fn destroy_pixmap(&mut self, id: PixmapId) {
        let Some((screen, mut pixmap)) = self.pixmaps.remove(&id) else {
            return;
        };
        match self.screens.get_mut(screen.0) {
            Some(scrn) => self.driver.destroy_pixmap(scrn, &mut pixmap),
            None => warn!("Destroying pixmap {} on unknown screen {}", id, screen),
        }
        trace!("Destroyed pixmap {}", id);
    }

    /// One scheduler iteration: block handlers, a zero-length wait, wakeup
    /// handlers. Returns the timeout the handlers asked for, if any.
    pub fn dispatch_once(&mut self) -> Option<Duration> {
        let mut timeout = None;
        let registered: Vec<ScreenIndex> = self.host.handlers.iter().copied().collect();
        for index in &registered {
            if let Some(device) = self
                .screens
                .get_mut(index.0)
                .and_then(|scrn| scrn.driver_private.as_mut())
            {
                device.block_handler(&mut timeout, &[]);
            }
        }
        for index in &registered {
            if let Some(device) = self
                .screens
                .get_mut(index.0)
                .and_then(|scrn| scrn.driver_private.as_mut())
            {
                device.wakeup_handler(0, &[]);
            }
        }
        timeout
    }

    /// Releases the shared backing of every pixmap on `screen`, leaving
    /// those pixmaps without storage.
    fn release_window_buffers(&mut self, screen: ScreenIndex) {
        let Some(scrn) = self.screens.get_mut(screen.0) else {
            return;
        };
        for (owner, pixmap) in self.pixmaps.values_mut() {
            if *owner == screen && pixmap.is_shared() {
                self.driver.destroy_pixmap(scrn, pixmap);
            }
        }
    }

    pub fn close_screen(&mut self, screen: ScreenIndex) -> bool {
        self.release_window_buffers(screen);
        match (self.screens.get_mut(screen.0), self.contexts.get_mut(screen.0)) {
            (Some(scrn), Some(context)) => self.driver.close_screen(scrn, context, &mut self.host),
            _ => {
                warn!("close_screen on unknown screen {}", screen);
                false
            }
        }
    }

    /// Frees all pixmaps, then close-screen and free-screen for every screen.
    pub fn shutdown(&mut self) -> bool {
        let ids: Vec<PixmapId> = self.pixmaps.keys().copied().collect();
        for id in ids {
            self.destroy_pixmap(id);
        }
        let mut ok = true;
        for i in 0..self.contexts.len() {
            ok &= self.close_screen(ScreenIndex(i));
        }
        for scrn in self.screens.iter_mut() {
            self.driver.free_screen(scrn);
        }
        info!("Server shut down");
        ok
    }
}
