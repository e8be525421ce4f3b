// src/host/mod.rs

//! Types and services provided by the host display server.
//!
//! The driver never owns the host; it receives the host's screen records and
//! calls back through [`HostServices`]. `server` contains a single-threaded
//! simulation of the host used by the binary and the tests.

pub mod server;

use std::collections::BTreeMap;
use std::fmt;

use bitflags::bitflags;

use crate::config::{DeviceSection, ScreenConfig};
use crate::display::screen::{FramebufferGeometry, WlshmDevice};
use crate::display::teardown::TeardownChain;

pub use server::{HostState, Server};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ScreenIndex(pub usize);

impl fmt::Display for ScreenIndex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

bitflags! {
    /// Flags passed to probe and pre-init.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct ProbeFlags: u32 {
        /// Only detect hardware; do not claim or configure anything.
        const PROBE_DETECT = 0x01;
    }
}

bitflags! {
    /// Hardware interfaces a driver requires from the host.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct HwFlags: u32 {
        const SKIP_CONSOLE = 4;
        const WAYLAND = 8;
    }
}

/// Queries the host may make through the driver's generic entry point.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DriverFuncOp {
    GetRequiredHwInterfaces,
    SupportsFramebufferTiling,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModeStatus {
    Ok,
    TooWide,
    TooTall,
    Empty,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DisplayMode {
    pub name: String,
    pub width: u32,
    pub height: u32,
}

/// The host's record for one screen, filled in across probe and pre-init.
#[derive(Debug)]
pub struct ScrnInfo {
    pub index: ScreenIndex,
    pub driver_name: &'static str,
    pub name: &'static str,
    pub chipset: &'static str,
    pub driver_version: u32,
    /// The claimed device section.
    pub entity: DeviceSection,
    /// The configured screen section.
    pub display: ScreenConfig,
    pub options: BTreeMap<String, String>,
    pub depth: u8,
    pub bits_per_pixel: u32,
    pub virtual_x: u32,
    pub virtual_y: u32,
    pub display_width: u32,
    pub x_dpi: u32,
    pub y_dpi: u32,
    pub modes: Vec<DisplayMode>,
    pub current_mode: Option<usize>,
    /// True while this screen owns the VT.
    pub vt_sema: bool,
    /// Driver-private device state.
    pub driver_private: Option<WlshmDevice>,
}

impl ScrnInfo {
    pub fn new(index: ScreenIndex, entity: DeviceSection, display: ScreenConfig) -> Self {
        Self {
            index,
            driver_name: "",
            name: "",
            chipset: "",
            driver_version: 0,
            options: entity.options.clone(),
            entity,
            virtual_x: display.virtual_width,
            virtual_y: display.virtual_height,
            display_width: display.virtual_width,
            display,
            depth: 0,
            bits_per_pixel: 0,
            x_dpi: 0,
            y_dpi: 0,
            modes: Vec::new(),
            current_mode: None,
            vt_sema: false,
            driver_private: None,
        }
    }

    pub fn current_mode(&self) -> Option<&DisplayMode> {
        self.current_mode.and_then(|i| self.modes.get(i))
    }

    pub fn geometry(&self) -> FramebufferGeometry {
        FramebufferGeometry {
            width: self.virtual_x,
            height: self.virtual_y,
            depth: self.depth,
            bits_per_pixel: self.bits_per_pixel,
            display_width: self.display_width,
            x_dpi: self.x_dpi,
            y_dpi: self.y_dpi,
        }
    }
}

/// The host's live screen object handed to screen-init and close-screen.
#[derive(Debug)]
pub struct ScreenContext {
    pub index: ScreenIndex,
    pub width: u32,
    pub height: u32,
    pub depth: u8,
    pub bits_per_pixel: u32,
    /// Server generation; options are only reported on the first.
    pub generation: u32,
    /// Close hooks, run in order at close-screen.
    pub close_chain: TeardownChain,
}

impl ScreenContext {
    pub fn new(index: ScreenIndex, generation: u32) -> Self {
        Self {
            index,
            width: 0,
            height: 0,
            depth: 0,
            bits_per_pixel: 0,
            generation,
            close_chain: TeardownChain::new(),
        }
    }
}

/// Callbacks the driver makes into the host.
pub trait HostServices {
    /// Whether the server runs in rootless compositor-client mode.
    fn xwayland_enabled(&self) -> bool;

    /// Adds the screen's block/wakeup handler pair to the dispatch loop.
    fn register_block_and_wakeup(&mut self, screen: ScreenIndex);

    /// Removes the pair added by `register_block_and_wakeup`.
    fn remove_block_and_wakeup(&mut self, screen: ScreenIndex);

    /// Hands the framebuffer to the host's software rasterizer, which sets
    /// up pixel formats, visuals and the default colormap.
    fn fb_screen_init(
        &mut self,
        screen: &mut ScreenContext,
        framebuffer: &mut [u8],
        geometry: &FramebufferGeometry,
    ) -> bool;
}
