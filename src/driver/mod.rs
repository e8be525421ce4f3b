// src/driver/mod.rs

//! The host-facing driver interface and the shared-memory driver itself.
//!
//! The host calls a driver in a fixed order:
//! `probe` → `pre_init` → `screen_init` → (runtime callbacks) →
//! `close_screen` → `free_screen`. Every callback is implemented even where
//! this backend has nothing to do, since there is no hardware mode state.

pub mod registry;

#[cfg(test)]
mod tests;

use log::{debug, error, info, warn};

use crate::config::{Config, ModeConfig, ShmConfig, DRIVER_NAME};
use crate::display::pixmap::{Pixmap, PixmapStorage};
use crate::display::screen::WlshmDevice;
use crate::display::session::SessionFactory;
use crate::error::{DriverError, Result};
use crate::host::{
    DisplayMode, DriverFuncOp, HostServices, HwFlags, ModeStatus, ProbeFlags, ScreenContext,
    ScreenIndex, ScrnInfo,
};

pub use registry::{DriverRegistry, RegistrationState};

const DEFAULT_DPI: u32 = 96;
const FRAMEBUFFER_BPP: u32 = 32;
const SUPPORTED_DEPTHS: [u8; 3] = [24, 30, 32];

/// `major << 16 | minor << 8 | patch` of this crate.
pub fn driver_version() -> u32 {
    let part = |s: &str| s.parse::<u32>().unwrap_or(0);
    (part(env!("CARGO_PKG_VERSION_MAJOR")) << 16)
        | (part(env!("CARGO_PKG_VERSION_MINOR")) << 8)
        | part(env!("CARGO_PKG_VERSION_PATCH"))
}

/// Lifecycle callbacks the host invokes on a display driver.
pub trait ScreenDriver {
    fn name(&self) -> &'static str;

    /// Options this driver understands.
    fn available_options(&self) -> &'static [&'static str];

    /// Generic host query; `None` when the op is not supported.
    fn driver_func(&self, op: DriverFuncOp) -> Option<HwFlags>;

    /// Claims matching device sections, one screen record each.
    fn probe(&mut self, config: &Config, flags: ProbeFlags) -> Vec<ScrnInfo>;

    fn pre_init(&mut self, scrn: &mut ScrnInfo, flags: ProbeFlags, host: &dyn HostServices)
        -> Result<()>;

    fn screen_init(
        &mut self,
        scrn: &mut ScrnInfo,
        screen: &mut ScreenContext,
        host: &mut dyn HostServices,
    ) -> Result<()>;

    fn save_screen(&mut self, screen: &ScreenContext, mode: i32) -> bool;

    fn switch_mode(&mut self, scrn: &mut ScrnInfo, mode: &DisplayMode) -> bool;

    fn adjust_frame(&mut self, scrn: &mut ScrnInfo, x: i32, y: i32);

    fn enter_vt(&mut self, scrn: &mut ScrnInfo) -> bool;

    fn leave_vt(&mut self, scrn: &mut ScrnInfo);

    fn valid_mode(&self, scrn: &ScrnInfo, mode: &DisplayMode, verbose: bool, flags: u32)
        -> ModeStatus;

    fn close_screen(
        &mut self,
        scrn: &mut ScrnInfo,
        screen: &mut ScreenContext,
        host: &mut dyn HostServices,
    ) -> bool;

    fn free_screen(&mut self, scrn: &mut ScrnInfo);
}

/// Requests the screen session makes back into the driver.
pub trait WindowBufferProvider {
    /// Moves the pixmap into shared memory and hands it to the session.
    fn create_window_buffer(&mut self, scrn: &mut ScrnInfo, pixmap: &mut Pixmap)
        -> Result<PixmapStorage>;

    /// The host is freeing the pixmap; release its shared backing.
    fn destroy_pixmap(&mut self, scrn: &mut ScrnInfo, pixmap: &mut Pixmap);
}

pub struct WlshmDriver {
    session_factory: SessionFactory,
    shm: ShmConfig,
}

impl WlshmDriver {
    pub fn new(shm: ShmConfig, session_factory: SessionFactory) -> Self {
        Self {
            session_factory,
            shm,
        }
    }

    /// Allocates the device state once; later calls find it in place.
    fn get_device<'a>(&self, scrn: &'a mut ScrnInfo) -> &'a mut WlshmDevice {
        scrn.driver_private
            .get_or_insert_with(|| WlshmDevice::new(self.shm.clone()))
    }

    fn device_mut<'a>(scrn: &'a mut ScrnInfo) -> Result<&'a mut WlshmDevice> {
        let index = scrn.index;
        scrn.driver_private
            .as_mut()
            .ok_or_else(|| DriverError::configuration(format!("screen {} was not pre-initialized", index)))
    }

    fn set_depth_bpp(scrn: &mut ScrnInfo) -> Result<()> {
        let depth = scrn.display.depth;
        if !SUPPORTED_DEPTHS.contains(&depth) {
            error!("Given depth ({}) is not supported by this driver", depth);
            return Err(DriverError::configuration(format!(
                "Given depth ({}) is not supported by this driver",
                depth
            )));
        }
        scrn.depth = depth;
        scrn.bits_per_pixel = FRAMEBUFFER_BPP;
        info!("Depth {}, framebuffer bpp {}", scrn.depth, scrn.bits_per_pixel);
        Ok(())
    }

    fn validate_modes(&self, scrn: &mut ScrnInfo) -> Result<()> {
        let candidates: Vec<DisplayMode> = scrn
            .display
            .modes
            .iter()
            .map(|ModeConfig { name, width, height }| DisplayMode {
                name: name.clone(),
                width: *width,
                height: *height,
            })
            .collect();

        let mut valid = Vec::with_capacity(candidates.len());
        for mode in candidates {
            let status = size_status(&mode, scrn.virtual_x, scrn.virtual_y);
            let status = match status {
                ModeStatus::Ok => self.valid_mode(scrn, &mode, false, 0),
                other => other,
            };
            if status == ModeStatus::Ok {
                valid.push(mode);
            } else {
                info!("Mode \"{}\" pruned: {:?}", mode.name, status);
            }
        }

        if valid.is_empty() {
            error!("No valid modes found");
            return Err(DriverError::configuration("No valid modes found"));
        }
        for mode in &valid {
            info!("Mode \"{}\": {}x{}", mode.name, mode.width, mode.height);
        }
        scrn.modes = valid;
        scrn.current_mode = Some(0);
        Ok(())
    }

    fn pre_init_device(&mut self, scrn: &mut ScrnInfo) -> Result<()> {
        self.get_device(scrn);

        scrn.chipset = DRIVER_NAME;
        info!("Initializing Wayland SHM driver for screen {}", scrn.index);

        Self::set_depth_bpp(scrn)?;

        let options = scrn.options.clone();
        Self::device_mut(scrn)?.set_options(options);

        let mut session = (self.session_factory)().map_err(|e| {
            error!("Failed to initialize xwayland: {:#}", e);
            DriverError::session(format!("create: {:#}", e))
        })?;
        if let Err(e) = session.pre_init(&scrn.display) {
            error!("Failed to pre-init xwayland screen: {:#}", e);
            drop(session);
            return Err(DriverError::session(format!("pre-init: {:#}", e)));
        }
        Self::device_mut(scrn)?.set_session(session);

        self.validate_modes(scrn)?;

        let dpi = scrn.display.dpi.unwrap_or(DEFAULT_DPI);
        scrn.x_dpi = dpi;
        scrn.y_dpi = dpi;
        Ok(())
    }
}

fn size_status(mode: &DisplayMode, max_width: u32, max_height: u32) -> ModeStatus {
    if mode.width == 0 || mode.height == 0 {
        ModeStatus::Empty
    } else if mode.width > max_width {
        ModeStatus::TooWide
    } else if mode.height > max_height {
        ModeStatus::TooTall
    } else {
        ModeStatus::Ok
    }
}

impl ScreenDriver for WlshmDriver {
    fn name(&self) -> &'static str {
        DRIVER_NAME
    }

    fn available_options(&self) -> &'static [&'static str] {
        &[]
    }

    fn driver_func(&self, op: DriverFuncOp) -> Option<HwFlags> {
        match op {
            DriverFuncOp::GetRequiredHwInterfaces => Some(HwFlags::WAYLAND),
            _ => None,
        }
    }

    fn probe(&mut self, config: &Config, flags: ProbeFlags) -> Vec<ScrnInfo> {
        if flags.contains(ProbeFlags::PROBE_DETECT) {
            return Vec::new();
        }

        let screens: Vec<ScrnInfo> = config
            .devices
            .iter()
            .filter(|section| section.driver == DRIVER_NAME)
            .enumerate()
            .map(|(i, section)| {
                let mut scrn = ScrnInfo::new(ScreenIndex(i), section.clone(), config.screen.clone());
                scrn.driver_version = driver_version();
                scrn.driver_name = DRIVER_NAME;
                scrn.name = DRIVER_NAME;
                debug!("Claimed device \"{}\" as screen {}", section.identifier, i);
                scrn
            })
            .collect();

        if screens.is_empty() {
            debug!("No device sections use the {} driver", DRIVER_NAME);
        }
        screens
    }

    fn pre_init(
        &mut self,
        scrn: &mut ScrnInfo,
        flags: ProbeFlags,
        host: &dyn HostServices,
    ) -> Result<()> {
        if flags.contains(ProbeFlags::PROBE_DETECT) {
            return Ok(());
        }

        if !host.xwayland_enabled() {
            error!("You must run Xorg with -xwayland parameter");
            return Err(DriverError::configuration(
                "You must run Xorg with -xwayland parameter",
            ));
        }

        let result = self.pre_init_device(scrn);
        if result.is_err() {
            // Dropping the device destroys any session it holds.
            scrn.driver_private = None;
        }
        result
    }

    fn screen_init(
        &mut self,
        scrn: &mut ScrnInfo,
        screen: &mut ScreenContext,
        host: &mut dyn HostServices,
    ) -> Result<()> {
        let geometry = scrn.geometry();
        Self::device_mut(scrn)?.init_screen(geometry, screen, host)?;
        scrn.vt_sema = true;
        Ok(())
    }

    fn save_screen(&mut self, _screen: &ScreenContext, _mode: i32) -> bool {
        true
    }

    fn switch_mode(&mut self, _scrn: &mut ScrnInfo, _mode: &DisplayMode) -> bool {
        true
    }

    fn adjust_frame(&mut self, _scrn: &mut ScrnInfo, _x: i32, _y: i32) {}

    fn enter_vt(&mut self, _scrn: &mut ScrnInfo) -> bool {
        true
    }

    fn leave_vt(&mut self, _scrn: &mut ScrnInfo) {}

    fn valid_mode(
        &self,
        _scrn: &ScrnInfo,
        _mode: &DisplayMode,
        _verbose: bool,
        _flags: u32,
    ) -> ModeStatus {
        ModeStatus::Ok
    }

    fn close_screen(
        &mut self,
        scrn: &mut ScrnInfo,
        screen: &mut ScreenContext,
        host: &mut dyn HostServices,
    ) -> bool {
        let mut ok = true;
        if let Some(device) = scrn.driver_private.as_mut() {
            ok = device.close_screen(screen.index, host);
        }
        scrn.vt_sema = false;
        // Hooks the driver never wrapped, e.g. after a failed screen-init.
        ok & screen.close_chain.run(screen.index)
    }

    fn free_screen(&mut self, scrn: &mut ScrnInfo) {
        if let Some(mut device) = scrn.driver_private.take() {
            device.destroy_session();
            debug!("Freed device state for screen {}", scrn.index);
        }
    }
}

impl WindowBufferProvider for WlshmDriver {
    fn create_window_buffer(
        &mut self,
        scrn: &mut ScrnInfo,
        pixmap: &mut Pixmap,
    ) -> Result<PixmapStorage> {
        Self::device_mut(scrn)?.create_window_buffer(pixmap)
    }

    fn destroy_pixmap(&mut self, scrn: &mut ScrnInfo, pixmap: &mut Pixmap) {
        match scrn.driver_private.as_mut() {
            Some(device) => device.destroy_pixmap(pixmap),
            None => warn!("destroy_pixmap on screen {} without device state", scrn.index),
        }
    }
}
