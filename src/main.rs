// src/main.rs

//! Runs the shared-memory driver against the in-process host and a headless
//! screen session: one screen, one window pixmap, a few frames of drawing.

use anyhow::{bail, Context};
use log::{info, warn};

use wlshm::config::{DeviceSection, CONFIG, DRIVER_NAME};
use wlshm::display::drivers::headless::{HeadlessBehavior, HeadlessSession};
use wlshm::driver::{DriverRegistry, WlshmDriver};
use wlshm::host::{HostState, ScreenIndex, Server};

const XWAYLAND_ENV_VAR: &str = "WLSHM_XWAYLAND";

const WINDOW_WIDTH: u32 = 64;
const WINDOW_HEIGHT: u32 = 64;
const FRAMES: u8 = 8;

fn xwayland_requested() -> bool {
    let from_args = std::env::args()
        .skip(1)
        .any(|arg| arg == "-xwayland" || arg == "--xwayland");
    let from_env = std::env::var(XWAYLAND_ENV_VAR)
        .map(|v| v == "1" || v.eq_ignore_ascii_case("true"))
        .unwrap_or(false);
    from_args || from_env
}

fn main() -> anyhow::Result<()> {
    let mut config = CONFIG.clone();

    env_logger::Builder::from_env(
        env_logger::Env::default().default_filter_or(config.logging.filter.as_str()),
    )
    .format_timestamp_micros()
    .init();

    info!("Starting wlshm...");

    // --- Configuration ---
    if !config.devices.iter().any(|d| d.driver == DRIVER_NAME) {
        info!("No \"{}\" device configured, adding one", DRIVER_NAME);
        config.devices.push(DeviceSection {
            identifier: "Wayland0".to_string(),
            driver: DRIVER_NAME.to_string(),
            ..DeviceSection::default()
        });
    }
    let xwayland = xwayland_requested();
    if !xwayland {
        warn!(
            "Rootless mode not requested; pass -xwayland or set {}=1",
            XWAYLAND_ENV_VAR
        );
    }

    // --- Driver ---
    let (factory, stats) = HeadlessSession::factory(HeadlessBehavior::default());
    let driver = WlshmDriver::new(config.shm.clone(), factory);
    let mut registry = DriverRegistry::new();
    registry
        .setup(&driver)
        .context("Failed to register the driver")?;

    let mut server = Server::new(driver, config, HostState::new(xwayland));
    server.start().context("Failed to start the server")?;
    if server.screen_count() == 0 {
        bail!("No screens came up");
    }

    // --- Window ---
    let screen = ScreenIndex(0);
    let window = server.create_pixmap(screen, WINDOW_WIDTH, WINDOW_HEIGHT)?;
    server.create_window_buffer(window)?;

    for frame in 0..FRAMES {
        if let Some(pixels) = server.pixmap_mut(window).and_then(|p| p.pixels_mut()) {
            for (i, byte) in pixels.iter_mut().enumerate() {
                *byte = (i as u8).wrapping_add(frame.wrapping_mul(16));
            }
        }
        if let Some(timeout) = server.dispatch_once() {
            info!("Handlers asked for a {:?} timeout", timeout);
        }
    }

    {
        let stats = stats.borrow();
        info!(
            "Session saw {} damage posts and presented {} frames",
            stats.damage_posts, stats.frames_presented
        );
    }

    server.destroy_pixmap(window);
    if !server.shutdown() {
        warn!("Close chain reported failure");
    }
    info!("wlshm finished");
    Ok(())
}
