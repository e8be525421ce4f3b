// src/driver/tests.rs
#![cfg(test)]

use std::time::Duration;

use anyhow::Result;

use super::*;
use crate::config::{DeviceSection, ScreenConfig, ShmBackend};
use crate::display::damage::BlockWakeupHandler;
use crate::display::drivers::headless::{HeadlessBehavior, HeadlessSession, SessionProbe};
use crate::display::screen::ScreenState;
use crate::host::{HostState, Server};

fn wayland_device(identifier: &str) -> DeviceSection {
    DeviceSection {
        identifier: identifier.to_string(),
        driver: DRIVER_NAME.to_string(),
        ..DeviceSection::default()
    }
}

fn test_config() -> Config {
    Config {
        screen: ScreenConfig {
            virtual_width: 64,
            virtual_height: 48,
            modes: vec![ModeConfig {
                name: "64x48".to_string(),
                width: 64,
                height: 48,
            }],
            ..ScreenConfig::default()
        },
        shm: ShmConfig {
            backend: ShmBackend::Memfd,
            ..ShmConfig::default()
        },
        devices: vec![wayland_device("Wayland0")],
        ..Config::default()
    }
}

fn driver_with(behavior: HeadlessBehavior) -> (WlshmDriver, SessionProbe) {
    let (factory, stats) = HeadlessSession::factory(behavior);
    let shm = test_config().shm;
    (WlshmDriver::new(shm, factory), stats)
}

fn server_with(behavior: HeadlessBehavior, host: HostState) -> (Server<WlshmDriver>, SessionProbe) {
    let (driver, stats) = driver_with(behavior);
    (Server::new(driver, test_config(), host), stats)
}

fn device(server: &Server<WlshmDriver>) -> Option<&WlshmDevice> {
    server
        .screen(ScreenIndex(0))
        .and_then(|scrn| scrn.driver_private.as_ref())
}

/// Probes `config` and pre-inits the first claimed screen.
fn pre_init_first(
    driver: &mut WlshmDriver,
    config: &Config,
    host: &HostState,
) -> (ScrnInfo, Result<()>) {
    let mut screens = driver.probe(config, ProbeFlags::empty());
    assert!(!screens.is_empty(), "probe should claim the wayland device");
    let mut scrn = screens.remove(0);
    let result = driver
        .pre_init(&mut scrn, ProbeFlags::empty(), host)
        .map_err(anyhow::Error::new);
    (scrn, result)
}

// --- Probe and driver queries ---

#[test_log::test]
fn it_should_claim_only_devices_that_name_this_driver() {
    let (mut driver, _stats) = driver_with(HeadlessBehavior::default());
    let mut config = test_config();
    config.devices.push(DeviceSection {
        identifier: "Card0".to_string(),
        driver: "modesetting".to_string(),
        ..DeviceSection::default()
    });
    config.devices.push(wayland_device("Wayland1"));

    let screens = driver.probe(&config, ProbeFlags::empty());

    assert_eq!(screens.len(), 2);
    assert_eq!(screens[0].entity.identifier, "Wayland0");
    assert_eq!(screens[1].entity.identifier, "Wayland1");
    assert_eq!(screens[1].index, ScreenIndex(1));
    assert!(screens.iter().all(|s| s.driver_name == "wayland"));
    assert!(screens.iter().all(|s| s.driver_version == driver_version()));
}

#[test_log::test]
fn it_should_do_nothing_when_only_detecting() {
    let (mut driver, stats) = driver_with(HeadlessBehavior::default());
    let config = test_config();
    assert!(driver.probe(&config, ProbeFlags::PROBE_DETECT).is_empty());

    let mut scrn = ScrnInfo::new(ScreenIndex(0), wayland_device("Wayland0"), config.screen);
    let host = HostState::new(false);
    assert!(driver
        .pre_init(&mut scrn, ProbeFlags::PROBE_DETECT, &host)
        .is_ok());
    assert!(scrn.driver_private.is_none());
    assert_eq!(stats.borrow().created, 0);
}

#[test_log::test]
fn it_should_require_the_wayland_hardware_interface() {
    let (driver, _stats) = driver_with(HeadlessBehavior::default());
    assert_eq!(
        driver.driver_func(DriverFuncOp::GetRequiredHwInterfaces),
        Some(HwFlags::WAYLAND)
    );
    assert_eq!(driver.driver_func(DriverFuncOp::SupportsFramebufferTiling), None);
    assert!(driver.available_options().is_empty());
}

// --- Pre-init ---

#[test_log::test]
fn it_should_fill_in_the_screen_record_on_pre_init() -> Result<()> {
    let (mut driver, stats) = driver_with(HeadlessBehavior::default());
    let (scrn, result) = pre_init_first(&mut driver, &test_config(), &HostState::new(true));
    result?;

    assert_eq!(scrn.chipset, "wayland");
    assert_eq!(scrn.depth, 24);
    assert_eq!(scrn.bits_per_pixel, 32);
    assert_eq!((scrn.x_dpi, scrn.y_dpi), (96, 96));
    assert_eq!(scrn.current_mode().map(|m| m.name.as_str()), Some("64x48"));
    let device = scrn.driver_private.as_ref().expect("device state after pre-init");
    assert!(device.has_session());
    assert_eq!(device.state(), ScreenState::Uninitialized);

    let stats = stats.borrow();
    assert_eq!((stats.created, stats.pre_inits, stats.destroyed), (1, 1, 0));
    Ok(())
}

#[test_log::test]
fn it_should_use_the_configured_dpi() -> Result<()> {
    let (mut driver, _stats) = driver_with(HeadlessBehavior::default());
    let mut config = test_config();
    config.screen.dpi = Some(120);
    let (scrn, result) = pre_init_first(&mut driver, &config, &HostState::new(true));
    result?;
    assert_eq!((scrn.x_dpi, scrn.y_dpi), (120, 120));
    Ok(())
}

#[test_log::test]
fn it_should_refuse_to_run_outside_rootless_mode() {
    let (mut driver, stats) = driver_with(HeadlessBehavior::default());
    let (scrn, result) = pre_init_first(&mut driver, &test_config(), &HostState::new(false));

    let err = result.unwrap_err();
    assert!(matches!(
        err.downcast_ref::<DriverError>(),
        Some(DriverError::Configuration(msg)) if msg.contains("-xwayland")
    ));
    assert!(scrn.driver_private.is_none());
    assert_eq!(stats.borrow().created, 0);
}

#[test_log::test]
fn it_should_reject_unsupported_depths() {
    for depth in [8u8, 15, 16] {
        let (mut driver, stats) = driver_with(HeadlessBehavior::default());
        let mut config = test_config();
        config.screen.depth = depth;
        let (scrn, result) = pre_init_first(&mut driver, &config, &HostState::new(true));

        let err = result.unwrap_err();
        assert!(matches!(
            err.downcast_ref::<DriverError>(),
            Some(DriverError::Configuration(_))
        ));
        assert!(scrn.driver_private.is_none());
        assert_eq!(stats.borrow().created, 0, "depth {} got as far as the session", depth);
    }
}

#[test_log::test]
fn it_should_accept_every_supported_depth() -> Result<()> {
    for depth in [24u8, 30, 32] {
        let (mut driver, _stats) = driver_with(HeadlessBehavior::default());
        let mut config = test_config();
        config.screen.depth = depth;
        let (scrn, result) = pre_init_first(&mut driver, &config, &HostState::new(true));
        result?;
        assert_eq!(scrn.depth, depth);
        assert_eq!(scrn.bits_per_pixel, 32);
    }
    Ok(())
}

#[test_log::test]
fn it_should_abort_and_destroy_the_session_when_its_pre_init_fails() {
    let (mut driver, stats) = driver_with(HeadlessBehavior {
        fail_pre_init: true,
        ..HeadlessBehavior::default()
    });
    let (scrn, result) = pre_init_first(&mut driver, &test_config(), &HostState::new(true));

    let err = result.unwrap_err();
    assert!(matches!(
        err.downcast_ref::<DriverError>(),
        Some(DriverError::ExternalSession(_))
    ));
    assert!(scrn.driver_private.is_none());
    let stats = stats.borrow();
    assert_eq!((stats.created, stats.destroyed), (1, 1));
}

#[test_log::test]
fn it_should_fail_when_no_mode_fits_the_virtual_screen() {
    let (mut driver, stats) = driver_with(HeadlessBehavior::default());
    let mut config = test_config();
    config.screen.modes = vec![
        ModeConfig {
            name: "huge".to_string(),
            width: 4096,
            height: 48,
        },
        ModeConfig {
            name: "empty".to_string(),
            width: 0,
            height: 0,
        },
    ];
    let (scrn, result) = pre_init_first(&mut driver, &config, &HostState::new(true));

    let err = result.unwrap_err();
    assert!(matches!(
        err.downcast_ref::<DriverError>(),
        Some(DriverError::Configuration(msg)) if msg == "No valid modes found"
    ));
    assert!(scrn.driver_private.is_none());
    assert_eq!(stats.borrow().destroyed, 1);
}

#[test_log::test]
fn it_should_prune_modes_larger_than_the_virtual_screen() -> Result<()> {
    let (mut driver, _stats) = driver_with(HeadlessBehavior::default());
    let mut config = test_config();
    config.screen.modes.insert(
        0,
        ModeConfig {
            name: "too-tall".to_string(),
            width: 64,
            height: 480,
        },
    );
    let (scrn, result) = pre_init_first(&mut driver, &config, &HostState::new(true));
    result?;
    assert_eq!(scrn.modes.len(), 1);
    assert_eq!(scrn.current_mode().map(|m| m.name.as_str()), Some("64x48"));
    Ok(())
}

// --- Screen lifecycle ---

#[test_log::test]
fn it_should_initialize_and_register_the_damage_notifier() -> Result<()> {
    let (mut server, stats) = server_with(HeadlessBehavior::default(), HostState::new(true));
    server.start()?;

    let scrn = server.screen(ScreenIndex(0)).expect("one screen");
    assert!(scrn.vt_sema);
    let device = device(&server).expect("device state");
    assert_eq!(device.state(), ScreenState::Initialized);
    assert_eq!(device.framebuffer().map(<[u8]>::len), Some(64 * 48 * 4));
    assert!(device.is_damage_registered());
    assert!(server.host().registered_handlers().contains(&ScreenIndex(0)));
    assert_eq!(stats.borrow().inits, 1);

    assert!(server.shutdown());
    Ok(())
}

#[test_log::test]
fn it_should_make_a_second_close_a_no_op() -> Result<()> {
    let (mut server, stats) = server_with(HeadlessBehavior::default(), HostState::new(true));
    server.start()?;

    assert!(server.close_screen(ScreenIndex(0)));
    assert!(server.close_screen(ScreenIndex(0)));

    assert_eq!(server.host().handler_adds(), 1);
    assert_eq!(server.host().handler_removes(), 1);
    assert!(server.host().registered_handlers().is_empty());
    assert_eq!(server.host_closes(), 1);
    assert_eq!(stats.borrow().closes, 1);

    let scrn = server.screen(ScreenIndex(0)).expect("one screen");
    assert!(!scrn.vt_sema);
    let device = device(&server).expect("device state survives close");
    assert!(device.framebuffer().is_none());
    assert_eq!(device.state(), ScreenState::Closed);

    server.shutdown();
    assert_eq!(server.host_closes(), 1);
    assert_eq!(stats.borrow().destroyed, 1);
    Ok(())
}

#[test_log::test]
fn it_should_free_a_session_left_over_from_pre_init() -> Result<()> {
    let (mut driver, stats) = driver_with(HeadlessBehavior::default());
    let (mut scrn, result) = pre_init_first(&mut driver, &test_config(), &HostState::new(true));
    result?;

    driver.free_screen(&mut scrn);
    assert!(scrn.driver_private.is_none());
    assert_eq!(stats.borrow().destroyed, 1);
    assert_eq!(stats.borrow().closes, 0);

    driver.free_screen(&mut scrn);
    assert_eq!(stats.borrow().destroyed, 1);
    Ok(())
}

#[test_log::test]
fn it_should_unwind_when_the_rasterizer_rejects_the_screen() {
    let host = HostState::new(true).with_failing_rasterizer();
    let (mut server, stats) = server_with(HeadlessBehavior::default(), host);

    let err = server.start().unwrap_err();
    assert!(err
        .chain()
        .any(|e| matches!(e.downcast_ref::<DriverError>(), Some(DriverError::Configuration(_)))));

    assert_eq!(server.host().handler_adds(), 0);
    assert_eq!(server.host().handler_removes(), 0);
    // The host's own close hook still runs exactly once.
    assert_eq!(server.host_closes(), 1);
    let stats = stats.borrow();
    assert_eq!((stats.inits, stats.closes), (0, 0));
    assert_eq!((stats.created, stats.destroyed), (1, 1));
}

#[test_log::test]
fn it_should_report_a_session_that_fails_to_attach_to_the_screen() {
    let (mut server, stats) = server_with(
        HeadlessBehavior {
            fail_init: true,
            ..HeadlessBehavior::default()
        },
        HostState::new(true),
    );

    let err = server.start().unwrap_err();
    assert!(err
        .chain()
        .any(|e| matches!(e.downcast_ref::<DriverError>(), Some(DriverError::ExternalSession(_)))));

    assert_eq!(server.host().handler_adds(), 1);
    assert_eq!(server.host().handler_removes(), 1);
    assert_eq!(server.host_closes(), 1);
    assert_eq!(stats.borrow().destroyed, 1);
}

#[test_log::test]
fn it_should_abort_start_when_pre_init_fails() {
    let (mut server, stats) = server_with(HeadlessBehavior::default(), HostState::new(false));
    assert!(server.start().is_err());
    assert_eq!(server.screen_count(), 0);
    assert_eq!(server.host().handler_adds(), 0);
    assert_eq!(stats.borrow().created, 0);
}

#[test_log::test]
fn it_should_keep_unused_options_on_the_device() -> Result<()> {
    let (mut driver, _stats) = driver_with(HeadlessBehavior::default());
    let mut config = test_config();
    config.devices[0]
        .options
        .insert("ShadowFB".to_string(), "on".to_string());
    let (scrn, result) = pre_init_first(&mut driver, &config, &HostState::new(true));
    result?;
    let device = scrn.driver_private.as_ref().expect("device state");
    assert_eq!(device.options().get("ShadowFB").map(String::as_str), Some("on"));
    Ok(())
}

// --- Damage notifier ---

#[test_log::test]
fn it_should_post_damage_once_per_iteration_without_a_timeout() -> Result<()> {
    let (mut server, stats) = server_with(HeadlessBehavior::default(), HostState::new(true));
    server.start()?;

    assert_eq!(server.dispatch_once(), None);
    assert_eq!(server.dispatch_once(), None);
    assert_eq!(stats.borrow().damage_posts, 2);

    server.shutdown();
    assert_eq!(server.dispatch_once(), None);
    assert_eq!(stats.borrow().damage_posts, 2);
    Ok(())
}

#[test_log::test]
fn it_should_tolerate_a_device_without_a_session() {
    let mut device = WlshmDevice::new(ShmConfig::default());
    let mut timeout: Option<Duration> = None;
    device.block_handler(&mut timeout, &[]);
    device.wakeup_handler(0, &[]);
    assert_eq!(timeout, None);
}

// --- Window buffer hand-off ---

#[test_log::test]
fn it_should_preserve_content_across_the_hand_off() -> Result<()> {
    let (mut server, stats) = server_with(HeadlessBehavior::default(), HostState::new(true));
    server.start()?;
    let id = server.create_pixmap(ScreenIndex(0), 4, 4)?;
    let pattern: Vec<u8> = (0..64u8).collect();
    server
        .pixmap_mut(id)
        .and_then(|p| p.pixels_mut())
        .expect("host storage")
        .copy_from_slice(&pattern);

    server.create_window_buffer(id)?;

    let pixmap = server.pixmap(id).expect("pixmap");
    assert!(pixmap.is_shared());
    assert_eq!(pixmap.pixels(), Some(pattern.as_slice()));
    let buffer = device(&server)
        .and_then(|d| d.registry().lookup(id))
        .expect("registered buffer");
    assert_eq!(buffer.len(), 64);
    assert_eq!(buffer.as_slice(), pattern.as_slice());
    assert_eq!(stats.borrow().buffers_accepted, 1);

    server.dispatch_once();
    assert_eq!(stats.borrow().frames_presented, 1);
    server.dispatch_once();
    assert_eq!(stats.borrow().frames_presented, 1);

    // Drawing through the pixmap lands in the buffer the session maps.
    if let Some(pixels) = server.pixmap_mut(id).and_then(|p| p.pixels_mut()) {
        pixels[0] = 0xaa;
    }
    server.dispatch_once();
    assert_eq!(stats.borrow().frames_presented, 2);

    server.shutdown();
    assert_eq!(stats.borrow().buffers_released, 1);
    Ok(())
}

#[test_log::test]
fn it_should_leave_the_pixmap_alone_when_the_session_refuses_the_buffer() -> Result<()> {
    let (mut server, stats) = server_with(
        HeadlessBehavior {
            reject_buffers: true,
            ..HeadlessBehavior::default()
        },
        HostState::new(true),
    );
    server.start()?;
    let id = server.create_pixmap(ScreenIndex(0), 8, 8)?;

    let err = server.create_window_buffer(id).unwrap_err();
    assert!(err
        .chain()
        .any(|e| matches!(e.downcast_ref::<DriverError>(), Some(DriverError::ExternalSession(_)))));

    let pixmap = server.pixmap(id).expect("pixmap");
    assert!(matches!(pixmap.storage(), PixmapStorage::Host(_)));
    assert!(device(&server).map_or(false, |d| d.registry().is_empty()));
    assert_eq!(stats.borrow().buffers_accepted, 0);

    server.shutdown();
    Ok(())
}

#[test_log::test]
fn it_should_replace_an_existing_buffer_on_a_repeated_hand_off() -> Result<()> {
    let (mut server, stats) = server_with(HeadlessBehavior::default(), HostState::new(true));
    server.start()?;
    let id = server.create_pixmap(ScreenIndex(0), 4, 4)?;
    server.create_window_buffer(id)?;
    if let Some(pixels) = server.pixmap_mut(id).and_then(|p| p.pixels_mut()) {
        pixels.fill(0x5a);
    }
    let first = device(&server)
        .and_then(|d| d.registry().lookup(id))
        .map(|b| b.as_ptr());

    server.create_window_buffer(id)?;

    let registry = device(&server).map(|d| d.registry()).expect("device state");
    assert_eq!(registry.len(), 1);
    let second = registry.lookup(id).map(|b| b.as_ptr());
    assert!(second.is_some());
    assert_ne!(first, None);
    let pixmap = server.pixmap(id).expect("pixmap");
    assert!(pixmap.pixels().map_or(false, |p| p.iter().all(|&b| b == 0x5a)));
    {
        let stats = stats.borrow();
        assert_eq!(stats.buffers_accepted, 2);
        assert_eq!(stats.buffers_released, 1);
    }

    server.shutdown();
    Ok(())
}

#[test_log::test]
fn it_should_release_buffers_still_attached_at_close() -> Result<()> {
    let (mut server, stats) = server_with(HeadlessBehavior::default(), HostState::new(true));
    server.start()?;
    let mut ids = Vec::new();
    for _ in 0..3 {
        let id = server.create_pixmap(ScreenIndex(0), 2, 2)?;
        server.create_window_buffer(id)?;
        ids.push(id);
    }
    assert_eq!(device(&server).map(|d| d.registry().len()), Some(3));

    assert!(server.close_screen(ScreenIndex(0)));

    assert_eq!(device(&server).map(|d| d.registry().len()), Some(0));
    assert_eq!(stats.borrow().buffers_released, 3);
    for id in ids {
        let pixmap = server.pixmap(id).expect("pixmap survives the screen");
        assert!(!pixmap.is_shared());
        assert_eq!(pixmap.pixels(), None);
    }
    Ok(())
}

#[test_log::test]
fn it_should_keep_leftover_pixmaps_readable_after_the_device_closes() -> Result<()> {
    let (factory, stats) = HeadlessSession::factory(HeadlessBehavior::default());
    let mut device = WlshmDevice::new(test_config().shm);
    device.set_session(factory()?);
    let mut pixmap = Pixmap::new(crate::display::pixmap::PixmapId(9), 4, 4, 32);
    if let Some(pixels) = pixmap.pixels_mut() {
        pixels.fill(0x42);
    }
    device.create_window_buffer(&mut pixmap)?;

    let mut host = HostState::new(true);
    assert!(device.close_screen(ScreenIndex(0), &mut host));
    assert!(device.registry().is_empty());
    assert_eq!(stats.borrow().buffers_released, 1);

    assert!(pixmap.is_shared());
    let sum: u64 = pixmap
        .pixels()
        .expect("shared storage")
        .iter()
        .map(|&b| u64::from(b))
        .sum();
    assert_eq!(sum, 64 * 0x42);
    if let Some(pixels) = pixmap.pixels_mut() {
        pixels[0] = 0;
    }

    device.destroy_session();
    assert_eq!(pixmap.pixels().map(|p| p[1]), Some(0x42));
    Ok(())
}

#[test_log::test]
fn it_should_keep_the_current_buffer_when_a_repeated_hand_off_is_refused() -> Result<()> {
    let (mut server, stats) = server_with(
        HeadlessBehavior {
            accept_limit: Some(1),
            ..HeadlessBehavior::default()
        },
        HostState::new(true),
    );
    server.start()?;
    let id = server.create_pixmap(ScreenIndex(0), 4, 4)?;
    server.create_window_buffer(id)?;
    if let Some(pixels) = server.pixmap_mut(id).and_then(|p| p.pixels_mut()) {
        pixels.fill(0x5a);
    }
    let first = device(&server)
        .and_then(|d| d.registry().lookup(id))
        .map(|b| b.as_ptr());

    let err = server.create_window_buffer(id).unwrap_err();
    assert!(err
        .chain()
        .any(|e| matches!(e.downcast_ref::<DriverError>(), Some(DriverError::ExternalSession(_)))));

    let pixmap = server.pixmap(id).expect("pixmap");
    assert!(pixmap.is_shared());
    assert_eq!(pixmap.pixels().map(<[u8]>::len), Some(64));
    assert!(pixmap.pixels().map_or(false, |p| p.iter().all(|&b| b == 0x5a)));
    let registry = device(&server).map(|d| d.registry()).expect("device state");
    assert_eq!(registry.len(), 1);
    assert_eq!(registry.lookup(id).map(|b| b.as_ptr()), first);
    {
        let stats = stats.borrow();
        assert_eq!(stats.buffers_accepted, 1);
        assert_eq!(stats.buffers_released, 0);
    }

    server.shutdown();
    Ok(())
}

#[test_log::test]
fn it_should_fail_the_hand_off_without_a_session() {
    let mut device = WlshmDevice::new(ShmConfig::default());
    let mut pixmap = Pixmap::new(crate::display::pixmap::PixmapId(1), 2, 2, 32);
    let err = device.create_window_buffer(&mut pixmap).unwrap_err();
    assert!(matches!(err, DriverError::ExternalSession(_)));
    assert!(matches!(pixmap.storage(), PixmapStorage::Host(_)));
}
