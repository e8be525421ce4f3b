// tests/support/mod.rs
//! Shared helpers for the integration tests: a private segment directory and
//! counters for descriptors and mappings that point into it.

#![allow(dead_code)]

use std::path::{Path, PathBuf};

use wlshm::config::{Config, DeviceSection, ScreenConfig, ShmBackend, ShmConfig, DRIVER_NAME};

/// A directory only one test creates segments in. Removed on drop.
pub struct SegmentDir {
    path: PathBuf,
}

impl SegmentDir {
    pub fn new(test: &str) -> Self {
        let path = std::env::temp_dir().join(format!("wlshm-{}-{}", test, std::process::id()));
        std::fs::create_dir_all(&path).expect("create segment dir");
        Self { path }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn shm_config(&self) -> ShmConfig {
        ShmConfig {
            backend: ShmBackend::TempFile,
            template: self
                .path
                .join("wayland-shm-XXXXXX")
                .to_string_lossy()
                .into_owned(),
        }
    }

    fn prefix(&self) -> String {
        format!("{}/", self.path.display())
    }

    /// Open descriptors of this process whose target lives in the directory.
    pub fn open_descriptors(&self) -> usize {
        let prefix = self.prefix();
        std::fs::read_dir("/proc/self/fd")
            .expect("read /proc/self/fd")
            .filter_map(|entry| entry.ok())
            .filter_map(|entry| std::fs::read_link(entry.path()).ok())
            .filter(|target| target.to_string_lossy().starts_with(&prefix))
            .count()
    }

    /// Mappings of this process backed by a file from the directory.
    pub fn mappings(&self) -> usize {
        let prefix = self.prefix();
        std::fs::read_to_string("/proc/self/maps")
            .expect("read /proc/self/maps")
            .lines()
            .filter(|line| line.contains(&prefix))
            .count()
    }

    /// Directory entries left behind; segments are unlinked once mapped.
    pub fn entries(&self) -> usize {
        std::fs::read_dir(&self.path)
            .map(|dir| dir.count())
            .unwrap_or(0)
    }
}

impl Drop for SegmentDir {
    fn drop(&mut self) {
        let _ = std::fs::remove_dir_all(&self.path);
    }
}

/// One wayland device on a 128x128 virtual screen, segments in `dir`.
pub fn config_in(dir: &SegmentDir) -> Config {
    Config {
        screen: ScreenConfig {
            virtual_width: 128,
            virtual_height: 128,
            modes: vec![wlshm::config::ModeConfig {
                name: "128x128".to_string(),
                width: 128,
                height: 128,
            }],
            ..ScreenConfig::default()
        },
        shm: dir.shm_config(),
        devices: vec![DeviceSection {
            identifier: "Wayland0".to_string(),
            driver: DRIVER_NAME.to_string(),
            ..DeviceSection::default()
        }],
        ..Config::default()
    }
}
