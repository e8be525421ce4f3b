// src/driver/registry.rs

//! Process-wide driver registration.
//!
//! A driver module may be set up only once per server process. The registry
//! records that explicitly instead of relying on a hidden static flag.

use log::{info, warn};

use crate::driver::{driver_version, ScreenDriver};
use crate::error::{DriverError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RegistrationState {
    #[default]
    Unregistered,
    Registered,
}

/// What the host learns about a driver when it is added.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DriverRecord {
    pub name: &'static str,
    pub version: u32,
    pub options: &'static [&'static str],
}

#[derive(Debug, Default)]
pub struct DriverRegistry {
    state: RegistrationState,
    drivers: Vec<DriverRecord>,
}

impl DriverRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self) -> RegistrationState {
        self.state
    }

    pub fn drivers(&self) -> &[DriverRecord] {
        &self.drivers
    }

    /// Module setup: adds `driver` to the host's driver list. Fails with
    /// `AlreadyLoaded` on any later call.
    pub fn setup(&mut self, driver: &dyn ScreenDriver) -> Result<&DriverRecord> {
        if self.state == RegistrationState::Registered {
            warn!("Driver module \"{}\" is already loaded", driver.name());
            return Err(DriverError::AlreadyLoaded);
        }
        self.state = RegistrationState::Registered;

        let record = DriverRecord {
            name: driver.name(),
            version: driver_version(),
            options: driver.available_options(),
        };
        info!(
            "Registered driver \"{}\" version {:#08x}",
            record.name, record.version
        );
        self.drivers.push(record);
        Ok(&self.drivers[self.drivers.len() - 1])
    }
}
