// src/lib.rs

//! A display driver that backs window pixmaps with anonymous shared memory
//! and hands them to a compositor-facing screen session by descriptor.

pub mod config;
pub mod display;
pub mod driver;
pub mod error;
pub mod host;
pub mod os;

pub use error::{AllocStep, DriverError};
