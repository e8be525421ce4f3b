// src/display/drivers/mod.rs
//! Screen session implementations.

pub mod headless;

pub use headless::{HeadlessBehavior, HeadlessSession, SessionProbe, SessionStats};
