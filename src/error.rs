// src/error.rs

//! Error types for the shared-memory display driver.
//!
//! Failures fall into three families: configuration problems that abort a
//! screen's setup, resource exhaustion that aborts a single operation after
//! releasing whatever it had acquired, and failures reported by the external
//! screen session.

use std::fmt;
use std::io;

use crate::display::pixmap::PixmapId;

/// The step of the shared-buffer allocation sequence that failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AllocStep {
    /// Creating the backing object (temp file or memfd).
    Create,
    /// Sizing the backing object to the requested length.
    Resize,
    /// Mapping the backing object into the address space.
    Map,
    /// Allocating the primary in-memory framebuffer.
    Framebuffer,
}

impl fmt::Display for AllocStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AllocStep::Create => write!(f, "create"),
            AllocStep::Resize => write!(f, "ftruncate"),
            AllocStep::Map => write!(f, "mmap"),
            AllocStep::Framebuffer => write!(f, "framebuffer allocation"),
        }
    }
}

#[derive(Debug)]
pub enum DriverError {
    /// Unsupported depth, missing host mode, no usable modes.
    Configuration(String),
    /// An allocation step failed; partial resources were already released.
    ResourceExhaustion { step: AllocStep, source: io::Error },
    /// The external screen session refused or failed a request.
    ExternalSession(String),
    /// `attach` was called for a pixmap that already has a shared buffer.
    AlreadyAttached(PixmapId),
    /// The driver module was registered a second time.
    AlreadyLoaded,
}

impl DriverError {
    pub fn configuration(msg: impl Into<String>) -> Self {
        DriverError::Configuration(msg.into())
    }

    pub fn session(msg: impl Into<String>) -> Self {
        DriverError::ExternalSession(msg.into())
    }

    pub fn resource(step: AllocStep, source: io::Error) -> Self {
        DriverError::ResourceExhaustion { step, source }
    }

    /// The allocation step that failed, if this is a resource error.
    pub fn alloc_step(&self) -> Option<AllocStep> {
        match self {
            DriverError::ResourceExhaustion { step, .. } => Some(*step),
            _ => None,
        }
    }
}

impl fmt::Display for DriverError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DriverError::Configuration(msg) => write!(f, "configuration error: {}", msg),
            DriverError::ResourceExhaustion { step, source } => {
                write!(f, "{} failed: {}", step, source)
            }
            DriverError::ExternalSession(msg) => write!(f, "external session failure: {}", msg),
            DriverError::AlreadyAttached(id) => {
                write!(f, "pixmap {} already has a shared buffer attached", id)
            }
            DriverError::AlreadyLoaded => write!(f, "driver module may only be loaded once"),
        }
    }
}

impl std::error::Error for DriverError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            DriverError::ResourceExhaustion { source, .. } => Some(source),
            _ => None,
        }
    }
}

pub type Result<T> = std::result::Result<T, DriverError>;
