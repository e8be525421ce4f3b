// src/display/teardown.rs

//! Ordered close-screen chain.
//!
//! Each layer that wraps screen teardown pushes a hook; closing runs every
//! hook once, in push order, and leaves the chain empty so a repeated close
//! has nothing left to run.

use std::fmt;

use log::{debug, warn};

use crate::host::ScreenIndex;

pub type CloseHook = Box<dyn FnOnce(ScreenIndex) -> bool>;

#[derive(Default)]
pub struct TeardownChain {
    hooks: Vec<(&'static str, CloseHook)>,
}

impl TeardownChain {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push<F>(&mut self, name: &'static str, hook: F)
    where
        F: FnOnce(ScreenIndex) -> bool + 'static,
    {
        self.hooks.push((name, Box::new(hook)));
    }

    /// Moves every hook out, leaving this chain empty.
    pub fn take(&mut self) -> TeardownChain {
        std::mem::take(self)
    }

    /// Runs all hooks in order. Every hook runs even if an earlier one
    /// fails; the result is true only if all of them succeeded.
    pub fn run(&mut self, screen: ScreenIndex) -> bool {
        let mut ok = true;
        for (name, hook) in self.hooks.drain(..) {
            debug!("Running close hook '{}' for screen {}", name, screen);
            if !hook(screen) {
                warn!("Close hook '{}' failed for screen {}", name, screen);
                ok = false;
            }
        }
        ok
    }

    pub fn len(&self) -> usize {
        self.hooks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.hooks.is_empty()
    }
}

impl fmt::Debug for TeardownChain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list()
            .entries(self.hooks.iter().map(|(name, _)| name))
            .finish()
    }
}
