// src/display/damage.rs

//! Damage notifier: the per-iteration hook that tells the screen session to
//! present whatever was drawn since the previous iteration.
//!
//! The host calls `block_handler` right before it waits for input and
//! `wakeup_handler` right after. Both are registered and removed as a pair.

use std::os::unix::io::RawFd;
use std::time::Duration;

use log::trace;

use crate::display::screen::WlshmDevice;

/// Pre-wait / post-wait hooks run once per host dispatch iteration.
pub trait BlockWakeupHandler {
    /// Runs before the host blocks. May shorten `timeout`; must not block.
    fn block_handler(&mut self, timeout: &mut Option<Duration>, read_mask: &[RawFd]);

    /// Runs after the host wakes up with `result` ready descriptors.
    fn wakeup_handler(&mut self, result: i32, read_mask: &[RawFd]);
}

impl BlockWakeupHandler for WlshmDevice {
    fn block_handler(&mut self, _timeout: &mut Option<Duration>, _read_mask: &[RawFd]) {
        if let Some(session) = self.session_mut() {
            trace!("Posting damage to screen session");
            session.post_damage();
        }
    }

    fn wakeup_handler(&mut self, _result: i32, _read_mask: &[RawFd]) {}
}
