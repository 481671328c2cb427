//! # Radio Lock - Reentrant Driver Lock With Deferred On/Off
//!
//! The transport driver holds this lock for the whole of every state-changing operation.
//! It is a depth counter, not a mutex: it guards operation sequences inside the single
//! cooperative context and is never touched from interrupt context.
//!
//! ## State Machine
//!
//! - `depth == 0`: unlocked, on/off are performed immediately
//! - `depth > 0`: locked, on/off requests are recorded as the pending transition;
//!   a later request replaces an earlier one
//! - release from `depth == 1` hands the pending transition back exactly once

/// Receiver transition requested while the lock was held
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PendingTransition {
    On,
    Off,
}

#[derive(Debug, Default)]
pub struct RadioLock {
    depth: u8,
    pending: Option<PendingTransition>,
}

impl RadioLock {
    pub const fn new() -> Self {
        RadioLock { depth: 0, pending: None }
    }

    pub fn is_locked(&self) -> bool {
        self.depth > 0
    }

    pub fn depth(&self) -> u8 {
        self.depth
    }

    pub fn pending(&self) -> Option<PendingTransition> {
        self.pending
    }

    pub fn acquire(&mut self) {
        self.depth = self.depth.saturating_add(1);
    }

    /// Records a deferred `on()`
    ///
    /// # Returns
    /// `false` if the lock is not held, in which case nothing is recorded and the caller
    /// must perform the transition itself
    pub fn request_on(&mut self) -> bool {
        self.request(PendingTransition::On)
    }

    /// Records a deferred `off()`, see [`RadioLock::request_on`]
    pub fn request_off(&mut self) -> bool {
        self.request(PendingTransition::Off)
    }

    fn request(&mut self, transition: PendingTransition) -> bool {
        if !self.is_locked() {
            return false;
        }
        self.pending = Some(transition);
        true
    }

    /// Drops one level of the lock
    ///
    /// # Returns
    /// The pending transition when this release brought the depth to zero, `None`
    /// otherwise. The pending transition is cleared when returned.
    pub fn release(&mut self) -> Option<PendingTransition> {
        match self.depth {
            0 => {
                log::warn!("Radio lock released while not held");
                None
            }
            1 => {
                self.depth = 0;
                self.pending.take()
            }
            _ => {
                self.depth -= 1;
                None
            }
        }
    }

    /// Back to the unlocked state, discarding any pending transition
    pub fn reset(&mut self) {
        self.depth = 0;
        self.pending = None;
    }
}
