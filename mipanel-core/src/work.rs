//! Deferred work with cancel-before-fire semantics.
//!
//! A [`Scheduler`] only decides *when* a task runs. Whether it still should
//! run is decided by a [`DelayedSlot`] that lives inside the locked panel
//! state: the task claims its ticket under the panel lock, so a cancel made
//! while holding that lock can never race with the task body.

use log::error;
use std::time::Duration;

/// A unit of deferred work.
pub type Task = Box<dyn FnOnce() + Send + 'static>;

/// Runs tasks at some later time.
pub trait Scheduler: Send + Sync {
    /// Run `task` once `delay` has elapsed.
    fn schedule(&self, delay: Duration, task: Task);
}

/// Runs every task on its own short-lived thread.
#[derive(Debug, Clone, Copy, Default)]
pub struct ThreadScheduler;

impl Scheduler for ThreadScheduler {
    fn schedule(&self, delay: Duration, task: Task) {
        let spawned = std::thread::Builder::new()
            .name("mipanel-work".into())
            .spawn(move || {
                std::thread::sleep(delay);
                task();
            });
        if let Err(e) = spawned {
            error!("failed to spawn delayed work thread: {}", e);
        }
    }
}

/// Ticket bookkeeping for one kind of delayed action.
#[derive(Debug, Clone, Default)]
pub struct DelayedSlot {
    issued: u64,
    pending: Option<u64>,
}

impl DelayedSlot {
    /// Arm the slot, superseding any earlier ticket, and return the new ticket.
    pub fn arm(&mut self) -> u64 {
        self.issued = self.issued.wrapping_add(1);
        self.pending = Some(self.issued);
        self.issued
    }

    /// Drop the pending ticket. Returns whether something was pending.
    pub fn cancel(&mut self) -> bool {
        self.pending.take().is_some()
    }

    /// Consume `ticket` if it is still the pending one.
    pub fn claim(&mut self, ticket: u64) -> bool {
        if self.pending == Some(ticket) {
            self.pending = None;
            true
        } else {
            false
        }
    }

    /// Whether a ticket is waiting to fire.
    pub fn is_pending(&self) -> bool {
        self.pending.is_some()
    }
}
