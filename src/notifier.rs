//! Completion notifier: the only path by which a parked connection moves
//! toward its response write.
//!
//! Drains the completion ring, forwards each completion's payload to the
//! owning core's writeback ring, then flips the socket to write interest.
//! The publish happens before the interest flip, so by the time the front
//! end wakes with a write event its result is already in the writeback
//! ring. Connection state itself is never touched from here.

use disruptor::Polling;
use log::debug;

use crate::poll;
use crate::queue::{Drainer, Enqueuer};
use crate::ring_types::CompletionSlot;

pub struct CompletionNotifier {
    completions: Drainer<CompletionSlot>,
    writeback: Enqueuer<CompletionSlot>,
}

impl CompletionNotifier {
    pub fn new(
        completions: Drainer<CompletionSlot>,
        writeback: Enqueuer<CompletionSlot>,
    ) -> Self {
        Self {
            completions,
            writeback,
        }
    }

    /// Busy-poll loop; returns when the worker shuts down.
    pub fn run(mut self) {
        loop {
            match self.process_one_poll_cycle() {
                Ok(_) => {}
                Err(Polling::NoEvents) => std::hint::spin_loop(),
                Err(Polling::Shutdown) => return,
            }
        }
    }

    /// Forward every currently available completion and arm its socket for
    /// writing. Returns the number forwarded.
    pub fn process_one_poll_cycle(&mut self) -> Result<usize, Polling> {
        let Self {
            completions,
            writeback,
        } = self;

        completions.drain(|resp| {
            writeback.enqueue_spin(|slot| slot.copy_from(resp), || {});

            // A failed flip means the connection closed while the request
            // was in flight; the front end drops the stale writeback entry
            // by generation check.
            if let Err(e) = poll::arm_writable(resp.epoll_fd, resp.conn_fd) {
                debug!("notifier: fd {} not armed: {e}", resp.conn_fd);
            }
        })
    }
}
