use std::os::unix::io::RawFd;
use std::time::Instant;

use crate::buffer_pool::PooledBytes;
use crate::config::{MODEL_NAME_SIZE, RESULT_SIZE};

/// Entry in the submission ring. Pre-allocated per slot via factory; the
/// front end fills it inside the publish closure, the worker reads it and
/// releases the payload.
#[repr(C, align(64))]
pub struct RequestSlot {
    /// Socket fd of the flow this request belongs to.
    pub conn_fd: RawFd,
    /// Epoll fd of the event loop that owns the flow.
    pub epoll_fd: RawFd,
    /// Generation of the connection slot, so a completion for a
    /// closed-and-reused fd can be told apart and dropped.
    pub generation: u32,
    /// Enqueue time; the worker answers past-deadline requests with a
    /// timeout failure without touching the backend.
    pub enqueued_at: Instant,
    pub model_len: usize,
    pub model: [u8; MODEL_NAME_SIZE],
    /// Image payload exactly as received (raw or base64).
    pub image: PooledBytes,
}

impl RequestSlot {
    /// Factory for the disruptor ring - slots are overwritten on publish.
    pub fn factory() -> Self {
        Self {
            conn_fd: -1,
            epoll_fd: -1,
            generation: 0,
            enqueued_at: Instant::now(),
            model_len: 0,
            model: [0u8; MODEL_NAME_SIZE],
            image: PooledBytes::empty(),
        }
    }

    /// Requested model name; empty when the request named none.
    pub fn model_name(&self) -> &str {
        std::str::from_utf8(&self.model[..self.model_len]).unwrap_or("")
    }

    pub fn set_model_name(&mut self, name: &str) {
        let len = name.len().min(MODEL_NAME_SIZE);
        self.model[..len].copy_from_slice(&name.as_bytes()[..len]);
        self.model_len = len;
    }
}

/// Entry in the completion and writeback rings: one per consumed request,
/// success or failure.
pub struct CompletionSlot {
    pub conn_fd: RawFd,
    pub epoll_fd: RawFd,
    pub generation: u32,
    /// Backend or deadline failure; the front end renders an error body.
    pub failed: bool,
    pub result_len: usize,
    pub result: Box<[u8; RESULT_SIZE]>,
}

impl CompletionSlot {
    pub fn factory() -> Self {
        Self {
            conn_fd: -1,
            epoll_fd: -1,
            generation: 0,
            failed: false,
            result_len: 0,
            result: Box::new([0u8; RESULT_SIZE]),
        }
    }

    pub fn result_bytes(&self) -> &[u8] {
        &self.result[..self.result_len]
    }

    /// Store `text` as the result, truncating at a char boundary if it
    /// exceeds the slot bound.
    pub fn set_result(&mut self, text: &str) {
        let mut len = text.len().min(RESULT_SIZE);
        while len > 0 && !text.is_char_boundary(len) {
            len -= 1;
        }
        self.result[..len].copy_from_slice(&text.as_bytes()[..len]);
        self.result_len = len;
    }

    /// Copy another completion into this slot (notifier republish path).
    pub fn copy_from(&mut self, other: &CompletionSlot) {
        self.conn_fd = other.conn_fd;
        self.epoll_fd = other.epoll_fd;
        self.generation = other.generation;
        self.failed = other.failed;
        self.result_len = other.result_len;
        self.result[..other.result_len].copy_from_slice(other.result_bytes());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn model_name_roundtrip() {
        let mut slot = RequestSlot::factory();
        slot.set_model_name("resnet50");
        assert_eq!(slot.model_name(), "resnet50");
    }

    #[test]
    fn model_name_truncated_at_bound() {
        let mut slot = RequestSlot::factory();
        let long = "m".repeat(MODEL_NAME_SIZE + 10);
        slot.set_model_name(&long);
        assert_eq!(slot.model_name().len(), MODEL_NAME_SIZE);
    }

    #[test]
    fn result_truncated_at_char_boundary() {
        let mut slot = CompletionSlot::factory();
        // 3-byte chars: a cut at RESULT_SIZE lands mid-char, so the
        // truncation must back off to the previous boundary.
        let text = "\u{20AC}".repeat(RESULT_SIZE / 3 + 10);
        slot.set_result(&text);
        assert_eq!(slot.result_len, RESULT_SIZE - RESULT_SIZE % 3);
        assert!(std::str::from_utf8(slot.result_bytes()).is_ok());
    }

    #[test]
    fn copy_from_carries_all_fields() {
        let mut a = CompletionSlot::factory();
        a.conn_fd = 7;
        a.epoll_fd = 3;
        a.generation = 2;
        a.failed = true;
        a.set_result("('cat', '0.9000')");

        let mut b = CompletionSlot::factory();
        b.copy_from(&a);
        assert_eq!(b.conn_fd, 7);
        assert_eq!(b.epoll_fd, 3);
        assert_eq!(b.generation, 2);
        assert!(b.failed);
        assert_eq!(b.result_bytes(), a.result_bytes());
    }
}
