//! Server sizing and operational configuration.
//!
//! Compile-time constants shared by the front end, the queue pair, and the
//! worker. Anything wire-visible (field bounds, port) matches what the
//! client binary assumes.

use std::time::Duration;

/// TCP port every core's listener binds to (SO_REUSEPORT).
pub const PORT: u16 = 8080;

/// Upper bound on logical cores the server will start pipelines on.
pub const MAX_CORES: usize = 16;

/// Max concurrent flows per core. A connection whose fd is at or beyond
/// this bound is rejected at accept time; the connection table is sized
/// to it.
pub const MAX_FLOW_NUM: usize = 10_000;

/// Per-connection receive buffer (bytes). A request that does not fit is
/// a protocol violation and closes the connection.
pub const RECV_BUF_SIZE: usize = 8192;

/// Bound on the JSON `model_name` field (bytes).
pub const MODEL_NAME_SIZE: usize = 256;

/// Bound on the JSON `image_data` field as received (raw or base64, bytes).
pub const IMAGE_BUF_SIZE: usize = 4096;

/// Bound on the textual inference result carried in a completion (bytes).
/// Longer backend output is truncated at a char boundary.
pub const RESULT_SIZE: usize = 1024;

/// Submission ring capacity per core (disruptor slots).
pub const SQ_DEPTH: usize = 1024;

/// Completion and writeback ring capacity per core. Must not be smaller
/// than SQ_DEPTH or the worker could stall on a full completion ring while
/// the front end keeps admitting.
pub const CQ_DEPTH: usize = SQ_DEPTH;

/// Payload arena capacity per core (bytes). Worst-case sizing: every
/// submission slot holding a maximum-size payload. Prevents arena
/// wraparound from overwriting payloads still queued in the ring.
pub const IMAGE_POOL_CAPACITY: usize = SQ_DEPTH * IMAGE_BUF_SIZE;

/// Deadline per request, measured from enqueue. The worker answers an
/// expired request with a timeout failure instead of invoking the backend.
pub const REQUEST_DEADLINE: Duration = Duration::from_secs(30);

/// Model loaded when the request names none.
pub const DEFAULT_MODEL: &str = "resnet50";

/// Epoll events fetched per wait call.
pub const EVENT_BATCH: usize = 1024;

// Compile-time sanity checks
const _: () = assert!(
    CQ_DEPTH >= SQ_DEPTH,
    "completion ring must cover the submission ring"
);
const _: () = assert!(
    IMAGE_POOL_CAPACITY >= SQ_DEPTH * IMAGE_BUF_SIZE,
    "payload arena is too small for the submission ring"
);
const _: () = assert!(
    RECV_BUF_SIZE >= IMAGE_BUF_SIZE,
    "receive buffer cannot hold a maximum-size payload"
);
const _: () = assert!(
    MAX_FLOW_NUM <= i32::MAX as usize,
    "flow bound must fit an fd"
);
