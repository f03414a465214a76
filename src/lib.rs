//! Library crate for infercore: queue pair, admission and completion
//! flows, inference worker, backend contract, HTTP/JSON handling.
//!
//! The **binary** (`main.rs`) is the only epoll entrypoint: it compiles
//! `event_loop` and spawns the three stage threads per core. `event_loop`
//! is intentionally not part of the lib, so the library stays testable
//! without a live reactor (integration tests drive the admission, worker,
//! and notifier flows directly, using scratch epoll instances where a real
//! kernel object is needed).

pub mod affinity;
pub mod backend;
pub mod buffer_pool;
pub mod codec;
pub mod config;
#[cfg(feature = "cuda")]
pub mod gpu;
pub mod http;
pub mod metrics;
pub mod notifier;
pub mod poll;
pub mod queue;
pub mod request_flow;
pub mod ring_types;
pub mod worker;
