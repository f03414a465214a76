//! Admission path: receive buffer → HTTP parse → JSON parse → arena alloc
//! → publish to the submission ring.
//!
//! Extracted from the event loop so integration tests and benchmarks can
//! drive it without a live epoll loop. Admits at most one request per call:
//! read and write phases are strictly serialized per connection, so a
//! pipelined follow-up stays buffered until the current response is
//! written.

use std::fmt;
use std::os::unix::io::RawFd;
use std::time::Instant;

use crate::buffer_pool::{AllocError, BytePool};
use crate::codec::{self, CodecError};
use crate::http;
use crate::metrics;
use crate::queue::Enqueuer;
use crate::ring_types::RequestSlot;

/// Connection-fatal admission failure: the request was never admitted, so
/// no completion is owed and the socket should be closed.
#[derive(Debug)]
pub enum AdmitError {
    Http(&'static str),
    Codec(CodecError),
    Alloc(AllocError),
}

impl fmt::Display for AdmitError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AdmitError::Http(e) => write!(f, "http parse: {e}"),
            AdmitError::Codec(e) => write!(f, "body: {e}"),
            AdmitError::Alloc(e) => write!(f, "payload arena: {e:?}"),
        }
    }
}

pub enum Admission {
    /// One request published. `consumed` bytes of the buffer belong to it;
    /// `keep_alive` is the parsed connection preference.
    Queued { consumed: usize, keep_alive: bool },
    /// More bytes needed before a request can be parsed.
    Incomplete,
}

/// Try to admit the first request buffered on a connection.
pub fn admit_one(
    buf: &[u8],
    submissions: &mut Enqueuer<RequestSlot>,
    pool: &'static BytePool,
    conn_fd: RawFd,
    epoll_fd: RawFd,
    generation: u32,
) -> Result<Admission, AdmitError> {
    let head = match http::try_parse_request(buf) {
        http::ParseResult::Complete(head) => head,
        http::ParseResult::Incomplete(_) => return Ok(Admission::Incomplete),
        http::ParseResult::Error(e) => return Err(AdmitError::Http(e)),
    };

    let body = &buf[head.header_len..head.total_len];
    let (model, image) = codec::parse_request_json(body).map_err(AdmitError::Codec)?;

    let mut payload = pool.alloc(image.len()).map_err(AdmitError::Alloc)?;
    payload.as_mut_slice().copy_from_slice(&image);
    let mut payload = Some(payload.freeze());

    let enqueued_at = Instant::now();
    submissions.enqueue_spin(
        |slot| {
            slot.conn_fd = conn_fd;
            slot.epoll_fd = epoll_fd;
            slot.generation = generation;
            slot.enqueued_at = enqueued_at;
            slot.set_model_name(&model);
            slot.image = payload.take().expect("payload already moved into ring");
        },
        metrics::inc_sq_ring_full,
    );
    metrics::inc_requests_admitted();

    Ok(Admission::Queued {
        consumed: head.total_len,
        keep_alive: head.keep_alive,
    })
}
