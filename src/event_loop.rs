//! Per-core HTTP front end: a non-blocking epoll reactor.
//!
//! One listener and one epoll instance per core, so request admission
//! scales across cores with no shared network state. Connection slots are
//! indexed by socket fd and touched only by this thread; results computed
//! by the worker come back through the writeback ring, which is drained at
//! the top of every wakeup so a write event always finds its payload
//! delivered.
//!
//! Connection lifecycle: accepted → reading → queued (parked, no epoll
//! interest) → writable (armed by the notifier) → written → closed, or
//! back to reading on keep-alive.

use std::io;
use std::os::unix::io::RawFd;

use log::{debug, error, info, warn};

use crate::buffer_pool::BytePool;
use crate::codec;
use crate::config::{EVENT_BATCH, IMAGE_POOL_CAPACITY, MAX_FLOW_NUM, RECV_BUF_SIZE};
use crate::http;
use crate::metrics;
use crate::poll;
use crate::queue::{Drainer, Enqueuer};
use crate::request_flow::{self, Admission};
use crate::ring_types::{CompletionSlot, RequestSlot};
use crate::worker::FAILURE_RESULT;

struct ConnState {
    buf: Box<[u8; RECV_BUF_SIZE]>,
    recv_len: usize,
    keep_alive: bool,
    /// Request in flight; reads are buffered but not admitted until the
    /// response is written (read/write phases are serialized).
    queued: bool,
    result: Vec<u8>,
    failed: bool,
    result_ready: bool,
    /// Distinguishes this connection from an earlier one on the same fd.
    generation: u32,
}

impl ConnState {
    fn new(generation: u32) -> Self {
        Self {
            buf: Box::new([0u8; RECV_BUF_SIZE]),
            recv_len: 0,
            keep_alive: false,
            queued: false,
            result: Vec::with_capacity(1024),
            failed: false,
            result_ready: false,
            generation,
        }
    }

    /// Keep-alive reset: back to a clean slate for the next request.
    /// Buffered pipelined bytes survive; the generation does too.
    fn reset_for_next_request(&mut self) {
        self.keep_alive = false;
        self.queued = false;
        self.result.clear();
        self.failed = false;
        self.result_ready = false;
    }
}

enum ReadStatus {
    Drained,
    PeerClosed,
    Failed(io::Error),
}

pub struct EventLoop {
    pub core: usize,
    pub listen_fd: RawFd,
    pub submissions: Enqueuer<RequestSlot>,
    pub writeback: Drainer<CompletionSlot>,
}

impl EventLoop {
    pub fn run(mut self) {
        let epoll_fd = poll::create().expect("failed to create epoll instance");
        // Created on this thread so the arena pages land on this core's
        // NUMA node.
        let pool = BytePool::leak_new(IMAGE_POOL_CAPACITY);

        let mut conns: Vec<Option<ConnState>> = Vec::new();
        conns.resize_with(MAX_FLOW_NUM, || None);
        let mut generations = vec![0u32; MAX_FLOW_NUM];

        poll::watch_readable(epoll_fd, self.listen_fd).expect("failed to register listener");
        let mut events = vec![libc::epoll_event { events: 0, u64: 0 }; EVENT_BATCH];

        info!("front-{}: event loop up", self.core);
        loop {
            let n = match poll::wait(epoll_fd, &mut events, -1) {
                Ok(n) => n,
                Err(e) => {
                    error!("front-{}: epoll_wait: {e}", self.core);
                    return;
                }
            };

            self.deliver_writeback(&mut conns);

            for event in &events[..n] {
                let fd = event.u64 as RawFd;
                let bits = event.events;

                if fd == self.listen_fd {
                    self.accept_all(epoll_fd, &mut conns, &mut generations);
                } else if bits & (libc::EPOLLERR | libc::EPOLLHUP) as u32 != 0 {
                    debug!("front-{}: error on socket {fd}", self.core);
                    self.close_connection(epoll_fd, fd, &mut conns);
                } else if bits & libc::EPOLLIN as u32 != 0 {
                    self.handle_read(epoll_fd, fd, &mut conns, pool);
                } else if bits & libc::EPOLLOUT as u32 != 0 {
                    self.handle_write(epoll_fd, fd, &mut conns, pool);
                }
            }
        }
    }

    /// Move completed results into their connection slots. Stale entries
    /// (connection closed or fd reused while the request was in flight)
    /// are dropped by generation mismatch.
    fn deliver_writeback(&mut self, conns: &mut [Option<ConnState>]) {
        let core = self.core;
        // Empty ring (NoEvents) is the common case and not an error here.
        let _ = self.writeback.drain(|resp| {
            let slot = conns
                .get_mut(resp.conn_fd as usize)
                .and_then(|c| c.as_mut());
            match slot {
                Some(conn) if conn.generation == resp.generation => {
                    conn.result.clear();
                    conn.result.extend_from_slice(resp.result_bytes());
                    conn.failed = resp.failed;
                    conn.result_ready = true;
                }
                _ => {
                    metrics::inc_stale_completions();
                    debug!("front-{core}: dropping stale completion for fd {}", resp.conn_fd);
                }
            }
        });
    }

    /// Accept every pending connection until the call would block.
    fn accept_all(
        &mut self,
        epoll_fd: RawFd,
        conns: &mut [Option<ConnState>],
        generations: &mut [u32],
    ) {
        loop {
            let fd =
                unsafe { libc::accept(self.listen_fd, std::ptr::null_mut(), std::ptr::null_mut()) };
            if fd < 0 {
                let err = io::Error::last_os_error();
                if !would_block(&err) {
                    warn!("front-{}: accept: {err}", self.core);
                }
                return;
            }

            if fd as usize >= MAX_FLOW_NUM {
                warn!("front-{}: invalid socket id {fd}, rejecting", self.core);
                metrics::inc_accept_rejected();
                unsafe {
                    libc::close(fd);
                }
                continue;
            }

            if let Err(e) = set_nonblocking(fd) {
                warn!("front-{}: fcntl on socket {fd}: {e}", self.core);
                unsafe {
                    libc::close(fd);
                }
                continue;
            }
            set_nodelay(fd);

            let generation = generations[fd as usize].wrapping_add(1);
            generations[fd as usize] = generation;
            conns[fd as usize] = Some(ConnState::new(generation));

            if let Err(e) = poll::watch_readable(epoll_fd, fd) {
                warn!("front-{}: register socket {fd}: {e}", self.core);
                conns[fd as usize] = None;
                unsafe {
                    libc::close(fd);
                }
            }
        }
    }

    fn handle_read(
        &mut self,
        epoll_fd: RawFd,
        fd: RawFd,
        conns: &mut [Option<ConnState>],
        pool: &'static BytePool,
    ) {
        let status = match conns[fd as usize].as_mut() {
            Some(conn) => read_available(fd, conn),
            None => return,
        };

        match status {
            ReadStatus::Drained => {}
            ReadStatus::PeerClosed => {
                self.close_connection(epoll_fd, fd, conns);
                return;
            }
            ReadStatus::Failed(e) => {
                warn!("front-{}: read on socket {fd}: {e}", self.core);
                self.close_connection(epoll_fd, fd, conns);
                return;
            }
        }

        let queued = conns[fd as usize]
            .as_ref()
            .map(|c| c.queued)
            .unwrap_or(true);
        if queued {
            // A request is already in flight; the bytes stay buffered.
            return;
        }

        self.try_admit(epoll_fd, fd, conns, pool);
    }

    /// Admit at most one buffered request and park the connection while the
    /// worker owns it.
    fn try_admit(
        &mut self,
        epoll_fd: RawFd,
        fd: RawFd,
        conns: &mut [Option<ConnState>],
        pool: &'static BytePool,
    ) {
        let Some(conn) = conns[fd as usize].as_mut() else {
            return;
        };

        let outcome = request_flow::admit_one(
            &conn.buf[..conn.recv_len],
            &mut self.submissions,
            pool,
            fd,
            epoll_fd,
            conn.generation,
        );

        match outcome {
            Ok(Admission::Queued {
                consumed,
                keep_alive,
            }) => {
                conn.buf.copy_within(consumed..conn.recv_len, 0);
                conn.recv_len -= consumed;
                conn.keep_alive = keep_alive;
                conn.queued = true;
                if let Err(e) = poll::park(epoll_fd, fd) {
                    warn!("front-{}: park socket {fd}: {e}", self.core);
                    self.close_connection(epoll_fd, fd, conns);
                }
            }
            Ok(Admission::Incomplete) => {
                if conn.recv_len == RECV_BUF_SIZE {
                    warn!(
                        "front-{}: request on socket {fd} exceeds {RECV_BUF_SIZE} bytes",
                        self.core
                    );
                    self.close_connection(epoll_fd, fd, conns);
                }
                // else: stay in reading, more bytes expected
            }
            Err(e) => {
                warn!("front-{}: rejecting socket {fd}: {e}", self.core);
                self.close_connection(epoll_fd, fd, conns);
            }
        }
    }

    fn handle_write(
        &mut self,
        epoll_fd: RawFd,
        fd: RawFd,
        conns: &mut [Option<ConnState>],
        pool: &'static BytePool,
    ) {
        let (ready, queued) = match conns[fd as usize].as_ref() {
            Some(conn) => (conn.result_ready, conn.queued),
            None => return,
        };
        if !ready {
            // A stale interest flip from a completion that outlived its
            // connection (fd reuse). Restore the real state's interest so
            // the level-triggered loop does not spin on EPOLLOUT.
            debug!("front-{}: socket {fd} writable, response not ready", self.core);
            let restored = if queued {
                poll::park(epoll_fd, fd)
            } else {
                poll::rearm_readable(epoll_fd, fd)
            };
            if restored.is_err() {
                self.close_connection(epoll_fd, fd, conns);
            }
            return;
        }

        let (response, keep_alive) = {
            let conn = conns[fd as usize].as_ref().expect("checked above");
            let text = std::str::from_utf8(&conn.result).unwrap_or(FAILURE_RESULT);
            let body = if conn.failed {
                codec::format_error_json(text)
            } else {
                codec::format_result_json(text)
            };
            let mut out = Vec::with_capacity(body.len() + 160);
            http::write_response_head(&mut out, body.len(), conn.keep_alive);
            out.extend_from_slice(&body);
            (out, conn.keep_alive)
        };

        // One write per response; a short write is connection-fatal.
        let wr = unsafe { libc::write(fd, response.as_ptr() as *const libc::c_void, response.len()) };
        if wr < 0 || wr as usize != response.len() {
            warn!(
                "front-{}: short write on socket {fd} ({wr}/{})",
                self.core,
                response.len()
            );
            self.close_connection(epoll_fd, fd, conns);
            return;
        }
        metrics::inc_responses_sent();

        if keep_alive {
            let has_buffered = {
                let conn = conns[fd as usize].as_mut().expect("checked above");
                conn.reset_for_next_request();
                conn.recv_len > 0
            };
            if let Err(e) = poll::rearm_readable(epoll_fd, fd) {
                warn!("front-{}: rearm socket {fd}: {e}", self.core);
                self.close_connection(epoll_fd, fd, conns);
                return;
            }
            // A pipelined follow-up is already buffered; no new readiness
            // event will announce it, so try to admit it now.
            if has_buffered {
                self.try_admit(epoll_fd, fd, conns, pool);
            }
        } else {
            self.close_connection(epoll_fd, fd, conns);
        }
    }

    fn close_connection(&self, epoll_fd: RawFd, fd: RawFd, conns: &mut [Option<ConnState>]) {
        if let Some(slot) = conns.get_mut(fd as usize) {
            *slot = None;
        }
        let _ = poll::remove(epoll_fd, fd);
        unsafe {
            libc::close(fd);
        }
    }
}

/// Read until EAGAIN or the buffer is full.
fn read_available(fd: RawFd, conn: &mut ConnState) -> ReadStatus {
    loop {
        if conn.recv_len == RECV_BUF_SIZE {
            return ReadStatus::Drained;
        }
        let rd = unsafe {
            libc::read(
                fd,
                conn.buf.as_mut_ptr().add(conn.recv_len) as *mut libc::c_void,
                RECV_BUF_SIZE - conn.recv_len,
            )
        };
        if rd == 0 {
            return ReadStatus::PeerClosed;
        }
        if rd < 0 {
            let err = io::Error::last_os_error();
            if would_block(&err) {
                return ReadStatus::Drained;
            }
            return ReadStatus::Failed(err);
        }
        conn.recv_len += rd as usize;
    }
}

fn would_block(err: &io::Error) -> bool {
    err.kind() == io::ErrorKind::WouldBlock
}

fn set_nonblocking(fd: RawFd) -> io::Result<()> {
    let flags = unsafe { libc::fcntl(fd, libc::F_GETFL, 0) };
    if flags < 0 {
        return Err(io::Error::last_os_error());
    }
    if unsafe { libc::fcntl(fd, libc::F_SETFL, flags | libc::O_NONBLOCK) } < 0 {
        return Err(io::Error::last_os_error());
    }
    Ok(())
}

fn set_nodelay(fd: RawFd) {
    let one: libc::c_int = 1;
    unsafe {
        libc::setsockopt(
            fd,
            libc::IPPROTO_TCP,
            libc::TCP_NODELAY,
            &one as *const _ as *const libc::c_void,
            std::mem::size_of::<libc::c_int>() as libc::socklen_t,
        );
    }
}
