//! Thin epoll wrappers shared by the front end and the completion
//! notifier. The event payload is always the socket fd.

use std::io;
use std::os::unix::io::RawFd;

pub fn create() -> io::Result<RawFd> {
    let fd = unsafe { libc::epoll_create1(0) };
    if fd < 0 {
        return Err(io::Error::last_os_error());
    }
    Ok(fd)
}

fn ctl(ep: RawFd, op: libc::c_int, fd: RawFd, events: u32) -> io::Result<()> {
    let mut ev = libc::epoll_event {
        events,
        u64: fd as u64,
    };
    let rc = unsafe { libc::epoll_ctl(ep, op, fd, &mut ev) };
    if rc < 0 {
        return Err(io::Error::last_os_error());
    }
    Ok(())
}

/// Register a new fd for read interest.
pub fn watch_readable(ep: RawFd, fd: RawFd) -> io::Result<()> {
    ctl(ep, libc::EPOLL_CTL_ADD, fd, libc::EPOLLIN as u32)
}

/// Flip an already-registered fd back to read interest.
pub fn rearm_readable(ep: RawFd, fd: RawFd) -> io::Result<()> {
    ctl(ep, libc::EPOLL_CTL_MOD, fd, libc::EPOLLIN as u32)
}

/// Flip an already-registered fd to write interest. This is the only path
/// that moves a parked connection toward its response write.
pub fn arm_writable(ep: RawFd, fd: RawFd) -> io::Result<()> {
    ctl(ep, libc::EPOLL_CTL_MOD, fd, libc::EPOLLOUT as u32)
}

/// Keep the fd registered but deliver no events (request in flight).
pub fn park(ep: RawFd, fd: RawFd) -> io::Result<()> {
    ctl(ep, libc::EPOLL_CTL_MOD, fd, 0)
}

pub fn remove(ep: RawFd, fd: RawFd) -> io::Result<()> {
    let rc = unsafe { libc::epoll_ctl(ep, libc::EPOLL_CTL_DEL, fd, std::ptr::null_mut()) };
    if rc < 0 {
        return Err(io::Error::last_os_error());
    }
    Ok(())
}

/// Wait for events. An interrupted wait reports zero events rather than an
/// error so callers just loop.
pub fn wait(ep: RawFd, events: &mut [libc::epoll_event], timeout_ms: i32) -> io::Result<usize> {
    let n = unsafe {
        libc::epoll_wait(
            ep,
            events.as_mut_ptr(),
            events.len() as libc::c_int,
            timeout_ms,
        )
    };
    if n < 0 {
        let err = io::Error::last_os_error();
        if err.raw_os_error() == Some(libc::EINTR) {
            return Ok(0);
        }
        return Err(err);
    }
    Ok(n as usize)
}
