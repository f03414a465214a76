#![allow(dead_code)]

use std::os::unix::io::RawFd;

use base64::{Engine as _, engine::general_purpose::STANDARD};

use infercore::buffer_pool::{BytePool, set_factory_pool};

pub fn init_factory_pool() {
    let _ = set_factory_pool(BytePool::new_boxed(1));
}

/// Build one HTTP request with the given pre-encoded `image_data` field.
pub fn http_request_with_field(model: &str, image_field: &str, keep_alive: bool) -> Vec<u8> {
    let body = format!(r#"{{"model_name":"{model}","image_data":"{image_field}"}}"#);
    let connection = if keep_alive { "Keep-Alive" } else { "Close" };
    format!(
        "POST /infer HTTP/1.1\r\n\
         Host: localhost\r\n\
         Connection: {connection}\r\n\
         Content-Length: {}\r\n\r\n{body}",
        body.len()
    )
    .into_bytes()
}

/// Build one HTTP request with a base64-encoded payload.
pub fn http_request(model: &str, payload: &[u8], keep_alive: bool) -> Vec<u8> {
    http_request_with_field(model, &STANDARD.encode(payload), keep_alive)
}

pub fn base64_of(payload: &[u8]) -> String {
    STANDARD.encode(payload)
}

/// Connected AF_UNIX stream pair for tests that need a real pollable fd.
pub fn socketpair() -> (RawFd, RawFd) {
    let mut fds = [0 as RawFd; 2];
    let rc = unsafe { libc::socketpair(libc::AF_UNIX, libc::SOCK_STREAM, 0, fds.as_mut_ptr()) };
    assert_eq!(rc, 0, "socketpair failed");
    (fds[0], fds[1])
}

pub fn close_fd(fd: RawFd) {
    unsafe {
        libc::close(fd);
    }
}
