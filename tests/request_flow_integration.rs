//! Integration tests for the admission path (buffer → HTTP parse → JSON
//! parse → arena alloc → publish) without a live event loop.

mod common;

use infercore::buffer_pool::BytePool;
use infercore::config::IMAGE_BUF_SIZE;
use infercore::queue::build_submission_channel;
use infercore::request_flow::{self, AdmitError, Admission};

const POOL_CAPACITY: usize = 64 * IMAGE_BUF_SIZE;

#[test]
fn admit_one_complete_request_publishes_event() {
    common::init_factory_pool();
    let (mut tx, mut rx) = build_submission_channel(256);
    let pool = BytePool::leak_new(POOL_CAPACITY);

    let payload = b"ten bytes!";
    let buf = common::http_request("resnet50", payload, false);
    let encoded = common::base64_of(payload);

    let outcome = request_flow::admit_one(&buf, &mut tx, pool, 9, 3, 1).expect("admit failed");
    match outcome {
        Admission::Queued {
            consumed,
            keep_alive,
        } => {
            assert_eq!(consumed, buf.len());
            assert!(!keep_alive);
        }
        Admission::Incomplete => panic!("expected queued request"),
    }

    let mut seen = 0;
    while seen == 0 {
        let _ = rx.drain(|slot| {
            assert_eq!(slot.conn_fd, 9);
            assert_eq!(slot.epoll_fd, 3);
            assert_eq!(slot.generation, 1);
            assert_eq!(slot.model_name(), "resnet50");
            // The payload travels exactly as received; base64 decode is
            // the worker's job.
            assert_eq!(slot.image.as_slice(), encoded.as_bytes());
            slot.image.release();
            seen += 1;
        });
    }
    assert_eq!(seen, 1);
}

#[test]
fn partial_request_is_incomplete_until_body_arrives() {
    common::init_factory_pool();
    let (mut tx, _rx) = build_submission_channel(256);
    let pool = BytePool::leak_new(POOL_CAPACITY);

    let buf = common::http_request("resnet50", b"payload", true);

    // Dribble the bytes: header only, then everything but one byte.
    for cut in [20, buf.len() - 1] {
        match request_flow::admit_one(&buf[..cut], &mut tx, pool, 1, 1, 0) {
            Ok(Admission::Incomplete) => {}
            _ => panic!("expected incomplete at cut {cut}"),
        }
    }

    match request_flow::admit_one(&buf, &mut tx, pool, 1, 1, 0) {
        Ok(Admission::Queued { consumed, keep_alive }) => {
            assert_eq!(consumed, buf.len());
            assert!(keep_alive);
        }
        _ => panic!("expected queued request"),
    }
}

#[test]
fn missing_json_field_is_connection_fatal() {
    common::init_factory_pool();
    let (mut tx, _rx) = build_submission_channel(256);
    let pool = BytePool::leak_new(POOL_CAPACITY);

    let body = r#"{"model_name":"resnet50"}"#;
    let buf = format!(
        "POST / HTTP/1.1\r\nContent-Length: {}\r\n\r\n{body}",
        body.len()
    )
    .into_bytes();

    match request_flow::admit_one(&buf, &mut tx, pool, 1, 1, 0) {
        Err(AdmitError::Codec(_)) => {}
        _ => panic!("expected codec error"),
    }
}

#[test]
fn bad_content_length_is_connection_fatal() {
    common::init_factory_pool();
    let (mut tx, _rx) = build_submission_channel(256);
    let pool = BytePool::leak_new(POOL_CAPACITY);

    let buf = b"POST / HTTP/1.1\r\nContent-Length: banana\r\n\r\n{}".to_vec();
    match request_flow::admit_one(&buf, &mut tx, pool, 1, 1, 0) {
        Err(AdmitError::Http(_)) => {}
        _ => panic!("expected http error"),
    }
}

#[test]
fn oversize_payload_is_rejected() {
    common::init_factory_pool();
    let (mut tx, _rx) = build_submission_channel(256);
    let pool = BytePool::leak_new(POOL_CAPACITY);

    let field = "x".repeat(IMAGE_BUF_SIZE + 1);
    let buf = common::http_request_with_field("resnet50", &field, false);
    match request_flow::admit_one(&buf, &mut tx, pool, 1, 1, 0) {
        Err(AdmitError::Codec(_)) => {}
        _ => panic!("expected codec error"),
    }
}

#[test]
fn keep_alive_cycle_admits_pipelined_follow_up() {
    common::init_factory_pool();
    let (mut tx, mut rx) = build_submission_channel(256);
    let pool = BytePool::leak_new(POOL_CAPACITY);

    // Two pipelined requests on one keep-alive connection.
    let mut buf = common::http_request("resnet50", b"first", true);
    let first_len = buf.len();
    buf.extend_from_slice(&common::http_request("resnet18", b"second", false));

    // Read/write serialization: only the first request is admitted.
    let consumed = match request_flow::admit_one(&buf, &mut tx, pool, 5, 1, 0) {
        Ok(Admission::Queued {
            consumed,
            keep_alive,
        }) => {
            assert!(keep_alive);
            assert_eq!(consumed, first_len);
            consumed
        }
        _ => panic!("expected queued request"),
    };

    // After the response cycle the leftover bytes admit the second one.
    let rest = &buf[consumed..];
    match request_flow::admit_one(rest, &mut tx, pool, 5, 1, 0) {
        Ok(Admission::Queued {
            consumed,
            keep_alive,
        }) => {
            assert!(!keep_alive);
            assert_eq!(consumed, rest.len());
        }
        _ => panic!("expected queued follow-up"),
    }

    let mut models = Vec::new();
    while models.len() < 2 {
        let _ = rx.drain(|slot| {
            models.push(slot.model_name().to_string());
            slot.image.release();
        });
    }
    assert_eq!(models, ["resnet50", "resnet18"]);
}

#[test]
fn requests_dequeue_in_admission_order() {
    common::init_factory_pool();
    let (mut tx, mut rx) = build_submission_channel(256);
    let pool = BytePool::leak_new(POOL_CAPACITY);

    for fd in 0..20 {
        let buf = common::http_request(&format!("model_{fd}"), b"p", false);
        match request_flow::admit_one(&buf, &mut tx, pool, fd, 1, 0) {
            Ok(Admission::Queued { .. }) => {}
            _ => panic!("admit {fd} failed"),
        }
    }

    let mut seen = Vec::new();
    while seen.len() < 20 {
        let _ = rx.drain(|slot| {
            seen.push(slot.conn_fd);
            slot.image.release();
        });
    }
    let expected: Vec<i32> = (0..20).collect();
    assert_eq!(seen, expected, "submission order must equal arrival order");
}
