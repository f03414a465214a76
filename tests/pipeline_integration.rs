//! Full pipeline integration: admission → worker → notifier → writeback →
//! response formatting, without a live event loop. Kernel objects (epoll,
//! socketpair) are real; the reactor thread is not.

mod common;

use std::time::{Duration, Instant};

use infercore::backend::StubClassifier;
use infercore::buffer_pool::BytePool;
use infercore::codec;
use infercore::config::IMAGE_BUF_SIZE;
use infercore::notifier::CompletionNotifier;
use infercore::poll;
use infercore::queue::{build_completion_channel, build_submission_channel};
use infercore::request_flow::{self, Admission};
use infercore::worker::{FAILURE_RESULT, InferenceWorker, TIMEOUT_RESULT};

const POOL_CAPACITY: usize = 64 * IMAGE_BUF_SIZE;

struct Pipeline {
    submissions: infercore::queue::Enqueuer<infercore::ring_types::RequestSlot>,
    worker: InferenceWorker<StubClassifier>,
    notifier: CompletionNotifier,
    writeback: infercore::queue::Drainer<infercore::ring_types::CompletionSlot>,
    pool: &'static BytePool,
}

fn build_pipeline() -> Pipeline {
    common::init_factory_pool();
    let (submission_tx, submission_rx) = build_submission_channel(256);
    let (completion_tx, completion_rx) = build_completion_channel(256);
    let (writeback_tx, writeback_rx) = build_completion_channel(256);

    Pipeline {
        submissions: submission_tx,
        worker: InferenceWorker::new(submission_rx, completion_tx, StubClassifier::new()),
        notifier: CompletionNotifier::new(completion_rx, writeback_tx),
        writeback: writeback_rx,
        pool: BytePool::leak_new(POOL_CAPACITY),
    }
}

fn run_stages(p: &mut Pipeline, expect: usize) {
    let mut processed = 0;
    while processed < expect {
        if let Ok(n) = p.worker.process_one_poll_cycle() {
            processed += n;
        }
    }
    let mut notified = 0;
    while notified < expect {
        if let Ok(n) = p.notifier.process_one_poll_cycle() {
            notified += n;
        }
    }
}

#[test]
fn request_to_response_end_to_end() {
    let mut p = build_pipeline();
    let ep = poll::create().expect("epoll_create failed");
    let (conn, peer) = common::socketpair();
    poll::watch_readable(ep, conn).unwrap();

    // The concrete scenario: resnet50 with a 10-byte base64 payload.
    let buf = common::http_request("resnet50", b"ten bytes!", false);
    match request_flow::admit_one(&buf, &mut p.submissions, p.pool, conn, ep, 1) {
        Ok(Admission::Queued { consumed, .. }) => assert_eq!(consumed, buf.len()),
        _ => panic!("expected queued request"),
    }

    run_stages(&mut p, 1);

    // The notifier armed write interest on the socket.
    let mut events = [libc::epoll_event { events: 0, u64: 0 }; 4];
    let n = poll::wait(ep, &mut events, 1000).unwrap();
    assert_eq!(n, 1);
    let (ev_data, ev_bits) = (events[0].u64, events[0].events);
    assert_eq!(ev_data, conn as u64);
    assert_ne!(ev_bits & libc::EPOLLOUT as u32, 0);

    // The writeback ring carries the result the front end will format.
    let mut got = 0;
    let _ = p.writeback.drain(|resp| {
        assert_eq!(resp.conn_fd, conn);
        assert_eq!(resp.generation, 1);
        assert!(!resp.failed);
        let text = std::str::from_utf8(resp.result_bytes()).unwrap();
        let body = codec::format_result_json(text);
        let v: serde_json::Value = serde_json::from_slice(&body).unwrap();
        let obj = v.as_object().unwrap();
        assert!(obj.get("error").is_none());
        assert_eq!(obj.len(), 5, "stub reports top-5 labels");
        got += 1;
    });
    assert_eq!(got, 1);

    common::close_fd(conn);
    common::close_fd(peer);
    common::close_fd(ep);
}

#[test]
fn backend_failure_still_produces_exactly_one_response() {
    let mut p = build_pipeline();
    let ep = poll::create().unwrap();
    let (conn, peer) = common::socketpair();
    poll::watch_readable(ep, conn).unwrap();

    let buf = common::http_request("not_a_model", b"ten bytes!", false);
    assert!(matches!(
        request_flow::admit_one(&buf, &mut p.submissions, p.pool, conn, ep, 1),
        Ok(Admission::Queued { .. })
    ));

    run_stages(&mut p, 1);

    let mut responses = 0;
    let _ = p.writeback.drain(|resp| {
        assert!(resp.failed);
        let text = std::str::from_utf8(resp.result_bytes()).unwrap();
        assert_eq!(text, FAILURE_RESULT);
        let body = codec::format_error_json(text);
        let v: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(v["error"], FAILURE_RESULT);
        responses += 1;
    });
    assert_eq!(responses, 1, "failure must answer exactly once");

    // Nothing further: the at-most-one-response invariant.
    assert!(p.writeback.drain(|_| panic!("second response")).is_err());

    common::close_fd(conn);
    common::close_fd(peer);
    common::close_fd(ep);
}

#[test]
fn every_admitted_request_gets_one_response_in_order() {
    let mut p = build_pipeline();
    let ep = poll::create().unwrap();

    let pairs: Vec<_> = (0..8).map(|_| common::socketpair()).collect();
    for (i, &(conn, _)) in pairs.iter().enumerate() {
        poll::watch_readable(ep, conn).unwrap();
        // Every third request targets an unknown model.
        let model = if i % 3 == 0 { "bogus" } else { "resnet50" };
        let buf = common::http_request(model, b"payload", false);
        assert!(matches!(
            request_flow::admit_one(&buf, &mut p.submissions, p.pool, conn, ep, 1),
            Ok(Admission::Queued { .. })
        ));
    }

    run_stages(&mut p, pairs.len());

    let mut seen = Vec::new();
    while seen.len() < pairs.len() {
        let _ = p.writeback.drain(|resp| {
            seen.push((resp.conn_fd, resp.failed));
        });
    }

    let expected: Vec<_> = pairs
        .iter()
        .enumerate()
        .map(|(i, &(conn, _))| (conn, i % 3 == 0))
        .collect();
    assert_eq!(seen, expected, "one response per request, FIFO order");

    for (a, b) in pairs {
        common::close_fd(a);
        common::close_fd(b);
    }
    common::close_fd(ep);
}

#[test]
fn expired_request_answers_timeout_without_backend() {
    let mut p = build_pipeline();
    let ep = poll::create().unwrap();
    let (conn, peer) = common::socketpair();
    poll::watch_readable(ep, conn).unwrap();

    // Publish a request that sat in the queue past its deadline.
    let stale = Instant::now()
        .checked_sub(Duration::from_secs(60))
        .expect("clock too young");
    p.submissions
        .try_enqueue(|slot| {
            slot.conn_fd = conn;
            slot.epoll_fd = ep;
            slot.generation = 1;
            slot.enqueued_at = stale;
            slot.set_model_name("resnet50");
        })
        .unwrap();

    run_stages(&mut p, 1);

    let mut responses = 0;
    let _ = p.writeback.drain(|resp| {
        assert!(resp.failed);
        assert_eq!(
            std::str::from_utf8(resp.result_bytes()).unwrap(),
            TIMEOUT_RESULT
        );
        responses += 1;
    });
    assert_eq!(responses, 1);

    common::close_fd(conn);
    common::close_fd(peer);
    common::close_fd(ep);
}

#[test]
fn empty_payload_classifies_fixture() {
    let mut p = build_pipeline();
    let ep = poll::create().unwrap();
    let (conn, peer) = common::socketpair();
    poll::watch_readable(ep, conn).unwrap();

    let buf = common::http_request_with_field("resnet18", "", false);
    assert!(matches!(
        request_flow::admit_one(&buf, &mut p.submissions, p.pool, conn, ep, 1),
        Ok(Admission::Queued { .. })
    ));

    run_stages(&mut p, 1);

    let mut ok = false;
    let _ = p.writeback.drain(|resp| {
        assert!(!resp.failed, "fixture classification should succeed");
        ok = true;
    });
    assert!(ok);

    common::close_fd(conn);
    common::close_fd(peer);
    common::close_fd(ep);
}

#[test]
fn non_base64_payload_used_as_raw_bytes() {
    let mut p = build_pipeline();
    let ep = poll::create().unwrap();
    let (conn, peer) = common::socketpair();
    poll::watch_readable(ep, conn).unwrap();

    // Not decodable as base64; the worker falls back to the raw bytes.
    let buf = common::http_request_with_field("resnet50", "definitely not b64!!", false);
    assert!(matches!(
        request_flow::admit_one(&buf, &mut p.submissions, p.pool, conn, ep, 1),
        Ok(Admission::Queued { .. })
    ));

    run_stages(&mut p, 1);

    let mut ok = false;
    let _ = p.writeback.drain(|resp| {
        assert!(!resp.failed);
        ok = true;
    });
    assert!(ok);

    common::close_fd(conn);
    common::close_fd(peer);
    common::close_fd(ep);
}
