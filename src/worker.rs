//! Inference worker: drains the submission ring, runs the backend, and
//! produces exactly one completion per request - success, backend failure,
//! or deadline expiry. Busy-polls its ring; never touches network state.

use std::borrow::Cow;

use disruptor::Polling;
use log::{debug, warn};

use crate::backend::{BackendError, InferenceBackend, fallback_image};
use crate::codec;
use crate::config::{DEFAULT_MODEL, REQUEST_DEADLINE};
use crate::metrics;
use crate::queue::{Drainer, Enqueuer};
use crate::ring_types::{CompletionSlot, RequestSlot};

/// Sentinel result carried by a failure completion.
pub const FAILURE_RESULT: &str = "inference failed";
/// Sentinel result when the request outlived its deadline in the ring.
pub const TIMEOUT_RESULT: &str = "request timed out";

pub struct InferenceWorker<B: InferenceBackend> {
    submissions: Drainer<RequestSlot>,
    completions: Enqueuer<CompletionSlot>,
    backend: B,
    /// Model currently resident in the backend; reload only on change.
    loaded_model: Option<String>,
}

impl<B: InferenceBackend> InferenceWorker<B> {
    pub fn new(
        submissions: Drainer<RequestSlot>,
        completions: Enqueuer<CompletionSlot>,
        backend: B,
    ) -> Self {
        Self {
            submissions,
            completions,
            backend,
            loaded_model: None,
        }
    }

    /// Busy-poll loop; returns when the submission producer shuts down.
    pub fn run(mut self) {
        loop {
            match self.process_one_poll_cycle() {
                Ok(_) => {}
                Err(Polling::NoEvents) => std::hint::spin_loop(),
                Err(Polling::Shutdown) => return,
            }
        }
    }

    /// Drain whatever is currently submitted, producing one completion per
    /// request. Returns the number of requests processed.
    pub fn process_one_poll_cycle(&mut self) -> Result<usize, Polling> {
        let Self {
            submissions,
            completions,
            backend,
            loaded_model,
        } = self;

        submissions.drain(|req| {
            let (failed, text) = process_request(backend, loaded_model, req);
            completions.enqueue_spin(
                |slot| {
                    slot.conn_fd = req.conn_fd;
                    slot.epoll_fd = req.epoll_fd;
                    slot.generation = req.generation;
                    slot.failed = failed;
                    slot.set_result(&text);
                },
                metrics::inc_cq_ring_full,
            );
            metrics::inc_completions_produced();
            req.image.release();
        })
    }
}

fn process_request<B: InferenceBackend>(
    backend: &mut B,
    loaded_model: &mut Option<String>,
    req: &RequestSlot,
) -> (bool, Cow<'static, str>) {
    if req.enqueued_at.elapsed() > REQUEST_DEADLINE {
        metrics::inc_deadline_expired();
        warn!("worker: fd {} expired in queue, answering timeout", req.conn_fd);
        return (true, Cow::Borrowed(TIMEOUT_RESULT));
    }

    let model = match req.model_name() {
        "" => DEFAULT_MODEL,
        name => name,
    };

    let raw = req.image.as_slice();
    let image: Cow<[u8]> = if raw.is_empty() {
        Cow::Borrowed(fallback_image())
    } else {
        match codec::decode_base64(raw) {
            Ok(decoded) => Cow::Owned(decoded),
            // Not base64: treat the payload as raw bytes.
            Err(_) => Cow::Borrowed(raw),
        }
    };

    match run_backend(backend, loaded_model, model, &image) {
        Ok(text) => (false, Cow::Owned(text)),
        Err(e) => {
            metrics::inc_backend_failures();
            warn!("worker: model '{model}': {e}");
            (true, Cow::Borrowed(FAILURE_RESULT))
        }
    }
}

fn run_backend<B: InferenceBackend>(
    backend: &mut B,
    loaded_model: &mut Option<String>,
    model: &str,
    image: &[u8],
) -> Result<String, BackendError> {
    if loaded_model.as_deref() != Some(model) {
        // Cache is stale until the load succeeds.
        *loaded_model = None;
        backend.load(model)?;
        *loaded_model = Some(model.to_string());
        debug!("worker: loaded model '{model}'");
    }
    let input = backend.preprocess(image)?;
    let output = backend.infer(input)?;
    backend.postprocess(output)
}
