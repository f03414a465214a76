//! Per-core request manager: the submission and completion queues.
//!
//! Each queue is an SPSC disruptor ring with exactly one producer and one
//! consumer thread, plus a pending count incremented after an item is
//! fully published. The count is a hint for the consumer's poll pass; the
//! authoritative emptiness check is the ring poll itself.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use disruptor::{
    BusySpin, EventPoller, Polling, Producer, RingBufferFull, SingleConsumerBarrier,
    SingleProducer, SingleProducerBarrier, build_single_producer,
};

use crate::ring_types::{CompletionSlot, RequestSlot};

/// Producer half of an SPSC ring. Lives on exactly one thread.
pub struct Enqueuer<E> {
    producer: SingleProducer<E, SingleConsumerBarrier>,
    pending: Arc<AtomicUsize>,
}

impl<E> Enqueuer<E>
where
    E: Send + Sync + 'static,
{
    /// Publish one item, filling the pre-allocated slot in place.
    /// The pending count becomes visible only after the slot is linked.
    pub fn try_enqueue(&mut self, fill: impl FnOnce(&mut E)) -> Result<(), RingBufferFull> {
        self.producer.try_publish(fill)?;
        self.pending.fetch_add(1, Ordering::Release);
        Ok(())
    }

    /// Publish, spinning while the ring is full. The ring is sized to the
    /// admission bound, so a full ring means the consumer is behind, not
    /// that an item was lost.
    pub fn enqueue_spin(&mut self, mut fill: impl FnMut(&mut E), mut on_full: impl FnMut()) {
        loop {
            match self.producer.try_publish(|slot| fill(slot)) {
                Ok(_) => {
                    self.pending.fetch_add(1, Ordering::Release);
                    return;
                }
                Err(RingBufferFull) => {
                    on_full();
                    std::hint::spin_loop();
                }
            }
        }
    }

    pub fn pending_hint(&self) -> usize {
        self.pending.load(Ordering::Acquire)
    }
}

/// Consumer half of an SPSC ring. Lives on exactly one thread.
pub struct Drainer<E> {
    poller: EventPoller<E, SingleProducerBarrier>,
    pending: Arc<AtomicUsize>,
}

impl<E> Drainer<E>
where
    E: Send + Sync + 'static,
{
    /// How many items were pending at the start of this poll pass. A hint
    /// only; [`Drainer::drain`] is the authority on emptiness.
    pub fn pending_hint(&self) -> usize {
        self.pending.load(Ordering::Acquire)
    }

    /// Visit every currently available item in FIFO order, then decrement
    /// the pending count by the number consumed. Non-blocking:
    /// `Err(Polling::NoEvents)` when the ring is empty.
    pub fn drain(&mut self, mut visit: impl FnMut(&E)) -> Result<usize, Polling> {
        match self.poller.poll() {
            Ok(mut guard) => {
                let mut consumed = 0;
                for event in &mut guard {
                    visit(event);
                    consumed += 1;
                }
                self.pending.fetch_sub(consumed, Ordering::AcqRel);
                Ok(consumed)
            }
            Err(e) => Err(e),
        }
    }
}

fn build_channel<E, F>(capacity: usize, factory: F) -> (Enqueuer<E>, Drainer<E>)
where
    E: Send + Sync + 'static,
    F: FnMut() -> E + 'static,
{
    let builder = build_single_producer(capacity, factory, BusySpin);
    let (poller, builder) = builder.event_poller();
    let producer = builder.build();
    let pending = Arc::new(AtomicUsize::new(0));

    (
        Enqueuer {
            producer,
            pending: Arc::clone(&pending),
        },
        Drainer { poller, pending },
    )
}

/// Submission queue: front end publishes, inference worker drains.
pub fn build_submission_channel(
    capacity: usize,
) -> (Enqueuer<RequestSlot>, Drainer<RequestSlot>) {
    build_channel(capacity, RequestSlot::factory)
}

/// Completion queue (worker → notifier) and writeback ring
/// (notifier → front end) share the same slot shape.
pub fn build_completion_channel(
    capacity: usize,
) -> (Enqueuer<CompletionSlot>, Drainer<CompletionSlot>) {
    build_channel(capacity, CompletionSlot::factory)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::buffer_pool::{BytePool, set_factory_pool};
    use std::sync::Once;

    static INIT: Once = Once::new();

    fn init_factory_pool() {
        INIT.call_once(|| {
            let _ = set_factory_pool(BytePool::new_boxed(1));
        });
    }

    #[test]
    fn fifo_order_preserved() {
        init_factory_pool();
        let (mut tx, mut rx) = build_submission_channel(256);

        for i in 0..100 {
            tx.try_enqueue(|slot| {
                slot.conn_fd = i;
                slot.set_model_name(&format!("model_{i}"));
            })
            .expect("ring full");
        }

        let mut seen = Vec::new();
        while seen.len() < 100 {
            let _ = rx.drain(|slot| seen.push(slot.conn_fd));
        }
        let expected: Vec<i32> = (0..100).collect();
        assert_eq!(seen, expected);
    }

    #[test]
    fn pending_count_tracks_publish_and_drain() {
        init_factory_pool();
        let (mut tx, mut rx) = build_completion_channel(64);
        assert_eq!(rx.pending_hint(), 0);

        for _ in 0..5 {
            tx.try_enqueue(|slot| slot.set_result("ok")).unwrap();
        }
        assert_eq!(tx.pending_hint(), 5);
        assert_eq!(rx.pending_hint(), 5);

        let n = rx.drain(|_| {}).expect("expected items");
        assert_eq!(n, 5);
        assert_eq!(rx.pending_hint(), 0);
    }

    #[test]
    fn drain_on_empty_reports_no_events() {
        init_factory_pool();
        let (_tx, mut rx) = build_completion_channel(8);
        assert!(matches!(rx.drain(|_| {}), Err(Polling::NoEvents)));
    }

    #[test]
    fn try_enqueue_surfaces_ring_full() {
        init_factory_pool();
        let (mut tx, _rx) = build_completion_channel(8);
        for _ in 0..8 {
            tx.try_enqueue(|_| {}).expect("ring should have space");
        }
        assert!(tx.try_enqueue(|_| {}).is_err());
    }

    #[test]
    fn cross_thread_fifo() {
        init_factory_pool();
        let (mut tx, mut rx) = build_submission_channel(256);

        let consumer = std::thread::spawn(move || {
            let mut seen = Vec::new();
            while seen.len() < 200 {
                let _ = rx.drain(|slot| seen.push(slot.generation));
            }
            seen
        });

        for i in 0..200u32 {
            tx.enqueue_spin(|slot| slot.generation = i, || {});
        }

        let seen = consumer.join().expect("consumer panicked");
        let expected: Vec<u32> = (0..200).collect();
        assert_eq!(seen, expected);
    }
}
