#[cfg(feature = "metrics")]
mod imp {
    use std::sync::atomic::{AtomicU64, Ordering};
    use std::time::Duration;

    // Throughput (cumulative)
    static REQUESTS_ADMITTED: AtomicU64 = AtomicU64::new(0);
    static COMPLETIONS_PRODUCED: AtomicU64 = AtomicU64::new(0);
    static RESPONSES_SENT: AtomicU64 = AtomicU64::new(0);
    // Failure paths (cumulative)
    static BACKEND_FAILURES: AtomicU64 = AtomicU64::new(0);
    static DEADLINE_EXPIRED: AtomicU64 = AtomicU64::new(0);
    static STALE_COMPLETIONS: AtomicU64 = AtomicU64::new(0);
    static ACCEPT_REJECTED: AtomicU64 = AtomicU64::new(0);
    // Stall / backpressure (cumulative)
    static SQ_RING_FULL: AtomicU64 = AtomicU64::new(0);
    static CQ_RING_FULL: AtomicU64 = AtomicU64::new(0);
    static POOL_EXHAUSTED: AtomicU64 = AtomicU64::new(0);
    static POOL_TOO_LARGE: AtomicU64 = AtomicU64::new(0);

    #[derive(Clone, Copy)]
    pub struct MetricsSnapshot {
        pub requests_admitted: u64,
        pub completions_produced: u64,
        pub responses_sent: u64,
        pub backend_failures: u64,
        pub deadline_expired: u64,
        pub stale_completions: u64,
        pub accept_rejected: u64,
        pub sq_ring_full: u64,
        pub cq_ring_full: u64,
        pub pool_exhausted: u64,
        pub pool_too_large: u64,
    }

    pub fn inc_requests_admitted() {
        REQUESTS_ADMITTED.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_completions_produced() {
        COMPLETIONS_PRODUCED.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_responses_sent() {
        RESPONSES_SENT.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_backend_failures() {
        BACKEND_FAILURES.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_deadline_expired() {
        DEADLINE_EXPIRED.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_stale_completions() {
        STALE_COMPLETIONS.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_accept_rejected() {
        ACCEPT_REJECTED.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_sq_ring_full() {
        SQ_RING_FULL.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_cq_ring_full() {
        CQ_RING_FULL.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_pool_exhausted() {
        POOL_EXHAUSTED.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_pool_too_large() {
        POOL_TOO_LARGE.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot() -> MetricsSnapshot {
        MetricsSnapshot {
            requests_admitted: REQUESTS_ADMITTED.load(Ordering::Relaxed),
            completions_produced: COMPLETIONS_PRODUCED.load(Ordering::Relaxed),
            responses_sent: RESPONSES_SENT.load(Ordering::Relaxed),
            backend_failures: BACKEND_FAILURES.load(Ordering::Relaxed),
            deadline_expired: DEADLINE_EXPIRED.load(Ordering::Relaxed),
            stale_completions: STALE_COMPLETIONS.load(Ordering::Relaxed),
            accept_rejected: ACCEPT_REJECTED.load(Ordering::Relaxed),
            sq_ring_full: SQ_RING_FULL.load(Ordering::Relaxed),
            cq_ring_full: CQ_RING_FULL.load(Ordering::Relaxed),
            pool_exhausted: POOL_EXHAUSTED.load(Ordering::Relaxed),
            pool_too_large: POOL_TOO_LARGE.load(Ordering::Relaxed),
        }
    }

    pub fn spawn_reporter() {
        const INTERVAL_SECS: u64 = 10;
        std::thread::spawn(|| {
            let mut last = snapshot();
            loop {
                std::thread::sleep(Duration::from_secs(INTERVAL_SECS));
                let snap = snapshot();
                println!(
                    "metrics delta {}s: admitted={} completed={} sent={} | failures: backend={} deadline={} stale={} accept_rejected={} | stalls: sq_full={} cq_full={} pool_exh={} pool_too_large={}",
                    INTERVAL_SECS,
                    snap.requests_admitted.saturating_sub(last.requests_admitted),
                    snap.completions_produced
                        .saturating_sub(last.completions_produced),
                    snap.responses_sent.saturating_sub(last.responses_sent),
                    snap.backend_failures.saturating_sub(last.backend_failures),
                    snap.deadline_expired.saturating_sub(last.deadline_expired),
                    snap.stale_completions.saturating_sub(last.stale_completions),
                    snap.accept_rejected.saturating_sub(last.accept_rejected),
                    snap.sq_ring_full.saturating_sub(last.sq_ring_full),
                    snap.cq_ring_full.saturating_sub(last.cq_ring_full),
                    snap.pool_exhausted.saturating_sub(last.pool_exhausted),
                    snap.pool_too_large.saturating_sub(last.pool_too_large),
                );
                last = snap;
            }
        });
    }
}

#[cfg(not(feature = "metrics"))]
#[allow(dead_code)]
mod imp {
    #[derive(Clone, Copy)]
    pub struct MetricsSnapshot {
        pub requests_admitted: u64,
        pub completions_produced: u64,
        pub responses_sent: u64,
        pub backend_failures: u64,
        pub deadline_expired: u64,
        pub stale_completions: u64,
        pub accept_rejected: u64,
        pub sq_ring_full: u64,
        pub cq_ring_full: u64,
        pub pool_exhausted: u64,
        pub pool_too_large: u64,
    }

    pub fn inc_requests_admitted() {}
    pub fn inc_completions_produced() {}
    pub fn inc_responses_sent() {}
    pub fn inc_backend_failures() {}
    pub fn inc_deadline_expired() {}
    pub fn inc_stale_completions() {}
    pub fn inc_accept_rejected() {}
    pub fn inc_sq_ring_full() {}
    pub fn inc_cq_ring_full() {}
    pub fn inc_pool_exhausted() {}
    pub fn inc_pool_too_large() {}

    pub fn snapshot() -> MetricsSnapshot {
        MetricsSnapshot {
            requests_admitted: 0,
            completions_produced: 0,
            responses_sent: 0,
            backend_failures: 0,
            deadline_expired: 0,
            stale_completions: 0,
            accept_rejected: 0,
            sq_ring_full: 0,
            cq_ring_full: 0,
            pool_exhausted: 0,
            pool_too_large: 0,
        }
    }

    pub fn spawn_reporter() {}
}

pub use imp::*;
