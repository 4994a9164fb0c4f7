// 5.0: injected time and id sources. the engine never reads the wall clock or mints ids
// on its own, so tests can pin both.

use crate::types::Timestamp;
use parking_lot::Mutex;
use rand::Rng;
use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};

pub trait Clock: Send + Sync + std::fmt::Debug {
    fn now(&self) -> Timestamp;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Timestamp {
        Timestamp::now()
    }
}

/// Settable clock for tests and deterministic replay.
#[derive(Debug, Default)]
pub struct ManualClock {
    millis: AtomicI64,
}

impl ManualClock {
    pub fn new(start: Timestamp) -> Self {
        Self {
            millis: AtomicI64::new(start.as_millis()),
        }
    }

    pub fn set(&self, ts: Timestamp) {
        self.millis.store(ts.as_millis(), Ordering::SeqCst);
    }

    pub fn advance(&self, ms: i64) {
        self.millis.fetch_add(ms, Ordering::SeqCst);
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Timestamp {
        Timestamp::from_millis(self.millis.load(Ordering::SeqCst))
    }
}

// 5.1: client order ids. must never repeat within a process.
pub trait OrderIdGenerator: Send + Sync + std::fmt::Debug {
    fn next_id(&self, now: Timestamp) -> String;
}

/// `CL-<millis>-<seq>-<random>`: sorts by time, unique per process through
/// the sequence, and unlikely to collide across processes through the suffix.
#[derive(Debug, Default)]
pub struct ClientIdGenerator {
    seq: AtomicU64,
}

impl ClientIdGenerator {
    pub fn new() -> Self {
        Self::default()
    }
}

impl OrderIdGenerator for ClientIdGenerator {
    fn next_id(&self, now: Timestamp) -> String {
        let seq = self.seq.fetch_add(1, Ordering::Relaxed);
        let suffix: u32 = rand::thread_rng().gen();
        format!("CL-{:013}-{:06}-{:08x}", now.as_millis().max(0), seq, suffix)
    }
}

/// Deterministic ids: `<prefix>-1`, `<prefix>-2`, ...
#[derive(Debug)]
pub struct SequentialIdGenerator {
    prefix: String,
    next: Mutex<u64>,
}

impl SequentialIdGenerator {
    pub fn new(prefix: &str) -> Self {
        Self {
            prefix: prefix.to_string(),
            next: Mutex::new(1),
        }
    }
}

impl OrderIdGenerator for SequentialIdGenerator {
    fn next_id(&self, _now: Timestamp) -> String {
        let mut next = self.next.lock();
        let id = format!("{}-{}", self.prefix, *next);
        *next += 1;
        id
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn manual_clock_moves_only_when_told() {
        let clock = ManualClock::new(Timestamp::from_millis(1_000));
        assert_eq!(clock.now().as_millis(), 1_000);
        clock.advance(500);
        assert_eq!(clock.now().as_millis(), 1_500);
        clock.set(Timestamp::from_millis(42));
        assert_eq!(clock.now().as_millis(), 42);
    }

    #[test]
    fn client_ids_unique_and_time_prefixed() {
        let ids = ClientIdGenerator::new();
        let now = Timestamp::from_millis(1_700_000_000_000);
        let mut seen = HashSet::new();
        for _ in 0..1000 {
            let id = ids.next_id(now);
            assert!(id.starts_with("CL-1700000000000-"));
            assert!(seen.insert(id));
        }
    }

    #[test]
    fn client_ids_sort_by_time() {
        let ids = ClientIdGenerator::new();
        let a = ids.next_id(Timestamp::from_millis(5));
        let b = ids.next_id(Timestamp::from_millis(60_000));
        assert!(a < b);
    }

    #[test]
    fn sequential_ids() {
        let ids = SequentialIdGenerator::new("T");
        let now = Timestamp::from_millis(0);
        assert_eq!(ids.next_id(now), "T-1");
        assert_eq!(ids.next_id(now), "T-2");
    }
}
