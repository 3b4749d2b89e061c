// =============================================================================
// Request Throttler — priority queue, concurrency cap and request spacing
// =============================================================================
//
// The market-data plan allows only a small request rate, so outgoing calls
// are gated twice: at most `max_concurrent` may be in flight, and two request
// starts are never closer together than `min_spacing`.
//
// Requests that cannot start immediately wait in a priority queue. A freed
// slot goes to the highest-priority waiter, oldest first within a priority,
// so a chart the user just opened overtakes queued background prefetches.
// The queue can be paused, resumed and cleared; cleared waiters fail with
// `QueueCleared`.
// =============================================================================

use std::cmp::Ordering as CmpOrdering;
use std::collections::BinaryHeap;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::{oneshot, Mutex as AsyncMutex};
use tokio::time::{sleep_until, Instant};
use tracing::{debug, info, warn};

/// Scheduling class of an outgoing request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RequestPriority {
    /// Background work: warm-up, prefetch, periodic refresh.
    Low,
    /// Visible panels that are not the focus of the current action.
    #[default]
    Medium,
    /// Direct user actions.
    High,
}

/// A queued request was dropped by [`RequestThrottler::clear`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("request dropped from the throttle queue")]
pub struct QueueCleared;

struct Waiter {
    priority: RequestPriority,
    seq: u64,
    wake: oneshot::Sender<()>,
}

// Max-heap order: higher priority first, then lower sequence number.
impl Ord for Waiter {
    fn cmp(&self, other: &Self) -> CmpOrdering {
        self.priority
            .cmp(&other.priority)
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

impl PartialOrd for Waiter {
    fn partial_cmp(&self, other: &Self) -> Option<CmpOrdering> {
        Some(self.cmp(other))
    }
}

impl PartialEq for Waiter {
    fn eq(&self, other: &Self) -> bool {
        self.priority == other.priority && self.seq == other.seq
    }
}

impl Eq for Waiter {}

#[derive(Default)]
struct Gate {
    in_flight: usize,
    paused: bool,
    next_seq: u64,
    queue: BinaryHeap<Waiter>,
}

pub struct RequestThrottler {
    max_concurrent: usize,
    min_spacing: Duration,
    gate: Mutex<Gate>,
    /// Earliest instant the next request may start.
    next_slot: AsyncMutex<Instant>,
    sent: AtomicU64,
}

/// Serialisable view of the throttler for the usage endpoint.
#[derive(Debug, Clone, Serialize)]
pub struct ThrottleSnapshot {
    pub max_concurrent: usize,
    pub in_flight: usize,
    pub queued: usize,
    pub paused: bool,
    pub min_spacing_ms: u64,
    pub requests_sent: u64,
}

/// An occupied concurrency slot. Dropping it hands the slot to the next waiter.
struct Slot<'a> {
    throttler: &'a RequestThrottler,
}

impl Drop for Slot<'_> {
    fn drop(&mut self) {
        self.throttler.release();
    }
}

/// A request waiting in the queue.
struct Queued<'a> {
    throttler: &'a RequestThrottler,
    wake: oneshot::Receiver<()>,
    admitted: bool,
}

impl Drop for Queued<'_> {
    // A waiter abandoned after being handed a slot must give the slot back.
    fn drop(&mut self) {
        if !self.admitted {
            self.wake.close();
            if self.wake.try_recv().is_ok() {
                self.throttler.release();
            }
        }
    }
}

impl RequestThrottler {
    pub fn new(max_concurrent: usize, min_spacing: Duration) -> Self {
        Self {
            max_concurrent: max_concurrent.max(1),
            min_spacing,
            gate: Mutex::new(Gate::default()),
            next_slot: AsyncMutex::new(Instant::now()),
            sent: AtomicU64::new(0),
        }
    }

    /// Run `request` once it is at the head of the queue, a concurrency slot
    /// is free and the spacing since the previous start has elapsed.
    pub async fn run<T, Fut>(&self, priority: RequestPriority, request: Fut) -> Result<T, QueueCleared>
    where
        Fut: Future<Output = T>,
    {
        let _slot = self.admit(priority).await?;
        self.wait_for_slot().await;
        self.sent.fetch_add(1, Ordering::Relaxed);
        Ok(request.await)
    }

    async fn admit(&self, priority: RequestPriority) -> Result<Slot<'_>, QueueCleared> {
        let wake = {
            let mut gate = self.gate.lock();
            if !gate.paused && gate.queue.is_empty() && gate.in_flight < self.max_concurrent {
                gate.in_flight += 1;
                return Ok(Slot { throttler: self });
            }

            let (tx, rx) = oneshot::channel();
            let seq = gate.next_seq;
            gate.next_seq += 1;
            gate.queue.push(Waiter {
                priority,
                seq,
                wake: tx,
            });
            debug!(?priority, queued = gate.queue.len(), "request queued");
            rx
        };

        let mut queued = Queued {
            throttler: self,
            wake,
            admitted: false,
        };
        match (&mut queued.wake).await {
            Ok(()) => {
                queued.admitted = true;
                Ok(Slot { throttler: self })
            }
            Err(_) => Err(QueueCleared),
        }
    }

    fn release(&self) {
        let mut gate = self.gate.lock();
        gate.in_flight = gate.in_flight.saturating_sub(1);
        self.dispatch(&mut gate);
    }

    /// Hand free slots to the best waiters. Waiters that gave up are skipped.
    fn dispatch(&self, gate: &mut Gate) {
        while !gate.paused && gate.in_flight < self.max_concurrent {
            let Some(waiter) = gate.queue.pop() else {
                break;
            };
            if waiter.wake.send(()).is_ok() {
                gate.in_flight += 1;
            }
        }
    }

    async fn wait_for_slot(&self) {
        let mut next = self.next_slot.lock().await;
        let now = Instant::now();
        if *next > now {
            debug!(wait_ms = (*next - now).as_millis() as u64, "request throttled");
            sleep_until(*next).await;
        }
        *next = Instant::now() + self.min_spacing;
    }

    // ── Queue control ───────────────────────────────────────────────────

    /// Stop starting queued requests. Requests already in flight finish.
    pub fn pause(&self) {
        self.gate.lock().paused = true;
        info!("request queue paused");
    }

    pub fn resume(&self) {
        let mut gate = self.gate.lock();
        gate.paused = false;
        self.dispatch(&mut gate);
        info!(queued = gate.queue.len(), "request queue resumed");
    }

    /// Fail every queued request with [`QueueCleared`]. Returns how many were
    /// dropped.
    pub fn clear(&self) -> usize {
        let mut gate = self.gate.lock();
        let dropped = gate.queue.len();
        gate.queue.clear();
        if dropped > 0 {
            warn!(dropped, "request queue cleared");
        }
        dropped
    }

    pub fn queue_len(&self) -> usize {
        self.gate.lock().queue.len()
    }

    pub fn snapshot(&self) -> ThrottleSnapshot {
        let gate = self.gate.lock();
        ThrottleSnapshot {
            max_concurrent: self.max_concurrent,
            in_flight: gate.in_flight,
            queued: gate.queue.len(),
            paused: gate.paused,
            min_spacing_ms: self.min_spacing.as_millis() as u64,
            requests_sent: self.sent.load(Ordering::Relaxed),
        }
    }
}

impl std::fmt::Debug for RequestThrottler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RequestThrottler")
            .field("max_concurrent", &self.max_concurrent)
            .field("min_spacing", &self.min_spacing)
            .field("queued", &self.queue_len())
            .field("requests_sent", &self.sent.load(Ordering::Relaxed))
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use tokio::task::JoinHandle;

    use super::*;

    const SETTLE: Duration = Duration::from_millis(1);

    /// Spawn a request that records `name` when it starts and then holds its
    /// slot for `hold_ms`.
    fn spawn_named(
        throttler: &Arc<RequestThrottler>,
        order: &Arc<Mutex<Vec<&'static str>>>,
        name: &'static str,
        priority: RequestPriority,
        hold_ms: u64,
    ) -> JoinHandle<Result<(), QueueCleared>> {
        let throttler = throttler.clone();
        let order = order.clone();
        tokio::spawn(async move {
            throttler
                .run(priority, async {
                    order.lock().push(name);
                    tokio::time::sleep(Duration::from_millis(hold_ms)).await;
                })
                .await
        })
    }

    #[tokio::test(start_paused = true)]
    async fn spaces_consecutive_requests() {
        let throttler = RequestThrottler::new(1, Duration::from_millis(200));
        let start = Instant::now();

        let mut starts = Vec::new();
        for _ in 0..3 {
            let at = throttler
                .run(RequestPriority::High, async { Instant::now() })
                .await
                .unwrap();
            starts.push(at - start);
        }

        assert_eq!(starts[0], Duration::ZERO);
        assert!(starts[1] >= Duration::from_millis(200));
        assert!(starts[2] >= Duration::from_millis(400));
        assert_eq!(throttler.snapshot().requests_sent, 3);
    }

    #[tokio::test(start_paused = true)]
    async fn caps_concurrency() {
        let throttler = Arc::new(RequestThrottler::new(2, Duration::ZERO));
        let active = Arc::new(AtomicU64::new(0));
        let peak = Arc::new(AtomicU64::new(0));

        let tasks: Vec<_> = (0..6)
            .map(|_| {
                let throttler = throttler.clone();
                let active = active.clone();
                let peak = peak.clone();
                tokio::spawn(async move {
                    throttler
                        .run(RequestPriority::Medium, async {
                            let now = active.fetch_add(1, Ordering::SeqCst) + 1;
                            peak.fetch_max(now, Ordering::SeqCst);
                            tokio::time::sleep(Duration::from_millis(50)).await;
                            active.fetch_sub(1, Ordering::SeqCst);
                        })
                        .await
                })
            })
            .collect();

        for task in futures_util::future::join_all(tasks).await {
            task.unwrap().unwrap();
        }
        assert_eq!(peak.load(Ordering::SeqCst), 2);
        let snap = throttler.snapshot();
        assert_eq!(snap.in_flight, 0);
        assert_eq!(snap.queued, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn high_priority_overtakes_queued_background_work() {
        let throttler = Arc::new(RequestThrottler::new(1, Duration::ZERO));
        let order = Arc::new(Mutex::new(Vec::new()));

        let refresh = spawn_named(&throttler, &order, "refresh", RequestPriority::Low, 100);
        tokio::time::sleep(SETTLE).await;
        let prefetch = spawn_named(&throttler, &order, "prefetch", RequestPriority::Low, 0);
        tokio::time::sleep(SETTLE).await;
        let panel = spawn_named(&throttler, &order, "panel", RequestPriority::Medium, 0);
        tokio::time::sleep(SETTLE).await;
        let chart = spawn_named(&throttler, &order, "chart", RequestPriority::High, 0);
        tokio::time::sleep(SETTLE).await;

        let snap = throttler.snapshot();
        assert_eq!(snap.in_flight, 1);
        assert_eq!(snap.queued, 3);

        for task in [refresh, prefetch, panel, chart] {
            task.await.unwrap().unwrap();
        }
        assert_eq!(*order.lock(), vec!["refresh", "chart", "panel", "prefetch"]);
        assert_eq!(throttler.queue_len(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn same_priority_is_first_come_first_served() {
        let throttler = Arc::new(RequestThrottler::new(1, Duration::ZERO));
        let order = Arc::new(Mutex::new(Vec::new()));

        let first = spawn_named(&throttler, &order, "first", RequestPriority::High, 50);
        tokio::time::sleep(SETTLE).await;
        let mut rest = Vec::new();
        for name in ["a", "b", "c"] {
            rest.push(spawn_named(&throttler, &order, name, RequestPriority::High, 0));
            tokio::time::sleep(SETTLE).await;
        }

        first.await.unwrap().unwrap();
        for task in rest {
            task.await.unwrap().unwrap();
        }
        assert_eq!(*order.lock(), vec!["first", "a", "b", "c"]);
    }

    #[tokio::test(start_paused = true)]
    async fn pause_holds_requests_until_resume() {
        let throttler = Arc::new(RequestThrottler::new(1, Duration::ZERO));
        let order = Arc::new(Mutex::new(Vec::new()));

        throttler.pause();
        let task = spawn_named(&throttler, &order, "held", RequestPriority::High, 0);
        tokio::time::sleep(Duration::from_millis(500)).await;

        let snap = throttler.snapshot();
        assert!(snap.paused);
        assert_eq!(snap.queued, 1);
        assert_eq!(snap.requests_sent, 0);
        assert!(order.lock().is_empty());

        throttler.resume();
        task.await.unwrap().unwrap();
        assert_eq!(*order.lock(), vec!["held"]);
        assert!(!throttler.snapshot().paused);
    }

    #[tokio::test(start_paused = true)]
    async fn clear_fails_queued_requests() {
        let throttler = Arc::new(RequestThrottler::new(1, Duration::ZERO));
        let order = Arc::new(Mutex::new(Vec::new()));

        throttler.pause();
        let a = spawn_named(&throttler, &order, "a", RequestPriority::Low, 0);
        let b = spawn_named(&throttler, &order, "b", RequestPriority::High, 0);
        tokio::time::sleep(SETTLE).await;

        assert_eq!(throttler.clear(), 2);
        assert_eq!(a.await.unwrap(), Err(QueueCleared));
        assert_eq!(b.await.unwrap(), Err(QueueCleared));
        assert!(order.lock().is_empty());

        throttler.resume();
        let value = throttler.run(RequestPriority::Low, async { 7 }).await;
        assert_eq!(value, Ok(7));
    }

    #[tokio::test(start_paused = true)]
    async fn abandoned_waiter_does_not_leak_a_slot() {
        let throttler = Arc::new(RequestThrottler::new(1, Duration::ZERO));
        let order = Arc::new(Mutex::new(Vec::new()));

        let busy = spawn_named(&throttler, &order, "busy", RequestPriority::High, 100);
        tokio::time::sleep(SETTLE).await;

        let gave_up = tokio::time::timeout(
            Duration::from_millis(10),
            throttler.run(RequestPriority::Low, async {}),
        )
        .await;
        assert!(gave_up.is_err());

        busy.await.unwrap().unwrap();
        let value = throttler.run(RequestPriority::Low, async { "after" }).await;
        assert_eq!(value, Ok("after"));

        let snap = throttler.snapshot();
        assert_eq!(snap.in_flight, 0);
        assert_eq!(snap.queued, 0);
    }
}
