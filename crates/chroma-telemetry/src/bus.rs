//! Single-producer fan-out bus between the audio thread and its consumers.
//!
//! The audio callback publishes frames through [`FrameSender::publish`],
//! which only pushes into a wait-free SPSC ring: no locks, no syscalls, no
//! waiting on any consumer. A dedicated worker thread drains the ring and
//! copies each frame into every subscriber's private queue.
//!
//! Guarantees, per subscriber:
//!
//! - queue depth never exceeds [`SUBSCRIBER_QUEUE_DEPTH`] frames
//! - when full, the *oldest* undelivered frame is discarded and the
//!   subscriber's dropped-frame counter increments
//! - frames arrive in strictly increasing publication order (drops create
//!   gaps, never reorders)
//! - a subscriber that disconnects mid-broadcast never affects the others
//!
//! If nothing is published for one second the worker synthesises a frame via
//! the heartbeat hook, so every consumer sees at least one frame per second.
//!
//! Backpressure is drop-oldest only; nothing flows back to the audio thread.

use parking_lot::{Condvar, Mutex};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::thread;
use std::time::{Duration, Instant};

/// Maximum undelivered frames per subscriber.
pub const SUBSCRIBER_QUEUE_DEPTH: usize = 2;

/// Idle interval after which the worker synthesises a heartbeat frame.
pub const IDLE_HEARTBEAT: Duration = Duration::from_secs(1);

/// Default capacity of the audio-thread-side ring.
pub const DEFAULT_RING_CAPACITY: usize = 64;

/// Worker poll interval. Bounds delivery latency well below the 2-frame lag
/// budget at a 30 Hz or faster frame rate.
const WORKER_PARK: Duration = Duration::from_millis(2);

/// Builds the synthetic frame the worker publishes after 1 s of silence.
pub type HeartbeatFn<T> = Box<dyn Fn() -> T + Send>;

struct SubscriberInner<T> {
    queue: Mutex<VecDeque<T>>,
    ready: Condvar,
    dropped: AtomicU64,
    closed: AtomicBool,
}

/// Receive endpoint owned by one consumer.
///
/// Dropping the subscriber unsubscribes it: the bus holds only a weak
/// reference and removes it on the next delivery.
pub struct Subscriber<T> {
    inner: Arc<SubscriberInner<T>>,
}

impl<T> Subscriber<T> {
    /// Pop the next frame, waiting up to `timeout`.
    ///
    /// Returns `None` on timeout or after the bus has shut down and the
    /// queue is empty.
    pub fn recv_timeout(&self, timeout: Duration) -> Option<T> {
        let deadline = Instant::now() + timeout;
        let mut queue = self.inner.queue.lock();
        loop {
            if let Some(frame) = queue.pop_front() {
                return Some(frame);
            }
            if self.inner.closed.load(Ordering::Acquire) {
                return None;
            }
            if self.inner.ready.wait_until(&mut queue, deadline).timed_out() {
                return queue.pop_front();
            }
        }
    }

    /// Pop the next frame without waiting.
    pub fn try_recv(&self) -> Option<T> {
        self.inner.queue.lock().pop_front()
    }

    /// Frames discarded for this subscriber by the drop-oldest policy.
    pub fn dropped_frames(&self) -> u64 {
        self.inner.dropped.load(Ordering::Relaxed)
    }

    /// Current undelivered queue length.
    pub fn queue_len(&self) -> usize {
        self.inner.queue.lock().len()
    }

    /// True once the bus has shut down.
    pub fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::Acquire)
    }
}

struct BusShared<T> {
    subscribers: Mutex<Vec<Weak<SubscriberInner<T>>>>,
    latest: Mutex<Option<T>>,
    published: AtomicU64,
    overruns: AtomicU64,
    shutdown: AtomicBool,
}

/// Producer half, owned exclusively by the audio pipeline.
pub struct FrameSender<T> {
    producer: rtrb::Producer<T>,
    shared: Arc<BusShared<T>>,
}

impl<T> FrameSender<T> {
    /// Publish one frame. Wait-free: a single SPSC push and a counter
    /// increment, never blocking on the worker or any consumer.
    ///
    /// If the ring is full (the worker has stalled for longer than the ring
    /// covers), the frame is discarded and the overrun counter increments.
    pub fn publish(&mut self, frame: T) {
        match self.producer.push(frame) {
            Ok(()) => {
                self.shared.published.fetch_add(1, Ordering::Relaxed);
            }
            Err(_) => {
                self.shared.overruns.fetch_add(1, Ordering::Relaxed);
            }
        }
    }
}

/// Counters exposed for tests and the monitor view.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct BusStats {
    /// Frames accepted into the ring.
    pub published: u64,
    /// Frames rejected because the ring was full.
    pub overruns: u64,
}

/// Consumer-side bus handle: subscription, snapshots, worker lifecycle.
pub struct FanOutBus<T> {
    shared: Arc<BusShared<T>>,
    worker: Mutex<Option<thread::JoinHandle<()>>>,
}

impl<T: Clone + Send + 'static> FanOutBus<T> {
    /// Create the bus and spawn its worker thread.
    ///
    /// `heartbeat` (if given) builds the synthetic frame published after
    /// [`IDLE_HEARTBEAT`] of producer silence.
    pub fn spawn(
        ring_capacity: usize,
        heartbeat: Option<HeartbeatFn<T>>,
    ) -> (FrameSender<T>, FanOutBus<T>) {
        let (producer, consumer) = rtrb::RingBuffer::new(ring_capacity.max(2));
        let shared = Arc::new(BusShared {
            subscribers: Mutex::new(Vec::new()),
            latest: Mutex::new(None),
            published: AtomicU64::new(0),
            overruns: AtomicU64::new(0),
            shutdown: AtomicBool::new(false),
        });

        let worker_shared = Arc::clone(&shared);
        let worker = thread::Builder::new()
            .name("chroma-bus".into())
            .spawn(move || run_worker(consumer, &worker_shared, heartbeat))
            .expect("spawning the bus worker cannot fail");

        (
            FrameSender {
                producer,
                shared: Arc::clone(&shared),
            },
            FanOutBus {
                shared,
                worker: Mutex::new(Some(worker)),
            },
        )
    }

    /// Register a new consumer and return its receive endpoint.
    pub fn subscribe(&self) -> Subscriber<T> {
        let inner = Arc::new(SubscriberInner {
            queue: Mutex::new(VecDeque::with_capacity(SUBSCRIBER_QUEUE_DEPTH)),
            ready: Condvar::new(),
            dropped: AtomicU64::new(0),
            closed: AtomicBool::new(false),
        });
        self.shared.subscribers.lock().push(Arc::downgrade(&inner));
        tracing::debug!("bus subscriber added");
        Subscriber { inner }
    }

    /// Most recent frame seen by the worker, if any. Non-blocking.
    pub fn latest(&self) -> Option<T> {
        self.shared.latest.lock().clone()
    }

    /// Publication counters.
    pub fn stats(&self) -> BusStats {
        BusStats {
            published: self.shared.published.load(Ordering::Relaxed),
            overruns: self.shared.overruns.load(Ordering::Relaxed),
        }
    }

    /// Stop the worker and close every subscriber.
    ///
    /// The worker polls every couple of milliseconds, so it exits well
    /// inside the 1 s stop deadline; consumers blocked in `recv_timeout`
    /// observe the close and return `None`.
    pub fn shutdown(&self) {
        self.shared.shutdown.store(true, Ordering::Release);
        if let Some(worker) = self.worker.lock().take() {
            let _ = worker.join();
        }
    }
}

impl<T> Drop for FanOutBus<T> {
    fn drop(&mut self) {
        self.shared.shutdown.store(true, Ordering::Release);
        if let Some(worker) = self.worker.lock().take() {
            let _ = worker.join();
        }
    }
}

fn run_worker<T: Clone + Send>(
    mut consumer: rtrb::Consumer<T>,
    shared: &Arc<BusShared<T>>,
    heartbeat: Option<HeartbeatFn<T>>,
) {
    let mut last_activity = Instant::now();

    loop {
        if shared.shutdown.load(Ordering::Acquire) {
            break;
        }

        let mut delivered_any = false;
        while let Ok(frame) = consumer.pop() {
            deliver(shared, frame);
            delivered_any = true;
        }

        if delivered_any {
            last_activity = Instant::now();
        } else if let Some(heartbeat) = &heartbeat {
            if last_activity.elapsed() >= IDLE_HEARTBEAT {
                deliver(shared, heartbeat());
                last_activity = Instant::now();
            }
        }

        thread::sleep(WORKER_PARK);
    }

    // Drain what the producer managed to push before the flag, then close
    // every subscriber so blocked receivers wake up.
    while let Ok(frame) = consumer.pop() {
        deliver(shared, frame);
    }
    let subscribers = shared.subscribers.lock();
    for weak in subscribers.iter() {
        if let Some(inner) = weak.upgrade() {
            inner.closed.store(true, Ordering::Release);
            inner.ready.notify_all();
        }
    }
    tracing::debug!("bus worker stopped");
}

/// Copy one frame into every live subscriber queue, pruning dead ones.
fn deliver<T: Clone>(shared: &Arc<BusShared<T>>, frame: T) {
    *shared.latest.lock() = Some(frame.clone());

    let mut subscribers = shared.subscribers.lock();
    subscribers.retain(|weak| {
        let Some(inner) = weak.upgrade() else {
            return false;
        };
        let mut queue = inner.queue.lock();
        if queue.len() >= SUBSCRIBER_QUEUE_DEPTH {
            queue.pop_front();
            inner.dropped.fetch_add(1, Ordering::Relaxed);
        }
        queue.push_back(frame.clone());
        drop(queue);
        inner.ready.notify_one();
        true
    });
}
