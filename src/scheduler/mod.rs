//! Event Scheduler
//!
//! TigerStyle: Every delayed transition goes through one queue.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────┐
//! │          EventScheduler<E>::schedule          │
//! └──────────────────────────────────────────────┘
//!          ↓                          ↓
//! ┌─────────────────┐        ┌─────────────────┐
//! │ Simulated queue │        │  tokio::spawn   │
//! │ (manual advance)│        │  + sleep(delay) │
//! └─────────────────┘        └─────────────────┘
//!          ↓                          ↓
//! ┌──────────────────────────────────────────────┐
//! │   fire(): own task, errors/panics logged     │
//! └──────────────────────────────────────────────┘
//! ```
//!
//! On the simulated clock, events due at the same instant fire in the
//! order they were scheduled. A failing or panicking event is logged and
//! never reaches whoever scheduled it.

mod clock;

pub use clock::SimClock;

use std::collections::BTreeMap;
use std::fmt;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use tracing::{error, trace, warn};

use crate::config::ClockMode;
use crate::error::Result;

// =============================================================================
// TigerStyle Constants
// =============================================================================

/// Upper bound on events fired by a single `run_until_idle`
pub const SCHEDULER_IDLE_EVENTS_COUNT_MAX: usize = 100_000;

// =============================================================================
// Types
// =============================================================================

/// Receiver of scheduled events.
///
/// Sinks are cheap handles (usually an `Arc` inside) so the scheduler can
/// move a copy into the task that fires the event.
#[async_trait]
pub trait EventSink<E>: Clone + Send + Sync + 'static {
    /// Apply one event.
    async fn dispatch(&self, event: E) -> Result<()>;
}

/// Events waiting on the simulated clock, keyed by (due time, sequence)
#[derive(Debug)]
struct SimQueue<E> {
    clock: SimClock,
    next_seq: u64,
    events: BTreeMap<(u64, u64), E>,
}

impl<E> SimQueue<E> {
    fn push(&mut self, delay_ms: u64, event: E) {
        let due_ms = self.clock.deadline_ms(delay_ms);
        let seq = self.next_seq;
        self.next_seq += 1;
        self.events.insert((due_ms, seq), event);
    }

    /// Pop the earliest event due at or before `limit_ms`, moving the clock
    /// to its due time.
    fn pop_due(&mut self, limit_ms: u64) -> Option<E> {
        let (&(due_ms, seq), _) = self.events.iter().next()?;
        if due_ms > limit_ms {
            return None;
        }
        self.clock.advance_to_ms(due_ms);
        self.events.remove(&(due_ms, seq))
    }
}

/// Delayed-event scheduler over a simulated or real clock.
pub struct EventScheduler<E> {
    mode: ClockMode,
    queue: Mutex<SimQueue<E>>,
}

impl<E> fmt::Debug for EventScheduler<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventScheduler")
            .field("mode", &self.mode)
            .field("now_ms", &self.now_ms())
            .field("pending", &self.pending())
            .finish()
    }
}

impl<E> EventScheduler<E> {
    /// Create a scheduler on the given clock
    pub fn new(mode: ClockMode) -> Self {
        Self {
            mode,
            queue: Mutex::new(SimQueue {
                clock: SimClock::new(),
                next_seq: 0,
                events: BTreeMap::new(),
            }),
        }
    }

    /// Clock driving this scheduler
    pub fn mode(&self) -> ClockMode {
        self.mode
    }

    /// Current simulated time (always 0 on the tokio clock)
    pub fn now_ms(&self) -> u64 {
        self.lock().clock.now_ms()
    }

    /// Events waiting on the simulated clock
    pub fn pending(&self) -> usize {
        self.lock().events.len()
    }

    /// Drop every queued event. Tokio timers already spawned still fire.
    pub fn clear(&self) {
        self.lock().events.clear();
    }

    fn lock(&self) -> MutexGuard<'_, SimQueue<E>> {
        self.queue.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl<E> EventScheduler<E>
where
    E: fmt::Debug + Send + 'static,
{
    /// Schedule `event` for delivery to `sink` after `delay`.
    ///
    /// Returns immediately. In tokio mode this must be called from inside a
    /// tokio runtime.
    pub fn schedule<S: EventSink<E>>(&self, sink: &S, delay: Duration, event: E) {
        trace!(?event, delay_ms = duration_ms(delay), "scheduling event");
        match self.mode {
            ClockMode::Simulated => {
                self.lock().push(duration_ms(delay), event);
            }
            ClockMode::Tokio => {
                let sink = sink.clone();
                tokio::spawn(async move {
                    tokio::time::sleep(delay).await;
                    fire(sink, event).await;
                });
            }
        }
    }

    /// Let `by` elapse, firing every event that comes due on the way.
    ///
    /// On the tokio clock this just sleeps, so spawned timers can run.
    ///
    /// # Returns
    /// Number of events fired by this call.
    pub async fn advance<S: EventSink<E>>(&self, sink: &S, by: Duration) -> usize {
        if self.mode == ClockMode::Tokio {
            tokio::time::sleep(by).await;
            return 0;
        }

        let target_ms = self.lock().clock.deadline_ms(duration_ms(by));
        let mut fired = 0;
        loop {
            // The guard must be dropped before firing: events schedule more.
            let next = self.lock().pop_due(target_ms);
            match next {
                Some(event) => {
                    fire(sink.clone(), event).await;
                    fired += 1;
                }
                None => break,
            }
        }
        self.lock().clock.advance_to_ms(target_ms);
        fired
    }

    /// Fire events until the simulated queue is empty.
    ///
    /// # Returns
    /// Number of events fired by this call.
    pub async fn run_until_idle<S: EventSink<E>>(&self, sink: &S) -> usize {
        let mut fired = 0;
        while fired < SCHEDULER_IDLE_EVENTS_COUNT_MAX {
            let next = self.lock().pop_due(u64::MAX);
            match next {
                Some(event) => {
                    fire(sink.clone(), event).await;
                    fired += 1;
                }
                None => return fired,
            }
        }
        warn!(fired, "run_until_idle stopped at event limit");
        fired
    }

}

/// Deliver one event in its own task so a panic stays contained.
async fn fire<E, S>(sink: S, event: E)
where
    E: fmt::Debug + Send + 'static,
    S: EventSink<E>,
{
    let label = format!("{:?}", event);
    let task = tokio::spawn(async move { sink.dispatch(event).await });
    match task.await {
        Ok(Ok(())) => trace!(event = %label, "event dispatched"),
        Ok(Err(err)) => warn!(event = %label, error = %err, "scheduled event failed"),
        Err(join_err) if join_err.is_panic() => {
            error!(event = %label, "scheduled event panicked")
        }
        Err(join_err) => warn!(event = %label, error = %join_err, "scheduled event cancelled"),
    }
}

fn duration_ms(delay: Duration) -> u64 {
    u64::try_from(delay.as_millis()).unwrap_or(u64::MAX)
}
