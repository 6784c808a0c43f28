use crate::types::TimeMs;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Instant, SystemTime, UNIX_EPOCH};

/// Monotonic wall-clock source, injected everywhere a current time is needed
pub trait Clock: Send + Sync {
	fn now(&self) -> TimeMs;
}

/// Production clock: a wall-clock epoch captured once, advanced by `Instant`
/// so the reading never goes backwards even if the system clock is adjusted.
pub struct SystemClock {
	epoch_ms: TimeMs,
	started: Instant,
}

impl SystemClock {
	pub fn new() -> Self {
		let epoch_ms = SystemTime::now().duration_since(UNIX_EPOCH).map(|d| d.as_millis() as TimeMs).unwrap_or(0);
		Self {
			epoch_ms,
			started: Instant::now(),
		}
	}
}

impl Default for SystemClock {
	fn default() -> Self {
		Self::new()
	}
}

impl Clock for SystemClock {
	fn now(&self) -> TimeMs {
		self.epoch_ms + self.started.elapsed().as_millis() as TimeMs
	}
}

/// Deterministic clock for tests. Advancing the clock does not fire timers by
/// itself; pair `advance` with the queue's `nudge()` to flush due entries.
#[derive(Clone)]
pub struct MockClock {
	now: Arc<AtomicU64>,
}

impl MockClock {
	pub fn new(start: TimeMs) -> Self {
		Self {
			now: Arc::new(AtomicU64::new(start)),
		}
	}

	/// Move the clock forward by `delta_ms`, returning the new reading
	pub fn advance(&self, delta_ms: TimeMs) -> TimeMs {
		self.now.fetch_add(delta_ms, Ordering::SeqCst) + delta_ms
	}

	/// Jump to an absolute time; going backwards is ignored to keep the
	/// monotonicity contract
	pub fn set(&self, time: TimeMs) {
		self.now.fetch_max(time, Ordering::SeqCst);
	}
}

impl Clock for MockClock {
	fn now(&self) -> TimeMs {
		self.now.load(Ordering::SeqCst)
	}
}
