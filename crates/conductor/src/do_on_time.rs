use crate::clock::Clock;
use crate::device::{CommandReceiver, CommandWithContext};
use crate::events::EventBus;
use crate::types::{DeviceId, TimeMs};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::debug;

const DEFAULT_SLOW_COMMAND_THRESHOLD_MS: TimeMs = 150;

/// How entries leave the queue once due
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SendMode {
	/// Fire everything due immediately in ascending (time, insertion) order
	/// without awaiting completion. May produce unbounded concurrent sends.
	Burst,
	/// Fire strictly sequentially; each receiver future is awaited before
	/// the next entry fires, so a slow command cannot be overtaken.
	InOrder,
}

/// Operator-facing view of a queued entry
#[derive(Debug, Clone)]
pub struct QueuedCommandInfo {
	pub token: u64,
	pub time: TimeMs,
	pub group: Option<String>,
	pub command: String,
}

struct QueuedEntry<C> {
	token: u64,
	group: Option<String>,
	time: TimeMs,
	command: CommandWithContext<C>,
}

struct Inner<C> {
	entries: BTreeMap<(TimeMs, u64), QueuedEntry<C>>,
	next_token: u64,
	disposed: bool,
}

/// Per-device timed dispatch queue. Entries fire as close to their scheduled
/// time as possible, driven by an internal ticker and by external `nudge`
/// calls (the mock-clock tick primitive in tests). Receiver errors are
/// caught and surfaced as `commandError` events; they never block the queue.
pub struct DoOnTime<C> {
	device_id: DeviceId,
	mode: SendMode,
	clock: Arc<dyn Clock>,
	receiver: Arc<dyn CommandReceiver<C>>,
	bus: EventBus,
	slow_threshold_ms: TimeMs,
	inner: Arc<StdMutex<Inner<C>>>,
	fire_lock: Arc<Mutex<()>>,
	cancel: CancellationToken,
}

impl<C> Clone for DoOnTime<C> {
	fn clone(&self) -> Self {
		Self {
			device_id: self.device_id.clone(),
			mode: self.mode,
			clock: Arc::clone(&self.clock),
			receiver: Arc::clone(&self.receiver),
			bus: self.bus.clone(),
			slow_threshold_ms: self.slow_threshold_ms,
			inner: Arc::clone(&self.inner),
			fire_lock: Arc::clone(&self.fire_lock),
			cancel: self.cancel.clone(),
		}
	}
}

impl<C> DoOnTime<C>
where
	C: Send + Sync + fmt::Debug + 'static,
{
	pub fn new(device_id: DeviceId, mode: SendMode, clock: Arc<dyn Clock>, receiver: Arc<dyn CommandReceiver<C>>, bus: EventBus) -> Self {
		Self {
			device_id,
			mode,
			clock,
			receiver,
			bus,
			slow_threshold_ms: DEFAULT_SLOW_COMMAND_THRESHOLD_MS,
			inner: Arc::new(StdMutex::new(Inner {
				entries: BTreeMap::new(),
				next_token: 0,
				disposed: false,
			})),
			fire_lock: Arc::new(Mutex::new(())),
			cancel: CancellationToken::new(),
		}
	}

	pub fn with_slow_threshold(mut self, threshold_ms: TimeMs) -> Self {
		self.slow_threshold_ms = threshold_ms;
		self
	}

	/// Spawn the internal ticker that fires due entries
	pub fn start(&self, interval: Duration) {
		let queue = self.clone();
		let cancel = self.cancel.clone();
		tokio::spawn(async move {
			let mut ticker = tokio::time::interval(interval);
			ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
			loop {
				tokio::select! {
					_ = cancel.cancelled() => break,
					_ = ticker.tick() => queue.nudge().await,
				}
			}
			debug!(device_id = %queue.device_id, "dispatch queue ticker stopped");
		});
	}

	/// Schedule `command` for `time`. Returns a token usable with `remove`.
	pub fn queue(&self, time: TimeMs, group: Option<String>, command: CommandWithContext<C>) -> u64 {
		let mut inner = self.inner.lock().unwrap();
		let token = inner.next_token;
		inner.next_token += 1;
		inner.entries.insert((time, token), QueuedEntry { token, group, time, command });
		token
	}

	/// Remove entries with time strictly greater than `t`
	pub fn clear_queue_after(&self, t: TimeMs) {
		let mut inner = self.inner.lock().unwrap();
		inner.entries.retain(|(time, _), _| *time <= t);
	}

	/// Remove entries with time greater than or equal to `t`
	pub fn clear_queue_now_and_after(&self, t: TimeMs) {
		let mut inner = self.inner.lock().unwrap();
		inner.entries.retain(|(time, _), _| *time < t);
	}

	pub fn remove(&self, token: u64) -> bool {
		let mut inner = self.inner.lock().unwrap();
		let before = inner.entries.len();
		inner.entries.retain(|_, entry| entry.token != token);
		inner.entries.len() != before
	}

	/// Stable snapshot of everything not yet dispatched, ascending by time
	pub fn get_queue(&self) -> Vec<QueuedCommandInfo> {
		let inner = self.inner.lock().unwrap();
		inner
			.entries
			.values()
			.map(|entry| QueuedCommandInfo {
				token: entry.token,
				time: entry.time,
				group: entry.group.clone(),
				command: format!("{:?}", entry.command.command),
			})
			.collect()
	}

	pub fn len(&self) -> usize {
		self.inner.lock().unwrap().entries.len()
	}

	pub fn is_empty(&self) -> bool {
		self.len() == 0
	}

	/// Fire everything due at the current clock reading. Firing passes are
	/// serialized; IN_ORDER additionally awaits each receiver before the
	/// next entry fires.
	pub async fn nudge(&self) {
		let _fire = self.fire_lock.lock().await;

		loop {
			let now = self.clock.now();
			let entry = {
				let mut inner = self.inner.lock().unwrap();
				if inner.disposed {
					return;
				}
				match inner.entries.keys().next().copied() {
					Some(key) if key.0 <= now => inner.entries.remove(&key),
					_ => None,
				}
			};
			let Some(entry) = entry else { break };

			match self.mode {
				SendMode::Burst => {
					let receiver = Arc::clone(&self.receiver);
					let bus = self.bus.clone();
					let device_id = self.device_id.clone();
					tokio::spawn(async move {
						if let Err(e) = receiver.receive(entry.time, &entry.command).await {
							bus.command_error(
								device_id,
								e.to_string(),
								format!("{:?}", entry.command.command),
								entry.command.context.clone(),
								entry.command.timeline_obj_id.clone(),
							);
						}
					});
				}
				SendMode::InOrder => {
					let delay = now.saturating_sub(entry.time);
					if delay > self.slow_threshold_ms {
						self.bus.slow_command(self.device_id.clone(), format!("{:?}", entry.command.command), delay);
					}
					if let Err(e) = self.receiver.receive(entry.time, &entry.command).await {
						self.bus.command_error(
							self.device_id.clone(),
							e.to_string(),
							format!("{:?}", entry.command.command),
							entry.command.context.clone(),
							entry.command.timeline_obj_id.clone(),
						);
					}
				}
			}
		}
	}

	/// Stop the ticker and suppress all future firings
	pub fn dispose(&self) {
		{
			let mut inner = self.inner.lock().unwrap();
			inner.disposed = true;
			inner.entries.clear();
		}
		self.cancel.cancel();
	}
}
