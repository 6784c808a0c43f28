use crate::commands::MediaCommand;
use crate::diff::diff_states;
use crate::options::MediaOptions;
use crate::state::{convert_resolved_state, LayerAddr, MediaState};
use crate::timecode::timecode_from_ms;
use crate::transport::MediaTransport;
use async_trait::async_trait;
use conductor::{Clock, CommandReceiver, CommandWithContext, Device, DeviceError, DeviceId, DeviceStatus, DeviceType, DoOnTime, EventBus, Mappings, QueuedCommandInfo, ResolvedState, SendMode, TimeMs};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;
use uuid::Uuid;

const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);
const QUEUE_TICK_INTERVAL: Duration = Duration::from_millis(50);

/// Device state history older than this is pruned, always keeping the most
/// recent entry at or before now.
const STATE_RETENTION_MS: TimeMs = 60_000;

/// More unsent commands than this and the device reports a minor warning
const QUEUE_BACKLOG_WARNING: usize = 100;

/// Default receiver: serialize the command and put it on the wire
struct TcpCommandReceiver {
	transport: MediaTransport,
}

#[async_trait]
impl CommandReceiver<MediaCommand> for TcpCommandReceiver {
	async fn receive(&self, time: TimeMs, command: &CommandWithContext<MediaCommand>) -> Result<(), DeviceError> {
		let line = command.command.to_wire();
		debug!(time, command = %line, "sending");
		self.transport.send_line(line)
	}
}

#[derive(Debug, Clone, Copy)]
struct PendingSchedule {
	token: Uuid,
	time: TimeMs,
}

/// Media playout server adapter: a state machine with a time-indexed history
/// of device states. Each `handle_state` converts the resolved timeline
/// slice into device state, diffs it against the history and queues the
/// resulting commands. With `useScheduling` the device's own scheduler
/// executes future commands; superseded schedule tokens are retracted with
/// `ScheduleRemove` before any replacement commands go out.
pub struct MediaDevice {
	device_id: DeviceId,
	options: MediaOptions,
	clock: Arc<dyn Clock>,
	bus: EventBus,
	receiver: Option<Arc<dyn CommandReceiver<MediaCommand>>>,
	transport: Option<MediaTransport>,
	queue: Option<DoOnTime<MediaCommand>>,
	states: BTreeMap<TimeMs, MediaState>,
	pending_schedules: Vec<PendingSchedule>,
	initialized: bool,
}

impl MediaDevice {
	/// Construct with the default TCP command receiver. Option problems are
	/// reported here, synchronously, before any transport exists.
	pub fn new(device_id: impl Into<DeviceId>, options: MediaOptions, clock: Arc<dyn Clock>, bus: EventBus) -> Result<Self, DeviceError> {
		options.validate().map_err(DeviceError::Config)?;
		Ok(Self {
			device_id: device_id.into(),
			options,
			clock,
			bus,
			receiver: None,
			transport: None,
			queue: None,
			states: BTreeMap::new(),
			pending_schedules: Vec::new(),
			initialized: false,
		})
	}

	/// Construct with an injected command receiver (tests, dry-run). No
	/// transport is opened; the device reports as connected.
	pub fn with_receiver(
		device_id: impl Into<DeviceId>,
		options: MediaOptions,
		clock: Arc<dyn Clock>,
		bus: EventBus,
		receiver: Arc<dyn CommandReceiver<MediaCommand>>,
	) -> Result<Self, DeviceError> {
		let mut device = Self::new(device_id, options, clock, bus)?;
		device.receiver = Some(receiver);
		Ok(device)
	}

	/// Greatest recorded state with time ≤ `time`
	pub fn state_before(&self, time: TimeMs) -> Option<(TimeMs, &MediaState)> {
		self.states.range(..=time).next_back().map(|(t, s)| (*t, s))
	}

	/// Diff base: the state the device is in just before `time` takes
	/// effect. Strictly earlier than `time` so re-dispatching the same
	/// snapshot re-derives the same commands.
	fn state_strictly_before(&self, time: TimeMs) -> Option<&MediaState> {
		self.states.range(..time).next_back().map(|(_, s)| s)
	}

	fn set_state(&mut self, state: MediaState, time: TimeMs) {
		// everything from `time` onward is superseded by this state
		self.states.split_off(&time);
		self.states.insert(time, state);
		self.prune_states();
	}

	fn prune_states(&mut self) {
		let now = self.clock.now();
		let cutoff = now.saturating_sub(STATE_RETENTION_MS);
		let keep_current = self.states.range(..=now).next_back().map(|(t, _)| *t);
		let min_keep = keep_current.map_or(cutoff, |k| k.min(cutoff));
		let tail = self.states.split_off(&min_keep);
		self.states = tail;
	}

	/// Without protocol response parsing the re-queried state is the empty
	/// state; the probe still goes out so operators can trace it.
	fn query_current_state(&self) -> MediaState {
		if let Some(transport) = &self.transport {
			transport.send_probe();
		}
		self.bus.debug(Some(self.device_id.clone()), "assuming empty state from device query");
		MediaState::default()
	}

	fn mapped_addresses(&self, mappings: &Mappings) -> BTreeSet<LayerAddr> {
		mappings.layers_for_device(&self.device_id).filter_map(|(_, m)| m.channel.zip(m.layer)).collect()
	}

	/// Queue `ScheduleRemove` for every pending token effective at or after
	/// `time`, ahead of any replacement commands.
	fn retract_pending(&mut self, time: TimeMs, queue: &DoOnTime<MediaCommand>, now: TimeMs) {
		let mut stale: Vec<PendingSchedule> = self.pending_schedules.iter().copied().filter(|p| p.time >= time).collect();
		if stale.is_empty() {
			return;
		}
		stale.sort_by_key(|p| (p.time, p.token));
		self.pending_schedules.retain(|p| p.time < time);

		for pending in stale {
			queue.queue(
				now,
				None,
				CommandWithContext::new(
					MediaCommand::ScheduleRemove { token: pending.token },
					format!("schedule at {} superseded", pending.time),
					"",
				),
			);
		}
	}
}

#[async_trait]
impl Device for MediaDevice {
	fn device_id(&self) -> &DeviceId {
		&self.device_id
	}

	fn device_type(&self) -> DeviceType {
		DeviceType::MediaPlayout
	}

	fn device_name(&self) -> String {
		format!("Media playout ({})", self.options.host)
	}

	fn can_connect(&self) -> bool {
		true
	}

	fn connected(&self) -> bool {
		match &self.transport {
			Some(transport) => transport.connected(),
			None => self.initialized,
		}
	}

	async fn init(&mut self, mappings: &Mappings) -> Result<(), DeviceError> {
		if self.initialized {
			return Ok(());
		}

		let receiver = match &self.receiver {
			Some(receiver) => Arc::clone(receiver),
			None => {
				let transport = MediaTransport::connect(self.device_id.clone(), self.options.host.clone(), self.options.port, self.bus.clone());
				transport.wait_connected(CONNECT_TIMEOUT).await?;
				let receiver: Arc<dyn CommandReceiver<MediaCommand>> = Arc::new(TcpCommandReceiver { transport: transport.clone() });
				self.transport = Some(transport);
				receiver
			}
		};

		let queue = DoOnTime::new(self.device_id.clone(), SendMode::InOrder, Arc::clone(&self.clock), receiver, self.bus.clone());
		queue.start(QUEUE_TICK_INTERVAL);

		let now = self.clock.now();
		if self.options.initialize_as_clear {
			// assume the default state and emit the commands to realize it
			self.states.insert(now, MediaState::default());
			for (channel, layer) in self.mapped_addresses(mappings) {
				queue.queue(
					now,
					Some(format!("{}-{}", channel, layer)),
					CommandWithContext::new(MediaCommand::Clear { channel, layer }, "initialize as clear", ""),
				);
			}
			queue.nudge().await;
		} else {
			let state = self.query_current_state();
			self.states.insert(now, state);
		}

		self.queue = Some(queue);
		self.initialized = true;
		Ok(())
	}

	async fn terminate(&mut self) -> Result<(), DeviceError> {
		if let Some(queue) = self.queue.take() {
			queue.clear_queue_now_and_after(0);
			// best-effort retraction of everything still scheduled on-device
			let now = self.clock.now();
			self.pending_schedules.sort_by_key(|p| (p.time, p.token));
			for pending in self.pending_schedules.drain(..) {
				queue.queue(
					now,
					None,
					CommandWithContext::new(MediaCommand::ScheduleRemove { token: pending.token }, "device terminated", ""),
				);
			}
			queue.nudge().await;
			queue.dispose();
		}
		if let Some(transport) = self.transport.take() {
			transport.dispose();
		}
		self.initialized = false;
		Ok(())
	}

	async fn make_ready(&mut self, force: bool) -> Result<(), DeviceError> {
		if !self.initialized {
			return Err(DeviceError::NotInitialized);
		}
		if force {
			let Some(queue) = self.queue.clone() else {
				return Err(DeviceError::NotInitialized);
			};
			queue.clear_queue_now_and_after(0);

			let now = self.clock.now();
			self.retract_pending(0, &queue, now);
			queue.nudge().await;

			let state = self.query_current_state();
			self.states.clear();
			self.states.insert(now, state);
			self.bus.reset_resolver(self.device_id.clone());
		}
		Ok(())
	}

	fn handle_state(&mut self, state: &ResolvedState, mappings: &Mappings) {
		if !self.initialized {
			self.bus.debug(Some(self.device_id.clone()), "handle_state before init, ignoring".to_string());
			return;
		}
		let Some(queue) = self.queue.clone() else { return };

		let now = self.clock.now();
		let effective = now.max(state.time);

		let old_state = self.state_strictly_before(effective).cloned().unwrap_or_default();
		let (new_state, mut messages) = convert_resolved_state(state, mappings, &self.device_id);
		let (commands, diff_messages) = diff_states(&old_state, &new_state, state.time, self.options.time_base);
		messages.extend(diff_messages);
		for message in messages {
			self.bus.error(Some(self.device_id.clone()), "handleState", message);
		}

		// everything we queued from this point on is superseded
		queue.clear_queue_now_and_after(effective);

		if self.options.use_scheduling {
			if !commands.is_empty() {
				self.retract_pending(effective, &queue, now);
			}
			if state.time > now {
				// the device executes these itself, at its own timecode
				let timecode = timecode_from_ms(state.time, self.options.time_base);
				for command in commands {
					let token = Uuid::new_v4();
					self.pending_schedules.push(PendingSchedule { token, time: state.time });
					let group = command.command.address().map(|(c, l)| format!("{}-{}", c, l));
					let wrapped = CommandWithContext::new(
						MediaCommand::ScheduleSet {
							token,
							timecode: timecode.clone(),
							command: Box::new(command.command),
						},
						command.context,
						command.timeline_obj_id,
					);
					queue.queue(now, group, wrapped);
				}
			} else {
				for command in commands {
					let group = command.command.address().map(|(c, l)| format!("{}-{}", c, l));
					queue.queue(state.time, group, command);
				}
			}
		} else {
			for command in commands {
				let group = command.command.address().map(|(c, l)| format!("{}-{}", c, l));
				queue.queue(state.time, group, command);
			}
		}

		// tokens whose time has passed have fired on the device
		self.pending_schedules.retain(|p| p.time > now);

		self.set_state(new_state, state.time);
	}

	fn clear_future(&mut self, t: TimeMs) {
		if let Some(queue) = &self.queue {
			queue.clear_queue_after(t);
		}
	}

	fn get_status(&self) -> DeviceStatus {
		if !self.initialized {
			return DeviceStatus::bad("not initialized");
		}
		if let Some(transport) = &self.transport {
			if !transport.connected() {
				return DeviceStatus::bad("not connected");
			}
		}
		let backlog = self.queue.as_ref().map_or(0, |q| q.len());
		if backlog > QUEUE_BACKLOG_WARNING {
			return DeviceStatus::warning_minor(format!("{} commands queued", backlog));
		}
		DeviceStatus::good()
	}

	fn queued_commands(&self) -> Vec<QueuedCommandInfo> {
		self.queue.as_ref().map(|q| q.get_queue()).unwrap_or_default()
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use conductor::{Content, Instance, Mapping, MockClock, ResolvedObject};
	use serde_json::json;
	use std::sync::Mutex as StdMutex;

	struct Recording {
		calls: StdMutex<Vec<(TimeMs, MediaCommand)>>,
	}

	impl Recording {
		fn new() -> Arc<Self> {
			Arc::new(Self { calls: StdMutex::new(Vec::new()) })
		}

		fn commands(&self) -> Vec<MediaCommand> {
			self.calls.lock().unwrap().iter().map(|(_, c)| c.clone()).collect()
		}
	}

	#[async_trait]
	impl CommandReceiver<MediaCommand> for Recording {
		async fn receive(&self, time: TimeMs, command: &CommandWithContext<MediaCommand>) -> Result<(), DeviceError> {
			self.calls.lock().unwrap().push((time, command.command.clone()));
			Ok(())
		}
	}

	fn fixture_mappings() -> Mappings {
		let mut mappings = Mappings::new();
		mappings.insert("layer0", Mapping::media_playout("media0", 1, 10));
		mappings
	}

	fn resolved_media(time: TimeMs, file: &str, start: TimeMs, end: Option<TimeMs>) -> ResolvedState {
		ResolvedState {
			time,
			layers: [(
				"layer0".to_string(),
				ResolvedObject {
					id: format!("obj_{}", file),
					layer: "layer0".to_string(),
					content: Content::new(DeviceType::MediaPlayout, json!({"type": "media", "file": file})),
					instance: Instance { start, end },
					is_lookahead: false,
					lookahead_target: None,
				},
			)]
			.into_iter()
			.collect(),
		}
	}

	async fn fixture(clock: Arc<MockClock>, receiver: Arc<Recording>, use_scheduling: bool) -> MediaDevice {
		let options = MediaOptions::new("127.0.0.1").with_scheduling(use_scheduling).with_initialize_as_clear(false);
		let mut device = MediaDevice::with_receiver("media0", options, clock, EventBus::new(64), receiver).unwrap();
		device.init(&fixture_mappings()).await.unwrap();
		device
	}

	#[tokio::test]
	async fn test_state_before_returns_greatest_at_or_before() {
		let clock = Arc::new(MockClock::new(10_000));
		let receiver = Recording::new();
		let mut device = fixture(clock.clone(), receiver, false).await;
		let mappings = fixture_mappings();

		device.handle_state(&resolved_media(10_000, "A", 10_000, None), &mappings);
		device.handle_state(&resolved_media(12_000, "B", 12_000, None), &mappings);

		assert_eq!(device.state_before(9_999), None);
		assert_eq!(device.state_before(10_000).unwrap().0, 10_000);
		assert_eq!(device.state_before(11_500).unwrap().0, 10_000);
		assert_eq!(device.state_before(12_000).unwrap().0, 12_000);
		assert_eq!(device.state_before(20_000).unwrap().0, 12_000);
	}

	#[tokio::test]
	async fn test_edit_supersedes_history_and_queue() {
		let clock = Arc::new(MockClock::new(10_000));
		let receiver = Recording::new();
		let mut device = fixture(clock.clone(), receiver.clone(), false).await;
		let mappings = fixture_mappings();

		device.handle_state(&resolved_media(10_000, "A", 10_000, Some(12_000)), &mappings);
		device.handle_state(&resolved_media(12_000, "B", 12_000, None), &mappings);
		assert_eq!(device.queued_commands().len(), 2);

		// edit: replace the future program before it happens
		clock.set(10_100);
		device.handle_state(&resolved_media(12_000, "C", 12_000, None), &mappings);

		// play B is gone from the queue, replaced by play C
		let queued = device.queued_commands();
		assert_eq!(queued.len(), 2);
		assert_eq!(device.state_before(12_000).unwrap().0, 12_000);

		// fire everything due by the end time
		clock.set(12_000);
		device.queue.as_ref().unwrap().nudge().await;

		let commands = receiver.commands();
		let plays: Vec<&MediaCommand> = commands.iter().filter(|c| matches!(c, MediaCommand::Play { .. })).collect();
		assert_eq!(plays.len(), 2);
		assert!(matches!(plays[1], MediaCommand::Play { clip, .. } if clip == "C"));
	}

	#[tokio::test]
	async fn test_handle_state_before_init_is_ignored() {
		let clock = Arc::new(MockClock::new(10_000));
		let options = MediaOptions::new("127.0.0.1").with_initialize_as_clear(false);
		let receiver = Recording::new();
		let mut device = MediaDevice::with_receiver("media0", options, clock, EventBus::new(16), receiver).unwrap();

		device.handle_state(&resolved_media(10_000, "A", 10_000, None), &fixture_mappings());
		assert!(device.queued_commands().is_empty());
	}

	#[tokio::test]
	async fn test_initialize_as_clear_emits_clears() {
		let clock = Arc::new(MockClock::new(10_000));
		let receiver = Recording::new();
		let options = MediaOptions::new("127.0.0.1").with_initialize_as_clear(true);
		let mut device = MediaDevice::with_receiver("media0", options, clock, EventBus::new(16), receiver.clone()).unwrap();
		device.init(&fixture_mappings()).await.unwrap();

		assert_eq!(receiver.commands(), vec![MediaCommand::Clear { channel: 1, layer: 10 }]);
	}

	#[tokio::test]
	async fn test_make_ready_force_retracts_and_requeries() {
		let clock = Arc::new(MockClock::new(10_000));
		let receiver = Recording::new();
		let mut device = fixture(clock.clone(), receiver.clone(), true).await;
		let mappings = fixture_mappings();

		// schedule something in the future so there is a pending token
		device.handle_state(&resolved_media(12_000, "B", 12_000, None), &mappings);
		device.queue.as_ref().unwrap().nudge().await;
		assert_eq!(device.pending_schedules.len(), 1);

		device.make_ready(true).await.unwrap();
		assert!(device.pending_schedules.is_empty());

		let commands = receiver.commands();
		assert!(commands.iter().any(|c| matches!(c, MediaCommand::ScheduleRemove { .. })));
		// history was overwritten with the re-queried snapshot
		assert_eq!(device.state_before(20_000).unwrap().0, 10_000);
	}

	#[tokio::test]
	async fn test_terminate_disposes_queue() {
		let clock = Arc::new(MockClock::new(10_000));
		let receiver = Recording::new();
		let mut device = fixture(clock.clone(), receiver, false).await;

		device.handle_state(&resolved_media(12_000, "B", 12_000, None), &fixture_mappings());
		device.terminate().await.unwrap();
		assert!(device.queued_commands().is_empty());
		assert_eq!(device.get_status().status_code, conductor::StatusCode::Bad);
	}
}
