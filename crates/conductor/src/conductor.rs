use crate::clock::Clock;
use crate::device::Device;
use crate::error::{ConductorError, Result};
use crate::events::{EngineEvent, EventBus};
use crate::mapping::Mappings;
use crate::resolver::{ResolvedState, TimelineResolver};
use crate::timeline::TimelineObject;
use crate::types::{DeviceId, DeviceStatus, StatusCode, TimeMs};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, mpsc, oneshot, watch, Mutex};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConductorOptions {
	/// How far ahead of wall-clock the resolver is walked each tick
	#[serde(default = "default_lookahead")]
	pub lookahead_ms: TimeMs,

	/// Interval of the periodic resolve tick
	#[serde(default = "default_tick_interval")]
	pub tick_interval_ms: u64,
}

fn default_lookahead() -> TimeMs {
	5000
}

fn default_tick_interval() -> u64 {
	500
}

impl ConductorOptions {
	pub fn new() -> Self {
		Self::default()
	}

	pub fn with_lookahead(mut self, lookahead_ms: TimeMs) -> Self {
		self.lookahead_ms = lookahead_ms;
		self
	}

	pub fn with_tick_interval(mut self, tick_interval_ms: u64) -> Self {
		self.tick_interval_ms = tick_interval_ms;
		self
	}

	pub fn tick_interval(&self) -> Duration {
		Duration::from_millis(self.tick_interval_ms)
	}

	pub fn validate(&self) -> std::result::Result<(), String> {
		if self.lookahead_ms == 0 {
			return Err("lookahead must be greater than zero".to_string());
		}
		if self.tick_interval_ms == 0 {
			return Err("tick interval must be greater than zero".to_string());
		}
		Ok(())
	}
}

impl Default for ConductorOptions {
	fn default() -> Self {
		Self {
			lookahead_ms: default_lookahead(),
			tick_interval_ms: default_tick_interval(),
		}
	}
}

/// Aggregate of every registered device's status; the overall code is the
/// worst of any child.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConductorStatus {
	pub status_code: StatusCode,
	pub devices: BTreeMap<DeviceId, DeviceStatus>,
}

impl Default for ConductorStatus {
	fn default() -> Self {
		Self {
			status_code: StatusCode::Good,
			devices: BTreeMap::new(),
		}
	}
}

/// The resolve/dispatch engine. Owns the clock, the current timeline, the
/// mapping table and the device registry; `tick()` walks the resolver across
/// the look-ahead horizon and fans the snapshots out to the devices.
///
/// Plain struct with `&mut self` operations; `Conductor` wraps it in an
/// actor task for production use. Tests drive `tick()` directly against a
/// mock clock.
pub struct ConductorEngine {
	clock: Arc<dyn Clock>,
	resolver: Arc<dyn TimelineResolver>,
	bus: EventBus,
	options: ConductorOptions,
	timeline: Vec<TimelineObject>,
	mappings: Mappings,
	devices: BTreeMap<DeviceId, Box<dyn Device>>,
	/// The resolution is valid through this time; 0 means invalidated and
	/// the next tick re-dispatches from `now`.
	resolved_until: TimeMs,
}

impl ConductorEngine {
	pub fn new(clock: Arc<dyn Clock>, resolver: Arc<dyn TimelineResolver>, bus: EventBus, options: ConductorOptions) -> Result<Self> {
		options.validate().map_err(ConductorError::Config)?;
		Ok(Self {
			clock,
			resolver,
			bus,
			options,
			timeline: Vec::new(),
			mappings: Mappings::new(),
			devices: BTreeMap::new(),
			resolved_until: 0,
		})
	}

	pub fn event_bus(&self) -> &EventBus {
		&self.bus
	}

	pub fn options(&self) -> &ConductorOptions {
		&self.options
	}

	pub fn timeline(&self) -> &[TimelineObject] {
		&self.timeline
	}

	pub fn mappings(&self) -> &Mappings {
		&self.mappings
	}

	pub fn device_ids(&self) -> Vec<DeviceId> {
		self.devices.keys().cloned().collect()
	}

	/// Replace the timeline. Triggers an immediate tick; superseded commands
	/// are retracted inside the devices via their queue clears.
	pub async fn set_timeline(&mut self, timeline: Vec<TimelineObject>) {
		info!(objects = timeline.len(), "timeline replaced");
		self.timeline = timeline;
		self.invalidate();
		self.tick().await;
	}

	/// Replace the mapping table: a full resolve invalidation. Pending
	/// commands on every device are retracted before re-resolving.
	pub async fn set_mappings(&mut self, mappings: Mappings) {
		info!(layers = mappings.len(), "mappings replaced");
		self.mappings = mappings;
		let now = self.clock.now();
		for device in self.devices.values_mut() {
			device.clear_future(now);
		}
		self.invalidate();
		self.tick().await;
	}

	/// Register a device: `init` is awaited, then a tick dispatches the
	/// current state to it. Configuration errors propagate to the caller and
	/// leave the other devices untouched.
	pub async fn add_device(&mut self, mut device: Box<dyn Device>) -> Result<()> {
		let device_id = device.device_id().clone();
		if self.devices.contains_key(&device_id) {
			return Err(ConductorError::DeviceExists(device_id));
		}

		device.init(&self.mappings).await?;
		info!(%device_id, "device added");

		self.devices.insert(device_id, device);
		self.invalidate();
		self.tick().await;
		Ok(())
	}

	pub async fn remove_device(&mut self, device_id: &str) -> Result<()> {
		let mut device = self.devices.remove(device_id).ok_or_else(|| ConductorError::DeviceNotFound(device_id.to_string()))?;
		let result = device.terminate().await;
		info!(%device_id, "device removed");
		result.map_err(ConductorError::from)
	}

	/// Prepare every device for going on air. Failures are events, not
	/// errors; one unready device must not block the rest.
	pub async fn make_ready(&mut self, force: bool) {
		for (device_id, device) in self.devices.iter_mut() {
			if let Err(e) = device.make_ready(force).await {
				self.bus.error(Some(device_id.clone()), "makeReady", e.to_string());
			}
		}
		if force {
			self.invalidate();
			self.tick().await;
		}
	}

	pub fn get_status(&self) -> ConductorStatus {
		let mut devices = BTreeMap::new();
		let mut worst = StatusCode::Good;
		for (device_id, device) in &self.devices {
			let status = device.get_status();
			worst = worst.max(status.status_code);
			devices.insert(device_id.clone(), status);
		}
		ConductorStatus { status_code: worst, devices }
	}

	/// Force the next tick to re-resolve from `now`
	pub fn invalidate(&mut self) {
		self.resolved_until = 0;
	}

	/// One resolve/dispatch pass: collect the snapshot at `now` (when
	/// invalidated) plus one snapshot per resolver change point not yet
	/// dispatched inside the horizon, and hand each device its mapped slice.
	pub async fn tick(&mut self) {
		let now = self.clock.now();
		let horizon = now + self.options.lookahead_ms;

		let mut snapshot_times: Vec<TimeMs> = Vec::new();
		let invalidated = self.resolved_until == 0;
		if invalidated {
			snapshot_times.push(now);
		}

		let mut cursor = if invalidated { now } else { self.resolved_until };
		while let Some(change) = self.resolver.next_change(&self.timeline, cursor) {
			if change > horizon {
				break;
			}
			snapshot_times.push(change);
			cursor = change;
		}

		for time in snapshot_times {
			let state = match self.resolver.resolve(&self.timeline, time) {
				Ok(state) => state,
				Err(e) => {
					// skip this tick entirely; retried on the next nudge
					self.bus.error(None, "resolver", e.to_string());
					return;
				}
			};
			debug!(time, layers = state.layers.len(), "dispatching resolved state");
			self.dispatch_state(&state);
		}

		self.resolved_until = horizon;
	}

	fn dispatch_state(&mut self, state: &ResolvedState) {
		for (device_id, device) in self.devices.iter_mut() {
			let device_type = device.device_type();
			let layers = state
				.layers
				.iter()
				.filter(|(layer, _)| {
					self
						.mappings
						.get(layer.as_str())
						.map_or(false, |m| &m.device_id == device_id && m.device_type == device_type)
				})
				.map(|(layer, obj)| (layer.clone(), obj.clone()))
				.collect();
			let filtered = ResolvedState { time: state.time, layers };
			device.handle_state(&filtered, &self.mappings);
		}
	}

	/// Terminate every device. Used by the actor loop on shutdown.
	pub async fn shutdown(&mut self) {
		let device_ids: Vec<DeviceId> = self.devices.keys().cloned().collect();
		for device_id in device_ids {
			if let Some(mut device) = self.devices.remove(&device_id) {
				if let Err(e) = device.terminate().await {
					warn!(%device_id, "terminate failed: {}", e);
				}
			}
		}
	}
}

enum ConductorCommand {
	SetTimeline(Vec<TimelineObject>),
	SetMappings(Mappings),
	AddDevice(Box<dyn Device>, oneshot::Sender<Result<()>>),
	RemoveDevice(DeviceId, oneshot::Sender<Result<()>>),
	MakeReady(bool, oneshot::Sender<()>),
	TriggerResolve,
}

/// Actor facade over `ConductorEngine`: all methods are `&self`, state
/// mutations flow through a command channel into the run loop, and status
/// snapshots are published on a watch channel.
pub struct Conductor {
	command_tx: mpsc::UnboundedSender<ConductorCommand>,
	status_rx: watch::Receiver<ConductorStatus>,
	bus: EventBus,
	cancel_token: CancellationToken,
	task_handle: Mutex<Option<JoinHandle<()>>>,
}

impl Conductor {
	pub fn new(engine: ConductorEngine) -> Self {
		let cancel_token = CancellationToken::new();
		let (command_tx, command_rx) = mpsc::unbounded_channel();
		let (status_tx, status_rx) = watch::channel(engine.get_status());
		let bus = engine.event_bus().clone();

		let task_handle = tokio::spawn(run_loop(engine, command_rx, status_tx, cancel_token.clone()));

		Self {
			command_tx,
			status_rx,
			bus,
			cancel_token,
			task_handle: Mutex::new(Some(task_handle)),
		}
	}

	fn send(&self, command: ConductorCommand) -> Result<()> {
		self.command_tx.send(command).map_err(|_| ConductorError::ShutDown)
	}

	pub fn set_timeline(&self, timeline: Vec<TimelineObject>) -> Result<()> {
		self.send(ConductorCommand::SetTimeline(timeline))
	}

	pub fn set_mappings(&self, mappings: Mappings) -> Result<()> {
		self.send(ConductorCommand::SetMappings(mappings))
	}

	pub async fn add_device(&self, device: Box<dyn Device>) -> Result<()> {
		let (tx, rx) = oneshot::channel();
		self.send(ConductorCommand::AddDevice(device, tx))?;
		rx.await.map_err(|_| ConductorError::ShutDown)?
	}

	pub async fn remove_device(&self, device_id: impl Into<DeviceId>) -> Result<()> {
		let (tx, rx) = oneshot::channel();
		self.send(ConductorCommand::RemoveDevice(device_id.into(), tx))?;
		rx.await.map_err(|_| ConductorError::ShutDown)?
	}

	pub async fn make_ready(&self, force: bool) -> Result<()> {
		let (tx, rx) = oneshot::channel();
		self.send(ConductorCommand::MakeReady(force, tx))?;
		rx.await.map_err(|_| ConductorError::ShutDown)
	}

	/// Nudge the run loop into an immediate resolve pass
	pub fn trigger_resolve(&self) -> Result<()> {
		self.send(ConductorCommand::TriggerResolve)
	}

	pub fn subscribe_events(&self) -> broadcast::Receiver<EngineEvent> {
		self.bus.subscribe()
	}

	pub fn subscribe_status(&self) -> watch::Receiver<ConductorStatus> {
		self.status_rx.clone()
	}

	pub fn current_status(&self) -> ConductorStatus {
		self.status_rx.borrow().clone()
	}

	pub async fn shutdown(self) {
		info!("shutting down conductor");
		self.cancel_token.cancel();
		if let Some(handle) = self.task_handle.lock().await.take() {
			let _ = handle.await;
		}
		info!("conductor shut down complete");
	}
}

impl Drop for Conductor {
	fn drop(&mut self) {
		self.cancel_token.cancel();
	}
}

async fn run_loop(mut engine: ConductorEngine, mut command_rx: mpsc::UnboundedReceiver<ConductorCommand>, status_tx: watch::Sender<ConductorStatus>, cancel_token: CancellationToken) {
	let mut events = engine.event_bus().subscribe();
	let mut events_open = true;
	let mut ticker = tokio::time::interval(engine.options().tick_interval());
	ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

	info!(interval = ?engine.options().tick_interval(), "conductor loop started");

	loop {
		tokio::select! {
			_ = cancel_token.cancelled() => break,
			_ = ticker.tick() => {
				engine.tick().await;
			}
			Some(command) = command_rx.recv() => {
				handle_command(&mut engine, command).await;
			}
			event = events.recv(), if events_open => {
				match event {
					// a device re-queried its state; resolve everything again
					Ok(EngineEvent::ResetResolver { device_id }) => {
						debug!(%device_id, "resolver reset requested");
						engine.invalidate();
						engine.tick().await;
					}
					Ok(_) => {}
					Err(broadcast::error::RecvError::Lagged(skipped)) => {
						warn!(skipped, "conductor lagged behind the event bus");
					}
					Err(broadcast::error::RecvError::Closed) => {
						events_open = false;
					}
				}
			}
		}
		status_tx.send_replace(engine.get_status());
	}

	engine.shutdown().await;
	info!("conductor loop stopped");
}

async fn handle_command(engine: &mut ConductorEngine, command: ConductorCommand) {
	match command {
		ConductorCommand::SetTimeline(timeline) => engine.set_timeline(timeline).await,
		ConductorCommand::SetMappings(mappings) => engine.set_mappings(mappings).await,
		ConductorCommand::AddDevice(device, reply) => {
			let _ = reply.send(engine.add_device(device).await);
		}
		ConductorCommand::RemoveDevice(device_id, reply) => {
			let _ = reply.send(engine.remove_device(&device_id).await);
		}
		ConductorCommand::MakeReady(force, reply) => {
			engine.make_ready(force).await;
			let _ = reply.send(());
		}
		ConductorCommand::TriggerResolve => {
			engine.invalidate();
			engine.tick().await;
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::clock::MockClock;
	use crate::device::Device;
	use crate::do_on_time::QueuedCommandInfo;
	use crate::error::DeviceError;
	use crate::mapping::Mapping;
	use crate::resolver::BasicResolver;
	use crate::timeline::{Content, Enable};
	use crate::types::DeviceType;
	use async_trait::async_trait;
	use serde_json::json;
	use std::sync::Mutex as StdMutex;

	/// Records every resolved state handed over by the conductor
	struct TestDevice {
		device_id: DeviceId,
		status: DeviceStatus,
		seen: Arc<StdMutex<Vec<(TimeMs, Vec<String>)>>>,
		initialized: bool,
	}

	impl TestDevice {
		fn new(device_id: &str) -> (Box<Self>, Arc<StdMutex<Vec<(TimeMs, Vec<String>)>>>) {
			let seen = Arc::new(StdMutex::new(Vec::new()));
			(
				Box::new(Self {
					device_id: device_id.to_string(),
					status: DeviceStatus::good(),
					seen: Arc::clone(&seen),
					initialized: false,
				}),
				seen,
			)
		}

		fn with_status(mut self: Box<Self>, status: DeviceStatus) -> Box<Self> {
			self.status = status;
			self
		}
	}

	#[async_trait]
	impl Device for TestDevice {
		fn device_id(&self) -> &DeviceId {
			&self.device_id
		}
		fn device_type(&self) -> DeviceType {
			DeviceType::MediaPlayout
		}
		fn device_name(&self) -> String {
			format!("Test device {}", self.device_id)
		}
		fn can_connect(&self) -> bool {
			false
		}
		fn connected(&self) -> bool {
			true
		}
		async fn init(&mut self, _mappings: &Mappings) -> std::result::Result<(), DeviceError> {
			self.initialized = true;
			Ok(())
		}
		async fn terminate(&mut self) -> std::result::Result<(), DeviceError> {
			Ok(())
		}
		async fn make_ready(&mut self, _force: bool) -> std::result::Result<(), DeviceError> {
			Ok(())
		}
		fn handle_state(&mut self, state: &ResolvedState, _mappings: &Mappings) {
			let layers = state.layers.keys().cloned().collect();
			self.seen.lock().unwrap().push((state.time, layers));
		}
		fn clear_future(&mut self, _t: TimeMs) {}
		fn get_status(&self) -> DeviceStatus {
			self.status.clone()
		}
		fn queued_commands(&self) -> Vec<QueuedCommandInfo> {
			Vec::new()
		}
	}

	fn media_obj(id: &str, layer: &str, enable: Enable) -> TimelineObject {
		TimelineObject::new(id, layer, enable, Content::new(DeviceType::MediaPlayout, json!({"type": "media", "file": id})))
	}

	fn engine_fixture(clock: Arc<MockClock>) -> ConductorEngine {
		ConductorEngine::new(clock, Arc::new(BasicResolver::new()), EventBus::new(64), ConductorOptions::default().with_lookahead(5000)).unwrap()
	}

	#[tokio::test]
	async fn test_dispatch_filters_layers_per_device() {
		let clock = Arc::new(MockClock::new(10_000));
		let mut engine = engine_fixture(clock.clone());

		let mut mappings = Mappings::new();
		mappings.insert("layer_a", Mapping::media_playout("dev_a", 1, 10));
		mappings.insert("layer_b", Mapping::media_playout("dev_b", 1, 10));
		engine.set_mappings(mappings).await;

		let (dev_a, seen_a) = TestDevice::new("dev_a");
		let (dev_b, seen_b) = TestDevice::new("dev_b");
		engine.add_device(dev_a).await.unwrap();
		engine.add_device(dev_b).await.unwrap();

		engine
			.set_timeline(vec![media_obj("a", "layer_a", Enable::at(10_000, None)), media_obj("b", "layer_b", Enable::at(10_000, None))])
			.await;

		let last_a = seen_a.lock().unwrap().last().cloned().unwrap();
		let last_b = seen_b.lock().unwrap().last().cloned().unwrap();
		assert_eq!(last_a, (10_000, vec!["layer_a".to_string()]));
		assert_eq!(last_b, (10_000, vec!["layer_b".to_string()]));
	}

	#[tokio::test]
	async fn test_change_points_dispatched_once() {
		let clock = Arc::new(MockClock::new(10_000));
		let mut engine = engine_fixture(clock.clone());

		let mut mappings = Mappings::new();
		mappings.insert("layer_a", Mapping::media_playout("dev_a", 1, 10));
		engine.set_mappings(mappings).await;

		let (dev_a, seen_a) = TestDevice::new("dev_a");
		engine.add_device(dev_a).await.unwrap();

		engine.set_timeline(vec![media_obj("a", "layer_a", Enable::at(11_000, Some(1000)))]).await;

		let after_set: Vec<TimeMs> = seen_a.lock().unwrap().iter().map(|(t, _)| *t).collect();
		// the now snapshot plus the start and end change points
		assert!(after_set.ends_with(&[10_000, 11_000, 12_000]));

		let count = seen_a.lock().unwrap().len();
		clock.advance(100);
		engine.tick().await;
		// nothing new inside the horizon: no re-dispatch
		assert_eq!(seen_a.lock().unwrap().len(), count);
	}

	#[tokio::test]
	async fn test_far_change_point_enters_horizon_later() {
		let clock = Arc::new(MockClock::new(10_000));
		let mut engine = engine_fixture(clock.clone());

		let mut mappings = Mappings::new();
		mappings.insert("layer_a", Mapping::media_playout("dev_a", 1, 10));
		engine.set_mappings(mappings).await;

		let (dev_a, seen_a) = TestDevice::new("dev_a");
		engine.add_device(dev_a).await.unwrap();

		engine.set_timeline(vec![media_obj("a", "layer_a", Enable::at(20_000, Some(1000)))]).await;
		let times: Vec<TimeMs> = seen_a.lock().unwrap().iter().map(|(t, _)| *t).collect();
		assert!(!times.contains(&20_000));

		clock.set(16_000);
		engine.tick().await;
		let times: Vec<TimeMs> = seen_a.lock().unwrap().iter().map(|(t, _)| *t).collect();
		assert!(times.contains(&20_000) && times.contains(&21_000));
	}

	#[tokio::test]
	async fn test_duplicate_device_is_rejected() {
		let clock = Arc::new(MockClock::new(10_000));
		let mut engine = engine_fixture(clock);

		let (dev, _) = TestDevice::new("dev_a");
		engine.add_device(dev).await.unwrap();

		let (dup, _) = TestDevice::new("dev_a");
		assert!(matches!(engine.add_device(dup).await, Err(ConductorError::DeviceExists(_))));
	}

	#[tokio::test]
	async fn test_status_aggregates_worst_child() {
		let clock = Arc::new(MockClock::new(10_000));
		let mut engine = engine_fixture(clock);

		let (good, _) = TestDevice::new("dev_a");
		let (bad, _) = TestDevice::new("dev_b");
		engine.add_device(good).await.unwrap();
		engine.add_device(bad.with_status(DeviceStatus::bad("not connected"))).await.unwrap();

		let status = engine.get_status();
		assert_eq!(status.status_code, StatusCode::Bad);
		assert_eq!(status.devices["dev_a"].status_code, StatusCode::Good);
		assert_eq!(status.devices["dev_b"].status_code, StatusCode::Bad);
	}

	#[tokio::test]
	async fn test_actor_facade() {
		let clock = Arc::new(MockClock::new(10_000));
		let engine = engine_fixture(clock);
		let conductor = Conductor::new(engine);

		let (dev, seen) = TestDevice::new("dev_a");
		let mut mappings = Mappings::new();
		mappings.insert("layer_a", Mapping::media_playout("dev_a", 1, 10));

		conductor.set_mappings(mappings).unwrap();
		conductor.add_device(dev).await.unwrap();
		conductor.set_timeline(vec![media_obj("a", "layer_a", Enable::at(10_000, Some(1000)))]).unwrap();

		tokio::time::sleep(Duration::from_millis(100)).await;
		assert!(!seen.lock().unwrap().is_empty());

		let status = conductor.current_status();
		assert_eq!(status.status_code, StatusCode::Good);

		conductor.shutdown().await;
	}
}
