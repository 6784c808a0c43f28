use crate::do_on_time::QueuedCommandInfo;
use crate::error::DeviceError;
use crate::mapping::Mappings;
use crate::resolver::ResolvedState;
use crate::types::{DeviceId, DeviceStatus, DeviceType, TimeMs};
use async_trait::async_trait;

/// A protocol command plus the diagnostics that explain why it exists:
/// a free-form context string and the timeline object it is attributed to.
#[derive(Debug, Clone, PartialEq)]
pub struct CommandWithContext<C> {
	pub command: C,
	pub context: String,
	pub timeline_obj_id: String,
}

impl<C> CommandWithContext<C> {
	pub fn new(command: C, context: impl Into<String>, timeline_obj_id: impl Into<String>) -> Self {
		Self {
			command,
			context: context.into(),
			timeline_obj_id: timeline_obj_id.into(),
		}
	}
}

/// The seam between the dispatch queue and the wire. The default
/// implementation speaks the device's protocol over its transport; tests
/// inject a stub that records calls instead.
#[async_trait]
pub trait CommandReceiver<C: Send + Sync>: Send + Sync {
	async fn receive(&self, time: TimeMs, command: &CommandWithContext<C>) -> Result<(), DeviceError>;
}

/// The contract every device adapter fulfils towards the conductor. Each
/// adapter is a state machine with a time-indexed history of device states;
/// `handle_state` turns a resolved timeline slice into timed protocol
/// commands.
///
/// Adapters emit on the shared `EventBus`: `error`, `warning`, `info`,
/// `debug`, `commandError`, `connectionChanged`, `resetResolver`,
/// `slowCommand`.
#[async_trait]
pub trait Device: Send {
	fn device_id(&self) -> &DeviceId;
	fn device_type(&self) -> DeviceType;
	fn device_name(&self) -> String;

	/// Whether this device type has a transport at all
	fn can_connect(&self) -> bool;
	fn connected(&self) -> bool;

	/// Establish the transport. Resolves on first ready; subsequent
	/// reconnects re-query the device and emit `resetResolver` on the bus.
	/// Configuration problems are returned synchronously here.
	async fn init(&mut self, mappings: &Mappings) -> Result<(), DeviceError>;

	/// Dispose the queue, cancel timers, close the transport. Outstanding
	/// on-device scheduled commands are retracted best-effort.
	async fn terminate(&mut self) -> Result<(), DeviceError>;

	/// With `force`: clear the queue, re-query the device and overwrite the
	/// state history.
	async fn make_ready(&mut self, force: bool) -> Result<(), DeviceError>;

	/// Compute the device state for `state`, diff against the history and
	/// enqueue the resulting commands. Calls arriving before `init`
	/// completed are ignored (with a debug event).
	fn handle_state(&mut self, state: &ResolvedState, mappings: &Mappings);

	/// Drop queued commands with time strictly greater than `t`
	fn clear_future(&mut self, t: TimeMs);

	fn get_status(&self) -> DeviceStatus;

	/// Stable view of the not-yet-dispatched queue, for operators
	fn queued_commands(&self) -> Vec<QueuedCommandInfo>;
}
