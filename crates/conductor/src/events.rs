use crate::types::{DeviceId, TimeMs};
use tokio::sync::broadcast;
use tracing::{debug, error, info, warn};

/// Everything the engine reports to the outside world. Recoverable failures
/// become events here rather than propagating as errors.
#[derive(Debug, Clone)]
pub enum EngineEvent {
	Error {
		device_id: Option<DeviceId>,
		context: String,
		message: String,
	},
	Warning {
		device_id: Option<DeviceId>,
		message: String,
	},
	Info {
		device_id: Option<DeviceId>,
		message: String,
	},
	Debug {
		device_id: Option<DeviceId>,
		message: String,
	},
	/// A dispatched command's receiver returned an error. Never retried.
	CommandError {
		device_id: DeviceId,
		message: String,
		command: String,
		context: String,
		timeline_obj_id: String,
	},
	ConnectionChanged {
		device_id: DeviceId,
		connected: bool,
	},
	/// A device re-queried its state (reconnect, forced ready); the conductor
	/// must re-resolve from now.
	ResetResolver {
		device_id: DeviceId,
	},
	/// An IN_ORDER queue entry started executing later than the configured
	/// threshold after its scheduled time.
	SlowCommand {
		device_id: DeviceId,
		command: String,
		delay_ms: TimeMs,
	},
}

/// Typed publish channel over a tokio broadcast. Lagged subscribers drop the
/// oldest events; emitting never blocks the engine.
#[derive(Clone)]
pub struct EventBus {
	tx: broadcast::Sender<EngineEvent>,
}

impl EventBus {
	pub fn new(capacity: usize) -> Self {
		let (tx, _) = broadcast::channel(capacity.max(1));
		Self { tx }
	}

	pub fn subscribe(&self) -> broadcast::Receiver<EngineEvent> {
		self.tx.subscribe()
	}

	pub fn emit(&self, event: EngineEvent) {
		match &event {
			EngineEvent::Error { device_id, context, message } => error!(?device_id, %context, "{}", message),
			EngineEvent::Warning { device_id, message } => warn!(?device_id, "{}", message),
			EngineEvent::Info { device_id, message } => info!(?device_id, "{}", message),
			EngineEvent::Debug { device_id, message } => debug!(?device_id, "{}", message),
			EngineEvent::CommandError {
				device_id, message, command, ..
			} => error!(%device_id, %command, "command failed: {}", message),
			EngineEvent::ConnectionChanged { device_id, connected } => info!(%device_id, connected, "connection changed"),
			EngineEvent::ResetResolver { device_id } => info!(%device_id, "device requested resolver reset"),
			EngineEvent::SlowCommand { device_id, command, delay_ms } => warn!(%device_id, %command, delay_ms, "slow command"),
		}
		let _ = self.tx.send(event);
	}

	pub fn error(&self, device_id: Option<DeviceId>, context: impl Into<String>, message: impl Into<String>) {
		self.emit(EngineEvent::Error {
			device_id,
			context: context.into(),
			message: message.into(),
		});
	}

	pub fn warning(&self, device_id: Option<DeviceId>, message: impl Into<String>) {
		self.emit(EngineEvent::Warning {
			device_id,
			message: message.into(),
		});
	}

	pub fn info(&self, device_id: Option<DeviceId>, message: impl Into<String>) {
		self.emit(EngineEvent::Info {
			device_id,
			message: message.into(),
		});
	}

	pub fn debug(&self, device_id: Option<DeviceId>, message: impl Into<String>) {
		self.emit(EngineEvent::Debug {
			device_id,
			message: message.into(),
		});
	}

	pub fn command_error(&self, device_id: DeviceId, message: impl Into<String>, command: String, context: String, timeline_obj_id: String) {
		self.emit(EngineEvent::CommandError {
			device_id,
			message: message.into(),
			command,
			context,
			timeline_obj_id,
		});
	}

	pub fn connection_changed(&self, device_id: DeviceId, connected: bool) {
		self.emit(EngineEvent::ConnectionChanged { device_id, connected });
	}

	pub fn reset_resolver(&self, device_id: DeviceId) {
		self.emit(EngineEvent::ResetResolver { device_id });
	}

	pub fn slow_command(&self, device_id: DeviceId, command: String, delay_ms: TimeMs) {
		self.emit(EngineEvent::SlowCommand { device_id, command, delay_ms });
	}
}

impl Default for EventBus {
	fn default() -> Self {
		Self::new(256)
	}
}
