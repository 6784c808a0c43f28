use crate::types::DeviceId;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, ConductorError>;

#[derive(Debug, Error)]
pub enum ConductorError {
	#[error("Device not found: {0}")]
	DeviceNotFound(DeviceId),

	#[error("Device already registered: {0}")]
	DeviceExists(DeviceId),

	#[error("Invalid configuration: {0}")]
	Config(String),

	#[error("Resolver error: {0}")]
	Resolver(String),

	#[error("Device error: {0}")]
	Device(#[from] DeviceError),

	#[error("Conductor is shut down")]
	ShutDown,

	#[error("Internal error: {0}")]
	Internal(String),
}

impl ConductorError {
	/// Recoverable errors become events on the bus; the tick loop carries on
	pub fn is_recoverable(&self) -> bool {
		matches!(self, Self::Resolver(_) | Self::Device(_))
	}
}

/// Errors surfaced by a device adapter through the contract seams
#[derive(Debug, Error)]
pub enum DeviceError {
	#[error("Transport error: {0}")]
	Transport(String),

	#[error("Invalid device configuration: {0}")]
	Config(String),

	#[error("Device not initialized")]
	NotInitialized,

	#[error("Command failed: {0}")]
	Command(String),

	#[error("Timed out after {0}ms")]
	Timeout(u64),

	#[error("Internal device error: {0}")]
	Internal(String),
}
