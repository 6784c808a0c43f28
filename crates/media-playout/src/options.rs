use serde::{Deserialize, Serialize};
use serde_json::Value;

fn default_port() -> u16 {
	5250
}

fn default_time_base() -> u32 {
	25
}

fn default_initialize_as_clear() -> bool {
	true
}

/// Connection and behavior options for a media playout device. Unknown
/// options are rejected when deserializing, so a typo in a config file fails
/// the device at `init` instead of being silently ignored.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct MediaOptions {
	pub host: String,

	#[serde(default = "default_port")]
	pub port: u16,

	/// Use the device's own scheduler for future-dated commands instead of
	/// holding them in the local dispatch queue
	#[serde(default)]
	pub use_scheduling: bool,

	/// Frames per second of the device, used for timecode and seek framing
	#[serde(default = "default_time_base")]
	pub time_base: u32,

	/// On startup, assume the device is clear and emit the commands to make
	/// it so. When false the first diff starts from a re-queried snapshot.
	#[serde(default = "default_initialize_as_clear")]
	pub initialize_as_clear: bool,
}

impl MediaOptions {
	pub fn new(host: impl Into<String>) -> Self {
		Self {
			host: host.into(),
			port: default_port(),
			use_scheduling: false,
			time_base: default_time_base(),
			initialize_as_clear: default_initialize_as_clear(),
		}
	}

	pub fn with_port(mut self, port: u16) -> Self {
		self.port = port;
		self
	}

	pub fn with_scheduling(mut self, use_scheduling: bool) -> Self {
		self.use_scheduling = use_scheduling;
		self
	}

	pub fn with_time_base(mut self, time_base: u32) -> Self {
		self.time_base = time_base;
		self
	}

	pub fn with_initialize_as_clear(mut self, initialize_as_clear: bool) -> Self {
		self.initialize_as_clear = initialize_as_clear;
		self
	}

	/// Parse options from loose configuration, rejecting unknown keys
	pub fn from_value(value: Value) -> Result<Self, String> {
		let options: Self = serde_json::from_value(value).map_err(|e| e.to_string())?;
		options.validate()?;
		Ok(options)
	}

	pub fn validate(&self) -> Result<(), String> {
		if self.host.is_empty() {
			return Err("host must not be empty".to_string());
		}
		if self.time_base == 0 {
			return Err("timeBase must be greater than zero".to_string());
		}
		Ok(())
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use serde_json::json;

	#[test]
	fn test_defaults_applied() {
		let options = MediaOptions::from_value(json!({"host": "10.0.0.5"})).unwrap();
		assert_eq!(options.port, 5250);
		assert_eq!(options.time_base, 25);
		assert!(!options.use_scheduling);
		assert!(options.initialize_as_clear);
	}

	#[test]
	fn test_unknown_option_is_rejected() {
		let result = MediaOptions::from_value(json!({"host": "10.0.0.5", "useSchedulling": true}));
		assert!(result.is_err());
	}

	#[test]
	fn test_validation() {
		assert!(MediaOptions::from_value(json!({"host": ""})).is_err());
		assert!(MediaOptions::from_value(json!({"host": "a", "timeBase": 0})).is_err());
	}
}
