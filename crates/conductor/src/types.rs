use serde::{Deserialize, Serialize};

/// Milliseconds on the engine's monotonic clock
pub type TimeMs = u64;

/// Identifier of a registered device
pub type DeviceId = String;

/// Kind of hardware/software a layer can be mapped to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum DeviceType {
	MediaPlayout,
	VisionMixer,
	RecordDeck,
}

/// Health of a device, worst-first ordering so aggregation can take the max
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum StatusCode {
	Good,
	WarningMinor,
	WarningMajor,
	Bad,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceStatus {
	pub status_code: StatusCode,
	pub messages: Vec<String>,
}

impl DeviceStatus {
	pub fn good() -> Self {
		Self {
			status_code: StatusCode::Good,
			messages: Vec::new(),
		}
	}

	pub fn bad(message: impl Into<String>) -> Self {
		Self {
			status_code: StatusCode::Bad,
			messages: vec![message.into()],
		}
	}

	pub fn warning_minor(message: impl Into<String>) -> Self {
		Self {
			status_code: StatusCode::WarningMinor,
			messages: vec![message.into()],
		}
	}
}

impl Default for DeviceStatus {
	fn default() -> Self {
		Self::good()
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn test_status_code_ordering() {
		assert!(StatusCode::Good < StatusCode::WarningMinor);
		assert!(StatusCode::WarningMinor < StatusCode::WarningMajor);
		assert!(StatusCode::WarningMajor < StatusCode::Bad);

		let worst = [StatusCode::Good, StatusCode::Bad, StatusCode::WarningMinor].into_iter().max();
		assert_eq!(worst, Some(StatusCode::Bad));
	}
}
