use crate::types::{DeviceType, TimeMs};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// One timed object on the timeline. The engine never mutates these; edits
/// arrive as a whole replacement timeline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TimelineObject {
	pub id: String,
	pub enable: Enable,
	pub layer: String,
	pub content: Content,
	#[serde(default)]
	pub keyframes: Vec<Keyframe>,
	#[serde(default)]
	pub classes: Vec<String>,
	/// Lookahead objects do not play; they pre-load media for a following
	/// object on the same layer.
	#[serde(default)]
	pub is_lookahead: bool,
}

impl TimelineObject {
	pub fn new(id: impl Into<String>, layer: impl Into<String>, enable: Enable, content: Content) -> Self {
		Self {
			id: id.into(),
			enable,
			layer: layer.into(),
			content,
			keyframes: Vec::new(),
			classes: Vec::new(),
			is_lookahead: false,
		}
	}

	pub fn with_keyframes(mut self, keyframes: Vec<Keyframe>) -> Self {
		self.keyframes = keyframes;
		self
	}

	pub fn as_lookahead(mut self) -> Self {
		self.is_lookahead = true;
		self
	}
}

/// When an object is active
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", untagged)]
pub enum Enable {
	Timed {
		start: TimeRef,
		#[serde(default)]
		duration: Option<TimeMs>,
	},
	While {
		r#while: String,
	},
}

impl Enable {
	pub fn at(start: TimeMs, duration: Option<TimeMs>) -> Self {
		Self::Timed {
			start: TimeRef::At(start),
			duration,
		}
	}

	pub fn reference(start: impl Into<String>, duration: Option<TimeMs>) -> Self {
		Self::Timed {
			start: TimeRef::Ref(start.into()),
			duration,
		}
	}

	pub fn always() -> Self {
		Self::While { r#while: "1".to_string() }
	}
}

/// A start time: absolute milliseconds, or a symbolic reference such as
/// `"#obj0.end"` resolved against another object's instance.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum TimeRef {
	At(TimeMs),
	Ref(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RefEdge {
	Start,
	End,
}

impl TimeRef {
	/// Split `"#obj0.end"` into `("obj0", RefEdge::End)`. `"#obj0"` means the
	/// referenced object's start.
	pub fn reference(&self) -> Option<(&str, RefEdge)> {
		match self {
			TimeRef::At(_) => None,
			TimeRef::Ref(r) => {
				let r = r.strip_prefix('#')?;
				if let Some(id) = r.strip_suffix(".end") {
					Some((id, RefEdge::End))
				} else if let Some(id) = r.strip_suffix(".start") {
					Some((id, RefEdge::Start))
				} else {
					Some((r, RefEdge::Start))
				}
			}
		}
	}
}

/// Device-facing content: a device type tag plus the device-specific payload.
/// The engine treats the payload as opaque; adapters deserialize it into
/// their own typed content at the edge.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Content {
	pub device_type: DeviceType,
	#[serde(flatten)]
	pub payload: Value,
}

impl Content {
	pub fn new(device_type: DeviceType, payload: Value) -> Self {
		Self { device_type, payload }
	}
}

/// Time-scoped partial content override, merged into the owning object's
/// payload by the resolver while active. Keyframe times are relative to the
/// owning object's resolved start.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Keyframe {
	pub id: String,
	pub start: TimeMs,
	#[serde(default)]
	pub duration: Option<TimeMs>,
	pub content: Value,
}

#[cfg(test)]
mod tests {
	use super::*;
	use serde_json::json;

	#[test]
	fn test_time_ref_parsing() {
		assert_eq!(TimeRef::At(1000).reference(), None);
		assert_eq!(TimeRef::Ref("#obj0.end".into()).reference(), Some(("obj0", RefEdge::End)));
		assert_eq!(TimeRef::Ref("#obj0.start".into()).reference(), Some(("obj0", RefEdge::Start)));
		assert_eq!(TimeRef::Ref("#obj0".into()).reference(), Some(("obj0", RefEdge::Start)));
		assert_eq!(TimeRef::Ref("no-hash".into()).reference(), None);
	}

	#[test]
	fn test_object_roundtrip() {
		let obj = TimelineObject::new(
			"obj0",
			"layer0",
			Enable::at(10_000, Some(2_000)),
			Content::new(DeviceType::MediaPlayout, json!({"type": "media", "file": "AMB"})),
		);

		let encoded = serde_json::to_string(&obj).unwrap();
		let decoded: TimelineObject = serde_json::from_str(&encoded).unwrap();
		assert_eq!(obj, decoded);
	}

	#[test]
	fn test_enable_untagged_forms() {
		let timed: Enable = serde_json::from_value(json!({"start": 5000, "duration": 1000})).unwrap();
		assert_eq!(timed, Enable::at(5000, Some(1000)));

		let reference: Enable = serde_json::from_value(json!({"start": "#a.end"})).unwrap();
		assert_eq!(reference, Enable::reference("#a.end", None));

		let always: Enable = serde_json::from_value(json!({"while": "1"})).unwrap();
		assert_eq!(always, Enable::always());
	}
}
