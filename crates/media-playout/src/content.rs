use conductor::TimeMs;
use serde::{Deserialize, Serialize};

fn default_playing() -> bool {
	true
}

/// Typed device payload, deserialized from the timeline object's opaque
/// content at the adapter edge. Extra keys are tolerated; they may belong to
/// other consumers of the same timeline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", tag = "type")]
pub enum MediaContent {
	Media(MediaFile),
	Input(LiveInput),
	Route(RouteSource),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MediaFile {
	pub file: String,

	#[serde(default)]
	pub looping: bool,

	/// Known media length in ms. None for growing or unknown-length files;
	/// a looping clip of unknown length cannot be seeked into.
	#[serde(default)]
	pub length: Option<TimeMs>,

	#[serde(default = "default_playing")]
	pub playing: bool,

	#[serde(default)]
	pub in_transition: Option<Transition>,

	#[serde(default)]
	pub out_transition: Option<Transition>,

	/// Keep the previous foreground visible underneath while this one loads
	#[serde(default)]
	pub no_clear: bool,

	/// Mixer-style parameters, usually driven by keyframes
	#[serde(default)]
	pub mixer: Option<MixerParams>,
}

/// A live source (SDI, IP, capture). Not seekable.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LiveInput {
	pub input: String,
}

/// Route the output of another mapped layer onto this one
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RouteSource {
	pub layer: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Transition {
	pub kind: TransitionKind,
	pub duration: TimeMs,
	pub easing: Easing,
	pub direction: Direction,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TransitionKind {
	Mix,
	Wipe,
	Push,
	Slide,
	Cut,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Easing {
	Linear,
	In,
	Out,
	InOut,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Direction {
	Left,
	Right,
}

#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MixerParams {
	#[serde(default)]
	pub opacity: Option<f64>,

	#[serde(default)]
	pub volume: Option<f64>,
}

#[cfg(test)]
mod tests {
	use super::*;
	use serde_json::json;

	#[test]
	fn test_media_content_from_timeline_payload() {
		let content: MediaContent = serde_json::from_value(json!({
			"type": "media",
			"file": "AMB",
			"looping": true,
		}))
		.unwrap();

		match content {
			MediaContent::Media(media) => {
				assert_eq!(media.file, "AMB");
				assert!(media.looping);
				assert!(media.playing);
				assert_eq!(media.length, None);
			}
			other => panic!("unexpected content: {:?}", other),
		}
	}

	#[test]
	fn test_transition_wire_shape() {
		let content: MediaContent = serde_json::from_value(json!({
			"type": "media",
			"file": "FADE",
			"inTransition": {"kind": "MIX", "duration": 1000, "easing": "LINEAR", "direction": "LEFT"},
		}))
		.unwrap();

		let MediaContent::Media(media) = content else { panic!() };
		assert_eq!(
			media.in_transition,
			Some(Transition {
				kind: TransitionKind::Mix,
				duration: 1000,
				easing: Easing::Linear,
				direction: Direction::Left,
			})
		);
	}

	#[test]
	fn test_input_and_route() {
		let input: MediaContent = serde_json::from_value(json!({"type": "input", "input": "decklink 1"})).unwrap();
		assert_eq!(input, MediaContent::Input(LiveInput { input: "decklink 1".to_string() }));

		let route: MediaContent = serde_json::from_value(json!({"type": "route", "layer": "layer_pgm"})).unwrap();
		assert_eq!(route, MediaContent::Route(RouteSource { layer: "layer_pgm".to_string() }));
	}
}
