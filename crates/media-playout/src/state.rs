use crate::content::{MediaContent, MixerParams, Transition};
use conductor::{DeviceType, Mappings, ResolvedState, TimeMs};
use std::collections::BTreeMap;

/// Device-native address of a layer: (channel, layer)
pub type LayerAddr = (u16, u16);

/// What occupies a layer slot, with route indirection already resolved to a
/// device address
#[derive(Debug, Clone, PartialEq)]
pub enum StateContent {
	Media {
		file: String,
		looping: bool,
		length: Option<TimeMs>,
		in_transition: Option<Transition>,
		out_transition: Option<Transition>,
		no_clear: bool,
	},
	Input {
		input: String,
	},
	Route {
		source: LayerAddr,
	},
}

impl StateContent {
	pub fn media_file(&self) -> Option<&str> {
		match self {
			Self::Media { file, .. } => Some(file),
			_ => None,
		}
	}

	pub fn out_transition(&self) -> Option<Transition> {
		match self {
			Self::Media { out_transition, .. } => *out_transition,
			_ => None,
		}
	}

	/// Short human description for command contexts
	pub fn describe(&self) -> String {
		match self {
			Self::Media { file, .. } => format!("media '{}'", file),
			Self::Input { input } => format!("input '{}'", input),
			Self::Route { source } => format!("route from {}-{}", source.0, source.1),
		}
	}
}

#[derive(Debug, Clone, PartialEq)]
pub struct LayerContent {
	pub content: StateContent,
	pub playing: bool,
	/// Resolved start of the owning timeline object, for seek computation
	pub start: TimeMs,
	pub obj_id: String,
	pub mixer: Option<MixerParams>,
}

/// One device layer: the foreground program and an optional pre-loaded
/// background
#[derive(Debug, Clone, PartialEq, Default)]
pub struct LayerState {
	pub foreground: Option<LayerContent>,
	pub background: Option<LayerContent>,
}

/// Idempotent description of what the whole device should currently be
/// doing. The default (empty) state is a device with every layer clear.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct MediaState {
	pub layers: BTreeMap<LayerAddr, LayerState>,
}

/// Pure projection of a resolved timeline slice into device state, using the
/// current mapping table. Layers mapped elsewhere, content tagged for other
/// device types and unusable payloads are skipped; the latter are reported
/// as messages so the device can emit best-effort errors.
pub fn convert_resolved_state(state: &ResolvedState, mappings: &Mappings, device_id: &str) -> (MediaState, Vec<String>) {
	let mut media_state = MediaState::default();
	let mut messages = Vec::new();

	for (layer_name, obj) in &state.layers {
		let Some(mapping) = mappings.get(layer_name) else { continue };
		if mapping.device_id != device_id || mapping.device_type != DeviceType::MediaPlayout {
			continue;
		}
		if obj.content.device_type != DeviceType::MediaPlayout {
			// someone else's content on our layer; not an error
			continue;
		}
		let (Some(channel), Some(layer)) = (mapping.channel, mapping.layer) else {
			messages.push(format!("mapping for layer '{}' has no channel/layer routing", layer_name));
			continue;
		};

		let content: MediaContent = match serde_json::from_value(obj.content.payload.clone()) {
			Ok(content) => content,
			Err(e) => {
				messages.push(format!("layer '{}': unusable content: {}", layer_name, e));
				continue;
			}
		};

		let (state_content, playing, mixer) = match content {
			MediaContent::Media(media) => (
				StateContent::Media {
					file: media.file,
					looping: media.looping,
					length: media.length,
					in_transition: media.in_transition,
					out_transition: media.out_transition,
					no_clear: media.no_clear,
				},
				media.playing,
				media.mixer,
			),
			MediaContent::Input(input) => (StateContent::Input { input: input.input }, true, None),
			MediaContent::Route(route) => {
				let source = mappings
					.get(&route.layer)
					.filter(|m| m.device_id == device_id && m.device_type == DeviceType::MediaPlayout)
					.and_then(|m| m.channel.zip(m.layer));
				match source {
					Some(source) => (StateContent::Route { source }, true, None),
					None => {
						messages.push(format!("layer '{}': route source '{}' is not mapped to this device", layer_name, route.layer));
						continue;
					}
				}
			}
		};

		let layer_content = LayerContent {
			content: state_content,
			playing: playing && !obj.is_lookahead,
			start: obj.instance.start,
			obj_id: obj.id.clone(),
			mixer,
		};

		let entry = media_state.layers.entry((channel, layer)).or_default();
		if obj.is_lookahead {
			entry.background = Some(layer_content);
		} else {
			entry.foreground = Some(layer_content);
		}
	}

	(media_state, messages)
}
