use crate::commands::{MediaCommand, EMPTY_CLIP};
use crate::content::MixerParams;
use crate::state::{LayerAddr, LayerContent, LayerState, MediaState, StateContent};
use conductor::{CommandWithContext, TimeMs};
use std::collections::BTreeSet;
use std::mem::discriminant;

/// Minimal command list transforming `old` into `new`, assuming the device
/// is in `old`. Deterministic: layers are walked in address order, with
/// route targets after everything else so their sources exist first.
/// `time` is the state's effective time, used to compute seek offsets.
pub fn diff_states(old: &MediaState, new: &MediaState, time: TimeMs, time_base: u32) -> (Vec<CommandWithContext<MediaCommand>>, Vec<String>) {
	let mut commands = Vec::new();
	let mut messages = Vec::new();

	let addresses: BTreeSet<LayerAddr> = old.layers.keys().chain(new.layers.keys()).copied().collect();
	let (routed, plain): (Vec<LayerAddr>, Vec<LayerAddr>) = addresses.into_iter().partition(|addr| {
		new
			.layers
			.get(addr)
			.and_then(|l| l.foreground.as_ref())
			.map_or(false, |fg| matches!(fg.content, StateContent::Route { .. }))
	});

	let empty = LayerState::default();
	for addr in plain.into_iter().chain(routed) {
		let old_layer = old.layers.get(&addr).unwrap_or(&empty);
		let new_layer = new.layers.get(&addr).unwrap_or(&empty);
		diff_layer(addr, old_layer, new_layer, time, time_base, &mut commands, &mut messages);
	}

	(commands, messages)
}

fn diff_layer(addr: LayerAddr, old: &LayerState, new: &LayerState, time: TimeMs, time_base: u32, commands: &mut Vec<CommandWithContext<MediaCommand>>, messages: &mut Vec<String>) {
	let (channel, layer) = addr;

	match (&old.foreground, &new.foreground) {
		(None, None) => {}
		(Some(old_fg), Some(new_fg)) if old_fg.obj_id == new_fg.obj_id && old_fg.content == new_fg.content => {
			// same program; only play state or mixer params can have moved
			if old_fg.playing != new_fg.playing {
				let command = if new_fg.playing {
					MediaCommand::Resume { channel, layer }
				} else {
					MediaCommand::Pause { channel, layer }
				};
				commands.push(CommandWithContext::new(command, format!("fg: {} playing -> {}", new_fg.content.describe(), new_fg.playing), &new_fg.obj_id));
			}
			diff_mixer(addr, old_fg.mixer, new_fg.mixer, &new_fg.obj_id, commands);
		}
		(old_fg, Some(new_fg)) => {
			// new program enters the foreground
			if let Some(old_fg) = old_fg {
				if discriminant(&old_fg.content) != discriminant(&new_fg.content) {
					// incompatible content change: tear down before set-up
					commands.push(CommandWithContext::new(
						MediaCommand::Stop { channel, layer },
						format!("fg: {} -> {}", old_fg.content.describe(), new_fg.content.describe()),
						&old_fg.obj_id,
					));
				}
			}
			let from = old_fg.as_ref().map_or_else(|| "empty".to_string(), |l| l.content.describe());
			setup_foreground(addr, new_fg, from, time, time_base, commands);
			diff_mixer(addr, None, new_fg.mixer, &new_fg.obj_id, commands);
		}
		(Some(old_fg), None) => {
			// program leaves; honor its out-transition if it has one
			match old_fg.content.out_transition() {
				Some(transition) => commands.push(CommandWithContext::new(
					MediaCommand::Play {
						channel,
						layer,
						clip: EMPTY_CLIP.to_string(),
						looping: false,
						seek: 0,
						transition: Some(transition),
						no_clear: false,
					},
					format!("fg: {} -> empty (out transition)", old_fg.content.describe()),
					&old_fg.obj_id,
				)),
				None => commands.push(CommandWithContext::new(
					MediaCommand::Clear { channel, layer },
					format!("fg: {} -> empty", old_fg.content.describe()),
					&old_fg.obj_id,
				)),
			}
			if old_fg.mixer.is_some() {
				diff_mixer(addr, old_fg.mixer, None, &old_fg.obj_id, commands);
			}
		}
	}

	match (&old.background, &new.background) {
		(None, None) => {}
		(Some(old_bg), Some(new_bg)) if old_bg.content == new_bg.content => {}
		(_, Some(new_bg)) => match &new_bg.content {
			StateContent::Media { file, looping, .. } => commands.push(CommandWithContext::new(
				MediaCommand::LoadBg {
					channel,
					layer,
					clip: file.clone(),
					looping: *looping,
					auto: false,
				},
				format!("bg: pre-load {}", new_bg.content.describe()),
				&new_bg.obj_id,
			)),
			other => messages.push(format!("layer {}-{}: only media content can be pre-loaded, got {}", channel, layer, other.describe())),
		},
		(Some(old_bg), None) => {
			// the pre-load either went on air or has to be replaced with EMPTY
			let consumed = match (&new.foreground, old_bg.content.media_file()) {
				(Some(new_fg), Some(file)) => new_fg.content.media_file() == Some(file),
				_ => false,
			};
			if !consumed {
				commands.push(CommandWithContext::new(
					MediaCommand::LoadBg {
						channel,
						layer,
						clip: EMPTY_CLIP.to_string(),
						looping: false,
						auto: false,
					},
					format!("bg: {} retracted", old_bg.content.describe()),
					&old_bg.obj_id,
				));
			}
		}
	}
}

fn setup_foreground(addr: LayerAddr, fg: &LayerContent, from: String, time: TimeMs, time_base: u32, commands: &mut Vec<CommandWithContext<MediaCommand>>) {
	let (channel, layer) = addr;
	let context = format!("fg: {} -> {}", from, fg.content.describe());

	let command = match &fg.content {
		StateContent::Media {
			file,
			looping,
			in_transition,
			no_clear,
			..
		} => {
			let seek = seek_frames(fg, time, time_base);
			if fg.playing {
				MediaCommand::Play {
					channel,
					layer,
					clip: file.clone(),
					looping: *looping,
					seek,
					transition: *in_transition,
					no_clear: *no_clear,
				}
			} else {
				MediaCommand::Load {
					channel,
					layer,
					clip: file.clone(),
					seek,
				}
			}
		}
		StateContent::Input { input } => MediaCommand::PlayInput {
			channel,
			layer,
			input: input.clone(),
		},
		StateContent::Route { source } => MediaCommand::PlayRoute {
			channel,
			layer,
			source_channel: source.0,
			source_layer: source.1,
		},
	};

	commands.push(CommandWithContext::new(command, context, &fg.obj_id));
}

/// Seek position in device frames when the object started in the past.
/// Live inputs and routes cannot seek; looping media of unknown length
/// defaults to 0; looping media of known length seeks within the loop.
fn seek_frames(fg: &LayerContent, time: TimeMs, time_base: u32) -> u64 {
	let StateContent::Media { looping, length, .. } = &fg.content else {
		return 0;
	};
	if time <= fg.start {
		return 0;
	}
	let elapsed = time - fg.start;
	let position = if *looping {
		match length {
			Some(length) if *length > 0 => elapsed % length,
			_ => return 0,
		}
	} else {
		elapsed
	};
	crate::timecode::frames_from_ms(position, time_base)
}

fn diff_mixer(addr: LayerAddr, old: Option<MixerParams>, new: Option<MixerParams>, obj_id: &str, commands: &mut Vec<CommandWithContext<MediaCommand>>) {
	let (channel, layer) = addr;
	let old = old.unwrap_or_default();
	let new = new.unwrap_or_default();

	match (old.opacity, new.opacity) {
		(old_v, Some(new_v)) if old_v != Some(new_v) => commands.push(CommandWithContext::new(
			MediaCommand::MixerOpacity { channel, layer, opacity: new_v },
			format!("mixer: opacity {:?} -> {}", old_v, new_v),
			obj_id,
		)),
		(Some(_), None) => commands.push(CommandWithContext::new(
			MediaCommand::MixerOpacity { channel, layer, opacity: 1.0 },
			"mixer: opacity reset".to_string(),
			obj_id,
		)),
		_ => {}
	}

	match (old.volume, new.volume) {
		(old_v, Some(new_v)) if old_v != Some(new_v) => commands.push(CommandWithContext::new(
			MediaCommand::MixerVolume { channel, layer, volume: new_v },
			format!("mixer: volume {:?} -> {}", old_v, new_v),
			obj_id,
		)),
		(Some(_), None) => commands.push(CommandWithContext::new(
			MediaCommand::MixerVolume { channel, layer, volume: 1.0 },
			"mixer: volume reset".to_string(),
			obj_id,
		)),
		_ => {}
	}
}
