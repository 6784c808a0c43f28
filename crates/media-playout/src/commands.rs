use crate::content::{Direction, Easing, Transition, TransitionKind};
use uuid::Uuid;

/// Clip name the device understands as "nothing"
pub const EMPTY_CLIP: &str = "EMPTY";

/// Protocol commands towards the playout server. `ScheduleSet` wraps any
/// other command for execution at a device timecode; the token can later
/// retract it with `ScheduleRemove`.
#[derive(Debug, Clone, PartialEq)]
pub enum MediaCommand {
	Play {
		channel: u16,
		layer: u16,
		clip: String,
		looping: bool,
		seek: u64,
		transition: Option<Transition>,
		no_clear: bool,
	},
	PlayInput {
		channel: u16,
		layer: u16,
		input: String,
	},
	PlayRoute {
		channel: u16,
		layer: u16,
		source_channel: u16,
		source_layer: u16,
	},
	/// Load paused into the foreground
	Load {
		channel: u16,
		layer: u16,
		clip: String,
		seek: u64,
	},
	/// Pre-load into the background without affecting the foreground
	LoadBg {
		channel: u16,
		layer: u16,
		clip: String,
		looping: bool,
		auto: bool,
	},
	Pause {
		channel: u16,
		layer: u16,
	},
	Resume {
		channel: u16,
		layer: u16,
	},
	Stop {
		channel: u16,
		layer: u16,
	},
	Clear {
		channel: u16,
		layer: u16,
	},
	MixerOpacity {
		channel: u16,
		layer: u16,
		opacity: f64,
	},
	MixerVolume {
		channel: u16,
		layer: u16,
		volume: f64,
	},
	ScheduleSet {
		token: Uuid,
		timecode: String,
		command: Box<MediaCommand>,
	},
	ScheduleRemove {
		token: Uuid,
	},
}

impl MediaCommand {
	/// The channel/layer this command targets, if any
	pub fn address(&self) -> Option<(u16, u16)> {
		match self {
			Self::Play { channel, layer, .. }
			| Self::PlayInput { channel, layer, .. }
			| Self::PlayRoute { channel, layer, .. }
			| Self::Load { channel, layer, .. }
			| Self::LoadBg { channel, layer, .. }
			| Self::Pause { channel, layer }
			| Self::Resume { channel, layer }
			| Self::Stop { channel, layer }
			| Self::Clear { channel, layer } => Some((*channel, *layer)),
			Self::MixerOpacity { channel, layer, .. } | Self::MixerVolume { channel, layer, .. } => Some((*channel, *layer)),
			Self::ScheduleSet { command, .. } => command.address(),
			Self::ScheduleRemove { .. } => None,
		}
	}

	/// Serialize for the line-based wire protocol. Transition durations stay
	/// in milliseconds on the wire.
	pub fn to_wire(&self) -> String {
		match self {
			Self::Play {
				channel,
				layer,
				clip,
				looping,
				seek,
				transition,
				no_clear,
			} => {
				let mut line = format!("PLAY {}-{} \"{}\"", channel, layer, clip);
				if *looping {
					line.push_str(" LOOP");
				}
				if *seek > 0 {
					line.push_str(&format!(" SEEK {}", seek));
				}
				if let Some(transition) = transition {
					line.push(' ');
					line.push_str(&transition_wire(transition));
				}
				if *no_clear {
					line.push_str(" NOCLEAR");
				}
				line
			}
			Self::PlayInput { channel, layer, input } => format!("PLAY {}-{} {}", channel, layer, input.to_uppercase()),
			Self::PlayRoute {
				channel,
				layer,
				source_channel,
				source_layer,
			} => format!("PLAY {}-{} route://{}-{}", channel, layer, source_channel, source_layer),
			Self::Load { channel, layer, clip, seek } => {
				let mut line = format!("LOAD {}-{} \"{}\"", channel, layer, clip);
				if *seek > 0 {
					line.push_str(&format!(" SEEK {}", seek));
				}
				line
			}
			Self::LoadBg { channel, layer, clip, looping, auto } => {
				let mut line = format!("LOADBG {}-{} \"{}\"", channel, layer, clip);
				if *looping {
					line.push_str(" LOOP");
				}
				if *auto {
					line.push_str(" AUTO");
				}
				line
			}
			Self::Pause { channel, layer } => format!("PAUSE {}-{}", channel, layer),
			Self::Resume { channel, layer } => format!("RESUME {}-{}", channel, layer),
			Self::Stop { channel, layer } => format!("STOP {}-{}", channel, layer),
			Self::Clear { channel, layer } => format!("CLEAR {}-{}", channel, layer),
			Self::MixerOpacity { channel, layer, opacity } => format!("MIXER {}-{} OPACITY {}", channel, layer, opacity),
			Self::MixerVolume { channel, layer, volume } => format!("MIXER {}-{} VOLUME {}", channel, layer, volume),
			Self::ScheduleSet { token, timecode, command } => format!("SCHEDULE SET {} {} {}", token, timecode, command.to_wire()),
			Self::ScheduleRemove { token } => format!("SCHEDULE REMOVE {}", token),
		}
	}
}

fn transition_wire(transition: &Transition) -> String {
	let kind = match transition.kind {
		TransitionKind::Mix => "MIX",
		TransitionKind::Wipe => "WIPE",
		TransitionKind::Push => "PUSH",
		TransitionKind::Slide => "SLIDE",
		TransitionKind::Cut => "CUT",
	};
	let easing = match transition.easing {
		Easing::Linear => "LINEAR",
		Easing::In => "IN",
		Easing::Out => "OUT",
		Easing::InOut => "INOUT",
	};
	let direction = match transition.direction {
		Direction::Left => "LEFT",
		Direction::Right => "RIGHT",
	};
	format!("{} {} {} {}", kind, transition.duration, easing, direction)
}
