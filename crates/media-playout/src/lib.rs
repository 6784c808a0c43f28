// Media playout server adapter for the conductor engine.
//
// Converts resolved timeline slices into an idempotent channel/layer state,
// diffs state transitions into protocol commands (play, load-background,
// clear, mixer, transitions), seeks into clips that started in the past, and
// can hand future commands to the device's own scheduler, retracting them by
// token when the timeline changes.

pub mod commands;
pub mod content;
pub mod device;
pub mod diff;
pub mod options;
pub mod state;
pub mod timecode;
pub mod transport;

pub use commands::{MediaCommand, EMPTY_CLIP};
pub use content::{Direction, Easing, LiveInput, MediaContent, MediaFile, MixerParams, RouteSource, Transition, TransitionKind};
pub use device::MediaDevice;
pub use diff::diff_states;
pub use options::MediaOptions;
pub use state::{convert_resolved_state, LayerAddr, LayerContent, LayerState, MediaState, StateContent};
pub use timecode::{frames_from_ms, timecode_from_ms};
pub use transport::{MediaTransport, RetryConfig};
