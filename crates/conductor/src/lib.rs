// Playout conductor engine
//
// Given a declarative timeline and a layer → device mapping, the conductor
// continuously resolves the desired state for every attached device and
// dispatches the minimum set of protocol commands required to realize it at
// the right wall-clock instant, across timeline edits, device reconnects and
// on-device scheduling.

pub mod clock;
pub mod conductor;
pub mod device;
pub mod do_on_time;
pub mod error;
pub mod events;
pub mod mapping;
pub mod resolver;
pub mod timeline;
pub mod types;

pub use clock::{Clock, MockClock, SystemClock};
pub use conductor::{Conductor, ConductorEngine, ConductorOptions, ConductorStatus};
pub use device::{CommandReceiver, CommandWithContext, Device};
pub use do_on_time::{DoOnTime, QueuedCommandInfo, SendMode};
pub use error::{ConductorError, DeviceError, Result};
pub use events::{EngineEvent, EventBus};
pub use mapping::{Mapping, Mappings};
pub use resolver::{BasicResolver, Instance, ResolveError, ResolvedObject, ResolvedState, TimelineResolver};
pub use timeline::{Content, Enable, Keyframe, RefEdge, TimeRef, TimelineObject};
pub use types::{DeviceId, DeviceStatus, DeviceType, StatusCode, TimeMs};
