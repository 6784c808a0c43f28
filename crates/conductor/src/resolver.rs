use crate::timeline::{Content, RefEdge, TimeRef, TimelineObject};
use crate::timeline::Enable;
use crate::types::TimeMs;
use serde_json::Value;
use std::collections::{BTreeMap, HashMap};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ResolveError {
	#[error("Unresolved time reference(s): {0}")]
	UnresolvedReference(String),

	#[error("Unsupported while expression: {0}")]
	UnsupportedWhile(String),
}

/// The active window of a resolved object. `end == None` means unbounded.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Instance {
	pub start: TimeMs,
	pub end: Option<TimeMs>,
}

impl Instance {
	pub fn contains(&self, time: TimeMs) -> bool {
		time >= self.start && self.end.map_or(true, |e| time < e)
	}
}

/// One object as resolved for a specific layer at a specific time. Keyframe
/// overrides are already merged into `content`.
#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedObject {
	pub id: String,
	pub layer: String,
	pub content: Content,
	pub instance: Instance,
	pub is_lookahead: bool,
	/// For lookahead objects: the resolved start of the next non-lookahead
	/// object on the same layer, if any. That is where the pre-loaded media
	/// is expected to go on air.
	pub lookahead_target: Option<TimeMs>,
}

/// Snapshot of every active layer at `time`. Ephemeral; one per tick
/// dispatch. Layers iterate in lexicographic order.
#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedState {
	pub time: TimeMs,
	pub layers: BTreeMap<String, ResolvedObject>,
}

impl ResolvedState {
	pub fn empty(time: TimeMs) -> Self {
		Self {
			time,
			layers: BTreeMap::new(),
		}
	}
}

/// Binding to the timeline resolver. `resolve` is pure with respect to its
/// inputs; `next_change` reports the next time the resolved output differs,
/// which is what the conductor walks to collect snapshots inside its
/// look-ahead horizon.
pub trait TimelineResolver: Send + Sync {
	fn resolve(&self, timeline: &[TimelineObject], time: TimeMs) -> Result<ResolvedState, ResolveError>;
	fn next_change(&self, timeline: &[TimelineObject], after: TimeMs) -> Option<TimeMs>;
}

/// Built-in resolver: absolute and symbolic (`#id.start`/`#id.end`) starts,
/// constant and `#id` while-expressions, keyframe merge, lookahead target
/// annotation. Collisions on a layer pick the non-lookahead object first,
/// then the greatest start, ties broken by greatest id.
#[derive(Debug, Default, Clone, Copy)]
pub struct BasicResolver;

impl BasicResolver {
	pub fn new() -> Self {
		Self
	}

	/// Fixed-point pass over symbolic references. `None` marks an object
	/// that never becomes active.
	fn resolve_instances(timeline: &[TimelineObject]) -> Result<HashMap<String, Option<Instance>>, ResolveError> {
		let mut instances: HashMap<String, Option<Instance>> = HashMap::new();

		for _pass in 0..=timeline.len() {
			let mut progress = false;

			for obj in timeline {
				if instances.contains_key(&obj.id) {
					continue;
				}

				let resolved: Option<Option<Instance>> = match &obj.enable {
					Enable::Timed { start, duration } => match start {
						TimeRef::At(s) => Some(Some(Instance {
							start: *s,
							end: duration.map(|d| *s + d),
						})),
						TimeRef::Ref(raw) => match start.reference() {
							None => return Err(ResolveError::UnresolvedReference(raw.clone())),
							Some((ref_id, edge)) => match instances.get(ref_id) {
								None => None, // referenced object not resolved yet
								Some(None) => Some(None),
								Some(Some(ref_inst)) => {
									let s = match edge {
										RefEdge::Start => Some(ref_inst.start),
										RefEdge::End => ref_inst.end,
									};
									match s {
										None => return Err(ResolveError::UnresolvedReference(format!("{} (unbounded end)", raw))),
										Some(s) => Some(Some(Instance {
											start: s,
											end: duration.map(|d| s + d),
										})),
									}
								}
							},
						},
					},
					Enable::While { r#while } => {
						let expr = r#while.trim();
						if expr == "1" {
							Some(Some(Instance { start: 0, end: None }))
						} else if expr == "0" || expr.is_empty() {
							Some(None)
						} else if let Some(ref_id) = expr.strip_prefix('#') {
							instances.get(ref_id).cloned()
						} else {
							return Err(ResolveError::UnsupportedWhile(expr.to_string()));
						}
					}
				};

				if let Some(instance) = resolved {
					instances.insert(obj.id.clone(), instance);
					progress = true;
				}
			}

			if instances.len() == timeline.len() {
				return Ok(instances);
			}
			if !progress {
				break;
			}
		}

		let unresolved: Vec<&str> = timeline.iter().filter(|o| !instances.contains_key(&o.id)).map(|o| o.id.as_str()).collect();
		Err(ResolveError::UnresolvedReference(unresolved.join(", ")))
	}

	/// `true` if `a` should win a same-layer collision against `b`
	fn wins(a: (&TimelineObject, Instance), b: (&TimelineObject, Instance)) -> bool {
		if a.0.is_lookahead != b.0.is_lookahead {
			return !a.0.is_lookahead;
		}
		if a.1.start != b.1.start {
			return a.1.start > b.1.start;
		}
		a.0.id > b.0.id
	}

	fn merged_content(obj: &TimelineObject, instance: Instance, time: TimeMs) -> Content {
		let mut content = obj.content.clone();
		for keyframe in &obj.keyframes {
			let kf_start = instance.start + keyframe.start;
			let kf_end = keyframe.duration.map(|d| kf_start + d).or(instance.end);
			let active = time >= kf_start && kf_end.map_or(true, |e| time < e);
			if active {
				deep_merge(&mut content.payload, &keyframe.content);
			}
		}
		content
	}

	fn lookahead_target(timeline: &[TimelineObject], instances: &HashMap<String, Option<Instance>>, obj: &TimelineObject, instance: Instance) -> Option<TimeMs> {
		timeline
			.iter()
			.filter(|o| !o.is_lookahead && o.layer == obj.layer)
			.filter_map(|o| instances.get(&o.id).copied().flatten())
			.map(|i| i.start)
			.filter(|s| *s > instance.start)
			.min()
	}
}

impl TimelineResolver for BasicResolver {
	fn resolve(&self, timeline: &[TimelineObject], time: TimeMs) -> Result<ResolvedState, ResolveError> {
		let instances = Self::resolve_instances(timeline)?;

		let mut chosen: BTreeMap<String, (&TimelineObject, Instance)> = BTreeMap::new();
		for obj in timeline {
			let Some(instance) = instances.get(&obj.id).copied().flatten() else {
				continue;
			};
			if !instance.contains(time) {
				continue;
			}
			let replace = match chosen.get(&obj.layer) {
				Some(current) => Self::wins((obj, instance), *current),
				None => true,
			};
			if replace {
				chosen.insert(obj.layer.clone(), (obj, instance));
			}
		}

		let mut layers = BTreeMap::new();
		for (layer, (obj, instance)) in chosen {
			let lookahead_target = if obj.is_lookahead {
				Self::lookahead_target(timeline, &instances, obj, instance)
			} else {
				None
			};
			layers.insert(
				layer.clone(),
				ResolvedObject {
					id: obj.id.clone(),
					layer,
					content: Self::merged_content(obj, instance, time),
					instance,
					is_lookahead: obj.is_lookahead,
					lookahead_target,
				},
			);
		}

		Ok(ResolvedState { time, layers })
	}

	fn next_change(&self, timeline: &[TimelineObject], after: TimeMs) -> Option<TimeMs> {
		let instances = Self::resolve_instances(timeline).ok()?;

		let mut next: Option<TimeMs> = None;
		let mut consider = |t: TimeMs| {
			if t > after && next.map_or(true, |n| t < n) {
				next = Some(t);
			}
		};

		for obj in timeline {
			let Some(instance) = instances.get(&obj.id).copied().flatten() else {
				continue;
			};
			consider(instance.start);
			if let Some(end) = instance.end {
				consider(end);
			}
			for keyframe in &obj.keyframes {
				let kf_start = instance.start + keyframe.start;
				consider(kf_start);
				if let Some(d) = keyframe.duration {
					consider(kf_start + d);
				}
			}
		}

		next
	}
}

fn deep_merge(target: &mut Value, overlay: &Value) {
	match (target, overlay) {
		(Value::Object(target), Value::Object(overlay)) => {
			for (key, value) in overlay {
				match target.get_mut(key) {
					Some(existing) => deep_merge(existing, value),
					None => {
						target.insert(key.clone(), value.clone());
					}
				}
			}
		}
		(target, overlay) => *target = overlay.clone(),
	}
}
