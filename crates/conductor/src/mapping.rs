use crate::types::{DeviceId, DeviceType};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Routing for one logical layer: which device it belongs to and where on
/// that device it lands.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Mapping {
	pub device_type: DeviceType,
	pub device_id: DeviceId,
	#[serde(default)]
	pub channel: Option<u16>,
	#[serde(default)]
	pub layer: Option<u16>,
}

impl Mapping {
	pub fn media_playout(device_id: impl Into<DeviceId>, channel: u16, layer: u16) -> Self {
		Self {
			device_type: DeviceType::MediaPlayout,
			device_id: device_id.into(),
			channel: Some(channel),
			layer: Some(layer),
		}
	}
}

/// The process-wide layerName → routing table. Authoritative; replacing it
/// invalidates the whole resolve state. Keyed by a BTreeMap so iteration is
/// always in lexicographic layer order.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Mappings(BTreeMap<String, Mapping>);

impl Mappings {
	pub fn new() -> Self {
		Self::default()
	}

	pub fn insert(&mut self, layer: impl Into<String>, mapping: Mapping) -> Option<Mapping> {
		self.0.insert(layer.into(), mapping)
	}

	pub fn remove(&mut self, layer: &str) -> Option<Mapping> {
		self.0.remove(layer)
	}

	pub fn get(&self, layer: &str) -> Option<&Mapping> {
		self.0.get(layer)
	}

	pub fn iter(&self) -> impl Iterator<Item = (&String, &Mapping)> {
		self.0.iter()
	}

	/// Layers routed to the given device, in lexicographic order
	pub fn layers_for_device<'a>(&'a self, device_id: &'a str) -> impl Iterator<Item = (&'a String, &'a Mapping)> {
		self.0.iter().filter(move |(_, m)| m.device_id == device_id)
	}

	pub fn len(&self) -> usize {
		self.0.len()
	}

	pub fn is_empty(&self) -> bool {
		self.0.is_empty()
	}
}

impl FromIterator<(String, Mapping)> for Mappings {
	fn from_iter<T: IntoIterator<Item = (String, Mapping)>>(iter: T) -> Self {
		Self(iter.into_iter().collect())
	}
}
