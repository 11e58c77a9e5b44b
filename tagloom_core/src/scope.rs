use derive_more::Deref;
use indexmap::IndexMap;

use crate::value::Value;
use crate::value::resolve_object_member;

/// Position of the innermost loop iteration, exposed to functions such as
/// `position()` and `key()`.
#[derive(Debug, Clone, PartialEq)]
pub struct Iteration {
	/// 1-based index of the current item.
	pub position: usize,
	pub count: usize,
	/// Map key of the current item, or its 0-based index for lists.
	pub key: Value,
}

impl Iteration {
	pub fn is_first(&self) -> bool {
		self.position == 1
	}

	pub fn is_last(&self) -> bool {
		self.position == self.count
	}
}

/// The layered variable universe consulted while rendering.
///
/// Layer 0 is the universe: it is always a [`Value::Map`] and is never popped.
/// Macro calls and loop iterations push a layer on entry and pop it on exit,
/// so inner layers shadow outer ones for the duration of the call.
#[derive(Debug, Clone, Deref)]
pub struct ScopeStack {
	#[deref]
	layers: Vec<Value>,
}

impl Default for ScopeStack {
	fn default() -> Self {
		Self::new()
	}
}

impl ScopeStack {
	pub fn new() -> Self {
		Self::with_universe(IndexMap::new())
	}

	pub fn with_universe(universe: IndexMap<String, Value>) -> Self {
		Self {
			layers: vec![Value::Map(universe)],
		}
	}

	pub fn push(&mut self, layer: Value) {
		self.layers.push(layer);
	}

	/// Remove the most recent layer. The universe layer is never removed.
	pub fn pop(&mut self) -> Option<Value> {
		if self.layers.len() > 1 {
			self.layers.pop()
		} else {
			None
		}
	}

	pub fn depth(&self) -> usize {
		self.layers.len()
	}

	pub fn universe(&self) -> &Value {
		&self.layers[0]
	}

	/// Mount `value` under `name` in the universe layer.
	pub fn mount(&mut self, name: impl Into<String>, value: impl Into<Value>) {
		if let Value::Map(entries) = &mut self.layers[0] {
			entries.insert(name.into(), value.into());
		}
	}

	/// The top layer, resolved by `.`.
	pub fn top(&self) -> &Value {
		self.layers.last().unwrap_or(&self.layers[0])
	}

	/// The layer directly below the top, resolved by `..`. With a single
	/// layer there is nothing below, which resolves to null.
	pub fn parent(&self) -> Option<&Value> {
		let len = self.layers.len();
		if len >= 2 {
			self.layers.get(len - 2)
		} else {
			None
		}
	}

	/// Resolve `name` by scanning layers from the top down. `/`, `.` and `..`
	/// address the universe, the top layer and the layer below it wholesale.
	/// Absence is not an error: callers treat it as an empty value.
	pub fn lookup(&self, name: &str) -> Option<Value> {
		match name {
			"/" => return Some(self.universe().clone()),
			"." => return Some(self.top().clone()),
			".." => return self.parent().cloned(),
			_ => {}
		}

		self.layers.iter().rev().find_map(|layer| {
			match layer {
				Value::Map(entries) => entries.get(name).cloned(),
				Value::Object(object) => resolve_object_member(object.as_ref(), name),
				_ => None,
			}
		})
	}

	/// Merge all layers top-down into a single map. Keys of upper layers win
	/// over the same key in lower layers. Non-map layers are skipped.
	pub fn merged(&self) -> IndexMap<String, Value> {
		let mut merged = IndexMap::new();
		for layer in &self.layers {
			if let Value::Map(entries) = layer {
				for (key, value) in entries {
					merged.insert(key.clone(), value.clone());
				}
			}
		}
		merged
	}
}
