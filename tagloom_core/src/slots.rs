use std::collections::HashMap;

use indexmap::IndexMap;
use tracing::debug;

/// Separator used inside slot anchors. It cannot appear in well-formed XML
/// text, so an anchor never collides with rendered content.
pub const ANCHOR_MARK: char = '\u{1F}';

/// A named placeholder in the rendered output.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Slot {
	pub name: String,
	/// Marker written in front of the slot's default body.
	pub anchor: String,
	/// Byte length of the content following the anchor that plugs replace.
	pub length: usize,
}

/// Content queued for a slot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Plug {
	pub content: String,
	/// Append to the content of earlier plugs instead of replacing it.
	pub append: bool,
}

/// Collects slots and plugs during one render pass and splices plugs into
/// the finished output.
#[derive(Debug, Default)]
pub struct SlotRegistry {
	slots: IndexMap<String, Slot>,
	plugs: HashMap<String, Vec<Plug>>,
}

impl SlotRegistry {
	pub fn new() -> Self {
		Self::default()
	}

	pub fn anchor(name: &str) -> String {
		format!("{ANCHOR_MARK}slot{ANCHOR_MARK}{name}{ANCHOR_MARK}")
	}

	/// Reserve the slot `name` and return its anchor. A name that is already
	/// taken returns `None`: the first slot of a name wins and later ones
	/// only render their default body.
	pub fn record_slot(&mut self, name: &str) -> Option<String> {
		if self.slots.contains_key(name) {
			debug!(slot = name, "duplicate slot name, keeping the first");
			return None;
		}

		let anchor = Self::anchor(name);
		self.slots.insert(
			name.to_string(),
			Slot {
				name: name.to_string(),
				anchor: anchor.clone(),
				length: 0,
			},
		);
		Some(anchor)
	}

	/// Record the length of the default body rendered after the anchor.
	pub fn set_length(&mut self, name: &str, length: usize) {
		if let Some(slot) = self.slots.get_mut(name) {
			slot.length = length;
		}
	}

	pub fn queue_plug(&mut self, name: impl Into<String>, content: impl Into<String>, append: bool) {
		self.plugs.entry(name.into()).or_default().push(Plug {
			content: content.into(),
			append,
		});
	}

	pub fn slots(&self) -> impl Iterator<Item = &Slot> {
		self.slots.values()
	}

	pub fn plugs(&self, name: &str) -> &[Plug] {
		self.plugs.get(name).map_or(&[], Vec::as_slice)
	}

	/// Rewrite every slot anchor in `output`.
	///
	/// Offsets are searched for in the progressively rewritten buffer, so a
	/// splice never invalidates the position of a slot processed later. Plug
	/// content may carry anchors of its own, so passes repeat while any slot
	/// is still found. Each slot is reconciled at most once.
	pub fn reconcile(&mut self, mut output: String) -> String {
		let mut pending: Vec<String> = self.slots.keys().cloned().collect();

		loop {
			let before = pending.len();
			let mut remaining = Vec::with_capacity(pending.len());

			for name in pending {
				if !self.reconcile_slot(&name, &mut output) {
					remaining.push(name);
				}
			}

			pending = remaining;
			if pending.is_empty() || pending.len() == before {
				break;
			}
		}

		for name in pending {
			debug!(slot = %name, "slot anchor not present in output");
		}

		output
	}

	fn reconcile_slot(&mut self, name: &str, output: &mut String) -> bool {
		let Some(slot) = self.slots.get_mut(name) else {
			return true;
		};
		let Some(position) = output.find(&slot.anchor) else {
			return false;
		};

		let plugs = self.plugs.get(name).map_or(&[][..], Vec::as_slice);
		if plugs.is_empty() {
			output.replace_range(position..position + slot.anchor.len(), "");
			debug!(slot = name, "slot kept its default content");
			return true;
		}

		let mut content = String::new();
		for plug in plugs {
			if !plug.append {
				content.clear();
			}
			content.push_str(&plug.content);
		}

		let mut end = (position + slot.anchor.len() + slot.length).min(output.len());
		while !output.is_char_boundary(end) {
			end -= 1;
		}

		output.replace_range(position..end, &content);
		slot.length = content.len();
		true
	}
}
