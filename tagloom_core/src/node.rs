use indexmap::IndexMap;
use serde::Deserialize;
use serde::Serialize;

/// Index of a [`Node`] inside its [`Tree`] arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct NodeId(pub usize);

/// A child of a node: another element, or literal text that is emitted as
/// written. Folded subtrees are stored as text too, so a folded node never
/// re-evaluates anything.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Child {
	Node(NodeId),
	Text(String),
}

/// The reserved directive elements. Each kind declares the attributes it
/// cannot work without; they are checked while the tree is built.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DirectiveKind {
	/// Sets an attribute on the enclosing element.
	Attr,
	/// Emits the raw content of a file.
	Cdata,
	/// Registers a named dictionary for translations.
	Dictionary,
	/// Runs an external data feed and mounts its result.
	Feed,
	/// Renders another template in place.
	Include,
	/// Mounts a value into the universe layer.
	Mount,
	/// Declares a macro argument.
	Param,
	/// Looks up a translation.
	Trans,
	/// Emits the value of an expression.
	Val,
}

impl DirectiveKind {
	pub const ALL: [DirectiveKind; 9] = [
		DirectiveKind::Attr,
		DirectiveKind::Cdata,
		DirectiveKind::Dictionary,
		DirectiveKind::Feed,
		DirectiveKind::Include,
		DirectiveKind::Mount,
		DirectiveKind::Param,
		DirectiveKind::Trans,
		DirectiveKind::Val,
	];

	/// Match the local part of a namespaced tag (`include` for `tl:include`).
	pub fn from_name(name: &str) -> Option<Self> {
		Self::ALL.into_iter().find(|kind| kind.name() == name)
	}

	pub fn name(self) -> &'static str {
		match self {
			DirectiveKind::Attr => "attr",
			DirectiveKind::Cdata => "cdata",
			DirectiveKind::Dictionary => "dictionary",
			DirectiveKind::Feed => "feed",
			DirectiveKind::Include => "include",
			DirectiveKind::Mount => "mount",
			DirectiveKind::Param => "param",
			DirectiveKind::Trans => "trans",
			DirectiveKind::Val => "val",
		}
	}

	pub fn required_attributes(self) -> &'static [&'static str] {
		match self {
			DirectiveKind::Attr | DirectiveKind::Param => &["name"],
			DirectiveKind::Cdata | DirectiveKind::Include => &["file"],
			DirectiveKind::Dictionary => &["file", "name"],
			DirectiveKind::Feed => &["class"],
			DirectiveKind::Mount => &["target"],
			DirectiveKind::Val => &["value"],
			DirectiveKind::Trans => &[],
		}
	}
}

/// One element of a template.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Node {
	/// The qualified tag name as written, prefix included.
	pub tag: String,
	/// The namespace prefix in effect when the node was parsed, e.g. `tl:`.
	pub prefix: String,
	/// Raw, unevaluated attribute values in document order.
	pub attributes: IndexMap<String, String>,
	pub children: Vec<Child>,
	pub self_closing: bool,
	pub line: usize,
	pub parent: Option<NodeId>,
	/// Text seen between the previous element start and this one. Loops use
	/// its trailing whitespace to indent repeated items.
	pub preceding_text: String,
	pub directive: Option<DirectiveKind>,
}

impl Node {
	pub fn is_directive(&self) -> bool {
		self.directive.is_some()
	}

	/// The tag with a prefixed name does not emit its own envelope.
	pub fn is_namespaced_tag(&self) -> bool {
		self.tag.starts_with(&self.prefix)
	}

	/// Value of the directive attribute `{prefix}{name}`.
	pub fn directive_attribute(&self, name: &str) -> Option<&str> {
		self.attributes
			.iter()
			.find(|(key, _)| key.strip_prefix(&self.prefix) == Some(name))
			.map(|(_, value)| value.as_str())
	}

	pub fn has_directive_attributes(&self) -> bool {
		self.attributes.keys().any(|key| key.starts_with(&self.prefix))
	}

	/// Attributes that are written to the output, in document order.
	pub fn plain_attributes(&self) -> impl Iterator<Item = (&String, &String)> {
		self.attributes
			.iter()
			.filter(|(key, _)| !key.starts_with(&self.prefix))
	}

	pub fn attribute(&self, name: &str) -> Option<&str> {
		self.attributes.get(name).map(String::as_str)
	}
}

/// Arena holding every node of a template. Nodes refer to their parent and
/// children by [`NodeId`], so the tree owns all of them in one place.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Tree {
	pub nodes: Vec<Node>,
	pub root: Option<Child>,
}

impl Tree {
	pub fn node(&self, id: NodeId) -> &Node {
		&self.nodes[id.0]
	}

	pub fn get(&self, id: NodeId) -> Option<&Node> {
		self.nodes.get(id.0)
	}

	/// Number of nodes that survived folding.
	pub fn len(&self) -> usize {
		self.nodes.len()
	}

	/// `true` when no element survived folding. The root may still hold
	/// folded text.
	pub fn is_empty(&self) -> bool {
		self.nodes.is_empty()
	}

	/// Node children of `id` that are directive nodes of `kind`.
	pub fn directive_children(
		&self,
		id: NodeId,
		kind: DirectiveKind,
	) -> impl Iterator<Item = NodeId> + '_ {
		self.node(id).children.iter().filter_map(move |child| {
			match child {
				Child::Node(child) if self.node(*child).directive == Some(kind) => Some(*child),
				_ => None,
			}
		})
	}
}

/// A built template: the tree plus the document-level settings captured from
/// its first element.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Template {
	pub source_path: String,
	pub prefix: String,
	/// Translation source named on the root element, used by `trans` nodes
	/// that don't name their own.
	pub default_trans_source: Option<String>,
	pub tree: Tree,
}
