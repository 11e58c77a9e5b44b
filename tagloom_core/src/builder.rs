use indexmap::IndexMap;
use quick_xml::escape::escape;
use tracing::debug;
use tracing::trace;

use crate::TagloomError;
use crate::TagloomResult;
use crate::node::Child;
use crate::node::DirectiveKind;
use crate::node::Node;
use crate::node::NodeId;
use crate::node::Template;
use crate::node::Tree;

/// Substring that marks the namespace declaration of the engine.
pub const NAMESPACE_SIGNATURE: &str = "tagloom";
/// Prefix used when the first element declares no namespace.
pub const DEFAULT_PREFIX: &str = "tl:";

const NAMESPACE_DECLARATION: &str = "xmlns:";

/// Builds a [`Tree`] from a stream of `open`, `close` and `text` events.
///
/// The builder folds every inert subtree into a single text child as soon as
/// its element closes: no directive node, no directive attribute, no `{`
/// inside an attribute value and only text children. Rendering a folded tree
/// produces the same output as rendering the unfolded one.
pub struct TreeBuilder<'s> {
	source: &'s str,
	fold: bool,
	/// Captured on the first `open` and fixed for the rest of the document.
	prefix: Option<String>,
	default_trans_source: Option<String>,
	nodes: Vec<Node>,
	root: Option<Child>,
	stack: Vec<NodeId>,
	/// Text accumulated since the last `open`.
	pending_text: String,
}

impl<'s> TreeBuilder<'s> {
	pub fn new(source: &'s str) -> Self {
		Self {
			source,
			fold: true,
			prefix: None,
			default_trans_source: None,
			nodes: Vec::new(),
			root: None,
			stack: Vec::new(),
			pending_text: String::new(),
		}
	}

	#[must_use]
	pub fn with_fold(mut self, fold: bool) -> Self {
		self.fold = fold;
		self
	}

	pub fn prefix(&self) -> &str {
		self.prefix.as_deref().unwrap_or(DEFAULT_PREFIX)
	}

	pub fn open(
		&mut self,
		tag: &str,
		mut attributes: IndexMap<String, String>,
		line: usize,
	) -> TagloomResult<()> {
		if self.stack.is_empty() && self.root.is_some() {
			return Err(self.parse_error("document has more than one root element", line));
		}

		if self.prefix.is_none() {
			self.capture_namespace(&mut attributes);
		}

		let prefix = self.prefix().to_string();
		let directive = tag
			.strip_prefix(prefix.as_str())
			.and_then(DirectiveKind::from_name);

		if let Some(kind) = directive {
			for required in kind.required_attributes() {
				if !attributes.contains_key(*required) {
					return Err(TagloomError::RequiredAttribute {
						tag: tag.to_string(),
						line,
						attribute: (*required).to_string(),
						file: String::new(),
					});
				}
			}
		}

		let id = NodeId(self.nodes.len());
		let parent = self.stack.last().copied();
		self.nodes.push(Node {
			tag: tag.to_string(),
			prefix,
			attributes,
			children: Vec::new(),
			self_closing: true,
			line,
			parent,
			preceding_text: std::mem::take(&mut self.pending_text),
			directive,
		});

		match parent {
			Some(parent) => {
				let parent = &mut self.nodes[parent.0];
				parent.children.push(Child::Node(id));
				parent.self_closing = false;
			}
			None => self.root = Some(Child::Node(id)),
		}

		self.stack.push(id);
		Ok(())
	}

	/// Close the innermost open element. `offset` is the byte position just
	/// past the closing markup in the source text.
	pub fn close(&mut self, offset: usize, line: usize) -> TagloomResult<()> {
		let Some(id) = self.stack.pop() else {
			return Err(self.parse_error("closing tag without a matching opening tag", line));
		};

		let marker = self
			.source
			.get(..offset)
			.is_some_and(|before| before.trim_end().ends_with("/>"));
		let node = &mut self.nodes[id.0];
		node.self_closing = node.self_closing && node.children.is_empty() && marker;

		if self.fold && is_foldable(node) {
			self.fold_node(id);
		}

		Ok(())
	}

	pub fn text(&mut self, chars: &str, line: usize) -> TagloomResult<()> {
		let Some(&top) = self.stack.last() else {
			if chars.trim().is_empty() {
				return Ok(());
			}
			return Err(self.parse_error("text outside of the root element", line));
		};

		let node = &mut self.nodes[top.0];
		node.self_closing = false;
		push_text(&mut node.children, chars);
		self.pending_text.push_str(chars);
		Ok(())
	}

	/// Signal the end of input and hand over the finished template.
	pub fn finish(self, source_path: impl Into<String>, line: usize) -> TagloomResult<Template> {
		if !self.stack.is_empty() {
			return Err(self.parse_error("unexpected end of document", line));
		}

		if self.root.is_none() {
			return Err(self.parse_error("document has no root element", line));
		}

		Ok(Template {
			source_path: source_path.into(),
			prefix: self.prefix().to_string(),
			default_trans_source: self.default_trans_source,
			tree: Tree {
				nodes: self.nodes,
				root: self.root,
			},
		})
	}

	/// Build a parse error, annotated with the innermost open element.
	pub fn parse_error(&self, message: &str, line: usize) -> TagloomError {
		let message = match self.stack.last() {
			Some(id) => {
				let node = &self.nodes[id.0];
				format!("{message}. Last element: {}({})", node.tag, node.line)
			}
			None => message.to_string(),
		};

		TagloomError::XmlParse {
			message,
			line,
			file: String::new(),
		}
	}

	fn capture_namespace(&mut self, attributes: &mut IndexMap<String, String>) {
		let declaration = attributes.iter().find_map(|(name, value)| {
			let prefix = name.strip_prefix(NAMESPACE_DECLARATION)?;
			(value.contains(NAMESPACE_SIGNATURE) && !prefix.is_empty())
				.then(|| (name.clone(), format!("{prefix}:")))
		});

		let prefix = match declaration {
			Some((name, prefix)) => {
				attributes.shift_remove(&name);
				debug!(prefix = %prefix, "namespace prefix declared");
				prefix
			}
			None => DEFAULT_PREFIX.to_string(),
		};

		self.default_trans_source = attributes.shift_remove(&format!("{prefix}trans"));
		self.prefix = Some(prefix);
	}

	/// Replace the subtree rooted at `id` with its literal text. All nodes
	/// created after `id` belong to its subtree, so the arena is truncated.
	fn fold_node(&mut self, id: NodeId) {
		let node = &self.nodes[id.0];
		let text = folded_text(node);
		trace!(tag = %node.tag, line = node.line, "folded inert element");
		let parent = node.parent;
		self.nodes.truncate(id.0);

		match parent {
			Some(parent) => {
				let children = &mut self.nodes[parent.0].children;
				children.pop();
				push_text(children, &text);
			}
			None => self.root = Some(Child::Text(text)),
		}
	}
}

fn is_foldable(node: &Node) -> bool {
	!node.is_directive()
		&& !node.has_directive_attributes()
		&& !node.attributes.values().any(|value| value.contains('{'))
		&& node
			.children
			.iter()
			.all(|child| matches!(child, Child::Text(_)))
}

fn folded_text(node: &Node) -> String {
	let body: String = node
		.children
		.iter()
		.filter_map(|child| {
			match child {
				Child::Text(text) => Some(text.as_str()),
				Child::Node(_) => None,
			}
		})
		.collect();

	if node.is_namespaced_tag() {
		return body;
	}

	let attributes = start_tag_attributes(node.plain_attributes());
	if node.self_closing && body.is_empty() {
		format!("<{}{attributes}/>", node.tag)
	} else {
		format!("<{}{attributes}>{body}</{}>", node.tag, node.tag)
	}
}

/// Serialize attributes for a start tag, each preceded by a space.
pub(crate) fn start_tag_attributes<'a>(
	attributes: impl Iterator<Item = (&'a String, &'a String)>,
) -> String {
	attributes
		.map(|(name, value)| format!(" {name}=\"{}\"", escape(value.as_str())))
		.collect()
}

/// Append text, merging with a trailing text child.
fn push_text(children: &mut Vec<Child>, text: &str) {
	if let Some(Child::Text(last)) = children.last_mut() {
		last.push_str(text);
	} else {
		children.push(Child::Text(text.to_string()));
	}
}
