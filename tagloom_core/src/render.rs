use std::collections::HashMap;
use std::rc::Rc;

use indexmap::IndexMap;
use quick_xml::escape::escape;

use crate::TagloomError;
use crate::TagloomResult;
use crate::compile_cache::CompileCache;
use crate::config::EngineConfig;
use crate::directives::FeedFactory;
use crate::directives::Translator;
use crate::functions::FunctionRegistry;
use crate::lexer::Evaluator;
use crate::node::Child;
use crate::node::DirectiveKind;
use crate::node::NodeId;
use crate::node::Template;
use crate::scope::Iteration;
use crate::scope::ScopeStack;
use crate::slots::SlotRegistry;
use crate::value::Value;

/// Collaborators a render pass reads from. Owned by the
/// [`View`](crate::View).
#[derive(Clone, Copy)]
pub(crate) struct RenderEnvironment<'v> {
	pub config: &'v EngineConfig,
	pub functions: &'v FunctionRegistry,
	pub feeds: &'v [Rc<dyn FeedFactory>],
	pub translator: Option<&'v dyn Translator>,
	pub cache: Option<&'v CompileCache>,
}

/// How a node is entered.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum RenderMode {
	Normal,
	/// The node is the body of a macro being called, so its `macro`
	/// attribute must not register it again.
	MacroCall,
}

#[derive(Clone)]
pub(crate) struct MacroDefinition {
	pub template: Rc<Template>,
	pub node: NodeId,
}

/// Attributes produced at render time, `None` for a bare attribute.
pub(crate) type AttributeFrame = IndexMap<String, Option<String>>;

/// State of one render pass. It is shared by every template the pass
/// renders, so plugs from included templates reach the host's slots.
pub(crate) struct RenderContext<'v> {
	pub env: RenderEnvironment<'v>,
	pub scope: ScopeStack,
	pub slots: SlotRegistry,
	pub macros: HashMap<String, MacroDefinition>,
	/// Dictionary name → file registered by `dictionary` directives.
	pub dictionaries: HashMap<String, String>,
	pub iterations: Vec<Iteration>,
	pub attribute_frames: Vec<AttributeFrame>,
	pub include_depth: usize,
	doctype: Option<String>,
}

impl<'v> RenderContext<'v> {
	pub fn new(env: RenderEnvironment<'v>, scope: ScopeStack) -> Self {
		Self {
			env,
			scope,
			slots: SlotRegistry::new(),
			macros: HashMap::new(),
			dictionaries: HashMap::new(),
			iterations: Vec::new(),
			attribute_frames: Vec::new(),
			include_depth: 0,
			doctype: None,
		}
	}

	/// Render a whole document: the tree, the doctype line and the slot
	/// reconciliation.
	pub fn render_document(mut self, template: &Rc<Template>) -> TagloomResult<String> {
		let output = self.render_template(template)?;
		let output = self.slots.reconcile(output);

		Ok(match self.doctype {
			Some(doctype) => format!("<!doctype {doctype}>\n{output}"),
			None => output,
		})
	}

	/// Render the root of `template` without reconciling slots.
	pub fn render_template(&mut self, template: &Rc<Template>) -> TagloomResult<String> {
		match &template.tree.root {
			Some(Child::Node(id)) => self.render_node(template, *id, RenderMode::Normal),
			Some(Child::Text(text)) => Ok(text.clone()),
			None => Ok(String::new()),
		}
	}

	pub fn evaluate(&self, expression: &str) -> TagloomResult<Value> {
		Evaluator::new(&self.scope, self.env.functions)
			.with_iteration(self.iterations.last())
			.evaluate(expression)
	}

	pub fn evaluate_truthy(&self, expression: Option<&str>) -> TagloomResult<bool> {
		match expression {
			Some(expression) => Ok(self.evaluate(expression)?.is_truthy()),
			None => Ok(false),
		}
	}

	/// Replace each `{expression}` in `raw` with its value.
	pub fn interpolate(&self, raw: &str) -> TagloomResult<String> {
		let mut output = String::with_capacity(raw.len());
		let mut rest = raw;

		while let Some(start) = rest.find('{') {
			output.push_str(&rest[..start]);
			let after = &rest[start + 1..];
			let Some(end) = after.find('}') else {
				return Err(TagloomError::Evaluation {
					expression: raw.to_string(),
					message: "unclosed `{`".to_string(),
				});
			};
			output.push_str(&self.evaluate(&after[..end])?.to_output_string());
			rest = &after[end + 1..];
		}

		output.push_str(rest);
		Ok(output)
	}

	pub fn render_children(&mut self, template: &Rc<Template>, id: NodeId) -> TagloomResult<String> {
		let mut output = String::new();
		for child in &template.tree.node(id).children {
			match child {
				Child::Text(text) => output.push_str(text),
				Child::Node(child) => {
					output.push_str(&self.render_node(template, *child, RenderMode::Normal)?);
				}
			}
		}
		Ok(output)
	}

	/// Render one node. Errors are annotated with the innermost node that
	/// raised them; outer nodes pass an annotated error through unchanged.
	pub fn render_node(
		&mut self,
		template: &Rc<Template>,
		id: NodeId,
		mode: RenderMode,
	) -> TagloomResult<String> {
		self.render_node_inner(template, id, mode).map_err(|error| {
			match error {
				TagloomError::Rendering { .. } => error,
				other => {
					let node = template.tree.node(id);
					TagloomError::Rendering {
						tag: node.tag.clone(),
						file: template.source_path.clone(),
						line: node.line,
						source: Box::new(other),
					}
				}
			}
		})
	}

	fn render_node_inner(
		&mut self,
		template: &Rc<Template>,
		id: NodeId,
		mode: RenderMode,
	) -> TagloomResult<String> {
		let node = template.tree.node(id);
		if let Some(kind) = node.directive {
			return self.render_directive(template, id, kind);
		}

		if mode == RenderMode::Normal {
			if let Some(name) = node.directive_attribute("macro") {
				self.macros.insert(
					name.to_string(),
					MacroDefinition {
						template: Rc::clone(template),
						node: id,
					},
				);
				return Ok(String::new());
			}
		}

		if let Some(expression) = node.directive_attribute("walk") {
			return self.render_walk(template, id, expression);
		}

		self.render_guarded(template, id)
	}

	fn render_walk(
		&mut self,
		template: &Rc<Template>,
		id: NodeId,
		expression: &str,
	) -> TagloomResult<String> {
		let (count, items) = walk_items(self.evaluate(expression)?, expression)?;
		let indent = trailing_indent(&template.tree.node(id).preceding_text);
		let mut output = String::new();
		let mut rendered_any = false;

		for (index, (key, item)) in items.enumerate() {
			self.scope.push(item);
			self.iterations.push(Iteration {
				position: index + 1,
				count,
				key,
			});
			let rendered = self.render_guarded(template, id);
			self.iterations.pop();
			self.scope.pop();

			let rendered = rendered?;
			if rendered.is_empty() {
				continue;
			}
			if rendered_any {
				output.push_str(indent);
			}
			output.push_str(&rendered);
			rendered_any = true;
		}

		Ok(output)
	}

	/// Everything after `walk`: `cond`, `call`, `plug`, `slot` and finally the
	/// element itself.
	fn render_guarded(&mut self, template: &Rc<Template>, id: NodeId) -> TagloomResult<String> {
		let node = template.tree.node(id);

		if let Some(condition) = node.directive_attribute("cond") {
			if !self.evaluate(condition)?.is_truthy() {
				return Ok(String::new());
			}
		}

		if let Some(name) = node.directive_attribute("call") {
			return self.render_call(template, id, name);
		}

		if let Some(name) = node.directive_attribute("plug") {
			let content = self.render_element(template, id)?;
			let append = self.evaluate_truthy(node.directive_attribute("append"))?;
			self.slots.queue_plug(name, content, append);
			return Ok(String::new());
		}

		if let Some(name) = node.directive_attribute("slot") {
			let Some(anchor) = self.slots.record_slot(name) else {
				return self.render_element(template, id);
			};
			let content = self.render_element(template, id)?;
			self.slots.set_length(name, content.len());
			return Ok(format!("{anchor}{content}"));
		}

		self.render_element(template, id)
	}

	fn render_call(
		&mut self,
		template: &Rc<Template>,
		id: NodeId,
		name: &str,
	) -> TagloomResult<String> {
		let Some(definition) = self.macros.get(name).cloned() else {
			return Err(TagloomError::MacroNotFound {
				name: name.to_string(),
			});
		};

		let node = template.tree.node(id);
		let mut layer = IndexMap::new();
		for (attribute, expression) in node.plain_attributes() {
			layer.insert(attribute.clone(), self.evaluate(expression)?);
		}

		let params: Vec<NodeId> = template
			.tree
			.directive_children(id, DirectiveKind::Param)
			.collect();
		for param in params {
			let param_node = template.tree.node(param);
			let name = param_node.attribute("name").unwrap_or_default().to_string();
			let value = match param_node.attribute("value") {
				Some(expression) => self.evaluate(expression)?,
				None => Value::String(self.render_children(template, param)?),
			};
			layer.insert(name, value);
		}

		self.scope.push(Value::Map(layer));
		let rendered = self.render_node(&definition.template, definition.node, RenderMode::MacroCall);
		self.scope.pop();
		rendered
	}

	/// Render the element's envelope and body.
	fn render_element(&mut self, template: &Rc<Template>, id: NodeId) -> TagloomResult<String> {
		let node = template.tree.node(id);

		self.attribute_frames.push(AttributeFrame::new());
		let body = self.render_body(template, id);
		let runtime_attributes = self.attribute_frames.pop().unwrap_or_default();
		let body = body?;

		if node.is_namespaced_tag() || self.evaluate_truthy(node.directive_attribute("mute"))? {
			return Ok(body);
		}

		if node.parent.is_none() && self.include_depth == 0 {
			if let Some(doctype) = node.directive_attribute("doctype") {
				self.doctype = Some(doctype.to_string());
			}
		}

		let mut attributes = AttributeFrame::new();
		for (name, raw) in node.plain_attributes() {
			attributes.insert(name.clone(), Some(self.interpolate(raw)?));
		}
		attributes.extend(runtime_attributes);

		let mut start_tag = format!("<{}", node.tag);
		for (name, value) in &attributes {
			match value {
				Some(value) => start_tag.push_str(&format!(" {name}=\"{}\"", escape(value.as_str()))),
				None => start_tag.push_str(&format!(" {name}")),
			}
		}

		if self.evaluate_truthy(node.directive_attribute("void"))? {
			return Ok(format!("{start_tag}>"));
		}

		if node.self_closing && body.is_empty() {
			return Ok(format!("{start_tag}/>"));
		}

		Ok(format!("{start_tag}>{body}</{}>", node.tag))
	}

	/// The element's content: the `text` expression, or the rendered
	/// children. `attr` children apply in both cases.
	fn render_body(&mut self, template: &Rc<Template>, id: NodeId) -> TagloomResult<String> {
		let Some(expression) = template.tree.node(id).directive_attribute("text") else {
			return self.render_children(template, id);
		};

		let attributes: Vec<NodeId> = template
			.tree
			.directive_children(id, DirectiveKind::Attr)
			.collect();
		for attribute in attributes {
			self.render_node(template, attribute, RenderMode::Normal)?;
		}

		Ok(self.evaluate(expression)?.to_output_string())
	}
}

/// Largest count a numeric `walk` accepts.
const MAX_WALK_COUNT: usize = 1_000_000;

type WalkItems = Box<dyn Iterator<Item = (Value, Value)>>;

/// The number of iterations of a `walk` and its `(key, item)` pairs. Numeric
/// counts are produced lazily.
fn walk_items(value: Value, expression: &str) -> TagloomResult<(usize, WalkItems)> {
	match value {
		Value::List(items) => {
			Ok((
				items.len(),
				Box::new(
					items
						.into_iter()
						.enumerate()
						.map(|(index, item)| (Value::from(index), item)),
				),
			))
		}
		Value::Map(entries) => {
			Ok((
				entries.len(),
				Box::new(
					entries
						.into_iter()
						.map(|(key, item)| (Value::String(key), item)),
				),
			))
		}
		Value::Number(number) if !number.is_finite() => {
			Err(TagloomError::Evaluation {
				expression: expression.to_string(),
				message: "walk count is not a finite number".to_string(),
			})
		}
		Value::Number(number) if number >= 1.0 => {
			if number > MAX_WALK_COUNT as f64 {
				return Err(TagloomError::Evaluation {
					expression: expression.to_string(),
					message: format!("walk count {number} exceeds the limit of {MAX_WALK_COUNT}"),
				});
			}

			#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
			let count = number.trunc() as usize;
			Ok((
				count,
				Box::new((1..=count).map(|position| (Value::from(position - 1), Value::from(position)))),
			))
		}
		other if other.is_truthy() => Ok((1, Box::new(std::iter::once((Value::from(0), other))))),
		_ => Ok((0, Box::new(std::iter::empty()))),
	}
}

/// The whitespace that precedes an element on its own line, newline
/// included. Empty when the element does not start a line.
fn trailing_indent(preceding_text: &str) -> &str {
	match preceding_text.rfind('\n') {
		Some(position) => {
			let tail = &preceding_text[position..];
			if tail.chars().all(char::is_whitespace) {
				tail
			} else {
				""
			}
		}
		None => "",
	}
}
