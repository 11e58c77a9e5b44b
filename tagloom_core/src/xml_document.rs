use std::any::Any;
use std::rc::Rc;

use indexmap::IndexMap;
use quick_xml::Reader;
use quick_xml::escape::resolve_xml_entity;
use quick_xml::events::BytesStart;
use quick_xml::events::Event;

use crate::TagloomError;
use crate::TagloomResult;
use crate::value::DataObject;
use crate::value::Value;

/// Root element wrapped around an XML island that has none of its own.
pub const IMPLICIT_ROOT: &str = "xml";

/// An element of an [`XmlDocument`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct XmlElement {
	pub name: String,
	pub attributes: IndexMap<String, String>,
	pub children: Vec<XmlContent>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum XmlContent {
	Element(XmlElement),
	Text(String),
}

impl XmlElement {
	fn new(name: String, attributes: IndexMap<String, String>) -> Self {
		Self {
			name,
			attributes,
			children: Vec::new(),
		}
	}

	fn elements(&self) -> impl Iterator<Item = &XmlElement> {
		self.children.iter().filter_map(|child| {
			match child {
				XmlContent::Element(element) => Some(element),
				XmlContent::Text(_) => None,
			}
		})
	}

	/// The concatenated text of every descendant.
	pub fn text_content(&self) -> String {
		let mut text = String::new();
		self.collect_text(&mut text);
		text
	}

	fn collect_text(&self, text: &mut String) {
		for child in &self.children {
			match child {
				XmlContent::Element(element) => element.collect_text(text),
				XmlContent::Text(content) => text.push_str(content),
			}
		}
	}

	fn push_text(&mut self, content: &str) {
		if let Some(XmlContent::Text(text)) = self.children.last_mut() {
			text.push_str(content);
		} else {
			self.children.push(XmlContent::Text(content.to_string()));
		}
	}
}

/// An XML island parsed at render time by the `xml()` function and queried
/// with `xpath()`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct XmlDocument {
	root: XmlElement,
}

impl XmlDocument {
	/// Parse `source`, which must hold exactly one root element.
	pub fn parse(source: &str) -> TagloomResult<Self> {
		let mut reader = Reader::from_str(source);
		let mut stack: Vec<XmlElement> = Vec::new();
		let mut root: Option<XmlElement> = None;

		loop {
			let event = reader.read_event().map_err(|error| {
				island_error(source, offset(reader.error_position()), &error.to_string())
			})?;
			let position = offset(reader.buffer_position());

			match event {
				Event::Start(element) => {
					let element = read_element(&element, source, position)?;
					stack.push(element);
				}
				Event::Empty(element) => {
					let element = read_element(&element, source, position)?;
					attach(&mut stack, &mut root, element, source, position)?;
				}
				Event::End(_) => {
					let Some(element) = stack.pop() else {
						return Err(island_error(source, position, "unexpected closing tag"));
					};
					attach(&mut stack, &mut root, element, source, position)?;
				}
				Event::Text(text) => {
					let text = text
						.decode()
						.map_err(|error| island_error(source, position, &error.to_string()))?;
					push_text(&mut stack, &text, source, position)?;
				}
				Event::CData(data) => {
					let text = std::str::from_utf8(&data)
						.map_err(|error| island_error(source, position, &error.to_string()))?;
					push_text(&mut stack, text, source, position)?;
				}
				Event::GeneralRef(reference) => {
					let name = reference
						.decode()
						.map_err(|error| island_error(source, position, &error.to_string()))?;
					let text = resolve_reference(&name)
						.ok_or_else(|| island_error(source, position, &format!("unknown entity `&{name};`")))?;
					push_text(&mut stack, &text, source, position)?;
				}
				Event::Comment(_) | Event::PI(_) | Event::Decl(_) | Event::DocType(_) => {}
				Event::Eof => break,
			}
		}

		if let Some(open) = stack.last() {
			return Err(island_error(
				source,
				source.len(),
				&format!("unclosed element <{}>", open.name),
			));
		}

		root.map(|root| Self { root })
			.ok_or_else(|| island_error(source, source.len(), "no root element"))
	}

	/// Parse an XML island the way `xml()` does. With an explicit `root` the
	/// source is always wrapped in that element. Otherwise the source is
	/// parsed as is, and wrapped in [`IMPLICIT_ROOT`] when that fails.
	pub fn parse_island(source: &str, root: Option<&str>) -> TagloomResult<Self> {
		match root {
			Some(root) => Self::parse(&wrap(source, root)),
			None => Self::parse(source).or_else(|_| Self::parse(&wrap(source, IMPLICIT_ROOT))),
		}
	}

	pub fn root(&self) -> &XmlElement {
		&self.root
	}

	/// Evaluate an XPath location path. Supported: `/` and `//` separated
	/// steps of element names, `*`, `text()` and `@name`, each with an
	/// optional `[n]`, `[@name]` or `[@name='value']` predicate.
	pub fn select(&self, query: &str) -> Result<Vec<XmlMatch<'_>>, String> {
		let steps = parse_query(query)?;
		if steps.is_empty() {
			return Ok(vec![XmlMatch::Element(&self.root)]);
		}

		let mut contexts = vec![Context::Document];
		let mut matches = Vec::new();

		for step in &steps {
			let mut next = Vec::new();

			for context in &contexts {
				let scopes = if step.descendant {
					self.self_and_descendants(*context)
				} else {
					vec![*context]
				};

				for scope in scopes {
					match &step.test {
						NodeTest::Element(name) => {
							let children = self.children(scope);
							let selected = children
								.into_iter()
								.filter(|element| name == "*" || element.name == *name);
							for element in step.predicate.apply(selected) {
								if !next.iter().any(|existing: &Context<'_>| existing.is(element)) {
									next.push(Context::Element(element));
								}
							}
						}
						NodeTest::Text => {
							if let Context::Element(element) = scope {
								for child in &element.children {
									if let XmlContent::Text(text) = child {
										matches.push(XmlMatch::Text(text.as_str()));
									}
								}
							}
						}
						NodeTest::Attribute(name) => {
							if let Context::Element(element) = scope {
								for (key, value) in &element.attributes {
									if name == "*" || key == name {
										matches.push(XmlMatch::Attribute(value.as_str()));
									}
								}
							}
						}
					}
				}
			}

			contexts = next;
		}

		matches.extend(contexts.into_iter().filter_map(|context| {
			match context {
				Context::Element(element) => Some(XmlMatch::Element(element)),
				Context::Document => None,
			}
		}));

		Ok(matches)
	}

	fn children<'d>(&'d self, context: Context<'d>) -> Vec<&'d XmlElement> {
		match context {
			Context::Document => vec![&self.root],
			Context::Element(element) => element.elements().collect(),
		}
	}

	fn self_and_descendants<'d>(&'d self, context: Context<'d>) -> Vec<Context<'d>> {
		let mut found = vec![context];
		let mut index = 0;
		while index < found.len() {
			let children = self.children(found[index]);
			found.extend(children.into_iter().map(Context::Element));
			index += 1;
		}
		found
	}
}

impl DataObject for XmlDocument {
	fn field(&self, name: &str) -> Option<Value> {
		match name {
			"root" => Some(Value::String(self.root.name.clone())),
			"text" => Some(Value::String(self.root.text_content())),
			_ => None,
		}
	}

	fn as_any(&self) -> Option<&dyn Any> {
		Some(self)
	}
}

impl From<XmlDocument> for Value {
	fn from(document: XmlDocument) -> Self {
		Value::Object(Rc::new(document))
	}
}

/// A node selected by [`XmlDocument::select`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum XmlMatch<'d> {
	Element(&'d XmlElement),
	Text(&'d str),
	Attribute(&'d str),
}

impl XmlMatch<'_> {
	/// The string value of the node.
	pub fn text(&self) -> String {
		match self {
			XmlMatch::Element(element) => element.text_content(),
			XmlMatch::Text(text) | XmlMatch::Attribute(text) => (*text).to_string(),
		}
	}
}

#[derive(Debug, Clone, Copy)]
enum Context<'d> {
	Document,
	Element(&'d XmlElement),
}

impl Context<'_> {
	fn is(&self, element: &XmlElement) -> bool {
		matches!(self, Context::Element(existing) if std::ptr::eq(*existing, element))
	}
}

#[derive(Debug, PartialEq, Eq)]
enum NodeTest {
	Element(String),
	Text,
	Attribute(String),
}

#[derive(Debug, PartialEq, Eq)]
enum Predicate {
	None,
	Position(usize),
	HasAttribute(String),
	AttributeEquals(String, String),
}

impl Predicate {
	fn apply<'d>(&self, elements: impl Iterator<Item = &'d XmlElement>) -> Vec<&'d XmlElement> {
		match self {
			Predicate::None => elements.collect(),
			Predicate::Position(position) => elements.skip(position - 1).take(1).collect(),
			Predicate::HasAttribute(name) => {
				elements
					.filter(|element| element.attributes.contains_key(name))
					.collect()
			}
			Predicate::AttributeEquals(name, value) => {
				elements
					.filter(|element| element.attributes.get(name) == Some(value))
					.collect()
			}
		}
	}
}

#[derive(Debug)]
struct Step {
	descendant: bool,
	test: NodeTest,
	predicate: Predicate,
}

fn parse_query(query: &str) -> Result<Vec<Step>, String> {
	let query = query.trim();
	if query.is_empty() {
		return Err("empty xpath query".to_string());
	}

	let mut steps = Vec::new();
	let mut rest = query;

	while !rest.is_empty() {
		let descendant = if let Some(after) = rest.strip_prefix("//") {
			rest = after;
			true
		} else if let Some(after) = rest.strip_prefix('/') {
			rest = after;
			false
		} else if steps.is_empty() {
			false
		} else {
			return Err(format!("unexpected `{rest}` in `{query}`"));
		};

		if rest.is_empty() {
			if descendant || !steps.is_empty() {
				return Err(format!("`{query}` ends with a separator"));
			}
			break;
		}

		let end = step_end(rest);
		steps.push(parse_step(&rest[..end], descendant, query)?);
		rest = &rest[end..];
	}

	let leaf = steps.len().saturating_sub(1);
	if steps
		.iter()
		.take(leaf)
		.any(|step| !matches!(step.test, NodeTest::Element(_)))
	{
		return Err(format!("`{query}` selects below a text or attribute node"));
	}

	Ok(steps)
}

/// Byte length of the step at the start of `rest`. A `/` inside a predicate
/// does not end the step.
fn step_end(rest: &str) -> usize {
	let mut depth = 0usize;
	let mut quote: Option<char> = None;

	for (index, character) in rest.char_indices() {
		match (quote, character) {
			(Some(open), _) if character == open => quote = None,
			(Some(_), _) => {}
			(None, '\'' | '"') => quote = Some(character),
			(None, '[') => depth += 1,
			(None, ']') => depth = depth.saturating_sub(1),
			(None, '/') if depth == 0 => return index,
			_ => {}
		}
	}

	rest.len()
}

fn parse_step(raw: &str, descendant: bool, query: &str) -> Result<Step, String> {
	let (test, predicate) = match raw.find('[') {
		Some(open) => {
			let Some(inner) = raw[open + 1..].strip_suffix(']') else {
				return Err(format!("unclosed predicate in `{query}`"));
			};
			(&raw[..open], parse_predicate(inner.trim(), query)?)
		}
		None => (raw, Predicate::None),
	};

	let test = test.trim();
	let test = if test.is_empty() {
		return Err(format!("empty step in `{query}`"));
	} else if test == "text()" {
		NodeTest::Text
	} else if let Some(name) = test.strip_prefix('@') {
		NodeTest::Attribute(name.to_string())
	} else {
		NodeTest::Element(test.to_string())
	};

	if predicate != Predicate::None && !matches!(test, NodeTest::Element(_)) {
		return Err(format!("predicates apply to elements only, in `{query}`"));
	}

	Ok(Step {
		descendant,
		test,
		predicate,
	})
}

fn parse_predicate(inner: &str, query: &str) -> Result<Predicate, String> {
	if let Ok(position) = inner.parse::<usize>() {
		if position == 0 {
			return Err(format!("positions start at 1, in `{query}`"));
		}
		return Ok(Predicate::Position(position));
	}

	let Some(attribute) = inner.strip_prefix('@') else {
		return Err(format!("unsupported predicate `[{inner}]` in `{query}`"));
	};

	match attribute.split_once('=') {
		Some((name, value)) => {
			let value = value.trim();
			let unquoted = value
				.strip_prefix('\'')
				.and_then(|value| value.strip_suffix('\''))
				.or_else(|| value.strip_prefix('"').and_then(|value| value.strip_suffix('"')))
				.ok_or_else(|| format!("unquoted value in predicate `[{inner}]`"))?;
			Ok(Predicate::AttributeEquals(
				name.trim().to_string(),
				unquoted.to_string(),
			))
		}
		None => Ok(Predicate::HasAttribute(attribute.trim().to_string())),
	}
}

fn wrap(source: &str, root: &str) -> String {
	format!("<{root}>{source}</{root}>")
}

fn read_element(element: &BytesStart<'_>, source: &str, position: usize) -> TagloomResult<XmlElement> {
	let name = std::str::from_utf8(element.name().as_ref())
		.map_err(|error| island_error(source, position, &error.to_string()))?
		.to_string();
	let mut attributes = IndexMap::new();

	for attribute in element.attributes() {
		let attribute =
			attribute.map_err(|error| island_error(source, position, &error.to_string()))?;
		let key = std::str::from_utf8(attribute.key.as_ref())
			.map_err(|error| island_error(source, position, &error.to_string()))?
			.to_string();
		let value = attribute
			.unescape_value()
			.map_err(|error| island_error(source, position, &error.to_string()))?;
		attributes.insert(key, value.into_owned());
	}

	Ok(XmlElement::new(name, attributes))
}

fn attach(
	stack: &mut [XmlElement],
	root: &mut Option<XmlElement>,
	element: XmlElement,
	source: &str,
	position: usize,
) -> TagloomResult<()> {
	if let Some(parent) = stack.last_mut() {
		parent.children.push(XmlContent::Element(element));
		return Ok(());
	}

	if root.is_some() {
		return Err(island_error(source, position, "more than one root element"));
	}

	*root = Some(element);
	Ok(())
}

fn push_text(stack: &mut [XmlElement], text: &str, source: &str, position: usize) -> TagloomResult<()> {
	match stack.last_mut() {
		Some(parent) => {
			parent.push_text(text);
			Ok(())
		}
		None if text.trim().is_empty() => Ok(()),
		None => Err(island_error(source, position, "text outside of the root element")),
	}
}

fn resolve_reference(name: &str) -> Option<String> {
	if let Some(resolved) = resolve_xml_entity(name) {
		return Some(resolved.to_string());
	}

	let number = name.strip_prefix('#')?;
	let code = match number.strip_prefix('x').or_else(|| number.strip_prefix('X')) {
		Some(hex) => u32::from_str_radix(hex, 16).ok()?,
		None => number.parse().ok()?,
	};
	char::from_u32(code).map(String::from)
}

fn island_error(source: &str, position: usize, message: &str) -> TagloomError {
	let position = position.min(source.len());
	let line = 1 + source.as_bytes()[..position]
		.iter()
		.filter(|byte| **byte == b'\n')
		.count();

	TagloomError::XmlParse {
		message: format!("xml(): {message}"),
		line,
		file: String::new(),
	}
}

fn offset(position: impl TryInto<usize>) -> usize {
	position.try_into().unwrap_or(usize::MAX)
}
