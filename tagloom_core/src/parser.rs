use indexmap::IndexMap;
use quick_xml::Reader;
use quick_xml::events::BytesStart;
use quick_xml::events::Event;

use crate::TagloomResult;
use crate::builder::TreeBuilder;
use crate::node::Template;

/// Options that change how a template is built.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ParseOptions {
	/// Fold inert subtrees into literal text.
	pub fold: bool,
}

impl Default for ParseOptions {
	fn default() -> Self {
		Self { fold: true }
	}
}

/// Parse `source` into a [`Template`]. `source_path` is recorded on the
/// template and attached to any error.
pub fn parse(source: &str, source_path: &str, options: ParseOptions) -> TagloomResult<Template> {
	parse_events(source, source_path, options).map_err(|error| error.with_file(source_path))
}

fn parse_events(source: &str, source_path: &str, options: ParseOptions) -> TagloomResult<Template> {
	let mut reader = Reader::from_str(source);
	let mut builder = TreeBuilder::new(source).with_fold(options.fold);
	let mut lines = LineTracker::new(source);

	loop {
		let start = offset(reader.buffer_position());
		let event = match reader.read_event() {
			Ok(event) => event,
			Err(error) => {
				let line = lines.line_at(offset(reader.error_position()));
				return Err(builder.parse_error(&error.to_string(), line));
			}
		};
		let line = lines.line_at(start);

		match event {
			Event::Start(element) => {
				let (tag, attributes) = element_parts(&element, &builder, line)?;
				builder.open(&tag, attributes, line)?;
			}
			Event::Empty(element) => {
				let (tag, attributes) = element_parts(&element, &builder, line)?;
				builder.open(&tag, attributes, line)?;
				builder.close(offset(reader.buffer_position()), line)?;
			}
			Event::End(_) => {
				builder.close(offset(reader.buffer_position()), line)?;
			}
			Event::Text(text) => {
				builder.text(&utf8(&text, &builder, line)?, line)?;
			}
			Event::CData(data) => {
				builder.text(&utf8(&data, &builder, line)?, line)?;
			}
			Event::GeneralRef(reference) => {
				let name = reference
					.decode()
					.map_err(|error| builder.parse_error(&error.to_string(), line))?;
				builder.text(&format!("&{name};"), line)?;
			}
			Event::Comment(_) | Event::PI(_) | Event::Decl(_) | Event::DocType(_) => {}
			Event::Eof => break,
		}
	}

	let line = lines.line_at(source.len());
	builder.finish(source_path, line)
}

fn element_parts(
	element: &BytesStart<'_>,
	builder: &TreeBuilder<'_>,
	line: usize,
) -> TagloomResult<(String, IndexMap<String, String>)> {
	let tag = utf8(element.name().as_ref(), builder, line)?;
	let mut attributes = IndexMap::new();

	for attribute in element.attributes() {
		let attribute = attribute.map_err(|error| builder.parse_error(&error.to_string(), line))?;
		let name = utf8(attribute.key.as_ref(), builder, line)?;
		let value = attribute
			.unescape_value()
			.map_err(|error| builder.parse_error(&error.to_string(), line))?;
		attributes.insert(name, value.into_owned());
	}

	Ok((tag, attributes))
}

fn utf8(bytes: &[u8], builder: &TreeBuilder<'_>, line: usize) -> TagloomResult<String> {
	std::str::from_utf8(bytes)
		.map(ToString::to_string)
		.map_err(|error| builder.parse_error(&error.to_string(), line))
}

fn offset(position: impl TryInto<usize>) -> usize {
	position.try_into().unwrap_or(usize::MAX)
}

/// Converts byte offsets into 1-based line numbers. Offsets are expected in
/// increasing order, so each byte is scanned once.
struct LineTracker<'s> {
	source: &'s str,
	offset: usize,
	line: usize,
}

impl<'s> LineTracker<'s> {
	fn new(source: &'s str) -> Self {
		Self {
			source,
			offset: 0,
			line: 1,
		}
	}

	fn line_at(&mut self, offset: usize) -> usize {
		let offset = offset.min(self.source.len());
		if offset < self.offset {
			return 1 + count_newlines(&self.source.as_bytes()[..offset]);
		}

		self.line += count_newlines(&self.source.as_bytes()[self.offset..offset]);
		self.offset = offset;
		self.line
	}
}

fn count_newlines(bytes: &[u8]) -> usize {
	bytes.iter().filter(|byte| **byte == b'\n').count()
}

