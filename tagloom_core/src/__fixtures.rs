use std::path::Path;
use std::path::PathBuf;

use indexmap::IndexMap;

use crate::EngineConfig;
use crate::Feed;
use crate::FeedFactory;
use crate::FunctionCall;
use crate::ParseOptions;
use crate::ScopeStack;
use crate::TagloomResult;
use crate::Template;
use crate::TranslationRequest;
use crate::Value;
use crate::View;
use crate::parse;

/// Render `source` with the default settings and the given universe.
pub fn render_with(source: &str, data: Vec<(&str, Value)>) -> TagloomResult<String> {
	render_configured(source, EngineConfig::default(), data)
}

pub fn render_configured(
	source: &str,
	config: EngineConfig,
	data: Vec<(&str, Value)>,
) -> TagloomResult<String> {
	let mut view = View::new(config);
	view.load_string(source);
	for (name, value) in data {
		view.mount(name, value);
	}
	view.render()
}

pub fn render(source: &str) -> TagloomResult<String> {
	render_with(source, Vec::new())
}

pub fn unfolded() -> EngineConfig {
	EngineConfig {
		fold: false,
		..EngineConfig::default()
	}
}

pub fn build(source: &str, fold: bool) -> TagloomResult<Template> {
	parse(source, "test.xml", ParseOptions { fold })
}

/// A scope whose universe holds `entries`.
pub fn universe(entries: Vec<(&str, Value)>) -> ScopeStack {
	let mut scope = ScopeStack::new();
	for (name, value) in entries {
		scope.mount(name, value);
	}
	scope
}

pub fn map(entries: Vec<(&str, Value)>) -> Value {
	entries.into_iter().collect()
}

/// Write `content` to `name` below `dir`, creating parent directories.
pub fn write_file(dir: &Path, name: &str, content: &str) -> PathBuf {
	let path = dir.join(name);
	if let Some(parent) = path.parent() {
		std::fs::create_dir_all(parent).unwrap();
	}
	std::fs::write(&path, content).unwrap();
	path
}

/// A host object exposing an accessor, a field and dynamic members.
#[derive(Debug)]
pub struct Article {
	pub title: String,
	pub slug: String,
}

impl crate::DataObject for Article {
	fn accessor(&self, getter: &str) -> Option<Value> {
		(getter == "getTitle").then(|| Value::from(self.title.as_str()))
	}

	fn field(&self, name: &str) -> Option<Value> {
		(name == "slug").then(|| Value::from(self.slug.as_str()))
	}

	fn dynamic(&self, name: &str) -> Option<Value> {
		name.strip_prefix("meta_").map(Value::from)
	}
}

pub fn greet(_call: &FunctionCall<'_>, arguments: Vec<Value>) -> TagloomResult<Value> {
	let name = arguments.first().map(Value::to_output_string).unwrap_or_default();
	Ok(Value::String(format!("Hello {name}")))
}

pub fn shout(_call: &FunctionCall<'_>, arguments: Vec<Value>) -> TagloomResult<Value> {
	let text = arguments.first().map(Value::to_output_string).unwrap_or_default();
	Ok(Value::String(format!("{}!", text.to_uppercase())))
}

/// Produces the numbers `1..=count`.
pub struct NumbersFeed;

impl Feed for NumbersFeed {
	fn run(&self, params: &IndexMap<String, Value>) -> TagloomResult<Value> {
		let count = params
			.get("count")
			.and_then(Value::as_number)
			.unwrap_or_default() as i64;
		Ok(Value::List((1..=count).map(Value::from).collect()))
	}
}

pub struct NumbersFactory;

impl FeedFactory for NumbersFactory {
	fn create(&self, class: &str) -> Option<Box<dyn Feed>> {
		(class == "numbers").then(|| Box::new(NumbersFeed) as Box<dyn Feed>)
	}
}

pub fn french(request: &TranslationRequest<'_>) -> Option<String> {
	if request.language != Some("fr") || request.source != Some("messages") {
		return None;
	}

	match request.key {
		"hello" => Some("bonjour".to_string()),
		"world" => Some("monde".to_string()),
		_ => None,
	}
}
