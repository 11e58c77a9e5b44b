use std::path::Path;
use std::path::PathBuf;
use std::rc::Rc;

use indexmap::IndexMap;
use tracing::debug;

use crate::TagloomError;
use crate::TagloomResult;
use crate::compile_cache::load_template;
use crate::node::DirectiveKind;
use crate::node::NodeId;
use crate::node::Template;
use crate::parser::ParseOptions;
use crate::render::RenderContext;
use crate::value::Value;

/// A source of external data bound into the universe by a `feed` directive.
pub trait Feed {
	/// Produce the feed's value. `params` holds the directive's other
	/// attributes, already evaluated.
	fn run(&self, params: &IndexMap<String, Value>) -> TagloomResult<Value>;
}

/// Creates feeds by class name.
pub trait FeedFactory {
	fn create(&self, class: &str) -> Option<Box<dyn Feed>>;
}

/// What a `trans` directive asks the translator for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TranslationRequest<'a> {
	pub language: Option<&'a str>,
	/// Dictionary name, from the directive or the template default.
	pub source: Option<&'a str>,
	/// File registered for `source` by a `dictionary` directive.
	pub dictionary_file: Option<&'a str>,
	pub key: &'a str,
}

/// Backend that resolves translation keys.
pub trait Translator {
	/// `None` keeps the directive's own content.
	fn translate(&self, request: &TranslationRequest<'_>) -> Option<String>;
}

impl<F> Translator for F
where
	F: Fn(&TranslationRequest<'_>) -> Option<String>,
{
	fn translate(&self, request: &TranslationRequest<'_>) -> Option<String> {
		self(request)
	}
}

impl RenderContext<'_> {
	pub(crate) fn render_directive(
		&mut self,
		template: &Rc<Template>,
		id: NodeId,
		kind: DirectiveKind,
	) -> TagloomResult<String> {
		match kind {
			DirectiveKind::Attr => self.render_attr(template, id),
			DirectiveKind::Cdata => self.render_cdata(template, id),
			DirectiveKind::Dictionary => {
				let node = template.tree.node(id);
				let name = required(node.attribute("name"));
				let file = self.resolve_file(template, required(node.attribute("file")))?;
				self.dictionaries
					.insert(name.to_string(), file.display().to_string());
				Ok(String::new())
			}
			DirectiveKind::Feed => self.render_feed(template, id),
			DirectiveKind::Include => self.render_include(template, id),
			DirectiveKind::Mount => {
				let node = template.tree.node(id);
				let target = required(node.attribute("target"));
				let value = match node.attribute("value") {
					Some(expression) => self.evaluate(expression)?,
					None => Value::String(self.render_children(template, id)?),
				};
				self.scope.mount(target, value);
				Ok(String::new())
			}
			DirectiveKind::Param => Ok(String::new()),
			DirectiveKind::Trans => self.render_trans(template, id),
			DirectiveKind::Val => {
				let expression = required(template.tree.node(id).attribute("value"));
				Ok(self.evaluate(expression)?.to_output_string())
			}
		}
	}

	/// Add an attribute to the enclosing element. A truthy `flag` makes a bare
	/// attribute. Otherwise the value comes from `value` or the rendered
	/// children.
	fn render_attr(&mut self, template: &Rc<Template>, id: NodeId) -> TagloomResult<String> {
		let node = template.tree.node(id);
		let name = required(node.attribute("name")).to_string();

		let flagged = match node.attribute("flag") {
			Some(flag) => self.evaluate(flag)?.is_truthy(),
			None => false,
		};

		let value = if flagged {
			None
		} else if let Some(expression) = node.attribute("value") {
			Some(self.evaluate(expression)?.to_output_string())
		} else {
			let content = self.render_children(template, id)?;
			Some(content.split_whitespace().collect::<Vec<_>>().join(" "))
		};

		match self.attribute_frames.last_mut() {
			Some(frame) => {
				frame.insert(name, value);
			}
			None => debug!(attribute = %name, "attribute directive outside of an element"),
		}

		Ok(String::new())
	}

	fn render_cdata(&mut self, template: &Rc<Template>, id: NodeId) -> TagloomResult<String> {
		let file = self.resolve_file(template, required(template.tree.node(id).attribute("file")))?;
		read_file(&file)
	}

	fn render_feed(&mut self, template: &Rc<Template>, id: NodeId) -> TagloomResult<String> {
		let node = template.tree.node(id);
		let class = required(node.attribute("class"));
		let target = node.attribute("target").unwrap_or(class);

		let mut params = IndexMap::new();
		for (name, expression) in &node.attributes {
			if name != "class" && name != "target" {
				params.insert(name.clone(), self.evaluate(expression)?);
			}
		}

		let Some(feed) = self
			.env
			.feeds
			.iter()
			.find_map(|factory| factory.create(class))
		else {
			return Err(TagloomError::FeedNotFound {
				class: class.to_string(),
			});
		};

		let value = feed.run(&params)?;
		self.scope.mount(target, value);
		Ok(String::new())
	}

	/// Render another template inside this pass, sharing scope, macros and
	/// slots with the host.
	fn render_include(&mut self, template: &Rc<Template>, id: NodeId) -> TagloomResult<String> {
		let file = self.resolve_file(template, required(template.tree.node(id).attribute("file")))?;
		let limit = self.env.config.max_include_depth;
		if self.include_depth >= limit {
			return Err(TagloomError::IncludeDepth {
				file: file.display().to_string(),
				limit,
			});
		}

		debug!(path = %file.display(), "including template");
		let options = ParseOptions {
			fold: self.env.config.fold,
		};
		let included = Rc::new(load_template(&file, self.env.cache, options)?.template);

		self.include_depth += 1;
		let rendered = self.render_template(&included);
		self.include_depth -= 1;
		rendered
	}

	fn render_trans(&mut self, template: &Rc<Template>, id: NodeId) -> TagloomResult<String> {
		let node = template.tree.node(id);
		let content = self.render_children(template, id)?;

		let Some(translator) = self.env.translator else {
			return Ok(content);
		};

		let key = match node.attribute("key") {
			Some(key) => self.interpolate(key)?,
			None => content.trim().to_string(),
		};
		let source = node
			.attribute("source")
			.or(template.default_trans_source.as_deref());
		let request = TranslationRequest {
			language: self.env.config.language.as_deref(),
			source,
			dictionary_file: source
				.and_then(|source| self.dictionaries.get(source))
				.map(String::as_str),
			key: &key,
		};

		Ok(translator.translate(&request).unwrap_or(content))
	}

	/// Resolve `file` against the directory of the template that names it.
	fn resolve_file(&self, template: &Template, file: &str) -> TagloomResult<PathBuf> {
		let file = Path::new(file);
		if file.is_absolute() {
			return Ok(file.to_path_buf());
		}

		let base = Path::new(&template.source_path)
			.parent()
			.filter(|parent| !parent.as_os_str().is_empty())
			.map(Path::to_path_buf)
			.or_else(|| self.env.config.templates_root.clone());

		match base {
			Some(base) => Ok(base.join(file)),
			None => Ok(std::env::current_dir()?.join(file)),
		}
	}
}

/// Required attributes are checked when the tree is built, so they are
/// always present here.
fn required(value: Option<&str>) -> &str {
	value.unwrap_or_default()
}

fn read_file(path: &Path) -> TagloomResult<String> {
	match std::fs::read_to_string(path) {
		Ok(content) => Ok(content),
		Err(error) if error.kind() == std::io::ErrorKind::NotFound => {
			Err(TagloomError::FileNotFound {
				path: path.display().to_string(),
			})
		}
		Err(error) => Err(error.into()),
	}
}
