use std::path::Path;
use std::path::PathBuf;
use std::rc::Rc;

use indexmap::IndexMap;
use tracing::debug;

use crate::TagloomError;
use crate::TagloomResult;
use crate::compile_cache::CompileCache;
use crate::compile_cache::absolute;
use crate::compile_cache::load_template;
use crate::config::ConfigFile;
use crate::config::EngineConfig;
use crate::directives::FeedFactory;
use crate::directives::Translator;
use crate::functions::FunctionFactory;
use crate::functions::FunctionRegistry;
use crate::node::Template;
use crate::parser::ParseOptions;
use crate::parser::parse;
use crate::render::RenderContext;
use crate::render::RenderEnvironment;
use crate::scope::ScopeStack;
use crate::value::Value;

/// Source path recorded for templates loaded from a string.
pub const STRING_SOURCE: &str = "<string>";

#[derive(Debug, Clone)]
enum TemplateSource {
	File(PathBuf),
	String(String),
}

/// Loads one template, holds the data it is rendered against and renders it.
///
/// ```rust
/// use tagloom_core::EngineConfig;
/// use tagloom_core::View;
///
/// let mut view = View::new(EngineConfig::default());
/// view.load_string(r#"<ul><li tl:walk="/items"><tl:val value="."/></li></ul>"#);
/// view.mount("items", vec!["a", "b"]);
///
/// assert_eq!(view.render()?, "<ul><li>a</li><li>b</li></ul>");
/// # Ok::<(), tagloom_core::TagloomError>(())
/// ```
pub struct View {
	config: EngineConfig,
	functions: FunctionRegistry,
	feeds: Vec<Rc<dyn FeedFactory>>,
	translator: Option<Box<dyn Translator>>,
	universe: ScopeStack,
	source: Option<TemplateSource>,
	template: Option<Rc<Template>>,
	from_cache: bool,
	cache: Option<CompileCache>,
}

impl Default for View {
	fn default() -> Self {
		Self::new(EngineConfig::default())
	}
}

impl View {
	pub fn new(config: EngineConfig) -> Self {
		Self {
			config,
			functions: FunctionRegistry::new(),
			feeds: Vec::new(),
			translator: None,
			universe: ScopeStack::new(),
			source: None,
			template: None,
			from_cache: false,
			cache: None,
		}
	}

	/// Build a view from the config file discovered under `root`, with its
	/// `[data]` files mounted. Without a config file the defaults apply.
	pub fn from_config_root(root: &Path) -> TagloomResult<Self> {
		let Some(config_file) = ConfigFile::load(root)? else {
			return Ok(Self::default());
		};

		let mut view = Self::new(config_file.engine_config(root));
		for (name, value) in config_file.load_data(root)? {
			view.mount(name, value);
		}

		Ok(view)
	}

	pub fn config(&self) -> &EngineConfig {
		&self.config
	}

	pub fn config_mut(&mut self) -> &mut EngineConfig {
		&mut self.config
	}

	/// Select the template file to render. It is built on the next
	/// [`View::parse`] or [`View::render`].
	pub fn load_file(&mut self, path: impl AsRef<Path>) -> TagloomResult<()> {
		self.source = Some(TemplateSource::File(absolute(path.as_ref())?));
		self.template = None;
		self.from_cache = false;
		Ok(())
	}

	/// Use `source` as the template. String templates are never cached.
	pub fn load_string(&mut self, source: impl Into<String>) {
		self.source = Some(TemplateSource::String(source.into()));
		self.template = None;
		self.from_cache = false;
	}

	/// Build the loaded template, from the cache when a fresh entry exists.
	/// Building twice is a no-op.
	pub fn parse(&mut self) -> TagloomResult<&Template> {
		if self.template.is_none() {
			let options = ParseOptions {
				fold: self.config.fold,
			};

			let (template, from_cache) = match &self.source {
				None => return Err(TagloomError::NoTemplate),
				Some(TemplateSource::String(source)) => {
					(parse(source, STRING_SOURCE, options)?, false)
				}
				Some(TemplateSource::File(path)) => {
					let templates_root = self
						.config
						.templates_root
						.clone()
						.or_else(|| path.parent().map(Path::to_path_buf))
						.unwrap_or_default();
					self.cache = self
						.config
						.cache_root
						.as_ref()
						.map(|cache_root| CompileCache::new(cache_root, templates_root));
					let loaded = load_template(path, self.cache.as_ref(), options)?;
					(loaded.template, loaded.from_cache)
				}
			};

			debug!(source = %template.source_path, from_cache, "template ready");
			self.template = Some(Rc::new(template));
			self.from_cache = from_cache;
		}

		self.template.as_deref().ok_or(TagloomError::NoTemplate)
	}

	/// Render the template against the mounted data. Mounts made by the
	/// template itself last for this render only.
	pub fn render(&mut self) -> TagloomResult<String> {
		self.parse()?;
		let Some(template) = self.template.clone() else {
			return Err(TagloomError::NoTemplate);
		};

		let env = RenderEnvironment {
			config: &self.config,
			functions: &self.functions,
			feeds: &self.feeds,
			translator: self.translator.as_deref(),
			cache: self.cache.as_ref(),
		};

		RenderContext::new(env, self.universe.clone()).render_document(&template)
	}

	/// Make `value` available to expressions as `name` (and `/name`).
	pub fn mount(&mut self, name: impl Into<String>, value: impl Into<Value>) {
		self.universe.mount(name, value);
	}

	/// All mounted data merged into one map.
	pub fn merged_data(&self) -> IndexMap<String, Value> {
		self.universe.merged()
	}

	/// Add a function library. Later factories take precedence over earlier
	/// ones and over the native functions.
	pub fn register_function_factory(&mut self, factory: impl FunctionFactory + 'static) {
		self.functions.register(factory);
	}

	/// Add a feed factory. Later factories take precedence.
	pub fn register_feed_factory(&mut self, factory: impl FeedFactory + 'static) {
		self.feeds.insert(0, Rc::new(factory));
	}

	pub fn set_translator(&mut self, translator: impl Translator + 'static) {
		self.translator = Some(Box::new(translator));
	}

	pub fn template(&self) -> Option<&Template> {
		self.template.as_deref()
	}

	/// Whether the current template was restored from the compiled-tree
	/// cache instead of being built from source.
	pub fn is_from_cache(&self) -> bool {
		self.from_cache
	}
}
