use std::path::Component;
use std::path::Path;
use std::path::PathBuf;
use std::time::SystemTime;
use std::time::UNIX_EPOCH;

use serde::Deserialize;
use serde::Serialize;
use tracing::debug;
use tracing::warn;

use crate::TagloomError;
use crate::TagloomResult;
use crate::node::Template;
use crate::parser::ParseOptions;
use crate::parser::parse;

pub(crate) const CACHE_SCHEMA_VERSION: u32 = 1;
/// Suffix appended to every cache file.
pub const CACHE_SUFFIX: &str = ".tlc";
const CACHE_DIR: &str = "trees";

/// The persisted form of a built template.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub(crate) struct CacheEntry {
	pub schema_version: u32,
	/// Whether the tree was built with folding enabled.
	pub folded: bool,
	pub template: Template,
}

/// A template together with where it came from.
#[derive(Debug, Clone)]
pub struct LoadedTemplate {
	pub template: Template,
	pub from_cache: bool,
}

/// Maps template sources to compiled-tree files under a cache root.
///
/// A cache file is fresh while its modification time is not older than the
/// source's, or when the source no longer exists. Nothing is locked: a
/// half-written or unreadable file is logged and the template is rebuilt.
#[derive(Debug, Clone)]
pub struct CompileCache {
	cache_root: PathBuf,
	templates_root: PathBuf,
}

impl CompileCache {
	pub fn new(cache_root: impl Into<PathBuf>, templates_root: impl Into<PathBuf>) -> Self {
		Self {
			cache_root: cache_root.into(),
			templates_root: templates_root.into(),
		}
	}

	/// The cache file for `source`: its path relative to the templates root,
	/// moved under the cache root, with [`CACHE_SUFFIX`] appended. Sources
	/// outside the templates root keep their full path below the cache root.
	pub fn cache_path(&self, source: &Path) -> PathBuf {
		let relative = source.strip_prefix(&self.templates_root).map_or_else(
			|_| {
				source
					.components()
					.filter(|component| matches!(component, Component::Normal(_)))
					.collect::<PathBuf>()
			},
			Path::to_path_buf,
		);

		let mut file_name = self.cache_root.join(CACHE_DIR).join(relative).into_os_string();
		file_name.push(CACHE_SUFFIX);
		PathBuf::from(file_name)
	}

	/// Restore the template for `source` if a fresh, readable entry exists.
	pub(crate) fn load(&self, source: &Path, options: ParseOptions) -> Option<Template> {
		let cache_path = self.cache_path(source);
		let cache_modified = modified(&cache_path)?;

		if modified(source).is_some_and(|source_modified| cache_modified < source_modified) {
			debug!(path = %cache_path.display(), "compiled tree cache is stale");
			return None;
		}

		let bytes = match std::fs::read(&cache_path) {
			Ok(bytes) => bytes,
			Err(error) => {
				warn!(path = %cache_path.display(), %error, "unable to read compiled tree cache");
				return None;
			}
		};

		let entry: CacheEntry = match serde_json::from_slice(&bytes) {
			Ok(entry) => entry,
			Err(error) => {
				warn!(path = %cache_path.display(), %error, "corrupt compiled tree cache");
				return None;
			}
		};

		if entry.schema_version != CACHE_SCHEMA_VERSION || entry.folded != options.fold {
			debug!(path = %cache_path.display(), "compiled tree cache built with other settings");
			return None;
		}

		debug!(path = %cache_path.display(), "compiled tree cache hit");
		Some(entry.template)
	}

	/// Persist `template`. Failures are logged and otherwise ignored.
	pub(crate) fn save(&self, source: &Path, template: &Template, options: ParseOptions) {
		let cache_path = self.cache_path(source);
		let Some(cache_dir) = cache_path.parent() else {
			return;
		};

		if let Err(error) = std::fs::create_dir_all(cache_dir) {
			warn!(path = %cache_dir.display(), %error, "unable to create cache directory");
			return;
		}

		let entry = CacheEntry {
			schema_version: CACHE_SCHEMA_VERSION,
			folded: options.fold,
			template: template.clone(),
		};
		let payload = match serde_json::to_vec(&entry) {
			Ok(payload) => payload,
			Err(error) => {
				warn!(path = %cache_path.display(), %error, "unable to serialize compiled tree cache");
				return;
			}
		};

		let temp_path = cache_path.with_extension(format!(
			"tmp-{}-{}",
			std::process::id(),
			SystemTime::now()
				.duration_since(UNIX_EPOCH)
				.map_or(0, |duration| duration.as_nanos())
		));

		if let Err(error) = std::fs::write(&temp_path, payload) {
			warn!(path = %temp_path.display(), %error, "unable to write compiled tree cache");
			return;
		}

		if let Err(error) = std::fs::rename(&temp_path, &cache_path) {
			warn!(path = %cache_path.display(), %error, "unable to move compiled tree cache into place");
			if let Err(error) = std::fs::remove_file(&temp_path) {
				warn!(path = %temp_path.display(), %error, "unable to remove temporary cache file");
			}
			return;
		}

		debug!(path = %cache_path.display(), "compiled tree cache written");
	}
}

/// Load the template at `source`, going through the cache when one is
/// configured. A freshly built tree is written back to the cache.
pub fn load_template(
	source: &Path,
	cache: Option<&CompileCache>,
	options: ParseOptions,
) -> TagloomResult<LoadedTemplate> {
	if let Some(template) = cache.and_then(|cache| cache.load(source, options)) {
		return Ok(LoadedTemplate {
			template,
			from_cache: true,
		});
	}

	let content = match std::fs::read_to_string(source) {
		Ok(content) => content,
		Err(error) if error.kind() == std::io::ErrorKind::NotFound => {
			return Err(TagloomError::FileNotFound {
				path: source.display().to_string(),
			});
		}
		Err(error) => return Err(error.into()),
	};

	debug!(path = %source.display(), "building template from source");
	let template = parse(&content, &source.display().to_string(), options)?;

	if let Some(cache) = cache {
		cache.save(source, &template, options);
	}

	Ok(LoadedTemplate {
		template,
		from_cache: false,
	})
}

/// Make `path` absolute against the current directory.
pub(crate) fn absolute(path: &Path) -> TagloomResult<PathBuf> {
	if path.is_absolute() {
		Ok(path.to_path_buf())
	} else {
		Ok(std::env::current_dir()?.join(path))
	}
}

fn modified(path: &Path) -> Option<SystemTime> {
	std::fs::metadata(path)
		.and_then(|metadata| metadata.modified())
		.ok()
}
