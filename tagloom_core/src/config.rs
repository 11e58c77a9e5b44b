use std::collections::HashMap;
use std::path::Path;
use std::path::PathBuf;

use serde::Deserialize;

use crate::TagloomError;
use crate::TagloomResult;

/// Default limit on nested `include` directives.
pub const DEFAULT_MAX_INCLUDE_DEPTH: usize = 32;

/// Supported config file locations in discovery order (highest precedence
/// first).
pub const CONFIG_FILE_CANDIDATES: [&str; 3] = [
	"tagloom.toml",
	".tagloom.toml",
	".config/tagloom.toml",
];

/// Settings of a [`View`](crate::View).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineConfig {
	/// Directory that cache keys are made relative to. Defaults to the
	/// directory of the loaded template.
	pub templates_root: Option<PathBuf>,
	/// Where compiled trees are stored. No caching without it.
	pub cache_root: Option<PathBuf>,
	/// Target language for `trans` directives.
	pub language: Option<String>,
	/// Fold inert subtrees while building.
	pub fold: bool,
	pub max_include_depth: usize,
}

impl Default for EngineConfig {
	fn default() -> Self {
		Self {
			templates_root: None,
			cache_root: None,
			language: None,
			fold: true,
			max_include_depth: DEFAULT_MAX_INCLUDE_DEPTH,
		}
	}
}

/// Data source entry for a `[data]` table.
///
/// Plain entries take the format from the file extension:
///
/// ```toml
/// [data]
/// site = "site.json"
/// ```
///
/// Typed entries name the format explicitly:
///
/// ```toml
/// [data]
/// menu = { path = "menu.data", format = "toml" }
/// ```
#[derive(Debug, Clone, Deserialize, Eq, PartialEq)]
#[serde(untagged)]
#[non_exhaustive]
pub enum DataSource {
	Path(PathBuf),
	Typed(TypedDataSource),
}

impl DataSource {
	pub fn path(&self) -> &Path {
		match self {
			Self::Path(path) => path.as_path(),
			Self::Typed(typed) => typed.path.as_path(),
		}
	}

	/// The explicit format, or the lowercased file extension.
	pub fn format(&self) -> String {
		match self {
			Self::Path(path) => {
				path.extension()
					.and_then(|extension| extension.to_str())
					.unwrap_or("")
					.to_ascii_lowercase()
			}
			Self::Typed(typed) => typed.format.trim().to_ascii_lowercase(),
		}
	}
}

#[derive(Debug, Clone, Deserialize, Eq, PartialEq)]
pub struct TypedDataSource {
	pub path: PathBuf,
	pub format: String,
}

/// Configuration loaded from a `tagloom.toml` file.
///
/// ```toml
/// templates_root = "templates"
/// cache_root = ".cache/tagloom"
/// language = "fr"
/// fold = true
///
/// [data]
/// site = "data/site.json"
/// ```
#[derive(Debug, Default, Deserialize)]
pub struct ConfigFile {
	#[serde(default)]
	pub templates_root: Option<PathBuf>,
	#[serde(default)]
	pub cache_root: Option<PathBuf>,
	#[serde(default)]
	pub language: Option<String>,
	#[serde(default)]
	pub fold: Option<bool>,
	#[serde(default)]
	pub max_include_depth: Option<usize>,
	/// Map of universe name to data file.
	#[serde(default)]
	pub data: HashMap<String, DataSource>,
}

impl ConfigFile {
	/// Resolve the config path from known discovery candidates.
	#[must_use]
	pub fn resolve_path(root: &Path) -> Option<PathBuf> {
		CONFIG_FILE_CANDIDATES
			.iter()
			.map(|candidate| root.join(candidate))
			.find(|path| path.is_file())
	}

	/// Load the config from the first discovered config file at `root`.
	/// Returns `None` if there is none.
	pub fn load(root: &Path) -> TagloomResult<Option<ConfigFile>> {
		let Some(config_path) = Self::resolve_path(root) else {
			return Ok(None);
		};

		let content = std::fs::read_to_string(&config_path)?;
		let config: ConfigFile =
			toml::from_str(&content).map_err(|e| TagloomError::ConfigParse(e.to_string()))?;

		Ok(Some(config))
	}

	/// The engine settings, with relative paths resolved against `root`.
	pub fn engine_config(&self, root: &Path) -> EngineConfig {
		let defaults = EngineConfig::default();
		EngineConfig {
			templates_root: self.templates_root.as_ref().map(|path| root.join(path)),
			cache_root: self.cache_root.as_ref().map(|path| root.join(path)),
			language: self.language.clone(),
			fold: self.fold.unwrap_or(defaults.fold),
			max_include_depth: self.max_include_depth.unwrap_or(defaults.max_include_depth),
		}
	}

	/// Read every data file, keyed by the universe name it is mounted under.
	pub fn load_data(&self, root: &Path) -> TagloomResult<HashMap<String, serde_json::Value>> {
		let mut data = HashMap::new();

		for (name, source) in &self.data {
			let value = load_data_file(&root.join(source.path()), &source.format())?;
			data.insert(name.clone(), value);
		}

		Ok(data)
	}
}

/// Read a JSON, TOML or text data file.
pub fn load_data_file(path: &Path, format: &str) -> TagloomResult<serde_json::Value> {
	let path_display = path.display().to_string();
	let content = std::fs::read_to_string(path).map_err(|e| TagloomError::DataFile {
		path: path_display.clone(),
		reason: e.to_string(),
	})?;

	parse_data_file(&content, format, &path_display)
}

/// Parse a data file's content into a `serde_json::Value` based on its
/// format.
fn parse_data_file(content: &str, format: &str, path_display: &str) -> TagloomResult<serde_json::Value> {
	match format {
		"text" | "txt" => Ok(serde_json::Value::String(content.to_string())),
		"json" => serde_json::from_str(content).map_err(|e| TagloomError::DataFile {
			path: path_display.to_string(),
			reason: e.to_string(),
		}),
		"toml" => {
			let toml_value: toml::Value =
				toml::from_str(content).map_err(|e| TagloomError::DataFile {
					path: path_display.to_string(),
					reason: e.to_string(),
				})?;
			Ok(toml_to_json(toml_value))
		}
		other => Err(TagloomError::UnsupportedDataFormat(other.to_string())),
	}
}

fn toml_to_json(value: toml::Value) -> serde_json::Value {
	match value {
		toml::Value::String(s) => serde_json::Value::String(s),
		toml::Value::Integer(i) => serde_json::Value::from(i),
		toml::Value::Float(f) => serde_json::Value::from(f),
		toml::Value::Boolean(b) => serde_json::Value::Bool(b),
		toml::Value::Datetime(dt) => serde_json::Value::String(dt.to_string()),
		toml::Value::Array(items) => {
			serde_json::Value::Array(items.into_iter().map(toml_to_json).collect())
		}
		toml::Value::Table(table) => {
			serde_json::Value::Object(
				table
					.into_iter()
					.map(|(key, value)| (key, toml_to_json(value)))
					.collect(),
			)
		}
	}
}
