use miette::Diagnostic;
use thiserror::Error;

#[derive(Debug, Diagnostic, Error)]
#[non_exhaustive]
pub enum TagloomError {
	#[error(transparent)]
	#[diagnostic(code(tagloom::io_error))]
	Io(#[from] std::io::Error),

	#[error("file not found: `{path}`")]
	#[diagnostic(code(tagloom::file_not_found))]
	FileNotFound { path: String },

	#[error("malformed template `{file}` at line {line}: {message}")]
	#[diagnostic(
		code(tagloom::xml_parse),
		help("templates must be well-formed XML with a single root element")
	)]
	XmlParse {
		message: String,
		line: usize,
		file: String,
	},

	#[error("missing required attribute `{attribute}` on <{tag}> ({file}, line {line})")]
	#[diagnostic(code(tagloom::required_attribute))]
	RequiredAttribute {
		tag: String,
		line: usize,
		attribute: String,
		file: String,
	},

	#[error("unexpected character `{character}` at position {position} in expression `{expression}`")]
	#[diagnostic(code(tagloom::lexical))]
	Lexical {
		expression: String,
		character: char,
		position: usize,
	},

	#[error("unexpected end of expression `{expression}`: {reason}")]
	#[diagnostic(code(tagloom::unexpected_end))]
	UnexpectedEnd { expression: String, reason: String },

	#[error("cannot evaluate `{expression}`: {message}")]
	#[diagnostic(code(tagloom::evaluation))]
	Evaluation { expression: String, message: String },

	#[error("unknown function: `{name}`")]
	#[diagnostic(
		code(tagloom::function_not_found),
		help("register a function factory on the view that provides `{name}`")
	)]
	FunctionNotFound { name: String },

	#[error("function `{name}` failed: {message}")]
	#[diagnostic(code(tagloom::function_call))]
	FunctionCall { name: String, message: String },

	#[error("no feed factory can create feed class `{class}`")]
	#[diagnostic(
		code(tagloom::feed_not_found),
		help("register a feed factory on the view that handles `{class}`")
	)]
	FeedNotFound { class: String },

	#[error("unknown macro: `{name}`")]
	#[diagnostic(
		code(tagloom::macro_not_found),
		help("macros must be defined before the element that calls them")
	)]
	MacroNotFound { name: String },

	#[error("failed to render <{tag}> ({file}, line {line})")]
	#[diagnostic(code(tagloom::rendering))]
	Rendering {
		tag: String,
		file: String,
		line: usize,
		#[source]
		source: Box<TagloomError>,
	},

	#[error("includes nested deeper than {limit} levels at `{file}`")]
	#[diagnostic(
		code(tagloom::include_depth),
		help("check for a template that includes itself")
	)]
	IncludeDepth { file: String, limit: usize },

	#[error("no template loaded")]
	#[diagnostic(
		code(tagloom::no_template),
		help("call `load_file` or `load_string` before rendering")
	)]
	NoTemplate,

	#[error("failed to parse config file: {0}")]
	#[diagnostic(
		code(tagloom::config_parse),
		help("check that tagloom.toml is valid TOML")
	)]
	ConfigParse(String),

	#[error("failed to load data file `{path}`: {reason}")]
	#[diagnostic(code(tagloom::data_file))]
	DataFile { path: String, reason: String },

	#[error("unsupported data file format: `{0}`")]
	#[diagnostic(
		code(tagloom::unsupported_format),
		help("supported formats: json, toml")
	)]
	UnsupportedDataFormat(String),
}

impl TagloomError {
	/// Attach the template file to errors raised before the file was known.
	/// Errors that already carry a file are returned unchanged.
	#[must_use]
	pub fn with_file(self, file: &str) -> Self {
		match self {
			Self::RequiredAttribute {
				tag,
				line,
				attribute,
				file: existing,
			} if existing.is_empty() => {
				Self::RequiredAttribute {
					tag,
					line,
					attribute,
					file: file.to_string(),
				}
			}
			Self::XmlParse {
				message,
				line,
				file: existing,
			} if existing.is_empty() => {
				Self::XmlParse {
					message,
					line,
					file: file.to_string(),
				}
			}
			other => other,
		}
	}

	/// The innermost error, skipping `Rendering` wrappers.
	pub fn root_cause(&self) -> &TagloomError {
		match self {
			Self::Rendering { source, .. } => source.root_cause(),
			other => other,
		}
	}
}

pub type TagloomResult<T> = Result<T, TagloomError>;
pub type AnyError = Box<dyn std::error::Error>;
pub type AnyEmptyResult = Result<(), AnyError>;
pub type AnyResult<T> = Result<T, AnyError>;
