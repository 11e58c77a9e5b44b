use std::path::PathBuf;

use clap::Parser;
use clap::Subcommand;

#[derive(Parser)]
#[command(
	author,
	version,
	about = "Render XML templates with tagloom directives against structured data.",
	long_about = "tagloom renders well-formed XML templates annotated with `tl:` directives \
	              (loops, conditions, macros, slots and plugs, includes) against data from \
	              JSON or TOML files.\n\nQuick start:\n  tagloom render page.xml --data \
	              site=site.json\n  tagloom check page.xml"
)]
pub struct TagloomCli {
	#[command(subcommand)]
	pub command: Option<Commands>,

	/// Project root. `tagloom.toml` is discovered here and relative paths
	/// are resolved against it.
	#[arg(long, short, global = true)]
	pub path: Option<PathBuf>,

	/// Enable verbose output.
	#[arg(long, short, global = true, default_value_t = false)]
	pub verbose: bool,

	/// Disable colored output.
	#[arg(long, global = true, default_value_t = false)]
	pub no_color: bool,
}

#[derive(Subcommand)]
pub enum Commands {
	/// Render a template and print the result.
	///
	/// Data files from the `[data]` table of `tagloom.toml` are mounted
	/// first, then every `--data` file. A later mount of the same name
	/// replaces the earlier one.
	Render {
		/// The template file.
		file: PathBuf,

		/// Mount a JSON, TOML or text file under a name, as `NAME=PATH`.
		/// May be repeated.
		#[arg(long = "data", value_name = "NAME=PATH", value_parser = parse_data_arg)]
		data: Vec<DataArg>,

		/// Write the output to this file instead of stdout.
		#[arg(long, short)]
		output: Option<PathBuf>,

		/// Build the tree without folding inert elements into text.
		#[arg(long, default_value_t = false)]
		no_fold: bool,
	},
	/// Build a template without rendering it.
	///
	/// Reports structural errors and missing required directive attributes.
	/// Exits with a non-zero status code when the template cannot be built.
	Check {
		/// The template file.
		file: PathBuf,

		/// Build the tree without folding inert elements into text.
		#[arg(long, default_value_t = false)]
		no_fold: bool,
	},
}

/// A `--data NAME=PATH` argument.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DataArg {
	pub name: String,
	pub path: PathBuf,
}

pub fn parse_data_arg(raw: &str) -> Result<DataArg, String> {
	let Some((name, path)) = raw.split_once('=') else {
		return Err(format!("expected NAME=PATH, got `{raw}`"));
	};

	let name = name.trim();
	let path = path.trim();
	if name.is_empty() || path.is_empty() {
		return Err(format!("expected NAME=PATH, got `{raw}`"));
	}

	Ok(DataArg {
		name: name.to_string(),
		path: PathBuf::from(path),
	})
}
