use std::path::Path;
use std::path::PathBuf;
use std::process;

use clap::Parser;
use owo_colors::OwoColorize;
use tagloom_cli::Commands;
use tagloom_cli::DataArg;
use tagloom_cli::TagloomCli;
use tagloom_core::AnyEmptyResult;
use tagloom_core::DataSource;
use tagloom_core::TagloomError;
use tagloom_core::View;
use tagloom_core::load_data_file;
use tracing_subscriber::EnvFilter;

static USE_COLOR: std::sync::atomic::AtomicBool = std::sync::atomic::AtomicBool::new(true);

fn color_enabled() -> bool {
	USE_COLOR.load(std::sync::atomic::Ordering::Relaxed)
}

/// Apply ANSI color codes only when color is enabled.
macro_rules! colored {
	($text:expr,red) => {
		if color_enabled() {
			format!("{}", $text.red())
		} else {
			format!("{}", $text)
		}
	};
	($text:expr,green) => {
		if color_enabled() {
			format!("{}", $text.green())
		} else {
			format!("{}", $text)
		}
	};
}

fn main() {
	let args = TagloomCli::parse();

	// Respect NO_COLOR env var and --no-color flag.
	let use_color = !args.no_color && std::env::var_os("NO_COLOR").is_none();
	if !use_color {
		USE_COLOR.store(false, std::sync::atomic::Ordering::Relaxed);
	}

	miette::set_hook(Box::new(move |_| {
		Box::new(
			miette::MietteHandlerOpts::new()
				.color(use_color)
				.unicode(use_color)
				.build(),
		)
	}))
	.ok();

	init_tracing(args.verbose, use_color);

	let result = match &args.command {
		Some(Commands::Render {
			file,
			data,
			output,
			no_fold,
		}) => run_render(&args, file, data, output.as_deref(), *no_fold),
		Some(Commands::Check { file, no_fold }) => run_check(&args, file, *no_fold),
		None => {
			eprintln!("No subcommand specified. Run `tagloom --help` for usage.");
			process::exit(1);
		}
	};

	if let Err(e) = result {
		match e.downcast::<TagloomError>() {
			Ok(tagloom_err) => {
				let report: miette::Report = (*tagloom_err).into();
				eprintln!("{report:?}");
			}
			Err(e) => {
				eprintln!("{} {e}", colored!("error:", red));
			}
		}
		process::exit(2);
	}
}

/// Log to stderr. `RUST_LOG` wins over `--verbose`.
fn init_tracing(verbose: bool, use_color: bool) {
	let default_level = if verbose { "debug" } else { "warn" };
	let filter =
		EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

	tracing_subscriber::fmt()
		.with_env_filter(filter)
		.with_writer(std::io::stderr)
		.with_ansi(use_color)
		.with_target(verbose)
		.try_init()
		.ok();
}

fn resolve_root(args: &TagloomCli) -> PathBuf {
	args.path
		.clone()
		.unwrap_or_else(|| std::env::current_dir().unwrap_or_else(|_| PathBuf::from(".")))
}

fn run_render(
	args: &TagloomCli,
	file: &Path,
	data: &[DataArg],
	output: Option<&Path>,
	no_fold: bool,
) -> AnyEmptyResult {
	let root = resolve_root(args);
	let mut view = View::from_config_root(&root)?;
	if no_fold {
		view.config_mut().fold = false;
	}

	for entry in data {
		let source = DataSource::Path(root.join(&entry.path));
		let value = load_data_file(source.path(), &source.format())?;
		view.mount(entry.name.clone(), value);
	}

	view.load_file(root.join(file))?;
	let rendered = view.render()?;

	match output {
		Some(output) => {
			let output = root.join(output);
			if let Some(parent) = output.parent() {
				std::fs::create_dir_all(parent)?;
			}
			std::fs::write(&output, &rendered)?;
			println!("{} {}", colored!("wrote", green), output.display());
		}
		None => println!("{rendered}"),
	}

	Ok(())
}

fn run_check(args: &TagloomCli, file: &Path, no_fold: bool) -> AnyEmptyResult {
	let root = resolve_root(args);
	let mut view = View::from_config_root(&root)?;
	if no_fold {
		view.config_mut().fold = false;
	}

	view.load_file(root.join(file))?;
	let template = view.parse()?;
	let nodes = template.tree.len();
	let prefix = template.prefix.clone();
	let cached = if view.is_from_cache() { ", from cache" } else { "" };

	println!(
		"{} {} ({nodes} node(s), prefix `{prefix}`{cached})",
		colored!("ok:", green),
		file.display()
	);

	Ok(())
}
