use assert_cmd::Command;

pub fn tagloom_cmd() -> Command {
	let mut cmd = Command::new(env!("CARGO_BIN_EXE_tagloom"));
	cmd.env("NO_COLOR", "1").env_remove("RUST_LOG");
	cmd
}

pub fn write(dir: &std::path::Path, name: &str, content: &str) -> std::io::Result<()> {
	let path = dir.join(name);
	if let Some(parent) = path.parent() {
		std::fs::create_dir_all(parent)?;
	}
	std::fs::write(path, content)
}
