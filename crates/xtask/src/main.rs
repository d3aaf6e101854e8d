use std::path::{Path, PathBuf};
use std::process::Command;

const LIBRARY_PACKAGE_NAME: &str = "mutrace";
const LAUNCHER_PACKAGE_NAME: &str = "mutrace-cli";
const LIBRARY_FILE_NAME: &str = "libmutrace.so";
const LAUNCHER_BIN_NAME: &str = "mutrace";

fn main() {
    let args: Vec<String> = std::env::args().skip(1).collect();
    match args.first().map(String::as_str) {
        Some("install") => install(),
        Some(command) => usage_and_exit(&format!("unknown command `{command}`")),
        None => usage_and_exit("missing command"),
    }
}

fn usage_and_exit(error: &str) -> ! {
    eprintln!("Error: {error}");
    eprintln!("Usage: cargo xtask <command>");
    eprintln!("Available commands:");
    eprintln!("  install");
    std::process::exit(1);
}

fn install() {
    if let Err(error) = install_inner() {
        eprintln!("{error}");
        std::process::exit(1);
    }
}

fn install_inner() -> Result<(), String> {
    let workspace_root = workspace_root()?;
    let release_dir = workspace_root.join("target/release");
    let install_bin_dir = cargo_bin_dir()?;

    run(
        Command::new("cargo")
            .arg("build")
            .arg("--release")
            .arg("-p")
            .arg(LIBRARY_PACKAGE_NAME)
            .arg("-p")
            .arg(LAUNCHER_PACKAGE_NAME)
            .current_dir(&workspace_root),
        "build mutrace release artifacts",
    )?;

    std::fs::create_dir_all(&install_bin_dir).map_err(|error| {
        format!(
            "failed to create install bin dir {}: {error}",
            install_bin_dir.display()
        )
    })?;

    // The launcher looks for the library next to itself.
    let installed_library = install_file(&release_dir, &install_bin_dir, LIBRARY_FILE_NAME)?;
    println!("Installed library to {}", installed_library.display());
    let installed_launcher = install_file(&release_dir, &install_bin_dir, LAUNCHER_BIN_NAME)?;
    println!("Installed launcher to {}", installed_launcher.display());

    run(
        Command::new(&installed_launcher).arg("--help"),
        "verify installed launcher",
    )?;
    println!("Verified {}", installed_launcher.display());

    Ok(())
}

fn install_file(from_dir: &Path, to_dir: &Path, name: &str) -> Result<PathBuf, String> {
    let src = from_dir.join(name);
    let dst = to_dir.join(name);
    if !src.is_file() {
        return Err(format!("build output not found at {}", src.display()));
    }
    std::fs::copy(&src, &dst).map_err(|error| {
        format!(
            "failed to copy {} to {}: {error}",
            src.display(),
            dst.display()
        )
    })?;
    Ok(dst)
}

fn workspace_root() -> Result<PathBuf, String> {
    let manifest_dir = PathBuf::from(env!("CARGO_MANIFEST_DIR"));
    manifest_dir
        .parent()
        .and_then(Path::parent)
        .map(PathBuf::from)
        .ok_or_else(|| {
            format!(
                "failed to resolve workspace root from {}",
                manifest_dir.display()
            )
        })
}

fn run(command: &mut Command, what: &str) -> Result<(), String> {
    let status = command
        .status()
        .map_err(|error| format!("failed to {what}: {error}"))?;
    if !status.success() {
        return Err(format!("{what} failed with status {status}"));
    }
    Ok(())
}

fn cargo_bin_dir() -> Result<PathBuf, String> {
    if let Some(cargo_home) = std::env::var_os("CARGO_HOME") {
        return Ok(PathBuf::from(cargo_home).join("bin"));
    }
    let home = std::env::var_os("HOME").ok_or("neither CARGO_HOME nor HOME is set")?;
    Ok(PathBuf::from(home).join(".cargo/bin"))
}
