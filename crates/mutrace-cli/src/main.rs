use mutrace_core::{
    CONTENDED_MIN_VAR, FRAMES_VAR, HASH_SIZE_VAR, JSON_VAR, LOCKED_MIN_VAR,
    OWNER_CHANGED_MIN_VAR, parse_ulong,
};
use std::ffi::OsString;
use std::os::unix::process::CommandExt;
use std::path::{Path, PathBuf};
use std::process::Command;

const LIBRARY_VAR: &str = "MUTRACE_LIBRARY";
const LIBRARY_FILE_NAME: &str = "libmutrace.so";
const PRELOAD_VAR: &str = "LD_PRELOAD";

#[derive(Debug, PartialEq, Eq)]
enum Invocation {
    Help,
    Launch(Launch),
}

#[derive(Debug, Default, PartialEq, Eq)]
struct Launch {
    /// Tunables handed to the library through its environment.
    env: Vec<(&'static str, String)>,
    library: Option<PathBuf>,
    program: String,
    args: Vec<String>,
}

fn main() {
    if let Err(err) = run() {
        eprintln!("mutrace: {err}");
        std::process::exit(1);
    }
}

fn run() -> Result<(), String> {
    let args = std::env::args().skip(1).collect::<Vec<_>>();
    let launch = match parse_args(args)? {
        Invocation::Help => {
            println!("{}", usage());
            return Ok(());
        }
        Invocation::Launch(launch) => launch,
    };

    let library = resolve_library(
        launch.library.clone(),
        std::env::var_os(LIBRARY_VAR),
        std::env::current_exe().ok(),
    )?;
    let preload = prepend_preload(&library, std::env::var_os(PRELOAD_VAR));

    let err = Command::new(&launch.program)
        .args(&launch.args)
        .envs(launch.env.iter().map(|(key, value)| (*key, value)))
        .env(PRELOAD_VAR, preload)
        .exec();
    Err(format!("failed to run {}: {err}", launch.program))
}

fn parse_args(args: Vec<String>) -> Result<Invocation, String> {
    let mut launch = Launch::default();
    let mut i = 0usize;
    while i < args.len() {
        let flag = args[i].as_str();
        let var = match flag {
            "-h" | "--help" => return Ok(Invocation::Help),
            "--" => {
                i += 1;
                break;
            }
            "--hash-size" => HASH_SIZE_VAR,
            "--frames" => FRAMES_VAR,
            "--locked-min" => LOCKED_MIN_VAR,
            "--owner-changed-min" => OWNER_CHANGED_MIN_VAR,
            "--contended-min" => CONTENDED_MIN_VAR,
            "--json" => JSON_VAR,
            "--library" => LIBRARY_VAR,
            other if other.starts_with('-') => {
                return Err(format!("unknown flag: {other}\n\n{}", usage()));
            }
            _ => break,
        };

        i += 1;
        let Some(value) = args.get(i) else {
            return Err(format!("missing value for {flag}"));
        };
        match var {
            LIBRARY_VAR => launch.library = Some(PathBuf::from(value)),
            JSON_VAR => launch.env.push((var, value.clone())),
            _ => {
                let positive = var == HASH_SIZE_VAR || var == FRAMES_VAR;
                match parse_ulong(value) {
                    Some(0) if positive => {
                        return Err(format!("invalid {flag}: must be positive"));
                    }
                    Some(_) => launch.env.push((var, value.clone())),
                    None => return Err(format!("invalid {flag}: {value}")),
                }
            }
        }
        i += 1;
    }

    let Some(program) = args.get(i) else {
        return Err(format!("missing program to run\n\n{}", usage()));
    };
    launch.program = program.clone();
    launch.args = args[i + 1..].to_vec();
    Ok(Invocation::Launch(launch))
}

/// `--library`, then `MUTRACE_LIBRARY`, then `libmutrace.so` next to us.
fn resolve_library(
    explicit: Option<PathBuf>,
    from_env: Option<OsString>,
    current_exe: Option<PathBuf>,
) -> Result<PathBuf, String> {
    let candidate = explicit
        .or_else(|| from_env.filter(|v| !v.is_empty()).map(PathBuf::from))
        .or_else(|| {
            current_exe
                .as_deref()
                .and_then(Path::parent)
                .map(|dir| dir.join(LIBRARY_FILE_NAME))
        })
        .ok_or_else(|| format!("cannot locate {LIBRARY_FILE_NAME}; pass --library"))?;

    if !candidate.is_file() {
        return Err(format!(
            "profiler library not found at {}",
            candidate.display()
        ));
    }
    // The dynamic linker resolves relative preload paths against the
    // program's working directory, not ours.
    std::path::absolute(&candidate)
        .map_err(|e| format!("failed to resolve {}: {e}", candidate.display()))
}

fn prepend_preload(library: &Path, existing: Option<OsString>) -> OsString {
    let mut preload = library.as_os_str().to_owned();
    if let Some(existing) = existing.filter(|v| !v.is_empty()) {
        preload.push(":");
        preload.push(existing);
    }
    preload
}

fn usage() -> String {
    [
        "Usage: mutrace [OPTIONS] [--] PROGRAM [ARGS...]",
        "",
        "Runs PROGRAM with the mutex profiler preloaded and prints a contention",
        "report to stderr when it exits.",
        "",
        "Options:",
        "  --hash-size N          number of registry shards (default 557)",
        "  --frames N             frames captured per first-use trace (default 16)",
        "  --locked-min N         only show mutexes locked at least N times (default 1)",
        "  --owner-changed-min N  only show mutexes whose owner changed at least N times (default 2)",
        "  --contended-min N      only show mutexes contended at least N times (default 0)",
        "  --json PATH            also write the report as JSON to PATH",
        "  --library PATH         profiler library to preload (default: libmutrace.so next to this binary)",
        "  -h, --help             show this help",
    ]
    .join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    fn launch(list: &[&str]) -> Launch {
        match parse_args(args(list)).unwrap() {
            Invocation::Launch(launch) => launch,
            Invocation::Help => panic!("expected a launch"),
        }
    }

    #[test]
    fn options_become_environment() {
        let launch = launch(&[
            "--hash-size",
            "0x3fd",
            "--frames",
            "32",
            "--owner-changed-min",
            "0",
            "--json",
            "/tmp/report.json",
            "./app",
            "--verbose",
            "input",
        ]);
        assert_eq!(
            launch.env,
            vec![
                (HASH_SIZE_VAR, "0x3fd".to_string()),
                (FRAMES_VAR, "32".to_string()),
                (OWNER_CHANGED_MIN_VAR, "0".to_string()),
                (JSON_VAR, "/tmp/report.json".to_string()),
            ]
        );
        assert_eq!(launch.program, "./app");
        assert_eq!(launch.args, args(&["--verbose", "input"]));
        assert_eq!(launch.library, None);
    }

    #[test]
    fn double_dash_ends_options() {
        let launch = launch(&["--library", "/opt/libmutrace.so", "--", "--weird-name", "-x"]);
        assert_eq!(launch.library, Some(PathBuf::from("/opt/libmutrace.so")));
        assert_eq!(launch.program, "--weird-name");
        assert_eq!(launch.args, args(&["-x"]));
    }

    #[test]
    fn help_wins() {
        assert_eq!(
            parse_args(args(&["--frames", "8", "-h", "./app"])).unwrap(),
            Invocation::Help
        );
    }

    #[test]
    fn rejects_bad_input() {
        let err = |list: &[&str]| parse_args(args(list)).unwrap_err();
        assert_eq!(err(&["--frames"]), "missing value for --frames");
        assert_eq!(err(&["--hash-size", "lots", "./app"]), "invalid --hash-size: lots");
        assert_eq!(
            err(&["--hash-size", "0", "./app"]),
            "invalid --hash-size: must be positive"
        );
        assert!(err(&["--bogus", "./app"]).starts_with("unknown flag: --bogus"));
        assert!(err(&[]).starts_with("missing program to run"));
        assert!(err(&["--locked-min", "2"]).starts_with("missing program to run"));
    }

    #[test]
    fn zero_is_a_valid_threshold() {
        let launch = launch(&["--contended-min", "0", "./app"]);
        assert_eq!(launch.env, vec![(CONTENDED_MIN_VAR, "0".to_string())]);
    }

    #[test]
    fn preload_is_prepended() {
        let lib = Path::new("/opt/mutrace/libmutrace.so");
        assert_eq!(prepend_preload(lib, None), OsString::from("/opt/mutrace/libmutrace.so"));
        assert_eq!(
            prepend_preload(lib, Some(OsString::new())),
            OsString::from("/opt/mutrace/libmutrace.so")
        );
        assert_eq!(
            prepend_preload(lib, Some(OsString::from("libother.so"))),
            OsString::from("/opt/mutrace/libmutrace.so:libother.so")
        );
    }

    #[test]
    fn library_lookup_order() {
        let dir = std::env::temp_dir().join(format!("mutrace-cli-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        let beside = dir.join(LIBRARY_FILE_NAME);
        let explicit = dir.join("explicit.so");
        std::fs::write(&beside, b"").unwrap();
        std::fs::write(&explicit, b"").unwrap();
        let exe = Some(dir.join("mutrace"));

        assert_eq!(
            resolve_library(Some(explicit.clone()), Some(beside.clone().into()), exe.clone()),
            Ok(explicit.clone())
        );
        assert_eq!(
            resolve_library(None, Some(explicit.clone().into()), exe.clone()),
            Ok(explicit.clone())
        );
        assert_eq!(resolve_library(None, None, exe.clone()), Ok(beside.clone()));
        assert_eq!(
            resolve_library(None, Some(OsString::new()), exe.clone()),
            Ok(beside.clone())
        );

        let missing = resolve_library(Some(dir.join("nope.so")), None, exe).unwrap_err();
        assert!(missing.starts_with("profiler library not found"));
        assert!(resolve_library(None, None, None).is_err());

        std::fs::remove_dir_all(&dir).unwrap();
    }
}
