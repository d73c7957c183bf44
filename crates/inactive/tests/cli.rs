use std::path::{Path, PathBuf};
use std::process::{Command, Output};

use tempfile::TempDir;

fn inactive_bin() -> PathBuf {
    PathBuf::from(env!("CARGO_BIN_EXE_inactive"))
}

fn run_cli(home: &Path, args: &[&str]) -> Output {
    Command::new(inactive_bin())
        .args(args)
        .env("INACTIVE_HOME", home)
        .env_remove("INACTIVE_CONFIG")
        .env("RUST_LOG", "error")
        .output()
        .expect("failed to execute inactive CLI")
}

fn assert_success(output: &Output, args: &impl std::fmt::Debug) {
    assert!(
        output.status.success(),
        "command failed: {:?}\nstdout:\n{}\nstderr:\n{}",
        args,
        String::from_utf8_lossy(&output.stdout),
        String::from_utf8_lossy(&output.stderr)
    );
}

fn stdout_lines(output: &Output) -> Vec<String> {
    String::from_utf8_lossy(&output.stdout)
        .lines()
        .map(str::to_string)
        .collect()
}

#[test]
fn json_backend_round_trip() {
    let tmp = TempDir::new().unwrap();
    let store = tmp.path().join("inactive_db.json");
    let backend = format!("json:{}", store.display());
    let base = ["--backend", backend.as_str(), "--namespace", "hosts.txt"];

    let run = |extra: &[&str]| -> (Output, Vec<String>) {
        let args: Vec<&str> = base.iter().chain(extra.iter()).copied().collect();
        let output = run_cli(tmp.path(), &args);
        (output, args.into_iter().map(str::to_string).collect())
    };

    let (output, args) = run(&["contains", "example.org"]);
    assert_eq!(output.status.code(), Some(1), "{:?}", args);

    let (output, args) = run(&["add", "b.example", "INACTIVE"]);
    assert_success(&output, &args);
    let (output, args) = run(&["add", "a.example", "INACTIVE"]);
    assert_success(&output, &args);

    let (output, args) = run(&["contains", "a.example"]);
    assert_success(&output, &args);

    let (output, args) = run(&["tested"]);
    assert_success(&output, &args);
    assert_eq!(stdout_lines(&output), vec!["a.example", "b.example"]);

    let (output, args) = run(&["due"]);
    assert_success(&output, &args);
    assert!(stdout_lines(&output).is_empty());

    let (output, args) = run(&["remove", "a.example"]);
    assert_success(&output, &args);
    let (output, _) = run(&["contains", "a.example"]);
    assert_eq!(output.status.code(), Some(1));

    assert!(store.exists());
}

#[test]
fn sqlite_backend_via_config_file() {
    let tmp = TempDir::new().unwrap();
    let db = tmp.path().join("inactive.sqlite3");
    let config = tmp.path().join("inactive.toml");
    std::fs::write(
        &config,
        format!(
            "days_between_retest = 2\n\n[backend]\ntype = \"sqlite\"\npath = {:?}\n",
            db.to_string_lossy()
        ),
    )
    .unwrap();
    let config_arg = config.to_string_lossy().to_string();

    let args = ["--config", config_arg.as_str(), "-n", "list", "add", "x.example", "INACTIVE"];
    let output = run_cli(tmp.path(), &args);
    assert_success(&output, &args);

    let args = ["--config", config_arg.as_str(), "-n", "list", "contains", "x.example"];
    let output = run_cli(tmp.path(), &args);
    assert_success(&output, &args);
    assert!(db.exists());
}

#[test]
fn config_command_prints_resolved_json() {
    let tmp = TempDir::new().unwrap();
    let args = ["--days", "3", "config"];
    let output = run_cli(tmp.path(), &args);
    assert_success(&output, &args);

    let value: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    assert_eq!(value["days_between_retest"], 3);
    assert_eq!(value["enabled"], true);
    assert_eq!(value["backend"]["type"], "json");
}

#[test]
fn bad_table_name_fails_with_error_status() {
    let tmp = TempDir::new().unwrap();
    let config = tmp.path().join("inactive.toml");
    std::fs::write(&config, "[backend]\ntype = \"sqlite\"\ntable = \"x; DROP\"\n").unwrap();
    let config_arg = config.to_string_lossy().to_string();

    let output = run_cli(tmp.path(), &["--config", config_arg.as_str(), "due"]);
    assert_eq!(output.status.code(), Some(2));
}
