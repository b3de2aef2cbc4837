use journald2aws_core::Pidfile;
use std::fs;
use std::path::{Path, PathBuf};
use std::process::{Command, Output};
use tempfile::TempDir;

struct CliTestEnv {
    temp_dir: TempDir,
    home: PathBuf,
    xdg_config: PathBuf,
}

impl CliTestEnv {
    fn new() -> Self {
        let temp_dir = TempDir::new().expect("failed to create temp dir");
        let base = temp_dir.path().to_path_buf();
        let home = base.join("home");
        let xdg_config = base.join("xdg-config");

        fs::create_dir_all(&home).expect("failed to create HOME");
        fs::create_dir_all(&xdg_config).expect("failed to create XDG_CONFIG_HOME");

        Self {
            temp_dir,
            home,
            xdg_config,
        }
    }

    fn path(&self, name: &str) -> PathBuf {
        self.temp_dir.path().join(name)
    }

    /// Write a dry-run config whose "journalctl" prints `journal` then idles.
    fn write_config(&self, journal: &Path, extra: &str) -> PathBuf {
        let config = format!(
            r#"
pid_file = "{pid}"
cursor_file = "{cursor}"
aws_log_stream_name = "cli-test"
journalctl_cmd = ["sh", "-c", "cat \"$0\"; exec sleep 60", "{journal}"]
journalctl_sleep_secs = 0.1
join_timeout_secs = 5
{extra}
"#,
            pid = self.path("j2a.pid").display(),
            cursor = self.path("cursor").display(),
            journal = journal.display(),
            extra = extra,
        );
        let path = self.path("config.toml");
        fs::write(&path, config).expect("failed to write config");
        path
    }
}

fn write_journal(path: &Path, count: usize) {
    let lines: String = (0..count)
        .map(|i| {
            format!(
                "{{\"__CURSOR\":\"c{:05}\",\"__REALTIME_TIMESTAMP\":\"{}\",\"MESSAGE\":\"line {}\"}}\n",
                i,
                1_700_000_000_000_000u64 + i as u64,
                i
            )
        })
        .collect();
    fs::write(path, lines).expect("failed to write journal fixture");
}

fn run_bin(env: &CliTestEnv, args: &[&str]) -> Output {
    let bin_path = PathBuf::from(assert_cmd::cargo::cargo_bin!("journald2aws"));

    Command::new(bin_path)
        .args(args)
        .env("HOME", &env.home)
        .env("XDG_CONFIG_HOME", &env.xdg_config)
        .env_remove("AWS_ACCESS_KEY_ID")
        .env_remove("AWS_SECRET_ACCESS_KEY")
        .env_remove("RUST_LOG")
        .output()
        .unwrap_or_else(|e| panic!("failed to execute journald2aws: {e}"))
}

fn render(output: &Output) -> String {
    format!(
        "status: {}\nstdout:\n{}\nstderr:\n{}",
        output.status,
        String::from_utf8_lossy(&output.stdout),
        String::from_utf8_lossy(&output.stderr)
    )
}

#[test]
fn help_lists_flags() {
    let env = CliTestEnv::new();
    let output = run_bin(&env, &["--help"]);
    assert!(output.status.success(), "{}", render(&output));

    let stdout = String::from_utf8_lossy(&output.stdout);
    for flag in ["--config-file", "--verbose", "--after-cursor", "--since", "--dry-run"] {
        assert!(stdout.contains(flag), "missing {flag} in help:\n{stdout}");
    }
}

#[test]
fn missing_stream_name_fails() {
    let env = CliTestEnv::new();
    let output = run_bin(&env, &["--dry-run"]);

    assert_eq!(output.status.code(), Some(1), "{}", render(&output));
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("aws_log_stream_name"), "{}", render(&output));
    // Logged once logging is up, so it is not lost.
    assert!(stderr.contains("No config file found"), "{}", render(&output));
}

#[test]
fn missing_credentials_fail_without_dry_run() {
    let env = CliTestEnv::new();
    let journal = env.path("journal.jsonl");
    write_journal(&journal, 1);
    let config = env.write_config(&journal, "");

    let output = run_bin(&env, &["--config-file", config.to_str().unwrap()]);
    assert_eq!(output.status.code(), Some(1), "{}", render(&output));
    assert!(String::from_utf8_lossy(&output.stderr).contains("credentials"));
}

#[test]
fn dry_run_ships_journal_and_records_cursor() {
    let env = CliTestEnv::new();
    let journal = env.path("journal.jsonl");
    write_journal(&journal, 50);
    let config = env.write_config(&journal, "runtime_limit = 2");

    let output = run_bin(
        &env,
        &["--config-file", config.to_str().unwrap(), "--dry-run"],
    );
    assert!(output.status.success(), "{}", render(&output));
    assert!(
        String::from_utf8_lossy(&output.stderr).contains("Loaded configuration"),
        "{}",
        render(&output)
    );

    let cursor = fs::read_to_string(env.path("cursor")).expect("cursor file missing");
    assert_eq!(cursor.trim(), "c00049");

    // Pidfile is released and emptied on exit.
    assert_eq!(fs::read_to_string(env.path("j2a.pid")).unwrap(), "");
}

#[test]
fn held_pidfile_fails_fast() {
    let env = CliTestEnv::new();
    let journal = env.path("journal.jsonl");
    write_journal(&journal, 1);
    let config = env.write_config(&journal, "runtime_limit = 30");

    let _held = Pidfile::acquire(&env.path("j2a.pid")).expect("failed to lock pidfile");

    let output = run_bin(
        &env,
        &["--config-file", config.to_str().unwrap(), "--dry-run"],
    );
    assert_eq!(output.status.code(), Some(1), "{}", render(&output));
    assert!(
        String::from_utf8_lossy(&output.stderr).contains("lock contention"),
        "{}",
        render(&output)
    );
    assert!(!env.path("cursor").exists());
}
