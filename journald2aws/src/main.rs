//! journald2aws - ship the systemd journal to AWS CloudWatch Logs
//!
//! Tails `journalctl --follow`, posts batches with `PutLogEvents` and records
//! the last shipped cursor so a restart resumes where it left off.
//!
//! Configuration is read from `--config-file`, else
//! `$XDG_CONFIG_HOME/journald2aws/config.toml` (~/.config/journald2aws/config.toml).
//! Credentials may also come from `AWS_ACCESS_KEY_ID` / `AWS_SECRET_ACCESS_KEY`.

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use journald2aws_core::{logging, Config, JournalctlToAwsDriver};

#[derive(Parser)]
#[command(name = "journald2aws")]
#[command(about = "Ship the systemd journal to AWS CloudWatch Logs")]
#[command(version)]
struct Args {
    /// Config file (TOML, or JSON with a .json extension)
    #[arg(long)]
    config_file: Option<PathBuf>,

    /// Verbose output
    #[arg(short, long)]
    verbose: bool,

    /// Start after this journal cursor (overrides the cursor file)
    #[arg(long)]
    after_cursor: Option<String>,

    /// Start at this time, in any format journalctl accepts
    #[arg(long)]
    since: Option<String>,

    /// Build requests but do not send them
    #[arg(long)]
    dry_run: bool,
}

impl Args {
    fn apply(&self, config: &mut Config) {
        if let Some(c) = &self.after_cursor {
            config.journalctl_after_cursor = Some(c.clone());
        }
        if let Some(s) = &self.since {
            config.journalctl_since = Some(s.clone());
        }
        if self.dry_run {
            config.aws_dry_run = true;
        }
    }
}

fn run() -> Result<i32> {
    let args = Args::parse();

    let config_path = Config::resolve_path(args.config_file.as_deref());
    let mut config = Config::load(args.config_file.as_deref())
        .context("failed to load configuration")?
        .with_env_credentials();
    args.apply(&mut config);

    let _log_guard =
        logging::init(&config.logging, args.verbose).context("failed to initialize logging")?;

    match &config_path {
        Some(path) => tracing::info!(path = %path.display(), "Loaded configuration"),
        None => tracing::info!(
            path = %Config::config_path().display(),
            "No config file found, using defaults"
        ),
    }

    let mut driver = JournalctlToAwsDriver::new(config).context("failed to start journald2aws")?;

    let stop = driver.stop_handle();
    ctrlc::set_handler(move || {
        tracing::info!("Interrupt received, stopping");
        stop.stop();
    })
    .context("failed to install signal handler")?;

    let reason = driver.run().context("journald2aws failed")?;
    if reason.exit_code() == 0 {
        tracing::info!(reason = %reason, "Exiting");
    } else {
        tracing::error!(reason = %reason, "Exiting");
    }
    Ok(reason.exit_code())
}

fn main() {
    let code = match run() {
        Ok(code) => code,
        Err(e) => {
            eprintln!("Error: {:#}", e);
            1
        }
    };
    std::process::exit(code);
}
