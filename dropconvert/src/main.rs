//! `dropconvert` command line host.
//!
//! Reads `dropconvert.toml` (or `--config`), prints diagnostics to stderr
//! through the log sink, and reports results on stdout.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Result;
use clap::{Parser, Subcommand};

use dropconvert::bootstrap::{BootstrapMode, bootstrap};
use dropconvert::exit_codes;
use dropconvert::io::config::{BridgeConfig, load_config};
use dropconvert::io::process::{ProcessInvoker, SystemInvoker};
use dropconvert::logging;
use dropconvert::orchestrator::ConversionOutcome;
use dropconvert::sink::{LogSink, SharedSink, StderrSink};
use dropconvert::worker::ConversionWorker;

#[derive(Parser)]
#[command(
    name = "dropconvert",
    version,
    about = "Convert dropped files and folders through an external converter"
)]
struct Cli {
    /// Config file. Defaults apply when it does not exist.
    #[arg(long, global = true, default_value = "dropconvert.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Locate the interpreter and check dependencies without installing anything.
    Doctor,
    /// Locate the interpreter and install missing dependencies.
    Bootstrap,
    /// Convert the given files and folders.
    Convert {
        #[arg(required = true)]
        paths: Vec<String>,
    },
}

fn main() {
    logging::init();
    let code = match run() {
        Ok(code) => code,
        Err(err) => {
            eprintln!("{:#}", err);
            exit_codes::FAILED
        }
    };
    std::process::exit(code);
}

fn run() -> Result<i32> {
    let cli = Cli::parse();
    let config = load_config(&cli.config)?;
    let invoker = Arc::new(SystemInvoker::new(config.output_limit_bytes));
    let sink: SharedSink = Arc::new(StderrSink);

    match cli.command {
        Command::Doctor => Ok(cmd_report(
            &config,
            invoker.as_ref(),
            sink.as_ref(),
            BootstrapMode::CheckOnly,
        )),
        Command::Bootstrap => Ok(cmd_report(
            &config,
            invoker.as_ref(),
            sink.as_ref(),
            BootstrapMode::Ensure,
        )),
        Command::Convert { paths } => cmd_convert(config, invoker, sink, &paths),
    }
}

fn cmd_report(
    config: &BridgeConfig,
    invoker: &dyn ProcessInvoker,
    sink: &dyn LogSink,
    mode: BootstrapMode,
) -> i32 {
    let report = bootstrap(config, invoker, sink, mode);
    for line in report.summary_lines(config) {
        println!("{line}");
    }
    if report.is_ready() {
        exit_codes::OK
    } else {
        exit_codes::FAILED
    }
}

fn cmd_convert(
    config: BridgeConfig,
    invoker: Arc<SystemInvoker>,
    sink: SharedSink,
    paths: &[String],
) -> Result<i32> {
    let worker = ConversionWorker::spawn(config, invoker, sink)?;
    let outcome = worker.convert(paths)?;
    worker.shutdown()?;

    match &outcome {
        ConversionOutcome::Succeeded(report) => println!(
            "converted {} file(s) and {} folder(s) in {}ms",
            report.files,
            report.directories,
            report.elapsed.as_millis()
        ),
        ConversionOutcome::Aborted(reason) => eprintln!("conversion aborted: {reason}"),
        ConversionOutcome::Failed(failure) => eprintln!("conversion failed: {failure}"),
    }
    Ok(exit_codes::for_outcome(&outcome))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_convert_collects_paths() {
        let cli = Cli::parse_from(["dropconvert", "convert", "a.docx", "b folder"]);
        match cli.command {
            Command::Convert { paths } => assert_eq!(paths, vec!["a.docx", "b folder"]),
            _ => panic!("expected convert"),
        }
        assert_eq!(cli.config, PathBuf::from("dropconvert.toml"));
    }

    #[test]
    fn parse_config_after_subcommand() {
        let cli = Cli::parse_from(["dropconvert", "doctor", "--config", "other.toml"]);
        assert!(matches!(cli.command, Command::Doctor));
        assert_eq!(cli.config, PathBuf::from("other.toml"));
    }

    #[test]
    fn convert_requires_paths() {
        assert!(Cli::try_parse_from(["dropconvert", "convert"]).is_err());
    }
}
