use std::io::IsTerminal;
use std::time::Duration;

use clap::Parser;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::Layer;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

use manage::cli::{Cli, Command, MachineArg, OutputFormat};
use manage::commands::{self, RunOptions};
use manage::context::Context;
use manage::error::ManageError;
use manage::progress::OutputMode;
use manage::{config, logging, paths};

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    if let Err(err) = run(cli).await {
        let code = err.exit_code();
        eprintln!("{:?}", miette::Report::new(err));
        std::process::exit(code);
    }
}

async fn run(cli: Cli) -> Result<(), ManageError> {
    let command = cli.command.unwrap_or(Command::Tui(MachineArg { machine: None }));
    let tui = matches!(command, Command::Tui(_));
    let mode = resolve_output_mode(cli.output, cli.verbose, cli.quiet);

    // Terminal layer: silent while the TUI or the progress spinners own the
    // terminal, since stray stderr output corrupts their redraws.
    let terminal_filter = match mode {
        _ if tui => EnvFilter::new("off"),
        OutputMode::Verbose => EnvFilter::new("debug"),
        OutputMode::Normal | OutputMode::Quiet => EnvFilter::new("off"),
        OutputMode::Plain => {
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("manage=info"))
        }
    };

    let terminal_layer = tracing_subscriber::fmt::layer()
        .with_writer(std::io::stderr)
        .with_filter(terminal_filter);

    // File layer: always captures manage=debug once the log file is open.
    let (file_writer, file_handle) = logging::DeferredFileWriter::new();
    let file_layer = tracing_subscriber::fmt::layer()
        .with_ansi(false)
        .with_writer(file_writer)
        .with_filter(EnvFilter::new("manage=debug"));

    tracing_subscriber::registry()
        .with(terminal_layer)
        .with(file_layer)
        .init();

    let log_file = paths::app_log_file();
    if let Some(dir) = log_file.parent() {
        std::fs::create_dir_all(dir).ok();
    }
    if let Err(e) = file_handle.set_file(&log_file) {
        tracing::warn!(path = %log_file.display(), error = %e, "could not open log file");
    }

    let settings = config::load_settings(cli.config.as_deref())?;
    let source = settings
        .path
        .as_ref()
        .map_or_else(|| "defaults".to_string(), |p| p.display().to_string());
    tracing::info!(config = %source, flake = %settings.flake_dir().display(), "starting");

    let ctx = Context::new(settings)?;
    let opts = RunOptions {
        target: ctx.target(cli.remote.as_deref())?,
        yes: cli.yes,
        timeout: cli.timeout.map(Duration::from_secs),
        mode,
        json: cli.output == OutputFormat::Json,
    };

    commands::run(&ctx, &opts, command).await
}

/// Map `--output` (plus `--verbose`/`--quiet`) to a `StepProgress` mode.
/// `Auto` means spinners on a terminal and plain lines otherwise.
fn resolve_output_mode(format: OutputFormat, verbose: bool, quiet: bool) -> OutputMode {
    let interactive = std::io::stdout().is_terminal() && std::io::stdin().is_terminal();
    match format {
        // JSON goes to stdout; progress never draws over it.
        OutputFormat::Json => OutputMode::Quiet,
        OutputFormat::Plain => OutputMode::Plain,
        OutputFormat::Auto if !interactive => OutputMode::Plain,
        OutputFormat::Auto => {
            if quiet {
                OutputMode::Quiet
            } else if verbose {
                OutputMode::Verbose
            } else {
                OutputMode::Normal
            }
        }
    }
}
