use camino::Utf8PathBuf;
use clap::{Parser, Subcommand, ValueEnum};

use cardsmith::{Config, PackagerOptions, Params};

/// Asset build orchestrator for the card game app.
#[derive(Debug, Parser)]
#[command(name = "cardsmith", version, about)]
struct Cli {
    #[command(subcommand)]
    command: Option<Command>,

    /// Execution environment (development, production, or any other name).
    #[arg(long, env = "CARDSMITH_ENV", global = true)]
    env: Option<String>,

    /// Target runtime, also the name of the output directory.
    #[arg(long, env = "CARDSMITH_TARGET", global = true)]
    target: Option<String>,

    /// Project root containing `src/`.
    #[arg(long, global = true)]
    root: Option<Utf8PathBuf>,

    /// Only accept the known targets (nw, overwolf, web).
    #[arg(long, global = true)]
    strict: bool,

    /// Delete the output directory before building.
    #[arg(long, global = true)]
    clean: bool,

    /// Write the task graph, colored by how long each task took, to this file.
    #[arg(long, global = true, value_name = "FILE")]
    timings: Option<Utf8PathBuf>,

    /// Log level; overrides CARDSMITH_LOG.
    #[arg(long, value_enum, global = true)]
    log_level: Option<LogLevel>,
}

#[derive(Debug, Clone, Copy, Subcommand)]
enum Command {
    /// Build the app once (default).
    Build,
    /// Build, then rebuild on changes with live reload.
    Watch,
    /// Build, then package desktop executables.
    Deploy,
    /// Print the task graph as a mermaid flowchart.
    Graph,
}

/// Log level as exposed on the CLI.
#[derive(Debug, Copy, Clone, ValueEnum)]
enum LogLevel {
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

impl From<LogLevel> for tracing::Level {
    fn from(value: LogLevel) -> Self {
        match value {
            LogLevel::Error => tracing::Level::ERROR,
            LogLevel::Warn => tracing::Level::WARN,
            LogLevel::Info => tracing::Level::INFO,
            LogLevel::Debug => tracing::Level::DEBUG,
            LogLevel::Trace => tracing::Level::TRACE,
        }
    }
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    cardsmith::utils::init_logging(cli.log_level.map(Into::into))?;

    let config = Config::resolve(Params {
        env: cli.env,
        target: cli.target,
        root: cli.root,
        strict: cli.strict,
    })?;

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?;

    let diagnostics = match cli.command.unwrap_or(Command::Build) {
        Command::Build => runtime.block_on(cardsmith::build(config, cli.clean))?,
        Command::Deploy => {
            runtime.block_on(cardsmith::deploy(config, cli.clean, PackagerOptions::default()))?
        }
        #[cfg(feature = "live")]
        Command::Watch => return Ok(runtime.block_on(cardsmith::watch(config, cli.clean))?),
        #[cfg(not(feature = "live"))]
        Command::Watch => anyhow::bail!("watch mode requires the `live` feature"),
        Command::Graph => {
            print!("{}", cardsmith::assets::blueprint(PackagerOptions::default())?);
            return Ok(());
        }
    };

    if let Some(path) = &cli.timings {
        std::fs::write(path, cardsmith::assets::timings(&diagnostics)?)?;
        eprintln!("Timings written to {path}");
    }

    Ok(())
}
