#![forbid(unsafe_code)]
#![doc = include_str!("../README.md")]

pub mod assets;
mod blueprint;
mod config;
mod core;
mod error;
mod executor;
mod output;
pub mod package;
mod pipeline;
#[cfg(feature = "server")]
mod server;
pub mod stage;
pub mod utils;
#[cfg(feature = "live")]
pub mod watch;

use std::sync::Arc;
use std::time::Instant;

use console::style;
use tracing::info;

pub use crate::blueprint::{Blueprint, TaskFuture, Website};
pub use crate::config::{BuildEnv, Config, Params, Target};
pub use crate::core::{Environment, Mode, Reloader};
pub use crate::error::*;
pub use crate::executor::{Diagnostics, TaskExecution};
pub use crate::package::PackagerOptions;
pub use crate::pipeline::{FailurePolicy, Pipeline, PipelineReport};
pub use crate::stage::{Item, Stage, StageContext};
use crate::utils::as_overhead;

/// Delete the output directory of the selected target.
fn clean(config: &Config) -> Result<(), CardsmithError> {
    let s = Instant::now();

    crate::output::clear_dir(&config.out_dir).map_err(CardsmithError::Clear)?;

    eprintln!("Cleaned {} {}", config.out_dir, as_overhead(s));
    Ok(())
}

async fn execute(
    task: &str,
    config: Config,
    clear: bool,
    packager: PackagerOptions,
) -> Result<Diagnostics, CardsmithError> {
    let s = Instant::now();
    let website = assets::website(packager)?;

    if clear {
        clean(&config)?;
    }

    eprintln!(
        "{} {} for {} ({})",
        style("Running").bold(),
        style(task).cyan(),
        style(&config.target).yellow(),
        config.env,
    );

    let env = Arc::new(Environment::new(Mode::Build, config));
    let diagnostics = website.run(task, &env).await?;

    info!("task timings:\n{}", diagnostics.summary());
    eprintln!("{} {}", style("Done").green().bold(), as_overhead(s));

    Ok(diagnostics)
}

/// Run every compile task once, writing the app into the target's output
/// directory.
pub async fn build(config: Config, clear: bool) -> Result<Diagnostics, CardsmithError> {
    execute(assets::BUILD, config, clear, PackagerOptions::default()).await
}

/// Build, then hand the output over to the desktop packager.
pub async fn deploy(
    config: Config,
    clear: bool,
    packager: PackagerOptions,
) -> Result<Diagnostics, CardsmithError> {
    execute(assets::DEPLOY, config, clear, packager).await
}

/// Build once, then keep rebuilding changed assets and reloading connected
/// clients until the process is terminated.
#[cfg(feature = "live")]
pub async fn watch(config: Config, clear: bool) -> Result<(), CardsmithError> {
    let website = assets::website(PackagerOptions::default())?;
    let bindings = watch::Bindings::new(assets::BINDINGS).map_err(WatchError::from)?;

    if clear {
        clean(&config)?;
    }

    eprintln!(
        "{} {} ({})",
        style("Watching").bold(),
        style(&config.target).yellow(),
        config.env,
    );

    watch::watch(website, config, bindings).await?;
    Ok(())
}
