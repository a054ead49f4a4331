//! The card game's asset graph.
//!
//! Every compile task owns one or more pipelines, `build` depends on all of
//! them and `deploy` hands the finished build to the packager.

use std::sync::Arc;

use camino::Utf8Path;
use tokio::task::JoinSet;
use tracing::{debug, info};

use crate::blueprint::{Blueprint, Website};
use crate::config::Target;
use crate::core::Environment;
use crate::error::GraphError;
use crate::executor::Diagnostics;
use crate::output::copy_file;
use crate::package::{PackagerOptions, package};
use crate::pipeline::{FailurePolicy, Pipeline};
use crate::stage::{CARD_THUMBNAIL, Stage};

pub const COMPILE_HTML: &str = "compile-html";
pub const COMPILE_CSS: &str = "compile-css";
pub const COMPILE_JS: &str = "compile-js";
pub const COMPILE_BOWER: &str = "compile-bower";
pub const PROCESS_DATA: &str = "process-data";
pub const PROCESS_CARD_IMAGES: &str = "process-card-images";
pub const BUILD: &str = "build";
pub const DEPLOY: &str = "deploy";

/// The tasks `build` is made of, in registration order.
pub const COMPILE_TASKS: &[&str] = &[
    COMPILE_HTML,
    COMPILE_CSS,
    COMPILE_JS,
    COMPILE_BOWER,
    PROCESS_DATA,
    PROCESS_CARD_IMAGES,
];

/// Source patterns watched in watch mode and the task each one re-runs.
/// Patterns are relative to the project root.
pub const BINDINGS: &[(&str, &str)] = &[
    ("src/**/*.jinja", COMPILE_HTML),
    ("src/css/**/*.scss", COMPILE_CSS),
    ("src/js/**/*.js", COMPILE_JS),
    ("src/data/all-sets.json", PROCESS_DATA),
    ("src/data/decks/*", PROCESS_DATA),
];

/// The pipelines owned by a compile task.
pub fn pipelines(task: &str) -> Result<Vec<Pipeline>, GraphError> {
    let pipelines = match task {
        COMPILE_HTML => vec![
            Pipeline::new(task, "src")
                .source("index.jinja")
                .stage(Stage::Template),
            Pipeline::new(task, "src/templates")
                .source("**/*.jinja")
                .stage(Stage::Template)
                .dest("templates"),
        ],
        COMPILE_CSS => vec![
            Pipeline::new(task, "src/css")
                .source("**/*.scss")
                .stage(Stage::exclude("_*.scss")?)
                .stage(Stage::Stylesheet)
                .dest("css"),
        ],
        COMPILE_JS => vec![Pipeline::new(task, "src/js").source("**/*.js").dest("js")],
        COMPILE_BOWER => vec![
            Pipeline::new(task, "src/bower_components")
                .source("**/*")
                .dest("lib"),
        ],
        PROCESS_DATA => vec![
            Pipeline::new(task, "src/data")
                .source("all-sets.json")
                .stage(Stage::Flatten)
                .stage(Stage::Rename("cards.json".into()))
                .dest("data"),
            Pipeline::new(task, "src/data/decks")
                .source("*")
                .dest("data/decks"),
        ],
        PROCESS_CARD_IMAGES => vec![
            Pipeline::new(task, "src/imgs").source("**/*").dest("imgs"),
            Pipeline::new(task, "src/imgs/cards")
                .source("*")
                .stage(Stage::Crop(CARD_THUMBNAIL))
                .dest("imgs/cards/thumbnails")
                .on_error(FailurePolicy::Skip),
        ],
        _ => vec![],
    };

    Ok(pipelines)
}

/// Run a task's pipelines concurrently. Fails with the first pipeline error
/// once all of them have settled.
async fn run_pipelines(pipelines: Arc<[Pipeline]>, env: Arc<Environment>) -> anyhow::Result<()> {
    let mut set = JoinSet::new();
    for pipeline in pipelines.iter().cloned() {
        let env = env.clone();
        set.spawn(async move {
            let result = pipeline.run(&env).await;
            (pipeline, result)
        });
    }

    let mut failure = None;
    while let Some(joined) = set.join_next().await {
        let (pipeline, result) = match joined {
            Ok(ok) => ok,
            Err(e) if e.is_panic() => std::panic::resume_unwind(e.into_panic()),
            Err(e) => return Err(e.into()),
        };

        match result {
            Ok(report) => debug!(
                pipeline = pipeline.name(),
                dest = %pipeline.destination(),
                written = report.written.len(),
                skipped = report.skipped,
                "pipeline finished"
            ),
            Err(e) => {
                failure.get_or_insert(e);
            }
        }
    }

    match failure {
        Some(e) => Err(e.into()),
        None => Ok(()),
    }
}

/// The Overwolf shell needs its manifest next to the built files.
async fn copy_manifest(env: Arc<Environment>) -> anyhow::Result<()> {
    if env.config.target != Target::Overwolf {
        return Ok(());
    }

    let from = env.config.src_dir().join("manifest.json");
    let to = env.out_path("manifest.json");
    copy_file(&from, &to).await?;

    info!(%to, "copied overwolf manifest");
    env.notify(Utf8Path::new("manifest.json"));
    Ok(())
}

/// Register the whole asset graph.
pub fn blueprint(packager: PackagerOptions) -> Result<Blueprint, GraphError> {
    let mut blueprint = Blueprint::new();

    for &task in COMPILE_TASKS {
        let pipelines: Arc<[Pipeline]> = pipelines(task)?.into();
        blueprint.register(task, &[], move |env| run_pipelines(pipelines.clone(), env))?;
    }

    blueprint.register(BUILD, COMPILE_TASKS, copy_manifest)?;

    let packager = Arc::new(packager);
    blueprint.register(DEPLOY, &[BUILD], move |env| {
        let packager = packager.clone();
        async move {
            package(&env.config, &packager).await?;
            Ok(())
        }
    })?;

    Ok(blueprint)
}

/// The asset graph, ready to run.
pub fn website(packager: PackagerOptions) -> Result<Website, GraphError> {
    Ok(blueprint(packager)?.finish())
}

/// The asset graph as a mermaid flowchart colored by the timings of a run.
pub fn timings(diagnostics: &Diagnostics) -> Result<String, GraphError> {
    Ok(diagnostics.render_mermaid(&website(PackagerOptions::default())?))
}
