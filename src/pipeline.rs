//! The generic file transform engine.
//!
//! Every compile task is an instantiation of [`Pipeline`] with its own source
//! globs, stage list and destination. A run enumerates the sources afresh,
//! pushes each file through the stages concurrently, writes whatever survives
//! under the output directory and announces every written file to the live
//! reload channel.

use std::collections::BTreeSet;
use std::num::NonZeroUsize;
use std::sync::Arc;

use camino::{Utf8Path, Utf8PathBuf};
use glob::{Pattern, glob};
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{debug, warn};

use crate::core::Environment;
use crate::error::{ItemError, PipelineError, StageError};
use crate::output::{relative_to, write_file};
use crate::stage::{Item, Stage, StageContext, apply_all};

/// What to do when a single item fails.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FailurePolicy {
    /// Fail the whole invocation.
    #[default]
    Abort,
    /// Log a warning, leave the item out and carry on.
    Skip,
}

/// Outcome of a successful pipeline run.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct PipelineReport {
    /// Every file written, as a full path under the output directory.
    pub written: Vec<Utf8PathBuf>,
    /// Number of source files left out under [`FailurePolicy::Skip`].
    pub skipped: usize,
}

/// A source glob set bound to a list of stages and a destination.
#[derive(Debug, Clone)]
pub struct Pipeline {
    name: String,
    base: Utf8PathBuf,
    sources: Vec<String>,
    stages: Vec<Stage>,
    dest: Utf8PathBuf,
    policy: FailurePolicy,
    /// Items in flight at once.
    limit: usize,
}

impl Pipeline {
    /// Creates a pipeline reading from `base`, relative to the project root.
    ///
    /// Source globs are relative to `base`, and the part of a matched path
    /// below `base` is preserved under the destination directory.
    pub fn new(name: impl Into<String>, base: impl Into<Utf8PathBuf>) -> Self {
        Self {
            name: name.into(),
            base: base.into(),
            sources: Vec::new(),
            stages: Vec::new(),
            dest: Utf8PathBuf::new(),
            policy: FailurePolicy::default(),
            limit: std::thread::available_parallelism().map_or(4, NonZeroUsize::get),
        }
    }

    pub fn source(mut self, glob: impl Into<String>) -> Self {
        self.sources.push(glob.into());
        self
    }

    pub fn stage(mut self, stage: Stage) -> Self {
        self.stages.push(stage);
        self
    }

    /// Destination directory, relative to the output directory.
    pub fn dest(mut self, dir: impl Into<Utf8PathBuf>) -> Self {
        self.dest = dir.into();
        self
    }

    pub fn on_error(mut self, policy: FailurePolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Cap the number of items processed at the same time, at least one.
    pub fn max_concurrency(mut self, limit: usize) -> Self {
        self.limit = limit.max(1);
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn destination(&self) -> &Utf8Path {
        &self.dest
    }

    /// List the files currently matching the source globs.
    fn enumerate(&self, root: &Utf8Path) -> Result<BTreeSet<Utf8PathBuf>, PipelineError> {
        let base = root.join(&self.base);
        let prefix = Pattern::escape(base.as_str());

        let mut paths = BTreeSet::new();
        for source in &self.sources {
            for path in glob(&format!("{prefix}/{source}"))? {
                let path = Utf8PathBuf::try_from(path?)?;
                if path.is_file() {
                    paths.insert(path);
                }
            }
        }

        Ok(paths)
    }

    /// Run the pipeline once.
    ///
    /// Items are processed concurrently and may finish in any order; the call
    /// only returns after every item was handled.
    pub async fn run(&self, env: &Arc<Environment>) -> Result<PipelineReport, PipelineError> {
        let root = &env.config.root;
        let base = root.join(&self.base);
        let paths = self.enumerate(root)?;

        debug!(pipeline = %self.name, files = paths.len(), "running pipeline");

        let stages: Arc<[Stage]> = self.stages.clone().into();
        let dest = env.out_path(&self.dest);
        let cx = StageContext {
            env: env.clone(),
            base: base.clone(),
        };

        let permits = Arc::new(Semaphore::new(self.limit));

        let mut set = JoinSet::new();
        for path in paths {
            let relative = relative_to(&path, &base).unwrap_or_else(|| path.clone());

            let stages = stages.clone();
            let dest = dest.clone();
            let cx = cx.clone();
            let permits = permits.clone();

            set.spawn(async move {
                let _permit = permits.acquire_owned().await.ok();
                let result = process(&path, relative, stages, &dest, cx).await;
                (path, result)
            });
        }

        let mut report = PipelineReport::default();
        let mut failure = None;

        while let Some(joined) = set.join_next().await {
            let (path, result) = match joined {
                Ok(ok) => ok,
                Err(e) => std::panic::resume_unwind(e.into_panic()),
            };

            match result {
                Ok(written) => report.written.extend(written),
                Err(source) => match self.policy {
                    FailurePolicy::Skip => {
                        warn!(pipeline = %self.name, %path, error = %source, "skipping file");
                        report.skipped += 1;
                    }
                    FailurePolicy::Abort => {
                        failure.get_or_insert(PipelineError::Item {
                            pipeline: self.name.clone(),
                            path,
                            source,
                        });
                    }
                },
            }
        }

        if let Some(err) = failure {
            return Err(err);
        }

        report.written.sort();
        Ok(report)
    }
}

/// Read, transform and write a single source file.
async fn process(
    path: &Utf8Path,
    relative: Utf8PathBuf,
    stages: Arc<[Stage]>,
    dest: &Utf8Path,
    cx: StageContext,
) -> Result<Vec<Utf8PathBuf>, ItemError> {
    let data = tokio::fs::read(path).await?;
    let env = cx.env.clone();

    let items = tokio::task::spawn_blocking(move || {
        apply_all(&stages, &cx, Item::new(relative, data))
    })
    .await
    .map_err(StageError::from)??;

    let mut written = Vec::with_capacity(items.len());
    for item in items {
        let target = dest.join(&item.path);
        write_file(&target, &item.data).await?;

        let announced = relative_to(&target, env.out_dir()).unwrap_or_else(|| target.clone());
        env.notify(&announced);

        written.push(target);
    }

    Ok(written)
}

#[cfg(test)]
mod tests {
    use std::io::Cursor;

    use super::*;
    use crate::config::{Config, Params};
    use crate::core::{Mode, Reloader};
    use crate::stage::CARD_THUMBNAIL;

    struct Project {
        _dir: tempfile::TempDir,
        root: Utf8PathBuf,
    }

    impl Project {
        fn new() -> Self {
            let dir = tempfile::tempdir().unwrap();
            let root = Utf8PathBuf::try_from(dir.path().to_path_buf()).unwrap();
            Self { _dir: dir, root }
        }

        fn file(&self, path: &str, data: impl AsRef<[u8]>) -> &Self {
            let path = self.root.join(path);
            std::fs::create_dir_all(path.parent().unwrap()).unwrap();
            std::fs::write(path, data).unwrap();
            self
        }

        fn env(&self) -> Arc<Environment> {
            let config = Config::resolve(Params {
                root: Some(self.root.clone()),
                ..Default::default()
            })
            .unwrap();
            Arc::new(Environment::new(Mode::Build, config))
        }
    }

    fn png(width: u32, height: u32) -> Vec<u8> {
        let mut out = Cursor::new(Vec::new());
        image::DynamicImage::new_rgba8(width, height)
            .write_to(&mut out, image::ImageFormat::Png)
            .unwrap();
        out.into_inner()
    }

    #[tokio::test]
    async fn test_preserves_structure_below_base() {
        let project = Project::new();
        project
            .file("src/js/app.js", "app")
            .file("src/js/views/deck.js", "deck")
            .file("src/js/notes.txt", "skip me");

        let env = project.env();
        let report = Pipeline::new("compile-js", "src/js")
            .source("**/*.js")
            .dest("js")
            .run(&env)
            .await
            .unwrap();

        let out = &env.config.out_dir;
        assert_eq!(
            report.written,
            vec![out.join("js/app.js"), out.join("js/views/deck.js")]
        );
        assert_eq!(std::fs::read_to_string(out.join("js/views/deck.js")).unwrap(), "deck");
        assert!(!out.join("js/notes.txt").exists());
    }

    #[tokio::test]
    async fn test_rename_overrides_path() {
        let project = Project::new();
        project.file(
            "src/data/all-sets.json",
            r#"{"SetA":[{"id":"c1","name":"X"}],"SetB":[{"id":"c1","name":"Y"}]}"#,
        );

        let env = project.env();
        Pipeline::new("process-data", "src/data")
            .source("all-sets.json")
            .stage(Stage::Flatten)
            .stage(Stage::Rename("cards.json".into()))
            .dest("data")
            .run(&env)
            .await
            .unwrap();

        let out = env.config.out_dir.join("data");
        assert!(!out.join("all-sets.json").exists());

        let cards: serde_json::Value =
            serde_json::from_slice(&std::fs::read(out.join("cards.json")).unwrap()).unwrap();
        assert_eq!(cards, serde_json::json!({"c1": {"id": "c1", "name": "Y"}}));
    }

    #[tokio::test]
    async fn test_missing_base_yields_nothing() {
        let project = Project::new();

        let report = Pipeline::new("compile-bower", "src/bower_components")
            .source("**/*")
            .dest("lib")
            .run(&project.env())
            .await
            .unwrap();

        assert_eq!(report, PipelineReport::default());
    }

    #[tokio::test]
    async fn test_item_failure_aborts_the_run() {
        let project = Project::new();
        project
            .file("src/data/good.json", r#"{"S":[{"id":"a"}]}"#)
            .file("src/data/bad.json", r#"{"S":[{"name":"no id"}]}"#);

        let err = Pipeline::new("process-data", "src/data")
            .source("*.json")
            .stage(Stage::Flatten)
            .run(&project.env())
            .await
            .unwrap_err();

        match err {
            PipelineError::Item { pipeline, path, .. } => {
                assert_eq!(pipeline, "process-data");
                assert_eq!(path.file_name(), Some("bad.json"));
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn test_skip_policy_isolates_bad_items() {
        let project = Project::new();
        project
            .file("src/imgs/cards/imp.png", png(800, 600))
            .file("src/imgs/cards/tiny.png", png(50, 50))
            .file("src/imgs/cards/corrupt.png", b"definitely not a png");

        let env = project.env();
        let report = Pipeline::new("thumbnails", "src/imgs/cards")
            .source("*")
            .stage(Stage::Crop(CARD_THUMBNAIL))
            .dest("imgs/cards/thumbnails")
            .on_error(FailurePolicy::Skip)
            .run(&env)
            .await
            .unwrap();

        let thumbnail = env.config.out_dir.join("imgs/cards/thumbnails/imp.png");
        assert_eq!(report.written, vec![thumbnail.clone()]);
        assert_eq!(report.skipped, 2);

        let decoded = image::open(&thumbnail).unwrap();
        assert_eq!((decoded.width(), decoded.height()), (120, 40));
    }

    #[tokio::test]
    async fn test_notifies_every_written_file() {
        let project = Project::new();
        project
            .file("src/js/a.js", "a")
            .file("src/js/b.js", "b");

        let (tx, rx) = std::sync::mpsc::channel();
        let env = project.env();
        let env = Arc::new((*env).clone().with_reloader(Reloader::new(tx), 0));

        Pipeline::new("compile-js", "src/js")
            .source("*.js")
            .dest("js")
            .run(&env)
            .await
            .unwrap();

        let mut notified: Vec<_> = rx.try_iter().collect();
        notified.sort();
        assert_eq!(
            notified,
            vec![Utf8PathBuf::from("js/a.js"), Utf8PathBuf::from("js/b.js")]
        );
    }

    #[tokio::test]
    async fn test_bounded_concurrency_processes_every_item() {
        let project = Project::new();
        for i in 0..12 {
            project.file(&format!("src/imgs/cards/card{i:02}.png"), png(307, 465));
        }

        let env = project.env();
        for limit in [0, 1, 3] {
            let pipeline = Pipeline::new("thumbnails", "src/imgs/cards")
                .source("*.png")
                .stage(Stage::Crop(CARD_THUMBNAIL))
                .dest(format!("thumbnails-{limit}"))
                .max_concurrency(limit);
            let run = pipeline.run(&env);

            let report = tokio::time::timeout(std::time::Duration::from_secs(30), run)
                .await
                .expect("pipeline stalled")
                .unwrap();

            assert_eq!(report.written.len(), 12, "limit {limit}");
        }
    }

    #[test]
    fn test_concurrency_is_at_least_one() {
        assert_eq!(Pipeline::new("p", "src").max_concurrency(0).limit, 1);
        assert!(Pipeline::new("p", "src").limit >= 1);
    }

    #[tokio::test]
    async fn test_overlapping_globs_visit_once() {
        let project = Project::new();
        project.file("src/js/app.js", "app");

        let report = Pipeline::new("compile-js", "src/js")
            .source("*.js")
            .source("app.*")
            .dest("js")
            .run(&project.env())
            .await
            .unwrap();

        assert_eq!(report.written.len(), 1);
    }
}
