//! Watch mode is implemented as a three-part system:
//!
//! 1. **File watcher**: Uses the `notify` crate to monitor the source tree
//!    recursively. Events are debounced for 250 ms so one save triggers one
//!    rebuild.
//! 2. **Bindings**: Every changed path is matched against a table of source
//!    patterns, each owned by a single task. Only that task is re-invoked, its
//!    dependencies are not.
//! 3. **Live reload**: Every file the rebuild writes is pushed to connected
//!    browsers over a WebSocket (see [`reload`]).
//!
//! ## The Loop
//!
//! The initial full build has to succeed before anything else starts. After
//! that, the controller reacts to two kinds of messages: filesystem events and
//! finished rebuilds. A task is never rebuilt twice at the same time; a change
//! that arrives while its task is running is remembered and causes exactly one
//! more run once the current one is done.

pub mod reload;

use std::collections::{HashMap, HashSet};
use std::net::TcpListener;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use camino::{Utf8Path, Utf8PathBuf};
use glob::{MatchOptions, Pattern};
use notify::{EventKind, RecursiveMode};
use notify_debouncer_full::{DebounceEventResult, new_debouncer};
use tokio::sync::mpsc::{UnboundedSender, unbounded_channel};
use tracing::{error, info, warn};

use crate::blueprint::Website;
use crate::config::Config;
use crate::core::{Environment, Mode};
use crate::error::WatchError;
use crate::output::relative_to;

const DEBOUNCE: Duration = Duration::from_millis(250);

const MATCH: MatchOptions = MatchOptions {
    case_sensitive: true,
    require_literal_separator: true,
    require_literal_leading_dot: false,
};

/// A source pattern and the task that rebuilds it.
#[derive(Debug, Clone)]
pub struct Binding {
    pub pattern: Pattern,
    pub task: String,
}

/// Table mapping changed source paths to tasks.
#[derive(Debug, Clone, Default)]
pub struct Bindings(Vec<Binding>);

impl Bindings {
    /// Compile a table of `(pattern, task)` pairs, patterns relative to the
    /// project root.
    pub fn new(table: &[(&str, &str)]) -> Result<Self, glob::PatternError> {
        let bindings = table
            .iter()
            .map(|&(pattern, task)| {
                Ok(Binding {
                    pattern: Pattern::new(pattern)?,
                    task: task.to_string(),
                })
            })
            .collect::<Result<_, glob::PatternError>>()?;

        Ok(Self(bindings))
    }

    /// The task owning `path`, relative to the project root. The first
    /// matching binding wins.
    pub fn task_for(&self, path: &Utf8Path) -> Option<&str> {
        self.0
            .iter()
            .find(|binding| binding.pattern.matches_with(path.as_str(), MATCH))
            .map(|binding| binding.task.as_str())
    }

    /// Existing directories under `root` to watch recursively.
    fn roots(&self, root: &Utf8Path) -> Vec<Utf8PathBuf> {
        let roots = self
            .0
            .iter()
            .filter_map(|binding| {
                let dir = resolve_watch_root(root, binding.pattern.as_str());
                if dir.is_none() {
                    warn!(pattern = binding.pattern.as_str(), "nothing to watch for pattern");
                }
                dir
            })
            .collect();

        collapse_watch_paths(roots)
    }
}

/// Tracks which tasks are rebuilding and which need another run.
#[derive(Debug, Default)]
struct Slots {
    /// In-flight tasks, mapped to whether a change arrived during the run.
    running: HashMap<String, bool>,
}

impl Slots {
    /// Ask for a rebuild. Returns `true` if it should start right away.
    fn request(&mut self, task: &str) -> bool {
        match self.running.get_mut(task) {
            Some(pending) => {
                *pending = true;
                false
            }
            None => {
                self.running.insert(task.to_string(), false);
                true
            }
        }
    }

    /// Mark a rebuild as finished. Returns `true` if it has to run once more.
    fn finish(&mut self, task: &str) -> bool {
        match self.running.get_mut(task) {
            Some(pending) if *pending => {
                *pending = false;
                true
            }
            _ => {
                self.running.remove(task);
                false
            }
        }
    }
}

/// Turns change notifications into serialized single-task rebuilds.
struct Controller {
    website: Arc<Website>,
    env: Arc<Environment>,
    root: Utf8PathBuf,
    bindings: Bindings,
    slots: Slots,
    done: UnboundedSender<String>,
}

impl Controller {
    /// Handle the paths of one batch of events. Each affected task is
    /// requested once per batch.
    fn changed<'a>(&mut self, paths: impl IntoIterator<Item = &'a Path>, kind: EventKind) {
        let mut tasks = HashSet::new();

        for path in paths {
            let Some(path) = Utf8Path::from_path(path) else {
                continue;
            };
            let Some(relative) = relative_to(path, &self.root) else {
                continue;
            };
            let Some(task) = self.bindings.task_for(&relative) else {
                continue;
            };

            info!(path = %relative, ?kind, "change detected");
            tasks.insert(task.to_string());
        }

        for task in tasks {
            if self.slots.request(&task) {
                self.spawn(task);
            }
        }
    }

    fn finished(&mut self, task: String) {
        if self.slots.finish(&task) {
            self.spawn(task);
        }
    }

    fn spawn(&self, task: String) {
        let website = self.website.clone();
        let env = self.env.clone();
        let done = self.done.clone();

        tokio::spawn(async move {
            info!(%task, "re-running task...");
            match website.invoke(&task, &env).await {
                Ok(diagnostics) => {
                    info!(%task, elapsed = ?diagnostics.elapsed(), "rebuild complete, watching for changes...")
                }
                Err(e) => error!("rebuild failed: {e}"),
            }
            done.send(task).ok();
        });
    }
}

/// Build everything once, then rebuild on changes until the process is
/// terminated.
pub async fn watch(website: Website, config: Config, bindings: Bindings) -> Result<(), WatchError> {
    let (tcp, _) = reload::reserve_port()?;
    run(website, config, bindings, tcp).await
}

/// [`watch`] with live reload clients accepted on `tcp`.
async fn run(
    website: Website,
    config: Config,
    bindings: Bindings,
    tcp: TcpListener,
) -> Result<(), WatchError> {
    let root = config.root.canonicalize_utf8()?;

    let port = tcp.local_addr()?.port();
    let (reloader, reload_rx) = reload::channel();
    let env = Arc::new(Environment::new(Mode::Watch, config).with_reloader(reloader, port));
    let website = Arc::new(website);

    info!("running initial build...");
    let diagnostics = website.run(crate::assets::BUILD, &env).await?;
    info!(elapsed = ?diagnostics.elapsed(), "initial build completed");

    let _threads = reload::start(tcp, reload_rx);
    info!(port, "live reload listening");

    #[cfg(feature = "server")]
    let _thread_http = crate::server::start(env.out_dir().to_path_buf());

    let (tx, mut rx) = unbounded_channel::<DebounceEventResult>();
    let mut debouncer = new_debouncer(DEBOUNCE, None, move |result: DebounceEventResult| {
        tx.send(result).ok();
    })?;

    for path in bindings.roots(&root) {
        info!(%path, "watching");
        debouncer.watch(path.as_std_path(), RecursiveMode::Recursive)?;
    }

    let (done_tx, mut done_rx) = unbounded_channel();
    let mut controller = Controller {
        website,
        env,
        root,
        bindings,
        slots: Slots::default(),
        done: done_tx,
    };

    loop {
        tokio::select! {
            Some(result) = rx.recv() => match result {
                Ok(events) => {
                    for de in events {
                        if matches!(de.event.kind, EventKind::Create(_) | EventKind::Modify(_) | EventKind::Remove(_)) {
                            controller.changed(de.event.paths.iter().map(|p| p.as_path()), de.event.kind);
                        }
                    }
                }
                Err(errors) => {
                    for e in errors {
                        error!("watch error: {e:?}");
                    }
                }
            },
            Some(task) = done_rx.recv() => controller.finished(task),
            else => return Ok(()),
        }
    }
}

/// The static directory part of a glob, the part that has to be watched.
///
/// Patterns pointing at a single file watch the parent directory so atomic
/// writes are caught. Returns `None` if the directory doesn't exist.
fn resolve_watch_root(root: &Utf8Path, glob: &str) -> Option<Utf8PathBuf> {
    let path = Utf8Path::new(glob);

    // Split path into static root and dynamic suffix (containing wildcards)
    let static_part: Utf8PathBuf = path
        .components()
        .take_while(|c| !c.as_str().contains(['*', '?', '[']))
        .collect();

    let mut dir = root.join(static_part);
    if dir.is_file() || (!dir.exists() && dir.extension().is_some()) {
        dir.pop();
    }

    dir.is_dir().then_some(dir)
}

/// Reduces a set of paths to the minimal set of watch roots.
///
/// If we watch `/a` and `/a/b`, we only need to watch `/a` because
/// the watcher is recursive. This function sorts the paths and filters
/// out any path that is a subdirectory of a previously accepted path.
fn collapse_watch_paths(mut paths: Vec<Utf8PathBuf>) -> Vec<Utf8PathBuf> {
    paths.sort();
    paths.dedup();

    let mut filtered: Vec<Utf8PathBuf> = Vec::new();
    for path in paths {
        if let Some(last) = filtered.last()
            && path.starts_with(last)
        {
            continue;
        }
        filtered.push(path);
    }

    filtered
}
