mod diagnostics;

use std::collections::{HashMap, HashSet};
use std::time::{Duration, Instant};

use petgraph::Direction;
use petgraph::Graph;
use petgraph::graph::NodeIndex;
use petgraph::visit::{Dfs, Reversed};
use tokio::task::JoinSet;
use tracing::{Instrument, Level};
use tracing_indicatif::span_ext::IndicatifSpanExt;

use crate::blueprint::{Task, Website};
use crate::core::Environment;
use crate::error::BuildError;
use crate::utils::{PROGRESS_STYLE, TASK_STYLE};

pub use diagnostics::Diagnostics;

#[derive(Debug, Clone)]
pub struct TaskExecution {
    pub start: Instant,
    pub duration: Duration,
}

/// (index, result, start, duration)
type Outcome = (NodeIndex, anyhow::Result<()>, Instant, Duration);

/// The task itself and everything it transitively depends on.
pub(crate) fn closure(graph: &Graph<Task, ()>, index: NodeIndex) -> HashSet<NodeIndex> {
    let reversed = Reversed(graph);
    let mut dfs = Dfs::new(reversed, index);

    let mut nodes = HashSet::new();
    while let Some(nx) = dfs.next(reversed) {
        nodes.insert(nx);
    }

    nodes
}

/// This function executes a subset of the task graph on the tokio runtime.
/// Tasks are spawned as soon as all of their dependencies have completed
/// successfully.
///
/// The algorithm works as follows:
/// 1. For each task to run, count its dependencies that are also in the set.
/// 2. The tasks with no pending dependencies are spawned.
/// 3. The scheduler waits for any task to finish. On success, the dependency
///    counts of all tasks that depend on it are decremented, and those that
///    reach zero are spawned.
/// 4. On failure, nothing new is spawned. The tasks already in flight are
///    awaited, and the first failure is returned.
pub(crate) async fn run_tasks(
    site: &Website,
    env: &std::sync::Arc<Environment>,
    nodes_to_run: &HashSet<NodeIndex>,
) -> Result<Diagnostics, BuildError> {
    // Build a map from a dependency to the nodes that depend on it.
    let mut dependents: HashMap<NodeIndex, Vec<NodeIndex>> = HashMap::new();
    for edge in site.graph.raw_edges() {
        dependents
            .entry(edge.source())
            .or_default()
            .push(edge.target());
    }

    // A dependency only counts if it's also in the set of nodes to run.
    let mut dependency_counts: HashMap<NodeIndex, usize> = nodes_to_run
        .iter()
        .map(|&i| {
            (
                i,
                site.graph
                    .neighbors_directed(i, Direction::Incoming)
                    .filter(|dep| nodes_to_run.contains(dep))
                    .count(),
            )
        })
        .collect();

    let total_tasks = nodes_to_run.len() as u64;
    if total_tasks == 0 {
        return Ok(Diagnostics::default());
    }

    let root_span = tracing::span!(Level::INFO, "building_tasks");
    root_span.pb_set_length(total_tasks);
    root_span.pb_set_style(&PROGRESS_STYLE);
    root_span.pb_set_message("Building tasks...");

    let mut set: JoinSet<Outcome> = JoinSet::new();
    let mut running: HashMap<tokio::task::Id, NodeIndex> = HashMap::new();
    let mut execution_times = HashMap::new();
    let mut failure: Option<BuildError> = None;

    let spawn_task = |set: &mut JoinSet<Outcome>,
                      running: &mut HashMap<tokio::task::Id, NodeIndex>,
                      index: NodeIndex| {
        let task = &site.graph[index];

        let span = tracing::span!(parent: &root_span, Level::INFO, "task", name = %task.name);
        span.pb_set_style(&TASK_STYLE);
        span.pb_set_message(&format!("Running {}", task.name));

        let future = (task.action)(env.clone());
        let handle = set.spawn(
            async move {
                let start = Instant::now();
                let result = future.await;
                (index, result, start, start.elapsed())
            }
            .instrument(span),
        );

        running.insert(handle.id(), index);
    };

    for &index in nodes_to_run {
        if dependency_counts.get(&index).copied().unwrap_or(0) == 0 {
            spawn_task(&mut set, &mut running, index);
        }
    }

    while let Some(joined) = set.join_next().await {
        root_span.pb_inc(1);

        let (index, result, start, duration) = match joined {
            Ok(ok) => ok,
            Err(err) => {
                let name = running
                    .get(&err.id())
                    .map(|&index| site.graph[index].name.clone())
                    .unwrap_or_default();

                let msg = match err.try_into_panic() {
                    Ok(panic) => panic_message(panic),
                    Err(err) => err.to_string(),
                };

                tracing::error!(task = %name, "task panicked: {msg}");
                failure.get_or_insert(BuildError::Panic(name, msg));
                continue;
            }
        };

        let name = &site.graph[index].name;

        if let Err(source) = result {
            tracing::error!(task = %name, "task failed");
            failure.get_or_insert(BuildError::Task {
                name: name.clone(),
                source,
            });
            continue;
        }

        tracing::debug!(task = %name, ?duration, "task finished");
        execution_times.insert(name.clone(), TaskExecution { start, duration });

        if failure.is_some() {
            continue;
        }

        // Unlock dependents
        if let Some(dependents_of_completed) = dependents.get(&index) {
            for &dependent in dependents_of_completed {
                if let Some(count) = dependency_counts.get_mut(&dependent) {
                    *count -= 1;
                    if *count == 0 {
                        spawn_task(&mut set, &mut running, dependent);
                    }
                }
            }
        }
    }

    match failure {
        Some(err) => Err(err),
        None => Ok(Diagnostics { execution_times }),
    }
}

fn panic_message(panic: Box<dyn std::any::Any + Send>) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        String::from("unknown payload")
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{Arc, Mutex};

    use tokio::sync::Notify;

    use super::*;
    use crate::blueprint::Blueprint;
    use crate::config::{Config, Params};
    use crate::core::Mode;

    fn env() -> Arc<Environment> {
        let config = Config::resolve(Params::default()).unwrap();
        Arc::new(Environment::new(Mode::Build, config))
    }

    type Log = Arc<Mutex<Vec<String>>>;

    /// Registers a task that logs when it starts and when it ends.
    fn logged(blueprint: &mut Blueprint, log: &Log, name: &'static str, deps: &[&str]) {
        let log = log.clone();
        blueprint
            .register(name, deps, move |_| {
                let log = log.clone();
                async move {
                    log.lock().unwrap().push(format!("start {name}"));
                    tokio::task::yield_now().await;
                    log.lock().unwrap().push(format!("end {name}"));
                    Ok(())
                }
            })
            .unwrap();
    }

    fn position(log: &Log, entry: &str) -> usize {
        let log = log.lock().unwrap();
        log.iter()
            .position(|e| e == entry)
            .unwrap_or_else(|| panic!("{entry} missing from {log:?}"))
    }

    #[tokio::test]
    async fn test_dependencies_finish_before_dependents_start() {
        let log = Log::default();
        let mut blueprint = Blueprint::new();
        logged(&mut blueprint, &log, "compile-css", &[]);
        logged(&mut blueprint, &log, "compile-js", &[]);
        logged(&mut blueprint, &log, "process-data", &[]);
        logged(&mut blueprint, &log, "build", &["compile-css", "compile-js", "process-data"]);
        let website = blueprint.finish();

        let diagnostics = website.run("build", &env()).await.unwrap();

        let build_start = position(&log, "start build");
        for dep in ["compile-css", "compile-js", "process-data"] {
            assert!(position(&log, &format!("end {dep}")) < build_start);
        }
        assert_eq!(diagnostics.execution_times.len(), 4);
    }

    #[tokio::test]
    async fn test_failed_dependency_skips_dependents() {
        let invoked = Arc::new(AtomicUsize::new(0));
        let mut blueprint = Blueprint::new();

        blueprint
            .register("a", &[], |_| async { anyhow::bail!("broken stylesheet") })
            .unwrap();

        let counter = invoked.clone();
        blueprint
            .register("b", &["a"], move |_| {
                counter.fetch_add(1, Ordering::SeqCst);
                async { Ok(()) }
            })
            .unwrap();

        let err = blueprint.finish().run("b", &env()).await.unwrap_err();

        assert_eq!(invoked.load(Ordering::SeqCst), 0);
        assert_eq!(err.task(), Some("a"));
        assert!(err.to_string().contains("broken stylesheet"));
    }

    #[tokio::test]
    async fn test_independent_tasks_run_concurrently() {
        // "slow" can only finish after "fast" signalled, so a sequential
        // executor starting with "slow" would never complete.
        let signal = Arc::new(Notify::new());
        let log = Log::default();
        let mut blueprint = Blueprint::new();

        let (wait, l) = (signal.clone(), log.clone());
        blueprint
            .register("slow", &[], move |_| {
                let (wait, l) = (wait.clone(), l.clone());
                async move {
                    wait.notified().await;
                    l.lock().unwrap().push("end slow".into());
                    Ok(())
                }
            })
            .unwrap();

        let (notify, l) = (signal.clone(), log.clone());
        blueprint
            .register("fast", &[], move |_| {
                let (notify, l) = (notify.clone(), l.clone());
                async move {
                    l.lock().unwrap().push("end fast".into());
                    notify.notify_one();
                    Ok(())
                }
            })
            .unwrap();

        logged(&mut blueprint, &log, "build", &["slow", "fast"]);
        let website = blueprint.finish();

        tokio::time::timeout(Duration::from_secs(5), website.run("build", &env()))
            .await
            .expect("executor deadlocked")
            .unwrap();

        assert!(position(&log, "end fast") < position(&log, "end slow"));
        assert!(position(&log, "end slow") < position(&log, "start build"));
    }

    #[tokio::test]
    async fn test_run_only_touches_the_closure() {
        let log = Log::default();
        let mut blueprint = Blueprint::new();
        logged(&mut blueprint, &log, "a", &[]);
        logged(&mut blueprint, &log, "b", &["a"]);
        logged(&mut blueprint, &log, "unrelated", &[]);
        let website = blueprint.finish();

        let diagnostics = website.run("b", &env()).await.unwrap();

        assert!(diagnostics.ran("a") && diagnostics.ran("b"));
        assert!(!diagnostics.ran("unrelated"));
        assert!(!log.lock().unwrap().iter().any(|e| e.contains("unrelated")));
    }

    #[tokio::test]
    async fn test_invoke_skips_dependencies() {
        let log = Log::default();
        let mut blueprint = Blueprint::new();
        logged(&mut blueprint, &log, "a", &[]);
        logged(&mut blueprint, &log, "b", &["a"]);
        let website = blueprint.finish();

        website.invoke("b", &env()).await.unwrap();

        assert_eq!(*log.lock().unwrap(), vec!["start b", "end b"]);
    }

    #[tokio::test]
    async fn test_panicking_task_is_a_failure() {
        let mut blueprint = Blueprint::new();
        blueprint
            .register("boom", &[], |_| async {
                if true {
                    panic!("kaboom");
                }
                Ok(())
            })
            .unwrap();

        let err = blueprint.finish().run("boom", &env()).await.unwrap_err();

        assert!(matches!(err, BuildError::Panic(ref name, ref msg) if name == "boom" && msg == "kaboom"));
    }

    #[tokio::test]
    async fn test_unknown_task() {
        let website = Blueprint::new().finish();
        assert!(matches!(
            website.run("build", &env()).await,
            Err(BuildError::UnknownTask(_))
        ));
    }

    #[tokio::test]
    async fn test_in_flight_tasks_settle_before_failure_is_reported() {
        let finished = Arc::new(AtomicUsize::new(0));
        let mut blueprint = Blueprint::new();

        blueprint
            .register("fails", &[], |_| async { anyhow::bail!("nope") })
            .unwrap();

        let counter = finished.clone();
        blueprint
            .register("sibling", &[], move |_| {
                let counter = counter.clone();
                async move {
                    tokio::task::yield_now().await;
                    counter.fetch_add(1, Ordering::SeqCst);
                    Ok(())
                }
            })
            .unwrap();

        blueprint
            .register("build", &["fails", "sibling"], |_| async { Ok(()) })
            .unwrap();

        let err = blueprint.finish().run("build", &env()).await.unwrap_err();

        assert_eq!(err.task(), Some("fails"));
        assert_eq!(finished.load(Ordering::SeqCst), 1);
    }
}
