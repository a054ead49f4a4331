use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use petgraph::Graph;
use petgraph::graph::NodeIndex;

use crate::core::Environment;
use crate::error::{BuildError, GraphError};
use crate::executor::{self, Diagnostics};

/// Future produced by a task action.
pub type TaskFuture = Pin<Box<dyn Future<Output = anyhow::Result<()>> + Send>>;

pub(crate) type TaskFn = Arc<dyn Fn(Arc<Environment>) -> TaskFuture + Send + Sync>;

/// A named unit of build work.
pub(crate) struct Task {
    pub(crate) name: String,
    pub(crate) dependencies: Vec<String>,
    pub(crate) action: TaskFn,
}

impl std::fmt::Debug for Task {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Task")
            .field("name", &self.name)
            .field("dependencies", &self.dependencies)
            .finish_non_exhaustive()
    }
}

/// The blueprint of a build.
///
/// `Blueprint` is used to define the task graph. Tasks are registered by name
/// together with the names of the tasks they depend on, which must already be
/// registered. This keeps the graph acyclic by construction.
///
/// Once configured, you convert this into a [`Website`] to execute the build.
///
/// # Example
///
/// ```rust,no_run
/// use cardsmith::Blueprint;
///
/// let mut blueprint = Blueprint::new();
/// blueprint.register("clean", &[], |_env| async { Ok(()) })?;
/// blueprint.register("build", &["clean"], |_env| async { Ok(()) })?;
/// let website = blueprint.finish();
/// # Ok::<(), cardsmith::GraphError>(())
/// ```
#[derive(Default)]
pub struct Blueprint {
    pub(crate) graph: Graph<Task, ()>,
    pub(crate) index: HashMap<String, NodeIndex>,
}

impl Blueprint {
    /// Creates a new, empty blueprint.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a task.
    ///
    /// The action is called every time the task runs and gets the shared,
    /// immutable environment of the run.
    pub fn register<F, Fut>(
        &mut self,
        name: impl Into<String>,
        dependencies: &[&str],
        action: F,
    ) -> Result<(), GraphError>
    where
        F: Fn(Arc<Environment>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        let name = name.into();

        if self.index.contains_key(&name) {
            return Err(GraphError::Duplicate(name));
        }

        let mut edges = Vec::with_capacity(dependencies.len());
        for &dependency in dependencies {
            match self.index.get(dependency) {
                Some(&index) => edges.push(index),
                None => {
                    return Err(GraphError::UnknownDependency {
                        task: name,
                        dependency: dependency.to_string(),
                    });
                }
            }
        }

        let action: TaskFn = Arc::new(move |env| Box::pin(action(env)));
        let index = self.graph.add_node(Task {
            name: name.clone(),
            dependencies: dependencies.iter().map(|d| d.to_string()).collect(),
            action,
        });

        for dependency in edges {
            self.graph.add_edge(dependency, index, ());
        }

        self.index.insert(name, index);
        Ok(())
    }

    pub fn finish(self) -> Website {
        Website {
            graph: self.graph,
            index: self.index,
        }
    }
}

impl std::fmt::Display for Blueprint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "graph LR")?;

        for index in self.graph.node_indices() {
            let name = self.graph[index].name.replace('"', "\\\""); // Simple escape
            writeln!(f, "    {:?}[\"{}\"]", index.index(), name)?;
        }

        for edge in self.graph.raw_edges() {
            writeln!(
                f,
                "    {:?} --> {:?}",
                edge.source().index(),
                edge.target().index()
            )?;
        }

        Ok(())
    }
}

/// A frozen task graph, ready to be executed.
///
/// A [`Website`] is created from a [`Blueprint`] and can be run any number of
/// times, also concurrently for unrelated tasks.
pub struct Website {
    pub(crate) graph: Graph<Task, ()>,
    pub(crate) index: HashMap<String, NodeIndex>,
}

impl Website {
    pub fn contains(&self, name: &str) -> bool {
        self.index.contains_key(name)
    }

    /// Names of all registered tasks, in registration order.
    pub fn task_names(&self) -> impl Iterator<Item = &str> {
        self.graph.node_weights().map(|task| task.name.as_str())
    }

    /// Direct dependencies of a task.
    pub fn dependencies(&self, name: &str) -> Option<&[String]> {
        let index = self.index.get(name)?;
        Some(&self.graph[*index].dependencies)
    }

    pub(crate) fn lookup(&self, name: &str) -> Result<NodeIndex, BuildError> {
        self.index
            .get(name)
            .copied()
            .ok_or_else(|| BuildError::UnknownTask(name.to_string()))
    }

    /// Runs a task after all of its transitive dependencies.
    ///
    /// Independent tasks run concurrently. The first failure stops the
    /// scheduling of further tasks, and is returned once the tasks still in
    /// flight have settled.
    pub async fn run(
        &self,
        name: &str,
        env: &Arc<Environment>,
    ) -> Result<Diagnostics, BuildError> {
        let index = self.lookup(name)?;
        let closure = executor::closure(&self.graph, index);

        executor::run_tasks(self, env, &closure).await
    }

    /// Runs a single task's action, skipping its dependencies.
    pub async fn invoke(
        &self,
        name: &str,
        env: &Arc<Environment>,
    ) -> Result<Diagnostics, BuildError> {
        let index = self.lookup(name)?;
        let only = std::iter::once(index).collect();

        executor::run_tasks(self, env, &only).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn noop(_: Arc<Environment>) -> impl Future<Output = anyhow::Result<()>> + Send {
        async { Ok(()) }
    }

    #[test]
    fn test_register_duplicate() {
        let mut blueprint = Blueprint::new();
        blueprint.register("a", &[], noop).unwrap();

        assert_eq!(
            blueprint.register("a", &[], noop),
            Err(GraphError::Duplicate("a".into()))
        );
    }

    #[test]
    fn test_register_unknown_dependency() {
        let mut blueprint = Blueprint::new();

        assert_eq!(
            blueprint.register("build", &["compile-css"], noop),
            Err(GraphError::UnknownDependency {
                task: "build".into(),
                dependency: "compile-css".into(),
            })
        );
        assert!(!blueprint.finish().contains("build"));
    }

    #[test]
    fn test_display_mermaid() {
        let mut blueprint = Blueprint::new();
        blueprint.register("a", &[], noop).unwrap();
        blueprint.register("b", &["a"], noop).unwrap();

        let text = blueprint.to_string();

        assert!(text.starts_with("graph LR\n"));
        assert!(text.contains("0[\"a\"]"));
        assert!(text.contains("0 --> 1"));
    }

    #[test]
    fn test_dependencies_lookup() {
        let mut blueprint = Blueprint::new();
        blueprint.register("a", &[], noop).unwrap();
        blueprint.register("b", &["a"], noop).unwrap();
        let website = blueprint.finish();

        assert_eq!(website.dependencies("b"), Some(&["a".to_string()][..]));
        assert_eq!(website.task_names().collect::<Vec<_>>(), vec!["a", "b"]);
        assert!(website.dependencies("c").is_none());
    }

    #[test]
    fn test_pattern_errors_compare() {
        let parse = || GraphError::from(glob::Pattern::new("src/[").unwrap_err());

        assert!(matches!(parse(), GraphError::Pattern(_)));
        assert_eq!(parse(), parse());
    }
}
