use camino::Utf8PathBuf;
use thiserror::Error;

/// Errors raised while resolving invocation parameters into a [`Config`](crate::Config).
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("Unknown target '{0}' (strict mode accepts: nw, overwolf, web)")]
    UnknownTarget(String),

    #[error("Target '{0}' can't be used as an output directory name")]
    InvalidTarget(String),
}

/// Errors raised while flattening card data.
#[derive(Debug, Error)]
pub enum DataError {
    #[error("Malformed card data:\n{0}")]
    Json(#[from] serde_json::Error),

    #[error("Card #{index} in set '{set}' has no usable 'id' field")]
    MissingId { set: String, index: usize },
}

/// Errors raised by the thumbnail generator.
#[derive(Debug, Error)]
pub enum ImageError {
    #[error("Image processing error: {0}")]
    Image(#[from] image::ImageError),

    #[error(
        "Crop {width}x{height}+{x}+{y} doesn't fit into a {image_width}x{image_height} image"
    )]
    OutOfBounds {
        width: u32,
        height: u32,
        x: u32,
        y: u32,
        image_width: u32,
        image_height: u32,
    },
}

/// A single item failing a single stage.
#[derive(Debug, Error)]
pub enum StageError {
    #[error(transparent)]
    Data(#[from] DataError),

    #[error(transparent)]
    Image(#[from] ImageError),

    #[error("Template error: {0:#}")]
    Template(#[from] minijinja::Error),

    #[error("Sass compilation error: {0}")]
    Style(#[from] Box<grass::Error>),

    #[error("Source is not valid UTF-8: {0}")]
    Utf8(#[from] std::str::Utf8Error),

    #[error("Stage worker panicked")]
    Join(#[from] tokio::task::JoinError),
}

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("Couldn't compile glob pattern.\n{0}")]
    GlobPattern(#[from] glob::PatternError),

    #[error("Couldn't run glob.\n{0}")]
    Glob(#[from] glob::GlobError),

    #[error("Couldn't convert path to UTF-8.\n{0}")]
    PathFormat(#[from] camino::FromPathBufError),

    #[error("Pipeline '{pipeline}', file '{path}':\n{source}")]
    Item {
        pipeline: String,
        path: Utf8PathBuf,
        source: ItemError,
    },
}

/// The reason an item didn't make it to the output directory.
#[derive(Debug, Error)]
pub enum ItemError {
    #[error(transparent)]
    Stage(#[from] StageError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Errors raised while registering tasks in a [`Blueprint`](crate::Blueprint).
#[derive(Debug, Error, PartialEq, Eq)]
pub enum GraphError {
    #[error("Task '{0}' is already registered")]
    Duplicate(String),

    #[error("Task '{task}' depends on '{dependency}', which isn't registered yet")]
    UnknownDependency { task: String, dependency: String },

    #[error("Invalid file pattern: {0}")]
    Pattern(String),
}

impl From<glob::PatternError> for GraphError {
    fn from(err: glob::PatternError) -> Self {
        GraphError::Pattern(err.to_string())
    }
}

#[derive(Debug, Error)]
pub enum BuildError {
    #[error("Task '{0}' not found")]
    UnknownTask(String),

    #[error("Task '{name}':\n{source:#}")]
    Task { name: String, source: anyhow::Error },

    #[error("Task '{0}' panicked: {1}")]
    Panic(String, String),
}

impl BuildError {
    /// Name of the task the failure originated in, if any.
    pub fn task(&self) -> Option<&str> {
        match self {
            BuildError::UnknownTask(_) => None,
            BuildError::Task { name, .. } | BuildError::Panic(name, _) => Some(name),
        }
    }
}

#[cfg(feature = "live")]
#[derive(Debug, Error)]
pub enum WatchError {
    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Build(#[from] BuildError),

    #[error(transparent)]
    Notify(#[from] notify::Error),

    #[error(transparent)]
    Pattern(#[from] glob::PatternError),
}

#[derive(Debug, Error)]
pub enum PackageError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Couldn't read package.json:\n{0}")]
    Json(#[from] serde_json::Error),

    #[error("Couldn't start packager '{program}': {source}")]
    Spawn {
        program: String,
        source: std::io::Error,
    },

    #[error("Packager exited with {status}")]
    Failed { status: std::process::ExitStatus },
}

/// Top level error, returned from the public entry points.
#[derive(Debug, Error)]
pub enum CardsmithError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Graph(#[from] GraphError),

    #[error("Error while clearing the output directory:\n{0}")]
    Clear(std::io::Error),

    #[error("Error while building the application.\n{0}")]
    Build(#[from] BuildError),

    #[cfg(feature = "live")]
    #[error("Error while watching for file changes:\n{0}")]
    Watch(#[from] WatchError),

    #[error("Error while packaging the application.\n{0}")]
    Package(#[from] PackageError),
}
