//! Resolution of invocation parameters into an immutable build configuration.

use std::fmt::Display;

use camino::{Utf8Path, Utf8PathBuf};
use serde::Serialize;

use crate::error::ConfigError;

/// Execution environment of a build.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(into = "String")]
pub enum BuildEnv {
    Development,
    Production,
    /// Any other name, passed through to templates verbatim.
    Custom(String),
}

impl BuildEnv {
    pub fn parse(name: &str) -> Self {
        match name.trim() {
            "" | "development" | "dev" => BuildEnv::Development,
            "production" | "prod" => BuildEnv::Production,
            other => BuildEnv::Custom(other.to_string()),
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            BuildEnv::Development => "development",
            BuildEnv::Production => "production",
            BuildEnv::Custom(name) => name,
        }
    }
}

impl From<BuildEnv> for String {
    fn from(value: BuildEnv) -> Self {
        value.as_str().to_string()
    }
}

impl Display for BuildEnv {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Runtime the application is built for. The output directory is named after it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(into = "String")]
pub enum Target {
    /// The NW.js desktop shell, the primary target.
    Nw,
    /// The Overwolf in-game overlay, which needs a manifest next to the app.
    Overwolf,
    /// A plain browser build.
    Web,
    Other(String),
}

/// Project entries an output directory must never land on.
const RESERVED: &[&str] = &["src", "release", "node_modules", "package.json"];

impl Target {
    pub const DEFAULT: &'static str = "nw";

    pub fn as_str(&self) -> &str {
        match self {
            Target::Nw => "nw",
            Target::Overwolf => "overwolf",
            Target::Web => "web",
            Target::Other(name) => name,
        }
    }

    fn parse(name: &str, strict: bool) -> Result<Self, ConfigError> {
        let name = name.trim();

        if name.is_empty() || name == "." || name == ".." || name.contains(['/', '\\']) {
            return Err(ConfigError::InvalidTarget(name.to_string()));
        }

        if RESERVED.iter().any(|reserved| reserved.eq_ignore_ascii_case(name)) {
            return Err(ConfigError::InvalidTarget(name.to_string()));
        }

        match name {
            "nw" => Ok(Target::Nw),
            "overwolf" => Ok(Target::Overwolf),
            "web" => Ok(Target::Web),
            other if strict => Err(ConfigError::UnknownTarget(other.to_string())),
            other => Ok(Target::Other(other.to_string())),
        }
    }
}

impl From<Target> for String {
    fn from(value: Target) -> Self {
        value.as_str().to_string()
    }
}

impl Display for Target {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Raw invocation parameters, as they come from the command line.
#[derive(Debug, Clone, Default)]
pub struct Params {
    pub env: Option<String>,
    pub target: Option<String>,
    pub root: Option<Utf8PathBuf>,
    /// Reject targets outside of the known set.
    pub strict: bool,
}

/// Immutable parameters governing a build run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    pub env: BuildEnv,
    pub target: Target,
    /// Project root, every source glob is relative to it.
    pub root: Utf8PathBuf,
    /// `<root>/<target>`
    pub out_dir: Utf8PathBuf,
}

impl Config {
    pub fn resolve(params: Params) -> Result<Self, ConfigError> {
        let env = params
            .env
            .as_deref()
            .map(BuildEnv::parse)
            .unwrap_or(BuildEnv::Development);

        let target = Target::parse(
            params.target.as_deref().unwrap_or(Target::DEFAULT),
            params.strict,
        )?;

        let root = params.root.unwrap_or_else(|| Utf8PathBuf::from("."));
        let out_dir = root.join(target.as_str());

        let config = Self {
            env,
            target,
            root,
            out_dir,
        };

        // The output tree is cleared and written into, the sources must stay out of it.
        let src_dir = config.src_dir();
        if config.out_dir == config.root || src_dir.starts_with(&config.out_dir) {
            return Err(ConfigError::InvalidTarget(config.target.to_string()));
        }

        Ok(config)
    }

    /// Root of the source tree.
    pub fn src_dir(&self) -> Utf8PathBuf {
        self.root.join("src")
    }

    /// Resolve a path relative to the project root.
    pub fn path(&self, relative: impl AsRef<Utf8Path>) -> Utf8PathBuf {
        self.root.join(relative)
    }
}
