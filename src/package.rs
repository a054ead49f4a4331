//! Handoff to the external desktop packager.
//!
//! The packager is an external program (by default `nwbuild`) that bundles
//! the build output together with the runtime dependencies listed in
//! `package.json` into desktop executables.

use std::process::Stdio;

use camino::Utf8PathBuf;
use indexmap::IndexMap;
use serde::Deserialize;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::Command;
use tracing::info;

use crate::config::Config;
use crate::error::PackageError;

/// How to invoke the packager.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PackagerOptions {
    pub program: String,
    /// Version of the desktop runtime to bundle.
    pub version: String,
    pub platforms: Vec<String>,
    /// Where the packager puts the executables, relative to the project root.
    pub release_dir: Utf8PathBuf,
}

impl Default for PackagerOptions {
    fn default() -> Self {
        Self {
            program: "nwbuild".into(),
            version: "0.12.2".into(),
            platforms: ["osx32", "osx64", "win32", "win64"]
                .into_iter()
                .map(String::from)
                .collect(),
            release_dir: "release".into(),
        }
    }
}

#[derive(Deserialize)]
struct PackageInfo {
    #[serde(default)]
    dependencies: IndexMap<String, serde_json::Value>,
}

/// Globs of everything that goes into the package, relative to the project
/// root: the manifest, the whole output tree and each runtime dependency.
pub fn files(config: &Config) -> Result<Vec<String>, PackageError> {
    let manifest = std::fs::read(config.path("package.json"))?;
    let info: PackageInfo = serde_json::from_slice(&manifest)?;

    let out_dir = config
        .out_dir
        .strip_prefix(&config.root)
        .unwrap_or(&config.out_dir);

    let mut files = vec!["package.json".to_string(), format!("{out_dir}/**/*")];
    files.extend(
        info.dependencies
            .keys()
            .map(|name| format!("node_modules/{name}/**/*")),
    );

    Ok(files)
}

fn command(config: &Config, options: &PackagerOptions, files: &[String]) -> Command {
    let mut cmd = Command::new(&options.program);
    cmd.current_dir(&config.root)
        .arg("--version")
        .arg(&options.version)
        .arg("--platforms")
        .arg(options.platforms.join(","))
        .arg("--buildDir")
        .arg(&options.release_dir)
        .args(files)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped());
    cmd
}

/// Run the packager and wait for it to finish, forwarding its output to the
/// log line by line.
pub async fn package(config: &Config, options: &PackagerOptions) -> Result<(), PackageError> {
    let files = files(config)?;

    info!(
        program = %options.program,
        version = %options.version,
        platforms = %options.platforms.join(","),
        "packaging {} file groups",
        files.len()
    );

    let mut child = command(config, options, &files)
        .spawn()
        .map_err(|source| PackageError::Spawn {
            program: options.program.clone(),
            source,
        })?;

    let stdout = child.stdout.take().map(forward);
    let stderr = child.stderr.take().map(forward);

    let status = child.wait().await?;

    for handle in [stdout, stderr].into_iter().flatten() {
        handle.await.ok();
    }

    if !status.success() {
        return Err(PackageError::Failed { status });
    }

    info!(release = %config.path(&options.release_dir), "all done!");
    Ok(())
}

fn forward<R>(reader: R) -> tokio::task::JoinHandle<()>
where
    R: AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let mut lines = BufReader::new(reader).lines();
        while let Ok(Some(line)) = lines.next_line().await {
            info!(target: "packager", "{line}");
        }
    })
}
