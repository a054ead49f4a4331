use std::sync::mpsc::Sender;

use camino::{Utf8Path, Utf8PathBuf};

use crate::config::Config;

/// The mode in which the orchestrator is running.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    /// A one-time build.
    Build,
    /// A continuous watch mode for development.
    Watch,
}

/// Sending half of the live reload channel.
///
/// Every file written by a pipeline is announced through this handle. Delivery
/// is best-effort: if nobody is listening anymore the notification is dropped.
#[derive(Debug, Clone)]
pub struct Reloader {
    tx: Sender<Utf8PathBuf>,
}

impl Reloader {
    pub fn new(tx: Sender<Utf8PathBuf>) -> Self {
        Self { tx }
    }

    pub fn notify(&self, path: &Utf8Path) {
        if self.tx.send(path.to_path_buf()).is_err() {
            tracing::trace!(%path, "live reload channel closed, notification dropped");
        }
    }
}

/// Global, read-only state available to every task and stage.
///
/// Built once per run and shared behind an `Arc`; nothing in here changes
/// while tasks execute.
#[derive(Debug, Clone)]
pub struct Environment {
    /// The name of the generator (defaults to "cardsmith").
    pub generator: &'static str,
    /// The current run mode (Build or Watch).
    pub mode: Mode,
    /// The resolved build configuration.
    pub config: Config,
    /// The port of the live reload server (if running).
    pub port: Option<u16>,
    pub(crate) reloader: Option<Reloader>,
}

impl Environment {
    pub fn new(mode: Mode, config: Config) -> Self {
        Self {
            generator: "cardsmith",
            mode,
            config,
            port: None,
            reloader: None,
        }
    }

    /// Attach a live reload channel, announced to templates on `port`.
    pub fn with_reloader(mut self, reloader: Reloader, port: u16) -> Self {
        self.reloader = Some(reloader);
        self.port = Some(port);
        self
    }

    pub(crate) fn notify(&self, path: &Utf8Path) {
        if let Some(reloader) = &self.reloader {
            reloader.notify(path);
        }
    }

    /// Returns a JavaScript snippet to enable live-reloading.
    ///
    /// If the orchestrator is running in `Watch` mode with a live reload
    /// server, this returns a script that connects to the WebSocket server and
    /// reloads the page on every reload command.
    pub fn get_refresh_script(&self) -> Option<String> {
        if self.mode != Mode::Watch {
            return None;
        }

        self.port.map(|port| {
            format!(
                r#"
const socket = new WebSocket("ws://localhost:{port}");
socket.addEventListener("message", event => {{
    const message = JSON.parse(event.data);
    if (message.command === "reload") window.location.reload();
}});
"#
            )
        })
    }

    /// Root of the output tree for the selected target.
    pub fn out_dir(&self) -> &Utf8Path {
        &self.config.out_dir
    }

    pub(crate) fn out_path(&self, relative: impl AsRef<Utf8Path>) -> Utf8PathBuf {
        self.config.out_dir.join(relative)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Params;

    #[test]
    fn test_refresh_script_only_in_watch_mode() {
        let config = Config::resolve(Params::default()).unwrap();
        let (tx, _rx) = std::sync::mpsc::channel();

        let build = Environment::new(Mode::Build, config.clone())
            .with_reloader(Reloader::new(tx.clone()), 35729);
        assert!(build.get_refresh_script().is_none());

        let watch = Environment::new(Mode::Watch, config).with_reloader(Reloader::new(tx), 35729);
        let script = watch.get_refresh_script().unwrap();
        assert!(script.contains("ws://localhost:35729"));
    }

    #[test]
    fn test_notify_without_listener_is_silent() {
        let config = Config::resolve(Params::default()).unwrap();
        let (tx, rx) = std::sync::mpsc::channel();
        drop(rx);

        let env = Environment::new(Mode::Watch, config).with_reloader(Reloader::new(tx), 1);
        env.notify(Utf8Path::new("nw/index.html"));
    }
}
