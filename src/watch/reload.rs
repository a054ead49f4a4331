//! WebSocket side of live reload.
//!
//! Two threads: one accepts browser connections, the other broadcasts a
//! message for every path coming through the [`Reloader`] channel.

use std::net::{TcpListener, TcpStream};
use std::sync::mpsc::Receiver;
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;

use camino::{Utf8Path, Utf8PathBuf};
use tungstenite::WebSocket;

use crate::core::Reloader;

/// Conventional live reload port.
pub const PORT: u16 = 35729;

/// Only the newest connections are kept open.
const MAX_CLIENTS: usize = 10;

type Clients = Arc<Mutex<Vec<WebSocket<TcpStream>>>>;

pub(crate) fn reserve_port() -> std::io::Result<(TcpListener, u16)> {
    let listener = match TcpListener::bind(("127.0.0.1", PORT)) {
        Ok(sock) => sock,
        Err(_) => TcpListener::bind("127.0.0.1:0")?,
    };

    let addr = listener.local_addr()?;
    let port = addr.port();
    Ok((listener, port))
}

/// Start both threads, returning once they are running.
pub(crate) fn start(listener: TcpListener, rx: Receiver<Utf8PathBuf>) -> (JoinHandle<()>, JoinHandle<()>) {
    let clients = Clients::default();

    let incoming = new_thread_ws_incoming(listener, clients.clone());
    let broadcast = new_thread_ws_reload(rx, clients);

    (incoming, broadcast)
}

/// Creates the channel pipelines announce written files on.
pub(crate) fn channel() -> (Reloader, Receiver<Utf8PathBuf>) {
    let (tx, rx) = std::sync::mpsc::channel();
    (Reloader::new(tx), rx)
}

pub(crate) fn message(path: &Utf8Path) -> String {
    serde_json::json!({ "command": "reload", "path": path.as_str() }).to_string()
}

fn new_thread_ws_incoming(server: TcpListener, clients: Clients) -> JoinHandle<()> {
    std::thread::spawn(move || {
        for stream in server.incoming() {
            let Ok(stream) = stream else {
                continue;
            };

            let socket = match tungstenite::accept(stream) {
                Ok(socket) => socket,
                Err(e) => {
                    tracing::debug!("live reload handshake failed: {e}");
                    continue;
                }
            };

            match clients.lock() {
                Ok(mut clients) => clients.push(socket),
                Err(_) => return,
            }
        }
    })
}

fn new_thread_ws_reload(rx: Receiver<Utf8PathBuf>, clients: Clients) -> JoinHandle<()> {
    std::thread::spawn(move || {
        while let Ok(path) = rx.recv() {
            let Ok(mut clients) = clients.lock() else {
                return;
            };

            let text = message(&path);
            let mut broken = vec![];

            for (i, socket) in clients.iter_mut().enumerate() {
                match socket.send(text.as_str().into()) {
                    Ok(_) => {}
                    Err(tungstenite::error::Error::Io(e)) => {
                        if e.kind() == std::io::ErrorKind::BrokenPipe {
                            broken.push(i);
                        }
                    }
                    Err(
                        tungstenite::error::Error::ConnectionClosed
                        | tungstenite::error::Error::AlreadyClosed,
                    ) => broken.push(i),
                    Err(e) => {
                        tracing::error!("live reload error: {e:?}");
                    }
                }
            }

            for i in broken.into_iter().rev() {
                clients.remove(i);
            }

            // Close all but the last 10 connections
            let len = clients.len();
            if len > MAX_CLIENTS {
                for mut socket in clients.drain(0..len - MAX_CLIENTS) {
                    socket.close(None).ok();
                }
            }

            tracing::trace!(%path, clients = clients.len(), "live reload sent");
        }
    })
}
