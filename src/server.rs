//! Development HTTP server for the web target, started alongside watch mode.

use std::{net::SocketAddr, thread};

use axum::Router;
use camino::Utf8PathBuf;
use console::style;
use tower_http::services::ServeDir;
use tracing::info;

pub const PORT: u16 = 8080;

/// Serve `out_dir` on its own thread and runtime, so slow requests never
/// compete with rebuilds.
pub fn start(out_dir: Utf8PathBuf) -> thread::JoinHandle<Result<(), anyhow::Error>> {
    info!(url = %style(format!("http://localhost:{PORT}/")).yellow(), "starting a HTTP server");

    thread::spawn(move || {
        tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()?
            .block_on(serve(PORT, out_dir))
    })
}

fn router(out_dir: Utf8PathBuf) -> Router {
    Router::new().fallback_service(ServeDir::new(out_dir))
}

async fn serve(port: u16, out_dir: Utf8PathBuf) -> Result<(), anyhow::Error> {
    let address = SocketAddr::from(([127, 0, 0, 1], port));
    let listener = tokio::net::TcpListener::bind(address).await?;

    axum::serve(listener, router(out_dir)).await?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    use super::*;

    #[tokio::test]
    async fn test_serves_output_directory() {
        let dir = tempfile::tempdir().unwrap();
        let out_dir = Utf8PathBuf::try_from(dir.path().to_path_buf()).unwrap();
        std::fs::write(out_dir.join("index.html"), "<h1>decks</h1>").unwrap();

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move { axum::serve(listener, router(out_dir)).await });

        let mut stream = tokio::net::TcpStream::connect(addr).await.unwrap();
        stream
            .write_all(b"GET /index.html HTTP/1.1\r\nHost: localhost\r\nConnection: close\r\n\r\n")
            .await
            .unwrap();

        let mut response = String::new();
        stream.read_to_string(&mut response).await.unwrap();

        assert!(response.starts_with("HTTP/1.1 200"));
        assert!(response.ends_with("<h1>decks</h1>"));
    }
}
