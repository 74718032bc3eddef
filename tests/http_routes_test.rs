// Routing tests over a real listener with hand-written HTTP requests

use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use webterm_exec::{CommandTable, SearchPaths};
use webterm_gateway::{server, Config, Gateway};

async fn start(config: Config) -> (std::net::SocketAddr, tokio::sync::oneshot::Sender<()>) {
    let table = CommandTable::builder(SearchPaths::only([])).build();
    let gateway = Gateway::with_table(config, table);
    let listener = server::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    let (stop_tx, stop_rx) = tokio::sync::oneshot::channel::<()>();
    let router = gateway.router();
    tokio::spawn(async move {
        let shutdown = async move {
            let _ = stop_rx.await;
        };
        server::serve(listener, router, shutdown).await.unwrap();
    });
    (addr, stop_tx)
}

async fn get(addr: std::net::SocketAddr, path: &str) -> String {
    let mut stream = TcpStream::connect(addr).await.unwrap();
    let request = format!(
        "GET {} HTTP/1.1\r\nHost: localhost\r\nConnection: close\r\n\r\n",
        path
    );
    stream.write_all(request.as_bytes()).await.unwrap();

    let mut response = Vec::new();
    tokio::time::timeout(Duration::from_secs(5), stream.read_to_end(&mut response))
        .await
        .unwrap()
        .unwrap();
    String::from_utf8_lossy(&response).into_owned()
}

#[tokio::test]
async fn test_static_files_served_next_to_routes() {
    let dir = tempfile::TempDir::new().unwrap();
    std::fs::write(dir.path().join("index.html"), "<h1>webterm</h1>").unwrap();

    let mut config = Config::default();
    config.server.static_dir = Some(dir.path().to_path_buf());
    let (addr, _stop) = start(config).await;

    let page = get(addr, "/index.html").await;
    assert!(page.starts_with("HTTP/1.1 200"), "{}", page);
    assert!(page.ends_with("<h1>webterm</h1>"));

    let missing = get(addr, "/missing.html").await;
    assert!(missing.starts_with("HTTP/1.1 404"), "{}", missing);
}

#[tokio::test]
async fn test_backend_routes_require_websocket_upgrade() {
    let (addr, _stop) = start(Config::default()).await;

    for route in ["/ssh", "/ssh_exec", "/telnet", "/cmd", "/cmd2", "/plink", "/replay"] {
        let response = get(addr, route).await;
        assert!(response.starts_with("HTTP/1.1 4"), "{}: {}", route, response);
        assert!(!response.starts_with("HTTP/1.1 404"), "{}: {}", route, response);
    }

    let unknown = get(addr, "/rdp").await;
    assert!(unknown.starts_with("HTTP/1.1 404"), "{}", unknown);
}
