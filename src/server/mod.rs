//! HTTP surface: one websocket route per registered backend, plus optional
//! static files.

mod websocket;

pub use websocket::serve_socket;

use axum::extract::{Query, State, WebSocketUpgrade};
use axum::routing::get;
use axum::Router;
use std::future::Future;
use std::path::Path;
use std::sync::Arc;
use tokio::net::TcpListener;
use tower_http::services::ServeDir;
use tower_http::trace::TraceLayer;

use crate::error::{GatewayError, Result};
use crate::session::SessionManager;

/// Routes for every backend the manager knows, `/name` each.
pub fn build_router(manager: Arc<SessionManager>, static_dir: Option<&Path>) -> Router {
    let mut routes = manager.routes();
    routes.sort();

    let mut router: Router<Arc<SessionManager>> = Router::new();
    for route in routes {
        let path = format!("/{}", route);
        debug!("Mounting websocket route {}", path);
        router = router.route(
            &path,
            get(
                move |ws: WebSocketUpgrade,
                      Query(query): Query<Vec<(String, String)>>,
                      State(manager): State<Arc<SessionManager>>| {
                    let route = route.clone();
                    async move {
                        ws.on_upgrade(move |socket| async move {
                            serve_socket(socket, manager, route, query).await;
                        })
                    }
                },
            ),
        );
    }

    let mut router = router.with_state(manager);
    if let Some(dir) = static_dir {
        info!("Serving static files from {}", dir.display());
        router = router.fallback_service(ServeDir::new(dir));
    }
    router.layer(TraceLayer::new_for_http())
}

/// Bind the listener, mapping failures to [`GatewayError::Bind`].
pub async fn bind(addr: &str) -> Result<TcpListener> {
    TcpListener::bind(addr).await.map_err(|source| GatewayError::Bind {
        addr: addr.to_string(),
        source,
    })
}

/// Serve until `shutdown` resolves.
pub async fn serve<F>(listener: TcpListener, router: Router, shutdown: F) -> Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown)
        .await?;
    Ok(())
}
