//! HTTP front end: a thin axum wrapper around the dispatcher plus a
//! handful of admin/status endpoints. No routing decision beyond method
//! dispatch lives here — all health-aware selection, admission control,
//! and fan-out logic belongs to `dispatch`.

pub mod admin;
pub mod proxy;
pub mod state;

use std::net::SocketAddr;

use axum::routing::get;
use axum::Router;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

pub use state::AppState;

pub struct HttpServer {
    addr: SocketAddr,
    router: Router,
}

impl HttpServer {
    pub fn new(socket_addr: &str, state: AppState) -> Self {
        let addr: SocketAddr = socket_addr.parse().expect("invalid socket address");

        let cors = CorsLayer::new()
            .allow_origin(Any)
            .allow_methods(Any)
            .allow_headers(Any);

        let router = Router::new()
            .route("/health", get(admin::health))
            .route("/status", get(admin::status))
            .route("/metrics", get(admin::metrics))
            .route("/wal/status", get(admin::wal_status))
            .fallback(proxy::proxy_handler)
            .layer(TraceLayer::new_for_http())
            .layer(cors)
            .with_state(state);

        Self { addr, router }
    }

    pub fn socket_addr(&self) -> SocketAddr {
        self.addr
    }

    pub async fn serve(self) -> std::io::Result<()> {
        let listener = tokio::net::TcpListener::bind(self.addr).await?;
        axum::serve(
            listener,
            self.router.into_make_service_with_connect_info::<SocketAddr>(),
        )
        .await
    }
}
