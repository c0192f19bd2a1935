use std::net::SocketAddr;

use axum::{Json, Router, extract::DefaultBodyLimit, response::IntoResponse, routing::get};
use idrelay_auth::{BrokerError, BrokerState};
use serde_json::json;
use tower_http::{cors::CorsLayer, trace::TraceLayer};

use crate::config::AppConfig;

pub struct IdrelayServer {
    addr: SocketAddr,
    app: Router,
}

async fn healthz() -> impl IntoResponse {
    Json(json!({ "status": "ok" }))
}

/// Builds the broker from `cfg.broker` and assembles the full router.
pub fn build_app(cfg: &AppConfig) -> Result<Router, BrokerError> {
    let state = BrokerState::from_config(&cfg.broker)?;
    let body_limit = cfg.server.body_limit_bytes;

    let app = idrelay_auth::router(state)
        .route("/healthz", get(healthz))
        .layer(CorsLayer::permissive())
        .layer(
            TraceLayer::new_for_http()
                .make_span_with(|req: &axum::http::Request<_>| {
                    use tracing::field::Empty;
                    // Query strings carry login state and stay out of the span
                    tracing::info_span!(
                        "http.request",
                        http.method = %req.method(),
                        http.target = %req.uri().path(),
                        http.status_code = Empty
                    )
                })
                .on_response(
                    |res: &axum::http::Response<_>,
                     latency: std::time::Duration,
                     span: &tracing::Span| {
                        span.record(
                            "http.status_code",
                            tracing::field::display(res.status().as_u16()),
                        );
                        tracing::info!(
                            http.status = %res.status().as_u16(),
                            elapsed_ms = %latency.as_millis(),
                            "request handled"
                        );
                    },
                ),
        )
        .layer(DefaultBodyLimit::max(body_limit));
    Ok(app)
}

pub struct ServerBuilder {
    addr: SocketAddr,
    config: AppConfig,
}

impl Default for ServerBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl ServerBuilder {
    pub fn new() -> Self {
        let cfg = AppConfig::default();
        Self {
            addr: cfg.addr(),
            config: cfg,
        }
    }

    pub fn with_addr(mut self, addr: SocketAddr) -> Self {
        self.addr = addr;
        self
    }

    pub fn with_config(mut self, cfg: AppConfig) -> Self {
        self.addr = cfg.addr();
        self.config = cfg;
        self
    }

    pub fn build(self) -> Result<IdrelayServer, BrokerError> {
        let app = build_app(&self.config)?;

        Ok(IdrelayServer {
            addr: self.addr,
            app,
        })
    }
}

impl IdrelayServer {
    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    pub async fn run(self) -> anyhow::Result<()> {
        let listener = tokio::net::TcpListener::bind(self.addr).await?;
        tracing::info!("listening on {}", self.addr);
        axum::serve(listener, self.app)
            .with_graceful_shutdown(shutdown_signal())
            .await?;
        Ok(())
    }
}

async fn shutdown_signal() {
    let _ = tokio::signal::ctrl_c().await;
    tracing::info!("shutdown signal received");
}
