//! Gateway HTTP server: the Axum router over the chat service

use std::net::SocketAddr;
use std::sync::Arc;

use axum::Router;
use axum::extract::DefaultBodyLimit;
use axum::routing::{get, post};
use tower_http::cors::CorsLayer;
use tracing::info;

use conclave_core::ChatService;
use conclave_knowledge::KnowledgeBase;

use crate::routes;

/// Largest accepted multipart upload
pub const MAX_UPLOAD_BYTES: usize = 25 * 1024 * 1024;

/// Shared state for all requests
#[derive(Clone)]
pub struct GatewayState {
    pub chat: Arc<ChatService>,
    pub knowledge: Arc<KnowledgeBase>,
}

/// The gateway server
pub struct GatewayServer {
    state: GatewayState,
    bind: SocketAddr,
}

impl GatewayServer {
    pub fn new(bind: SocketAddr, chat: Arc<ChatService>, knowledge: Arc<KnowledgeBase>) -> Self {
        Self {
            state: GatewayState { chat, knowledge },
            bind,
        }
    }

    /// Build the Axum router
    pub fn router(&self) -> Router {
        router(self.state.clone())
    }

    /// Serve until ctrl-c
    pub async fn run(self) -> anyhow::Result<()> {
        let router = self.router();
        let listener = tokio::net::TcpListener::bind(self.bind).await?;
        info!("Gateway listening on {}", self.bind);

        axum::serve(listener, router)
            .with_graceful_shutdown(async {
                let _ = tokio::signal::ctrl_c().await;
                info!("Shutting down gateway");
            })
            .await?;

        Ok(())
    }

    /// Start the server in the background, returning a handle
    pub fn spawn(self) -> tokio::task::JoinHandle<anyhow::Result<()>> {
        tokio::spawn(async move { self.run().await })
    }
}

pub fn router(state: GatewayState) -> Router {
    Router::new()
        .route("/", get(routes::root))
        .route("/chat", post(routes::chat))
        .route("/profiles", get(routes::list_profiles).post(routes::create_profile))
        .route(
            "/profiles/{name}",
            get(routes::get_profile)
                .put(routes::update_profile)
                .delete(routes::delete_profile),
        )
        .route("/sessions", get(routes::list_sessions))
        .route("/sessions/{id}", axum::routing::delete(routes::delete_session))
        .route("/sessions/{id}/history", get(routes::session_history))
        .route(
            "/knowledge-sets",
            get(routes::list_knowledge_sets).post(routes::create_knowledge_set),
        )
        .route(
            "/knowledge-sets/{name}",
            get(routes::get_knowledge_set)
                .put(routes::update_knowledge_set)
                .delete(routes::delete_knowledge_set),
        )
        .route("/knowledge-sets/{name}/documents", post(routes::add_document))
        .route(
            "/knowledge-sets/{name}/upload",
            post(routes::upload_document).layer(DefaultBodyLimit::max(MAX_UPLOAD_BYTES)),
        )
        .route(
            "/upload-document/{name}",
            post(routes::upload_document).layer(DefaultBodyLimit::max(MAX_UPLOAD_BYTES)),
        )
        .layer(CorsLayer::permissive())
        .with_state(state)
}
