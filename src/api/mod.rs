use axum::{
    Router,
    routing::{get, post},
};
use std::sync::Arc;
use tower_http::{
    cors::{Any, CorsLayer},
    services::ServeDir,
};

use crate::answer_generator::AnswerGenerator;
use crate::config::Config;
use crate::search_client::SearchClient;

pub mod client;
pub mod handlers;
pub mod models;

#[derive(Clone)]
pub struct AppState {
    pub search: Arc<SearchClient>,
    pub generator: Arc<AnswerGenerator>,
    pub config: Arc<Config>,
}

impl AppState {
    pub fn from_config(config: Config) -> Self {
        let search = SearchClient::new(config.tavily_api_key.clone(), &config.tavily_api_url);
        let generator = AnswerGenerator::new(
            config.openai_api_key.clone(),
            &config.openai_base_url,
            &config.openai_model,
        );
        Self {
            search: Arc::new(search),
            generator: Arc::new(generator),
            config: Arc::new(config),
        }
    }
}

pub fn create_router(state: AppState) -> Router {
    // CORS configuration
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let static_dir = state.config.static_dir.clone();

    Router::new()
        // API routes
        .route("/api/search", post(handlers::search_handler))
        .route("/api/chat", post(handlers::chat_handler))
        .route("/api/test", get(handlers::diagnostics_handler))
        .with_state(state)
        // Static file serving for the UI
        .fallback_service(ServeDir::new(static_dir))
        .layer(cors)
}
