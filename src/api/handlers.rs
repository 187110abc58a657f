use axum::body::Body;
use axum::extract::rejection::JsonRejection;
use axum::http::header::CONTENT_TYPE;
use axum::response::{IntoResponse, Response};
use axum::{Json, extract::State};
use chrono::Utc;
use futures::StreamExt;
use std::convert::Infallible;
use tracing::{error, info, warn};

use crate::answer_generator::AnswerRequest;
use crate::data_models::truncate_chars;
use crate::stream_decoder::{encode_content_line, encode_fragment};

use super::AppState;
use super::models::{ApiError, ChatRequest, DiagnosticsResponse, SearchRequest, SearchResponse};

const ANSWER_CONTENT_TYPE: &str = "text/plain; charset=utf-8";

pub async fn search_handler(
    State(state): State<AppState>,
    body: Result<Json<SearchRequest>, JsonRejection>,
) -> Result<Json<SearchResponse>, ApiError> {
    let Json(request) = body.map_err(|rejection| rejected(rejection, "Query is required"))?;
    let query = request
        .query
        .filter(|q| !q.trim().is_empty())
        .ok_or(ApiError::BadRequest("Query is required"))?;

    let outcome = state
        .search
        .search(&query, request.domains.as_deref())
        .await
        .map_err(|e| {
            error!(query = %query, "search api error: {e}");
            ApiError::Upstream("Failed to perform search")
        })?;

    let total_results = outcome.results.len();
    Ok(Json(SearchResponse {
        query,
        results: outcome.results,
        images: outcome.images,
        total_results,
    }))
}

pub async fn chat_handler(
    State(state): State<AppState>,
    body: Result<Json<ChatRequest>, JsonRejection>,
) -> Result<Response, ApiError> {
    let Json(request) =
        body.map_err(|rejection| rejected(rejection, "Query and sources are required"))?;
    let (Some(query), Some(sources)) = (
        request.query.filter(|q| !q.trim().is_empty()),
        request.sources,
    ) else {
        return Err(ApiError::BadRequest("Query and sources are required"));
    };

    info!(query = %query, sources = sources.len(), "starting answer generation");
    let answer_request = AnswerRequest {
        query,
        sources,
        messages: request.messages,
    };

    if !state.config.chat_streaming {
        let text = state
            .generator
            .generate(&answer_request)
            .await
            .map_err(|e| {
                error!("chat api error: {e}");
                ApiError::Upstream("Failed to generate response")
            })?;
        let body = Body::from(encode_content_line(&text));
        return Ok(([(CONTENT_TYPE, ANSWER_CONTENT_TYPE)], body).into_response());
    }

    let mut fragments = state
        .generator
        .stream(&answer_request)
        .await
        .map_err(|e| {
            error!("chat api error: {e}");
            ApiError::Upstream("Failed to generate response")
        })?;

    // Headers are already sent once streaming starts; a failure can only end the body.
    let lines = async_stream::stream! {
        while let Some(fragment) = fragments.next().await {
            match fragment {
                Ok(text) => {
                    yield Ok::<_, Infallible>(encode_fragment(&text));
                }
                Err(e) => {
                    error!("answer stream interrupted: {e}");
                    break;
                }
            }
        }
    };

    Ok(([(CONTENT_TYPE, ANSWER_CONTENT_TYPE)], Body::from_stream(lines)).into_response())
}

/// An unreadable body carries no usable fields, so it gets the same 400 as a
/// body that omits them.
fn rejected(rejection: JsonRejection, message: &'static str) -> ApiError {
    warn!(status = %rejection.status(), "rejected request body: {}", rejection.body_text());
    ApiError::BadRequest(message)
}

pub async fn diagnostics_handler(State(state): State<AppState>) -> Json<DiagnosticsResponse> {
    Json(DiagnosticsResponse {
        tavily: credential_status(state.config.tavily_api_key.as_deref()),
        openai: credential_status(state.config.openai_api_key.as_deref()),
        timestamp: Utc::now().to_rfc3339(),
    })
}

/// Never reveals more than the first eight characters of a secret.
fn credential_status(key: Option<&str>) -> String {
    match key {
        Some(key) => format!("Configured ({}...)", truncate_chars(key, 8)),
        None => "Missing".to_string(),
    }
}
