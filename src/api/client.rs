//! Client for this service's own `/api/search` and `/api/chat` routes, used by
//! the orchestrator when it runs against a deployed server.

use async_trait::async_trait;
use futures::StreamExt;
use tracing::debug;

use crate::answer_generator::{AnswerRequest, FragmentStream, GenerationError};
use crate::orchestrator::{AnswerBackend, SearchBackend};
use crate::search_client::{SearchError, SearchOutcome};
use crate::stream_decoder::decode_fragments;

use super::models::{SearchRequest, SearchResponse};

pub struct ApiClient {
    http: reqwest::Client,
    base_url: String,
}

impl ApiClient {
    pub fn new(base_url: &str) -> Self {
        Self {
            http: reqwest::Client::new(),
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }
}

#[async_trait]
impl SearchBackend for ApiClient {
    async fn search(
        &self,
        query: &str,
        domains: Option<&[String]>,
    ) -> Result<SearchOutcome, SearchError> {
        let body = SearchRequest {
            query: Some(query.to_string()),
            domains: domains.filter(|d| !d.is_empty()).map(|d| d.to_vec()),
        };
        debug!(query, "POST /api/search");

        let response = self
            .http
            .post(format!("{}/api/search", self.base_url))
            .json(&body)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let body = response.text().await.unwrap_or_default();
            return Err(SearchError::Upstream { status, body });
        }

        let payload: SearchResponse = response.json().await?;
        Ok(SearchOutcome {
            results: payload.results,
            images: payload.images,
        })
    }
}

#[async_trait]
impl AnswerBackend for ApiClient {
    async fn answer(&self, request: &AnswerRequest) -> Result<FragmentStream, GenerationError> {
        debug!(query = %request.query, sources = request.sources.len(), "POST /api/chat");

        let response = self
            .http
            .post(format!("{}/api/chat", self.base_url))
            .json(request)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let body = response.text().await.unwrap_or_default();
            return Err(GenerationError::Upstream { status, body });
        }

        let fragments = decode_fragments(response.bytes_stream())
            .map(|fragment| fragment.map_err(GenerationError::from));
        Ok(Box::pin(fragments))
    }
}
