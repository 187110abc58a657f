use reqwest::Url;
use reqwest::header::{AUTHORIZATION, CONTENT_TYPE, HeaderMap, HeaderValue};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info};

use crate::data_models::{SearchImage, SearchResult, truncate_chars};

pub const MAX_RESULTS: u32 = 15;
pub const SNIPPET_CHARS: usize = 200;

#[derive(Debug, Error)]
pub enum SearchError {
    #[error("search provider api key is not configured")]
    NotConfigured,

    #[error("search provider returned status {status}: {body}")]
    Upstream { status: u16, body: String },

    #[error("search request failed: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("search result {index} has an unusable url {url:?}")]
    InvalidResultUrl { index: usize, url: String },

    #[error("invalid search api key: {0}")]
    InvalidApiKey(#[from] reqwest::header::InvalidHeaderValue),
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct SearchOutcome {
    pub results: Vec<SearchResult>,
    pub images: Vec<SearchImage>,
}

#[derive(Debug, Serialize)]
struct ProviderRequest<'a> {
    query: &'a str,
    search_depth: &'static str,
    max_results: u32,
    include_raw_content: bool,
    include_answer: bool,
    include_images: bool,
    include_image_descriptions: bool,
    topic: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    include_domains: Option<&'a [String]>,
}

#[derive(Debug, Deserialize)]
struct ProviderResponse {
    #[serde(default)]
    results: Vec<ProviderRecord>,
    #[serde(default)]
    images: Vec<ProviderImage>,
}

#[derive(Debug, Deserialize)]
struct ProviderRecord {
    #[serde(default)]
    title: Option<String>,
    url: String,
    #[serde(default)]
    content: Option<String>,
    #[serde(default)]
    raw_content: Option<String>,
}

/// Images come back as bare urls, or as objects once descriptions are requested.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum ProviderImage {
    Url(String),
    Described {
        url: String,
        #[serde(default)]
        description: Option<String>,
    },
}

impl From<ProviderImage> for SearchImage {
    fn from(image: ProviderImage) -> Self {
        match image {
            ProviderImage::Url(url) => SearchImage {
                url,
                description: None,
            },
            ProviderImage::Described { url, description } => SearchImage { url, description },
        }
    }
}

/// Client for the web search provider (Tavily-compatible API).
pub struct SearchClient {
    http: reqwest::Client,
    api_key: Option<String>,
    endpoint: String,
}

impl SearchClient {
    pub fn new(api_key: Option<String>, endpoint: &str) -> Self {
        Self {
            http: reqwest::Client::new(),
            api_key,
            endpoint: endpoint.to_string(),
        }
    }

    fn headers(&self) -> Result<HeaderMap, SearchError> {
        let api_key = self.api_key.as_deref().ok_or(SearchError::NotConfigured)?;
        let mut headers = HeaderMap::new();
        headers.insert(
            AUTHORIZATION,
            HeaderValue::from_str(&format!("Bearer {api_key}"))?,
        );
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        Ok(headers)
    }

    /// Runs one search. `domains` restricts results to those hostnames; `None`
    /// or an empty slice searches the whole web.
    pub async fn search(
        &self,
        query: &str,
        domains: Option<&[String]>,
    ) -> Result<SearchOutcome, SearchError> {
        let request = ProviderRequest {
            query,
            search_depth: "advanced",
            max_results: MAX_RESULTS,
            include_raw_content: true,
            include_answer: false,
            include_images: true,
            include_image_descriptions: true,
            topic: "general",
            include_domains: domains.filter(|d| !d.is_empty()),
        };

        debug!(query, domains = ?request.include_domains, "search provider request");

        let response = self
            .http
            .post(&self.endpoint)
            .headers(self.headers()?)
            .json(&request)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let body = response.text().await.unwrap_or_default();
            return Err(SearchError::Upstream { status, body });
        }

        let payload: ProviderResponse = response.json().await?;
        let outcome = normalize(payload)?;

        info!(
            query,
            results = outcome.results.len(),
            images = outcome.images.len(),
            "search completed"
        );
        Ok(outcome)
    }
}

fn normalize(payload: ProviderResponse) -> Result<SearchOutcome, SearchError> {
    let results = payload
        .results
        .into_iter()
        .enumerate()
        .map(|(index, record)| normalize_record(index, record))
        .collect::<Result<Vec<_>, _>>()?;

    let images = payload.images.into_iter().map(SearchImage::from).collect();

    Ok(SearchOutcome { results, images })
}

fn normalize_record(index: usize, record: ProviderRecord) -> Result<SearchResult, SearchError> {
    let domain = Url::parse(&record.url)
        .ok()
        .and_then(|u| u.host_str().map(|h| h.to_string()))
        .ok_or_else(|| SearchError::InvalidResultUrl {
            index,
            url: record.url.clone(),
        })?;

    let title = record
        .title
        .filter(|t| !t.is_empty())
        .unwrap_or_else(|| format!("Result {}", index + 1));

    let snippet = record
        .content
        .as_deref()
        .map(|c| truncate_chars(c, SNIPPET_CHARS).to_string())
        .unwrap_or_default();

    let content = record
        .raw_content
        .filter(|c| !c.is_empty())
        .or(record.content)
        .unwrap_or_default();

    Ok(SearchResult {
        title,
        url: record.url,
        content,
        domain,
        snippet,
    })
}
