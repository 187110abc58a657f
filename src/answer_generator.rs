use futures::{Stream, StreamExt};
use reqwest::header::{AUTHORIZATION, CONTENT_TYPE, HeaderMap, HeaderValue};
use serde::{Deserialize, Serialize};
use std::pin::Pin;
use thiserror::Error;
use tracing::{debug, info};

use crate::data_models::{PriorTurn, SearchResult, truncate_chars};
use crate::stream_decoder::LineBuffer;

pub const SOURCE_EXCERPT_CHARS: usize = 1000;
pub const PRIOR_TURN_WINDOW: usize = 3;
pub const PRIOR_ANSWER_CHARS: usize = 200;
pub const TEMPERATURE: f32 = 0.7;
pub const MAX_TOKENS: u32 = 2000;

#[derive(Debug, Error)]
pub enum GenerationError {
    #[error("completion provider api key is not configured")]
    NotConfigured,

    #[error("completion provider returned status {status}: {body}")]
    Upstream { status: u16, body: String },

    #[error("completion request failed: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("invalid completion api key: {0}")]
    InvalidApiKey(#[from] reqwest::header::InvalidHeaderValue),

    #[error("completion provider returned no content")]
    EmptyResponse,
}

/// A live answer: fragments that concatenate to the final text.
pub type FragmentStream = Pin<Box<dyn Stream<Item = Result<String, GenerationError>> + Send>>;

/// Everything needed to answer one query. This is also the chat endpoint's body.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct AnswerRequest {
    pub query: String,
    pub sources: Vec<SearchResult>,
    #[serde(default)]
    pub messages: Vec<PriorTurn>,
}

/// Builds the completion prompt: numbered sources, the citation rules and,
/// when there is history, the last few turns for continuity.
pub fn compose_prompt(query: &str, sources: &[SearchResult], prior_turns: &[PriorTurn]) -> String {
    let mut prompt = String::from(
        "You are an AI assistant that provides comprehensive, well-researched answers based on \
         web search results. Your task is to analyze the provided sources and create a detailed \
         response to the user's query.\n\n",
    );

    prompt.push_str(&format!("User Query: \"{query}\"\n\n"));
    prompt.push_str("Available Sources:\n");
    for (i, source) in sources.iter().enumerate() {
        prompt.push_str(&format!(
            "[{}] {} — {}\nURL: {}\n{}...\n\n",
            i + 1,
            source.title,
            source.domain,
            source.url,
            truncate_chars(&source.content, SOURCE_EXCERPT_CHARS)
        ));
    }

    let window = &prior_turns[prior_turns.len().saturating_sub(PRIOR_TURN_WINDOW)..];
    if !window.is_empty() {
        prompt.push_str("Previous Conversation:\n");
        for turn in window {
            prompt.push_str(&format!(
                "Q: {}\nA: {}...\n\n",
                turn.query,
                truncate_chars(&turn.ai_response, PRIOR_ANSWER_CHARS)
            ));
        }
    }

    prompt.push_str(
        "Instructions:\n\
         1. Provide a comprehensive answer based on the sources provided\n\
         2. Use inline citations in the format [1], [2], etc. to reference specific sources\n\
         3. Include multiple citations when information comes from different sources\n\
         4. Structure your response with clear markdown headers (### for sections)\n\
         5. Be factual and accurate, only using information from the sources\n\
         6. If sources conflict, mention the different perspectives\n\
         7. Make sure to cite sources throughout your response, not just at the end\n\
         8. Use markdown formatting for better readability (headers, lists, bold text)\n\
         9. Aim for a detailed response that thoroughly addresses the query\n",
    );
    if !window.is_empty() {
        prompt.push_str(
            "10. Keep continuity with the previous conversation and build on earlier answers where relevant\n",
        );
    }
    prompt.push_str("\nPlease provide your response:");
    prompt
}

#[derive(Debug, Serialize)]
struct CompletionRequest<'a> {
    model: &'a str,
    messages: Vec<CompletionMessage<'a>>,
    temperature: f32,
    max_tokens: u32,
    stream: bool,
}

#[derive(Debug, Serialize)]
struct CompletionMessage<'a> {
    role: &'static str,
    content: &'a str,
}

#[derive(Debug, Deserialize)]
struct CompletionResponse {
    choices: Vec<CompletionChoice>,
}

#[derive(Debug, Deserialize)]
struct CompletionChoice {
    message: ChoiceMessage,
}

#[derive(Debug, Deserialize)]
struct ChoiceMessage {
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct CompletionChunk {
    #[serde(default)]
    choices: Vec<ChunkChoice>,
}

#[derive(Debug, Deserialize)]
struct ChunkChoice {
    #[serde(default)]
    delta: ChunkDelta,
}

#[derive(Debug, Default, Deserialize)]
struct ChunkDelta {
    content: Option<String>,
}

/// Result of reading one line of the provider's server-sent events.
#[derive(Debug, PartialEq)]
enum SseLine {
    Content(String),
    Skip,
    Done,
}

fn parse_sse_line(line: &str) -> SseLine {
    let Some(data) = line.strip_prefix("data:").map(str::trim) else {
        return SseLine::Skip;
    };
    if data == "[DONE]" {
        return SseLine::Done;
    }
    match serde_json::from_str::<CompletionChunk>(data) {
        Ok(chunk) => chunk
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.delta.content)
            .filter(|c| !c.is_empty())
            .map(SseLine::Content)
            .unwrap_or(SseLine::Skip),
        Err(e) => {
            log::warn!("skipping malformed completion event: {e}");
            SseLine::Skip
        }
    }
}

/// Turns a streamed completion body into answer fragments. Reading stops at
/// `[DONE]` or the first transport error; a final event without a trailing
/// newline is still decoded.
fn completion_fragments<S, B, E>(bytes: S) -> impl Stream<Item = Result<String, GenerationError>>
where
    S: Stream<Item = Result<B, E>>,
    B: AsRef<[u8]>,
    GenerationError: From<E>,
{
    async_stream::stream! {
        futures::pin_mut!(bytes);
        let mut lines = LineBuffer::new();
        'read: {
            while let Some(chunk) = bytes.next().await {
                let chunk = match chunk {
                    Ok(chunk) => chunk,
                    Err(e) => {
                        yield Err(GenerationError::from(e));
                        break 'read;
                    }
                };
                for line in lines.push(chunk.as_ref()) {
                    match parse_sse_line(&line) {
                        SseLine::Content(text) => {
                            yield Ok(text);
                        }
                        SseLine::Skip => {}
                        SseLine::Done => break 'read,
                    }
                }
            }
            if let Some(line) = lines.take_remainder() {
                if let SseLine::Content(text) = parse_sse_line(&line) {
                    yield Ok(text);
                }
            }
        }
    }
}

/// Client for the completion provider (OpenAI-compatible chat completions).
pub struct AnswerGenerator {
    http: reqwest::Client,
    api_key: Option<String>,
    base_url: String,
    model: String,
}

impl AnswerGenerator {
    pub fn new(api_key: Option<String>, base_url: &str, model: &str) -> Self {
        Self {
            http: reqwest::Client::new(),
            api_key,
            base_url: base_url.trim_end_matches('/').to_string(),
            model: model.to_string(),
        }
    }

    fn headers(&self) -> Result<HeaderMap, GenerationError> {
        let api_key = self
            .api_key
            .as_deref()
            .ok_or(GenerationError::NotConfigured)?;
        let mut headers = HeaderMap::new();
        headers.insert(
            AUTHORIZATION,
            HeaderValue::from_str(&format!("Bearer {api_key}"))?,
        );
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        Ok(headers)
    }

    async fn send(
        &self,
        request: &AnswerRequest,
        stream: bool,
    ) -> Result<reqwest::Response, GenerationError> {
        let prompt = compose_prompt(&request.query, &request.sources, &request.messages);
        let body = CompletionRequest {
            model: &self.model,
            messages: vec![CompletionMessage {
                role: "user",
                content: &prompt,
            }],
            temperature: TEMPERATURE,
            max_tokens: MAX_TOKENS,
            stream,
        };

        debug!(model = %self.model, stream, sources = request.sources.len(), "completion request");

        let response = self
            .http
            .post(format!("{}/chat/completions", self.base_url))
            .headers(self.headers()?)
            .json(&body)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let body = response.text().await.unwrap_or_default();
            return Err(GenerationError::Upstream { status, body });
        }
        Ok(response)
    }

    /// Generates the whole answer in one call.
    pub async fn generate(&self, request: &AnswerRequest) -> Result<String, GenerationError> {
        let response: CompletionResponse = self.send(request, false).await?.json().await?;
        let text = response
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .ok_or(GenerationError::EmptyResponse)?;

        info!(query = %request.query, length = text.chars().count(), "answer generated");
        Ok(text)
    }

    /// Starts a streamed answer. The returned stream ends when the provider
    /// closes the response or sends its `[DONE]` marker.
    pub async fn stream(&self, request: &AnswerRequest) -> Result<FragmentStream, GenerationError> {
        let response = self.send(request, true).await?;
        info!(query = %request.query, "answer stream started");

        let fragments = completion_fragments(response.bytes_stream());
        Ok(Box::pin(fragments))
    }
}
