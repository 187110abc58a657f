//! The search-then-answer cycle.
//!
//! `SearchState` holds everything a front end displays and changes only
//! through its transition methods. `SearchOrchestrator` is the single writer
//! of that state: it runs one cycle at a time and publishes every change on a
//! `watch` channel, one update per streamed fragment.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::StreamExt;
use serde::Serialize;
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::answer_generator::{
    AnswerGenerator, AnswerRequest, FragmentStream, GenerationError, PRIOR_TURN_WINDOW,
};
use crate::data_models::{
    DomainOption, Message, PriorTurn, SearchImage, SearchResult, SearchStep, StepStatus,
};
use crate::search_client::{SearchClient, SearchError, SearchOutcome};

pub const STEP_SEARCH: &str = "1";
pub const STEP_READ: &str = "2";
pub const STEP_GENERATE: &str = "3";

#[async_trait]
pub trait SearchBackend: Send + Sync {
    async fn search(
        &self,
        query: &str,
        domains: Option<&[String]>,
    ) -> Result<SearchOutcome, SearchError>;
}

#[async_trait]
pub trait AnswerBackend: Send + Sync {
    async fn answer(&self, request: &AnswerRequest) -> Result<FragmentStream, GenerationError>;
}

#[async_trait]
impl SearchBackend for SearchClient {
    async fn search(
        &self,
        query: &str,
        domains: Option<&[String]>,
    ) -> Result<SearchOutcome, SearchError> {
        SearchClient::search(self, query, domains).await
    }
}

#[async_trait]
impl AnswerBackend for AnswerGenerator {
    async fn answer(&self, request: &AnswerRequest) -> Result<FragmentStream, GenerationError> {
        self.stream(request).await
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Tab {
    #[default]
    Answer,
    Sources,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum Phase {
    #[default]
    Idle,
    Searching,
    AwaitingGeneration,
    Streaming,
    Failed,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SearchState {
    pub current_query: String,
    pub is_searching: bool,
    pub is_streaming: bool,
    pub search_status: String,
    pub current_results: Vec<SearchResult>,
    pub current_images: Vec<SearchImage>,
    pub current_ai_response: String,
    pub progress: u8,
    pub selected_domain: DomainOption,
    pub messages: Vec<Message>,
    pub active_tab: Tab,
    pub search_steps: Vec<SearchStep>,
    pub phase: Phase,
}

fn initial_steps(query: &str, now: i64) -> Vec<SearchStep> {
    let mut search = SearchStep::new(STEP_SEARCH, "Searching the web", StepStatus::Active, now);
    search.description = Some(query.to_string());
    vec![
        search,
        SearchStep::new(STEP_READ, "Reading sources", StepStatus::Pending, now),
        SearchStep::new(STEP_GENERATE, "Generating response", StepStatus::Pending, now),
    ]
}

impl SearchState {
    fn step_mut(&mut self, id: &str) -> Option<&mut SearchStep> {
        self.search_steps.iter_mut().find(|s| s.id == id)
    }

    fn set_progress(&mut self, progress: u8) {
        self.progress = self.progress.max(progress);
    }

    /// Starts a cycle. Returns false, leaving the state untouched, when the
    /// query is blank or a cycle is already running.
    pub fn begin_cycle(&mut self, now: i64) -> bool {
        if self.current_query.trim().is_empty() || self.is_searching {
            return false;
        }
        self.phase = Phase::Searching;
        self.is_searching = true;
        self.is_streaming = false;
        self.search_status = "Searching the web...".to_string();
        self.current_results.clear();
        self.current_images.clear();
        self.current_ai_response.clear();
        self.search_steps = initial_steps(&self.current_query, now);
        self.progress = 10;
        self.active_tab = Tab::Answer;
        true
    }

    pub fn search_dispatched(&mut self) {
        self.set_progress(30);
    }

    pub fn search_succeeded(&mut self, outcome: SearchOutcome, now: i64) {
        let found = outcome.results.len();
        if let Some(step) = self.step_mut(STEP_SEARCH) {
            step.complete(now);
            if let Some(details) = step.details.as_mut() {
                details.sources_found = Some(found);
            }
        }
        if let Some(step) = self.step_mut(STEP_READ) {
            step.activate(now);
            step.description = Some(format!("{found} sources found"));
            step.sources = Some(outcome.results.clone());
        }
        self.current_results = outcome.results;
        self.current_images = outcome.images;
        self.search_status = "Reading sources...".to_string();
        self.set_progress(60);
        self.phase = Phase::AwaitingGeneration;
    }

    pub fn generation_started(&mut self, now: i64) {
        if let Some(step) = self.step_mut(STEP_READ) {
            step.complete(now);
        }
        if let Some(step) = self.step_mut(STEP_GENERATE) {
            step.activate(now);
        }
        self.search_status = "Generating AI response...".to_string();
        self.set_progress(80);
        self.is_streaming = true;
        self.phase = Phase::Streaming;
    }

    pub fn append_fragment(&mut self, fragment: &str) {
        self.current_ai_response.push_str(fragment);
    }

    /// The turn as it stands, with every step completed and its metrics filled in.
    pub fn finished_message(&self, query: &str, now: DateTime<Utc>) -> Message {
        let end = now.timestamp_millis();
        let found = self.current_results.len();
        let response_length = self.current_ai_response.chars().count();

        let search_steps = self
            .search_steps
            .iter()
            .cloned()
            .map(|mut step| {
                if step.status != StepStatus::Completed {
                    step.complete(end);
                }
                if let Some(details) = step.details.as_mut() {
                    match step.id.as_str() {
                        STEP_SEARCH | STEP_READ => details.sources_found = Some(found),
                        STEP_GENERATE => details.response_length = Some(response_length),
                        _ => {}
                    }
                }
                if step.id == STEP_READ {
                    step.sources = Some(self.current_results.clone());
                }
                step
            })
            .collect();

        Message {
            id: nanoid::nanoid!(),
            query: query.to_string(),
            results: self.current_results.clone(),
            images: self.current_images.clone(),
            ai_response: self.current_ai_response.clone(),
            search_steps,
            selected_domain: self.selected_domain.clone(),
            timestamp: now,
        }
    }

    /// Appends the finished turn to the history and clears the transient fields.
    pub fn complete_cycle(&mut self, message: Message) {
        self.messages.push(message);
        self.current_query.clear();
        self.current_results.clear();
        self.current_images.clear();
        self.current_ai_response.clear();
        self.search_steps.clear();
        self.is_searching = false;
        self.is_streaming = false;
        self.search_status = "Complete".to_string();
        self.progress = 100;
        self.active_tab = Tab::Answer;
        self.phase = Phase::Idle;
    }

    /// Ends the cycle with an error. Partial results, answer and steps are
    /// cleared like on success; the query is kept so it can be resubmitted.
    pub fn fail_cycle(&mut self, status: String) {
        self.current_results.clear();
        self.current_images.clear();
        self.current_ai_response.clear();
        self.search_steps.clear();
        self.is_searching = false;
        self.is_streaming = false;
        self.search_status = status;
        self.progress = 0;
        self.phase = Phase::Failed;
    }

    /// The most recent turns, oldest first, sent along as conversation context.
    pub fn prior_turns(&self) -> Vec<PriorTurn> {
        let skip = self.messages.len().saturating_sub(PRIOR_TURN_WINDOW);
        self.messages[skip..]
            .iter()
            .map(Message::as_prior_turn)
            .collect()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum CycleOutcome {
    /// The guard refused to start: blank query or a cycle already in flight.
    Rejected,
    Completed(Message),
    Failed(String),
}

pub struct SearchOrchestrator {
    search: Arc<dyn SearchBackend>,
    answers: Arc<dyn AnswerBackend>,
    state: watch::Sender<SearchState>,
}

fn now_millis() -> i64 {
    Utc::now().timestamp_millis()
}

impl SearchOrchestrator {
    pub fn new(search: Arc<dyn SearchBackend>, answers: Arc<dyn AnswerBackend>) -> Self {
        let (state, _) = watch::channel(SearchState::default());
        Self {
            search,
            answers,
            state,
        }
    }

    pub fn subscribe(&self) -> watch::Receiver<SearchState> {
        self.state.subscribe()
    }

    pub fn snapshot(&self) -> SearchState {
        self.state.borrow().clone()
    }

    pub fn update_query(&self, query: &str) {
        self.state.send_modify(|s| s.current_query = query.to_string());
    }

    pub fn update_selected_domain(&self, domain: DomainOption) {
        self.state.send_modify(|s| s.selected_domain = domain);
    }

    pub fn set_active_tab(&self, tab: Tab) {
        self.state.send_modify(|s| s.active_tab = tab);
    }

    fn fail(&self, status: String) -> CycleOutcome {
        warn!(status = %status, "search cycle failed");
        self.state.send_modify(|s| s.fail_cycle(status.clone()));
        CycleOutcome::Failed(status)
    }

    /// Runs one full cycle for the current query: search, then stream the
    /// answer, then fold the turn into the history.
    pub async fn handle_search(&self) -> CycleOutcome {
        let started = self.state.send_if_modified(|s| s.begin_cycle(now_millis()));
        if !started {
            debug!("search request ignored: blank query or cycle in flight");
            return CycleOutcome::Rejected;
        }

        let (query, domains, prior_turns) = {
            let s = self.state.borrow();
            (
                s.current_query.clone(),
                s.selected_domain.allow_list().map(|d| d.to_vec()),
                s.prior_turns(),
            )
        };
        info!(query = %query, domains = ?domains, "search cycle started");

        self.state.send_modify(|s| s.search_dispatched());
        let outcome = match self.search.search(&query, domains.as_deref()).await {
            Ok(outcome) => outcome,
            Err(e) => return self.fail(format!("Search failed: {e}")),
        };

        let sources = outcome.results.clone();
        self.state.send_modify(|s| s.search_succeeded(outcome, now_millis()));
        self.state.send_modify(|s| s.generation_started(now_millis()));

        let request = AnswerRequest {
            query: query.clone(),
            sources,
            messages: prior_turns,
        };
        let mut fragments = match self.answers.answer(&request).await {
            Ok(fragments) => fragments,
            Err(e) => return self.fail(format!("AI response failed: {e}")),
        };

        while let Some(fragment) = fragments.next().await {
            match fragment {
                Ok(text) => self.state.send_modify(|s| s.append_fragment(&text)),
                Err(e) => return self.fail(format!("AI response failed: {e}")),
            }
        }

        let message = self.state.borrow().finished_message(&query, Utc::now());
        self.state.send_modify(|s| s.complete_cycle(message.clone()));
        info!(
            query = %query,
            sources = message.results.len(),
            length = message.ai_response.chars().count(),
            "search cycle complete"
        );
        CycleOutcome::Completed(message)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn result(i: usize) -> SearchResult {
        SearchResult {
            title: format!("R{i}"),
            url: format!("https://r{i}.example/"),
            content: "c".into(),
            domain: format!("r{i}.example"),
            snippet: "c".into(),
        }
    }

    fn outcome(n: usize) -> SearchOutcome {
        SearchOutcome {
            results: (0..n).map(result).collect(),
            images: vec![],
        }
    }

    fn state_with_query(q: &str) -> SearchState {
        SearchState {
            current_query: q.to_string(),
            ..Default::default()
        }
    }

    #[test]
    fn test_begin_cycle_guards() {
        let mut blank = state_with_query("   ");
        let before = blank.clone();
        assert!(!blank.begin_cycle(1));
        assert_eq!(blank, before);

        let mut s = state_with_query("rust");
        assert!(s.begin_cycle(1));
        assert!(s.is_searching);
        assert_eq!(s.progress, 10);
        assert_eq!(s.phase, Phase::Searching);
        let statuses: Vec<_> = s.search_steps.iter().map(|st| st.status).collect();
        assert_eq!(
            statuses,
            vec![StepStatus::Active, StepStatus::Pending, StepStatus::Pending]
        );

        let in_flight = s.clone();
        assert!(!s.begin_cycle(2));
        assert_eq!(s, in_flight);
    }

    #[test]
    fn test_full_transition_sequence() {
        let mut s = state_with_query("rust");
        let mut progress = vec![];

        s.begin_cycle(1_000);
        progress.push(s.progress);
        s.search_dispatched();
        progress.push(s.progress);
        s.search_succeeded(outcome(2), 1_400);
        progress.push(s.progress);
        assert_eq!(s.phase, Phase::AwaitingGeneration);
        assert_eq!(s.search_steps[0].status, StepStatus::Completed);
        assert_eq!(s.search_steps[0].details.as_ref().unwrap().duration, Some(400));
        assert_eq!(s.search_steps[1].status, StepStatus::Active);
        assert_eq!(
            s.search_steps[1].description.as_deref(),
            Some("2 sources found")
        );

        s.generation_started(1_500);
        progress.push(s.progress);
        assert!(s.is_streaming);
        assert_eq!(s.search_steps[1].status, StepStatus::Completed);
        assert_eq!(s.search_steps[2].status, StepStatus::Active);

        s.append_fragment("Hello ");
        s.append_fragment("world [1].");
        assert_eq!(s.current_ai_response, "Hello world [1].");

        let now = DateTime::<Utc>::from_timestamp_millis(2_000).unwrap();
        let message = s.finished_message("rust", now);
        s.complete_cycle(message.clone());
        progress.push(s.progress);

        assert_eq!(progress, vec![10, 30, 60, 80, 100]);
        assert!(progress.windows(2).all(|w| w[0] <= w[1]));

        assert_eq!(message.ai_response, "Hello world [1].");
        assert_eq!(message.results.len(), 2);
        assert!(
            message
                .search_steps
                .iter()
                .all(|st| st.status == StepStatus::Completed)
        );
        let generate = message.search_steps[2].details.as_ref().unwrap();
        assert_eq!(generate.response_length, Some(16));
        assert_eq!(generate.end_time, Some(2_000));
        assert_eq!(generate.duration, Some(500));
        let read = message.search_steps[1].details.as_ref().unwrap();
        assert_eq!(read.sources_found, Some(2));

        assert_eq!(s.messages, vec![message]);
        assert!(s.current_query.is_empty());
        assert!(s.current_results.is_empty());
        assert!(s.current_ai_response.is_empty());
        assert!(s.search_steps.is_empty());
        assert!(!s.is_searching);
        assert_eq!(s.search_status, "Complete");
        assert_eq!(s.phase, Phase::Idle);
    }

    #[test]
    fn test_fail_cycle_clears_partial_state_and_keeps_query() {
        let mut s = state_with_query("rust");
        s.begin_cycle(1);
        s.search_succeeded(outcome(3), 2);
        s.fail_cycle("AI response failed: boom".into());

        assert_eq!(s.progress, 0);
        assert!(!s.is_searching);
        assert!(!s.is_streaming);
        assert_eq!(s.phase, Phase::Failed);
        assert!(s.current_results.is_empty());
        assert!(s.search_steps.is_empty());
        assert_eq!(s.current_query, "rust");
        assert!(s.messages.is_empty());

        // a failed cycle can be retried
        assert!(s.begin_cycle(3));
    }

    #[test]
    fn test_prior_turns_window() {
        let mut s = SearchState::default();
        for i in 0..5 {
            s.current_query = format!("q{i}");
            s.begin_cycle(0);
            s.append_fragment(&format!("a{i}"));
            let m = s.finished_message(&format!("q{i}"), Utc::now());
            s.complete_cycle(m);
        }
        let turns = s.prior_turns();
        let queries: Vec<_> = turns.iter().map(|t| t.query.as_str()).collect();
        assert_eq!(queries, vec!["q2", "q3", "q4"]);
        assert_eq!(turns[2].ai_response, "a4");
    }
}
