use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One normalized web search hit. Produced by the search client and never
/// mutated afterwards; its position in the result list is its citation number.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct SearchResult {
    pub title: String,
    pub url: String,
    pub content: String,
    pub domain: String,
    #[serde(default)]
    pub snippet: String,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct SearchImage {
    pub url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum StepStatus {
    Pending,
    Active,
    Completed,
}

/// Timing and metrics for a step. Times are unix epoch milliseconds.
#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct StepDetails {
    pub start_time: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end_time: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sources_found: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub response_length: Option<usize>,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct SearchStep {
    pub id: String,
    pub title: String,
    pub status: StepStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sources: Option<Vec<SearchResult>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub details: Option<StepDetails>,
}

impl SearchStep {
    pub fn new(id: &str, title: &str, status: StepStatus, start_time: i64) -> SearchStep {
        SearchStep {
            id: id.to_string(),
            title: title.to_string(),
            status,
            description: None,
            sources: None,
            details: Some(StepDetails {
                start_time,
                ..Default::default()
            }),
        }
    }

    pub fn activate(&mut self, now: i64) {
        self.status = StepStatus::Active;
        self.details.get_or_insert_with(Default::default).start_time = now;
    }

    /// Marks the step completed and records its end time and duration.
    pub fn complete(&mut self, now: i64) {
        self.status = StepStatus::Completed;
        let details = self.details.get_or_insert_with(|| StepDetails {
            start_time: now,
            ..Default::default()
        });
        details.end_time = Some(now);
        details.duration = Some(now - details.start_time);
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct DomainOption {
    pub id: String,
    pub name: String,
    pub domains: Vec<String>,
    pub description: String,
    pub icon: String,
}

impl DomainOption {
    fn preset(id: &str, name: &str, domains: &[&str], description: &str, icon: &str) -> Self {
        DomainOption {
            id: id.to_string(),
            name: name.to_string(),
            domains: domains.iter().map(|d| d.to_string()).collect(),
            description: description.to_string(),
            icon: icon.to_string(),
        }
    }

    /// `None` when the preset searches the whole web.
    pub fn allow_list(&self) -> Option<&[String]> {
        if self.domains.is_empty() {
            None
        } else {
            Some(&self.domains)
        }
    }
}

impl Default for DomainOption {
    fn default() -> Self {
        domain_options().remove(0)
    }
}

/// The built-in domain filters. The first entry is unrestricted and is the default.
pub fn domain_options() -> Vec<DomainOption> {
    vec![
        DomainOption::preset("all", "All Web", &[], "Search across the entire web", "🌐"),
        DomainOption::preset(
            "reddit",
            "Reddit",
            &["reddit.com"],
            "Search Reddit discussions and communities",
            "🟠",
        ),
        DomainOption::preset(
            "news",
            "News Sites",
            &["cnn.com", "bbc.com", "reuters.com", "apnews.com", "npr.org"],
            "Search major news publications",
            "📰",
        ),
        DomainOption::preset(
            "academic",
            "Academic",
            &[
                "scholar.google.com",
                "arxiv.org",
                "pubmed.ncbi.nlm.nih.gov",
                "jstor.org",
            ],
            "Search academic papers and research",
            "🎓",
        ),
        DomainOption::preset(
            "tech",
            "Tech Sites",
            &[
                "stackoverflow.com",
                "github.com",
                "techcrunch.com",
                "arstechnica.com",
                "wired.com",
            ],
            "Search technology-focused websites",
            "💻",
        ),
    ]
}

pub fn find_domain_option(id: &str) -> Option<DomainOption> {
    domain_options().into_iter().find(|o| o.id == id)
}

/// The part of a finished turn that is sent back as conversation context.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct PriorTurn {
    pub query: String,
    pub ai_response: String,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    pub id: String,
    pub query: String,
    pub results: Vec<SearchResult>,
    pub images: Vec<SearchImage>,
    pub ai_response: String,
    pub search_steps: Vec<SearchStep>,
    pub selected_domain: DomainOption,
    pub timestamp: DateTime<Utc>,
}

impl Message {
    pub fn as_prior_turn(&self) -> PriorTurn {
        PriorTurn {
            query: self.query.clone(),
            ai_response: self.ai_response.clone(),
        }
    }
}

/// Returns at most `max_chars` characters of `text`, never splitting a character.
pub fn truncate_chars(text: &str, max_chars: usize) -> &str {
    match text.char_indices().nth(max_chars) {
        Some((byte_idx, _)) => &text[..byte_idx],
        None => text,
    }
}
