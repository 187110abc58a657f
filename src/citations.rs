use once_cell::sync::Lazy;
use regex::{Captures, Regex};

use crate::data_models::SearchResult;

pub const CITATION_TARGET_PREFIX: &str = "citation-";

// A marker optionally followed by an existing citation target; the second group
// lets already rewritten markers pass through untouched.
static MARKER: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\[(\d+)\](\(citation-\d+\))?").expect("valid citation regex"));

static CITATION_LINK: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\[(\d+)\]\(citation-(\d+)\)").expect("valid citation link regex"));

/// Rewrites `[n]` markers into markdown links `[n](citation-<n-1>)` pointing at
/// the zero-based index of the cited result. Markers whose index is out of
/// range stay as plain text.
pub fn preprocess_citations(text: &str, results: &[SearchResult]) -> String {
    MARKER
        .replace_all(text, |caps: &Captures| {
            if caps.get(2).is_some() {
                return caps[0].to_string();
            }
            match source_index(&caps[1], results.len()) {
                Some(index) => format!("[{}]({CITATION_TARGET_PREFIX}{index})", &caps[1]),
                None => caps[0].to_string(),
            }
        })
        .into_owned()
}

fn source_index(number: &str, len: usize) -> Option<usize> {
    let number: usize = number.parse().ok()?;
    let index = number.checked_sub(1)?;
    (index < len).then_some(index)
}

/// What a link in a rendered answer points to.
#[derive(Debug, Clone, PartialEq)]
pub enum CitationLink {
    /// A citation badge: the 1-based number shown and the source it opens.
    Source {
        number: usize,
        url: String,
        title: String,
    },
    Plain(String),
}

impl CitationLink {
    pub fn resolve(href: &str, results: &[SearchResult]) -> CitationLink {
        let cited = href
            .strip_prefix(CITATION_TARGET_PREFIX)
            .and_then(|idx| idx.parse::<usize>().ok())
            .and_then(|idx| results.get(idx).map(|r| (idx, r)));

        match cited {
            Some((idx, result)) => CitationLink::Source {
                number: idx + 1,
                url: result.url.clone(),
                title: result.title.clone(),
            },
            None => CitationLink::Plain(href.to_string()),
        }
    }
}

/// Replaces every rewritten citation link with a link to the cited source's url.
pub fn render_links(text: &str, results: &[SearchResult]) -> String {
    CITATION_LINK
        .replace_all(text, |caps: &Captures| {
            let href = format!("{CITATION_TARGET_PREFIX}{}", &caps[2]);
            match CitationLink::resolve(&href, results) {
                CitationLink::Source { number, url, .. } => format!("[{number}]({url})"),
                CitationLink::Plain(_) => caps[0].to_string(),
            }
        })
        .into_owned()
}

/// Zero-based indices of the sources cited in `text`, in order of first citation.
pub fn cited_indices(text: &str, results: &[SearchResult]) -> Vec<usize> {
    let mut cited = Vec::new();
    for caps in MARKER.captures_iter(text) {
        if let Some(index) = source_index(&caps[1], results.len()) {
            if !cited.contains(&index) {
                cited.push(index);
            }
        }
    }
    cited
}
