use chrono::{DateTime, Local, Utc};

pub fn source_icon(domain: &str) -> &'static str {
    if domain.contains("apple") {
        "🍎"
    } else if domain.contains("linkedin") {
        "💼"
    } else if domain.contains("twitter") || domain.contains("x.com") {
        "𝕏"
    } else if domain.contains("github") {
        "⚡"
    } else if domain.contains("reddit") {
        "📱"
    } else if domain.contains("youtube") {
        "📺"
    } else if domain.contains("wikipedia") {
        "📚"
    } else {
        "🌐"
    }
}

pub fn format_duration(ms: i64) -> String {
    if ms < 1000 {
        format!("{ms}ms")
    } else {
        format!("{:.1}s", ms as f64 / 1000.0)
    }
}

/// Local time of day, e.g. `14:03:27`.
pub fn format_timestamp(timestamp: &DateTime<Utc>) -> String {
    timestamp.with_timezone(&Local).format("%H:%M:%S").to_string()
}
