use dotenvy::dotenv;
use once_cell::sync::Lazy;
use std::env;

pub static CONFIG: Lazy<Config> = Lazy::new(|| {
    dotenv().ok(); // Load .env file if present
    Config::from_env()
});

#[derive(Debug, Clone)]
pub struct Config {
    pub tavily_api_key: Option<String>,
    pub openai_api_key: Option<String>,
    pub tavily_api_url: String,
    pub openai_base_url: String,
    pub openai_model: String,
    pub bind_addr: String,
    pub static_dir: String,
    /// When false the chat endpoint waits for the whole answer and sends it as one line.
    pub chat_streaming: bool,
}

impl Config {
    pub fn from_env() -> Config {
        Config {
            tavily_api_key: get_optional_env("TAVILY_API_KEY"),
            openai_api_key: get_optional_env("OPENAI_API_KEY"),
            tavily_api_url: get_env_or_default("TAVILY_API_URL", "https://api.tavily.com/search"),
            openai_base_url: get_env_or_default("OPENAI_BASE_URL", "https://api.openai.com/v1"),
            openai_model: get_env_or_default("OPENAI_MODEL", "gpt-4o"),
            bind_addr: get_env_or_default("BIND_ADDR", "0.0.0.0:3000"),
            static_dir: get_env_or_default("STATIC_DIR", "static"),
            chat_streaming: parse_flag(&get_env_or_default("CHAT_STREAMING", "true")),
        }
    }
}

fn get_optional_env(key: &str) -> Option<String> {
    env::var(key).ok().filter(|v| !v.trim().is_empty())
}

fn get_env_or_default(key: &str, default: &str) -> String {
    env::var(key).unwrap_or_else(|_| default.to_string())
}

fn parse_flag(value: &str) -> bool {
    !matches!(
        value.trim().to_ascii_lowercase().as_str(),
        "false" | "0" | "no" | "off"
    )
}
