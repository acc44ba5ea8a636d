//! Query expansion and answer generation.
//!
//! A [`Generator`] is an optional chat model. It rewrites a question into
//! extra search queries and writes the final answer from retrieved
//! passages. With `provider = "disabled"` both steps degrade gracefully:
//! no extra queries, and the "answer" is the formatted passages.

use anyhow::{anyhow, Result};
use libris_core::models::SearchResult;
use serde_json::Value;
use tracing::debug;

use crate::config::{GenerationConfig, GenerationProviderKind};
use crate::http;

const OPENAI_CHAT_URL: &str = "https://api.openai.com/v1/chat/completions";
const DEFAULT_OLLAMA_URL: &str = "http://localhost:11434";

/// Lines this short are not useful queries.
const MIN_VARIANT_CHARS: usize = 10;

const NO_RESULTS: &str = "No relevant documents found.";

pub enum Generator {
    Disabled,
    OpenAI {
        client: reqwest::Client,
        api_key: String,
        model: String,
        temperature: f32,
        max_retries: u32,
    },
    Ollama {
        client: reqwest::Client,
        url: String,
        model: String,
        temperature: f32,
        max_retries: u32,
    },
}

impl Generator {
    pub fn from_config(config: &GenerationConfig) -> Result<Self> {
        let model = || {
            config
                .model
                .clone()
                .ok_or_else(|| anyhow!("generation.model required for {:?}", config.provider))
        };

        Ok(match config.provider {
            GenerationProviderKind::Disabled => Self::Disabled,
            GenerationProviderKind::OpenAI => Self::OpenAI {
                client: http::client(config.timeout_secs)?,
                api_key: std::env::var("OPENAI_API_KEY")
                    .map_err(|_| anyhow!("OPENAI_API_KEY environment variable not set"))?,
                model: model()?,
                temperature: config.temperature,
                max_retries: config.max_retries,
            },
            GenerationProviderKind::Ollama => Self::Ollama {
                client: http::client(config.timeout_secs)?,
                url: config
                    .url
                    .clone()
                    .unwrap_or_else(|| DEFAULT_OLLAMA_URL.to_string()),
                model: model()?,
                temperature: config.temperature,
                max_retries: config.max_retries,
            },
        })
    }

    pub fn is_enabled(&self) -> bool {
        !matches!(self, Self::Disabled)
    }

    /// One chat turn with a single user message.
    pub async fn complete(&self, prompt: &str) -> Result<String> {
        let messages = serde_json::json!([{ "role": "user", "content": prompt }]);

        match self {
            Self::Disabled => Err(anyhow!("Generation provider is disabled")),
            Self::OpenAI {
                client,
                api_key,
                model,
                temperature,
                max_retries,
            } => {
                let body = serde_json::json!({
                    "model": model,
                    "messages": messages,
                    "temperature": temperature,
                });
                let json = http::post_json(
                    client,
                    OPENAI_CHAT_URL,
                    Some(api_key),
                    &body,
                    *max_retries,
                    "OpenAI",
                )
                .await?;
                message_content(&json["choices"][0]["message"])
            }
            Self::Ollama {
                client,
                url,
                model,
                temperature,
                max_retries,
            } => {
                let body = serde_json::json!({
                    "model": model,
                    "messages": messages,
                    "stream": false,
                    "options": { "temperature": temperature },
                });
                let endpoint = format!("{}/api/chat", url.trim_end_matches('/'));
                let json =
                    http::post_json(client, &endpoint, None, &body, *max_retries, "Ollama")
                        .await?;
                message_content(&json["message"])
            }
        }
    }

    /// `[question]` followed by up to `n` generated alternative queries.
    pub async fn expand_query(&self, question: &str, n: usize) -> Result<Vec<String>> {
        if !self.is_enabled() || n == 0 {
            return Ok(vec![question.to_string()]);
        }

        let response = self.complete(&expansion_prompt(question, n)).await?;
        let variants = parse_variants(question, &response, n);
        debug!(count = variants.len() - 1, "expanded query");
        Ok(variants)
    }

    /// Answer `question` from `results`, or list the passages when
    /// generation is disabled.
    pub async fn answer(&self, question: &str, results: &[SearchResult]) -> Result<String> {
        if results.is_empty() {
            return Ok(NO_RESULTS.to_string());
        }
        if !self.is_enabled() {
            return Ok(format_passages(results));
        }

        let prompt = format!(
            "Answer this question using only the context below. \
             Cite passages by their [number].\n\n\
             Context:\n{}\n\nQuestion: {}\n\nAnswer:",
            format_passages(results),
            question
        );
        Ok(self.complete(&prompt).await?.trim().to_string())
    }
}

fn message_content(message: &Value) -> Result<String> {
    message
        .get("content")
        .and_then(Value::as_str)
        .map(str::to_string)
        .ok_or_else(|| anyhow!("Invalid chat response: missing message content"))
}

fn expansion_prompt(question: &str, n: usize) -> String {
    format!(
        "You generate search queries for a document library. \
         Break the question below into sub-questions that can be answered in isolation.\n\
         Question: {}\n\
         Output ({} queries), one per line, no numbering:",
        question, n
    )
}

/// One candidate per non-blank line; short lines and list markers dropped.
pub fn parse_variants(question: &str, response: &str, n: usize) -> Vec<String> {
    let mut variants = vec![question.to_string()];
    variants.extend(
        response
            .lines()
            .map(strip_list_marker)
            .filter(|line| line.chars().count() > MIN_VARIANT_CHARS)
            .filter(|line| *line != question)
            .take(n)
            .map(str::to_string),
    );
    variants
}

fn strip_list_marker(line: &str) -> &str {
    let line = line.trim();
    let without_number = line.trim_start_matches(|c: char| c.is_ascii_digit());
    let rest = if without_number.len() < line.len() {
        without_number
            .strip_prefix('.')
            .or_else(|| without_number.strip_prefix(')'))
            .unwrap_or(line)
    } else {
        line.strip_prefix("- ")
            .or_else(|| line.strip_prefix("* "))
            .unwrap_or(line)
    };
    rest.trim()
}

/// `[n] Title > Section (pp. a-b)` headers followed by chunk text.
pub fn format_passages(results: &[SearchResult]) -> String {
    results
        .iter()
        .enumerate()
        .map(|(i, r)| {
            format!(
                "[{}] {} > {} (pp. {})\n{}",
                i + 1,
                r.metadata.source_title,
                r.metadata.section_title,
                r.metadata.page_range,
                r.content.trim()
            )
        })
        .collect::<Vec<_>>()
        .join("\n\n")
}
