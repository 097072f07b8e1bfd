//! Where riddles come from. The engine treats the source as opaque: one
//! `generate` call per cooldown, any failure falls back to the built-in
//! riddle.

use serde::Deserialize;
use std::env;
use std::future::Future;
use std::sync::atomic::{AtomicUsize, Ordering};

const DEFAULT_API_URL: &str =
    "https://generativelanguage.googleapis.com/v1beta/models/gemini-2.5-flash:generateContent";

const RIDDLE_PROMPT: &str = "Generate a short, fun riddle about Computer Science, Programming, \
or Technology. Return ONLY a JSON object with three fields: \"question\", \"answer\", and \
\"hint\". Do not wrap in markdown code blocks.";

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct Riddle {
    pub question: String,
    pub answer: String,
    pub hint: String,
}

pub fn fallback_riddle() -> Riddle {
    Riddle {
        question: "I have keys but no locks. I have a space but no room. You can enter, but \
                   never leave. What am I?"
            .to_string(),
        answer: "keyboard".to_string(),
        hint: "I am an input device.".to_string(),
    }
}

pub trait RiddleSource: Send + Sync + 'static {
    fn generate(&self) -> impl Future<Output = anyhow::Result<Riddle>> + Send;
}

/// Calls a generateContent-style text API and parses the riddle JSON out of
/// the first candidate. Latency here is absorbed by the cooldown window.
pub struct HttpRiddleSource {
    client: reqwest::Client,
    url: String,
}

#[derive(Debug, serde::Serialize)]
struct ApiRequest {
    contents: Vec<ApiContent>,
}

#[derive(Debug, serde::Serialize)]
struct ApiContent {
    parts: Vec<ApiPart>,
}

#[derive(Debug, serde::Serialize)]
struct ApiPart {
    text: String,
}

#[derive(Debug, Deserialize)]
struct ApiResponse {
    #[serde(default)]
    candidates: Vec<ApiCandidate>,
}

#[derive(Debug, Deserialize)]
struct ApiCandidate {
    content: ApiCandidateContent,
}

#[derive(Debug, Deserialize)]
struct ApiCandidateContent {
    #[serde(default)]
    parts: Vec<ApiResponsePart>,
}

#[derive(Debug, Deserialize)]
struct ApiResponsePart {
    text: String,
}

impl HttpRiddleSource {
    pub fn new(url: String) -> Self {
        Self {
            client: reqwest::Client::new(),
            url,
        }
    }

    /// Configured from `RIDDLE_API_KEY` (required) and `RIDDLE_API_URL`
    /// (optional override).
    pub fn from_env() -> Option<Self> {
        let key = env::var("RIDDLE_API_KEY")
            .ok()
            .map(|value| value.trim().to_string())
            .filter(|value| !value.is_empty())?;
        let base = env::var("RIDDLE_API_URL")
            .ok()
            .map(|value| value.trim().to_string())
            .filter(|value| !value.is_empty())
            .unwrap_or_else(|| DEFAULT_API_URL.to_string());
        Some(Self::new(format!("{base}?key={key}")))
    }
}

impl RiddleSource for HttpRiddleSource {
    async fn generate(&self) -> anyhow::Result<Riddle> {
        let request = ApiRequest {
            contents: vec![ApiContent {
                parts: vec![ApiPart {
                    text: RIDDLE_PROMPT.to_string(),
                }],
            }],
        };
        let response = self
            .client
            .post(&self.url)
            .json(&request)
            .send()
            .await?
            .error_for_status()?;
        let body: ApiResponse = response.json().await?;
        let text = body
            .candidates
            .first()
            .and_then(|candidate| candidate.content.parts.first())
            .map(|part| part.text.as_str())
            .ok_or_else(|| anyhow::anyhow!("empty response from model"))?;
        parse_riddle_json(text)
    }
}

fn parse_riddle_json(text: &str) -> anyhow::Result<Riddle> {
    let cleaned = text
        .trim()
        .trim_start_matches("```json")
        .trim_start_matches("```")
        .trim_end_matches("```")
        .trim();
    let riddle: Riddle = serde_json::from_str(cleaned)?;
    Ok(riddle)
}

/// Offline source that cycles through a small built-in list; used when no
/// API key is configured, and handy in tests.
#[derive(Debug, Default)]
pub struct StaticRiddleSource {
    cursor: AtomicUsize,
}

const BUILTIN_RIDDLES: [(&str, &str, &str); 3] = [
    (
        "I have keys but no locks. I have a space but no room. You can enter, but never leave. \
         What am I?",
        "keyboard",
        "I am an input device.",
    ),
    (
        "I follow you all day repeating everything you do, but I vanish the moment the lights \
         go out. What am I?",
        "shadow",
        "You cast me.",
    ),
    (
        "The more of me you take, the more you leave behind. What am I?",
        "footsteps",
        "Listen while you walk.",
    ),
];

impl StaticRiddleSource {
    pub fn new() -> Self {
        Self::default()
    }
}

impl RiddleSource for StaticRiddleSource {
    async fn generate(&self) -> anyhow::Result<Riddle> {
        let index = self.cursor.fetch_add(1, Ordering::Relaxed) % BUILTIN_RIDDLES.len();
        let (question, answer, hint) = BUILTIN_RIDDLES[index];
        Ok(Riddle {
            question: question.to_string(),
            answer: answer.to_string(),
            hint: hint.to_string(),
        })
    }
}
