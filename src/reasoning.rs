//! Reasoning provider abstraction for compliance judgments.
//!
//! Defines the [`ReasoningProvider`] trait and concrete backends:
//! - **[`DisabledReasoner`]** — returns errors; used when reasoning is not configured.
//! - **[`OpenAiReasoner`]** — calls the OpenAI chat completions API.
//! - **[`OllamaReasoner`]** — calls a local Ollama instance's `/api/chat` endpoint.
//!
//! The contract is one prompt in, one structured [`Judgment`] out. A
//! malformed model response is a provider error; turning provider errors
//! into `analysis_error` findings is the compliance engine's job, never
//! this module's.
//!
//! Retry policy matches the embedding providers: 429 and 5xx retry with
//! exponential backoff capped at 2^5 seconds, other 4xx fail immediately.

use std::time::Duration;

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use serde::Deserialize;
use tracing::warn;

use crate::config::ReasoningConfig;
use crate::models::Verdict;
use crate::search::ScoredClause;

/// Structured outcome of judging one chunk against candidate clauses.
#[derive(Debug, Clone)]
pub struct Judgment {
    pub verdict: Verdict,
    pub explanation: String,
    pub suggested_fix: Option<String>,
    /// Indices into the candidate clause list the model cited, 0-based,
    /// most relevant first.
    pub cited: Vec<usize>,
}

/// One prompt in, one parsed judgment out. `candidate_count` bounds the
/// clause citations the model may make.
#[async_trait]
pub trait ReasoningProvider: Send + Sync {
    fn model_name(&self) -> &str;
    async fn judge(&self, prompt: &str, candidate_count: usize) -> Result<Judgment>;
}

/// Create the appropriate [`ReasoningProvider`] based on configuration.
pub fn create_reasoner(config: &ReasoningConfig) -> Result<Box<dyn ReasoningProvider>> {
    match config.provider.as_str() {
        "disabled" => Ok(Box::new(DisabledReasoner)),
        "openai" => Ok(Box::new(OpenAiReasoner::new(config)?)),
        "ollama" => Ok(Box::new(OllamaReasoner::new(config)?)),
        other => bail!("Unknown reasoning provider: {}", other),
    }
}

/// A no-op reasoning provider that always returns errors.
pub struct DisabledReasoner;

#[async_trait]
impl ReasoningProvider for DisabledReasoner {
    fn model_name(&self) -> &str {
        "disabled"
    }
    async fn judge(&self, _prompt: &str, _candidate_count: usize) -> Result<Judgment> {
        bail!("Reasoning provider is disabled")
    }
}

/// Build the judgment prompt for one chunk and its candidate clauses.
///
/// Clauses are numbered from 1 in the prompt so the model can cite them
/// by number; [`parse_judgment`] converts back to 0-based indices.
pub fn build_judgment_prompt(chunk_text: &str, category: Option<&str>, clauses: &[ScoredClause]) -> String {
    let mut prompt = String::new();
    prompt.push_str(
        "You are reviewing one annotation from an engineering drawing against \
         candidate standards clauses.\n\nAnnotation",
    );
    if let Some(category) = category {
        prompt.push_str(&format!(" (category: {})", category));
    }
    prompt.push_str(":\n");
    prompt.push_str(chunk_text);
    prompt.push_str("\n\nCandidate clauses:\n");
    for (i, clause) in clauses.iter().enumerate() {
        prompt.push_str(&format!(
            "{}. [{} {}] {}\n",
            i + 1,
            clause.standard,
            clause.clause_number,
            clause.text
        ));
    }
    prompt.push_str(
        "\nJudge whether the annotation complies with the cited clauses. \
         Respond with a single JSON object and nothing else:\n\
         {\"verdict\": \"compliant\" | \"non_compliant\" | \"uncertain\", \
         \"explanation\": \"...\", \
         \"suggested_fix\": \"...\" or null, \
         \"cited_clauses\": [clause numbers from the list above, most relevant first]}\n\
         Use \"uncertain\" when the clauses do not clearly apply.",
    );
    prompt
}

#[derive(Debug, Deserialize)]
struct RawJudgment {
    verdict: Verdict,
    explanation: String,
    #[serde(default)]
    suggested_fix: Option<String>,
    #[serde(default)]
    cited_clauses: Vec<u32>,
}

/// Parse a model response into a [`Judgment`].
///
/// Tolerates markdown code fences around the JSON object. Cited clause
/// numbers outside `1..=candidate_count` are dropped rather than failing
/// the whole judgment.
pub fn parse_judgment(raw: &str, candidate_count: usize) -> Result<Judgment> {
    let trimmed = strip_code_fence(raw.trim());
    let parsed: RawJudgment =
        serde_json::from_str(trimmed).context("reasoning response is not valid judgment JSON")?;

    let suggested_fix = parsed
        .suggested_fix
        .filter(|s| !s.trim().is_empty());
    let cited: Vec<usize> = parsed
        .cited_clauses
        .iter()
        .filter_map(|&n| {
            let n = n as usize;
            if (1..=candidate_count).contains(&n) {
                Some(n - 1)
            } else {
                None
            }
        })
        .collect();

    Ok(Judgment {
        verdict: parsed.verdict,
        explanation: parsed.explanation,
        suggested_fix,
        cited,
    })
}

fn strip_code_fence(s: &str) -> &str {
    let s = s.trim();
    let Some(rest) = s.strip_prefix("```") else {
        return s;
    };
    // Drop the info string ("json") on the opening fence line.
    let rest = match rest.find('\n') {
        Some(i) => &rest[i + 1..],
        None => rest,
    };
    rest.strip_suffix("```").unwrap_or(rest).trim()
}

// ============ OpenAI Reasoner ============

/// Reasoning provider backed by OpenAI's chat completions API.
///
/// Calls `POST {base_url}/v1/chat/completions` with the configured model.
/// Requires the `OPENAI_API_KEY` environment variable.
pub struct OpenAiReasoner {
    model: String,
    base_url: String,
    timeout_secs: u64,
    max_retries: u32,
}

impl OpenAiReasoner {
    pub fn new(config: &ReasoningConfig) -> Result<Self> {
        let model = config
            .model
            .clone()
            .ok_or_else(|| anyhow::anyhow!("reasoning.model required for OpenAI provider"))?;
        let base_url = config
            .url
            .clone()
            .unwrap_or_else(|| "https://api.openai.com".to_string());
        Ok(Self {
            model,
            base_url,
            timeout_secs: config.timeout_secs,
            max_retries: config.max_retries,
        })
    }
}

#[async_trait]
impl ReasoningProvider for OpenAiReasoner {
    fn model_name(&self) -> &str {
        &self.model
    }

    async fn judge(&self, prompt: &str, candidate_count: usize) -> Result<Judgment> {
        let api_key = std::env::var("OPENAI_API_KEY")
            .map_err(|_| anyhow::anyhow!("OPENAI_API_KEY not set"))?;

        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(self.timeout_secs))
            .build()?;

        let body = serde_json::json!({
            "model": self.model,
            "messages": [{"role": "user", "content": prompt}],
            "response_format": {"type": "json_object"},
            "temperature": 0,
        });

        let mut last_err: Option<anyhow::Error> = None;
        for attempt in 0..=self.max_retries {
            if attempt > 0 {
                let delay = Duration::from_secs(1 << (attempt - 1).min(5));
                tokio::time::sleep(delay).await;
            }

            let resp = client
                .post(format!("{}/v1/chat/completions", self.base_url))
                .bearer_auth(&api_key)
                .json(&body)
                .send()
                .await;

            match resp {
                Ok(response) => {
                    let status = response.status();
                    if status.is_success() {
                        let payload: serde_json::Value = response.json().await?;
                        let content = payload["choices"][0]["message"]["content"]
                            .as_str()
                            .ok_or_else(|| {
                                anyhow::anyhow!("OpenAI response missing message content")
                            })?;
                        return parse_judgment(content, candidate_count);
                    }

                    if status.as_u16() == 429 || status.is_server_error() {
                        let body_text = response.text().await.unwrap_or_default();
                        warn!(status = %status, attempt, "reasoning call failed, will retry");
                        last_err = Some(anyhow::anyhow!(
                            "OpenAI API error {}: {}",
                            status,
                            body_text
                        ));
                        continue;
                    }

                    let body_text = response.text().await.unwrap_or_default();
                    bail!("OpenAI API error {}: {}", status, body_text);
                }
                Err(e) => {
                    last_err = Some(e.into());
                    continue;
                }
            }
        }

        Err(last_err.unwrap_or_else(|| anyhow::anyhow!("reasoning call failed")))
    }
}

// ============ Ollama Reasoner ============

/// Reasoning provider backed by a local Ollama instance.
///
/// Calls `POST /api/chat` on the configured URL (default
/// `http://localhost:11434`) with `"format": "json"`.
pub struct OllamaReasoner {
    model: String,
    url: String,
    timeout_secs: u64,
    max_retries: u32,
}

impl OllamaReasoner {
    pub fn new(config: &ReasoningConfig) -> Result<Self> {
        let model = config
            .model
            .clone()
            .ok_or_else(|| anyhow::anyhow!("reasoning.model required for Ollama provider"))?;
        let url = config
            .url
            .clone()
            .unwrap_or_else(|| "http://localhost:11434".to_string());
        Ok(Self {
            model,
            url,
            timeout_secs: config.timeout_secs,
            max_retries: config.max_retries,
        })
    }
}

#[async_trait]
impl ReasoningProvider for OllamaReasoner {
    fn model_name(&self) -> &str {
        &self.model
    }

    async fn judge(&self, prompt: &str, candidate_count: usize) -> Result<Judgment> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(self.timeout_secs))
            .build()?;

        let body = serde_json::json!({
            "model": self.model,
            "messages": [{"role": "user", "content": prompt}],
            "format": "json",
            "stream": false,
        });

        let mut last_err: Option<anyhow::Error> = None;
        for attempt in 0..=self.max_retries {
            if attempt > 0 {
                let delay = Duration::from_secs(1 << (attempt - 1).min(5));
                tokio::time::sleep(delay).await;
            }

            let resp = client
                .post(format!("{}/api/chat", self.url))
                .json(&body)
                .send()
                .await;

            match resp {
                Ok(response) => {
                    let status = response.status();
                    if status.is_success() {
                        let payload: serde_json::Value = response.json().await?;
                        let content = payload["message"]["content"].as_str().ok_or_else(|| {
                            anyhow::anyhow!("Ollama response missing message content")
                        })?;
                        return parse_judgment(content, candidate_count);
                    }

                    if status.as_u16() == 429 || status.is_server_error() {
                        let body_text = response.text().await.unwrap_or_default();
                        warn!(status = %status, attempt, "reasoning call failed, will retry");
                        last_err = Some(anyhow::anyhow!(
                            "Ollama API error {}: {}",
                            status,
                            body_text
                        ));
                        continue;
                    }

                    let body_text = response.text().await.unwrap_or_default();
                    bail!("Ollama API error {}: {}", status, body_text);
                }
                Err(e) => {
                    last_err = Some(e.into());
                    continue;
                }
            }
        }

        Err(last_err.unwrap_or_else(|| anyhow::anyhow!("reasoning call failed")))
    }
}
