//! Name/company extraction: asks the text model who wrote a recruiter email
//! and for which company, then pulls a JSON object out of the free-text
//! completion.

use std::sync::Arc;

use serde::Deserialize;
use tracing::{debug, info, warn};

use crate::error::ExtractionError;
use crate::llm::{ChatMessage, CompletionRequest, LlmProvider};

/// Default completion budget; the answer is a one-line JSON object.
pub const DEFAULT_MAX_TOKENS: u32 = 20;

/// Sampling temperature for extraction.
const EXTRACTION_TEMPERATURE: f32 = 0.0;

/// Recruiter name and company, either of which may be unknown.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct ExtractionResult {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub company: Option<String>,
}

impl ExtractionResult {
    /// Fixed result returned in bypass mode.
    pub fn canned() -> Self {
        Self {
            name: Some("Steve".into()),
            company: Some("Apple".into()),
        }
    }
}

enum Mode {
    Live {
        llm: Arc<dyn LlmProvider>,
        max_tokens: u32,
    },
    Bypass,
}

/// Extracts recruiter name and company from an email body.
pub struct Extractor {
    mode: Mode,
}

impl Extractor {
    /// Extractor backed by a real text-generation provider.
    pub fn new(llm: Arc<dyn LlmProvider>, max_tokens: u32) -> Self {
        Self {
            mode: Mode::Live { llm, max_tokens },
        }
    }

    /// Extractor that never calls out and always returns
    /// [`ExtractionResult::canned`].
    pub fn bypass() -> Self {
        Self { mode: Mode::Bypass }
    }

    pub async fn extract(&self, body: &str) -> Result<ExtractionResult, ExtractionError> {
        let (llm, max_tokens) = match &self.mode {
            Mode::Bypass => {
                info!("Bypassing OpenAI API, using canned extraction");
                return Ok(ExtractionResult::canned());
            }
            Mode::Live { llm, max_tokens } => (llm, *max_tokens),
        };

        let request = CompletionRequest::new(vec![ChatMessage::user(build_prompt(body))])
            .with_temperature(EXTRACTION_TEMPERATURE)
            .with_max_tokens(max_tokens);

        let response = llm.complete(request).await?;
        debug!(
            model = llm.model_name(),
            output_tokens = response.output_tokens,
            "Extraction completion received"
        );

        parse_completion(&response.content).inspect_err(|e| {
            warn!(
                raw_response = %response.content,
                error = %e,
                "Could not decode completion response"
            );
        })
    }
}

/// Few-shot prompt: one worked example, then the real email.
pub fn build_prompt(body: &str) -> String {
    format!(
        "Given an email from a recruiter, return the recruiter's first name and the \
         recruiter's company's name formatted as valid JSON.\n\
         \n\
         Example: ***\n\
         Email:\n\
         '''\n\
         Hi Matt! This is Steve Jobs with Apple Computer Company! I'm interested in having \
         you join our team here.\n\
         '''\n\
         \n\
         Response:\n\
         {{\"name\": \"Steve\", \"company\": \"Apple Computer Company\"}}\n\
         ***\n\
         \n\
         Email:\n\
         '''\n\
         {body}\n\
         \n\
         '''\n\
         \n\
         Response:\n"
    )
}

/// Decode the first balanced `{...}` span of a completion.
pub fn parse_completion(raw: &str) -> Result<ExtractionResult, ExtractionError> {
    let span = first_json_object(raw).ok_or_else(|| ExtractionError::NoJsonObject {
        raw: raw.to_string(),
    })?;
    serde_json::from_str(span).map_err(|source| ExtractionError::InvalidJson {
        raw: raw.to_string(),
        source,
    })
}

/// Find the first balanced `{...}` span. Braces inside JSON string literals
/// do not count toward nesting.
pub fn first_json_object(text: &str) -> Option<&str> {
    let start = text.find('{')?;
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;

    for (offset, ch) in text[start..].char_indices() {
        if in_string {
            match ch {
                _ if escaped => escaped = false,
                '\\' => escaped = true,
                '"' => in_string = false,
                _ => {}
            }
            continue;
        }
        match ch {
            '"' => in_string = true,
            '{' => depth += 1,
            '}' => {
                depth -= 1;
                if depth == 0 {
                    return Some(&text[start..=start + offset]);
                }
            }
            _ => {}
        }
    }
    None
}
