use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use tracing::{debug, warn};

use cadence_core::analysis::EmotionalAnalysis;
use cadence_core::types::{Channel, MutationAggressiveness, StepContent};

use crate::error::{LlmError, Result};
use crate::interface::LanguageModel;
use crate::types::{
    MessageAnalysisRequest, MutationDraft, MutationRequest, SequenceDraft, SequenceDraftRequest,
    TranscriptAnalysisRequest,
};

const API_VERSION: &str = "2023-06-01";
const ANALYSIS_MAX_TOKENS: u32 = 1024;
const MUTATION_MAX_TOKENS: u32 = 2048;
const SEQUENCE_MAX_TOKENS: u32 = 4096;

/// Mutation calls get 1.5× the analysis budget, capped at 45 s.
fn mutation_timeout(base: Duration) -> Duration {
    (base * 3 / 2).min(Duration::from_secs(45))
}

pub struct AnthropicModel {
    client: reqwest::Client,
    api_key: String,
    base_url: String,
    model: String,
    timeout: Duration,
}

impl AnthropicModel {
    pub fn new(api_key: String, base_url: String, model: String, timeout: Duration) -> Self {
        Self {
            client: reqwest::Client::new(),
            api_key,
            base_url,
            model,
            timeout,
        }
    }

    /// Send one strict-JSON prompt and return the text of the first content
    /// block. All four interface methods funnel through here.
    async fn complete(
        &self,
        system: &str,
        user: &str,
        max_tokens: u32,
        timeout: Duration,
    ) -> Result<String> {
        let body = serde_json::json!({
            "model": self.model,
            "max_tokens": max_tokens,
            "system": system,
            "messages": [{"role": "user", "content": user}],
        });
        let url = format!("{}/v1/messages", self.base_url);

        debug!(model = %self.model, "sending request to Anthropic");

        let resp = self
            .client
            .post(&url)
            .timeout(timeout)
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", API_VERSION)
            .header("content-type", "application/json")
            .json(&body)
            .send()
            .await?;

        let status = resp.status().as_u16();
        if status == 429 {
            let retry = resp
                .headers()
                .get("retry-after")
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.parse::<u64>().ok())
                .unwrap_or(5000);
            return Err(LlmError::RateLimited {
                retry_after_ms: retry,
            });
        }

        if !resp.status().is_success() {
            let text = resp.text().await.unwrap_or_default();
            warn!(status, body = %text, "Anthropic API error");
            return Err(LlmError::Api {
                status,
                message: text,
            });
        }

        let api_resp: ApiResponse = resp
            .json()
            .await
            .map_err(|e| LlmError::Parse(e.to_string()))?;

        api_resp
            .content
            .into_iter()
            .find_map(|block| match block {
                ContentBlock::Text { text } => Some(text),
                ContentBlock::Unknown => None,
            })
            .ok_or_else(|| LlmError::Parse("response contained no text block".into()))
    }
}

#[async_trait]
impl LanguageModel for AnthropicModel {
    fn name(&self) -> &str {
        &self.model
    }

    async fn analyze_message(&self, req: &MessageAnalysisRequest) -> Result<EmotionalAnalysis> {
        let history = if req.history.is_empty() {
            "(no prior conversation)".to_string()
        } else {
            req.history.join("\n")
        };
        let user = format!(
            "Channel: {}\n\nConversation so far:\n{}\n\nNew inbound message:\n{}",
            req.channel, history, req.body
        );
        let text = self
            .complete(ANALYSIS_SYSTEM_PROMPT, &user, ANALYSIS_MAX_TOKENS, self.timeout)
            .await?;
        parse_json_block(&text)
    }

    async fn analyze_transcript(
        &self,
        req: &TranscriptAnalysisRequest,
    ) -> Result<EmotionalAnalysis> {
        let user = format!(
            "Call disposition: {}\nDuration: {} seconds\n\nTranscript:\n{}",
            req.disposition, req.duration_secs, req.transcript
        );
        let text = self
            .complete(ANALYSIS_SYSTEM_PROMPT, &user, ANALYSIS_MAX_TOKENS, self.timeout)
            .await?;
        parse_json_block(&text)
    }

    async fn mutate_content(&self, req: &MutationRequest) -> Result<MutationDraft> {
        let latitude = match req.aggressiveness {
            MutationAggressiveness::Conservative => {
                "Adjust tone and weave in one or two references to the conversation. \
                 Keep the structure. The call to action and any offer must stay verbatim."
            }
            MutationAggressiveness::Moderate => {
                "You may rewrite the structure freely, but preserve the call to action \
                 and the underlying intent of the message."
            }
            MutationAggressiveness::Aggressive => {
                "Regenerate freely. Treat the original only as topic inspiration."
            }
        };
        let brand = req.brand_voice.as_deref().unwrap_or("neutral, professional");
        let phrases = if req.custom_phrases.is_empty() {
            String::new()
        } else {
            format!("\nPreferred phrases: {}", req.custom_phrases.join("; "))
        };
        let guidance = req
            .guidance
            .as_deref()
            .map(|g| format!("\nOperator guidance for this step: {g}"))
            .unwrap_or_default();

        let original = serde_json::to_string(&req.original)
            .map_err(|e| LlmError::Parse(e.to_string()))?;
        let user = format!(
            "Latitude: {latitude}\nBrand voice: {brand}{phrases}{guidance}\n\n\
             Conversation context:\n{}\n\nOriginal content (JSON):\n{original}",
            req.context
        );

        let system = mutation_system_prompt(req.channel);
        let text = self
            .complete(
                &system,
                &user,
                MUTATION_MAX_TOKENS,
                mutation_timeout(self.timeout),
            )
            .await?;

        let raw: RawMutation = parse_json_block(&text)?;
        Ok(MutationDraft {
            content: raw.content,
            confidence: raw.confidence.clamp(0.0, 1.0),
            model: self.model.clone(),
        })
    }

    async fn generate_sequence(&self, req: &SequenceDraftRequest) -> Result<SequenceDraft> {
        let channels: Vec<String> = req.channel_mix.iter().map(|c| c.to_string()).collect();
        let user = format!(
            "Goal: {}\nChannels available: {}\nStep count: {}\nBrand voice: {}",
            req.goal,
            channels.join(", "),
            req.step_count,
            req.brand_voice.as_deref().unwrap_or("neutral, professional"),
        );
        let text = self
            .complete(SEQUENCE_SYSTEM_PROMPT, &user, SEQUENCE_MAX_TOKENS, self.timeout)
            .await?;
        parse_json_block(&text)
    }
}

const ANALYSIS_SYSTEM_PROMPT: &str = "\
You analyze one inbound message (or call transcript) from a prospect in an \
outbound follow-up conversation. Respond with ONLY a JSON object, no prose, \
matching exactly this schema:
{
  \"primary_emotion\": \"excited|interested|neutral|hesitant|frustrated|confused|angry|dismissive\",
  \"emotion_confidence\": 0.0-1.0,
  \"intent\": \"interested|not_interested|stop|reschedule|question|unknown|objection|ready_to_buy|needs_info\",
  \"objections\": [{\"type\": \"price|timing|competitor|authority|need|trust|urgency\", \"detail\": \"...\", \"severity\": \"mild|moderate|strong\"}],
  \"buying_signals\": [{\"signal\": \"...\", \"strength\": \"weak|moderate|strong\"}],
  \"urgency_level\": \"immediate|soon|flexible|no_rush|lost\",
  \"recommended_action\": \"escalate_to_human|continue_sequence|pause_and_notify|fast_track|end_sequence|switch_channel|address_objection\",
  \"recommended_channel\": \"sms|email|voice|any\",
  \"recommended_tone\": \"empathetic|urgent|casual|professional|reassuring\",
  \"needs_human_intervention\": true|false,
  \"is_hot_lead\": true|false,
  \"is_at_risk\": true|false
}
Every field is required. Use conservative judgments when unsure.";

fn mutation_system_prompt(channel: Channel) -> String {
    let channel_rules = match channel {
        Channel::Sms => {
            "The body must be at most 320 characters, ideally under 160. \
             Plain text only."
        }
        Channel::Email => "Provide subject, html, and text fields.",
        Channel::Voice => {
            "first_message and system_prompt must remain natural-language \
             instructions suitable for a voice agent."
        }
    };
    format!(
        "You rewrite one outbound follow-up message using the conversation \
         context. Hard rules: phone numbers, URLs, legal disclaimers, and \
         opt-out language in the original must appear unaltered in the \
         rewrite. {channel_rules}\n\
         Respond with ONLY a JSON object:\n\
         {{\"content\": <same shape as the original content JSON>, \
         \"confidence\": 0.0-1.0}}\n\
         confidence is your own estimate that the rewrite outperforms the \
         original for this specific conversation."
    )
}

const SEQUENCE_SYSTEM_PROMPT: &str = "\
You draft an outbound follow-up sequence. Respond with ONLY a JSON object:
{\"name\": \"...\", \"steps\": [{\"channel\": \"sms|email|voice\", \"delay_seconds\": N,
  \"content\": {\"channel\": \"sms\", \"body\": \"...\"}
             | {\"channel\": \"email\", \"subject\": \"...\", \"html\": \"...\", \"text\": \"...\"}
             | {\"channel\": \"voice\", \"first_message\": \"...\", \"system_prompt\": \"...\"}}]}
Placeholders like {{first_name}} are allowed and encouraged.";

#[derive(Deserialize)]
struct RawMutation {
    content: StepContent,
    confidence: f64,
}

/// Extract and parse the JSON object from a model reply, tolerating code
/// fences and surrounding prose.
pub(crate) fn parse_json_block<T: serde::de::DeserializeOwned>(text: &str) -> Result<T> {
    let start = text
        .find('{')
        .ok_or_else(|| LlmError::Parse("no JSON object in response".into()))?;
    let end = text
        .rfind('}')
        .ok_or_else(|| LlmError::Parse("unterminated JSON object in response".into()))?;
    if end < start {
        return Err(LlmError::Parse("malformed JSON object in response".into()));
    }
    serde_json::from_str(&text[start..=end]).map_err(|e| LlmError::Parse(e.to_string()))
}

// Anthropic API response types (private — only used for deserialization)

#[derive(Deserialize)]
struct ApiResponse {
    content: Vec<ContentBlock>,
}

#[derive(Deserialize)]
#[serde(tag = "type")]
enum ContentBlock {
    #[serde(rename = "text")]
    Text { text: String },
    #[serde(other)]
    Unknown,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_json_block_tolerates_fences_and_prose() {
        let text = "Here is the analysis:\n```json\n{\"confidence\": 0.8, \"content\": {\"channel\": \"sms\", \"body\": \"hi\"}}\n```\nDone.";
        let raw: RawMutation = parse_json_block(text).unwrap();
        assert!((raw.confidence - 0.8).abs() < f64::EPSILON);
    }

    #[test]
    fn parse_json_block_rejects_schema_mismatch() {
        // Valid JSON, wrong shape — this is the discard path for mutations.
        let text = r#"{"confidence": "very high"}"#;
        assert!(parse_json_block::<RawMutation>(text).is_err());
    }

    #[test]
    fn parse_json_block_rejects_proseless_garbage() {
        assert!(parse_json_block::<RawMutation>("I cannot help with that.").is_err());
    }

    #[test]
    fn full_analysis_shape_parses() {
        let text = r#"{
            "primary_emotion": "interested",
            "emotion_confidence": 0.9,
            "intent": "question",
            "objections": [{"type": "price", "detail": "asked about cost", "severity": "mild"}],
            "buying_signals": [{"signal": "asked for a quote", "strength": "moderate"}],
            "urgency_level": "soon",
            "recommended_action": "continue_sequence",
            "recommended_channel": "sms",
            "recommended_tone": "casual",
            "needs_human_intervention": false,
            "is_hot_lead": true,
            "is_at_risk": false
        }"#;
        let a: EmotionalAnalysis = parse_json_block(text).unwrap();
        assert!(a.is_hot_lead);
        assert_eq!(a.objections.len(), 1);
    }

    #[test]
    fn mutation_timeout_is_capped() {
        assert_eq!(
            mutation_timeout(Duration::from_secs(30)),
            Duration::from_secs(45)
        );
        assert_eq!(
            mutation_timeout(Duration::from_secs(40)),
            Duration::from_secs(45)
        );
        assert_eq!(
            mutation_timeout(Duration::from_secs(10)),
            Duration::from_secs(15)
        );
    }
}
