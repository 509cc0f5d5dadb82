use serde::{Deserialize, Serialize};

use cadence_core::types::{Channel, MutationAggressiveness, StepContent};

/// Analysis request for an inbound text message.
#[derive(Debug, Clone)]
pub struct MessageAnalysisRequest {
    pub body: String,
    pub channel: Channel,
    /// Pre-formatted conversation lines, oldest first (e.g.
    /// `"3d ago · sms out: following up on the quote"`).
    pub history: Vec<String>,
}

/// Analysis request for a finished call.
#[derive(Debug, Clone)]
pub struct TranscriptAnalysisRequest {
    pub transcript: String,
    pub duration_secs: i64,
    pub disposition: String,
}

/// Mutation request: rewrite `original` in light of the conversation.
#[derive(Debug, Clone)]
pub struct MutationRequest {
    pub channel: Channel,
    pub original: StepContent,
    /// Rendered conversation context block.
    pub context: String,
    pub brand_voice: Option<String>,
    pub custom_phrases: Vec<String>,
    pub aggressiveness: MutationAggressiveness,
    /// Optional per-step human guidance.
    pub guidance: Option<String>,
}

/// A proposed rewrite. Confidence below the configured threshold means the
/// caller keeps the rendered original.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MutationDraft {
    pub content: StepContent,
    pub confidence: f64,
    pub model: String,
}

/// Request for a drafted sequence (admin tooling surface).
#[derive(Debug, Clone)]
pub struct SequenceDraftRequest {
    pub goal: String,
    pub channel_mix: Vec<Channel>,
    pub step_count: u8,
    pub brand_voice: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SequenceDraft {
    pub name: String,
    pub steps: Vec<DraftStep>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DraftStep {
    pub channel: Channel,
    pub delay_seconds: u64,
    pub content: StepContent,
}
