use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use cadence_core::analysis::{EmotionalAnalysis, Sentiment};
use cadence_core::types::Channel;
use cadence_store::types::InteractionCounts;

/// Assembled conversation memory for one enrollment.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ConversationContext {
    /// One summary line per channel for the most recent interaction on it.
    pub last_by_channel: HashMap<Channel, String>,
    pub counts: InteractionCounts,
    /// Deduplicated, most recent first.
    pub objections_history: Vec<String>,
    /// Deduplicated, most recent first.
    pub key_topics_history: Vec<String>,
    /// Majority sentiment class across the last K interactions.
    pub overall_sentiment: Sentiment,
    pub days_since_first_contact: i64,
    /// Days since the most recent interaction (0 when fresh or empty).
    pub days_since_last_contact: i64,
    pub last_analysis: Option<EmotionalAnalysis>,
    /// Plain-text block, bounded line count, ready for voice system prompts.
    pub formatted_timeline: String,
    /// Flat variables consumed by the template renderer
    /// (`last_channel_used`, `days_since_contact`, `last_reply_intent`, …).
    pub variables: HashMap<String, String>,
}

impl ConversationContext {
    /// Whether the context can inform a mutation: at least one of a reply,
    /// a call with transcript, recorded objections, a prior analysis, or a
    /// non-neutral overall sentiment.
    pub fn is_informative(&self) -> bool {
        self.counts.inbound > 0
            || self.variables.contains_key("last_call_disposition")
            || !self.objections_history.is_empty()
            || self.last_analysis.is_some()
            || self.overall_sentiment != Sentiment::Neutral
    }
}
