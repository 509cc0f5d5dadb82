use async_trait::async_trait;

use cadence_core::analysis::EmotionalAnalysis;

use crate::error::Result;
use crate::types::{
    MessageAnalysisRequest, MutationDraft, MutationRequest, SequenceDraft, SequenceDraftRequest,
    TranscriptAnalysisRequest,
};

/// Common interface for every language-model path (Anthropic, keyword
/// fallback, the resilient composite).
///
/// Implementations must be `Send + Sync`: one instance is shared across the
/// scheduler, the event-processor pool, and the mutator.
#[async_trait]
pub trait LanguageModel: Send + Sync {
    /// Model name for logging and mutation audit records.
    fn name(&self) -> &str;

    /// Analyze one inbound message in its conversation context.
    async fn analyze_message(&self, req: &MessageAnalysisRequest) -> Result<EmotionalAnalysis>;

    /// Analyze a finished call transcript.
    async fn analyze_transcript(
        &self,
        req: &TranscriptAnalysisRequest,
    ) -> Result<EmotionalAnalysis>;

    /// Propose a rewrite of step content. Low-confidence drafts are
    /// discarded by the caller, never by the model.
    async fn mutate_content(&self, req: &MutationRequest) -> Result<MutationDraft>;

    /// Draft a whole sequence from a goal description.
    async fn generate_sequence(&self, req: &SequenceDraftRequest) -> Result<SequenceDraft>;
}
