use std::sync::Arc;

use tracing::warn;

use cadence_core::analysis::{
    AnalysisOutcome, EmotionalAnalysis, EmotionalState, SentimentTrend,
};
use cadence_core::types::Channel;
use cadence_llm::{LanguageModel, MessageAnalysisRequest, TranscriptAnalysisRequest};

use crate::types::ConversationContext;

/// Transcripts at or under this length carry no analyzable signal.
pub const MIN_TRANSCRIPT_CHARS: usize = 30;

/// Thin wrapper around the language-model interface that produces the
/// explicit [`AnalysisOutcome`] sum type. Callers never see a partially
/// filled analysis.
pub struct EmotionalAnalyzer {
    model: Arc<dyn LanguageModel>,
}

impl EmotionalAnalyzer {
    pub fn new(model: Arc<dyn LanguageModel>) -> Self {
        Self { model }
    }

    pub async fn analyze_inbound(
        &self,
        body: &str,
        channel: Channel,
        context: &ConversationContext,
    ) -> AnalysisOutcome {
        let history: Vec<String> = context
            .formatted_timeline
            .lines()
            .map(String::from)
            .collect();
        match self
            .model
            .analyze_message(&MessageAnalysisRequest {
                body: body.to_string(),
                channel,
                history,
            })
            .await
        {
            Ok(analysis) => AnalysisOutcome::Available(analysis),
            Err(e) => {
                warn!(error = %e, "message analysis unavailable");
                AnalysisOutcome::Unavailable {
                    reason: e.to_string(),
                }
            }
        }
    }

    /// Whether a call transcript is worth analyzing at all.
    pub fn should_analyze_transcript(transcript: &str) -> bool {
        transcript.trim().chars().count() > MIN_TRANSCRIPT_CHARS
    }

    pub async fn analyze_call(
        &self,
        transcript: &str,
        duration_secs: i64,
        disposition: &str,
    ) -> AnalysisOutcome {
        if !Self::should_analyze_transcript(transcript) {
            return AnalysisOutcome::Unavailable {
                reason: "transcript too short to analyze".into(),
            };
        }
        match self
            .model
            .analyze_transcript(&TranscriptAnalysisRequest {
                transcript: transcript.to_string(),
                duration_secs,
                disposition: disposition.to_string(),
            })
            .await
        {
            Ok(analysis) => AnalysisOutcome::Available(analysis),
            Err(e) => {
                warn!(error = %e, "transcript analysis unavailable");
                AnalysisOutcome::Unavailable {
                    reason: e.to_string(),
                }
            }
        }
    }
}

/// Fold a fresh analysis plus recomputed trend/engagement into the state
/// cached on the enrollment.
pub fn updated_state(
    analysis: &EmotionalAnalysis,
    trend: SentimentTrend,
    engagement_score: i64,
) -> EmotionalState {
    EmotionalState {
        sentiment_trend: trend,
        last_emotion: Some(analysis.primary_emotion),
        recommended_tone: Some(analysis.recommended_tone),
        engagement_score,
        needs_human: analysis.needs_human_intervention,
        is_hot_lead: analysis.is_hot_lead,
        is_at_risk: analysis.is_at_risk,
        objections_detected: analysis.objections.iter().map(|o| o.kind).collect(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cadence_llm::KeywordModel;

    #[tokio::test]
    async fn short_transcript_is_explicitly_unavailable() {
        let analyzer = EmotionalAnalyzer::new(Arc::new(KeywordModel::new()));
        let outcome = analyzer.analyze_call("hi, bye", 4, "voicemail").await;
        match outcome {
            AnalysisOutcome::Unavailable { reason } => {
                assert!(reason.contains("too short"));
            }
            AnalysisOutcome::Available(_) => panic!("expected unavailable"),
        }
    }

    #[tokio::test]
    async fn inbound_analysis_is_available_via_fallback() {
        let analyzer = EmotionalAnalyzer::new(Arc::new(KeywordModel::new()));
        let outcome = analyzer
            .analyze_inbound(
                "what does it cost?",
                Channel::Sms,
                &ConversationContext::default(),
            )
            .await;
        let analysis = outcome.available().expect("available");
        assert!(analysis.is_hot_lead);
    }

    #[test]
    fn state_fold_carries_all_flags() {
        let mut analysis = EmotionalAnalysis::neutral(0.9);
        analysis.is_hot_lead = true;
        analysis.needs_human_intervention = true;
        let state = updated_state(&analysis, SentimentTrend::Warming, 82);
        assert!(state.is_hot_lead);
        assert!(state.needs_human);
        assert_eq!(state.engagement_score, 82);
        assert_eq!(state.sentiment_trend, SentimentTrend::Warming);
    }
}
