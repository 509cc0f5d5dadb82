//! Primary-then-fallback composite. The fallback contract is part of the
//! interface: callers get the same shapes either way and must not care
//! which path answered.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::warn;

use cadence_core::analysis::EmotionalAnalysis;

use crate::error::Result;
use crate::interface::LanguageModel;
use crate::types::{
    MessageAnalysisRequest, MutationDraft, MutationRequest, SequenceDraft, SequenceDraftRequest,
    TranscriptAnalysisRequest,
};

pub struct ResilientModel {
    primary: Option<Arc<dyn LanguageModel>>,
    fallback: Arc<dyn LanguageModel>,
}

impl ResilientModel {
    pub fn new(primary: Option<Arc<dyn LanguageModel>>, fallback: Arc<dyn LanguageModel>) -> Self {
        Self { primary, fallback }
    }
}

macro_rules! with_fallback {
    ($self:ident, $method:ident, $req:expr) => {{
        if let Some(ref primary) = $self.primary {
            match primary.$method($req).await {
                Ok(out) => return Ok(out),
                Err(e) => {
                    warn!(model = primary.name(), method = stringify!($method), error = %e,
                          "primary model failed, using fallback");
                }
            }
        }
        $self.fallback.$method($req).await
    }};
}

#[async_trait]
impl LanguageModel for ResilientModel {
    fn name(&self) -> &str {
        match self.primary {
            Some(ref p) => p.name(),
            None => self.fallback.name(),
        }
    }

    async fn analyze_message(&self, req: &MessageAnalysisRequest) -> Result<EmotionalAnalysis> {
        with_fallback!(self, analyze_message, req)
    }

    async fn analyze_transcript(
        &self,
        req: &TranscriptAnalysisRequest,
    ) -> Result<EmotionalAnalysis> {
        with_fallback!(self, analyze_transcript, req)
    }

    async fn mutate_content(&self, req: &MutationRequest) -> Result<MutationDraft> {
        with_fallback!(self, mutate_content, req)
    }

    async fn generate_sequence(&self, req: &SequenceDraftRequest) -> Result<SequenceDraft> {
        with_fallback!(self, generate_sequence, req)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::LlmError;
    use crate::fallback::KeywordModel;
    use cadence_core::types::Channel;

    /// A primary that always fails, to prove the seam is invisible.
    struct DeadModel;

    #[async_trait]
    impl LanguageModel for DeadModel {
        fn name(&self) -> &str {
            "dead"
        }

        async fn analyze_message(
            &self,
            _req: &MessageAnalysisRequest,
        ) -> Result<EmotionalAnalysis> {
            Err(LlmError::Unavailable("connection refused".into()))
        }

        async fn analyze_transcript(
            &self,
            _req: &TranscriptAnalysisRequest,
        ) -> Result<EmotionalAnalysis> {
            Err(LlmError::Unavailable("connection refused".into()))
        }

        async fn mutate_content(&self, _req: &MutationRequest) -> Result<MutationDraft> {
            Err(LlmError::Unavailable("connection refused".into()))
        }

        async fn generate_sequence(&self, _req: &SequenceDraftRequest) -> Result<SequenceDraft> {
            Err(LlmError::Unavailable("connection refused".into()))
        }
    }

    #[tokio::test]
    async fn dead_primary_degrades_to_fallback_shape() {
        let model = ResilientModel::new(
            Some(Arc::new(DeadModel)),
            Arc::new(KeywordModel::new()),
        );
        let a = model
            .analyze_message(&MessageAnalysisRequest {
                body: "how much would this cost?".into(),
                channel: Channel::Sms,
                history: vec![],
            })
            .await
            .unwrap();
        assert!(a.is_hot_lead);
        assert!((a.emotion_confidence - 0.5).abs() < f64::EPSILON);
    }

    #[tokio::test]
    async fn no_primary_goes_straight_to_fallback() {
        let model = ResilientModel::new(None, Arc::new(KeywordModel::new()));
        let a = model
            .analyze_message(&MessageAnalysisRequest {
                body: "ok".into(),
                channel: Channel::Sms,
                history: vec![],
            })
            .await
            .unwrap();
        assert!(!a.is_hot_lead);
    }
}
