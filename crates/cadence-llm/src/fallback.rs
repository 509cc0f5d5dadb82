//! Deterministic keyword classifier — the required fallback path.
//!
//! Produces the same analysis shape as the LLM at confidence 0.5 with
//! conservative defaults: no hot-lead verdict without explicit pricing or
//! availability keywords, no human escalation without anger/scam keywords.
//! Mutations come back at confidence 0.0, which the mutator's threshold
//! discards, so callers need no special casing.

use async_trait::async_trait;

use cadence_core::analysis::{
    BuyingSignal, BuyingSignalStrength, EmotionalAnalysis, Intent, Objection, ObjectionSeverity,
    ObjectionType, PrimaryEmotion, RecommendedAction, RecommendedTone, UrgencyLevel,
};
use cadence_core::types::{Channel, StepContent};

use crate::error::Result;
use crate::interface::LanguageModel;
use crate::types::{
    DraftStep, MessageAnalysisRequest, MutationDraft, MutationRequest, SequenceDraft,
    SequenceDraftRequest, TranscriptAnalysisRequest,
};

/// Fallback analyses always carry this confidence.
const FALLBACK_CONFIDENCE: f64 = 0.5;

const STOP_KEYWORDS: &[&str] = &[
    "stop",
    "unsubscribe",
    "remove me",
    "do not contact",
    "don't contact",
    "opt out",
];

const ESCALATION_KEYWORDS: &[&str] = &[
    "scam", "fraud", "lawyer", "lawsuit", "attorney", "harass", "police", "report you",
];

const HOT_KEYWORDS: &[&str] = &[
    "price",
    "pricing",
    "cost",
    "how much",
    "quote",
    "estimate",
    "available",
    "availability",
    "when can you",
    "book",
    "schedule",
];

const NOT_INTERESTED_KEYWORDS: &[&str] =
    &["not interested", "no thanks", "no thank you", "already found", "went with"];

const RESCHEDULE_KEYWORDS: &[&str] = &[
    "reschedule",
    "call me later",
    "another time",
    "next week",
    "call back",
    "busy right now",
];

const PRICE_OBJECTION_KEYWORDS: &[&str] = &["too expensive", "can't afford", "over budget", "cheaper"];
const TIMING_OBJECTION_KEYWORDS: &[&str] = &["not right now", "maybe later", "too soon", "next year"];
const COMPETITOR_OBJECTION_KEYWORDS: &[&str] = &["another company", "other quotes", "competitor"];

pub struct KeywordModel;

impl KeywordModel {
    pub fn new() -> Self {
        Self
    }

    fn classify(&self, text: &str) -> EmotionalAnalysis {
        let lower = text.to_lowercase();
        let mut analysis = EmotionalAnalysis::neutral(FALLBACK_CONFIDENCE);

        if contains_any(&lower, STOP_KEYWORDS) {
            analysis.intent = Intent::Stop;
            analysis.primary_emotion = PrimaryEmotion::Dismissive;
            analysis.recommended_action = RecommendedAction::EndSequence;
            analysis.urgency_level = UrgencyLevel::Lost;
            return analysis;
        }

        if contains_any(&lower, ESCALATION_KEYWORDS) {
            analysis.primary_emotion = PrimaryEmotion::Angry;
            analysis.intent = Intent::Objection;
            analysis.needs_human_intervention = true;
            analysis.is_at_risk = true;
            analysis.recommended_action = RecommendedAction::EscalateToHuman;
            analysis.recommended_tone = RecommendedTone::Empathetic;
            analysis.objections.push(Objection {
                kind: ObjectionType::Trust,
                detail: "escalation keyword matched".into(),
                severity: ObjectionSeverity::Strong,
            });
            return analysis;
        }

        if contains_any(&lower, NOT_INTERESTED_KEYWORDS) {
            analysis.intent = Intent::NotInterested;
            analysis.primary_emotion = PrimaryEmotion::Dismissive;
            analysis.is_at_risk = true;
            analysis.urgency_level = UrgencyLevel::Lost;
            analysis.recommended_action = RecommendedAction::EndSequence;
            return analysis;
        }

        if contains_any(&lower, RESCHEDULE_KEYWORDS) {
            analysis.intent = Intent::Reschedule;
            analysis.primary_emotion = PrimaryEmotion::Neutral;
            analysis.urgency_level = UrgencyLevel::Flexible;
            return analysis;
        }

        // Objections before the hot-lead check: "too expensive" contains no
        // hot keyword, but "how much ... too expensive" should surface the
        // objection, not a hot lead.
        if contains_any(&lower, PRICE_OBJECTION_KEYWORDS) {
            analysis.intent = Intent::Objection;
            analysis.primary_emotion = PrimaryEmotion::Hesitant;
            analysis.recommended_action = RecommendedAction::AddressObjection;
            analysis.objections.push(Objection {
                kind: ObjectionType::Price,
                detail: "price objection keyword matched".into(),
                severity: ObjectionSeverity::Moderate,
            });
            return analysis;
        }
        if contains_any(&lower, TIMING_OBJECTION_KEYWORDS) {
            analysis.intent = Intent::Objection;
            analysis.primary_emotion = PrimaryEmotion::Hesitant;
            analysis.recommended_action = RecommendedAction::AddressObjection;
            analysis.objections.push(Objection {
                kind: ObjectionType::Timing,
                detail: "timing objection keyword matched".into(),
                severity: ObjectionSeverity::Mild,
            });
            return analysis;
        }
        if contains_any(&lower, COMPETITOR_OBJECTION_KEYWORDS) {
            analysis.intent = Intent::Objection;
            analysis.recommended_action = RecommendedAction::AddressObjection;
            analysis.objections.push(Objection {
                kind: ObjectionType::Competitor,
                detail: "competitor keyword matched".into(),
                severity: ObjectionSeverity::Moderate,
            });
            return analysis;
        }

        if contains_any(&lower, HOT_KEYWORDS) {
            analysis.intent = Intent::Interested;
            analysis.primary_emotion = PrimaryEmotion::Interested;
            analysis.is_hot_lead = true;
            analysis.urgency_level = UrgencyLevel::Soon;
            analysis.buying_signals.push(BuyingSignal {
                signal: "pricing/availability keyword matched".into(),
                strength: BuyingSignalStrength::Moderate,
            });
            return analysis;
        }

        if lower.contains('?') {
            analysis.intent = Intent::Question;
        }
        analysis
    }
}

impl Default for KeywordModel {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl LanguageModel for KeywordModel {
    fn name(&self) -> &str {
        "keyword-fallback"
    }

    async fn analyze_message(&self, req: &MessageAnalysisRequest) -> Result<EmotionalAnalysis> {
        Ok(self.classify(&req.body))
    }

    async fn analyze_transcript(
        &self,
        req: &TranscriptAnalysisRequest,
    ) -> Result<EmotionalAnalysis> {
        let mut analysis = self.classify(&req.transcript);
        // A long answered call with nothing alarming leans interested.
        if analysis.intent == Intent::Unknown
            && req.duration_secs >= 120
            && req.disposition == "answered"
        {
            analysis.primary_emotion = PrimaryEmotion::Interested;
            analysis.intent = Intent::Interested;
        }
        Ok(analysis)
    }

    async fn mutate_content(&self, req: &MutationRequest) -> Result<MutationDraft> {
        // Deterministic refusal: zero confidence is always under the
        // threshold, so the rendered original ships unchanged.
        Ok(MutationDraft {
            content: req.original.clone(),
            confidence: 0.0,
            model: self.name().to_string(),
        })
    }

    async fn generate_sequence(&self, req: &SequenceDraftRequest) -> Result<SequenceDraft> {
        // Minimal deterministic template when no LLM is reachable.
        let channel = req.channel_mix.first().copied().unwrap_or(Channel::Sms);
        let body = format!("Hi {{{{first_name}}}}, quick follow-up about {}.", req.goal);
        let steps = vec![
            DraftStep {
                channel,
                delay_seconds: 0,
                content: content_for(channel, &body),
            },
            DraftStep {
                channel,
                delay_seconds: 86_400,
                content: content_for(channel, "Hi {{first_name}}, just checking in — any questions?"),
            },
            DraftStep {
                channel,
                delay_seconds: 259_200,
                content: content_for(
                    channel,
                    "Hi {{first_name}}, closing the loop for now. Reply any time.",
                ),
            },
        ];
        Ok(SequenceDraft {
            name: format!("follow-up: {}", req.goal),
            steps: steps.into_iter().take(req.step_count.max(1) as usize).collect(),
        })
    }
}

fn content_for(channel: Channel, body: &str) -> StepContent {
    match channel {
        Channel::Sms => StepContent::Sms { body: body.into() },
        Channel::Email => StepContent::Email {
            subject: "Quick follow-up".into(),
            html: format!("<p>{body}</p>"),
            text: body.into(),
        },
        Channel::Voice => StepContent::Voice {
            first_message: body.into(),
            system_prompt: "You are a friendly follow-up assistant. Keep the call short."
                .into(),
            assistant_id: None,
            overrides: None,
        },
    }
}

fn contains_any(haystack: &str, needles: &[&str]) -> bool {
    needles.iter().any(|n| haystack.contains(n))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn analyze(body: &str) -> EmotionalAnalysis {
        KeywordModel::new().classify(body)
    }

    #[test]
    fn stop_intent_wins_over_everything() {
        let a = analyze("STOP. How much does it cost?");
        assert_eq!(a.intent, Intent::Stop);
        assert!(!a.is_hot_lead);
        assert_eq!(a.recommended_action, RecommendedAction::EndSequence);
    }

    #[test]
    fn hot_lead_needs_explicit_keywords() {
        let a = analyze("Sounds interesting, tell me more");
        assert!(!a.is_hot_lead);

        let b = analyze("What would the pricing look like for my house?");
        assert!(b.is_hot_lead);
        assert_eq!(b.intent, Intent::Interested);
        assert!(!b.buying_signals.is_empty());
    }

    #[test]
    fn escalation_only_on_anger_keywords() {
        let a = analyze("this is a scam, I'm calling my lawyer");
        assert!(a.needs_human_intervention);
        assert_eq!(a.recommended_action, RecommendedAction::EscalateToHuman);

        let b = analyze("I'm not sure this is for me");
        assert!(!b.needs_human_intervention);
    }

    #[test]
    fn price_objection_beats_hot_keyword_overlap() {
        let a = analyze("how much? honestly that sounds too expensive for us");
        assert_eq!(a.intent, Intent::Objection);
        assert!(!a.is_hot_lead);
        assert_eq!(a.objections[0].kind, ObjectionType::Price);
    }

    #[test]
    fn neutral_text_stays_conservative() {
        let a = analyze("ok");
        assert_eq!(a.primary_emotion, PrimaryEmotion::Neutral);
        assert_eq!(a.intent, Intent::Unknown);
        assert!((a.emotion_confidence - 0.5).abs() < f64::EPSILON);
        assert!(!a.is_hot_lead);
        assert!(!a.needs_human_intervention);
    }

    #[test]
    fn bare_question_classifies_as_question() {
        let a = analyze("do you also do gutters?");
        assert_eq!(a.intent, Intent::Question);
    }

    #[tokio::test]
    async fn long_answered_call_leans_interested() {
        let model = KeywordModel::new();
        let a = model
            .analyze_transcript(&TranscriptAnalysisRequest {
                transcript: "we talked through the options for a while".into(),
                duration_secs: 240,
                disposition: "answered".into(),
            })
            .await
            .unwrap();
        assert_eq!(a.intent, Intent::Interested);
    }

    #[tokio::test]
    async fn mutation_fallback_is_always_discardable() {
        let model = KeywordModel::new();
        let draft = model
            .mutate_content(&MutationRequest {
                channel: Channel::Sms,
                original: StepContent::Sms { body: "hi".into() },
                context: String::new(),
                brand_voice: None,
                custom_phrases: vec![],
                aggressiveness: Default::default(),
                guidance: None,
            })
            .await
            .unwrap();
        assert!(draft.confidence < 0.5);
    }
}
