//! The fixed emotional-analysis shape shared by the analyzer, the event
//! processor, and the scheduler's tone/timing decisions.
//!
//! Analyses are never partially filled: when the LLM and the keyword
//! fallback both fail, callers receive [`AnalysisOutcome::Unavailable`]
//! with a reason string instead of an object with missing fields.

use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum PrimaryEmotion {
    Excited,
    Interested,
    #[default]
    Neutral,
    Hesitant,
    Frustrated,
    Confused,
    Angry,
    Dismissive,
}

impl fmt::Display for PrimaryEmotion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            PrimaryEmotion::Excited => "excited",
            PrimaryEmotion::Interested => "interested",
            PrimaryEmotion::Neutral => "neutral",
            PrimaryEmotion::Hesitant => "hesitant",
            PrimaryEmotion::Frustrated => "frustrated",
            PrimaryEmotion::Confused => "confused",
            PrimaryEmotion::Angry => "angry",
            PrimaryEmotion::Dismissive => "dismissive",
        };
        write!(f, "{s}")
    }
}

impl std::str::FromStr for PrimaryEmotion {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "excited" => Ok(PrimaryEmotion::Excited),
            "interested" => Ok(PrimaryEmotion::Interested),
            "neutral" => Ok(PrimaryEmotion::Neutral),
            "hesitant" => Ok(PrimaryEmotion::Hesitant),
            "frustrated" => Ok(PrimaryEmotion::Frustrated),
            "confused" => Ok(PrimaryEmotion::Confused),
            "angry" => Ok(PrimaryEmotion::Angry),
            "dismissive" => Ok(PrimaryEmotion::Dismissive),
            other => Err(format!("unknown emotion: {other}")),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum Intent {
    Interested,
    NotInterested,
    Stop,
    Reschedule,
    Question,
    #[default]
    Unknown,
    Objection,
    ReadyToBuy,
    NeedsInfo,
}

impl fmt::Display for Intent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Intent::Interested => "interested",
            Intent::NotInterested => "not_interested",
            Intent::Stop => "stop",
            Intent::Reschedule => "reschedule",
            Intent::Question => "question",
            Intent::Unknown => "unknown",
            Intent::Objection => "objection",
            Intent::ReadyToBuy => "ready_to_buy",
            Intent::NeedsInfo => "needs_info",
        };
        write!(f, "{s}")
    }
}

impl std::str::FromStr for Intent {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "interested" => Ok(Intent::Interested),
            "not_interested" => Ok(Intent::NotInterested),
            "stop" => Ok(Intent::Stop),
            "reschedule" => Ok(Intent::Reschedule),
            "question" => Ok(Intent::Question),
            "unknown" => Ok(Intent::Unknown),
            "objection" => Ok(Intent::Objection),
            "ready_to_buy" => Ok(Intent::ReadyToBuy),
            "needs_info" => Ok(Intent::NeedsInfo),
            other => Err(format!("unknown intent: {other}")),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ObjectionType {
    Price,
    Timing,
    Competitor,
    Authority,
    Need,
    Trust,
    Urgency,
}

impl fmt::Display for ObjectionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ObjectionType::Price => "price",
            ObjectionType::Timing => "timing",
            ObjectionType::Competitor => "competitor",
            ObjectionType::Authority => "authority",
            ObjectionType::Need => "need",
            ObjectionType::Trust => "trust",
            ObjectionType::Urgency => "urgency",
        };
        write!(f, "{s}")
    }
}

impl std::str::FromStr for ObjectionType {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "price" => Ok(ObjectionType::Price),
            "timing" => Ok(ObjectionType::Timing),
            "competitor" => Ok(ObjectionType::Competitor),
            "authority" => Ok(ObjectionType::Authority),
            "need" => Ok(ObjectionType::Need),
            "trust" => Ok(ObjectionType::Trust),
            "urgency" => Ok(ObjectionType::Urgency),
            other => Err(format!("unknown objection type: {other}")),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ObjectionSeverity {
    Mild,
    Moderate,
    Strong,
}

/// A single detected objection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Objection {
    #[serde(rename = "type")]
    pub kind: ObjectionType,
    pub detail: String,
    pub severity: ObjectionSeverity,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BuyingSignalStrength {
    Weak,
    Moderate,
    Strong,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BuyingSignal {
    pub signal: String,
    pub strength: BuyingSignalStrength,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum UrgencyLevel {
    Immediate,
    Soon,
    #[default]
    Flexible,
    NoRush,
    Lost,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum RecommendedAction {
    EscalateToHuman,
    #[default]
    ContinueSequence,
    PauseAndNotify,
    FastTrack,
    EndSequence,
    SwitchChannel,
    AddressObjection,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum RecommendedChannel {
    Sms,
    Email,
    Voice,
    #[default]
    Any,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum RecommendedTone {
    Empathetic,
    Urgent,
    Casual,
    #[default]
    Professional,
    Reassuring,
}

impl fmt::Display for RecommendedTone {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            RecommendedTone::Empathetic => "empathetic",
            RecommendedTone::Urgent => "urgent",
            RecommendedTone::Casual => "casual",
            RecommendedTone::Professional => "professional",
            RecommendedTone::Reassuring => "reassuring",
        };
        write!(f, "{s}")
    }
}

/// The full analysis produced for one inbound message or call transcript.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EmotionalAnalysis {
    pub primary_emotion: PrimaryEmotion,
    /// Confidence in `primary_emotion`, 0.0–1.0. The keyword fallback always
    /// reports 0.5.
    pub emotion_confidence: f64,
    pub intent: Intent,
    #[serde(default)]
    pub objections: Vec<Objection>,
    #[serde(default)]
    pub buying_signals: Vec<BuyingSignal>,
    pub urgency_level: UrgencyLevel,
    pub recommended_action: RecommendedAction,
    pub recommended_channel: RecommendedChannel,
    pub recommended_tone: RecommendedTone,
    pub needs_human_intervention: bool,
    pub is_hot_lead: bool,
    pub is_at_risk: bool,
}

impl EmotionalAnalysis {
    /// Neutral analysis used as the conservative starting point by the
    /// fallback classifier.
    pub fn neutral(confidence: f64) -> Self {
        Self {
            primary_emotion: PrimaryEmotion::Neutral,
            emotion_confidence: confidence,
            intent: Intent::Unknown,
            objections: Vec::new(),
            buying_signals: Vec::new(),
            urgency_level: UrgencyLevel::Flexible,
            recommended_action: RecommendedAction::ContinueSequence,
            recommended_channel: RecommendedChannel::Any,
            recommended_tone: RecommendedTone::Professional,
            needs_human_intervention: false,
            is_hot_lead: false,
            is_at_risk: false,
        }
    }
}

/// Result of an analysis attempt. `Unavailable` carries the reason so
/// degradation is observable without being mistaken for a neutral verdict.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum AnalysisOutcome {
    Available(EmotionalAnalysis),
    Unavailable { reason: String },
}

impl AnalysisOutcome {
    pub fn available(&self) -> Option<&EmotionalAnalysis> {
        match self {
            AnalysisOutcome::Available(a) => Some(a),
            AnalysisOutcome::Unavailable { .. } => None,
        }
    }
}

/// Sentiment class recorded on interactions and fed into the trend math.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Sentiment {
    Positive,
    Interested,
    #[default]
    Neutral,
    Confused,
    Objection,
    Negative,
}

impl Sentiment {
    /// Scoring used by the sentiment-trend split.
    pub fn score(&self) -> f64 {
        match self {
            Sentiment::Positive => 2.0,
            Sentiment::Interested => 2.0,
            Sentiment::Neutral => 0.0,
            Sentiment::Confused => -0.5,
            Sentiment::Objection => -1.0,
            Sentiment::Negative => -2.0,
        }
    }

    /// Collapse a full analysis into the coarse class stored on the
    /// interaction row.
    pub fn from_analysis(analysis: &EmotionalAnalysis) -> Self {
        if !analysis.objections.is_empty() {
            return Sentiment::Objection;
        }
        match analysis.primary_emotion {
            PrimaryEmotion::Excited => Sentiment::Positive,
            PrimaryEmotion::Interested => Sentiment::Interested,
            PrimaryEmotion::Neutral | PrimaryEmotion::Hesitant => Sentiment::Neutral,
            PrimaryEmotion::Confused => Sentiment::Confused,
            PrimaryEmotion::Frustrated | PrimaryEmotion::Angry | PrimaryEmotion::Dismissive => {
                Sentiment::Negative
            }
        }
    }
}

impl fmt::Display for Sentiment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Sentiment::Positive => "positive",
            Sentiment::Interested => "interested",
            Sentiment::Neutral => "neutral",
            Sentiment::Confused => "confused",
            Sentiment::Objection => "objection",
            Sentiment::Negative => "negative",
        };
        write!(f, "{s}")
    }
}

impl std::str::FromStr for Sentiment {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "positive" => Ok(Sentiment::Positive),
            "interested" => Ok(Sentiment::Interested),
            "neutral" => Ok(Sentiment::Neutral),
            "confused" => Ok(Sentiment::Confused),
            "objection" => Ok(Sentiment::Objection),
            "negative" => Ok(Sentiment::Negative),
            other => Err(format!("unknown sentiment: {other}")),
        }
    }
}

/// Coarse conversation temperature across recent interactions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum SentimentTrend {
    Hot,
    Cold,
    Warming,
    #[default]
    Stable,
    Cooling,
}

impl fmt::Display for SentimentTrend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            SentimentTrend::Hot => "hot",
            SentimentTrend::Cold => "cold",
            SentimentTrend::Warming => "warming",
            SentimentTrend::Stable => "stable",
            SentimentTrend::Cooling => "cooling",
        };
        write!(f, "{s}")
    }
}

impl std::str::FromStr for SentimentTrend {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "hot" => Ok(SentimentTrend::Hot),
            "cold" => Ok(SentimentTrend::Cold),
            "warming" => Ok(SentimentTrend::Warming),
            "stable" => Ok(SentimentTrend::Stable),
            "cooling" => Ok(SentimentTrend::Cooling),
            other => Err(format!("unknown sentiment trend: {other}")),
        }
    }
}

/// Per-enrollment cached emotional state, refreshed by the event processor
/// and read by the scheduler for tone variables and delay multipliers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct EmotionalState {
    pub sentiment_trend: SentimentTrend,
    pub last_emotion: Option<PrimaryEmotion>,
    pub recommended_tone: Option<RecommendedTone>,
    /// Bounded 0–100; used only for tone and timing, never for gating.
    pub engagement_score: i64,
    pub needs_human: bool,
    pub is_hot_lead: bool,
    pub is_at_risk: bool,
    #[serde(default)]
    pub objections_detected: Vec<ObjectionType>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn analysis_outcome_is_explicitly_tagged() {
        let out = AnalysisOutcome::Unavailable {
            reason: "llm timeout, fallback disabled".into(),
        };
        let json = serde_json::to_value(&out).unwrap();
        assert_eq!(json["outcome"], "unavailable");
        assert!(json["reason"].as_str().unwrap().contains("timeout"));
    }

    #[test]
    fn neutral_analysis_has_conservative_defaults() {
        let a = EmotionalAnalysis::neutral(0.5);
        assert_eq!(a.primary_emotion, PrimaryEmotion::Neutral);
        assert_eq!(a.intent, Intent::Unknown);
        assert!(!a.is_hot_lead);
        assert!(!a.needs_human_intervention);
        assert!((a.emotion_confidence - 0.5).abs() < f64::EPSILON);
    }

    #[test]
    fn objection_serializes_with_type_field() {
        let o = Objection {
            kind: ObjectionType::Price,
            detail: "too expensive".into(),
            severity: ObjectionSeverity::Strong,
        };
        let json = serde_json::to_value(&o).unwrap();
        assert_eq!(json["type"], "price");
        assert_eq!(json["severity"], "strong");
    }

    #[test]
    fn emotional_state_default_is_stable_and_cold_free() {
        let s = EmotionalState::default();
        assert_eq!(s.sentiment_trend, SentimentTrend::Stable);
        assert!(!s.is_hot_lead);
        assert_eq!(s.engagement_score, 0);
    }
}
