//! Adaptive mutation: ask the language model to rewrite upcoming content in
//! light of the conversation, then gate the rewrite hard.
//!
//! A rewrite ships only when every check passes: preconditions, channel
//! match, the literal-invariant guard (phone numbers, URLs, opt-out
//! language), SMS length, and the confidence threshold. Anything else
//! discards the draft and the rendered original ships — a mutation can
//! degrade a message, the original cannot.

use std::collections::HashMap;
use std::sync::Arc;

use tracing::{debug, warn};

use cadence_core::types::{MutationAggressiveness, StepContent, StepMutationOverride};
use cadence_llm::{LanguageModel, MutationRequest};
use cadence_memory::ConversationContext;
use cadence_store::types::{Enrollment, Sequence, SequenceStep, TenantProfile};

use crate::render::render_content;
use crate::types::MutationVerdict;

/// SMS rewrites may not exceed this many characters (provider segmentation
/// limit; char count approximates graphemes for every alphabet the
/// providers accept).
const SMS_MAX_CHARS: usize = 320;

pub struct Mutator {
    model: Arc<dyn LanguageModel>,
    min_confidence: f64,
}

impl Mutator {
    pub fn new(model: Arc<dyn LanguageModel>, min_confidence: f64) -> Self {
        Self {
            model,
            min_confidence,
        }
    }

    /// All three preconditions from the pipeline contract: mutation enabled
    /// and not overridden off, an informative context, and not the first
    /// step of the sequence.
    pub fn preconditions_met(
        sequence: &Sequence,
        step: &SequenceStep,
        enrollment: &Enrollment,
        context: &ConversationContext,
    ) -> bool {
        sequence.mutation_enabled
            && step.mutation_override != StepMutationOverride::Disabled
            && context.is_informative()
            && enrollment.current_step_order > 0
    }

    /// Attempt a mutation of `rendered` (the post-substitution original).
    /// Accepted rewrites are re-rendered through the substituter before
    /// being returned.
    pub async fn mutate(
        &self,
        rendered: &StepContent,
        sequence: &Sequence,
        step: &SequenceStep,
        tenant: &TenantProfile,
        context: &ConversationContext,
        vars: &HashMap<String, String>,
    ) -> MutationVerdict {
        let aggressiveness = sequence.mutation_aggressiveness;
        let request = MutationRequest {
            channel: step.channel,
            original: rendered.clone(),
            context: context.formatted_timeline.clone(),
            brand_voice: tenant.brand_voice.clone(),
            custom_phrases: tenant.custom_phrases.clone(),
            aggressiveness,
            guidance: step.mutation_instructions.clone(),
        };

        let draft = match self.model.mutate_content(&request).await {
            Ok(draft) => draft,
            Err(e) => {
                warn!(step_id = %step.id, error = %e, "mutation request failed, keeping original");
                return MutationVerdict::Discarded {
                    reason: format!("model error: {e}"),
                };
            }
        };

        if draft.confidence < self.min_confidence {
            debug!(
                step_id = %step.id,
                confidence = draft.confidence,
                threshold = self.min_confidence,
                "mutation below confidence threshold"
            );
            return MutationVerdict::Discarded {
                reason: format!(
                    "confidence {:.2} below threshold {:.2}",
                    draft.confidence, self.min_confidence
                ),
            };
        }

        if draft.content.channel() != rendered.channel() {
            return MutationVerdict::Discarded {
                reason: "rewrite switched channels".into(),
            };
        }

        if let Err(reason) = check_invariants(rendered, &draft.content, aggressiveness) {
            warn!(step_id = %step.id, %reason, "mutation violated content invariants");
            return MutationVerdict::Discarded { reason };
        }

        // Re-render: the model may echo placeholders back.
        let content = render_content(&draft.content, vars);
        if content.validate().is_err() {
            return MutationVerdict::Discarded {
                reason: "rewrite rendered to empty content".into(),
            };
        }

        MutationVerdict::Applied {
            content,
            confidence: draft.confidence,
            model: draft.model,
        }
    }
}

/// The literal-preservation rules every accepted rewrite must satisfy:
/// phone numbers, URLs, and opt-out lines from the original appear
/// unaltered; SMS bodies respect the length cap; conservative rewrites keep
/// the original's final call-to-action sentence.
fn check_invariants(
    original: &StepContent,
    rewritten: &StepContent,
    aggressiveness: MutationAggressiveness,
) -> std::result::Result<(), String> {
    let original_text = flat_text(original);
    let rewritten_text = flat_text(rewritten);

    for phone in extract_phone_numbers(&original_text) {
        if !rewritten_text.contains(&phone) {
            return Err(format!("phone number dropped: {phone}"));
        }
    }
    for url in extract_urls(&original_text) {
        if !rewritten_text.contains(&url) {
            return Err(format!("url dropped: {url}"));
        }
    }
    for line in opt_out_lines(&original_text) {
        if !rewritten_text.contains(&line) {
            return Err("opt-out language altered".into());
        }
    }

    if let StepContent::Sms { body } = rewritten {
        if body.chars().count() > SMS_MAX_CHARS {
            return Err(format!(
                "sms body {} chars exceeds {SMS_MAX_CHARS}",
                body.chars().count()
            ));
        }
    }

    if aggressiveness == MutationAggressiveness::Conservative {
        if let Some(cta) = last_sentence(&original_text) {
            if !rewritten_text.contains(&cta) {
                return Err("conservative rewrite altered the call to action".into());
            }
        }
    }

    Ok(())
}

fn flat_text(content: &StepContent) -> String {
    match content {
        StepContent::Sms { body } => body.clone(),
        StepContent::Email {
            subject,
            html,
            text,
        } => format!("{subject}\n{html}\n{text}"),
        StepContent::Voice {
            first_message,
            system_prompt,
            ..
        } => format!("{first_message}\n{system_prompt}"),
    }
}

/// Phone-looking runs: 7+ of digits with optional +, spaces, dots, dashes,
/// parentheses. Returned verbatim as found.
fn extract_phone_numbers(text: &str) -> Vec<String> {
    let mut found = Vec::new();
    let mut current = String::new();
    let mut digits = 0usize;
    for ch in text.chars() {
        if ch.is_ascii_digit() || "+-. ()".contains(ch) && !current.is_empty() {
            if ch.is_ascii_digit() {
                digits += 1;
            }
            current.push(ch);
        } else if ch == '+' {
            current.push(ch);
        } else {
            if digits >= 7 {
                found.push(current.trim().to_string());
            }
            current.clear();
            digits = 0;
        }
    }
    if digits >= 7 {
        found.push(current.trim().to_string());
    }
    found
}

fn extract_urls(text: &str) -> Vec<String> {
    text.split_whitespace()
        .filter(|tok| tok.starts_with("http://") || tok.starts_with("https://") || tok.starts_with("www."))
        .map(|tok| tok.trim_end_matches(['.', ',', ')', '!', '?']).to_string())
        .collect()
}

fn opt_out_lines(text: &str) -> Vec<String> {
    text.lines()
        .map(str::trim)
        .filter(|line| {
            let lower = line.to_lowercase();
            lower.contains("opt out")
                || lower.contains("opt-out")
                || lower.contains("unsubscribe")
                || lower.contains("reply stop")
                || lower.contains("txt stop")
        })
        .map(String::from)
        .collect()
}

fn last_sentence(text: &str) -> Option<String> {
    text.split_inclusive(['.', '!', '?'])
        .map(str::trim)
        .filter(|s| s.chars().filter(|c| c.is_alphabetic()).count() >= 3)
        .next_back()
        .map(String::from)
}

#[cfg(test)]
mod tests {
    use super::*;
    use cadence_core::types::EnrollmentId;
    use cadence_store::types::{Enrollment, Sequence, SequenceStep, TenantProfile};

    fn sms(body: &str) -> StepContent {
        StepContent::Sms { body: body.into() }
    }

    #[test]
    fn phone_numbers_must_survive() {
        let original = sms("Call us at +1 555 123 4567 today.\nReply STOP to opt out.");
        let good = sms("Quick nudge — reach us at +1 555 123 4567.\nReply STOP to opt out.");
        let bad = sms("Quick nudge — call any time!\nReply STOP to opt out.");
        assert!(check_invariants(&original, &good, MutationAggressiveness::Aggressive).is_ok());
        assert!(check_invariants(&original, &bad, MutationAggressiveness::Aggressive).is_err());
    }

    #[test]
    fn urls_must_survive() {
        let original = sms("Book here: https://example.com/book");
        let bad = sms("Booking is easy, just ask!");
        assert!(check_invariants(&original, &bad, MutationAggressiveness::Aggressive).is_err());
    }

    #[test]
    fn opt_out_language_must_survive_verbatim() {
        let original = sms("Hi there.\nReply STOP to opt out.");
        let reworded = sms("Hi there.\nText BYE if you want us to go away.");
        assert!(check_invariants(&original, &reworded, MutationAggressiveness::Aggressive).is_err());
    }

    #[test]
    fn sms_length_cap_applies() {
        let original = sms("short");
        let long = sms(&"x".repeat(321));
        assert!(check_invariants(&original, &long, MutationAggressiveness::Aggressive).is_err());
        let ok = sms(&"x".repeat(320));
        assert!(check_invariants(&original, &ok, MutationAggressiveness::Aggressive).is_ok());
    }

    #[test]
    fn conservative_keeps_the_cta() {
        let original = sms("We loved talking. Book your slot today!");
        let kept = sms("Great chat earlier — and yes: Book your slot today!");
        let lost = sms("Great chat earlier — talk soon.");
        assert!(check_invariants(&original, &kept, MutationAggressiveness::Conservative).is_ok());
        assert!(check_invariants(&original, &lost, MutationAggressiveness::Conservative).is_err());
        // Moderate latitude may restructure the CTA.
        assert!(check_invariants(&original, &lost, MutationAggressiveness::Moderate).is_ok());
    }

    #[test]
    fn preconditions_require_informative_context_and_progress() {
        let sequence = Sequence {
            id: "seq1".into(),
            tenant_id: "t1".into(),
            name: "s".into(),
            urgency: Default::default(),
            respect_business_hours: true,
            stop_on_reply: true,
            mutation_enabled: true,
            mutation_aggressiveness: Default::default(),
            timeout_hours: None,
            active: true,
        };
        let step = SequenceStep {
            id: "st2".into(),
            sequence_id: "seq1".into(),
            step_order: 2,
            channel: cadence_core::types::Channel::Sms,
            delay_seconds: 3600,
            content: sms("hi"),
            skip_conditions: vec![],
            on_success: None,
            on_failure: None,
            mutation_override: StepMutationOverride::Default,
            mutation_instructions: None,
        };
        let now = chrono::Utc::now().to_rfc3339();
        let mut enrollment = Enrollment {
            id: EnrollmentId::new(),
            tenant_id: "t1".into(),
            contact_id: "c1".into(),
            sequence_id: "seq1".into(),
            current_step_order: 1,
            next_fire_time: Some(now.clone()),
            status: cadence_core::types::EnrollmentStatus::Active,
            status_reason: None,
            custom_variables: Default::default(),
            contact_replied: false,
            answered_call: false,
            appointment_booked: false,
            needs_human_intervention: false,
            emotional_state: Default::default(),
            channel_overrides: Default::default(),
            failure_history: Default::default(),
            selected_variants: Default::default(),
            total_attempts: 1,
            enrolled_at: now.clone(),
            updated_at: now,
        };

        let mut context = ConversationContext::default();
        assert!(!Mutator::preconditions_met(&sequence, &step, &enrollment, &context));

        context.objections_history.push("price".into());
        assert!(Mutator::preconditions_met(&sequence, &step, &enrollment, &context));

        // First step never mutates.
        enrollment.current_step_order = 0;
        assert!(!Mutator::preconditions_met(&sequence, &step, &enrollment, &context));

        // Step-level disable wins.
        enrollment.current_step_order = 1;
        let mut disabled = step.clone();
        disabled.mutation_override = StepMutationOverride::Disabled;
        assert!(!Mutator::preconditions_met(&sequence, &disabled, &enrollment, &context));
    }

    #[tokio::test]
    async fn fallback_drafts_are_discarded_by_threshold() {
        use cadence_llm::KeywordModel;

        let mutator = Mutator::new(Arc::new(KeywordModel::new()), 0.5);
        let tenant = TenantProfile {
            id: "t1".into(),
            display_name: "Acme".into(),
            timezone: "UTC".into(),
            business_hours: Default::default(),
            brand_voice: None,
            custom_phrases: vec![],
        };
        let sequence = Sequence {
            id: "seq1".into(),
            tenant_id: "t1".into(),
            name: "s".into(),
            urgency: Default::default(),
            respect_business_hours: true,
            stop_on_reply: true,
            mutation_enabled: true,
            mutation_aggressiveness: Default::default(),
            timeout_hours: None,
            active: true,
        };
        let step = SequenceStep {
            id: "st2".into(),
            sequence_id: "seq1".into(),
            step_order: 2,
            channel: cadence_core::types::Channel::Sms,
            delay_seconds: 3600,
            content: sms("hi {{first_name}}"),
            skip_conditions: vec![],
            on_success: None,
            on_failure: None,
            mutation_override: StepMutationOverride::Default,
            mutation_instructions: None,
        };

        let verdict = mutator
            .mutate(
                &sms("hi Dana"),
                &sequence,
                &step,
                &tenant,
                &ConversationContext::default(),
                &Default::default(),
            )
            .await;
        match verdict {
            MutationVerdict::Discarded { reason } => assert!(reason.contains("confidence")),
            other => panic!("expected discard, got {other:?}"),
        }
    }
}
